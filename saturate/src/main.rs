use saturate::TrackingAllocator;

#[global_allocator]
static GLOBAL: TrackingAllocator = TrackingAllocator;

fn main() -> anyhow::Result<()> {
    saturate::run()
}
