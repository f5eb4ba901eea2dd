//! Output Formatting
//!
//! Human-readable output formatting for benchmark reports.
//!
//! Generates terminal-friendly output with:
//! - System profile header
//! - One block per completed run (score, calculations, duration, memory)
//! - Abort notice when the sequence stopped early
//! - Aggregated summary across runs

use saturate_report::{BenchmarkReport, MemoryReading, RunResult};

/// One-line summary of a completed run
pub fn format_run_line(result: &RunResult) -> String {
    let peak = result
        .peak_memory
        .as_ref()
        .map(|m| format!("{:.1} MB", m.rss_mb()))
        .unwrap_or_else(|| "n/a".to_string());
    let degraded = if result.degraded { " (degraded)" } else { "" };
    format!(
        "Run {}: score {}  calculations {}  duration {:.2}s  peak memory {}{}",
        result.run_number,
        format_score(result.metrics.overall_score),
        result.total_calculations,
        result.duration_ms as f64 / 1000.0,
        peak,
        degraded
    )
}

fn format_score(score: Option<u64>) -> String {
    score
        .map(|s| s.to_string())
        .unwrap_or_else(|| "n/a".to_string())
}

fn format_memory(reading: Option<&MemoryReading>) -> String {
    match reading {
        Some(m) => format!(
            "rss {:.1} MB  heap {:.1} MB  external {:.1} MB  buffers {:.1} MB",
            m.rss_mb(),
            m.heap as f64 / (1024.0 * 1024.0),
            m.external as f64 / (1024.0 * 1024.0),
            m.buffers as f64 / (1024.0 * 1024.0)
        ),
        None => "n/a".to_string(),
    }
}

/// Format a report for human-readable terminal display
///
/// # Arguments
/// * `report` - Complete benchmark report
///
/// # Returns
/// Formatted string suitable for terminal output
pub fn format_human_output(report: &BenchmarkReport) -> String {
    let mut output = String::new();
    let system = &report.system_info;

    output.push('\n');
    output.push_str("Saturate Results\n");
    output.push_str(&"=".repeat(60));
    output.push('\n');
    output.push_str(&format!(
        "  {} ({} cores) on {} {}/{}\n\n",
        system.cpu_model, system.core_count, system.hostname, system.os, system.arch
    ));

    for run in &report.individual_runs {
        output.push_str(&format!("Run {}\n", run.run_number));
        output.push_str(&"-".repeat(60));
        output.push('\n');
        output.push_str(&format!(
            "  score: {}  calculations: {}  duration: {:.2}s\n",
            format_score(run.metrics.overall_score),
            run.total_calculations,
            run.duration_ms as f64 / 1000.0
        ));
        output.push_str(&format!(
            "  per second: {}  per core: {}  core efficiency: {:.1}%\n",
            run.metrics.calculations_per_second,
            run.average_calculations_per_core,
            run.metrics.core_efficiency
        ));
        output.push_str(&format!(
            "  workers: {}/{} active  highest index: {}  largest value: {} digits\n",
            run.active_workers_at_end,
            run.workers_spawned,
            run.highest_index,
            run.largest_value.len()
        ));
        output.push_str(&format!(
            "  peak memory: {}\n",
            format_memory(run.peak_memory.as_ref())
        ));
        for warning in &run.warnings {
            output.push_str(&format!("  warning: {}\n", warning));
        }
        output.push('\n');
    }

    if let Some(abort) = &report.benchmark_info.abort {
        output.push_str(&format!(
            "Aborted during run {}: {} ({})\n\n",
            abort.run_number, abort.reason, abort.message
        ));
    }

    // Summary
    let summary = &report.aggregated_results;
    output.push_str("Summary\n");
    output.push_str(&"-".repeat(60));
    output.push('\n');
    output.push_str(&format!(
        "  Total runs: {}  Completed: {}  Duration: {:.2}s\n",
        report.benchmark_info.total_runs,
        report.benchmark_info.completed_runs,
        report.benchmark_info.total_duration_ms as f64 / 1000.0
    ));
    output.push_str(&format!(
        "  Total calculations: {}\n",
        summary.total_calculations
    ));
    output.push_str(&format!(
        "  Score: average {}  best {}  worst {}  variance {}\n",
        format_score(summary.average_score),
        format_score(summary.best_score),
        format_score(summary.worst_score),
        format_score(summary.score_variance)
    ));

    output
}
