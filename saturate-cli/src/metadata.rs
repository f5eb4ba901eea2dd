//! System Metadata Collection
//!
//! Detects the machine profile recorded in every report.
//!
//! ## Collected Data
//!
//! - **Host**: hostname
//! - **OS**: operating system name and architecture
//! - **CPU**: model name and logical core count
//! - **Memory**: total system RAM in bytes
//!
//! Detection never fails: missing values become "Unknown" or 0, and the core
//! count falls back to 1 so per-core averages never divide by zero.

use saturate_core::available_cores;
use saturate_report::SystemProfile;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

/// Detect the system profile once at startup
pub fn detect_system_profile() -> SystemProfile {
    let system = System::new_with_specifics(
        RefreshKind::new()
            .with_cpu(CpuRefreshKind::new())
            .with_memory(MemoryRefreshKind::new().with_ram()),
    );

    let cpu_model = system
        .cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .filter(|brand| !brand.is_empty())
        .unwrap_or_else(|| "Unknown".to_string());

    SystemProfile {
        hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
        cpu_model,
        core_count: available_cores(),
        total_memory_bytes: system.total_memory(),
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_is_usable() {
        let profile = detect_system_profile();
        assert!(profile.core_count >= 1);
        assert_eq!(profile.cores(), profile.core_count);
        assert!(!profile.cpu_model.is_empty());
        assert_eq!(profile.os, std::env::consts::OS);
    }
}
