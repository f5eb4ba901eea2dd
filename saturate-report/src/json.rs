//! JSON Output

use crate::report::BenchmarkReport;

/// Generate a prettified JSON report.
pub fn generate_json_report(report: &BenchmarkReport) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

/// Parse a report previously written by [`generate_json_report`].
pub fn parse_json_report(json: &str) -> Result<BenchmarkReport, serde_json::Error> {
    serde_json::from_str(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::*;
    use chrono::{TimeZone, Utc};
    use num_bigint::BigUint;
    use saturate_stats::{CoreEfficiencyMode, DerivedMetrics, RunScore, summarize_scores};

    fn huge_value() -> String {
        // ~10^180, far past 2^53 and u128
        BigUint::from(7u32).pow(213).to_str_radix(10)
    }

    fn snapshot() -> ConfigSnapshot {
        ConfigSnapshot {
            duration_seconds: 2,
            max_memory_mb: None,
            run_count: 1,
            core_count: 4,
            isolation: "thread".to_string(),
            batch_max_units: 256,
            batch_flush_interval_ms: 50,
            core_efficiency_mode: CoreEfficiencyMode::Balanced,
        }
    }

    fn sample_report() -> BenchmarkReport {
        let started = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let reading = MemoryReading {
            rss: 12 * 1024 * 1024,
            heap: 3 * 1024 * 1024,
            external: 0,
            buffers: 512 * 1024,
            offset_ms: 1000,
        };
        let run = RunResult {
            run_number: 1,
            started_at: started,
            configuration: snapshot(),
            duration_ms: 2003,
            total_calculations: 48_000,
            average_calculations_per_core: 12_000,
            largest_value: huge_value(),
            highest_index: 12_345,
            per_worker_calculations: vec![12_000; 4],
            workers_spawned: 4,
            active_workers_at_end: 4,
            forced_terminations: 0,
            metrics: DerivedMetrics {
                calculations_per_second: 23_964,
                average_per_core: 12_000,
                core_efficiency: 100.0,
                memory_efficiency: Some(4_000_000),
                overall_score: Some(95_856_000),
            },
            degraded: false,
            warnings: Vec::new(),
            peak_memory: Some(reading),
            final_memory: Some(reading),
        };

        BenchmarkReport {
            benchmark_info: BenchmarkInfo {
                name: "saturate".to_string(),
                version: "0.1.0".to_string(),
                schema_version: SCHEMA_VERSION,
                started_at: started,
                finished_at: started + chrono::Duration::seconds(3),
                total_runs: 1,
                completed_runs: 1,
                total_duration_ms: 2010,
                abort: None,
            },
            system_info: SystemProfile {
                hostname: "bench-01".to_string(),
                cpu_model: "Test CPU".to_string(),
                core_count: 4,
                total_memory_bytes: 16 * 1024 * 1024 * 1024,
                os: "linux".to_string(),
                arch: "x86_64".to_string(),
            },
            configuration: snapshot(),
            aggregated_results: summarize_scores(&[RunScore {
                total_units: 48_000,
                overall_score: Some(95_856_000),
            }]),
            individual_runs: vec![run],
        }
    }

    #[test]
    fn test_round_trip_preserves_every_field() {
        let report = sample_report();
        let json = generate_json_report(&report).unwrap();
        let parsed = parse_json_report(&json).unwrap();
        assert_eq!(parsed, report);
        assert_eq!(parsed.individual_runs[0].largest_value, huge_value());
    }

    #[test]
    fn test_largest_value_is_a_string() {
        let json = generate_json_report(&sample_report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let largest = &value["individualRuns"][0]["largestValue"];
        assert!(largest.is_string());
        assert_eq!(largest.as_str().unwrap(), huge_value());
    }

    #[test]
    fn test_top_level_sections() {
        let json = generate_json_report(&sample_report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        for key in [
            "benchmarkInfo",
            "systemInfo",
            "configuration",
            "aggregatedResults",
            "individualRuns",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        let peak = &value["individualRuns"][0]["peakMemory"];
        for key in ["rss", "heap", "external", "buffers"] {
            assert!(peak.get(key).is_some(), "missing peakMemory.{key}");
        }
    }

    #[test]
    fn test_abort_reason_wire_form() {
        let mut report = sample_report();
        report.individual_runs.clear();
        report.aggregated_results = summarize_scores(&[]);
        report.benchmark_info.completed_runs = 0;
        report.benchmark_info.abort = Some(RunAbort {
            reason: AbortReason::RamLimitExceeded,
            run_number: 1,
            message: "resident memory 14.2 MB exceeded limit of 1 MB".to_string(),
            elapsed_ms: 4,
            memory: None,
        });

        let json = generate_json_report(&report).unwrap();
        assert!(json.contains("\"RAM_LIMIT_EXCEEDED\""));
        assert_eq!(parse_json_report(&json).unwrap(), report);
    }
}
