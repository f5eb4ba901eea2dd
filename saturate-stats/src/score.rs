//! Run Metrics
//!
//! Turns the raw counters of one finished run into the derived figures that
//! make runs comparable:
//!
//! ```text
//! calculations_per_second = round(U / (elapsed_ms / 1000))
//! average_per_core        = floor(U / C)
//! core_efficiency         = see `efficiency`
//! memory_efficiency       = round(U / peak_rss_mb * 1000)
//! overall_score           = round(cps * core_efficiency/100 * memory_efficiency/1000)
//! ```
//!
//! The overall score needs all three factors; when one is missing the score
//! is `None` and a warning says why. A run with zero units never divides:
//! all metrics are zero and the run is flagged degraded.

use crate::efficiency::{CoreEfficiencyMode, core_efficiency};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Raw counters of one finished run
#[derive(Debug, Clone, Default)]
pub struct RunTotals {
    /// Work units completed across all workers
    pub total_units: u64,
    /// Monotonic time from start to finalization
    pub elapsed: Duration,
    /// Cores the run was sized for (clamped to at least 1)
    pub core_count: usize,
    /// Units per worker, indexed by worker id
    pub per_worker_units: Vec<u64>,
    /// Workers started for the run
    pub workers_spawned: usize,
    /// Workers still alive at the deadline
    pub active_workers: usize,
    /// Peak resident memory, if the sampler produced one
    pub peak_rss_bytes: Option<u64>,
}

/// Derived figures of merit for one run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedMetrics {
    /// Completed units per second of elapsed time
    pub calculations_per_second: u64,
    /// Completed units per core, rounded down
    pub average_per_core: u64,
    /// Work distribution across cores in percent
    pub core_efficiency: f64,
    /// Units per MB of peak resident memory, times 1000
    pub memory_efficiency: Option<u64>,
    /// Composite score; absent if any factor is missing
    pub overall_score: Option<u64>,
}

/// Metrics plus the flags that qualify them
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricsAssessment {
    /// The derived figures
    pub metrics: DerivedMetrics,
    /// Run is not representative (no units, or workers lost)
    pub degraded: bool,
    /// Human-readable reasons for `degraded` and for a missing score
    pub warnings: Vec<String>,
}

/// Derive metrics for a finished run
pub fn derive_metrics(totals: &RunTotals, mode: CoreEfficiencyMode) -> MetricsAssessment {
    let mut warnings = Vec::new();
    let mut degraded = false;

    if totals.active_workers < totals.workers_spawned {
        degraded = true;
        warnings.push(format!(
            "{} of {} workers failed during the run",
            totals.workers_spawned - totals.active_workers,
            totals.workers_spawned
        ));
    }

    let units = totals.total_units;
    if units == 0 {
        warnings.push("No work units completed; metrics are zero".to_string());
        return MetricsAssessment {
            metrics: DerivedMetrics {
                overall_score: Some(0),
                memory_efficiency: Some(0),
                ..DerivedMetrics::default()
            },
            degraded: true,
            warnings,
        };
    }

    let cores = totals.core_count.max(1) as u64;
    let average_per_core = units / cores;

    let elapsed_secs = totals.elapsed.as_millis() as f64 / 1000.0;
    let calculations_per_second = if elapsed_secs > 0.0 {
        Some((units as f64 / elapsed_secs).round() as u64)
    } else {
        warnings.push("Elapsed time below 1ms; throughput undefined".to_string());
        None
    };

    let core_efficiency = core_efficiency(
        mode,
        &totals.per_worker_units,
        totals.workers_spawned,
        totals.active_workers,
    );

    let memory_efficiency = match totals.peak_rss_bytes {
        Some(peak) if peak > 0 => {
            let peak_mb = peak as f64 / BYTES_PER_MB;
            Some((units as f64 / peak_mb * 1000.0).round() as u64)
        }
        _ => {
            warnings.push("Peak memory unavailable; memory efficiency undefined".to_string());
            None
        }
    };

    let overall_score = match (calculations_per_second, memory_efficiency) {
        (Some(cps), Some(me)) => {
            Some((cps as f64 * (core_efficiency / 100.0) * (me as f64 / 1000.0)).round() as u64)
        }
        _ => {
            warnings.push("Overall score undefined: a contributing metric is missing".to_string());
            None
        }
    };

    MetricsAssessment {
        metrics: DerivedMetrics {
            calculations_per_second: calculations_per_second.unwrap_or(0),
            average_per_core,
            core_efficiency,
            memory_efficiency,
            overall_score,
        },
        degraded,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn totals(units: u64, cores: usize) -> RunTotals {
        let per_worker = vec![units / cores as u64; cores];
        RunTotals {
            total_units: per_worker.iter().sum(),
            elapsed: Duration::from_millis(2000),
            core_count: cores,
            per_worker_units: per_worker,
            workers_spawned: cores,
            active_workers: cores,
            peak_rss_bytes: Some(8 * 1024 * 1024),
        }
    }

    #[test]
    fn test_metrics_formulas() {
        let assessment = derive_metrics(&totals(4000, 4), CoreEfficiencyMode::Balanced);
        let m = &assessment.metrics;
        assert_eq!(m.calculations_per_second, 2000);
        assert_eq!(m.average_per_core, 1000);
        assert!((m.core_efficiency - 100.0).abs() < 1e-9);
        // 4000 units / 8 MB * 1000
        assert_eq!(m.memory_efficiency, Some(500_000));
        // 2000 * 1.0 * 500
        assert_eq!(m.overall_score, Some(1_000_000));
        assert!(!assessment.degraded);
        assert!(assessment.warnings.is_empty());
    }

    #[test]
    fn test_average_per_core_floors() {
        for (units, cores) in [(10u64, 3usize), (7, 7), (1, 4), (1_000_003, 8)] {
            let t = RunTotals {
                total_units: units,
                per_worker_units: vec![units],
                ..totals(0, cores)
            };
            let m = derive_metrics(&t, CoreEfficiencyMode::Balanced).metrics;
            assert_eq!(m.average_per_core, units / cores as u64);
        }
    }

    #[test]
    fn test_zero_units_is_degraded_not_a_division() {
        let t = RunTotals {
            total_units: 0,
            per_worker_units: vec![0; 4],
            ..totals(0, 4)
        };
        let assessment = derive_metrics(&t, CoreEfficiencyMode::Balanced);
        assert!(assessment.degraded);
        assert_eq!(assessment.metrics.overall_score, Some(0));
        assert_eq!(assessment.metrics.calculations_per_second, 0);
        assert_eq!(assessment.metrics.average_per_core, 0);
    }

    #[test]
    fn test_missing_peak_leaves_score_undefined() {
        let t = RunTotals {
            peak_rss_bytes: None,
            ..totals(4000, 4)
        };
        let assessment = derive_metrics(&t, CoreEfficiencyMode::Balanced);
        assert_eq!(assessment.metrics.memory_efficiency, None);
        assert_eq!(assessment.metrics.overall_score, None);
        assert!(
            assessment
                .warnings
                .iter()
                .any(|w| w.contains("Overall score undefined"))
        );
    }

    #[test]
    fn test_lost_workers_degrade() {
        let t = RunTotals {
            total_units: 900,
            per_worker_units: vec![300, 300, 300, 0],
            active_workers: 3,
            ..totals(0, 4)
        };
        let assessment = derive_metrics(&t, CoreEfficiencyMode::Balanced);
        assert!(assessment.degraded);
        assert!(assessment.metrics.core_efficiency < 100.0);
        assert!(assessment.warnings[0].contains("1 of 4 workers failed"));
        assert!(assessment.metrics.overall_score.is_some());
    }
}
