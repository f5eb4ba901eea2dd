//! Core Efficiency
//!
//! How evenly a run's work landed on the cores it spawned workers for,
//! as a percentage where 100 is a perfectly even split.

use serde::{Deserialize, Serialize};

/// How core efficiency is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CoreEfficiencyMode {
    /// Share of all units that fall within each worker's fair share
    /// (`total / spawned`). Dead or slow workers leave their share unfilled.
    #[default]
    Balanced,
    /// Fraction of spawned workers still alive at the deadline
    ActiveWorkers,
}

impl std::fmt::Display for CoreEfficiencyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreEfficiencyMode::Balanced => f.write_str("balanced"),
            CoreEfficiencyMode::ActiveWorkers => f.write_str("active-workers"),
        }
    }
}

impl std::str::FromStr for CoreEfficiencyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "balanced" => Ok(CoreEfficiencyMode::Balanced),
            "active-workers" => Ok(CoreEfficiencyMode::ActiveWorkers),
            other => Err(format!(
                "unknown core efficiency mode '{other}' (expected balanced or active-workers)"
            )),
        }
    }
}

/// Core efficiency in percent (0–100).
///
/// `per_worker_units` is indexed by worker id; workers that never reported
/// may be missing from the tail and count as zero.
pub fn core_efficiency(
    mode: CoreEfficiencyMode,
    per_worker_units: &[u64],
    workers_spawned: usize,
    active_workers: usize,
) -> f64 {
    let spawned = workers_spawned.max(per_worker_units.len());
    if spawned == 0 {
        return 0.0;
    }

    match mode {
        CoreEfficiencyMode::Balanced => {
            let total: u64 = per_worker_units.iter().sum();
            if total == 0 {
                return 0.0;
            }
            let fair_share = total as f64 / spawned as f64;
            let within_share: f64 = per_worker_units
                .iter()
                .map(|&units| (units as f64).min(fair_share))
                .sum();
            (within_share / total as f64 * 100.0).clamp(0.0, 100.0)
        }
        CoreEfficiencyMode::ActiveWorkers => {
            (active_workers.min(spawned) as f64 / spawned as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_split_is_full_efficiency() {
        let eff = core_efficiency(CoreEfficiencyMode::Balanced, &[250, 250, 250, 250], 4, 4);
        assert!((eff - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_dead_worker_degrades_balanced() {
        // Worker 3 died early: fair share is 200, workers 0..3 each exceed it
        let eff = core_efficiency(CoreEfficiencyMode::Balanced, &[260, 260, 260, 20], 4, 3);
        // (200 * 3 + 20) / 800
        assert!((eff - 77.5).abs() < 1e-9);
    }

    #[test]
    fn test_missing_tail_counts_as_zero() {
        let eff = core_efficiency(CoreEfficiencyMode::Balanced, &[100, 100], 4, 2);
        assert!((eff - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_units() {
        assert_eq!(core_efficiency(CoreEfficiencyMode::Balanced, &[0, 0], 2, 2), 0.0);
        assert_eq!(core_efficiency(CoreEfficiencyMode::Balanced, &[], 0, 0), 0.0);
    }

    #[test]
    fn test_active_workers_mode() {
        let eff = core_efficiency(CoreEfficiencyMode::ActiveWorkers, &[10, 10, 10, 0], 4, 3);
        assert!((eff - 75.0).abs() < 1e-9);
        let full = core_efficiency(CoreEfficiencyMode::ActiveWorkers, &[1, 900], 2, 2);
        assert!((full - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_mode_parse_and_display() {
        for mode in [CoreEfficiencyMode::Balanced, CoreEfficiencyMode::ActiveWorkers] {
            assert_eq!(mode.to_string().parse::<CoreEfficiencyMode>().unwrap(), mode);
        }
        assert!("even".parse::<CoreEfficiencyMode>().is_err());
    }
}
