//! Score Summary
//!
//! Aggregates across the runs of one benchmark. Runs without a defined score
//! still contribute their calculations; an empty run set is a valid summary
//! with no score figures.

use serde::{Deserialize, Serialize};

/// What one run contributes to the summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunScore {
    /// Work units completed in the run
    pub total_units: u64,
    /// The run's overall score, if defined
    pub overall_score: Option<u64>,
}

/// Aggregate statistics over completed runs
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSummary {
    /// Runs that completed
    pub completed_runs: usize,
    /// Runs whose overall score was defined
    pub scored_runs: usize,
    /// Work units across all completed runs
    pub total_calculations: u64,
    /// Mean of defined scores, rounded
    pub average_score: Option<u64>,
    /// Highest defined score
    pub best_score: Option<u64>,
    /// Lowest defined score
    pub worst_score: Option<u64>,
    /// `best - worst`
    pub score_variance: Option<u64>,
}

/// Summarize completed runs
pub fn summarize_scores(runs: &[RunScore]) -> ScoreSummary {
    let total_calculations = runs.iter().map(|r| r.total_units).sum();
    let scores: Vec<u64> = runs.iter().filter_map(|r| r.overall_score).collect();

    let best_score = scores.iter().copied().max();
    let worst_score = scores.iter().copied().min();
    let average_score = if scores.is_empty() {
        None
    } else {
        let sum: u128 = scores.iter().map(|&s| s as u128).sum();
        Some((sum as f64 / scores.len() as f64).round() as u64)
    };
    let score_variance = best_score.zip(worst_score).map(|(best, worst)| best - worst);

    ScoreSummary {
        completed_runs: runs.len(),
        scored_runs: scores.len(),
        total_calculations,
        average_score,
        best_score,
        worst_score,
        score_variance,
    }
}
