#![warn(missing_docs)]
//! Saturate Scoring
//!
//! Pure arithmetic over the counters a run produces:
//! - Per-run derived metrics (throughput, per-core average, efficiencies)
//! - The composite overall score and when it is undefined
//! - Aggregate score statistics across runs

mod efficiency;
mod score;
mod summary;

pub use efficiency::{CoreEfficiencyMode, core_efficiency};
pub use score::{DerivedMetrics, MetricsAssessment, RunTotals, derive_metrics};
pub use summary::{RunScore, ScoreSummary, summarize_scores};
