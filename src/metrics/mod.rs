//! Severity evaluation, status derivation and unified run metrics.

mod severity;
mod status;
mod unified;

pub use severity::{
    count_severities, SeverityCount, SeverityEvaluator, Threshold, ThresholdSource,
};
pub use status::{derive_status, ScannerStatus};
pub use unified::{format_duration, RunStatus, RunSummary, ScannerMetrics};
