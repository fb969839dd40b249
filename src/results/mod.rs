//! Findings, run records and the aggregated result set.

mod aggregator;
mod model;

pub use aggregator::ResultsAggregator;
pub use model::{
    AggregatedResultSet, Finding, InvocationState, ScannerRunRecord, Severity, Suppression,
    SuppressionKind,
};
