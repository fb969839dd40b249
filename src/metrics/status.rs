//! Scanner terminal status derivation.
//!
//! Evaluated once the scan phase settles, from the lifecycle record plus the
//! actionable count. The precedence is fixed: exclusion and missing
//! dependencies are checked before findings, so a scanner that never ran
//! never reports `FAILED`.

use serde::{Deserialize, Serialize};

use crate::results::{InvocationState, ScannerRunRecord};

/// Terminal status of one scanner for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScannerStatus {
    /// Ran and produced no actionable findings
    Passed,
    /// Ran and produced at least one actionable finding
    Failed,
    /// Dependencies unsatisfied; never ran
    Missing,
    /// Excluded by configuration or skipped for lack of a usable target
    Skipped,
    /// Execution itself errored or timed out
    Error,
}

impl ScannerStatus {
    /// Upper-case name as rendered in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
            Self::Missing => "MISSING",
            Self::Skipped => "SKIPPED",
            Self::Error => "ERROR",
        }
    }

    /// Whether this status counts toward the run's passed tally.
    ///
    /// Skipped and missing scanners did not find anything wrong; only
    /// failures and execution errors count against the run.
    pub fn is_passing(&self) -> bool {
        matches!(self, Self::Passed | Self::Skipped | Self::Missing)
    }
}

impl std::fmt::Display for ScannerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Derive the terminal status for one scanner.
///
/// `actionable` comes from the severity evaluator; it is only consulted once
/// exclusion, dependency and execution checks have all passed.
pub fn derive_status(record: &ScannerRunRecord, actionable: usize) -> ScannerStatus {
    if record.excluded {
        return ScannerStatus::Skipped;
    }
    if !record.dependencies_satisfied {
        return ScannerStatus::Missing;
    }
    if record.errored() {
        return ScannerStatus::Error;
    }
    if record.state == InvocationState::Skipped {
        return ScannerStatus::Skipped;
    }
    if actionable > 0 {
        return ScannerStatus::Failed;
    }
    ScannerStatus::Passed
}
