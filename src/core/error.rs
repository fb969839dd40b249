//! Engine error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while driving a scan run.
///
/// Only [`EngineError::Config`] is fatal: it aborts the run before any phase
/// starts. Every other variant is captured into the affected scanner's run
/// record so that one misbehaving plugin never denies results for the rest.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid or conflicting configuration. Fatal.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A plugin's underlying tool is not installed or not runnable.
    #[error("Scanner '{scanner}' has unsatisfied dependencies")]
    DependencyMissing { scanner: String },

    /// The scan target does not exist.
    #[error("Target path does not exist: {0}")]
    TargetMissing(PathBuf),

    /// The scan target exists but contains nothing to scan.
    #[error("Target path is empty: {0}")]
    TargetEmpty(PathBuf),

    /// A plugin's `run` failed (process crash, tool error, bad output).
    #[error("Plugin '{scanner}' execution failed: {message}")]
    Execution { scanner: String, message: String, exit_code: Option<i32> },

    /// A plugin exceeded its allotted time.
    #[error("Plugin '{scanner}' timed out after {seconds}s")]
    Timeout { scanner: String, seconds: u64 },

    /// Aggregated finding counts no longer reconcile with the merged list.
    ///
    /// Indicates a merge bug, not a user condition. Asserted in debug builds,
    /// logged and tolerated in release builds.
    #[error("Aggregation invariant violated: {0}")]
    InvariantViolation(String),

    /// The governor refused admission because shutdown is in progress.
    #[error("Engine is shutting down, no new work admitted")]
    Shutdown,

    /// IO error while probing targets or loading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether this error aborts the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Config(_))
    }

    /// Whether this error means "skip the target, keep going".
    pub fn is_skip(&self) -> bool {
        matches!(self, EngineError::TargetMissing(_) | EngineError::TargetEmpty(_))
    }

    /// Convenience constructor for execution failures.
    pub fn execution(scanner: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Execution {
            scanner: scanner.into(),
            message: message.into(),
            exit_code: None,
        }
    }
}
