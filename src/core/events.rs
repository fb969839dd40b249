//! Run progress events.
//!
//! The pipeline reports progress through an [`EventSink`] so embedders can
//! drive progress bars or live dashboards without polling. The default
//! [`TracingSink`] forwards everything to `tracing`.

use std::time::Duration;

use uuid::Uuid;

use crate::metrics::RunStatus;
use crate::plugin::PluginKind;

/// Progress event emitted while a run executes.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// A phase is about to dispatch its plugins
    PhaseStarted {
        /// Which phase
        phase: PluginKind,
        /// Plugins enabled for the phase
        plugin_count: usize,
    },
    /// All plugins of a phase reached a terminal state
    PhaseCompleted {
        /// Which phase
        phase: PluginKind,
        /// Wall time the phase took
        duration: Duration,
    },
    /// One scanner reached a terminal state during the scan phase
    ScannerCompleted {
        /// Scanner that finished
        scanner: String,
        /// Scanners finished so far, this one included
        completed: usize,
        /// Scanners enabled for the phase
        total: usize,
        /// Scanners still running or queued
        remaining: usize,
        /// Names of the scanners still outstanding
        remaining_scanners: Vec<String>,
        /// Human-readable progress line
        message: String,
    },
    /// The run finished and results are frozen
    RunCompleted {
        /// Run this event belongs to
        run_id: Uuid,
        /// Overall verdict of the run
        status: RunStatus,
        /// Findings aggregated across all scanners
        total_findings: usize,
        /// Wall time for the whole run
        duration: Duration,
    },
}

impl ScanEvent {
    /// Build the scanner completion event, message included.
    pub fn scanner_completed(
        scanner: impl Into<String>,
        completed: usize,
        total: usize,
        remaining_scanners: Vec<String>,
    ) -> Self {
        let scanner = scanner.into();
        let remaining = remaining_scanners.len();
        let message = if remaining == 0 {
            format!("Scan complete ({scanner}): {completed}/{total} scanners finished")
        } else {
            format!(
                "Scan progress ({scanner}): {completed}/{total} finished, {remaining} remaining: {}",
                remaining_scanners.join(", ")
            )
        };
        Self::ScannerCompleted { scanner, completed, total, remaining, remaining_scanners, message }
    }
}

/// Receives progress events from the pipeline.
///
/// Implementations must be cheap and non-blocking; the pipeline emits from
/// its dispatch paths.
pub trait EventSink: Send + Sync {
    /// Handle one event.
    fn emit(&self, event: &ScanEvent);
}

/// Default sink that forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &ScanEvent) {
        match event {
            ScanEvent::PhaseStarted { phase, plugin_count } => {
                tracing::info!(phase = %phase, plugins = plugin_count, "Phase started");
            }
            ScanEvent::PhaseCompleted { phase, duration } => {
                tracing::info!(phase = %phase, duration_ms = duration.as_millis() as u64, "Phase completed");
            }
            ScanEvent::ScannerCompleted { scanner, completed, total, remaining, message, .. } => {
                tracing::info!(
                    scanner = %scanner,
                    completed = completed,
                    total = total,
                    remaining = remaining,
                    "{message}"
                );
            }
            ScanEvent::RunCompleted { run_id, status, total_findings, duration } => {
                tracing::info!(
                    run_id = %run_id,
                    status = %status,
                    findings = total_findings,
                    duration_ms = duration.as_millis() as u64,
                    "Run completed"
                );
            }
        }
    }
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &ScanEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scanner_completed_message_with_remaining() {
        let event = ScanEvent::scanner_completed(
            "bandit",
            1,
            3,
            vec!["semgrep".to_string(), "grype".to_string()],
        );
        let ScanEvent::ScannerCompleted { remaining, message, .. } = &event else {
            panic!("wrong variant");
        };
        assert_eq!(*remaining, 2);
        assert!(message.contains("1/3"));
        assert!(message.contains("semgrep, grype"));
    }

    #[test]
    fn test_scanner_completed_message_when_last() {
        let event = ScanEvent::scanner_completed("grype", 3, 3, Vec::new());
        let ScanEvent::ScannerCompleted { remaining, message, .. } = &event else {
            panic!("wrong variant");
        };
        assert_eq!(*remaining, 0);
        assert!(message.contains("Scan complete"));
        assert!(message.contains("3/3"));
    }
}
