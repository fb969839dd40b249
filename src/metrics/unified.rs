//! Unified per-scanner metrics and the run summary.
//!
//! One reporting-ready record per scanner, assembled from the frozen
//! aggregate. Every reporter consumes this shape; none re-derives counts or
//! statuses on its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::EngineConfig;
use crate::metrics::severity::{count_severities, SeverityCount, Threshold, ThresholdSource};
use crate::metrics::status::{derive_status, ScannerStatus};
use crate::plugin::PluginKind;
use crate::results::{AggregatedResultSet, ScannerRunRecord};

/// Overall verdict for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    /// No actionable findings (and no errors configured to fail the run)
    Passed,
    /// Actionable findings present, or errors configured to fail the run
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "PASSED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Reporting-ready metrics for one scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerMetrics {
    /// Scanner these metrics belong to.
    pub scanner_name: String,
    /// Terminal status.
    pub status: ScannerStatus,
    /// Whether the status counts toward a passing run.
    pub passed: bool,
    /// Severity threshold the run used for this scanner.
    pub threshold: Threshold,
    /// Where that threshold came from.
    pub threshold_source: ThresholdSource,
    /// Severity-bucketed finding counts against the threshold.
    pub counts: SeverityCount,
    /// Wall-clock duration in seconds, when the scanner actually ran.
    pub duration_seconds: Option<f64>,
    /// Excluded by configuration.
    pub excluded: bool,
    /// Result of dependency validation.
    pub dependencies_satisfied: bool,
    /// Error message for errored invocations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Exit code of the underlying tool, when there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl ScannerMetrics {
    /// Assemble metrics from one finished record.
    ///
    /// Counts come from the single severity computation site using the
    /// threshold stamped on the record at dispatch time.
    pub fn from_record(record: &ScannerRunRecord) -> Self {
        let counts = count_severities(&record.findings, record.threshold);
        let status = derive_status(record, counts.actionable);

        Self {
            scanner_name: record.scanner_name.clone(),
            status,
            passed: status.is_passing(),
            threshold: record.threshold,
            threshold_source: record.threshold_source,
            counts,
            duration_seconds: record.duration_seconds(),
            excluded: record.excluded,
            dependencies_satisfied: record.dependencies_satisfied,
            error: record.error.clone(),
            exit_code: record.exit_code,
        }
    }

    /// Human-readable duration.
    pub fn formatted_duration(&self) -> String {
        format_duration(self.duration_seconds)
    }
}

/// The final summary for one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Project the run scanned.
    pub project_name: String,
    /// Run identity.
    pub run_id: Uuid,
    /// Overall verdict.
    pub status: RunStatus,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When metrics were assembled.
    pub finished_at: DateTime<Utc>,
    /// Wall time in seconds.
    pub duration_seconds: f64,
    /// Findings reported by scanners, suppressed included.
    pub total_findings: usize,
    /// Severity buckets summed across scanners.
    pub totals: SeverityCount,
    /// Scanners with status `PASSED`.
    pub passed: usize,
    /// Scanners with status `FAILED`.
    pub failed: usize,
    /// Scanners with status `MISSING`.
    pub missing: usize,
    /// Scanners with status `SKIPPED`.
    pub skipped: usize,
    /// Scanners with status `ERROR`.
    pub errored: usize,
    /// Per-scanner metrics in record order.
    pub scanners: Vec<ScannerMetrics>,
    #[serde(skip)]
    fail_on_findings: bool,
    #[serde(skip)]
    fail_on_scanner_errors: bool,
}

impl RunSummary {
    /// Assemble the summary from the frozen aggregate.
    pub fn compute(
        config: &EngineConfig,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        results: &AggregatedResultSet,
    ) -> Self {
        let mut scanners: Vec<ScannerMetrics> = results
            .records_of_kind(PluginKind::Scanner)
            .map(ScannerMetrics::from_record)
            .collect();
        // Records arrive in completion order; report in a stable one.
        scanners.sort_by(|a, b| a.scanner_name.cmp(&b.scanner_name));

        let mut totals = SeverityCount::default();
        for scanner in &scanners {
            totals.merge(&scanner.counts);
        }

        let count_of = |status: ScannerStatus| -> usize {
            scanners.iter().filter(|s| s.status == status).count()
        };
        let errored = count_of(ScannerStatus::Error);

        let status = if totals.actionable > 0 || (config.fail_on_scanner_errors && errored > 0) {
            RunStatus::Failed
        } else {
            RunStatus::Passed
        };

        let finished_at = Utc::now();
        let duration_seconds =
            (finished_at - started_at).num_milliseconds().max(0) as f64 / 1000.0;

        Self {
            project_name: config.project_name.clone(),
            run_id,
            status,
            started_at,
            finished_at,
            duration_seconds,
            total_findings: totals.total() + totals.suppressed,
            totals,
            passed: count_of(ScannerStatus::Passed),
            failed: count_of(ScannerStatus::Failed),
            missing: count_of(ScannerStatus::Missing),
            skipped: count_of(ScannerStatus::Skipped),
            errored,
            scanners,
            fail_on_findings: config.fail_on_findings,
            fail_on_scanner_errors: config.fail_on_scanner_errors,
        }
    }

    /// Metrics for one scanner by name.
    pub fn scanner(&self, name: &str) -> Option<&ScannerMetrics> {
        self.scanners.iter().find(|s| s.scanner_name == name)
    }

    /// Process exit code the embedder should surface.
    ///
    /// `2` when actionable findings exist and `fail_on_findings` is set,
    /// `1` when scanners errored and `fail_on_scanner_errors` is set,
    /// `0` otherwise. Skipped or missing scanners alone never fail a run.
    pub fn exit_code(&self) -> i32 {
        if self.totals.actionable > 0 && self.fail_on_findings {
            return 2;
        }
        if self.errored > 0 && self.fail_on_scanner_errors {
            return 1;
        }
        0
    }

    /// Human-readable wall time.
    pub fn formatted_duration(&self) -> String {
        format_duration(Some(self.duration_seconds))
    }
}

/// Render a duration in the report style.
///
/// `None` renders as `N/A`; sub-second spans as milliseconds; longer spans
/// in seconds, minutes or hours.
pub fn format_duration(seconds: Option<f64>) -> String {
    let Some(s) = seconds else {
        return "N/A".to_string();
    };
    if s < 0.001 {
        return "<1ms".to_string();
    }
    if s < 1.0 {
        return format!("{}ms", (s * 1000.0) as u64);
    }
    if s < 60.0 {
        if s.fract().abs() < 1e-9 {
            return format!("{s:.0}s");
        }
        return format!("{s:.1}s");
    }
    // Whole-second truncation above one minute, so 119.7s reads "1m 59s".
    let total_minutes = (s as u64) / 60;
    let secs = (s as u64) % 60;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else {
        format!("{total_minutes}m {secs}s")
    }
}
