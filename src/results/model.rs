//! Normalized finding and run-record model.
//!
//! Every scanner hands back findings in this shape regardless of the tool
//! that produced them. Records track one plugin invocation each; the frozen
//! [`AggregatedResultSet`] is what reporters consume.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::{Threshold, ThresholdSource};
use crate::plugin::PluginKind;

/// Severity of a normalized finding, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Informational observation
    Info,
    /// Low severity
    Low,
    /// Medium severity
    Medium,
    /// High severity
    High,
    /// Critical severity
    Critical,
}

impl Severity {
    /// Map a SARIF `level` value onto a severity.
    ///
    /// Unknown or absent levels map to [`Severity::Info`].
    pub fn from_sarif_level(level: &str) -> Self {
        match level.to_ascii_lowercase().as_str() {
            "error" => Self::Critical,
            "warning" => Self::Medium,
            "note" => Self::Low,
            _ => Self::Info,
        }
    }

    /// Upper-case name as used in configuration and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of suppression attached to a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SuppressionKind {
    /// Suppressed by an external rule (configuration or ignore file).
    External,
    /// Suppressed by an annotation in the scanned source itself.
    InSource,
}

/// An explicit, justified exclusion of one finding from actionable status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suppression {
    /// How the suppression was applied.
    pub kind: SuppressionKind,
    /// Why the finding is suppressed.
    pub justification: Option<String>,
}

impl Suppression {
    /// Suppression applied by an external rule.
    pub fn external(justification: impl Into<Option<String>>) -> Self {
        Self { kind: SuppressionKind::External, justification: justification.into() }
    }
}

/// One normalized security observation.
///
/// Immutable once merged into the aggregate; scanners build findings with the
/// `with_*` helpers and hand ownership to the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Stable rule identifier (e.g. `B603`, `CKV_AWS_20`).
    pub rule_id: String,
    /// Human-readable message.
    pub message: String,
    /// Severity level.
    pub severity: Severity,
    /// Originating scanner. May be empty for findings ingested from external
    /// reports; the aggregator resolves provenance before merging.
    #[serde(default)]
    pub scanner_name: String,
    /// File the finding points at, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    /// First line of the affected range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_start: Option<u32>,
    /// Last line of the affected range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_end: Option<u32>,
    /// Free-form tags (`tool_name::bandit`, `cwe-78`, ...).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Free-form property bag (CWE/CVE ids, scanner details, raw extras).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// Suppression record, when the finding is suppressed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppression: Option<Suppression>,
}

impl Finding {
    /// Create a new finding.
    pub fn new(
        rule_id: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            message: message.into(),
            severity,
            scanner_name: String::new(),
            file_path: None,
            line_start: None,
            line_end: None,
            tags: Vec::new(),
            properties: serde_json::Map::new(),
            suppression: None,
        }
    }

    /// Set the originating scanner.
    #[must_use]
    pub fn with_scanner(mut self, scanner: impl Into<String>) -> Self {
        self.scanner_name = scanner.into();
        self
    }

    /// Set the file location and optional line range.
    #[must_use]
    pub fn with_location(
        mut self,
        path: impl Into<PathBuf>,
        line_start: Option<u32>,
        line_end: Option<u32>,
    ) -> Self {
        self.file_path = Some(path.into());
        self.line_start = line_start;
        self.line_end = line_end;
        self
    }

    /// Add a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Add a property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Attach a suppression record.
    #[must_use]
    pub fn with_suppression(mut self, suppression: Suppression) -> Self {
        self.suppression = Some(suppression);
        self
    }

    /// Whether the finding carries a suppression record.
    pub fn is_suppressed(&self) -> bool {
        self.suppression.is_some()
    }
}

/// Lifecycle state of a single plugin invocation.
///
/// `Pending -> Validating -> {Skipped | DependencyMissing} | Running ->
/// {Completed | Failed | TimedOut}`. `Running` is only entered after the
/// resource governor admits the invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvocationState {
    /// Waiting to be dispatched
    Pending,
    /// Dependency validation in progress
    Validating,
    /// Never ran: excluded by configuration or no usable target
    Skipped,
    /// Never ran: the underlying tool is unavailable
    DependencyMissing,
    /// Admitted and executing
    Running,
    /// Ran to completion
    Completed,
    /// Execution failed
    Failed,
    /// Cancelled after exceeding its time budget
    TimedOut,
}

impl InvocationState {
    /// Whether the invocation has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Skipped | Self::DependencyMissing | Self::Completed | Self::Failed | Self::TimedOut
        )
    }

    /// Whether the invocation ran and produced a usable result.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for InvocationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Validating => "VALIDATING",
            Self::Skipped => "SKIPPED",
            Self::DependencyMissing => "DEPENDENCY_MISSING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::TimedOut => "TIMED_OUT",
        };
        write!(f, "{s}")
    }
}

/// Per-plugin lifecycle state for one invocation.
///
/// Created when the pipeline begins dispatching a plugin and owned exclusively
/// by that dispatch task until it is merged into the aggregate. Never mutated
/// concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerRunRecord {
    /// Logical plugin name.
    pub scanner_name: String,
    /// What kind of plugin produced this record.
    pub kind: PluginKind,
    /// Excluded by configuration before dispatch.
    pub excluded: bool,
    /// Result of dependency validation.
    pub dependencies_satisfied: bool,
    /// Current lifecycle state.
    pub state: InvocationState,
    /// When execution started. `None` when the plugin never ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When execution finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Exit code reported by the underlying tool, when there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Error message for failed or timed-out invocations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Findings this plugin contributed.
    #[serde(default)]
    pub findings: Vec<Finding>,
    /// Severity threshold the run used for this scanner.
    pub threshold: Threshold,
    /// Where that threshold came from.
    pub threshold_source: ThresholdSource,
}

impl ScannerRunRecord {
    /// Create a pending record for a plugin about to be dispatched.
    pub fn new(scanner_name: impl Into<String>, kind: PluginKind) -> Self {
        Self {
            scanner_name: scanner_name.into(),
            kind,
            excluded: false,
            dependencies_satisfied: true,
            state: InvocationState::Pending,
            started_at: None,
            finished_at: None,
            exit_code: None,
            error: None,
            findings: Vec::new(),
            threshold: Threshold::default(),
            threshold_source: ThresholdSource::Global,
        }
    }

    /// Create a record for a plugin excluded by configuration.
    pub fn excluded(scanner_name: impl Into<String>, kind: PluginKind) -> Self {
        let mut record = Self::new(scanner_name, kind);
        record.excluded = true;
        record.state = InvocationState::Skipped;
        record
    }

    /// Stamp the resolved severity threshold onto the record.
    #[must_use]
    pub fn with_threshold(mut self, threshold: Threshold, source: ThresholdSource) -> Self {
        self.threshold = threshold;
        self.threshold_source = source;
        self
    }

    /// Move into dependency validation.
    pub fn mark_validating(&mut self) {
        self.state = InvocationState::Validating;
    }

    /// Dependency validation failed; the plugin will not run.
    pub fn dependency_missing(&mut self) {
        self.dependencies_satisfied = false;
        self.state = InvocationState::DependencyMissing;
    }

    /// Admission granted; execution starts now.
    pub fn mark_running(&mut self) {
        self.state = InvocationState::Running;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    /// Execution finished successfully.
    pub fn complete(&mut self, exit_code: Option<i32>) {
        self.state = InvocationState::Completed;
        self.exit_code = exit_code;
        self.finished_at = Some(Utc::now());
    }

    /// Execution failed; the error is captured, never propagated.
    pub fn fail(&mut self, message: impl Into<String>, exit_code: Option<i32>) {
        self.state = InvocationState::Failed;
        self.error = Some(message.into());
        self.exit_code = exit_code;
        self.finished_at = Some(Utc::now());
    }

    /// Execution exceeded its time budget and was cancelled.
    pub fn time_out(&mut self, seconds: u64) {
        self.state = InvocationState::TimedOut;
        self.error = Some(format!("timed out after {seconds}s"));
        self.finished_at = Some(Utc::now());
    }

    /// Execution was force-cancelled during shutdown.
    pub fn force_cancel(&mut self) {
        self.state = InvocationState::TimedOut;
        self.error = Some("force-cancelled during shutdown".to_string());
        self.finished_at = Some(Utc::now());
    }

    /// The plugin never ran for this invocation (excluded or no usable target).
    pub fn skip(&mut self) {
        self.state = InvocationState::Skipped;
        if self.started_at.is_some() {
            self.finished_at = Some(Utc::now());
        }
    }

    /// Append findings produced by this plugin, preserving their order.
    pub fn push_findings(&mut self, findings: Vec<Finding>) {
        self.findings.extend(findings);
    }

    /// Number of findings this record contributed.
    pub fn finding_count(&self) -> usize {
        self.findings.len()
    }

    /// Wall-clock duration, when the plugin actually ran.
    pub fn duration(&self) -> Option<Duration> {
        let (start, end) = (self.started_at?, self.finished_at?);
        (end - start).to_std().ok()
    }

    /// Duration in fractional seconds, when the plugin actually ran.
    pub fn duration_seconds(&self) -> Option<f64> {
        self.duration().map(|d| d.as_secs_f64())
    }

    /// Whether execution itself errored (as opposed to finding issues).
    pub fn errored(&self) -> bool {
        matches!(self.state, InvocationState::Failed | InvocationState::TimedOut)
            || self.error.is_some()
    }
}

/// The global merge of all run records plus the unified finding list.
///
/// Frozen once the report phase begins; reporters read, never write.
///
/// Invariant: the summed finding counts across records equal the length of
/// the merged list. [`AggregatedResultSet::verify`] checks it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregatedResultSet {
    /// Every finding from every scanner, appended in completion order.
    pub findings: Vec<Finding>,
    /// One record per dispatched plugin, in registry order.
    pub records: Vec<ScannerRunRecord>,
}

impl AggregatedResultSet {
    /// Total number of merged findings.
    pub fn finding_count(&self) -> usize {
        self.findings.len()
    }

    /// Look up the record for one scanner.
    pub fn record(&self, scanner_name: &str) -> Option<&ScannerRunRecord> {
        self.records.iter().find(|r| r.scanner_name == scanner_name)
    }

    /// Records belonging to one plugin kind.
    pub fn records_of_kind(&self, kind: PluginKind) -> impl Iterator<Item = &ScannerRunRecord> {
        self.records.iter().filter(move |r| r.kind == kind)
    }

    /// Check the count-reconciliation invariant.
    pub fn verify(&self) -> Result<(), crate::core::EngineError> {
        let per_record: usize = self.records.iter().map(ScannerRunRecord::finding_count).sum();
        if per_record == self.findings.len() {
            Ok(())
        } else {
            Err(crate::core::EngineError::InvariantViolation(format!(
                "record finding counts sum to {} but the merged list holds {}",
                per_record,
                self.findings.len()
            )))
        }
    }
}
