//! Metrics Integration Tests
//!
//! Exercises severity counting, threshold resolution and the unified summary
//! against hand-built records, with snapshot coverage of the reporting shape.

use chrono::Utc;
use uuid::Uuid;

use ashrun::core::EngineConfig;
use ashrun::metrics::{
    count_severities, RunStatus, RunSummary, ScannerMetrics, ScannerStatus, SeverityEvaluator,
    Threshold, ThresholdSource,
};
use ashrun::plugin::PluginKind;
use ashrun::results::{
    AggregatedResultSet, Finding, InvocationState, ScannerRunRecord, Severity, Suppression,
};

fn bandit_record() -> ScannerRunRecord {
    let mut record = ScannerRunRecord::new("bandit", PluginKind::Scanner)
        .with_threshold(Threshold::Medium, ThresholdSource::Global);
    record.push_findings(vec![
        Finding::new("B602", Severity::High, "subprocess call with shell=True")
            .with_scanner("bandit")
            .with_location("app/main.py", Some(12), Some(14)),
        Finding::new("B101", Severity::Low, "use of assert detected")
            .with_scanner("bandit")
            .with_location("app/util.py", Some(3), None),
        Finding::new("B603", Severity::Medium, "subprocess without shell equals true")
            .with_scanner("bandit")
            .with_location("app/main.py", Some(40), None)
            .with_suppression(Suppression::external(Some("vetted invocation".to_string()))),
    ]);
    record.state = InvocationState::Completed;
    record.exit_code = Some(1);
    record
}

// ============================================================================
// Severity counting
// ============================================================================

#[test]
fn test_severity_count_snapshot() {
    let findings = vec![
        Finding::new("R1", Severity::Critical, "critical"),
        Finding::new("R2", Severity::High, "high"),
        Finding::new("R3", Severity::Medium, "medium"),
        Finding::new("R4", Severity::Info, "info"),
        Finding::new("R5", Severity::Medium, "suppressed medium")
            .with_suppression(Suppression::external(None)),
    ];

    let counts = count_severities(&findings, Threshold::High);
    insta::assert_yaml_snapshot!(counts, @r###"
    ---
    critical: 1
    high: 1
    medium: 1
    low: 0
    info: 1
    suppressed: 1
    actionable: 2
    "###);
}

#[test]
fn test_scanner_metrics_snapshot() {
    let metrics = ScannerMetrics::from_record(&bandit_record());

    insta::assert_yaml_snapshot!(metrics, @r###"
    ---
    scanner_name: bandit
    status: FAILED
    passed: false
    threshold: MEDIUM
    threshold_source: global
    counts:
      critical: 0
      high: 1
      medium: 0
      low: 1
      info: 0
      suppressed: 1
      actionable: 1
    duration_seconds: ~
    excluded: false
    dependencies_satisfied: true
    exit_code: 1
    "###);
}

// ============================================================================
// Threshold resolution from configuration
// ============================================================================

#[test]
fn test_threshold_resolution_from_config() {
    let yaml = r"
project_name: demo
global_settings:
  severity_threshold: MEDIUM
plugins:
  bandit:
    severity_threshold: LOW
";
    let config = EngineConfig::from_yaml_str(yaml).unwrap();
    let evaluator = SeverityEvaluator::from_config(&config);

    assert_eq!(evaluator.resolve_threshold("bandit"), (Threshold::Low, ThresholdSource::Config));
    assert_eq!(evaluator.resolve_threshold("semgrep"), (Threshold::Medium, ThresholdSource::Global));
}

// ============================================================================
// Unified summary
// ============================================================================

#[test]
fn test_summary_rolls_up_mixed_statuses() {
    let bandit = bandit_record();

    let semgrep = ScannerRunRecord::excluded("semgrep", PluginKind::Scanner)
        .with_threshold(Threshold::Medium, ThresholdSource::Global);

    let mut grype = ScannerRunRecord::new("grype", PluginKind::Scanner)
        .with_threshold(Threshold::Medium, ThresholdSource::Global);
    grype.dependency_missing();

    let mut trivy = ScannerRunRecord::new("trivy", PluginKind::Scanner)
        .with_threshold(Threshold::Medium, ThresholdSource::Global);
    trivy.fail("trivy binary not found", Some(127));

    let findings = bandit.findings.clone();
    let results =
        AggregatedResultSet { findings, records: vec![bandit, semgrep, grype, trivy] };
    assert!(results.verify().is_ok());

    let config = EngineConfig::default();
    let started_at = Utc::now() - chrono::Duration::seconds(5);
    let summary = RunSummary::compute(&config, Uuid::new_v4(), started_at, &results);

    assert_eq!(summary.scanners.len(), 4);
    assert_eq!(summary.passed, 0);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.missing, 1);
    assert_eq!(summary.errored, 1);

    assert_eq!(summary.totals.high, 1);
    assert_eq!(summary.totals.low, 1);
    assert_eq!(summary.totals.suppressed, 1);
    assert_eq!(summary.totals.actionable, 1);
    assert_eq!(summary.total_findings, 3);

    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.exit_code(), 2);
    assert!(summary.duration_seconds >= 4.0);

    assert_eq!(summary.scanner("trivy").unwrap().status, ScannerStatus::Error);
    assert_eq!(summary.scanner("grype").unwrap().status, ScannerStatus::Missing);
}

#[test]
fn test_summary_serializes_for_reporters() {
    let results = AggregatedResultSet { findings: Vec::new(), records: vec![bandit_record()] };
    let summary =
        RunSummary::compute(&EngineConfig::default(), Uuid::new_v4(), Utc::now(), &results);

    // Records that disagree with the findings list are a verify() error, not
    // a serialization one; reporters still get a well-formed document.
    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["project_name"], "ash-scan");
    assert!(json["run_id"].is_string(), "run id must serialize as a string");
    assert_eq!(json["status"], "FAILED");
    assert_eq!(json["scanners"][0]["scanner_name"], "bandit");
    assert_eq!(json["scanners"][0]["passed"], false);
    assert_eq!(json["scanners"][0]["counts"]["actionable"], 1);
    assert!(json.get("fail_on_findings").is_none());
}
