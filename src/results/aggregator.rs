//! Concurrent results aggregation.
//!
//! Dispatch tasks merge their finished [`ScannerRunRecord`]s here. The
//! aggregate is append-only while the run executes and is frozen before the
//! report phase; reporters only ever see the frozen
//! [`AggregatedResultSet`].

use parking_lot::Mutex;

use crate::core::{EngineError, EngineResult};
use crate::results::model::{AggregatedResultSet, Finding, ScannerRunRecord};

/// Scanner name attributed to findings whose producer cannot be resolved.
const FALLBACK_SCANNER: &str = "ash";

#[derive(Default)]
struct AggregateState {
    findings: Vec<Finding>,
    records: Vec<ScannerRunRecord>,
    frozen: bool,
}

/// Append-only merge point for all per-plugin results of one run.
#[derive(Default)]
pub struct ResultsAggregator {
    state: Mutex<AggregateState>,
}

impl std::fmt::Debug for ResultsAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ResultsAggregator")
            .field("findings", &state.findings.len())
            .field("records", &state.records.len())
            .field("frozen", &state.frozen)
            .finish()
    }
}

impl ResultsAggregator {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one finished record into the aggregate.
    ///
    /// The dispatch task owns the record until this call; each dispatched
    /// plugin is merged exactly once. Findings without a scanner name get
    /// one resolved from their provenance before landing in the merged
    /// list.
    pub fn merge(&self, mut record: ScannerRunRecord) -> EngineResult<()> {
        resolve_provenance(&mut record.findings);

        let mut state = self.state.lock();
        if state.frozen {
            return Err(EngineError::InvariantViolation(format!(
                "record for '{}' merged after the aggregate was frozen",
                record.scanner_name
            )));
        }

        state.findings.extend(record.findings.iter().cloned());
        state.records.push(record);

        let per_record: usize = state.records.iter().map(ScannerRunRecord::finding_count).sum();
        if per_record != state.findings.len() {
            tracing::error!(
                record_total = per_record,
                merged_total = state.findings.len(),
                "Aggregate finding counts diverged"
            );
            debug_assert_eq!(per_record, state.findings.len());
        }

        Ok(())
    }

    /// Findings merged so far.
    pub fn finding_count(&self) -> usize {
        self.state.lock().findings.len()
    }

    /// Records merged so far.
    pub fn record_count(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Freeze the aggregate and hand it over.
    ///
    /// Any merge after this fails; reporters work off the returned set.
    pub fn freeze(&self) -> AggregatedResultSet {
        let mut state = self.state.lock();
        state.frozen = true;
        AggregatedResultSet {
            findings: std::mem::take(&mut state.findings),
            records: std::mem::take(&mut state.records),
        }
    }
}

/// Fill in missing scanner names from finding provenance.
///
/// Resolution order: the `scanner_name` property, then
/// `scanner_details.tool_name`, then a `tool_name::<name>` tag, then the
/// engine's own name.
fn resolve_provenance(findings: &mut [Finding]) {
    for finding in findings {
        if finding.scanner_name.is_empty() {
            finding.scanner_name =
                provenance_name(finding).unwrap_or_else(|| FALLBACK_SCANNER.to_string());
        }
    }
}

fn provenance_name(finding: &Finding) -> Option<String> {
    if let Some(name) = finding.properties.get("scanner_name").and_then(|v| v.as_str()) {
        if !name.is_empty() {
            return Some(name.to_string());
        }
    }
    if let Some(name) = finding
        .properties
        .get("scanner_details")
        .and_then(|v| v.get("tool_name"))
        .and_then(|v| v.as_str())
    {
        if !name.is_empty() {
            return Some(name.to_string());
        }
    }
    finding
        .tags
        .iter()
        .find_map(|tag| tag.strip_prefix("tool_name::"))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginKind;
    use crate::results::Severity;
    use std::sync::Arc;

    fn record_with(scanner: &str, findings: Vec<Finding>) -> ScannerRunRecord {
        let mut record = ScannerRunRecord::new(scanner, PluginKind::Scanner);
        record.mark_running();
        record.push_findings(findings);
        record.complete(Some(0));
        record
    }

    fn finding(rule: &str) -> Finding {
        Finding::new(rule, Severity::Medium, "m").with_scanner("bandit")
    }

    #[test]
    fn test_merge_appends_findings_and_records() {
        let aggregator = ResultsAggregator::new();
        aggregator.merge(record_with("bandit", vec![finding("B1"), finding("B2")])).unwrap();
        aggregator.merge(record_with("semgrep", vec![finding("S1")])).unwrap();

        assert_eq!(aggregator.finding_count(), 3);
        assert_eq!(aggregator.record_count(), 2);

        let set = aggregator.freeze();
        assert_eq!(set.finding_count(), 3);
        set.verify().unwrap();
    }

    #[test]
    fn test_record_with_no_findings_still_merged() {
        let aggregator = ResultsAggregator::new();
        aggregator.merge(record_with("grype", Vec::new())).unwrap();

        let set = aggregator.freeze();
        assert_eq!(set.finding_count(), 0);
        assert_eq!(set.records.len(), 1);
        set.verify().unwrap();
    }

    #[test]
    fn test_merge_after_freeze_rejected() {
        let aggregator = ResultsAggregator::new();
        let _ = aggregator.freeze();

        let err = aggregator.merge(record_with("bandit", vec![finding("B1")])).unwrap_err();
        assert!(matches!(err, EngineError::InvariantViolation(_)));
    }

    #[test]
    fn test_provenance_property_wins() {
        let orphan = Finding::new("R", Severity::Low, "m")
            .with_property("scanner_name", serde_json::json!("checkov"))
            .with_property(
                "scanner_details",
                serde_json::json!({ "tool_name": "detect-secrets" }),
            )
            .with_tag("tool_name::trivy");

        let aggregator = ResultsAggregator::new();
        aggregator.merge(record_with("", vec![orphan])).unwrap();

        let set = aggregator.freeze();
        assert_eq!(set.findings[0].scanner_name, "checkov");
    }

    #[test]
    fn test_provenance_details_then_tag_then_fallback() {
        let from_details = Finding::new("R1", Severity::Low, "m").with_property(
            "scanner_details",
            serde_json::json!({ "tool_name": "detect-secrets" }),
        );
        let from_tag = Finding::new("R2", Severity::Low, "m").with_tag("tool_name::trivy");
        let fallback = Finding::new("R3", Severity::Low, "m");

        let aggregator = ResultsAggregator::new();
        aggregator
            .merge(record_with("", vec![from_details, from_tag, fallback]))
            .unwrap();

        let set = aggregator.freeze();
        assert_eq!(set.findings[0].scanner_name, "detect-secrets");
        assert_eq!(set.findings[1].scanner_name, "trivy");
        assert_eq!(set.findings[2].scanner_name, "ash");
    }

    #[test]
    fn test_provenance_keeps_existing_name() {
        let named = finding("B1");
        let aggregator = ResultsAggregator::new();
        aggregator.merge(record_with("bandit", vec![named])).unwrap();

        let set = aggregator.freeze();
        assert_eq!(set.findings[0].scanner_name, "bandit");
    }

    #[tokio::test]
    async fn test_concurrent_merges_reconcile() {
        let aggregator = Arc::new(ResultsAggregator::new());
        let mut handles = Vec::new();

        for i in 0..8 {
            let aggregator = Arc::clone(&aggregator);
            handles.push(tokio::spawn(async move {
                let name = format!("scanner-{i}");
                let findings = (0..i).map(|n| finding(&format!("R{n}"))).collect();
                aggregator.merge(record_with(&name, findings)).unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // 0 + 1 + ... + 7
        assert_eq!(aggregator.finding_count(), 28);
        assert_eq!(aggregator.record_count(), 8);
        aggregator.freeze().verify().unwrap();
    }
}
