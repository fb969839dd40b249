//! Severity thresholds and suppression evaluation.
//!
//! This is the only place actionability is computed. Reporters, the status
//! calculator and the unified metrics all go through [`count_severities`];
//! nothing else re-derives level-versus-threshold comparisons.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::{EngineConfig, EngineError, SuppressionRule};
use crate::results::{Finding, Severity, Suppression};

/// Minimum severity for a finding to count as actionable.
///
/// `ALL` is equivalent to an `INFO` threshold: every non-suppressed finding
/// is actionable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Threshold {
    /// Any non-suppressed finding is actionable
    All,
    /// LOW and above
    Low,
    /// MEDIUM and above
    Medium,
    /// HIGH and above
    High,
    /// Only CRITICAL findings
    Critical,
}

impl Default for Threshold {
    fn default() -> Self {
        Self::Medium
    }
}

impl Threshold {
    /// The least severity that still meets this threshold.
    pub fn min_severity(&self) -> Severity {
        match self {
            Self::All => Severity::Info,
            Self::Low => Severity::Low,
            Self::Medium => Severity::Medium,
            Self::High => Severity::High,
            Self::Critical => Severity::Critical,
        }
    }

    /// Upper-case name as used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for Threshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Threshold {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ALL" => Ok(Self::All),
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(EngineError::Config(format!(
                "invalid severity threshold '{other}', expected one of ALL, LOW, MEDIUM, HIGH, CRITICAL"
            ))),
        }
    }
}

/// Where a scanner's resolved threshold came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdSource {
    /// Scanner-level configuration override
    Config,
    /// Global default
    Global,
}

impl std::fmt::Display for ThresholdSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config => write!(f, "config"),
            Self::Global => write!(f, "global"),
        }
    }
}

/// Severity-bucketed counts for one finding list.
///
/// Derived purely from findings plus a threshold; recomputed whenever the
/// inputs change, never mutated in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCount {
    /// CRITICAL findings (non-suppressed)
    pub critical: usize,
    /// HIGH findings (non-suppressed)
    pub high: usize,
    /// MEDIUM findings (non-suppressed)
    pub medium: usize,
    /// LOW findings (non-suppressed)
    pub low: usize,
    /// INFO findings (non-suppressed)
    pub info: usize,
    /// Suppressed findings of any severity
    pub suppressed: usize,
    /// Non-suppressed findings at or above the threshold
    pub actionable: usize,
}

impl SeverityCount {
    /// Total non-suppressed findings.
    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low + self.info
    }

    /// Fold another count into this one.
    pub fn merge(&mut self, other: &SeverityCount) {
        self.critical += other.critical;
        self.high += other.high;
        self.medium += other.medium;
        self.low += other.low;
        self.info += other.info;
        self.suppressed += other.suppressed;
        self.actionable += other.actionable;
    }
}

/// Count findings into severity buckets against a threshold.
///
/// A finding carrying a suppression record contributes only to `suppressed`,
/// regardless of severity. A finding is actionable iff it is not suppressed
/// and its severity rank meets or exceeds the threshold rank.
pub fn count_severities(findings: &[Finding], threshold: Threshold) -> SeverityCount {
    let mut counts = SeverityCount::default();
    let min = threshold.min_severity();

    for finding in findings {
        if finding.is_suppressed() {
            counts.suppressed += 1;
            continue;
        }
        match finding.severity {
            Severity::Critical => counts.critical += 1,
            Severity::High => counts.high += 1,
            Severity::Medium => counts.medium += 1,
            Severity::Low => counts.low += 1,
            Severity::Info => counts.info += 1,
        }
        if finding.severity >= min {
            counts.actionable += 1;
        }
    }

    counts
}

/// Resolves thresholds and applies suppression rules.
///
/// Built once per run from the resolved configuration; read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct SeverityEvaluator {
    global: Threshold,
    overrides: HashMap<String, Threshold>,
    rules: Vec<SuppressionRule>,
}

impl SeverityEvaluator {
    /// Create an evaluator with a global threshold and no overrides.
    pub fn new(global: Threshold) -> Self {
        Self { global, overrides: HashMap::new(), rules: Vec::new() }
    }

    /// Build the evaluator from the run configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        let overrides = config
            .plugins
            .iter()
            .filter_map(|(name, settings)| {
                settings.severity_threshold.map(|t| (name.clone(), t))
            })
            .collect();

        Self {
            global: config.global_settings.severity_threshold,
            overrides,
            rules: config.suppressions.clone(),
        }
    }

    /// Add a scanner-level threshold override.
    #[must_use]
    pub fn with_override(mut self, scanner: impl Into<String>, threshold: Threshold) -> Self {
        self.overrides.insert(scanner.into(), threshold);
        self
    }

    /// Add suppression rules.
    #[must_use]
    pub fn with_rules(mut self, rules: Vec<SuppressionRule>) -> Self {
        self.rules = rules;
        self
    }

    /// The global default threshold.
    pub fn global_threshold(&self) -> Threshold {
        self.global
    }

    /// Resolve the threshold for one scanner.
    ///
    /// Scanner-level override wins when present; the source tags which tier
    /// supplied the value.
    pub fn resolve_threshold(&self, scanner_name: &str) -> (Threshold, ThresholdSource) {
        match self.overrides.get(scanner_name) {
            Some(threshold) => (*threshold, ThresholdSource::Config),
            None => (self.global, ThresholdSource::Global),
        }
    }

    /// Mark findings matched by an unexpired suppression rule as suppressed.
    ///
    /// Findings that already carry a suppression record are left untouched.
    /// Returns how many findings were newly suppressed.
    pub fn apply_suppressions(&self, findings: &mut [Finding]) -> usize {
        if self.rules.is_empty() {
            return 0;
        }

        let today = Utc::now().date_naive();
        let mut applied = 0;

        for finding in findings.iter_mut() {
            if finding.is_suppressed() {
                continue;
            }
            if let Some(rule) = self.rules.iter().find(|r| r.matches(finding, today)) {
                tracing::debug!(
                    rule_id = %rule.rule_id,
                    path = %rule.path,
                    "Suppressing finding via rule"
                );
                finding.suppression = Some(Suppression::external(rule.reason.clone()));
                applied += 1;
            }
        }

        applied
    }

    /// Resolve the scanner threshold and count its findings in one step.
    pub fn scanner_counts(
        &self,
        scanner_name: &str,
        findings: &[Finding],
    ) -> (SeverityCount, Threshold, ThresholdSource) {
        let (threshold, source) = self.resolve_threshold(scanner_name);
        (count_severities(findings, threshold), threshold, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(severity: Severity) -> Finding {
        Finding::new("RULE", severity, "message").with_scanner("test")
    }

    fn suppressed(severity: Severity) -> Finding {
        finding(severity).with_suppression(Suppression::external(None))
    }

    #[test]
    fn test_threshold_min_severity() {
        assert_eq!(Threshold::All.min_severity(), Severity::Info);
        assert_eq!(Threshold::Low.min_severity(), Severity::Low);
        assert_eq!(Threshold::Medium.min_severity(), Severity::Medium);
        assert_eq!(Threshold::High.min_severity(), Severity::High);
        assert_eq!(Threshold::Critical.min_severity(), Severity::Critical);
    }

    #[test]
    fn test_threshold_parse() {
        assert_eq!("HIGH".parse::<Threshold>().unwrap(), Threshold::High);
        assert_eq!("all".parse::<Threshold>().unwrap(), Threshold::All);
        assert!("SEVERE".parse::<Threshold>().is_err());
        assert!("".parse::<Threshold>().unwrap_err().is_fatal());
    }

    #[test]
    fn test_high_threshold_counts_single_actionable() {
        // Threshold HIGH with one CRITICAL, one MEDIUM, one LOW finding:
        // only the CRITICAL one is actionable.
        let findings =
            vec![finding(Severity::Critical), finding(Severity::Medium), finding(Severity::Low)];
        let counts = count_severities(&findings, Threshold::High);

        assert_eq!(counts.actionable, 1);
        assert_eq!(counts.critical, 1);
        assert_eq!(counts.medium, 1);
        assert_eq!(counts.low, 1);
        assert_eq!(counts.suppressed, 0);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_suppressed_info_is_not_actionable_under_all() {
        // Threshold ALL normally makes every finding actionable, but a
        // suppressed finding only lands in the suppressed bucket.
        let findings = vec![suppressed(Severity::Info)];
        let counts = count_severities(&findings, Threshold::All);

        assert_eq!(counts.actionable, 0);
        assert_eq!(counts.suppressed, 1);
        assert_eq!(counts.info, 0);
        assert_eq!(counts.total(), 0);
    }

    #[test]
    fn test_all_threshold_equals_info_rank() {
        let findings = vec![finding(Severity::Info), finding(Severity::Critical)];
        let all = count_severities(&findings, Threshold::All);
        assert_eq!(all.actionable, 2);

        let critical_only = count_severities(&findings, Threshold::Critical);
        assert_eq!(critical_only.actionable, 1);
    }

    #[test]
    fn test_threshold_monotonicity() {
        let findings = vec![
            finding(Severity::Critical),
            finding(Severity::High),
            finding(Severity::Medium),
            finding(Severity::Low),
            finding(Severity::Info),
            suppressed(Severity::Critical),
        ];

        let ladder = [
            Threshold::All,
            Threshold::Low,
            Threshold::Medium,
            Threshold::High,
            Threshold::Critical,
        ];
        let counts: Vec<usize> =
            ladder.iter().map(|t| count_severities(&findings, *t).actionable).collect();

        // Raising the threshold never increases the actionable count.
        for pair in counts.windows(2) {
            assert!(pair[1] <= pair[0], "actionable grew from {} to {}", pair[0], pair[1]);
        }
        assert_eq!(counts, vec![5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_count_severities_idempotent() {
        let findings = vec![
            finding(Severity::High),
            suppressed(Severity::Low),
            finding(Severity::Info),
        ];
        let first = count_severities(&findings, Threshold::Medium);
        let second = count_severities(&findings, Threshold::Medium);
        assert_eq!(first, second);
    }

    #[test]
    fn test_resolve_threshold_precedence() {
        let evaluator =
            SeverityEvaluator::new(Threshold::Medium).with_override("bandit", Threshold::Critical);

        let (threshold, source) = evaluator.resolve_threshold("bandit");
        assert_eq!(threshold, Threshold::Critical);
        assert_eq!(source, ThresholdSource::Config);

        let (threshold, source) = evaluator.resolve_threshold("semgrep");
        assert_eq!(threshold, Threshold::Medium);
        assert_eq!(source, ThresholdSource::Global);
    }

    #[test]
    fn test_apply_suppression_rules() {
        let rule = SuppressionRule::new("B603", "tests/*").with_reason("test fixtures only");
        let evaluator = SeverityEvaluator::new(Threshold::Medium).with_rules(vec![rule]);

        let mut findings = vec![
            Finding::new("B603", Severity::High, "hit")
                .with_location("tests/data/app.py", Some(3), Some(3)),
            Finding::new("B603", Severity::High, "miss").with_location("src/app.py", None, None),
        ];

        let applied = evaluator.apply_suppressions(&mut findings);
        assert_eq!(applied, 1);
        assert!(findings[0].is_suppressed());
        assert_eq!(
            findings[0].suppression.as_ref().unwrap().justification.as_deref(),
            Some("test fixtures only")
        );
        assert!(!findings[1].is_suppressed());
    }

    #[test]
    fn test_expired_rule_does_not_suppress() {
        let rule = SuppressionRule::new("B603", "*")
            .with_expiration(chrono::NaiveDate::from_ymd_opt(2000, 1, 1).unwrap());
        let evaluator = SeverityEvaluator::new(Threshold::Medium).with_rules(vec![rule]);

        let mut findings =
            vec![Finding::new("B603", Severity::High, "hit").with_location("a.py", None, None)];
        assert_eq!(evaluator.apply_suppressions(&mut findings), 0);
        assert!(!findings[0].is_suppressed());
    }

    #[test]
    fn test_already_suppressed_finding_untouched() {
        let rule = SuppressionRule::new("S1", "*").with_reason("rule reason");
        let evaluator = SeverityEvaluator::new(Threshold::Medium).with_rules(vec![rule]);

        let original = Suppression {
            kind: crate::results::SuppressionKind::InSource,
            justification: Some("inline nosec".into()),
        };
        let mut findings = vec![Finding::new("S1", Severity::Low, "x")
            .with_location("a.py", None, None)
            .with_suppression(original.clone())];

        assert_eq!(evaluator.apply_suppressions(&mut findings), 0);
        assert_eq!(findings[0].suppression.as_ref(), Some(&original));
    }

    #[test]
    fn test_severity_count_merge() {
        let mut totals = SeverityCount::default();
        totals.merge(&SeverityCount { critical: 1, actionable: 1, ..Default::default() });
        totals.merge(&SeverityCount {
            high: 2,
            suppressed: 1,
            actionable: 2,
            ..Default::default()
        });

        assert_eq!(totals.critical, 1);
        assert_eq!(totals.high, 2);
        assert_eq!(totals.suppressed, 1);
        assert_eq!(totals.actionable, 3);
        assert_eq!(totals.total(), 3);
    }
}
