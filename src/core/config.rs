//! Engine configuration.
//!
//! The embedding application resolves configuration however it likes (files,
//! flags, environment); the engine consumes one [`EngineConfig`] read-only at
//! run start. Convenience loaders read a single YAML or TOML document, with
//! no layering or interpolation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::error::{EngineError, EngineResult};
use crate::metrics::Threshold;
use crate::pipeline::ExecutionStrategy;
use crate::results::Finding;

/// Resolved configuration for one run. Immutable once the run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name of the project being scanned.
    pub project_name: String,

    /// Global defaults shared across scanners.
    pub global_settings: GlobalSettings,

    /// Whether actionable findings fail the run verdict.
    pub fail_on_findings: bool,

    /// Whether scanner execution errors alone fail the run verdict.
    pub fail_on_scanner_errors: bool,

    /// Skip applying suppression rules (findings stay actionable).
    pub ignore_suppressions: bool,

    /// Dispatch strategy within each phase.
    pub strategy: ExecutionStrategy,

    /// Concurrency and resource limits.
    pub governor: GovernorConfig,

    /// Per-run include list. Empty means every registered plugin.
    pub enabled_plugins: Vec<String>,

    /// Per-run exclude list. Wins over the include list and plugin settings.
    pub excluded_plugins: Vec<String>,

    /// Per-plugin configuration blocks, keyed by logical plugin name.
    pub plugins: HashMap<String, PluginSettings>,

    /// Suppression rules applied to findings before counting.
    pub suppressions: Vec<SuppressionRule>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            project_name: "ash-scan".to_string(),
            global_settings: GlobalSettings::default(),
            fail_on_findings: true,
            fail_on_scanner_errors: false,
            ignore_suppressions: false,
            strategy: ExecutionStrategy::default(),
            governor: GovernorConfig::default(),
            enabled_plugins: Vec::new(),
            excluded_plugins: Vec::new(),
            plugins: HashMap::new(),
            suppressions: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML (`.yaml`/`.yml`) or TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => serde_yaml::from_str(&contents)?,
            Some("toml") => toml::from_str(&contents)?,
            other => anyhow::bail!(
                "unsupported config extension {:?} for {}, expected yaml, yml or toml",
                other,
                path.display()
            ),
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot honor.
    pub fn validate(&self) -> EngineResult<()> {
        let g = &self.governor;
        if g.max_concurrent_scans == 0 {
            return Err(EngineError::Config("max_concurrent_scans must be at least 1".into()));
        }
        if g.max_concurrent_tasks == 0 {
            return Err(EngineError::Config("max_concurrent_tasks must be at least 1".into()));
        }
        if g.thread_pool_max_workers == 0 {
            return Err(EngineError::Config("thread_pool_max_workers must be at least 1".into()));
        }
        if g.memory_warning_mb >= g.memory_critical_mb {
            return Err(EngineError::Config(format!(
                "memory_warning_mb ({}) must be below memory_critical_mb ({})",
                g.memory_warning_mb, g.memory_critical_mb
            )));
        }
        if g.health_check_interval_seconds == 0 {
            return Err(EngineError::Config(
                "health_check_interval_seconds must be at least 1".into(),
            ));
        }
        for rule in &self.suppressions {
            rule.validate()?;
        }
        Ok(())
    }

    /// Settings block for one plugin, when configured.
    pub fn plugin_settings(&self, name: &str) -> Option<&PluginSettings> {
        self.plugins.get(name)
    }

    /// Global ignore paths handed to every scanner.
    pub fn global_ignore_paths(&self) -> Vec<PathBuf> {
        self.global_settings.ignore_paths.iter().map(|p| PathBuf::from(&p.path)).collect()
    }
}

/// Global defaults shared across scanners. Scanner-level settings win.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    /// Minimum severity for findings to count as actionable, run-wide.
    pub severity_threshold: Threshold,

    /// Paths every scanner ignores, each with a reason.
    pub ignore_paths: Vec<IgnorePath>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self { severity_threshold: Threshold::Medium, ignore_paths: Vec::new() }
    }
}

/// A globally ignored path plus the reason it is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnorePath {
    /// Path or glob to ignore.
    pub path: String,
    /// Why it is ignored (e.g. "vendored third-party code").
    pub reason: String,
}

/// Per-plugin configuration block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSettings {
    /// Whether the plugin participates in the run.
    pub enabled: bool,

    /// Scanner-level severity threshold override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity_threshold: Option<Threshold>,

    /// Free-form options handed to the plugin's `run`.
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub options: serde_json::Value,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self { enabled: true, severity_threshold: None, options: serde_json::Value::Null }
    }
}

/// Concurrency and resource limits for the governor. Immutable for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Concurrent scanner executions.
    pub max_concurrent_scans: usize,

    /// Total in-flight plugin operations across all phases.
    pub max_concurrent_tasks: usize,

    /// Concurrent jobs in the blocking-work lane.
    pub thread_pool_max_workers: usize,

    /// Time budget for one scanner's `run`.
    pub scan_timeout_seconds: u64,

    /// Time budget for one converter or reporter operation.
    pub operation_timeout_seconds: u64,

    /// Grace period for in-flight work during shutdown.
    pub shutdown_timeout_seconds: u64,

    /// Process memory level that logs a warning.
    pub memory_warning_mb: f64,

    /// Process memory level that pauses new scan admissions.
    pub memory_critical_mb: f64,

    /// In-flight task count that logs a warning.
    pub active_tasks_warning: usize,

    /// Interval between health-check samples.
    pub health_check_interval_seconds: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_scans: 3,
            max_concurrent_tasks: 20,
            thread_pool_max_workers: num_cpus::get().max(4),
            scan_timeout_seconds: 300,
            operation_timeout_seconds: 120,
            shutdown_timeout_seconds: 30,
            memory_warning_mb: 500.0,
            memory_critical_mb: 1000.0,
            active_tasks_warning: 10,
            health_check_interval_seconds: 30,
        }
    }
}

impl GovernorConfig {
    /// Time budget for one scanner's `run`.
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_seconds)
    }

    /// Time budget for one converter or reporter operation.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_seconds)
    }

    /// Grace period for in-flight work during shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    /// Interval between health-check samples.
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }
}

/// One suppression rule from configuration.
///
/// Matches findings by rule id glob, file path glob, optional line-range
/// overlap and optional expiration date. First matching rule wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionRule {
    /// Rule identifier to suppress. Glob wildcards allowed.
    pub rule_id: String,

    /// File path pattern the finding must match. Glob wildcards allowed.
    pub path: String,

    /// First line of the suppressed range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_start: Option<u32>,

    /// Last line of the suppressed range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_end: Option<u32>,

    /// Why the finding is suppressed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Date (`YYYY-MM-DD`) after which the rule stops applying.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<NaiveDate>,

    #[serde(skip)]
    rule_matcher: OnceCell<Option<Regex>>,

    #[serde(skip)]
    path_matcher: OnceCell<Option<Regex>>,
}

impl SuppressionRule {
    /// Create a rule matching a rule id pattern within a path pattern.
    pub fn new(rule_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
            path: path.into(),
            line_start: None,
            line_end: None,
            reason: None,
            expiration: None,
            rule_matcher: OnceCell::new(),
            path_matcher: OnceCell::new(),
        }
    }

    /// Restrict the rule to a line range.
    #[must_use]
    pub fn with_lines(mut self, line_start: Option<u32>, line_end: Option<u32>) -> Self {
        self.line_start = line_start;
        self.line_end = line_end;
        self
    }

    /// Record why the finding is suppressed.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Expire the rule after a date.
    #[must_use]
    pub fn with_expiration(mut self, expiration: NaiveDate) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Whether the rule has expired as of `today`.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiration.is_some_and(|exp| exp < today)
    }

    /// Whether this rule suppresses the given finding.
    ///
    /// Findings without a file path never match; a rule without a line range
    /// matches any line.
    pub fn matches(&self, finding: &Finding, today: NaiveDate) -> bool {
        if self.is_expired(today) {
            return false;
        }
        if !glob_matches(&self.rule_matcher, &self.rule_id, &finding.rule_id) {
            return false;
        }
        let Some(file_path) = finding.file_path.as_deref() else {
            return false;
        };
        if !glob_matches(&self.path_matcher, &self.path, &file_path.to_string_lossy()) {
            return false;
        }
        self.line_range_matches(finding)
    }

    fn line_range_matches(&self, finding: &Finding) -> bool {
        if self.line_start.is_none() && self.line_end.is_none() {
            return true;
        }
        // A rule with a line range cannot match a finding without one.
        let Some(finding_start) = finding.line_start else {
            return false;
        };
        let finding_end = finding.line_end.unwrap_or(finding_start);

        match (self.line_start, self.line_end) {
            (Some(start), None) => finding_start >= start,
            (None, Some(end)) => finding_end <= end,
            (Some(start), Some(end)) => finding_start <= end && finding_end >= start,
            (None, None) => true,
        }
    }

    fn validate(&self) -> EngineResult<()> {
        if self.rule_id.is_empty() {
            return Err(EngineError::Config("suppression rule_id must not be empty".into()));
        }
        if self.path.is_empty() {
            return Err(EngineError::Config(format!(
                "suppression rule '{}' must specify a path pattern",
                self.rule_id
            )));
        }
        Ok(())
    }
}

/// Match `text` against a cached glob pattern (`*` and `?` wildcards).
fn glob_matches(cell: &OnceCell<Option<Regex>>, pattern: &str, text: &str) -> bool {
    let compiled = cell.get_or_init(|| {
        let translated = glob_to_regex(pattern);
        match Regex::new(&translated) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "Unusable glob pattern");
                None
            }
        }
    });
    compiled.as_ref().is_some_and(|re| re.is_match(text))
}

/// Translate a glob pattern into an anchored regular expression.
fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 4);
    out.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::Severity;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.global_settings.severity_threshold, Threshold::Medium);
        assert!(config.fail_on_findings);
        assert!(!config.fail_on_scanner_errors);
        assert_eq!(config.governor.max_concurrent_scans, 3);
        assert_eq!(config.governor.max_concurrent_tasks, 20);
        assert!(config.governor.thread_pool_max_workers >= 4);
        assert_eq!(config.governor.shutdown_timeout_seconds, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml_config() {
        let yaml = r#"
project_name: demo
global_settings:
  severity_threshold: HIGH
  ignore_paths:
    - path: "vendor/*"
      reason: third-party code
fail_on_findings: false
strategy: sequential
governor:
  max_concurrent_scans: 2
  scan_timeout_seconds: 10
excluded_plugins:
  - trivy
plugins:
  bandit:
    severity_threshold: CRITICAL
    options:
      confidence: high
  semgrep:
    enabled: false
suppressions:
  - rule_id: "B6*"
    path: "tests/*"
    reason: fixtures
    expiration: 2031-12-31
"#;
        let config = EngineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.project_name, "demo");
        assert_eq!(config.global_settings.severity_threshold, Threshold::High);
        assert!(!config.fail_on_findings);
        assert_eq!(config.governor.max_concurrent_scans, 2);
        // Unspecified governor fields keep their defaults
        assert_eq!(config.governor.max_concurrent_tasks, 20);
        assert_eq!(config.excluded_plugins, vec!["trivy".to_string()]);
        assert_eq!(
            config.plugin_settings("bandit").unwrap().severity_threshold,
            Some(Threshold::Critical)
        );
        assert!(!config.plugin_settings("semgrep").unwrap().enabled);
        assert_eq!(config.suppressions.len(), 1);
        assert_eq!(config.global_ignore_paths(), vec![PathBuf::from("vendor/*")]);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let yaml = "global_settings:\n  severity_threshold: SEVERE\n";
        assert!(EngineConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_caps() {
        let mut config = EngineConfig::default();
        config.governor.max_concurrent_scans = 0;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));

        let mut config = EngineConfig::default();
        config.governor.memory_warning_mb = 2000.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_suppression_rule_matching() {
        let rule = SuppressionRule::new("B603", "src/*.py");
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();

        let hit = Finding::new("B603", Severity::High, "x").with_location(
            "src/app.py",
            Some(5),
            Some(5),
        );
        assert!(rule.matches(&hit, today));

        let wrong_rule = Finding::new("B604", Severity::High, "x").with_location(
            "src/app.py",
            None,
            None,
        );
        assert!(!rule.matches(&wrong_rule, today));

        let wrong_path =
            Finding::new("B603", Severity::High, "x").with_location("lib/app.py", None, None);
        assert!(!rule.matches(&wrong_path, today));

        // Findings without a location never match
        let no_path = Finding::new("B603", Severity::High, "x");
        assert!(!rule.matches(&no_path, today));
    }

    #[test]
    fn test_suppression_rule_id_glob() {
        let rule = SuppressionRule::new("B6*", "*");
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();

        let b603 = Finding::new("B603", Severity::High, "x").with_location("a.py", None, None);
        let b701 = Finding::new("B701", Severity::High, "x").with_location("a.py", None, None);
        assert!(rule.matches(&b603, today));
        assert!(!rule.matches(&b701, today));
    }

    #[test]
    fn test_suppression_line_ranges() {
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let in_range = |rule: &SuppressionRule, start: Option<u32>, end: Option<u32>| {
            let finding =
                Finding::new("R", Severity::Low, "x").with_location("a.py", start, end);
            rule.matches(&finding, today)
        };

        let bounded = SuppressionRule::new("R", "*").with_lines(Some(10), Some(20));
        assert!(in_range(&bounded, Some(15), Some(15)));
        assert!(in_range(&bounded, Some(5), Some(10)));
        assert!(!in_range(&bounded, Some(21), Some(30)));
        // Rule with a range never matches a finding without lines
        assert!(!in_range(&bounded, None, None));

        let from_only = SuppressionRule::new("R", "*").with_lines(Some(10), None);
        assert!(in_range(&from_only, Some(10), None));
        assert!(!in_range(&from_only, Some(9), None));

        let until_only = SuppressionRule::new("R", "*").with_lines(None, Some(10));
        assert!(in_range(&until_only, Some(2), Some(10)));
        assert!(!in_range(&until_only, Some(2), Some(11)));
    }

    #[test]
    fn test_suppression_expiration() {
        let rule = SuppressionRule::new("R", "*")
            .with_expiration(NaiveDate::from_ymd_opt(2026, 6, 1).unwrap());
        let finding = Finding::new("R", Severity::Low, "x").with_location("a.py", None, None);

        let before = NaiveDate::from_ymd_opt(2026, 5, 31).unwrap();
        let on = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let after = NaiveDate::from_ymd_opt(2026, 6, 2).unwrap();
        assert!(rule.matches(&finding, before));
        assert!(rule.matches(&finding, on));
        assert!(!rule.matches(&finding, after));
    }

    #[test]
    fn test_governor_durations() {
        let governor = GovernorConfig::default();
        assert_eq!(governor.scan_timeout(), Duration::from_secs(300));
        assert_eq!(governor.operation_timeout(), Duration::from_secs(120));
        assert_eq!(governor.shutdown_timeout(), Duration::from_secs(30));
        assert_eq!(governor.health_check_interval(), Duration::from_secs(30));
    }
}
