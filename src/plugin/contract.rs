//! The plugin contract.
//!
//! Converters, scanners and reporters all implement [`Plugin`]. The pipeline
//! drives every plugin through the same lifecycle: `validate_dependencies`,
//! then per target `pre_run`, `run`, `post_run`. `post_run` is invoked on
//! every exit path that reached `pre_run`, including timeouts and forced
//! cancellation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::core::{EngineError, EngineResult};
use crate::metrics::RunSummary;
use crate::results::{AggregatedResultSet, Finding};

/// What a plugin does, and which phase runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    /// Rewrites targets into a scannable form before the scan phase
    Converter,
    /// Produces findings from a target
    Scanner,
    /// Renders frozen results after the scan phase
    Reporter,
}

impl PluginKind {
    /// Lower-case name as used in configuration and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Converter => "converter",
            Self::Scanner => "scanner",
            Self::Reporter => "reporter",
        }
    }
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a target is original source or a converter artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// The directory or file the run was pointed at
    Source,
    /// An artifact produced by a converter during this run
    Converted,
}

/// Read-only view of a finished run, handed to reporters.
#[derive(Debug, Clone, Copy)]
pub struct ReportView<'a> {
    /// Frozen aggregate of all findings and per-scanner records.
    pub results: &'a AggregatedResultSet,
    /// Unified metrics computed from the aggregate.
    pub summary: &'a RunSummary,
}

/// Everything one plugin invocation needs.
///
/// Built by the pipeline per plugin and target. The same request is passed
/// to `pre_run`, `run` and `post_run` of a single invocation.
#[derive(Debug, Clone, Copy)]
pub struct RunRequest<'a> {
    /// Path the plugin operates on.
    pub target: &'a Path,
    /// Whether the target is source or a converted artifact.
    pub target_kind: TargetKind,
    /// Globally ignored paths, already resolved from configuration.
    pub ignore_paths: &'a [PathBuf],
    /// The plugin's options block from configuration, `Null` when absent.
    pub options: &'a serde_json::Value,
    /// Present for reporters only.
    pub report: Option<ReportView<'a>>,
}

/// Normalized output of one plugin invocation.
#[derive(Debug, Clone, Default)]
pub struct NormalizedResult {
    /// Findings in the engine's model, already severity-mapped.
    pub findings: Vec<Finding>,
    /// Paths produced by the invocation. Converter artifacts become
    /// scan-phase targets.
    pub artifacts: Vec<PathBuf>,
    /// Exit code of the underlying tool, when one ran.
    pub exit_code: Option<i32>,
}

impl NormalizedResult {
    /// A result with no findings and no artifacts.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A result carrying findings.
    pub fn from_findings(findings: Vec<Finding>) -> Self {
        Self { findings, ..Self::default() }
    }

    /// Record an artifact path.
    #[must_use]
    pub fn with_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifacts.push(path.into());
        self
    }

    /// Record the underlying tool's exit code.
    #[must_use]
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }
}

/// Trait for scan engine plugins.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Logical name, unique per registry.
    fn name(&self) -> &str;

    /// Which phase runs this plugin.
    fn kind(&self) -> PluginKind;

    /// Whether the plugin's external dependencies are usable.
    ///
    /// A missing tool is an expected condition, not an error. Implementations
    /// log the reason themselves and return `false`.
    async fn validate_dependencies(&self) -> bool;

    /// Prepare one invocation.
    ///
    /// The default probes the target and signals a skip via
    /// [`EngineError::TargetMissing`] or [`EngineError::TargetEmpty`].
    async fn pre_run(&self, request: &RunRequest<'_>) -> EngineResult<()> {
        probe_target(request.target)
    }

    /// Execute against one target and return normalized output.
    async fn run(&self, request: &RunRequest<'_>) -> EngineResult<NormalizedResult>;

    /// Clean up one invocation. Default no-op.
    async fn post_run(&self, _request: &RunRequest<'_>) -> EngineResult<()> {
        Ok(())
    }
}

/// Check that a target exists and has content.
///
/// Missing targets and empty targets are skip signals for the invocation,
/// not run failures.
pub fn probe_target(target: &Path) -> EngineResult<()> {
    if !target.exists() {
        return Err(EngineError::TargetMissing(target.to_path_buf()));
    }
    if target.is_dir() {
        let has_files = WalkDir::new(target)
            .min_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .any(|entry| entry.file_type().is_file());
        if !has_files {
            return Err(EngineError::TargetEmpty(target.to_path_buf()));
        }
    } else if target.metadata()?.len() == 0 {
        return Err(EngineError::TargetEmpty(target.to_path_buf()));
    }
    Ok(())
}
