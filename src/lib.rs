//! # Ashrun
//!
//! Security scan orchestration engine - drives converter, scanner and
//! reporter plugins with bounded concurrency and aggregates their findings
//! into one unified result set.
//!
//! Ashrun does not bundle any scanning tools. Embedders register plugins
//! that wrap whatever tools they run (SAST, secret detection, SBOM, custom
//! checks); the engine takes care of everything around them.
//!
//! ## Features
//!
//! - **Lifecycle contract**: every plugin moves through validate, pre-run,
//!   run and post-run, and cleanup happens on every exit path
//! - **Bounded concurrency**: scan and task slots, timeouts and a memory
//!   gate, all enforced by a resource governor
//! - **Failure isolation**: a crashing, hanging or missing tool becomes a
//!   record in the results, never a lost run
//! - **Unified metrics**: per-scanner status, severity counts against
//!   configurable thresholds, and a single pass/fail verdict
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ashrun::core::{EngineConfig, RunContext};
//! use ashrun::governor::ResourceGovernor;
//! use ashrun::pipeline::ScanPipeline;
//! use ashrun::plugin::PluginRegistry;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Arc::new(EngineConfig::from_file("ashrun.yaml")?);
//! let governor = Arc::new(ResourceGovernor::new(config.governor.clone()));
//!
//! let registry = PluginRegistry::new();
//! // registry.register(...) your converter, scanner and reporter plugins.
//!
//! let context = RunContext::new(Arc::clone(&config), governor);
//! let outcome = ScanPipeline::new(context, registry).execute("./src".as_ref()).await?;
//!
//! println!("{}: {} findings", outcome.summary.status, outcome.summary.total_findings);
//! std::process::exit(outcome.exit_code());
//! # }
//! ```

pub mod core;
pub mod governor;
pub mod metrics;
pub mod pipeline;
pub mod plugin;
pub mod results;

// Re-export commonly used types
pub use crate::core::{
    EngineConfig, EngineError, EngineResult, EventSink, GovernorConfig, RunContext, ScanEvent,
    SuppressionRule,
};
pub use crate::governor::{GovernorStats, ResourceGovernor, ShutdownOutcome};
pub use crate::metrics::{RunStatus, RunSummary, ScannerStatus, SeverityCount, Threshold};
pub use crate::pipeline::{ExecutionStrategy, RunOutcome, ScanPipeline};
pub use crate::plugin::{
    NormalizedResult, Plugin, PluginKind, PluginOrigin, PluginRegistry, RunRequest, TargetKind,
};
pub use crate::results::{AggregatedResultSet, Finding, ScannerRunRecord, Severity};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name, also the provenance fallback for unattributed findings
pub const ENGINE_NAME: &str = "ash";
