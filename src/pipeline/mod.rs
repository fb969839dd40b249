//! The three-phase run pipeline.
//!
//! A run executes convert, scan and report strictly in that order. Within a
//! phase, plugins dispatch per the configured [`ExecutionStrategy`], every
//! invocation is admitted through the resource governor, and one
//! [`ScannerRunRecord`] per dispatched plugin lands in the aggregator no
//! matter how the invocation ends. A single misbehaving plugin never takes
//! the run down; only configuration errors abort it.

mod strategy;

pub use strategy::ExecutionStrategy;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use parking_lot::Mutex;

use crate::core::{EngineError, EngineResult, RunContext, ScanEvent};
use crate::governor::{ScanPermit, ShutdownOutcome, TaskPermit};
use crate::metrics::{RunSummary, SeverityEvaluator};
use crate::plugin::{
    probe_target, NormalizedResult, Plugin, PluginHandle, PluginKind, PluginRegistry, ReportView,
    RunRequest, TargetKind,
};
use crate::results::{AggregatedResultSet, InvocationState, ResultsAggregator, ScannerRunRecord};

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunOutcome {
    /// Frozen aggregate of findings and scan-phase records.
    pub results: AggregatedResultSet,
    /// Unified metrics computed from the aggregate.
    pub summary: RunSummary,
    /// Lifecycle records for reporters, kept outside the frozen aggregate.
    pub reporter_records: Vec<ScannerRunRecord>,
}

impl RunOutcome {
    /// Process exit code the embedder should surface.
    pub fn exit_code(&self) -> i32 {
        self.summary.exit_code()
    }
}

/// Orchestrates one run end to end. One pipeline per run.
pub struct ScanPipeline {
    context: RunContext,
    registry: PluginRegistry,
    evaluator: SeverityEvaluator,
    aggregator: Arc<ResultsAggregator>,
}

impl ScanPipeline {
    /// Build a pipeline from a run context and a populated registry.
    pub fn new(context: RunContext, registry: PluginRegistry) -> Self {
        let evaluator = SeverityEvaluator::from_config(&context.config);
        Self { context, registry, evaluator, aggregator: Arc::new(ResultsAggregator::new()) }
    }

    /// The run context this pipeline executes under.
    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Request shutdown: stop admissions, drain, then force-cancel.
    pub async fn shutdown(&self) -> ShutdownOutcome {
        self.context.governor.shutdown().await
    }

    /// Execute the run against one source tree.
    ///
    /// Fails only on configuration errors; every per-plugin condition is
    /// captured in that plugin's record instead.
    pub async fn execute(&self, source: &Path) -> EngineResult<RunOutcome> {
        self.context.config.validate()?;

        tracing::info!(
            run_id = %self.context.run_id,
            project = %self.context.config.project_name,
            source = %source.display(),
            strategy = %self.context.config.strategy,
            "Starting scan run"
        );
        if let Err(e) = probe_target(source) {
            tracing::warn!(source = %source.display(), reason = %e, "Source tree is not scannable");
        }

        let monitor = self.context.governor.spawn_monitor();

        let artifacts = self.convert_phase(source).await;
        self.scan_phase(source, &artifacts).await;

        let results = self.aggregator.freeze();
        if let Err(e) = results.verify() {
            tracing::error!(error = %e, "Aggregation invariant violated");
        }

        let summary = RunSummary::compute(
            &self.context.config,
            self.context.run_id,
            self.context.started_at,
            &results,
        );
        let reporter_records = self.report_phase(source, &results, &summary).await;

        monitor.abort();

        self.context.emit(&ScanEvent::RunCompleted {
            run_id: self.context.run_id,
            status: summary.status,
            total_findings: results.finding_count(),
            duration: self.context.elapsed(),
        });
        tracing::info!(
            run_id = %self.context.run_id,
            status = %summary.status,
            findings = results.finding_count(),
            actionable = summary.totals.actionable,
            "Run complete"
        );

        Ok(RunOutcome { results, summary, reporter_records })
    }

    /// Run converters against the source and collect usable artifacts.
    ///
    /// Phase events fire even when no converters are registered, so sinks
    /// see the same phase sequence on every run.
    async fn convert_phase(&self, source: &Path) -> Vec<PathBuf> {
        let config = &self.context.config;
        let handles = self.registry.plugins_for_phase(PluginKind::Converter, config);

        let phase_start = Instant::now();
        let enabled: Vec<PluginHandle> = handles.iter().filter(|h| !h.excluded).cloned().collect();
        self.context.emit(&ScanEvent::PhaseStarted {
            phase: PluginKind::Converter,
            plugin_count: enabled.len(),
        });
        self.merge_excluded(&handles);

        let ignore_paths = Arc::new(config.global_ignore_paths());
        let mut artifacts = Vec::new();

        match config.strategy {
            ExecutionStrategy::Parallel => {
                let mut join_handles = Vec::new();
                for handle in enabled {
                    let job = ConverterJob {
                        dispatch: self.dispatch(handle, Arc::clone(&ignore_paths)),
                        source: source.to_path_buf(),
                        evaluator: self.evaluator.clone(),
                        aggregator: Arc::clone(&self.aggregator),
                    };
                    join_handles.push(tokio::spawn(job.run()));
                }
                for join_handle in join_handles {
                    match join_handle.await {
                        Ok(produced) => artifacts.extend(produced),
                        Err(e) => tracing::error!(error = %e, "Converter task aborted"),
                    }
                }
            }
            ExecutionStrategy::Sequential => {
                for handle in enabled {
                    let job = ConverterJob {
                        dispatch: self.dispatch(handle, Arc::clone(&ignore_paths)),
                        source: source.to_path_buf(),
                        evaluator: self.evaluator.clone(),
                        aggregator: Arc::clone(&self.aggregator),
                    };
                    artifacts.extend(job.run().await);
                }
            }
        }

        // Only artifacts that exist and have content become scan targets.
        artifacts.retain(|artifact| match probe_target(artifact) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(
                    artifact = %artifact.display(),
                    reason = %e,
                    "Dropping unusable converter artifact"
                );
                false
            }
        });

        self.context.emit(&ScanEvent::PhaseCompleted {
            phase: PluginKind::Converter,
            duration: phase_start.elapsed(),
        });
        artifacts
    }

    /// Run every enabled scanner against the source plus converter artifacts.
    async fn scan_phase(&self, source: &Path, artifacts: &[PathBuf]) {
        let config = &self.context.config;
        let handles = self.registry.plugins_for_phase(PluginKind::Scanner, config);

        let phase_start = Instant::now();
        let enabled: Vec<PluginHandle> = handles.iter().filter(|h| !h.excluded).cloned().collect();
        self.context.emit(&ScanEvent::PhaseStarted {
            phase: PluginKind::Scanner,
            plugin_count: enabled.len(),
        });
        self.merge_excluded(&handles);

        let mut targets = vec![(source.to_path_buf(), TargetKind::Source)];
        targets.extend(artifacts.iter().map(|a| (a.clone(), TargetKind::Converted)));
        let targets = Arc::new(targets);

        let ignore_paths = Arc::new(config.global_ignore_paths());
        let progress =
            Arc::new(ScanProgress::new(enabled.iter().map(|h| h.name().to_string()).collect()));

        match config.strategy {
            ExecutionStrategy::Parallel => {
                let mut join_handles = Vec::new();
                for handle in enabled {
                    let job = ScannerJob {
                        dispatch: self.dispatch(handle, Arc::clone(&ignore_paths)),
                        targets: Arc::clone(&targets),
                        evaluator: self.evaluator.clone(),
                        aggregator: Arc::clone(&self.aggregator),
                        progress: Arc::clone(&progress),
                    };
                    join_handles.push(tokio::spawn(job.run()));
                }
                for join_handle in join_handles {
                    if let Err(e) = join_handle.await {
                        tracing::error!(error = %e, "Scanner task aborted");
                    }
                }
            }
            ExecutionStrategy::Sequential => {
                for handle in enabled {
                    let job = ScannerJob {
                        dispatch: self.dispatch(handle, Arc::clone(&ignore_paths)),
                        targets: Arc::clone(&targets),
                        evaluator: self.evaluator.clone(),
                        aggregator: Arc::clone(&self.aggregator),
                        progress: Arc::clone(&progress),
                    };
                    job.run().await;
                }
            }
        }

        self.context.emit(&ScanEvent::PhaseCompleted {
            phase: PluginKind::Scanner,
            duration: phase_start.elapsed(),
        });
    }

    /// Hand the frozen results to every enabled reporter.
    async fn report_phase(
        &self,
        source: &Path,
        results: &AggregatedResultSet,
        summary: &RunSummary,
    ) -> Vec<ScannerRunRecord> {
        let config = &self.context.config;
        let handles = self.registry.plugins_for_phase(PluginKind::Reporter, config);

        let phase_start = Instant::now();
        let enabled: Vec<PluginHandle> = handles.iter().filter(|h| !h.excluded).cloned().collect();
        self.context.emit(&ScanEvent::PhaseStarted {
            phase: PluginKind::Reporter,
            plugin_count: enabled.len(),
        });

        let mut records: Vec<ScannerRunRecord> = handles
            .iter()
            .filter(|h| h.excluded)
            .map(|h| {
                let (threshold, threshold_source) = self.evaluator.resolve_threshold(h.name());
                ScannerRunRecord::excluded(h.name(), PluginKind::Reporter)
                    .with_threshold(threshold, threshold_source)
            })
            .collect();

        let view = ReportView { results, summary };
        let ignore_paths = Arc::new(config.global_ignore_paths());
        let targets = vec![(source.to_path_buf(), TargetKind::Source)];

        let run_one = |handle: PluginHandle| {
            let mut dispatch = self.dispatch(handle, Arc::clone(&ignore_paths));
            dispatch.report = Some(view);
            let targets = &targets;
            async move {
                let name = dispatch.handle.name().to_string();
                let (threshold, threshold_source) = self.evaluator.resolve_threshold(&name);
                let mut record = ScannerRunRecord::new(&name, PluginKind::Reporter)
                    .with_threshold(threshold, threshold_source);
                dispatch.execute(targets, &mut record).await;
                if record.errored() {
                    tracing::warn!(
                        reporter = %name,
                        error = record.error.as_deref().unwrap_or("unknown"),
                        "Reporter did not complete"
                    );
                }
                record
            }
        };

        match config.strategy {
            ExecutionStrategy::Parallel => {
                records
                    .extend(futures::future::join_all(enabled.into_iter().map(run_one)).await);
            }
            ExecutionStrategy::Sequential => {
                for handle in enabled {
                    records.push(run_one(handle).await);
                }
            }
        }

        self.context.emit(&ScanEvent::PhaseCompleted {
            phase: PluginKind::Reporter,
            duration: phase_start.elapsed(),
        });
        records
    }

    fn dispatch<'a>(&self, handle: PluginHandle, ignore_paths: Arc<Vec<PathBuf>>) -> Dispatch<'a> {
        Dispatch { context: self.context.clone(), handle, ignore_paths, report: None }
    }

    /// Record every excluded plugin of a phase as skipped.
    fn merge_excluded(&self, handles: &[PluginHandle]) {
        for handle in handles.iter().filter(|h| h.excluded) {
            tracing::debug!(plugin = %handle.name(), kind = %handle.kind(), "Excluded by configuration");
            let (threshold, threshold_source) = self.evaluator.resolve_threshold(handle.name());
            let record = ScannerRunRecord::excluded(handle.name(), handle.kind())
                .with_threshold(threshold, threshold_source);
            if let Err(e) = self.aggregator.merge(record) {
                tracing::error!(plugin = %handle.name(), error = %e, "Failed to merge excluded record");
            }
        }
    }
}

/// Scan-phase progress shared across dispatch tasks.
struct ScanProgress {
    total: usize,
    remaining: Mutex<Vec<String>>,
}

impl ScanProgress {
    fn new(names: Vec<String>) -> Self {
        Self { total: names.len(), remaining: Mutex::new(names) }
    }

    /// Retire one scanner and build its completion event.
    fn finish(&self, name: &str) -> ScanEvent {
        let mut remaining = self.remaining.lock();
        remaining.retain(|n| n != name);
        let completed = self.total - remaining.len();
        ScanEvent::scanner_completed(name, completed, self.total, remaining.clone())
    }
}

/// One scanner dispatch, owning everything its task needs.
struct ScannerJob {
    dispatch: Dispatch<'static>,
    targets: Arc<Vec<(PathBuf, TargetKind)>>,
    evaluator: SeverityEvaluator,
    aggregator: Arc<ResultsAggregator>,
    progress: Arc<ScanProgress>,
}

impl ScannerJob {
    async fn run(self) {
        let name = self.dispatch.handle.name().to_string();
        let (threshold, threshold_source) = self.evaluator.resolve_threshold(&name);
        let mut record = ScannerRunRecord::new(&name, PluginKind::Scanner)
            .with_threshold(threshold, threshold_source);

        self.dispatch.execute(&self.targets, &mut record).await;

        if !self.dispatch.context.config.ignore_suppressions {
            self.evaluator.apply_suppressions(&mut record.findings);
        }

        let event = self.progress.finish(&name);
        if let Err(e) = self.aggregator.merge(record) {
            tracing::error!(scanner = %name, error = %e, "Failed to merge scanner record");
        }
        self.dispatch.context.emit(&event);
    }
}

/// One converter dispatch. Returns the artifact paths it produced.
struct ConverterJob {
    dispatch: Dispatch<'static>,
    source: PathBuf,
    evaluator: SeverityEvaluator,
    aggregator: Arc<ResultsAggregator>,
}

impl ConverterJob {
    async fn run(self) -> Vec<PathBuf> {
        let name = self.dispatch.handle.name().to_string();
        let (threshold, threshold_source) = self.evaluator.resolve_threshold(&name);
        let mut record = ScannerRunRecord::new(&name, PluginKind::Converter)
            .with_threshold(threshold, threshold_source);

        let targets = vec![(self.source, TargetKind::Source)];
        let artifacts = self.dispatch.execute(&targets, &mut record).await;

        if !self.dispatch.context.config.ignore_suppressions {
            self.evaluator.apply_suppressions(&mut record.findings);
        }
        if let Err(e) = self.aggregator.merge(record) {
            tracing::error!(converter = %name, error = %e, "Failed to merge converter record");
        }
        artifacts
    }
}

/// How one target invocation ended.
enum Invocation {
    Finished(NormalizedResult),
    Errored(EngineError),
    Panicked(String),
    TimedOut(u64),
    Cancelled,
}

/// Drives one plugin through its lifecycle against a target list.
struct Dispatch<'a> {
    context: RunContext,
    handle: PluginHandle,
    ignore_paths: Arc<Vec<PathBuf>>,
    report: Option<ReportView<'a>>,
}

impl Dispatch<'_> {
    /// Run the full lifecycle, mutating the record to its terminal state.
    ///
    /// `post_run` is awaited on every exit path that reached `pre_run`,
    /// timeouts and forced cancellation included.
    async fn execute(
        &self,
        targets: &[(PathBuf, TargetKind)],
        record: &mut ScannerRunRecord,
    ) -> Vec<PathBuf> {
        let plugin = self.handle.plugin();
        record.mark_validating();

        if !plugin.validate_dependencies().await {
            tracing::warn!(plugin = %self.handle.name(), "Dependencies unsatisfied, plugin will not run");
            record.dependency_missing();
            return Vec::new();
        }

        let governor = &self.context.governor;
        let is_scanner = self.handle.kind() == PluginKind::Scanner;
        let budget =
            if is_scanner { governor.scan_timeout() } else { governor.operation_timeout() };

        let mut artifacts = Vec::new();
        let mut exit_code: Option<i32> = None;

        for (target, target_kind) in targets {
            let request = RunRequest {
                target,
                target_kind: *target_kind,
                ignore_paths: &self.ignore_paths,
                options: &self.handle.options,
                report: self.report,
            };

            match plugin.pre_run(&request).await {
                Ok(()) => {}
                Err(e) if e.is_skip() => {
                    tracing::debug!(
                        plugin = %self.handle.name(),
                        target = %target.display(),
                        reason = %e,
                        "Target skipped"
                    );
                    self.post_run(plugin.as_ref(), &request).await;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(plugin = %self.handle.name(), error = %e, "pre_run failed");
                    record.fail(e.to_string(), None);
                    self.post_run(plugin.as_ref(), &request).await;
                    break;
                }
            }

            // Scanners hold a scan slot, everything else a task slot. An
            // admission error means shutdown has begun.
            let admitted = if is_scanner {
                governor.admit_scan().await.map(|p| (Some(p), None))
            } else {
                governor.admit_task().await.map(|p| (None, Some(p)))
            };
            let (scan_permit, task_permit): (Option<ScanPermit>, Option<TaskPermit>) =
                match admitted {
                    Ok(pair) => pair,
                    Err(_) => {
                        record.force_cancel();
                        self.post_run(plugin.as_ref(), &request).await;
                        break;
                    }
                };

            record.mark_running();

            let invocation = {
                let run = std::panic::AssertUnwindSafe(plugin.run(&request)).catch_unwind();
                tokio::select! {
                    outcome = tokio::time::timeout(budget, run) => match outcome {
                        Ok(Ok(Ok(result))) => Invocation::Finished(result),
                        Ok(Ok(Err(e))) => Invocation::Errored(e),
                        Ok(Err(panic)) => Invocation::Panicked(panic_message(&panic)),
                        Err(_) => Invocation::TimedOut(budget.as_secs()),
                    },
                    () = governor.cancelled() => Invocation::Cancelled,
                }
            };
            drop(scan_permit);
            drop(task_permit);

            self.post_run(plugin.as_ref(), &request).await;

            match invocation {
                Invocation::Finished(result) => {
                    exit_code = merge_exit_codes(exit_code, result.exit_code);
                    record.push_findings(result.findings);
                    artifacts.extend(result.artifacts);
                }
                Invocation::Errored(e) => {
                    tracing::warn!(plugin = %self.handle.name(), error = %e, "Plugin execution failed");
                    let code = match &e {
                        EngineError::Execution { exit_code, .. } => *exit_code,
                        _ => None,
                    };
                    record.fail(e.to_string(), code);
                    break;
                }
                Invocation::Panicked(message) => {
                    tracing::error!(plugin = %self.handle.name(), message = %message, "Plugin panicked");
                    record.fail(format!("plugin panicked: {message}"), None);
                    break;
                }
                Invocation::TimedOut(seconds) => {
                    tracing::warn!(plugin = %self.handle.name(), seconds, "Plugin timed out");
                    record.time_out(seconds);
                    break;
                }
                Invocation::Cancelled => {
                    tracing::warn!(plugin = %self.handle.name(), "Force-cancelled during shutdown");
                    record.force_cancel();
                    break;
                }
            }
        }

        if record.state == InvocationState::Running {
            record.complete(exit_code);
        } else if !record.state.is_terminal() {
            // Every target was skipped before execution started.
            record.skip();
        }
        artifacts
    }

    async fn post_run(&self, plugin: &dyn Plugin, request: &RunRequest<'_>) {
        let budget = self.context.governor.operation_timeout();
        match tokio::time::timeout(budget, plugin.post_run(request)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(plugin = %self.handle.name(), error = %e, "post_run failed");
            }
            Err(_) => {
                tracing::warn!(plugin = %self.handle.name(), "post_run timed out");
            }
        }
    }
}

fn merge_exit_codes(current: Option<i32>, new: Option<i32>) -> Option<i32> {
    match (current, new) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => b.or(a),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_counts_down() {
        let progress =
            ScanProgress::new(vec!["bandit".into(), "semgrep".into(), "grype".into()]);

        let ScanEvent::ScannerCompleted { completed, total, remaining, remaining_scanners, .. } =
            progress.finish("semgrep")
        else {
            panic!("wrong event");
        };
        assert_eq!(completed, 1);
        assert_eq!(total, 3);
        assert_eq!(remaining, 2);
        assert_eq!(remaining_scanners, vec!["bandit".to_string(), "grype".to_string()]);

        progress.finish("bandit");
        let ScanEvent::ScannerCompleted { completed, remaining, .. } = progress.finish("grype")
        else {
            panic!("wrong event");
        };
        assert_eq!(completed, 3);
        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_merge_exit_codes_prefers_failures() {
        assert_eq!(merge_exit_codes(None, None), None);
        assert_eq!(merge_exit_codes(None, Some(0)), Some(0));
        assert_eq!(merge_exit_codes(Some(0), Some(1)), Some(1));
        assert_eq!(merge_exit_codes(Some(2), Some(0)), Some(2));
        assert_eq!(merge_exit_codes(Some(1), None), Some(1));
    }
}
