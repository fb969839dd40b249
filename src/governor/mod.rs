//! Resource governance for plugin execution.
//!
//! The governor owns every concurrency limit in the engine: a task semaphore
//! capping in-flight plugin operations across all phases, a scan semaphore
//! capping concurrently running scanners, and a blocking lane capping jobs
//! handed to the thread pool. Admission is RAII: dropping a permit releases
//! the slot.
//!
//! A memory monitor can close the scan admission gate under pressure;
//! admissions park until it reopens. Shutdown stops admissions, gives
//! in-flight work a grace period, then force-cancels.

mod monitor;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::core::{EngineError, EngineResult, GovernorConfig};

pub use monitor::{current_rss_mb, MemoryLevel};

/// How a shutdown concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// In-flight work finished within the grace period
    Graceful,
    /// The grace period expired and remaining work was cancelled
    Forced {
        /// Task slots still held when the grace period expired.
        stragglers: usize,
    },
}

impl ShutdownOutcome {
    /// Whether in-flight work drained without force-cancellation.
    pub fn is_graceful(&self) -> bool {
        matches!(self, Self::Graceful)
    }
}

/// Point-in-time view of governor load.
#[derive(Debug, Clone, Copy)]
pub struct GovernorStats {
    /// Plugin operations currently holding a task slot.
    pub active_tasks: usize,
    /// Scanners currently holding a scan slot.
    pub active_scans: usize,
    /// High-water mark of concurrent tasks.
    pub peak_tasks: usize,
    /// High-water mark of concurrent scans.
    pub peak_scans: usize,
    /// Whether new scan admissions are currently allowed.
    pub admission_gate_open: bool,
    /// Whether shutdown has begun.
    pub shutting_down: bool,
    /// Resident set size of the process in megabytes.
    pub memory_mb: f64,
    /// Time since the governor was created.
    pub uptime: Duration,
}

/// One held task slot. Dropping it releases the slot.
pub struct TaskPermit {
    _permit: OwnedSemaphorePermit,
    gauge: Arc<AtomicUsize>,
}

impl Drop for TaskPermit {
    fn drop(&mut self) {
        self.gauge.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One held scan slot. Carries the task slot it was admitted under.
pub struct ScanPermit {
    gauge: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
    _task: TaskPermit,
}

impl Drop for ScanPermit {
    fn drop(&mut self) {
        self.gauge.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Concurrency and resource limits for one run.
pub struct ResourceGovernor {
    config: GovernorConfig,
    started: Instant,
    task_semaphore: Arc<Semaphore>,
    scan_semaphore: Arc<Semaphore>,
    blocking_semaphore: Arc<Semaphore>,
    active_tasks: Arc<AtomicUsize>,
    active_scans: Arc<AtomicUsize>,
    peak_tasks: AtomicUsize,
    peak_scans: AtomicUsize,
    gate_tx: watch::Sender<bool>,
    gate_rx: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl std::fmt::Debug for ResourceGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("ResourceGovernor")
            .field("active_tasks", &stats.active_tasks)
            .field("active_scans", &stats.active_scans)
            .field("admission_gate_open", &stats.admission_gate_open)
            .field("shutting_down", &stats.shutting_down)
            .finish()
    }
}

impl ResourceGovernor {
    /// Create a governor from resolved limits.
    pub fn new(config: GovernorConfig) -> Self {
        let (gate_tx, gate_rx) = watch::channel(true);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            started: Instant::now(),
            task_semaphore: Arc::new(Semaphore::new(config.max_concurrent_tasks)),
            scan_semaphore: Arc::new(Semaphore::new(config.max_concurrent_scans)),
            blocking_semaphore: Arc::new(Semaphore::new(config.thread_pool_max_workers)),
            active_tasks: Arc::new(AtomicUsize::new(0)),
            active_scans: Arc::new(AtomicUsize::new(0)),
            peak_tasks: AtomicUsize::new(0),
            peak_scans: AtomicUsize::new(0),
            gate_tx,
            gate_rx,
            shutdown_tx,
            shutdown_rx,
            config,
        }
    }

    /// The limits this governor enforces.
    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// Time budget for one scanner's `run`.
    pub fn scan_timeout(&self) -> Duration {
        self.config.scan_timeout()
    }

    /// Time budget for one converter or reporter operation.
    pub fn operation_timeout(&self) -> Duration {
        self.config.operation_timeout()
    }

    /// Acquire a task slot. Converters and reporters admit through this.
    pub async fn admit_task(&self) -> EngineResult<TaskPermit> {
        self.ensure_accepting()?;
        let permit = Arc::clone(&self.task_semaphore)
            .acquire_owned()
            .await
            .map_err(|_| EngineError::Shutdown)?;

        let active = self.active_tasks.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_tasks.fetch_max(active, Ordering::SeqCst);

        Ok(TaskPermit { _permit: permit, gauge: Arc::clone(&self.active_tasks) })
    }

    /// Acquire a scan slot for one scanner execution.
    ///
    /// Takes a task slot first, parks while the memory gate is closed, then
    /// takes a scan slot. A scanner is allowed to run only once this
    /// resolves.
    pub async fn admit_scan(&self) -> EngineResult<ScanPermit> {
        let task = self.admit_task().await?;
        self.wait_for_gate().await?;
        let permit = Arc::clone(&self.scan_semaphore)
            .acquire_owned()
            .await
            .map_err(|_| EngineError::Shutdown)?;

        let active = self.active_scans.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_scans.fetch_max(active, Ordering::SeqCst);

        Ok(ScanPermit { gauge: Arc::clone(&self.active_scans), _permit: permit, _task: task })
    }

    /// Run a blocking closure on the bounded thread-pool lane.
    pub async fn run_blocking<F, T>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.blocking_semaphore)
            .acquire_owned()
            .await
            .map_err(|_| EngineError::Shutdown)?;

        let result = tokio::task::spawn_blocking(f).await;
        drop(permit);

        result.map_err(|e| {
            if e.is_cancelled() {
                EngineError::Shutdown
            } else {
                EngineError::InvariantViolation(format!("blocking task panicked: {e}"))
            }
        })
    }

    /// Scanners currently holding a scan slot.
    pub fn active_scans(&self) -> usize {
        self.active_scans.load(Ordering::SeqCst)
    }

    /// Plugin operations currently holding a task slot.
    pub fn active_tasks(&self) -> usize {
        self.active_tasks.load(Ordering::SeqCst)
    }

    /// Snapshot of current load and state.
    pub fn stats(&self) -> GovernorStats {
        GovernorStats {
            active_tasks: self.active_tasks.load(Ordering::SeqCst),
            active_scans: self.active_scans.load(Ordering::SeqCst),
            peak_tasks: self.peak_tasks.load(Ordering::SeqCst),
            peak_scans: self.peak_scans.load(Ordering::SeqCst),
            admission_gate_open: *self.gate_rx.borrow(),
            shutting_down: *self.shutdown_rx.borrow(),
            memory_mb: monitor::current_rss_mb(),
            uptime: self.started.elapsed(),
        }
    }

    /// Open or close the scan admission gate.
    ///
    /// Normally driven by the memory monitor. While closed, `admit_scan`
    /// parks after taking its task slot.
    pub fn set_admission_gate(&self, open: bool) {
        let _ = self.gate_tx.send(open);
    }

    /// Whether scan admissions are currently allowed.
    pub fn admission_gate_open(&self) -> bool {
        *self.gate_rx.borrow()
    }

    /// Spawn the memory and load monitor for this governor.
    ///
    /// The loop samples process memory every `health_check_interval` and
    /// closes the admission gate at the critical level, reopening it once
    /// usage falls back below the warning level. It exits when shutdown
    /// begins.
    pub fn spawn_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let governor = Arc::clone(self);
        tokio::spawn(monitor::monitor_loop(governor))
    }

    /// Stop accepting new admissions. In-flight work keeps running.
    pub fn begin_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Receiver that flips to `true` when shutdown begins.
    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Resolves one grace period after shutdown begins.
    ///
    /// Dispatch paths race plugin execution against this future; when it
    /// wins, the invocation is force-cancelled. Never resolves while the
    /// governor is accepting work.
    pub async fn cancelled(&self) {
        let mut shutdown = self.shutdown_rx.clone();
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        tokio::time::sleep(self.config.shutdown_timeout()).await;
    }

    /// Shut down: stop admissions, drain within the grace period, then
    /// force-cancel whatever remains by closing the semaphores.
    pub async fn shutdown(&self) -> ShutdownOutcome {
        self.begin_shutdown();

        let drained =
            tokio::time::timeout(self.config.shutdown_timeout(), self.drain()).await.is_ok();

        if drained {
            tracing::info!("Governor drained, shutdown complete");
            ShutdownOutcome::Graceful
        } else {
            let stragglers = self.active_tasks();
            tracing::warn!(
                grace_seconds = self.config.shutdown_timeout_seconds,
                remaining_tasks = stragglers,
                "Shutdown grace period expired, cancelling remaining work"
            );
            self.task_semaphore.close();
            self.scan_semaphore.close();
            self.blocking_semaphore.close();
            ShutdownOutcome::Forced { stragglers }
        }
    }

    /// Resolves when every task slot is free again.
    async fn drain(&self) {
        let total = self.config.max_concurrent_tasks as u32;
        // Holding every permit at once means no task is in flight.
        let _ = self.task_semaphore.acquire_many(total).await;
    }

    fn ensure_accepting(&self) -> EngineResult<()> {
        if *self.shutdown_rx.borrow() {
            return Err(EngineError::Shutdown);
        }
        Ok(())
    }

    /// Park until the admission gate is open, bailing out on shutdown.
    async fn wait_for_gate(&self) -> EngineResult<()> {
        let mut gate = self.gate_rx.clone();
        let mut shutdown = self.shutdown_rx.clone();

        loop {
            if *shutdown.borrow() {
                return Err(EngineError::Shutdown);
            }
            if *gate.borrow() {
                return Ok(());
            }
            tokio::select! {
                changed = gate.changed() => {
                    if changed.is_err() {
                        return Err(EngineError::Shutdown);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Err(EngineError::Shutdown);
                    }
                }
            }
        }
    }
}
