//! Memory and load monitoring.
//!
//! A background loop samples process memory on a fixed interval and drives
//! the governor's scan admission gate: the critical level closes it, and it
//! reopens only once usage falls back below the warning level.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;

use crate::core::GovernorConfig;
use crate::governor::ResourceGovernor;

/// Classified memory pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLevel {
    /// Below the warning threshold
    Normal,
    /// At or above the warning threshold
    Warning,
    /// At or above the critical threshold
    Critical,
}

impl MemoryLevel {
    /// Classify a resident-set sample against configured thresholds.
    pub fn classify(rss_mb: f64, config: &GovernorConfig) -> Self {
        if rss_mb >= config.memory_critical_mb {
            Self::Critical
        } else if rss_mb >= config.memory_warning_mb {
            Self::Warning
        } else {
            Self::Normal
        }
    }
}

/// Resident set size of this process in megabytes.
///
/// Reads `/proc/self/status` on Linux. Returns `0.0` where the sample is
/// unavailable, which keeps the admission gate open.
pub fn current_rss_mb() -> f64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    let kb: f64 =
                        rest.trim().trim_end_matches("kB").trim().parse().unwrap_or(0.0);
                    return kb / 1024.0;
                }
            }
        }
    }
    0.0
}

/// Health-check loop. Exits when the governor begins shutdown.
pub(crate) async fn monitor_loop(governor: Arc<ResourceGovernor>) {
    let config = governor.config().clone();
    let mut interval = tokio::time::interval(config.health_check_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut shutdown = governor.shutdown_signal();
    let mut gate_closed = false;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }
        if governor.is_shutting_down() {
            break;
        }

        let active_tasks = governor.active_tasks();
        if active_tasks >= config.active_tasks_warning {
            tracing::warn!(
                active_tasks = active_tasks,
                limit = config.active_tasks_warning,
                "High number of in-flight plugin operations"
            );
        }

        let rss_mb = current_rss_mb();
        match MemoryLevel::classify(rss_mb, &config) {
            MemoryLevel::Critical => {
                if !gate_closed {
                    gate_closed = true;
                    governor.set_admission_gate(false);
                    tracing::error!(
                        rss_mb = rss_mb,
                        critical_mb = config.memory_critical_mb,
                        "Memory critical, pausing new scan admissions"
                    );
                }
            }
            MemoryLevel::Warning => {
                // While the gate is closed this does not reopen it; recovery
                // requires dropping below the warning level.
                tracing::warn!(
                    rss_mb = rss_mb,
                    warning_mb = config.memory_warning_mb,
                    "Memory usage high"
                );
            }
            MemoryLevel::Normal => {
                if gate_closed {
                    gate_closed = false;
                    governor.set_admission_gate(true);
                    tracing::info!(rss_mb = rss_mb, "Memory recovered, resuming scan admissions");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_level_classification() {
        let config = GovernorConfig::default();
        assert_eq!(MemoryLevel::classify(0.0, &config), MemoryLevel::Normal);
        assert_eq!(MemoryLevel::classify(499.9, &config), MemoryLevel::Normal);
        assert_eq!(MemoryLevel::classify(500.0, &config), MemoryLevel::Warning);
        assert_eq!(MemoryLevel::classify(999.9, &config), MemoryLevel::Warning);
        assert_eq!(MemoryLevel::classify(1000.0, &config), MemoryLevel::Critical);
    }

    #[test]
    fn test_rss_sample_is_nonnegative() {
        assert!(current_rss_mb() >= 0.0);
    }

    #[tokio::test]
    async fn test_monitor_exits_on_shutdown() {
        let config = GovernorConfig { health_check_interval_seconds: 1, ..Default::default() };
        let governor = Arc::new(ResourceGovernor::new(config));

        let handle = governor.spawn_monitor();
        governor.begin_shutdown();

        tokio::time::timeout(std::time::Duration::from_secs(3), handle)
            .await
            .expect("monitor did not exit after shutdown")
            .unwrap();
    }
}
