//! Per-run execution context.
//!
//! Everything a run needs travels in one [`RunContext`] handed down the
//! pipeline. Plugins and phases never reach for process-wide state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::core::config::EngineConfig;
use crate::core::events::{EventSink, ScanEvent, TracingSink};
use crate::governor::ResourceGovernor;

/// Shared, read-only context for one run.
#[derive(Clone)]
pub struct RunContext {
    /// Unique id for this run.
    pub run_id: Uuid,
    /// Resolved configuration.
    pub config: Arc<EngineConfig>,
    /// Concurrency and resource limits.
    pub governor: Arc<ResourceGovernor>,
    /// Progress event receiver.
    events: Arc<dyn EventSink>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("project", &self.config.project_name)
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl RunContext {
    /// Create a context with the default tracing event sink.
    pub fn new(config: Arc<EngineConfig>, governor: Arc<ResourceGovernor>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            config,
            governor,
            events: Arc::new(TracingSink),
            started_at: Utc::now(),
        }
    }

    /// Replace the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Emit a progress event.
    pub fn emit(&self, event: &ScanEvent) {
        self.events.emit(event);
    }

    /// Wall time since the run started.
    pub fn elapsed(&self) -> Duration {
        (Utc::now() - self.started_at).to_std().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_identity() {
        let config = Arc::new(EngineConfig::default());
        let governor = Arc::new(ResourceGovernor::new(config.governor.clone()));
        let a = RunContext::new(Arc::clone(&config), Arc::clone(&governor));
        let b = RunContext::new(config, governor);
        assert_ne!(a.run_id, b.run_id);
    }
}
