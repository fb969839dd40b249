//! Core types for the scan engine.
//!
//! This module contains the structures shared across the engine: the run
//! configuration, the per-run context, the error taxonomy, and progress
//! events.

mod config;
mod context;
mod error;
mod events;

pub use config::{
    EngineConfig, GlobalSettings, GovernorConfig, IgnorePath, PluginSettings, SuppressionRule,
};
pub use context::RunContext;
pub use error::{EngineError, EngineResult};
pub use events::{EventSink, NullSink, ScanEvent, TracingSink};
