//! Plugin system for the scan engine.
//!
//! Security tools plug in as converters, scanners or reporters behind one
//! [`Plugin`] trait. The [`PluginRegistry`] owns registrations and resolves
//! per-run enablement from configuration.

mod contract;
mod registry;

pub use contract::{
    probe_target, NormalizedResult, Plugin, PluginKind, ReportView, RunRequest, TargetKind,
};
pub use registry::{PluginHandle, PluginOrigin, PluginRegistry};
