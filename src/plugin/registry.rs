//! Plugin registration and per-run enablement.
//!
//! The registry owns every known plugin and resolves which of them a run
//! uses. Enablement is layered: the per-run include and exclude lists win
//! over per-plugin configuration blocks, which win over the default of
//! enabled. Iteration order is registration order throughout.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::{EngineConfig, EngineError, EngineResult};
use crate::metrics::Threshold;
use crate::plugin::contract::{Plugin, PluginKind};

/// Who supplied a plugin registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginOrigin {
    /// Shipped with the engine
    Builtin,
    /// Registered by the embedding application
    User,
}

struct RegisteredPlugin {
    plugin: Arc<dyn Plugin>,
    origin: PluginOrigin,
}

/// A registered plugin resolved against one run's configuration.
#[derive(Clone)]
pub struct PluginHandle {
    plugin: Arc<dyn Plugin>,
    /// The plugin's options block, `Null` when not configured.
    pub options: serde_json::Value,
    /// Scanner-level severity threshold override, when configured.
    pub threshold_override: Option<Threshold>,
    /// Whether configuration excludes this plugin from the run.
    pub excluded: bool,
}

impl PluginHandle {
    /// Logical plugin name.
    pub fn name(&self) -> &str {
        self.plugin.name()
    }

    /// Which phase runs this plugin.
    pub fn kind(&self) -> PluginKind {
        self.plugin.kind()
    }

    /// The plugin implementation.
    pub fn plugin(&self) -> Arc<dyn Plugin> {
        Arc::clone(&self.plugin)
    }
}

impl std::fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHandle")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("excluded", &self.excluded)
            .finish()
    }
}

/// Registry of all known plugins.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<RegisteredPlugin>,
    by_name: HashMap<String, usize>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry").field("count", &self.plugins.len()).finish()
    }
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin.
    ///
    /// A name collision between plugins of different kinds is a
    /// configuration error. A user-supplied plugin replaces a built-in of
    /// the same name and kind, keeping the built-in's registration position.
    /// Every other duplicate is rejected.
    pub fn register(
        &mut self,
        plugin: Arc<dyn Plugin>,
        origin: PluginOrigin,
    ) -> EngineResult<()> {
        let name = plugin.name().to_string();
        let kind = plugin.kind();

        if let Some(&index) = self.by_name.get(&name) {
            let existing = &self.plugins[index];
            if existing.plugin.kind() != kind {
                return Err(EngineError::Config(format!(
                    "plugin '{name}' already registered as {}, cannot register it as {kind}",
                    existing.plugin.kind()
                )));
            }
            if origin == PluginOrigin::User && existing.origin == PluginOrigin::Builtin {
                tracing::warn!(
                    plugin = %name,
                    kind = %kind,
                    "User-supplied plugin replaces built-in of the same name"
                );
                self.plugins[index] = RegisteredPlugin { plugin, origin };
                return Ok(());
            }
            return Err(EngineError::Config(format!(
                "duplicate registration for {kind} plugin '{name}'"
            )));
        }

        self.by_name.insert(name, self.plugins.len());
        self.plugins.push(RegisteredPlugin { plugin, origin });
        Ok(())
    }

    /// Number of registered plugins.
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Whether a plugin with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// All plugins of one kind in registration order, enablement resolved.
    ///
    /// Excluded plugins are present with `excluded` set so the pipeline can
    /// record them as skipped.
    pub fn plugins_for_phase(&self, kind: PluginKind, config: &EngineConfig) -> Vec<PluginHandle> {
        self.plugins
            .iter()
            .filter(|registered| registered.plugin.kind() == kind)
            .map(|registered| self.handle(registered, config))
            .collect()
    }

    /// Non-excluded plugins of one kind in registration order.
    pub fn enabled_plugins(&self, kind: PluginKind, config: &EngineConfig) -> Vec<PluginHandle> {
        self.plugins_for_phase(kind, config).into_iter().filter(|h| !h.excluded).collect()
    }

    fn handle(&self, registered: &RegisteredPlugin, config: &EngineConfig) -> PluginHandle {
        let name = registered.plugin.name();
        let settings = config.plugin_settings(name);

        PluginHandle {
            plugin: Arc::clone(&registered.plugin),
            options: settings.map(|s| s.options.clone()).unwrap_or(serde_json::Value::Null),
            threshold_override: settings.and_then(|s| s.severity_threshold),
            excluded: is_excluded(name, config),
        }
    }
}

/// Resolve the enablement tiers for one plugin name.
///
/// The per-run exclude list wins outright. A non-empty include list is
/// exhaustive. Only when neither list decides does the per-plugin `enabled`
/// flag apply.
fn is_excluded(name: &str, config: &EngineConfig) -> bool {
    if config.excluded_plugins.iter().any(|excluded| excluded == name) {
        return true;
    }
    if !config.enabled_plugins.is_empty() {
        return !config.enabled_plugins.iter().any(|enabled| enabled == name);
    }
    config.plugin_settings(name).is_some_and(|settings| !settings.enabled)
}
