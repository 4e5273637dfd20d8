//! Plugin registry and dispatcher.
//!
//! The registry maps a plugin-type key (the first pay type's `key`) to a
//! factory. The dispatcher builds instances on first use and caches them
//! per type until explicitly invalidated. Unknown types resolve to the
//! [`DefaultPlugin`] rather than failing.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::{DefaultPlugin, Plugin};
use crate::product::ProductSelector;

/// Shared dependencies handed to every factory.
#[derive(Clone)]
pub struct PluginContext {
    pub products: Arc<ProductSelector>,
}

pub type PluginFactory = Arc<dyn Fn(&PluginContext) -> Arc<dyn Plugin> + Send + Sync>;

pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
    fallback: PluginFactory,
}

impl PluginRegistry {
    /// Empty registry with the default strategy as fallback.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            fallback: Arc::new(|ctx: &PluginContext| {
                Arc::new(DefaultPlugin::new(ctx.products.clone())) as Arc<dyn Plugin>
            }),
        }
    }

    /// Register (or replace) the factory for `plugin_type`.
    pub fn register(&mut self, plugin_type: &str, factory: PluginFactory) {
        self.factories.insert(plugin_type.to_string(), factory);
    }

    /// Explicitly registered types, sorted. The fallback is not listed.
    #[must_use]
    pub fn registered(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.factories.keys().cloned().collect();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn is_registered(&self, plugin_type: &str) -> bool {
        self.factories.contains_key(plugin_type)
    }

    fn factory(&self, plugin_type: &str) -> &PluginFactory {
        self.factories.get(plugin_type).unwrap_or(&self.fallback)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PluginDispatcher {
    registry: PluginRegistry,
    context: PluginContext,
    instances: RwLock<HashMap<String, Arc<dyn Plugin>>>,
    default_timeout_secs: u64,
}

impl PluginDispatcher {
    #[must_use]
    pub fn new(registry: PluginRegistry, context: PluginContext, default_timeout_secs: u64) -> Self {
        Self {
            registry,
            context,
            instances: RwLock::new(HashMap::new()),
            default_timeout_secs,
        }
    }

    /// The strategy for `plugin_type`, built on first use.
    #[must_use]
    pub fn get(&self, plugin_type: &str) -> Arc<dyn Plugin> {
        if let Some(p) = self.instances.read().get(plugin_type) {
            return p.clone();
        }
        let mut instances = self.instances.write();
        instances
            .entry(plugin_type.to_string())
            .or_insert_with(|| {
                debug!(plugin_type, "building plugin instance");
                (self.registry.factory(plugin_type))(&self.context)
            })
            .clone()
    }

    /// Order lifetime for `plugin_type`; a zero capability means the default.
    #[must_use]
    pub fn timeout_for(&self, plugin_type: &str) -> u64 {
        match self.get(plugin_type).capabilities().timeout_seconds {
            0 => self.default_timeout_secs,
            secs => secs,
        }
    }

    /// Drop the cached instance for one type.
    pub fn invalidate(&self, plugin_type: &str) {
        self.instances.write().remove(plugin_type);
    }

    pub fn invalidate_all(&self) {
        self.instances.write().clear();
    }

    #[must_use]
    pub fn cached(&self) -> usize {
        self.instances.read().len()
    }

    #[must_use]
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }
}
