// ============================
// authgate/src/module.rs
// ============================
//! Pluggable auth modules and the registry they are booted from.
use crate::error::AuthError;
use crate::{AuthgateBuilder, SharedAuthgate};
use axum::routing::MethodRouter;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Routes a module exposes, relative to the mount path
pub type RouteTable = BTreeMap<&'static str, MethodRouter<SharedAuthgate>>;

/// An independently registered auth module
pub trait Module: Send + Sync {
    /// Register hooks and capabilities against the instance being booted
    fn initialize(&self, boot: &mut AuthgateBuilder) -> Result<(), AuthError>;

    /// Routes the host should mount for this module
    fn routes(&self) -> RouteTable {
        RouteTable::new()
    }

    /// Template names the host must be able to render for this module
    fn templates(&self) -> Vec<&'static str> {
        Vec::new()
    }
}

/// Name to module mapping, filled during boot and read-only afterwards
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Arc<dyn Module>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `module` under `name`; names are unique.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        module: Arc<dyn Module>,
    ) -> Result<(), AuthError> {
        let name = name.into();
        if self.modules.contains_key(&name) {
            return Err(AuthError::DuplicateModule(name));
        }
        self.modules.insert(name, module);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Sorted snapshot of the registered names
    pub fn names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }
}
