//! The config store contract consumed by the rest of the control plane.

use meshroute_core::{Config, Kind};

use crate::error::StoreResult;

/// Kind of change delivered to an [`EventHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigEvent {
    Add,
    Update,
    Delete,
}

/// Callback for per-config change notifications: `(old, new, event)`.
pub type EventHandler = Box<dyn Fn(Option<&Config>, &Config, ConfigEvent) + Send + Sync>;

/// Mutation applied by [`ConfigStore::patch`].
pub type PatchFn = Box<dyn FnOnce(Config) -> Config + Send>;

/// Typed access to routing configs.
pub trait ConfigStore: Send + Sync {
    /// Kinds served by this store.
    fn schemas(&self) -> Vec<Kind>;

    fn get(&self, kind: Kind, name: &str, namespace: &str) -> Option<Config>;

    /// Configs of `kind` in `namespace`; an empty namespace lists all.
    fn list(&self, kind: Kind, namespace: &str) -> Vec<Config>;

    /// Returns the new resource version.
    fn create(&self, config: Config) -> StoreResult<String>;

    fn update(&self, config: Config) -> StoreResult<String>;

    fn update_status(&self, config: Config) -> StoreResult<String>;

    fn patch(&self, orig: Config, patch: PatchFn) -> StoreResult<String>;

    fn delete(
        &self,
        kind: Kind,
        name: &str,
        namespace: &str,
        resource_version: Option<&str>,
    ) -> StoreResult<()>;

    fn register_event_handler(&self, kind: Kind, handler: EventHandler);

    /// Whether the store has observed its full initial state.
    fn has_synced(&self) -> bool;
}
