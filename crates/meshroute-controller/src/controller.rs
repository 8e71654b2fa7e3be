//! Virtual service controller: the resolution pipeline.
//!
//! Raw resources are split into delegates, roots and standalone resources.
//! Delegates are resolved against the mesh default export scope, roots are
//! composed with the delegates they reference, and standalone resources are
//! served as-is. Both served views have their short names qualified.
//!
//! Recomputation is incremental. A batch of events recomputes:
//! - delegates whose input changed, plus every delegate without an explicit
//!   `exportTo` when the mesh default changed;
//! - roots whose input changed, plus roots that reference a delegate whose
//!   resolved row changed (found or not, per the dependency index);
//! - standalone rows whose input changed.
//!
//! Effective changes in both served views are coalesced into one full push
//! request per batch.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use meshroute_core::config::MeshConfig;
use meshroute_core::{
    Config, ConfigKey, Kind, MeshrouteConfig, NamespacedName, PushRequest, TriggerReason,
    VirtualService, Visibility, XdsUpdater, REVISION_LABEL,
};
use meshroute_delegate::{
    classify, delegate_references, merge_virtual_service, Classification, ResolvedDelegate,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::collection::{Collection, Event};
use crate::error::{StoreError, StoreResult};
use crate::shortname::resolve_virtual_service_shortnames;
use crate::store::{ConfigStore, EventHandler, PatchFn};

/// A change observed by the upstream resource watch.
#[derive(Debug, Clone)]
pub enum ResourceEvent {
    Upsert(VirtualService),
    Delete(NamespacedName),
    /// New mesh-wide settings.
    MeshConfig(MeshConfig),
    /// The watch has delivered its initial state.
    Synced,
}

/// Controller construction options.
#[derive(Clone, Default)]
pub struct ControllerOptions {
    /// Revision the controller runs under.
    pub revision: Option<String>,
    /// Domain suffix used to qualify short host names.
    pub domain_suffix: Option<String>,
    /// Initial mesh settings.
    pub mesh: MeshConfig,
    pub xds_updater: Option<Arc<dyn XdsUpdater>>,
}

impl ControllerOptions {
    pub fn from_config(config: &MeshrouteConfig) -> Self {
        Self {
            revision: config.controller.revision.clone(),
            domain_suffix: config.controller.domain_suffix.clone(),
            mesh: config.mesh.clone(),
            xds_updater: None,
        }
    }

    pub fn with_xds_updater(mut self, updater: Arc<dyn XdsUpdater>) -> Self {
        self.xds_updater = Some(updater);
        self
    }
}

// ── Dependency index ──────────────────────────────────────────────

#[derive(Debug, Default)]
struct DependencyIndex {
    /// Delegate → roots referencing it.
    dependents: BTreeMap<NamespacedName, BTreeSet<NamespacedName>>,
    /// Root → delegates it references, in route order.
    references: BTreeMap<NamespacedName, Vec<NamespacedName>>,
}

impl DependencyIndex {
    fn set(&mut self, root: &NamespacedName, delegates: Vec<NamespacedName>) {
        self.remove(root);
        if delegates.is_empty() {
            return;
        }
        for delegate in &delegates {
            self.dependents
                .entry(delegate.clone())
                .or_default()
                .insert(root.clone());
        }
        self.references.insert(root.clone(), delegates);
    }

    fn remove(&mut self, root: &NamespacedName) {
        let Some(delegates) = self.references.remove(root) else {
            return;
        };
        for delegate in delegates {
            if let Some(roots) = self.dependents.get_mut(&delegate) {
                roots.remove(root);
                if roots.is_empty() {
                    self.dependents.remove(&delegate);
                }
            }
        }
    }

    fn dependents_of(&self, delegate: &NamespacedName) -> impl Iterator<Item = &NamespacedName> {
        self.dependents.get(delegate).into_iter().flatten()
    }
}

struct PipelineState {
    mesh_default: BTreeSet<Visibility>,
    index: DependencyIndex,
}

// ── Controller ────────────────────────────────────────────────────

/// Resolves routing resources and serves the result as a read-only store.
pub struct Controller {
    revision: Option<String>,
    domain: String,
    inputs: Collection<NamespacedName, VirtualService>,
    delegates: Collection<NamespacedName, ResolvedDelegate>,
    merged: Collection<NamespacedName, Config>,
    standard: Collection<NamespacedName, Config>,
    xds_updater: Option<Arc<dyn XdsUpdater>>,
    state: Mutex<PipelineState>,
}

impl Controller {
    pub fn new(options: ControllerOptions) -> Self {
        Self {
            revision: options.revision.filter(|r| !r.is_empty()),
            domain: options.domain_suffix.unwrap_or_default(),
            inputs: Collection::new("VirtualServices"),
            delegates: Collection::new("DelegateVirtualServices"),
            merged: Collection::new("MergedVirtualServices"),
            standard: Collection::new("StandardVirtualServices"),
            xds_updater: options.xds_updater,
            state: Mutex::new(PipelineState {
                mesh_default: options.mesh.default_export_to(),
                index: DependencyIndex::default(),
            }),
        }
    }

    /// Apply one batch of upstream events.
    ///
    /// Rows are updated under the pipeline lock. Collection handlers and the
    /// push collaborator run after it is released, so they may read the
    /// controller.
    pub fn apply(&self, events: Vec<ResourceEvent>) {
        let mut state = self.state.lock().expect("controller state lock");

        let mut input_changes = Vec::with_capacity(events.len());
        let mut mesh_changed = false;
        let mut synced = false;
        for event in events {
            match event {
                ResourceEvent::Upsert(vs) => {
                    let key = vs.key();
                    if self.in_revision(&vs) {
                        input_changes.push((key, Some(vs)));
                    } else {
                        debug!(resource = %key, "ignoring resource outside controller revision");
                        input_changes.push((key, None));
                    }
                }
                ResourceEvent::Delete(key) => input_changes.push((key, None)),
                ResourceEvent::MeshConfig(mesh) => {
                    let default = mesh.default_export_to();
                    if default != state.mesh_default {
                        info!(scopes = default.len(), "default export scope changed");
                        state.mesh_default = default;
                        mesh_changed = true;
                    }
                }
                ResourceEvent::Synced => synced = true,
            }
        }

        let input_events = self.inputs.apply_deferred(input_changes);
        let changed: BTreeSet<NamespacedName> =
            input_events.iter().map(|e| e.latest().key()).collect();

        // Delegates.
        let mut delegate_keys = changed.clone();
        if mesh_changed {
            delegate_keys.extend(
                self.inputs
                    .list()
                    .iter()
                    .filter(|vs| vs.spec.hosts.is_empty() && vs.spec.export_to.is_empty())
                    .map(VirtualService::key),
            );
        }
        let delegate_changes = delegate_keys
            .into_iter()
            .map(|key| {
                let row = self
                    .inputs
                    .get(&key)
                    .and_then(|vs| ResolvedDelegate::from_virtual_service(&vs, &state.mesh_default));
                (key, row)
            })
            .collect();
        let delegate_events = self.delegates.apply_deferred(delegate_changes);

        // Roots.
        let mut root_keys = changed.clone();
        for event in &delegate_events {
            root_keys.extend(state.index.dependents_of(&event.latest().key()).cloned());
        }
        let mut merged_changes = Vec::with_capacity(root_keys.len());
        for key in root_keys {
            let input = self.inputs.get(&key);
            match input {
                Some(vs) if classify(&vs.spec) == Classification::Root => {
                    state.index.set(&key, delegate_references(&vs));
                    let row = merge_virtual_service(&vs, |delegate| self.delegates.get(delegate))
                        .map(|merged| self.to_config(merged));
                    merged_changes.push((key, row));
                }
                _ => {
                    state.index.remove(&key);
                    merged_changes.push((key, None));
                }
            }
        }
        let merged_events = self.merged.apply_deferred(merged_changes);

        // Standalone resources.
        let standard_changes = changed
            .into_iter()
            .map(|key| {
                let row = self
                    .inputs
                    .get(&key)
                    .filter(|vs| classify(&vs.spec) == Classification::Standalone)
                    .map(|vs| self.to_config(vs));
                (key, row)
            })
            .collect();
        let standard_events = self.standard.apply_deferred(standard_changes);

        drop(state);

        debug!(
            inputs = input_events.len(),
            delegates = delegate_events.len(),
            merged = merged_events.len(),
            standard = standard_events.len(),
            "applied resource batch"
        );

        self.inputs.notify(&input_events);
        self.delegates.notify(&delegate_events);
        self.merged.notify(&merged_events);
        self.standard.notify(&standard_events);

        let served: Vec<Event<Config>> = merged_events.into_iter().chain(standard_events).collect();
        xds_push(self.xds_updater.as_deref(), &served);

        if synced {
            self.mark_synced();
        }
    }

    /// Drain events in batches until shutdown or until the stream closes.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<ResourceEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(revision = self.revision.as_deref().unwrap_or(""), "virtual service controller started");

        loop {
            tokio::select! {
                received = events.recv() => {
                    let Some(first) = received else {
                        info!("resource event stream closed");
                        break;
                    };
                    let mut batch = vec![first];
                    while let Ok(next) = events.try_recv() {
                        batch.push(next);
                    }
                    self.apply(batch);
                }
                _ = shutdown.changed() => {
                    info!("virtual service controller shutting down");
                    break;
                }
            }
        }
    }

    /// Delegates a root references, whether or not they currently resolve.
    pub fn delegates_of(&self, root: &NamespacedName) -> Vec<NamespacedName> {
        let state = self.state.lock().expect("controller state lock");
        state.index.references.get(root).cloned().unwrap_or_default()
    }

    /// The resolved delegate stored under `key`.
    pub fn resolved_delegate(&self, key: &NamespacedName) -> Option<ResolvedDelegate> {
        self.delegates.get(key)
    }

    fn in_revision(&self, vs: &VirtualService) -> bool {
        match (vs.metadata.labels.get(REVISION_LABEL), &self.revision) {
            (Some(label), Some(revision)) => label == revision,
            _ => true,
        }
    }

    fn to_config(&self, vs: VirtualService) -> Config {
        let mut config = Config::from(vs);
        config.meta.domain = self.domain.clone();
        resolve_virtual_service_shortnames(config)
    }

    fn mark_synced(&self) {
        self.inputs.mark_synced();
        self.delegates.mark_synced();
        self.merged.mark_synced();
        self.standard.mark_synced();
        info!(
            merged = self.merged.len(),
            standard = self.standard.len(),
            "virtual service controller synced"
        );
    }
}

/// Forward the identities touched by `events` as one full push request.
/// Nothing is sent for an empty batch.
fn xds_push(updater: Option<&dyn XdsUpdater>, events: &[Event<Config>]) {
    let Some(updater) = updater else {
        return;
    };

    let configs_updated: BTreeSet<ConfigKey> = events
        .iter()
        .map(|event| {
            let config = event.latest();
            ConfigKey::new(Kind::VirtualService, &config.meta.name, &config.meta.namespace)
        })
        .collect();
    if configs_updated.is_empty() {
        return;
    }

    debug!(configs = configs_updated.len(), "requesting full push");
    updater.config_update(PushRequest::full(configs_updated, TriggerReason::ConfigUpdate));
}

/// Sort ascending by creation time, then name, then namespace.
pub fn sort_configs_by_creation_time(configs: &mut [Config]) {
    configs.sort_by(|a, b| {
        a.meta
            .creation_timestamp
            .cmp(&b.meta.creation_timestamp)
            .then_with(|| a.meta.name.cmp(&b.meta.name))
            .then_with(|| a.meta.namespace.cmp(&b.meta.namespace))
    });
}

// ── Config store ──────────────────────────────────────────────────

impl ConfigStore for Controller {
    fn schemas(&self) -> Vec<Kind> {
        vec![Kind::VirtualService]
    }

    fn get(&self, _kind: Kind, _name: &str, _namespace: &str) -> Option<Config> {
        None
    }

    fn list(&self, kind: Kind, namespace: &str) -> Vec<Config> {
        if kind != Kind::VirtualService {
            return Vec::new();
        }

        let mut out = self.standard.list();
        out.extend(self.merged.list());
        if !namespace.is_empty() {
            out.retain(|c| c.meta.namespace == namespace);
        }
        sort_configs_by_creation_time(&mut out);
        out
    }

    fn create(&self, _config: Config) -> StoreResult<String> {
        Err(StoreError::Unsupported)
    }

    fn update(&self, _config: Config) -> StoreResult<String> {
        Err(StoreError::Unsupported)
    }

    fn update_status(&self, _config: Config) -> StoreResult<String> {
        Err(StoreError::Unsupported)
    }

    fn patch(&self, _orig: Config, _patch: PatchFn) -> StoreResult<String> {
        Err(StoreError::Unsupported)
    }

    fn delete(
        &self,
        _kind: Kind,
        _name: &str,
        _namespace: &str,
        _resource_version: Option<&str>,
    ) -> StoreResult<()> {
        Err(StoreError::Unsupported)
    }

    fn register_event_handler(&self, kind: Kind, _handler: EventHandler) {
        debug!(%kind, "ignoring event handler registration on derived view");
    }

    fn has_synced(&self) -> bool {
        self.merged.has_synced() && self.standard.has_synced()
    }
}
