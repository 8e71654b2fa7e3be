//! Resource classification.

use meshroute_core::{NamespacedName, VirtualService, VirtualServiceSpec};

/// Role a routing resource plays in delegation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// No hosts: a reusable route fragment.
    Delegate,
    /// Hosts plus at least one route that references a delegate.
    Root,
    /// Hosts and no delegate references.
    Standalone,
}

/// Classify a resource spec. Total over all inputs.
pub fn classify(spec: &VirtualServiceSpec) -> Classification {
    if spec.hosts.is_empty() {
        Classification::Delegate
    } else if is_root(spec) {
        Classification::Root
    } else {
        Classification::Standalone
    }
}

/// Whether any route references a delegate, regardless of hosts.
pub fn is_root(spec: &VirtualServiceSpec) -> bool {
    spec.http.iter().any(|route| route.delegate.is_some())
}

/// Delegates referenced by a resource, in route order, with the namespace
/// defaulted to the resource's own.
pub fn delegate_references(vs: &VirtualService) -> Vec<NamespacedName> {
    vs.spec
        .http
        .iter()
        .filter_map(|route| route.delegate.as_ref())
        .map(|delegate| {
            let namespace = if delegate.namespace.is_empty() {
                vs.namespace()
            } else {
                delegate.namespace.as_str()
            };
            NamespacedName::new(namespace, &delegate.name)
        })
        .collect()
}
