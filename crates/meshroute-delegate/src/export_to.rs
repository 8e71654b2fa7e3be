//! Export scope resolution for delegate resources.
//!
//! A delegate is visible to a root when its resolved scope set contains
//! `Public` or the root's namespace. Private (`.`) entries, whether declared
//! on the resource or inherited from the mesh default, are replaced by the
//! delegate's own namespace.

use std::collections::BTreeSet;

use meshroute_core::{NamespacedName, VirtualService, VirtualServiceSpec, Visibility};
use serde::{Deserialize, Serialize};

/// Resolved export scopes of a delegate. Never contains `Private`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSet(BTreeSet<Visibility>);

impl ScopeSet {
    pub fn contains(&self, scope: &Visibility) -> bool {
        self.0.contains(scope)
    }

    /// Whether a consumer in `namespace` may reference the owner.
    pub fn is_visible_to(&self, namespace: &str) -> bool {
        self.0.contains(&Visibility::Public)
            || self.0.contains(&Visibility::Namespace(namespace.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Visibility> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const N: usize> From<[Visibility; N]> for ScopeSet {
    fn from(scopes: [Visibility; N]) -> Self {
        ScopeSet(BTreeSet::from(scopes))
    }
}

/// Resolve the export scopes of `vs`.
///
/// An explicit `exportTo` wins; otherwise `mesh_default` applies. An empty
/// mesh default falls back to public, so the result is never empty.
pub fn resolve_export_to(vs: &VirtualService, mesh_default: &BTreeSet<Visibility>) -> ScopeSet {
    let own_namespace = || Visibility::Namespace(vs.namespace().to_string());
    let substitute = |v: Visibility| match v {
        Visibility::Private => own_namespace(),
        other => other,
    };

    let scopes: BTreeSet<Visibility> = if !vs.spec.export_to.is_empty() {
        vs.spec
            .export_to
            .iter()
            .map(|e| substitute(Visibility::from(e.as_str())))
            .collect()
    } else if !mesh_default.is_empty() {
        mesh_default.iter().cloned().map(substitute).collect()
    } else {
        BTreeSet::from([Visibility::Public])
    };

    ScopeSet(scopes)
}

/// A delegate resource with its export scopes resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDelegate {
    pub name: String,
    pub namespace: String,
    pub spec: VirtualServiceSpec,
    pub export_to: ScopeSet,
}

impl ResolvedDelegate {
    /// Resolve `vs` as a delegate. Returns `None` for resources with hosts,
    /// which are roots or standalone resources.
    pub fn from_virtual_service(
        vs: &VirtualService,
        mesh_default: &BTreeSet<Visibility>,
    ) -> Option<Self> {
        if !vs.spec.hosts.is_empty() {
            return None;
        }
        Some(Self {
            name: vs.name().to_string(),
            namespace: vs.namespace().to_string(),
            spec: vs.spec.clone(),
            export_to: resolve_export_to(vs, mesh_default),
        })
    }

    pub fn key(&self) -> NamespacedName {
        NamespacedName::new(&self.namespace, &self.name)
    }

    pub fn is_visible_to(&self, namespace: &str) -> bool {
        self.export_to.is_visible_to(namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshroute_core::ObjectMeta;

    fn delegate(namespace: &str, export_to: &[&str]) -> VirtualService {
        VirtualService {
            metadata: ObjectMeta {
                name: "productpage-vs".into(),
                namespace: namespace.into(),
                ..Default::default()
            },
            spec: VirtualServiceSpec {
                export_to: export_to.iter().map(|e| e.to_string()).collect(),
                ..Default::default()
            },
        }
    }

    fn ns(name: &str) -> Visibility {
        Visibility::Namespace(name.to_string())
    }

    #[test]
    fn explicit_private_maps_to_own_namespace() {
        let scopes = resolve_export_to(&delegate("default2", &["."]), &BTreeSet::new());
        assert_eq!(scopes, ScopeSet::from([ns("default2")]));
        assert!(scopes.is_visible_to("default2"));
        assert!(!scopes.is_visible_to("istio-system"));
    }

    #[test]
    fn explicit_list_ignores_mesh_default() {
        let mesh_default = BTreeSet::from([Visibility::Public]);
        let scopes = resolve_export_to(&delegate("default", &["istio-system"]), &mesh_default);
        assert_eq!(scopes, ScopeSet::from([ns("istio-system")]));
    }

    #[test]
    fn inherits_mesh_default_with_private_substitution() {
        let mesh_default = BTreeSet::from([Visibility::Private, ns("ops")]);
        let scopes = resolve_export_to(&delegate("default", &[]), &mesh_default);
        assert_eq!(scopes, ScopeSet::from([ns("default"), ns("ops")]));
    }

    #[test]
    fn falls_back_to_public_without_any_default() {
        let scopes = resolve_export_to(&delegate("default", &[]), &BTreeSet::new());
        assert_eq!(scopes, ScopeSet::from([Visibility::Public]));
        assert!(scopes.is_visible_to("anywhere"));
    }

    #[test]
    fn duplicates_collapse() {
        let scopes = resolve_export_to(&delegate("default", &[".", "default", "*"]), &BTreeSet::new());
        assert_eq!(scopes.len(), 2);
        assert!(scopes.contains(&Visibility::Public));
    }

    #[test]
    fn resolution_is_idempotent() {
        let mesh_default = BTreeSet::from([Visibility::Private]);
        let vs = delegate("default", &[]);
        assert_eq!(
            resolve_export_to(&vs, &mesh_default),
            resolve_export_to(&vs, &mesh_default)
        );
    }

    #[test]
    fn resources_with_hosts_are_not_delegates() {
        let mut vs = delegate("default", &[]);
        vs.spec.hosts = vec!["a.org".into()];
        assert!(ResolvedDelegate::from_virtual_service(&vs, &BTreeSet::new()).is_none());
    }
}
