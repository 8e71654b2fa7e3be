//! Delegate merging: splices delegate routes into a root resource.
//!
//! Each delegating route of a root is replaced, in place, by the delegate's
//! routes restricted to the delegating route's match conditions. Routes that
//! do not delegate pass through unchanged. No sorting happens here: output
//! order is root order, then delegate order within each spliced route.

use std::collections::BTreeMap;

use meshroute_core::{HttpMatchRequest, HttpRoute, NamespacedName, StringMatch, VirtualService};
use tracing::{debug, warn};

use crate::classify::is_root;
use crate::export_to::ResolvedDelegate;

/// Compose a root resource with its delegates.
///
/// Returns `None` when `root` is not a root (no hosts, or no delegating
/// route). `lookup` returns an owned delegate, so merging never touches
/// shared delegate state. A reference that cannot be found, or that is not
/// exported to the root's namespace, drops only the referencing route.
pub fn merge_virtual_service<F>(root: &VirtualService, lookup: F) -> Option<VirtualService>
where
    F: Fn(&NamespacedName) -> Option<ResolvedDelegate>,
{
    if root.spec.hosts.is_empty() || !is_root(&root.spec) {
        return None;
    }

    let mut merged = root.clone();
    let mut routes = Vec::with_capacity(merged.spec.http.len());

    for http in std::mem::take(&mut merged.spec.http) {
        let Some(delegate) = http.delegate.as_ref() else {
            routes.push(http);
            continue;
        };

        let namespace = if delegate.namespace.is_empty() {
            root.namespace()
        } else {
            delegate.namespace.as_str()
        };
        let key = NamespacedName::new(namespace, &delegate.name);

        let Some(resolved) = lookup(&key) else {
            warn!(
                delegate = %key,
                root = %root.key(),
                "delegate virtual service not found"
            );
            continue;
        };

        if !resolved.is_visible_to(root.namespace()) {
            warn!(
                delegate = %key,
                root = %root.key(),
                namespace = root.namespace(),
                "delegate virtual service is not exported to root namespace"
            );
            continue;
        }

        routes.extend(merge_http_routes(http, resolved.spec.http));
    }

    merged.spec.http = routes;

    if tracing::enabled!(tracing::Level::DEBUG) {
        if let Ok(json) = serde_json::to_string_pretty(&merged.spec) {
            debug!(root = %root.key(), spec = %json, "merged virtual service");
        }
    }

    Some(merged)
}

/// Merge a delegating route with the delegate's routes.
///
/// Delegate routes that conflict with the parent's match conditions, or that
/// delegate again, are dropped.
pub fn merge_http_routes(mut parent: HttpRoute, delegate_routes: Vec<HttpRoute>) -> Vec<HttpRoute> {
    parent.delegate = None;
    delegate_routes
        .into_iter()
        .filter_map(|sub| {
            if let Some(nested) = &sub.delegate {
                warn!(
                    parent = %parent.name,
                    route = %sub.name,
                    nested = %nested.name,
                    "nested delegation is not supported, dropping route"
                );
                return None;
            }
            merge_http_route(&parent, sub)
        })
        .collect()
}

fn merge_http_route(parent: &HttpRoute, mut sub: HttpRoute) -> Option<HttpRoute> {
    let Some(matches) = merge_match_requests(&parent.matches, std::mem::take(&mut sub.matches))
    else {
        warn!(
            parent = %parent.name,
            route = %sub.name,
            "delegate route match conflicts with parent, dropping route"
        );
        return None;
    };
    sub.matches = matches;
    sub.name = join_names(&parent.name, &sub.name);

    inherit(&mut sub.rewrite, &parent.rewrite);
    inherit(&mut sub.timeout, &parent.timeout);
    inherit(&mut sub.retries, &parent.retries);
    inherit(&mut sub.mirror, &parent.mirror);
    inherit(&mut sub.headers, &parent.headers);
    inherit(&mut sub.cors_policy, &parent.cors_policy);
    inherit(&mut sub.direct_response, &parent.direct_response);

    Some(sub)
}

/// Merge match conditions. `None` means the delegate route conflicts.
///
/// Every delegate condition must be compatible with at least one parent
/// condition; it is merged with each compatible one.
fn merge_match_requests(
    parent: &[HttpMatchRequest],
    delegate: Vec<HttpMatchRequest>,
) -> Option<Vec<HttpMatchRequest>> {
    if parent.is_empty() {
        return Some(delegate);
    }
    if delegate.is_empty() {
        return Some(parent.to_vec());
    }

    let mut out = Vec::new();
    for sub in &delegate {
        let mut found = false;
        for root in parent {
            if has_conflict(root, sub) {
                debug!(root = ?root, delegate = ?sub, "match requests conflict");
                continue;
            }
            out.push(merge_match_request(root, sub));
            found = true;
        }
        if !found {
            return None;
        }
    }
    Some(out)
}

fn merge_match_request(root: &HttpMatchRequest, delegate: &HttpMatchRequest) -> HttpMatchRequest {
    let mut out = delegate.clone();
    out.name = join_names(&root.name, &delegate.name);
    inherit(&mut out.uri, &root.uri);
    inherit(&mut out.scheme, &root.scheme);
    inherit(&mut out.method, &root.method);
    inherit(&mut out.authority, &root.authority);
    out.headers = union(&root.headers, &delegate.headers);
    out.without_headers = union(&root.without_headers, &delegate.without_headers);
    out.query_params = union(&root.query_params, &delegate.query_params);
    out.source_labels = union(&root.source_labels, &delegate.source_labels);
    if out.port == 0 {
        out.port = root.port;
    }
    if out.source_namespace.is_empty() {
        out.source_namespace = root.source_namespace.clone();
    }
    if out.gateways.is_empty() {
        out.gateways = root.gateways.clone();
    }
    out
}

/// Whether a delegate match condition falls outside the root condition.
fn has_conflict(root: &HttpMatchRequest, leaf: &HttpMatchRequest) -> bool {
    let pairs = [
        (&root.uri, &leaf.uri),
        (&root.scheme, &leaf.scheme),
        (&root.method, &leaf.method),
        (&root.authority, &leaf.authority),
    ];
    if pairs
        .iter()
        .any(|(r, l)| string_match_conflict(r.as_ref(), l.as_ref()))
    {
        return true;
    }

    let map_conflict = |roots: &BTreeMap<String, StringMatch>, leaves: &BTreeMap<String, StringMatch>| {
        leaves
            .iter()
            .any(|(key, leaf)| string_match_conflict(roots.get(key), Some(leaf)))
    };
    if map_conflict(&root.headers, &leaf.headers)
        || map_conflict(&root.without_headers, &leaf.without_headers)
        || map_conflict(&root.query_params, &leaf.query_params)
    {
        return true;
    }

    if root.ignore_uri_case != leaf.ignore_uri_case {
        return true;
    }
    if root.port > 0 && leaf.port > 0 && root.port != leaf.port {
        return true;
    }
    if !root.source_namespace.is_empty() && leaf.source_namespace != root.source_namespace {
        return true;
    }
    // Root labels must be a superset on shared keys.
    if leaf
        .source_labels
        .iter()
        .any(|(k, v)| root.source_labels.get(k).is_some_and(|rv| rv != v))
    {
        return true;
    }
    if !root.gateways.is_empty() && !leaf.gateways.is_empty() {
        if root.gateways.len() < leaf.gateways.len() {
            return true;
        }
        if leaf.gateways.iter().any(|gw| !root.gateways.contains(gw)) {
            return true;
        }
    }
    false
}

fn string_match_conflict(root: Option<&StringMatch>, leaf: Option<&StringMatch>) -> bool {
    let (Some(root), Some(leaf)) = (root, leaf) else {
        return false;
    };

    if root.regex().is_some()
        && (leaf.regex().is_some() || leaf.prefix().is_some() || leaf.exact().is_some())
    {
        return true;
    }
    if leaf.regex().is_some()
        && (root.regex().is_some() || root.prefix().is_some() || root.exact().is_some())
    {
        return true;
    }

    if let Some(exact) = root.exact() {
        if leaf.prefix().is_some() {
            return true;
        }
        return leaf.exact() != Some(exact);
    }

    if let Some(prefix) = root.prefix() {
        if let Some(p) = leaf.prefix() {
            return !p.starts_with(prefix);
        }
        if let Some(e) = leaf.exact() {
            return !e.starts_with(prefix);
        }
    }

    true
}

fn join_names(parent: &str, child: &str) -> String {
    match (parent.is_empty(), child.is_empty()) {
        (_, true) => parent.to_string(),
        (true, false) => child.to_string(),
        (false, false) => format!("{parent}-{child}"),
    }
}

fn inherit<T: Clone>(field: &mut Option<T>, parent: &Option<T>) {
    if field.is_none() {
        *field = parent.clone();
    }
}

fn union<V: Clone>(root: &BTreeMap<String, V>, child: &BTreeMap<String, V>) -> BTreeMap<String, V> {
    let mut out = root.clone();
    out.extend(child.iter().map(|(k, v)| (k.clone(), v.clone())));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashMap};

    use meshroute_core::{
        Delegate, Destination, HttpRewrite, HttpRouteDestination, ObjectMeta, PortSelector,
        VirtualServiceSpec, Visibility,
    };

    fn prefix(p: &str) -> HttpMatchRequest {
        HttpMatchRequest {
            uri: Some(StringMatch::Prefix(p.into())),
            ..Default::default()
        }
    }

    fn exact(p: &str) -> HttpMatchRequest {
        HttpMatchRequest {
            uri: Some(StringMatch::Exact(p.into())),
            ..Default::default()
        }
    }

    fn to(host: &str, subset: &str) -> Vec<HttpRouteDestination> {
        vec![HttpRouteDestination {
            destination: Destination {
                host: host.into(),
                subset: subset.into(),
                port: Some(PortSelector { number: 80 }),
            },
            ..Default::default()
        }]
    }

    fn delegating(matches: Vec<HttpMatchRequest>, name: &str, namespace: &str) -> HttpRoute {
        HttpRoute {
            matches,
            delegate: Some(Delegate {
                name: name.into(),
                namespace: namespace.into(),
            }),
            ..Default::default()
        }
    }

    fn vs(name: &str, namespace: &str, hosts: &[&str], http: Vec<HttpRoute>) -> VirtualService {
        VirtualService {
            metadata: ObjectMeta {
                name: name.into(),
                namespace: namespace.into(),
                ..Default::default()
            },
            spec: VirtualServiceSpec {
                hosts: hosts.iter().map(|h| h.to_string()).collect(),
                http,
                ..Default::default()
            },
        }
    }

    fn productpage_delegate(namespace: &str, export_to: &[&str]) -> VirtualService {
        let mut d = vs(
            "productpage-vs",
            namespace,
            &[],
            vec![
                HttpRoute {
                    matches: vec![prefix("/productpage/v1")],
                    route: to("productpage.org", "v1"),
                    ..Default::default()
                },
                HttpRoute {
                    matches: vec![prefix("/productpage/v2")],
                    route: to("productpage.org", "v2"),
                    ..Default::default()
                },
            ],
        );
        d.spec.export_to = export_to.iter().map(|e| e.to_string()).collect();
        d
    }

    /// Lookup over a fixed set of delegates.
    struct Delegates(HashMap<NamespacedName, ResolvedDelegate>);

    impl Delegates {
        fn new(vses: &[VirtualService], mesh_default: &[Visibility]) -> Self {
            let mesh_default: BTreeSet<Visibility> = mesh_default.iter().cloned().collect();
            Self(
                vses.iter()
                    .filter_map(|v| ResolvedDelegate::from_virtual_service(v, &mesh_default))
                    .map(|d| (d.key(), d))
                    .collect(),
            )
        }

        fn fetch(&self, key: &NamespacedName) -> Option<ResolvedDelegate> {
            self.0.get(key).cloned()
        }
    }

    #[test]
    fn splices_delegate_routes_in_order() {
        let root = vs(
            "root-vs",
            "istio-system",
            &["*.org"],
            vec![delegating(vec![prefix("/productpage")], "productpage-vs", "default")],
        );
        let delegates = Delegates::new(&[productpage_delegate("default", &[])], &[Visibility::Public]);

        let merged = merge_virtual_service(&root, |k| delegates.fetch(k)).unwrap();

        assert_eq!(merged.spec.http.len(), 2);
        assert_eq!(merged.spec.http[0].matches, vec![prefix("/productpage/v1")]);
        assert_eq!(merged.spec.http[0].route, to("productpage.org", "v1"));
        assert_eq!(merged.spec.http[1].matches, vec![prefix("/productpage/v2")]);
        assert!(merged.spec.http.iter().all(|r| r.delegate.is_none()));
        assert_eq!(merged.key(), root.key());
    }

    #[test]
    fn invisible_delegate_is_dropped() {
        let root = vs(
            "root-vs",
            "istio-system",
            &["*.org"],
            vec![delegating(vec![prefix("/productpage")], "productpage-vs", "default")],
        );
        let delegates = Delegates::new(&[productpage_delegate("default", &["."])], &[Visibility::Public]);

        let merged = merge_virtual_service(&root, |k| delegates.fetch(k)).unwrap();
        assert!(merged.spec.http.is_empty());
    }

    #[test]
    fn missing_delegate_keeps_unrelated_routes() {
        let plain = HttpRoute {
            route: to("example.org", ""),
            ..Default::default()
        };
        let root = vs(
            "root-vs",
            "istio-system",
            &["*.org"],
            vec![
                plain.clone(),
                delegating(vec![prefix("/gone")], "missing", "default"),
                plain.clone(),
            ],
        );

        let merged = merge_virtual_service(&root, |_| None).unwrap();
        assert_eq!(merged.spec.http, vec![plain.clone(), plain]);
    }

    #[test]
    fn shared_delegate_is_not_mutated() {
        let single = vs(
            "productpage-vs",
            "default",
            &[],
            vec![HttpRoute {
                route: to("productpage.org", "v1"),
                ..Default::default()
            }],
        );
        let mut legacy = delegating(vec![prefix("/legacy/path")], "productpage-vs", "default");
        legacy.rewrite = Some(HttpRewrite {
            uri: "/productpage".into(),
            ..Default::default()
        });
        let root = vs(
            "root-vs",
            "istio-system",
            &["*.org"],
            vec![
                delegating(vec![prefix("/productpage")], "productpage-vs", "default"),
                legacy,
            ],
        );
        let delegates = Delegates::new(std::slice::from_ref(&single), &[Visibility::Public]);
        let before = delegates.fetch(&single.key()).unwrap();

        let merged = merge_virtual_service(&root, |k| delegates.fetch(k)).unwrap();

        assert_eq!(merged.spec.http.len(), 2);
        assert_eq!(merged.spec.http[0].matches, vec![prefix("/productpage")]);
        assert_eq!(merged.spec.http[0].rewrite, None);
        assert_eq!(merged.spec.http[1].matches, vec![prefix("/legacy/path")]);
        assert_eq!(
            merged.spec.http[1].rewrite.as_ref().map(|r| r.uri.as_str()),
            Some("/productpage")
        );
        assert_eq!(delegates.fetch(&single.key()).unwrap(), before);
    }

    #[test]
    fn conflicting_sub_route_is_dropped_alone() {
        let parent = delegating(vec![prefix("/productpage"), exact("/login")], "d", "");
        let subs = vec![
            HttpRoute {
                matches: vec![prefix("/productpage/v1")],
                ..Default::default()
            },
            HttpRoute {
                matches: vec![prefix("/mis-match/path")],
                ..Default::default()
            },
            HttpRoute::default(),
        ];

        let merged = merge_http_routes(parent, subs);

        assert_eq!(merged.len(), 2);
        // Only the compatible parent condition survives the pairing.
        assert_eq!(merged[0].matches, vec![prefix("/productpage/v1")]);
        // A sub-route without conditions inherits all of the parent's.
        assert_eq!(merged[1].matches, vec![prefix("/productpage"), exact("/login")]);
    }

    #[test]
    fn nested_delegation_is_dropped() {
        let parent = delegating(vec![prefix("/a")], "d", "");
        let subs = vec![
            delegating(vec![prefix("/a/b")], "deeper", ""),
            HttpRoute {
                matches: vec![prefix("/a/c")],
                ..Default::default()
            },
        ];
        let merged = merge_http_routes(parent, subs);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].matches, vec![prefix("/a/c")]);
        assert!(merged[0].delegate.is_none());
    }

    #[test]
    fn names_and_headers_are_joined() {
        let mut root_match = prefix("/api");
        root_match.name = "api".into();
        root_match
            .headers
            .insert("x-env".into(), StringMatch::Exact("prod".into()));
        let mut parent = delegating(vec![root_match], "d", "");
        parent.name = "root".into();
        parent.timeout = Some("5s".into());

        let mut sub_match = prefix("/api/users");
        sub_match.name = "users".into();
        sub_match
            .headers
            .insert("x-user".into(), StringMatch::Prefix("u-".into()));
        let sub = HttpRoute {
            name: "users".into(),
            matches: vec![sub_match],
            timeout: Some("1s".into()),
            ..Default::default()
        };

        let merged = merge_http_routes(parent, vec![sub]);
        assert_eq!(merged.len(), 1);
        let route = &merged[0];
        assert_eq!(route.name, "root-users");
        assert_eq!(route.timeout.as_deref(), Some("1s"));
        assert_eq!(route.matches[0].name, "api-users");
        assert_eq!(route.matches[0].headers.len(), 2);
    }

    #[test]
    fn string_match_rules() {
        let p = |s: &str| StringMatch::Prefix(s.into());
        let e = |s: &str| StringMatch::Exact(s.into());
        let r = |s: &str| StringMatch::Regex(s.into());

        assert!(!string_match_conflict(None, Some(&p("/a"))));
        assert!(!string_match_conflict(Some(&p("/a")), None));
        assert!(!string_match_conflict(Some(&p("/a")), Some(&p("/a/b"))));
        assert!(string_match_conflict(Some(&p("/a/b")), Some(&p("/a"))));
        assert!(!string_match_conflict(Some(&p("/a")), Some(&e("/a/x"))));
        assert!(string_match_conflict(Some(&e("/a")), Some(&p("/a"))));
        assert!(!string_match_conflict(Some(&e("/a")), Some(&e("/a"))));
        assert!(string_match_conflict(Some(&e("/a")), Some(&e("/b"))));
        assert!(string_match_conflict(Some(&r(".*")), Some(&p("/a"))));
        assert!(string_match_conflict(Some(&p("/a")), Some(&r(".*"))));
    }

    #[test]
    fn port_and_gateway_conflicts() {
        let mut root = prefix("/");
        root.port = 80;
        root.gateways = vec!["istio-system/gw".into()];

        let mut leaf = prefix("/x");
        leaf.port = 8080;
        assert!(has_conflict(&root, &leaf));

        leaf.port = 80;
        assert!(!has_conflict(&root, &leaf));

        leaf.gateways = vec!["istio-system/gw".into(), "other/gw".into()];
        assert!(has_conflict(&root, &leaf));
    }

    #[test]
    fn non_root_yields_nothing() {
        let standalone = vs(
            "web",
            "default",
            &["web.org"],
            vec![HttpRoute {
                route: to("web.org", ""),
                ..Default::default()
            }],
        );
        assert!(merge_virtual_service(&standalone, |_| None).is_none());

        let delegate = productpage_delegate("default", &[]);
        assert!(merge_virtual_service(&delegate, |_| None).is_none());
    }

    #[test]
    fn merge_is_deterministic() {
        let root = vs(
            "root-vs",
            "istio-system",
            &["*.org"],
            vec![delegating(vec![prefix("/productpage")], "productpage-vs", "default")],
        );
        let delegates = Delegates::new(&[productpage_delegate("default", &[])], &[Visibility::Public]);
        let first = merge_virtual_service(&root, |k| delegates.fetch(k)).unwrap();
        let second = merge_virtual_service(&root, |k| delegates.fetch(k)).unwrap();
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }
}
