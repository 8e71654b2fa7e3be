//! Routing resource types as delivered by the resource watch.
//!
//! These types mirror the user-authored `VirtualService` resource. Every map
//! is a `BTreeMap` so that a serialized resource is canonical; the route
//! cache relies on that for content-addressed keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Label binding a resource to a control plane revision.
pub const REVISION_LABEL: &str = "istio.io/rev";

/// Annotation marking a generated resource that carries gateway route semantics.
pub const INTERNAL_ROUTE_SEMANTICS: &str = "internal.istio.io/route-semantics";

/// Value of [`INTERNAL_ROUTE_SEMANTICS`] for translated gateway routes.
pub const ROUTE_SEMANTICS_GATEWAY: &str = "gateway";

/// Annotation listing the parent routes a generated resource was translated from.
pub const INTERNAL_PARENT_NAMES: &str = "internal.istio.io/parents";

/// Gateway name that binds a route to the sidecar mesh rather than a gateway.
pub const MESH_GATEWAY: &str = "mesh";

// ── Metadata ──────────────────────────────────────────────────────

/// Resource metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uid: String,
    pub generation: i64,
    /// Unix timestamp (seconds) when the resource was created. Zero if unknown.
    pub creation_timestamp: u64,
}

// ── VirtualService ────────────────────────────────────────────────

/// A user-authored HTTP routing resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualService {
    pub metadata: ObjectMeta,
    pub spec: VirtualServiceSpec,
}

impl VirtualService {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    /// `namespace/name` identity of this resource.
    pub fn key(&self) -> NamespacedName {
        NamespacedName::new(&self.metadata.namespace, &self.metadata.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualServiceSpec {
    /// Destination hosts this resource applies to. Empty for delegates.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gateways: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub http: Vec<HttpRoute>,
    /// Namespaces this resource is visible to (`*`, `.`, or a namespace).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub export_to: Vec<String>,
}

/// `namespace/name` pair identifying a resource within its kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl std::fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// ── Routes ────────────────────────────────────────────────────────

/// One HTTP route rule: match conditions plus either destinations or a delegate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpRoute {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "match", skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<HttpMatchRequest>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub route: Vec<HttpRouteDestination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegate: Option<Delegate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewrite: Option<HttpRewrite>,
    /// Request timeout, e.g. `"5s"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<HttpRetry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirror: Option<Destination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cors_policy: Option<CorsPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_response: Option<HttpDirectResponse>,
}

/// Match conditions for a route. All set fields must match (logical AND).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpMatchRequest {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<StringMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<StringMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<StringMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authority: Option<StringMatch>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, StringMatch>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub without_headers: BTreeMap<String, StringMatch>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub query_params: BTreeMap<String, StringMatch>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ignore_uri_case: bool,
    /// Listener port restriction. Zero means any port.
    #[serde(skip_serializing_if = "is_zero")]
    pub port: u32,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub source_labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source_namespace: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gateways: Vec<String>,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

/// String comparison used by match conditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StringMatch {
    Exact(String),
    Prefix(String),
    Regex(String),
}

impl StringMatch {
    /// The exact value, if this is a non-empty exact match.
    pub fn exact(&self) -> Option<&str> {
        match self {
            StringMatch::Exact(v) if !v.is_empty() => Some(v),
            _ => None,
        }
    }

    /// The prefix value, if this is a non-empty prefix match.
    pub fn prefix(&self) -> Option<&str> {
        match self {
            StringMatch::Prefix(v) if !v.is_empty() => Some(v),
            _ => None,
        }
    }

    /// The regex, if this is a non-empty regex match.
    pub fn regex(&self) -> Option<&str> {
        match self {
            StringMatch::Regex(v) if !v.is_empty() => Some(v),
            _ => None,
        }
    }
}

/// A weighted destination for routed traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpRouteDestination {
    pub destination: Destination,
    #[serde(skip_serializing_if = "is_zero_weight")]
    pub weight: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
}

fn is_zero_weight(v: &i32) -> bool {
    *v == 0
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Destination {
    pub host: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub subset: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<PortSelector>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSelector {
    pub number: u32,
}

/// Reference from a route to a delegate resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Delegate {
    pub name: String,
    /// Defaults to the referencing resource's namespace when empty.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpRewrite {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uri: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub authority: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpRetry {
    pub attempts: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_try_timeout: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub retry_on: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Headers {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<HeaderOperations>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<HeaderOperations>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderOperations {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub add: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CorsPolicy {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allow_origins: Vec<StringMatch>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allow_methods: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allow_headers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expose_headers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_credentials: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpDirectResponse {
    pub status: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_istio_shaped_json() {
        let json = r#"{
            "metadata": {"name": "root-vs", "namespace": "istio-system", "creationTimestamp": 10},
            "spec": {
                "hosts": ["*.org"],
                "gateways": ["istio-system/gateway"],
                "http": [{
                    "match": [{"uri": {"prefix": "/productpage"}}],
                    "delegate": {"name": "productpage-vs", "namespace": "default"}
                }]
            }
        }"#;
        let vs: VirtualService = serde_json::from_str(json).unwrap();
        assert_eq!(vs.key().to_string(), "istio-system/root-vs");
        assert_eq!(vs.metadata.creation_timestamp, 10);
        let route = &vs.spec.http[0];
        assert_eq!(
            route.matches[0].uri,
            Some(StringMatch::Prefix("/productpage".to_string()))
        );
        assert_eq!(route.delegate.as_ref().unwrap().name, "productpage-vs");
    }

    #[test]
    fn empty_string_matches_count_as_unset() {
        assert_eq!(StringMatch::Prefix(String::new()).prefix(), None);
        assert_eq!(StringMatch::Exact("/a".into()).exact(), Some("/a"));
        assert_eq!(StringMatch::Exact("/a".into()).prefix(), None);
    }

    #[test]
    fn export_to_uses_camel_case() {
        let vs = VirtualService {
            metadata: ObjectMeta {
                name: "d".into(),
                namespace: "default".into(),
                ..Default::default()
            },
            spec: VirtualServiceSpec {
                export_to: vec![".".into()],
                ..Default::default()
            },
        };
        let json = serde_json::to_string(&vs).unwrap();
        assert!(json.contains("\"exportTo\":[\".\"]"));
    }
}
