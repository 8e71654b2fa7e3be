//! Derived configuration rows and resource identities.
//!
//! A [`Config`] is what the controller serves: a resource's metadata plus
//! its (possibly composed) spec. [`ConfigKey`] identifies a resource across
//! kinds and hashes to a stable [`ConfigHash`] used by cache dependency
//! tracking.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::{
    VirtualService, VirtualServiceSpec, INTERNAL_ROUTE_SEMANTICS, ROUTE_SEMANTICS_GATEWAY,
};

/// Errors raised while parsing identities.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown kind: {0}")]
    UnknownKind(String),
}

/// Resource kinds the routing layer knows about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Kind {
    #[default]
    VirtualService,
    #[serde(rename = "HTTPRoute")]
    HttpRoute,
    #[serde(rename = "GRPCRoute")]
    GrpcRoute,
    #[serde(rename = "TCPRoute")]
    TcpRoute,
    #[serde(rename = "TLSRoute")]
    TlsRoute,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::VirtualService => "VirtualService",
            Kind::HttpRoute => "HTTPRoute",
            Kind::GrpcRoute => "GRPCRoute",
            Kind::TcpRoute => "TCPRoute",
            Kind::TlsRoute => "TLSRoute",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VirtualService" => Ok(Kind::VirtualService),
            "HTTPRoute" => Ok(Kind::HttpRoute),
            "GRPCRoute" => Ok(Kind::GrpcRoute),
            "TCPRoute" => Ok(Kind::TcpRoute),
            "TLSRoute" => Ok(Kind::TlsRoute),
            other => Err(ModelError::UnknownKind(other.to_string())),
        }
    }
}

// ── Identity ──────────────────────────────────────────────────────

/// Stable 64-bit hash of a [`ConfigKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConfigHash(pub u64);

impl fmt::Display for ConfigHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Identity of a resource: kind, name, and namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConfigKey {
    pub kind: Kind,
    pub name: String,
    pub namespace: String,
}

impl ConfigKey {
    pub fn new(kind: Kind, name: &str, namespace: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }

    /// Hash of this key. Derived from a SHA-256 digest, so it is stable
    /// across processes and builds.
    pub fn hash_code(&self) -> ConfigHash {
        let mut hasher = Sha256::new();
        hasher.update(self.kind.as_str().as_bytes());
        hasher.update(b"/");
        hasher.update(self.namespace.as_bytes());
        hasher.update(b"/");
        hasher.update(self.name.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        ConfigHash(u64::from_be_bytes(bytes))
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

// ── Config ────────────────────────────────────────────────────────

/// Metadata of a served config row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Meta {
    pub kind: Kind,
    pub name: String,
    pub namespace: String,
    /// DNS domain suffix used when qualifying short host names.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub domain: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    /// Unix timestamp (seconds).
    pub creation_timestamp: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uid: String,
    pub generation: i64,
}

/// A resolved routing config as served to the rest of the control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub meta: Meta,
    pub spec: VirtualServiceSpec,
}

impl Config {
    pub fn key(&self) -> ConfigKey {
        ConfigKey::new(self.meta.kind, &self.meta.name, &self.meta.namespace)
    }

    /// Whether this config was generated from gateway routes and carries
    /// their semantics.
    pub fn uses_gateway_semantics(&self) -> bool {
        self.meta
            .annotations
            .get(INTERNAL_ROUTE_SEMANTICS)
            .is_some_and(|v| v == ROUTE_SEMANTICS_GATEWAY)
    }
}

impl From<VirtualService> for Config {
    fn from(vs: VirtualService) -> Self {
        let VirtualService { metadata, spec } = vs;
        Config {
            meta: Meta {
                kind: Kind::VirtualService,
                name: metadata.name,
                namespace: metadata.namespace,
                domain: String::new(),
                labels: metadata.labels,
                annotations: metadata.annotations,
                resource_version: metadata.resource_version,
                creation_timestamp: metadata.creation_timestamp,
                uid: metadata.uid,
                generation: metadata.generation,
            },
            spec,
        }
    }
}
