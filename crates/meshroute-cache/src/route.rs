//! Cache key for route configuration generated for one listener port.

use meshroute_core::{Config, ConfigHash, ConfigKey, Kind, INTERNAL_PARENT_NAMES};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::cache::CacheEntry;

/// Inputs a route configuration was generated from.
#[derive(Debug, Clone, Default)]
pub struct RouteCache {
    pub listener_port: u16,
    /// Resolved configs (merged roots and standalone resources) bound to the port.
    pub virtual_services: Vec<Config>,
    /// Hashes of delegate resources the configs were composed from.
    pub delegate_virtual_services: Vec<ConfigHash>,
}

impl CacheEntry for RouteCache {
    /// Hex SHA-256 over the port, the config contents, and the delegate
    /// hashes. Config and delegate ordering does not affect the key.
    fn key(&self) -> String {
        let mut config_digests: Vec<[u8; 32]> =
            self.virtual_services.iter().map(config_digest).collect();
        config_digests.sort_unstable();

        let mut delegates = self.delegate_virtual_services.clone();
        delegates.sort_unstable();
        delegates.dedup();

        let mut hasher = Sha256::new();
        hasher.update(self.listener_port.to_be_bytes());
        hasher.update((config_digests.len() as u64).to_be_bytes());
        for digest in &config_digests {
            hasher.update(digest);
        }
        hasher.update((delegates.len() as u64).to_be_bytes());
        for hash in &delegates {
            hasher.update(hash.0.to_be_bytes());
        }
        hex::encode(hasher.finalize())
    }

    fn dependent_configs(&self) -> Vec<ConfigHash> {
        let mut configs = Vec::with_capacity(
            self.virtual_services.len() + self.delegate_virtual_services.len(),
        );
        for vs in &self.virtual_services {
            configs.extend(
                virtual_service_dependencies(vs)
                    .iter()
                    .map(ConfigKey::hash_code),
            );
        }
        configs.extend(self.delegate_virtual_services.iter().copied());
        configs
    }
}

fn config_digest(config: &Config) -> [u8; 32] {
    let bytes = serde_json::to_vec(config)
        .expect("config serialization is infallible: all maps are string-keyed");
    Sha256::digest(&bytes).into()
}

/// Identities a config's cached output depends on.
///
/// A config generated from gateway routes depends on the parent routes
/// listed in its `internal.istio.io/parents` annotation
/// (`Kind/name.namespace,...`). Any other config depends on itself.
pub fn virtual_service_dependencies(config: &Config) -> Vec<ConfigKey> {
    if !config.uses_gateway_semantics() {
        return vec![ConfigKey::new(
            Kind::VirtualService,
            &config.meta.name,
            &config.meta.namespace,
        )];
    }

    config
        .meta
        .annotations
        .get(INTERNAL_PARENT_NAMES)
        .map(String::as_str)
        .unwrap_or_default()
        .split(',')
        .filter_map(parse_parent)
        .collect()
}

fn parse_parent(parent: &str) -> Option<ConfigKey> {
    let Some((kind, name_namespace)) = parent.split_once('/') else {
        warn!(parent, "invalid internal parent reference, missing kind");
        return None;
    };
    let Ok(kind) = kind.parse::<Kind>() else {
        warn!(parent, "unknown kind in internal parent reference");
        return None;
    };
    let Some((name, namespace)) = name_namespace.split_once('.') else {
        warn!(parent, "invalid internal parent reference, missing namespace");
        return None;
    };
    Some(ConfigKey::new(kind, name, namespace))
}
