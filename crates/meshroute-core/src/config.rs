//! meshroute.toml configuration parser.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::visibility::Visibility;

/// Default upper bound on cached route artifacts.
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 60_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshrouteConfig {
    pub mesh: MeshConfig,
    pub controller: ControllerConfig,
    pub cache: CacheConfig,
}

/// Mesh-wide settings that feed routing resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Scope applied to resources that declare no `exportTo`.
    pub default_virtual_service_export_to: Option<Vec<String>>,
}

impl MeshConfig {
    /// The default export scope. Unset or empty means public.
    pub fn default_export_to(&self) -> BTreeSet<Visibility> {
        match &self.default_virtual_service_export_to {
            Some(list) if !list.is_empty() => {
                list.iter().map(|e| Visibility::from(e.as_str())).collect()
            }
            _ => BTreeSet::from([Visibility::Public]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Control plane revision; resources labelled for another revision are ignored.
    pub revision: Option<String>,
    /// Domain suffix used to qualify short host names, e.g. `cluster.local`.
    pub domain_suffix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
        }
    }
}

impl MeshrouteConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: MeshrouteConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
