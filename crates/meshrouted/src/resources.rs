//! Routing resources read from a directory of JSON files.
//!
//! Each `*.json` file holds one resource or an array of resources. Files are
//! read in file-name order, recursively.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use meshroute_controller::ResourceEvent;
use meshroute_core::{NamespacedName, VirtualService};
use serde::Deserialize;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Deserialize)]
#[serde(untagged)]
enum ResourceFile {
    Many(Vec<VirtualService>),
    One(Box<VirtualService>),
}

/// Load every resource under `dir`.
pub fn load_resources(dir: &Path) -> anyhow::Result<Vec<VirtualService>> {
    let mut resources = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let file: ResourceFile = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        match file {
            ResourceFile::Many(many) => resources.extend(many),
            ResourceFile::One(one) => resources.push(*one),
        }
    }

    debug!(dir = %dir.display(), count = resources.len(), "loaded resources");
    Ok(resources)
}

/// Diffs successive loads of a resource directory into controller events.
pub struct ResourceWatcher {
    dir: PathBuf,
    known: BTreeMap<NamespacedName, VirtualService>,
}

impl ResourceWatcher {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            known: BTreeMap::new(),
        }
    }

    /// Reload the directory and return upserts for new or changed resources
    /// and deletes for resources that disappeared.
    pub fn poll(&mut self) -> anyhow::Result<Vec<ResourceEvent>> {
        let current: BTreeMap<NamespacedName, VirtualService> = load_resources(&self.dir)?
            .into_iter()
            .map(|vs| (vs.key(), vs))
            .collect();

        let mut events = Vec::new();
        for (key, vs) in &current {
            if self.known.get(key) != Some(vs) {
                events.push(ResourceEvent::Upsert(vs.clone()));
            }
        }
        for key in self.known.keys() {
            if !current.contains_key(key) {
                events.push(ResourceEvent::Delete(key.clone()));
            }
        }

        self.known = current;
        Ok(events)
    }
}
