//! Push requests sent to the proxy update collaborator.

use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::model::ConfigKey;

/// Why a push was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TriggerReason {
    /// One or more configs changed.
    ConfigUpdate,
}

/// A request to recompute and push proxy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRequest {
    /// Whether a full push (all resources) is required.
    pub full: bool,
    /// Identities of the configs that changed.
    pub configs_updated: BTreeSet<ConfigKey>,
    pub reason: TriggerReason,
    /// When the request was created. Doubles as the cache write token.
    pub start: SystemTime,
}

impl PushRequest {
    /// A full push for the given changed configs, stamped with the current time.
    pub fn full(configs_updated: BTreeSet<ConfigKey>, reason: TriggerReason) -> Self {
        Self {
            full: true,
            configs_updated,
            reason,
            start: SystemTime::now(),
        }
    }

    /// Nanoseconds since the unix epoch of [`PushRequest::start`].
    pub fn token(&self) -> u64 {
        self.start
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}

/// Receives coalesced config change notifications.
pub trait XdsUpdater: Send + Sync {
    fn config_update(&self, request: PushRequest);
}
