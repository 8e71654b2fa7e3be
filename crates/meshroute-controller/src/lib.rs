//! meshroute-controller: incremental resolution of routing resources.
//!
//! Raw resources flow through keyed [`Collection`]s: inputs, resolved
//! delegates, composed roots and standalone configs. A dependency index
//! from delegate to referencing roots limits recomputation to what a change
//! can affect. The resolved view is served through the read-only
//! [`ConfigStore`] contract and every effective change is forwarded to an
//! [`XdsUpdater`](meshroute_core::XdsUpdater) as one coalesced push.

pub mod collection;
pub mod controller;
pub mod error;
pub mod shortname;
pub mod store;

pub use collection::{Collection, Event, HandlerRegistration};
pub use controller::{sort_configs_by_creation_time, Controller, ControllerOptions, ResourceEvent};
pub use error::{StoreError, StoreResult};
pub use shortname::{resolve_gateway_name, resolve_shortname_to_fqdn, resolve_virtual_service_shortnames};
pub use store::{ConfigEvent, ConfigStore, EventHandler, PatchFn};
