//! meshroute-core: shared types for the MeshRoute routing control plane.
//!
//! # Components
//!
//! - **`types`**: the user-authored `VirtualService` resource and its routes
//! - **`model`**: derived `Config` rows, kinds, and resource identities
//! - **`visibility`**: export scope values (`*`, `.`, namespace)
//! - **`push`**: push requests handed to the proxy update collaborator
//! - **`config`**: `meshroute.toml` parsing

pub mod config;
pub mod model;
pub mod push;
pub mod types;
pub mod visibility;

pub use config::MeshrouteConfig;
pub use model::*;
pub use push::{PushRequest, TriggerReason, XdsUpdater};
pub use types::*;
pub use visibility::Visibility;
