//! meshroute-delegate: resolves delegated routing resources.
//!
//! A root resource splices route fragments from delegate resources into
//! its own route list. This crate holds the pure transforms that the
//! controller runs per resource:
//!
//! - **`classify`**: Delegate / Root / Standalone classification
//! - **`export_to`**: export scope resolution for delegates
//! - **`merge`**: splicing delegate routes into a root
//!
//! None of these functions fail. Unresolvable references degrade the output
//! by omission and are reported through `tracing` warnings.

pub mod classify;
pub mod export_to;
pub mod merge;

pub use classify::{classify, delegate_references, is_root, Classification};
pub use export_to::{resolve_export_to, ResolvedDelegate, ScopeSet};
pub use merge::{merge_http_routes, merge_virtual_service};
