//! meshroute-cache: dependency-tracked cache for generated proxy config.
//!
//! Generated artifacts are keyed by the content of every resource that
//! produced them, and indexed by the identities those resources depend on.
//! Invalidating a set of identities drops exactly the entries that depend
//! on any of them.
//!
//! # Components
//!
//! - **`cache`**: [`XdsCache`], the bounded, token-guarded store
//! - **`route`**: [`RouteCache`], the key for per-port route configuration

pub mod cache;
pub mod route;

pub use cache::{CacheEntry, CacheStats, XdsCache};
pub use route::{virtual_service_dependencies, RouteCache};
