//! Error types for the read-only config store.

use thiserror::Error;

/// Result type alias for config store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by config store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("unsupported operation: the virtual service config store is a read-only view")]
    Unsupported,
}
