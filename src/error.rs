//! Crate-wide error taxonomy.
//!
//! Every optimistic mutation surfaces one of these after its compensation
//! path has run; nothing here is fatal to the process. Validation and
//! not-found errors are raised before any local state changes.

use thiserror::Error;

/// Errors surfaced by the store implementations and the reconciliation
/// engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level failure (connect, timeout, TLS, DNS).
    #[error("{0}")]
    Network(String),

    /// The backend answered with a non-2xx status.
    #[error("{message} (HTTP {status})")]
    Api { status: u16, message: String },

    /// Input rejected before any optimistic mutation was applied.
    #[error("validation: {0}")]
    Validation(String),

    /// The referenced record is not present in the local mirror.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Local fallback cache failure.
    #[error("cache error: {0}")]
    Cache(#[from] rusqlite::Error),

    /// Malformed JSON from the backend or the cache.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Anything that should not happen in normal operation (poisoned lock,
    /// client build failure, hash failure).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn not_found(kind: &'static str, id: &str) -> Self {
        Error::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// True when the failure came from the transport rather than the
    /// backend's own logic. Used to decide whether the offline cache is an
    /// acceptable substitute for a read.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
