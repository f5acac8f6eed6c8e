//! Error types for the API boundary and the object cache.
//!
//! All errors are explicit and typed. The API client reports the four
//! conditions the reconcilers branch on (not found, conflict, already
//! exists, invalid) plus a catch-all for an unreachable server.

use thiserror::Error;

use crate::meta::ResourceKind;

/// Errors returned by an [`ApiClient`](crate::client::ApiClient).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: ResourceKind, name: String },

    #[error("conflict writing {kind} '{name}': {reason}")]
    Conflict {
        kind: ResourceKind,
        name: String,
        reason: String,
    },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: ResourceKind, name: String },

    #[error("invalid {kind} '{name}': {reason}")]
    Invalid {
        kind: ResourceKind,
        name: String,
        reason: String,
    },

    #[error("API server unavailable: {0}")]
    Unavailable(String),
}

impl ApiError {
    /// Create a not found error.
    pub fn not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(kind: ResourceKind, name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an already exists error.
    pub fn already_exists(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    /// Create an invalid object error.
    pub fn invalid(kind: ResourceKind, name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            kind,
            name: name.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

/// Result type for API client calls.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Errors returned by the local object cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("{kind} cache lock poisoned")]
    Poisoned { kind: ResourceKind },
}
