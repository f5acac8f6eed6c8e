//! Error types for the reconciler crate.

use thiserror::Error;
use vsnap_core::{ApiError, CacheError};

/// Prefix of errors raised when a write to the API server failed in a way
/// a later reconcile may fix.
pub const CONTROLLER_UPDATE_FAIL_MSG: &str = "snapshot controller failed to update";

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// API call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Local cache failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A write needed to make progress did not go through.
    #[error("snapshot controller failed to update {name} on API server: {message}")]
    ControllerUpdate { name: String, message: String },

    /// A content the snapshot depends on is not in the cache.
    #[error("content '{name}' not found")]
    ContentMissing { name: String },

    /// The snapshot and the content it names cannot be bound.
    #[error("cannot bind snapshot '{snapshot}' and content '{content}': {reason}")]
    BindFailed {
        snapshot: String,
        content: String,
        reason: String,
    },

    /// The snapshot is not well formed.
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// No usable default snapshot class.
    #[error("default snapshot class: {reason}")]
    DefaultClass { reason: String },

    /// A status write would break monotonicity.
    #[error("illegal status transition on '{snapshot}': {reason}")]
    IllegalStatusTransition { snapshot: String, reason: String },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Create a controller update error.
    pub fn controller_update(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ControllerUpdate {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a content missing error.
    pub fn content_missing(name: impl Into<String>) -> Self {
        Self::ContentMissing { name: name.into() }
    }

    /// Create a bind failed error.
    pub fn bind_failed(
        snapshot: impl Into<String>,
        content: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::BindFailed {
            snapshot: snapshot.into(),
            content: content.into(),
            reason: reason.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Create a default class error.
    pub fn default_class(reason: impl Into<String>) -> Self {
        Self::DefaultClass {
            reason: reason.into(),
        }
    }

    /// Create an illegal status transition error.
    pub fn illegal_transition(snapshot: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IllegalStatusTransition {
            snapshot: snapshot.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether re-queueing the key may succeed later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Api(e) => !matches!(e, ApiError::Invalid { .. }),
            Self::Cache(_) | Self::ControllerUpdate { .. } | Self::ContentMissing { .. } => true,
            Self::BindFailed { .. }
            | Self::Validation { .. }
            | Self::DefaultClass { .. }
            | Self::IllegalStatusTransition { .. }
            | Self::InvalidConfig { .. } => false,
        }
    }
}

/// Whether `message` came from a [`Error::ControllerUpdate`].
#[must_use]
pub fn is_controller_update_failure(message: &str) -> bool {
    message.contains(CONTROLLER_UPDATE_FAIL_MSG)
}
