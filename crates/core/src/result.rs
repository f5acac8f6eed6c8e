//! Extension traits for API results.
//!
//! Reconcilers frequently need to treat "not found" as an ordinary outcome
//! rather than a failure, or to log a best-effort write and keep going.
//! These combinators keep that out of the control flow.

use std::fmt::Display;

use crate::error::{ApiError, ApiResult};

/// Combinators for [`ApiResult`].
pub trait ApiResultExt<T> {
    /// Map `NotFound` to `Ok(None)`, keeping every other error.
    ///
    /// # Errors
    ///
    /// Returns the original error unless it is `NotFound`.
    fn optional(self) -> ApiResult<Option<T>>;

    /// Map `AlreadyExists` to `Ok(None)`, keeping every other error.
    ///
    /// # Errors
    ///
    /// Returns the original error unless it is `AlreadyExists`.
    fn tolerate_existing(self) -> ApiResult<Option<T>>;
}

impl<T> ApiResultExt<T> for ApiResult<T> {
    fn optional(self) -> ApiResult<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(ApiError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn tolerate_existing(self) -> ApiResult<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(ApiError::AlreadyExists { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Log-and-continue helpers for any result whose error is displayable.
pub trait ResultExt<T, E> {
    /// Convert to an Option, logging the error at warn level.
    fn into_option_logged(self, context: &str) -> Option<T>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    fn into_option_logged(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "{context}");
                None
            }
        }
    }
}
