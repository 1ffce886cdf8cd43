//! Error types for Strata.
//!
//! All errors in Strata are strongly typed using thiserror and grouped by
//! who can correct them: callers (validation), the authorization layer in
//! front of the core (authorization), or the storage backend (storage).
//!
//! Template mismatches found while checking a CI against a trait are not
//! errors; they are reported as [`crate::traits::TemplateFinding`] data.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::ci::CiId;
use crate::layer::LayerId;
use crate::storage::StorageError;

/// Caller-correctable errors. Never retried automatically.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid attribute value: {reason}")]
    InvalidValue {
        reason: String,
    },

    #[error("Trait '{trait_id}' declares identifier '{identifier}' with conflicting templates")]
    ConflictingTraitDefinition {
        trait_id: String,
        identifier: String,
    },

    #[error("Cyclic trait definition: {}", .path.join(" -> "))]
    CyclicTraitDefinition {
        path: Vec<String>,
    },

    #[error("Unknown trait: {trait_id}")]
    UnknownTrait {
        trait_id: String,
    },

    #[error("Layer '{layer_id}' appears more than once in a layer set")]
    DuplicateLayer {
        layer_id: LayerId,
    },

    #[error("Invalid layer id '{id}': {reason}")]
    InvalidLayerId {
        id: String,
        reason: String,
    },

    #[error("Invalid attribute name '{name}'")]
    InvalidAttributeName {
        name: String,
    },

    #[error("Invalid value constraint: {reason}")]
    InvalidConstraint {
        reason: String,
    },

    #[error("Fragment {fragment} lies outside of the bulk replace scope")]
    FragmentOutOfScope {
        fragment: String,
    },

    #[error("Fragment {fragment} appears more than once in a bulk replace")]
    DuplicateFragment {
        fragment: String,
    },

    #[error("Write to {fact} at {timestamp} predates its latest version at {head}")]
    BackdatedWrite {
        fact: String,
        timestamp: DateTime<Utc>,
        head: DateTime<Utc>,
    },
}

/// Errors raised when a write targets something the caller may not write to.
///
/// Authorization itself is checked by a collaborator before the core is
/// invoked; these are surfaced as-is and never elevated or retried.
#[derive(Debug, Error)]
pub enum AuthorizationError {
    #[error("Unknown CI: {id}")]
    UnknownCi {
        id: CiId,
    },

    #[error("Layer '{layer_id}' is not writable")]
    LayerNotWritable {
        layer_id: LayerId,
    },

    #[error("Unknown layer: {layer_id}")]
    UnknownLayer {
        layer_id: LayerId,
    },
}

/// Top-level error type for Strata.
#[derive(Debug, Error)]
pub enum StrataError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Authorization error: {0}")]
    Authorization(#[from] AuthorizationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl StrataError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an `InvalidValue` validation error.
    #[must_use]
    pub fn invalid_value(reason: impl Into<String>) -> Self {
        Self::Validation(ValidationError::InvalidValue {
            reason: reason.into(),
        })
    }

    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    #[must_use]
    pub const fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization(_))
    }

    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if a retry by the caller might succeed.
    ///
    /// The core never retries on its own; only connectivity failures from the
    /// storage collaborator are flagged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(StorageError::ConnectionError(_)))
    }
}

/// Result type alias for Strata operations.
pub type StrataResult<T> = Result<T, StrataError>;
