//! Configuration item identity.
//!
//! A CI carries no data of its own. Everything known about it lives in
//! attributes and relations that reference its [`CiId`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for CI ids derived from external keys.
const CI_NAMESPACE: Uuid = Uuid::from_u128(0x5f1c_2d4e_8a7b_4c3d_9e0f_1a2b_3c4d_5e6f);

/// Globally unique, stable CI identifier.
///
/// # Examples
///
/// ```
/// use strata::CiId;
///
/// let id = CiId::new();
/// assert!(!id.is_nil());
/// assert_eq!(CiId::from_external_key("host-01"), CiId::from_external_key("host-01"));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CiId(Uuid);

impl CiId {
    /// Creates a new random CI ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Derives a deterministic CI ID from an external key.
    ///
    /// Ingestion collaborators use this to map records from foreign systems
    /// onto the same CI across runs.
    #[must_use]
    pub fn from_external_key(key: &str) -> Self {
        Self(Uuid::new_v5(&CI_NAMESPACE, key.as_bytes()))
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for CiId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CiId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CiId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<CiId> for Uuid {
    fn from(id: CiId) -> Self {
        id.0
    }
}

/// A registered CI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ci {
    pub id: CiId,
    pub created_at: DateTime<Utc>,
}

impl Ci {
    #[must_use]
    pub fn new(id: CiId) -> Self {
        Self {
            id,
            created_at: Utc::now(),
        }
    }
}
