//! Attribute versions and their merged view.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::changeset::ChangesetId;
use crate::ci::CiId;
use crate::error::ValidationError;
use crate::layer::LayerId;
use crate::value::AttributeValue;

/// Maximum length of an attribute full name.
pub const MAX_ATTRIBUTE_NAME_LENGTH: usize = 255;

/// Reserved attribute holding a CI's display name.
pub const CI_NAME_ATTRIBUTE: &str = "__name";

/// Unique identifier of one attribute version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeId(Uuid);

impl AttributeId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AttributeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle tag of a fact version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactState {
    New,
    Changed,
    Removed,
}

impl FactState {
    #[must_use]
    pub const fn is_removed(self) -> bool {
        matches!(self, Self::Removed)
    }
}

/// Checks an attribute full name.
///
/// # Errors
///
/// Returns `ValidationError::InvalidAttributeName` for empty names, names
/// with surrounding whitespace or control characters, and overlong names.
pub fn validate_attribute_name(name: &str) -> Result<(), ValidationError> {
    let ok = !name.is_empty()
        && name.len() <= MAX_ATTRIBUTE_NAME_LENGTH
        && name.trim() == name
        && !name.chars().any(char::is_control);
    if ok {
        Ok(())
    } else {
        Err(ValidationError::InvalidAttributeName {
            name: name.to_string(),
        })
    }
}

/// One version in the chain keyed by (CI, name, layer).
///
/// A removed version keeps the last live value for audit purposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiAttribute {
    pub id: AttributeId,
    pub name: String,
    pub ci_id: CiId,
    pub layer_id: LayerId,
    pub value: AttributeValue,
    pub state: FactState,
    pub changeset_id: ChangesetId,
    /// Validity start; equals the producing changeset's timestamp.
    pub timestamp: DateTime<Utc>,
}

impl CiAttribute {
    #[must_use]
    pub const fn is_removed(&self) -> bool {
        self.state.is_removed()
    }
}

/// The winning attribute version for one (CI, name) after merging a layer set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedCiAttribute {
    pub attribute: CiAttribute,
    /// Every layer holding a live version, in layer set order; the winner is last.
    pub layer_stack: Vec<LayerId>,
}

impl MergedCiAttribute {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.attribute.name
    }

    #[must_use]
    pub const fn value(&self) -> &AttributeValue {
        &self.attribute.value
    }

    #[must_use]
    pub fn winning_layer(&self) -> &LayerId {
        &self.attribute.layer_id
    }
}
