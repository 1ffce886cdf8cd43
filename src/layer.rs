//! Layers and layer sets.
//!
//! A layer is an independently owned data source. Every attribute and
//! relation version belongs to exactly one layer. A [`LayerSet`] selects
//! which layers are visible to a read and in which order they win.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Maximum length of a layer identifier.
pub const MAX_LAYER_ID_LENGTH: usize = 200;

/// Stable identifier of a layer, e.g. `"base"` or `"monitoring_override"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LayerId(String);

impl LayerId {
    /// Creates a layer id, validating its format.
    ///
    /// Layer ids are non-empty and consist of lowercase ASCII letters,
    /// digits and underscores.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidLayerId` for malformed ids.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ValidationError::InvalidLayerId {
                id,
                reason: "must not be empty".to_string(),
            });
        }
        if id.len() > MAX_LAYER_ID_LENGTH {
            return Err(ValidationError::InvalidLayerId {
                id,
                reason: format!("exceeds {MAX_LAYER_ID_LENGTH} characters"),
            });
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(ValidationError::InvalidLayerId {
                id,
                reason: "only [a-z0-9_] allowed".to_string(),
            });
        }
        Ok(Self(id))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for LayerId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LayerId> for String {
    fn from(id: LayerId) -> Self {
        id.0
    }
}

/// Activation state of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LayerState {
    #[default]
    Active,
    Deprecated,
    MarkedForDeletion,
}

/// Where a layer's data comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSource {
    /// Facts are written through this core and tracked locally.
    #[default]
    Local,
    /// Facts are served live by an external adapter and never pass through
    /// the local write path.
    OnlineInbound {
        adapter: String,
    },
}

/// A named data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub state: LayerState,

    #[serde(default)]
    pub source: LayerSource,
}

impl Layer {
    /// Creates an active, locally tracked layer.
    #[must_use]
    pub fn new(id: LayerId) -> Self {
        Self {
            id,
            description: String::new(),
            state: LayerState::Active,
            source: LayerSource::Local,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub const fn with_state(mut self, state: LayerState) -> Self {
        self.state = state;
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: LayerSource) -> Self {
        self.source = source;
        self
    }

    #[must_use]
    pub const fn is_online(&self) -> bool {
        matches!(self.source, LayerSource::OnlineInbound { .. })
    }

    /// Only active, locally tracked layers accept writes.
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        matches!(self.state, LayerState::Active) && !self.is_online()
    }
}

/// An ordered, duplicate-free list of layers, lowest precedence first.
///
/// Two layer sets are equal (and hash identically) iff they list the same
/// layers in the same order, so a layer set can key a cache.
///
/// # Examples
///
/// ```
/// use strata::{LayerId, LayerSet};
///
/// let base = LayerId::new("base").unwrap();
/// let over = LayerId::new("override").unwrap();
/// let ls = LayerSet::new([base.clone(), over.clone()]).unwrap();
/// assert_eq!(ls.position(&over), Some(1));
/// assert!(LayerSet::new([base.clone(), base]).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<LayerId>", into = "Vec<LayerId>")]
pub struct LayerSet(Vec<LayerId>);

impl LayerSet {
    /// Builds a layer set from layers ordered lowest to highest precedence.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::DuplicateLayer` if a layer is listed twice.
    pub fn new(layers: impl IntoIterator<Item = LayerId>) -> Result<Self, ValidationError> {
        let mut out: Vec<LayerId> = Vec::new();
        for layer in layers {
            if out.contains(&layer) {
                return Err(ValidationError::DuplicateLayer { layer_id: layer });
            }
            out.push(layer);
        }
        Ok(Self(out))
    }

    /// Parses and builds a layer set from raw ids.
    ///
    /// # Errors
    ///
    /// Fails on malformed or duplicate ids.
    pub fn from_strs<'a>(ids: impl IntoIterator<Item = &'a str>) -> Result<Self, ValidationError> {
        let parsed = ids
            .into_iter()
            .map(LayerId::new)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(parsed)
    }

    #[must_use]
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn contains(&self, layer: &LayerId) -> bool {
        self.0.contains(layer)
    }

    /// Precedence position of a layer; higher wins.
    #[must_use]
    pub fn position(&self, layer: &LayerId) -> Option<usize> {
        self.0.iter().position(|l| l == layer)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LayerId> {
        self.0.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[LayerId] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LayerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, layer) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(layer.as_str())?;
        }
        f.write_str("]")
    }
}

impl TryFrom<Vec<LayerId>> for LayerSet {
    type Error = ValidationError;

    fn try_from(value: Vec<LayerId>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LayerSet> for Vec<LayerId> {
    fn from(ls: LayerSet) -> Self {
        ls.0
    }
}

impl<'a> IntoIterator for &'a LayerSet {
    type Item = &'a LayerId;
    type IntoIter = std::slice::Iter<'a, LayerId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
