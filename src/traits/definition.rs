//! Trait definitions and their flattened form.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::attribute::validate_attribute_name;
use crate::error::{StrataError, StrataResult, ValidationError};
use crate::relation::PredicateId;
use crate::value::{AttributeValue, AttributeValueType, RegexPattern};

/// Where a trait definition comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraitOrigin {
    /// Shipped with the core.
    Core,
    /// Shipped by a plugin.
    Plugin { name: String },
    /// Authored by users and stored as data.
    Data,
}

impl fmt::Display for TraitOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Core => f.write_str("core"),
            Self::Plugin { name } => write!(f, "plugin:{name}"),
            Self::Data => f.write_str("data"),
        }
    }
}

/// A check applied to an attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueConstraint {
    /// Bounds on the character count of each text item.
    TextLength {
        min: Option<usize>,
        max: Option<usize>,
    },
    /// Each text item must match.
    TextRegex { pattern: RegexPattern },
    /// Bounds on the number of array items.
    ArrayLength {
        min: Option<usize>,
        max: Option<usize>,
    },
}

impl ValueConstraint {
    /// Builds a regex constraint.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConstraint` if the pattern does not compile.
    pub fn regex(pattern: &str) -> Result<Self, ValidationError> {
        RegexPattern::new(pattern).map(|pattern| Self::TextRegex { pattern })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::TextLength {
                min: Some(min),
                max: Some(max),
            }
            | Self::ArrayLength {
                min: Some(min),
                max: Some(max),
            } if min > max => Err(ValidationError::InvalidConstraint {
                reason: format!("length bounds inverted ({min} > {max})"),
            }),
            _ => Ok(()),
        }
    }

    /// Human-readable violations; empty when the value satisfies the constraint.
    #[must_use]
    pub fn check(&self, value: &AttributeValue) -> Vec<String> {
        match self {
            Self::TextLength { min, max } => value.check_text_length(*min, *max),
            Self::TextRegex { pattern } => value.check_regex(pattern.regex()),
            Self::ArrayLength { min, max } => value.check_array_length(*min, *max),
        }
    }
}

/// What a trait expects of one attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeTemplate {
    /// Full attribute name to look up in the merged CI.
    pub name: String,
    /// Expected type; `None` accepts any.
    #[serde(default)]
    pub value_type: Option<AttributeValueType>,
    /// Expected array-ness; `None` accepts either.
    #[serde(default)]
    pub is_array: Option<bool>,
    #[serde(default)]
    pub constraints: Vec<ValueConstraint>,
}

impl AttributeTemplate {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value_type: None,
            is_array: None,
            constraints: Vec::new(),
        }
    }

    #[must_use]
    pub const fn of_type(mut self, value_type: AttributeValueType) -> Self {
        self.value_type = Some(value_type);
        self
    }

    #[must_use]
    pub const fn array(mut self, is_array: bool) -> Self {
        self.is_array = Some(is_array);
        self
    }

    #[must_use]
    pub fn with_constraint(mut self, constraint: ValueConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }
}

/// An attribute template bound to a trait-local identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraitAttribute {
    pub identifier: String,
    pub template: AttributeTemplate,
}

/// What a trait expects of the relations of one predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationTemplate {
    pub predicate_id: PredicateId,
    /// True when the CI is the relation's source, false when it is the target.
    pub direction_forward: bool,
    #[serde(default)]
    pub min: Option<usize>,
    #[serde(default)]
    pub max: Option<usize>,
    /// Traits the other end must have; any one suffices. Empty means no constraint.
    #[serde(default)]
    pub trait_hints: Vec<String>,
}

impl RelationTemplate {
    #[must_use]
    pub const fn new(predicate_id: PredicateId, direction_forward: bool) -> Self {
        Self {
            predicate_id,
            direction_forward,
            min: None,
            max: None,
            trait_hints: Vec::new(),
        }
    }

    #[must_use]
    pub const fn bounds(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    #[must_use]
    pub fn with_trait_hint(mut self, trait_id: impl Into<String>) -> Self {
        self.trait_hints.push(trait_id.into());
        self
    }

    /// Whether `count` matching relations satisfy the cardinality bounds.
    #[must_use]
    pub fn accepts_count(&self, count: usize) -> bool {
        self.min.map_or(true, |min| count >= min) && self.max.map_or(true, |max| count <= max)
    }
}

/// A relation template bound to a trait-local identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraitRelation {
    pub identifier: String,
    pub template: RelationTemplate,
}

/// A trait as authored: its own templates plus the traits it requires.
///
/// # Examples
///
/// ```
/// use strata::traits::{AttributeTemplate, RecursiveTrait, TraitOrigin, ValueConstraint};
/// use strata::AttributeValueType;
///
/// let host = RecursiveTrait::new("host", TraitOrigin::Core).require_attribute(
///     "hostname",
///     AttributeTemplate::new("hostname")
///         .of_type(AttributeValueType::Text)
///         .with_constraint(ValueConstraint::TextLength { min: Some(1), max: None }),
/// );
/// assert_eq!(host.required_attributes.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecursiveTrait {
    pub id: String,
    pub origin: TraitOrigin,
    #[serde(default)]
    pub required_attributes: Vec<TraitAttribute>,
    #[serde(default)]
    pub optional_attributes: Vec<TraitAttribute>,
    #[serde(default)]
    pub required_relations: Vec<TraitRelation>,
    #[serde(default)]
    pub optional_relations: Vec<TraitRelation>,
    /// Ids of traits whose templates this trait includes.
    #[serde(default)]
    pub required_traits: Vec<String>,
}

impl RecursiveTrait {
    #[must_use]
    pub fn new(id: impl Into<String>, origin: TraitOrigin) -> Self {
        Self {
            id: id.into(),
            origin,
            required_attributes: Vec::new(),
            optional_attributes: Vec::new(),
            required_relations: Vec::new(),
            optional_relations: Vec::new(),
            required_traits: Vec::new(),
        }
    }

    #[must_use]
    pub fn require_attribute(
        mut self,
        identifier: impl Into<String>,
        template: AttributeTemplate,
    ) -> Self {
        self.required_attributes.push(TraitAttribute {
            identifier: identifier.into(),
            template,
        });
        self
    }

    #[must_use]
    pub fn optional_attribute(
        mut self,
        identifier: impl Into<String>,
        template: AttributeTemplate,
    ) -> Self {
        self.optional_attributes.push(TraitAttribute {
            identifier: identifier.into(),
            template,
        });
        self
    }

    #[must_use]
    pub fn require_relation(
        mut self,
        identifier: impl Into<String>,
        template: RelationTemplate,
    ) -> Self {
        self.required_relations.push(TraitRelation {
            identifier: identifier.into(),
            template,
        });
        self
    }

    #[must_use]
    pub fn optional_relation(
        mut self,
        identifier: impl Into<String>,
        template: RelationTemplate,
    ) -> Self {
        self.optional_relations.push(TraitRelation {
            identifier: identifier.into(),
            template,
        });
        self
    }

    #[must_use]
    pub fn require_trait(mut self, trait_id: impl Into<String>) -> Self {
        self.required_traits.push(trait_id.into());
        self
    }

    /// Checks the definition on its own, without resolving required traits.
    ///
    /// # Errors
    ///
    /// - `InvalidValue` for an empty id or identifier
    /// - `InvalidAttributeName` for a template naming an invalid attribute
    /// - `InvalidConstraint` for inverted bounds
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                reason: "trait id must not be empty".to_string(),
            });
        }
        for attr in self.required_attributes.iter().chain(&self.optional_attributes) {
            if attr.identifier.is_empty() {
                return Err(ValidationError::InvalidValue {
                    reason: format!("trait '{}' has an empty attribute identifier", self.id),
                });
            }
            validate_attribute_name(&attr.template.name)?;
            for c in &attr.template.constraints {
                c.validate()?;
            }
        }
        for rel in self.required_relations.iter().chain(&self.optional_relations) {
            if rel.identifier.is_empty() {
                return Err(ValidationError::InvalidValue {
                    reason: format!("trait '{}' has an empty relation identifier", self.id),
                });
            }
            if let (Some(min), Some(max)) = (rel.template.min, rel.template.max) {
                if min > max {
                    return Err(ValidationError::InvalidConstraint {
                        reason: format!("relation '{}' bounds inverted", rel.identifier),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A trait with every required trait folded in.
///
/// Templates are keyed by identifier in sorted maps, so two flattenings of
/// the same trait graph compare equal regardless of declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericTrait {
    pub id: String,
    pub origin: TraitOrigin,
    pub required_attributes: BTreeMap<String, AttributeTemplate>,
    pub optional_attributes: BTreeMap<String, AttributeTemplate>,
    pub required_relations: BTreeMap<String, RelationTemplate>,
    pub optional_relations: BTreeMap<String, RelationTemplate>,
    /// Every trait reached through `required_traits`, transitively.
    pub ancestor_traits: BTreeSet<String>,
}

impl GenericTrait {
    /// Attribute names every matching CI must hold.
    #[must_use]
    pub fn required_attribute_names(&self) -> BTreeSet<String> {
        self.required_attributes
            .values()
            .map(|t| t.name.clone())
            .collect()
    }

    /// True if membership of a CI can change through writes to its
    /// neighbours, i.e. some required relation carries trait hints.
    #[must_use]
    pub fn depends_on_neighbours(&self) -> bool {
        self.required_relations
            .values()
            .any(|r| !r.trait_hints.is_empty())
    }

    /// True if the trait has no required templates at all.
    #[must_use]
    pub fn is_unconstrained(&self) -> bool {
        self.required_attributes.is_empty() && self.required_relations.is_empty()
    }

    /// Content fingerprint of the flattened definition.
    ///
    /// Equal fingerprints mean the trait matches exactly the same CIs.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the definition cannot be encoded.
    pub fn fingerprint(&self) -> StrataResult<blake3::Hash> {
        // Sorted maps make the JSON encoding canonical.
        let bytes = serde_json::to_vec(self).map_err(|e| {
            StrataError::internal(format!("cannot encode trait '{}': {e}", self.id))
        })?;
        Ok(blake3::hash(&bytes))
    }
}
