//! Diagnostic findings produced when checking a CI against a trait.
//!
//! Findings are data, not errors: the diagnostic evaluator accumulates all
//! of them for one CI in one pass.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::attribute::MergedCiAttribute;
use crate::ci::CiId;
use crate::value::AttributeValueType;

use super::definition::{AttributeTemplate, RelationTemplate};

/// One way a CI fails a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TemplateFinding {
    AttributeMissing,
    WrongType {
        expected: AttributeValueType,
        found: AttributeValueType,
    },
    WrongMultiplicity {
        expected_array: bool,
        found_array: bool,
    },
    ConstraintViolation {
        detail: String,
    },
    CardinalityViolation {
        found: usize,
        min: Option<usize>,
        max: Option<usize>,
    },
}

impl fmt::Display for TemplateFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttributeMissing => f.write_str("attribute missing"),
            Self::WrongType { expected, found } => {
                write!(f, "wrong type: expected {expected}, found {found}")
            }
            Self::WrongMultiplicity {
                expected_array,
                found_array,
            } => {
                let shape = |array: bool| if array { "array" } else { "scalar" };
                write!(
                    f,
                    "wrong multiplicity: expected {}, found {}",
                    shape(*expected_array),
                    shape(*found_array)
                )
            }
            Self::ConstraintViolation { detail } => write!(f, "constraint violated: {detail}"),
            Self::CardinalityViolation { found, min, max } => {
                let bound = |b: &Option<usize>| b.map_or_else(|| "*".to_string(), |v| v.to_string());
                write!(
                    f,
                    "cardinality violated: found {found}, expected [{}, {}]",
                    bound(min),
                    bound(max)
                )
            }
        }
    }
}

/// Findings for one attribute template against the merged attribute it names.
///
/// Value constraints are only checked once type and multiplicity match.
pub(crate) fn attribute_findings(
    template: &AttributeTemplate,
    merged: Option<&MergedCiAttribute>,
) -> Vec<TemplateFinding> {
    let Some(merged) = merged else {
        return vec![TemplateFinding::AttributeMissing];
    };
    let value = merged.value();
    let mut out = Vec::new();
    if let Some(expected) = template.value_type {
        let found = value.value_type();
        if found != expected {
            out.push(TemplateFinding::WrongType { expected, found });
        }
    }
    if let Some(expected_array) = template.is_array {
        if value.is_array() != expected_array {
            out.push(TemplateFinding::WrongMultiplicity {
                expected_array,
                found_array: value.is_array(),
            });
        }
    }
    if out.is_empty() {
        for constraint in &template.constraints {
            out.extend(
                constraint
                    .check(value)
                    .into_iter()
                    .map(|detail| TemplateFinding::ConstraintViolation { detail }),
            );
        }
    }
    out
}

pub(crate) fn cardinality_finding(template: &RelationTemplate, found: usize) -> Option<TemplateFinding> {
    (!template.accepts_count(found)).then_some(TemplateFinding::CardinalityViolation {
        found,
        min: template.min,
        max: template.max,
    })
}

/// Every finding for one CI against one trait, keyed by template identifier.
///
/// Identifiers without findings are omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateErrors {
    pub trait_id: String,
    pub ci_id: CiId,
    pub attributes: BTreeMap<String, Vec<TemplateFinding>>,
    pub relations: BTreeMap<String, Vec<TemplateFinding>>,
}

impl TemplateErrors {
    #[must_use]
    pub fn new(trait_id: impl Into<String>, ci_id: CiId) -> Self {
        Self {
            trait_id: trait_id.into(),
            ci_id,
            attributes: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    pub(crate) fn add_attribute(&mut self, identifier: &str, findings: Vec<TemplateFinding>) {
        if !findings.is_empty() {
            self.attributes.insert(identifier.to_string(), findings);
        }
    }

    pub(crate) fn add_relation(&mut self, identifier: &str, finding: Option<TemplateFinding>) {
        if let Some(finding) = finding {
            self.relations.insert(identifier.to_string(), vec![finding]);
        }
    }

    /// True when the CI raised no finding at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.relations.is_empty()
    }

    #[must_use]
    pub fn finding_count(&self) -> usize {
        self.attributes
            .values()
            .chain(self.relations.values())
            .map(Vec::len)
            .sum()
    }

    /// All findings as (template identifier, finding) pairs, attributes first.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TemplateFinding)> {
        self.attributes
            .iter()
            .chain(self.relations.iter())
            .flat_map(|(id, findings)| findings.iter().map(move |f| (id.as_str(), f)))
    }
}

impl fmt::Display for TemplateErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trait '{}' on CI {}:", self.trait_id, self.ci_id)?;
        if self.is_empty() {
            return f.write_str(" no findings");
        }
        for (identifier, finding) in self.iter() {
            write!(f, "\n  {identifier}: {finding}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributeId, CiAttribute, FactState};
    use crate::changeset::ChangesetId;
    use crate::layer::LayerId;
    use crate::relation::PredicateId;
    use crate::traits::definition::ValueConstraint;
    use crate::value::AttributeValue;
    use chrono::Utc;

    fn merged(value: AttributeValue) -> MergedCiAttribute {
        let layer = LayerId::new("base").unwrap();
        MergedCiAttribute {
            attribute: CiAttribute {
                id: AttributeId::new(),
                name: "hostname".to_string(),
                ci_id: CiId::new(),
                layer_id: layer.clone(),
                value,
                state: FactState::New,
                changeset_id: ChangesetId::new(),
                timestamp: Utc::now(),
            },
            layer_stack: vec![layer],
        }
    }

    fn hostname_template() -> AttributeTemplate {
        AttributeTemplate::new("hostname")
            .of_type(AttributeValueType::Text)
            .array(false)
            .with_constraint(ValueConstraint::TextLength {
                min: Some(1),
                max: None,
            })
    }

    #[test]
    fn test_missing_attribute() {
        assert_eq!(
            attribute_findings(&hostname_template(), None),
            vec![TemplateFinding::AttributeMissing]
        );
    }

    #[test]
    fn test_matching_attribute_has_no_findings() {
        let m = merged(AttributeValue::text("srv1"));
        assert!(attribute_findings(&hostname_template(), Some(&m)).is_empty());
    }

    #[test]
    fn test_type_and_multiplicity_reported_together() {
        let m = merged(AttributeValue::integer_array([1, 2]));
        let findings = attribute_findings(&hostname_template(), Some(&m));
        assert_eq!(findings.len(), 2);
        assert!(matches!(findings[0], TemplateFinding::WrongType { .. }));
        assert!(matches!(findings[1], TemplateFinding::WrongMultiplicity { .. }));
    }

    #[test]
    fn test_constraint_violation() {
        let m = merged(AttributeValue::text(""));
        let findings = attribute_findings(&hostname_template(), Some(&m));
        assert_eq!(findings.len(), 1);
        assert!(matches!(findings[0], TemplateFinding::ConstraintViolation { .. }));
    }

    #[test]
    fn test_cardinality_finding() {
        let t = RelationTemplate::new(PredicateId::new("runs_on").unwrap(), true)
            .bounds(Some(1), Some(1));
        assert!(cardinality_finding(&t, 1).is_none());
        assert_eq!(
            cardinality_finding(&t, 2),
            Some(TemplateFinding::CardinalityViolation {
                found: 2,
                min: Some(1),
                max: Some(1)
            })
        );
    }

    #[test]
    fn test_errors_display_and_count() {
        let mut errs = TemplateErrors::new("host", CiId::new());
        assert!(errs.is_empty());
        errs.add_attribute("hostname", vec![TemplateFinding::AttributeMissing]);
        errs.add_attribute("os", Vec::new());
        assert_eq!(errs.finding_count(), 1);
        assert!(errs.to_string().contains("hostname: attribute missing"));
    }
}
