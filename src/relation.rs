//! Relation versions, predicates and their merged view.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attribute::FactState;
use crate::changeset::ChangesetId;
use crate::ci::CiId;
use crate::error::ValidationError;
use crate::layer::LayerId;

/// Unique identifier of one relation version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationId(Uuid);

impl RelationId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Named, directed relationship type such as `runs_on` or `member_of`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PredicateId(String);

impl PredicateId {
    /// Creates a predicate id.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidValue` for empty ids or ids with
    /// whitespace.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return Err(ValidationError::InvalidValue {
                reason: format!("invalid predicate id {id:?}"),
            });
        }
        Ok(Self(id))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PredicateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PredicateId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PredicateId> for String {
    fn from(id: PredicateId) -> Self {
        id.0
    }
}

/// Identity of a relation chain within one layer: (from, to, predicate).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationKey {
    pub from_ci: CiId,
    pub to_ci: CiId,
    pub predicate_id: PredicateId,
}

impl RelationKey {
    #[must_use]
    pub const fn new(from_ci: CiId, to_ci: CiId, predicate_id: PredicateId) -> Self {
        Self {
            from_ci,
            to_ci,
            predicate_id,
        }
    }
}

impl fmt::Display for RelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -[{}]-> {}", self.from_ci, self.predicate_id, self.to_ci)
    }
}

/// One version in the chain keyed by (from, to, predicate, layer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub id: RelationId,
    pub from_ci: CiId,
    pub to_ci: CiId,
    pub predicate_id: PredicateId,
    pub layer_id: LayerId,
    pub state: FactState,
    pub changeset_id: ChangesetId,
    pub timestamp: DateTime<Utc>,
}

impl Relation {
    #[must_use]
    pub fn key(&self) -> RelationKey {
        RelationKey::new(self.from_ci, self.to_ci, self.predicate_id.clone())
    }

    #[must_use]
    pub const fn is_removed(&self) -> bool {
        self.state.is_removed()
    }
}

/// The winning relation version after merging a layer set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedRelation {
    pub relation: Relation,
    /// Every layer holding a live version, in layer set order; the winner is last.
    pub layer_stack: Vec<LayerId>,
}

/// Which end of a relation a CI sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// The CI is the relation's source.
    Forward,
    /// The CI is the relation's target.
    Back,
}

/// A merged relation seen from one CI: the other end, and which way it points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactRelatedCi {
    pub other_ci: CiId,
    pub direction: Direction,
    pub predicate_id: PredicateId,
    pub relation: MergedRelation,
}

impl CompactRelatedCi {
    /// Views `relation` from `ci`, or `None` if `ci` is on neither end.
    #[must_use]
    pub fn from_perspective(ci: CiId, relation: &MergedRelation) -> Option<Self> {
        let r = &relation.relation;
        let (other_ci, direction) = if r.from_ci == ci {
            (r.to_ci, Direction::Forward)
        } else if r.to_ci == ci {
            (r.from_ci, Direction::Back)
        } else {
            return None;
        };
        Some(Self {
            other_ci,
            direction,
            predicate_id: r.predicate_id.clone(),
            relation: relation.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relation(from: CiId, to: CiId) -> MergedRelation {
        let layer = LayerId::new("l").unwrap();
        MergedRelation {
            relation: Relation {
                id: RelationId::new(),
                from_ci: from,
                to_ci: to,
                predicate_id: PredicateId::new("runs_on").unwrap(),
                layer_id: layer.clone(),
                state: FactState::New,
                changeset_id: ChangesetId::new(),
                timestamp: Utc::now(),
            },
            layer_stack: vec![layer],
        }
    }

    #[test]
    fn test_predicate_validation() {
        assert!(PredicateId::new("runs_on").is_ok());
        assert!(PredicateId::new("").is_err());
        assert!(PredicateId::new("runs on").is_err());
    }

    #[test]
    fn test_perspective() {
        let (a, b, c) = (CiId::new(), CiId::new(), CiId::new());
        let r = relation(a, b);

        let fwd = CompactRelatedCi::from_perspective(a, &r).unwrap();
        assert_eq!(fwd.other_ci, b);
        assert_eq!(fwd.direction, Direction::Forward);

        let back = CompactRelatedCi::from_perspective(b, &r).unwrap();
        assert_eq!(back.other_ci, a);
        assert_eq!(back.direction, Direction::Back);

        assert!(CompactRelatedCi::from_perspective(c, &r).is_none());
    }

    #[test]
    fn test_relation_key_display() {
        let nil = CiId::from_uuid(Uuid::nil());
        let r = relation(nil, nil);
        assert!(r.relation.key().to_string().contains("-[runs_on]->"));
    }
}
