//! Selections narrow merge queries to a subset of CIs, attributes or relations.
//!
//! [`CiSelection`] forms a small set algebra (intersection, union, exclusion)
//! so callers such as the effective-trait cache can narrow a query without
//! resolving the selection against the full CI universe first.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::ci::CiId;
use crate::error::ValidationError;
use crate::relation::{PredicateId, Relation, RelationKey};
use crate::value::RegexPattern;

/// Which CIs a query covers.
///
/// Constructors normalize degenerate forms: an empty `Specific` is `None`
/// and an empty `AllExcept` is `All`.
///
/// # Examples
///
/// ```
/// use strata::{CiId, CiSelection};
///
/// let (a, b, c) = (CiId::new(), CiId::new(), CiId::new());
/// let sel = CiSelection::specific([a, b]).intersect(&CiSelection::all_except([b, c]));
/// assert!(sel.contains(a));
/// assert!(!sel.contains(b));
/// assert!(!sel.contains(c));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "ids", rename_all = "snake_case")]
pub enum CiSelection {
    #[default]
    All,
    None,
    Specific(HashSet<CiId>),
    AllExcept(HashSet<CiId>),
}

impl CiSelection {
    #[must_use]
    pub fn specific(ids: impl IntoIterator<Item = CiId>) -> Self {
        let ids: HashSet<CiId> = ids.into_iter().collect();
        if ids.is_empty() {
            Self::None
        } else {
            Self::Specific(ids)
        }
    }

    #[must_use]
    pub fn all_except(ids: impl IntoIterator<Item = CiId>) -> Self {
        let ids: HashSet<CiId> = ids.into_iter().collect();
        if ids.is_empty() {
            Self::All
        } else {
            Self::AllExcept(ids)
        }
    }

    #[must_use]
    pub const fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        match self {
            Self::None => true,
            Self::Specific(ids) => ids.is_empty(),
            Self::All | Self::AllExcept(_) => false,
        }
    }

    #[must_use]
    pub fn contains(&self, id: CiId) -> bool {
        match self {
            Self::All => true,
            Self::None => false,
            Self::Specific(ids) => ids.contains(&id),
            Self::AllExcept(ids) => !ids.contains(&id),
        }
    }

    /// The explicit id set, when the selection is finite.
    #[must_use]
    pub fn specific_ids(&self) -> Option<HashSet<CiId>> {
        match self {
            Self::None => Some(HashSet::new()),
            Self::Specific(ids) => Some(ids.clone()),
            Self::All | Self::AllExcept(_) => None,
        }
    }

    #[must_use]
    pub fn complement(&self) -> Self {
        match self {
            Self::All => Self::None,
            Self::None => Self::All,
            Self::Specific(ids) => Self::all_except(ids.iter().copied()),
            Self::AllExcept(ids) => Self::specific(ids.iter().copied()),
        }
    }

    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::None, _) | (_, Self::None) => Self::None,
            (Self::All, x) | (x, Self::All) => x.clone(),
            (Self::Specific(a), Self::Specific(b)) => Self::specific(a.intersection(b).copied()),
            (Self::Specific(a), Self::AllExcept(b)) | (Self::AllExcept(b), Self::Specific(a)) => {
                Self::specific(a.difference(b).copied())
            }
            (Self::AllExcept(a), Self::AllExcept(b)) => Self::all_except(a.union(b).copied()),
        }
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::All, _) | (_, Self::All) => Self::All,
            (Self::None, x) | (x, Self::None) => x.clone(),
            (Self::Specific(a), Self::Specific(b)) => Self::specific(a.union(b).copied()),
            (Self::Specific(a), Self::AllExcept(b)) | (Self::AllExcept(b), Self::Specific(a)) => {
                Self::all_except(b.difference(a).copied())
            }
            (Self::AllExcept(a), Self::AllExcept(b)) => {
                Self::all_except(a.intersection(b).copied())
            }
        }
    }

    #[must_use]
    pub fn union_all<'a>(selections: impl IntoIterator<Item = &'a Self>) -> Self {
        selections
            .into_iter()
            .fold(Self::None, |acc, s| acc.union(s))
    }

    /// Everything in `self` that is not in `other`.
    #[must_use]
    pub fn except(&self, other: &Self) -> Self {
        self.intersect(&other.complement())
    }

    /// The members of `universe` this selection covers.
    #[must_use]
    pub fn resolve<'a>(&self, universe: impl IntoIterator<Item = &'a CiId>) -> HashSet<CiId> {
        universe
            .into_iter()
            .copied()
            .filter(|id| self.contains(*id))
            .collect()
    }

    /// Keeps only the ids this selection covers.
    pub fn retain_in(&self, ids: &mut HashSet<CiId>) {
        ids.retain(|id| self.contains(*id));
    }
}

/// Which attribute names a merge query covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeSelection {
    #[default]
    All,
    Named(BTreeSet<String>),
    Regex(RegexPattern),
}

impl AttributeSelection {
    #[must_use]
    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Named(names.into_iter().map(Into::into).collect())
    }

    /// Selects names matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConstraint` if the pattern does not compile.
    pub fn regex(pattern: &str) -> Result<Self, ValidationError> {
        RegexPattern::new(pattern).map(Self::Regex)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Named(names) => names.contains(name),
            Self::Regex(re) => re.is_match(name),
        }
    }
}

/// Which relations a merge query covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RelationSelection {
    #[default]
    All,
    /// Relations whose source is one of these CIs.
    From(HashSet<CiId>),
    /// Relations whose target is one of these CIs.
    To(HashSet<CiId>),
    FromOrTo(HashSet<CiId>),
    WithPredicates(HashSet<PredicateId>),
    Exact(RelationKey),
}

impl RelationSelection {
    #[must_use]
    pub fn from_cis(ids: impl IntoIterator<Item = CiId>) -> Self {
        Self::From(ids.into_iter().collect())
    }

    #[must_use]
    pub fn to_cis(ids: impl IntoIterator<Item = CiId>) -> Self {
        Self::To(ids.into_iter().collect())
    }

    #[must_use]
    pub fn from_or_to(ids: impl IntoIterator<Item = CiId>) -> Self {
        Self::FromOrTo(ids.into_iter().collect())
    }

    #[must_use]
    pub fn with_predicates(ids: impl IntoIterator<Item = PredicateId>) -> Self {
        Self::WithPredicates(ids.into_iter().collect())
    }

    #[must_use]
    pub fn matches(&self, relation: &Relation) -> bool {
        match self {
            Self::All => true,
            Self::From(ids) => ids.contains(&relation.from_ci),
            Self::To(ids) => ids.contains(&relation.to_ci),
            Self::FromOrTo(ids) => ids.contains(&relation.from_ci) || ids.contains(&relation.to_ci),
            Self::WithPredicates(preds) => preds.contains(&relation.predicate_id),
            Self::Exact(key) => {
                key.from_ci == relation.from_ci
                    && key.to_ci == relation.to_ci
                    && key.predicate_id == relation.predicate_id
            }
        }
    }
}
