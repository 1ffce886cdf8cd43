//! Changesets: atomic, attributed units of mutation.
//!
//! A changeset is only materialized when a write actually changes state.
//! Callers open a [`ChangesetProxy`] (who + when, no identity yet) and hand
//! it to every write of one logical operation; the first state-changing
//! write promotes it to a real [`Changeset`], later writes reuse it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangesetId(Uuid);

impl ChangesetId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ChangesetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChangesetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable reference to the user a changeset is attributed to.
///
/// Produced by the identity provider in front of the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserRef(String);

impl UserRef {
    #[must_use]
    pub fn new(user: impl Into<String>) -> Self {
        Self(user.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who changed something, and when. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    pub id: ChangesetId,
    pub user: UserRef,
    pub timestamp: DateTime<Utc>,
}

/// A changeset intent that materializes lazily.
///
/// # Examples
///
/// ```
/// use strata::{ChangesetProxy, UserRef};
///
/// let proxy = ChangesetProxy::now(UserRef::new("alice"));
/// assert!(!proxy.is_materialized());
/// assert!(proxy.changeset().is_none());
/// ```
#[derive(Debug, Clone)]
pub struct ChangesetProxy {
    user: UserRef,
    timestamp: DateTime<Utc>,
    materialized: Option<Changeset>,
}

impl ChangesetProxy {
    /// Opens an intent stamped with an explicit time.
    #[must_use]
    pub const fn new(user: UserRef, timestamp: DateTime<Utc>) -> Self {
        Self {
            user,
            timestamp,
            materialized: None,
        }
    }

    /// Opens an intent stamped with the current time.
    #[must_use]
    pub fn now(user: UserRef) -> Self {
        Self::new(user, Utc::now())
    }

    #[must_use]
    pub const fn user(&self) -> &UserRef {
        &self.user
    }

    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub const fn is_materialized(&self) -> bool {
        self.materialized.is_some()
    }

    /// The materialized changeset, if any write has changed state yet.
    #[must_use]
    pub const fn changeset(&self) -> Option<&Changeset> {
        self.materialized.as_ref()
    }

    /// Returns the changeset, creating its identity on first use.
    ///
    /// The flag is true when this call created it, meaning the caller must
    /// persist it together with the versions that reference it.
    pub(crate) fn materialize(&mut self) -> (Changeset, bool) {
        if let Some(cs) = &self.materialized {
            return (cs.clone(), false);
        }
        let cs = Changeset {
            id: ChangesetId::new(),
            user: self.user.clone(),
            timestamp: self.timestamp,
        };
        self.materialized = Some(cs.clone());
        (cs, true)
    }

    /// Forgets a changeset created by a write whose commit failed.
    pub(crate) fn rollback(&mut self, created: bool) {
        if created {
            self.materialized = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_materialize_once() {
        let mut proxy = ChangesetProxy::now(UserRef::new("bob"));
        let (first, created) = proxy.materialize();
        assert!(created);
        let (second, created) = proxy.materialize();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(first.user.as_str(), "bob");
        assert_eq!(first.timestamp, proxy.timestamp());
    }

    #[test]
    fn test_rollback_only_forgets_fresh_changeset() {
        let mut proxy = ChangesetProxy::now(UserRef::new("bob"));
        let (cs, created) = proxy.materialize();
        proxy.rollback(created);
        assert!(!proxy.is_materialized());

        let (cs2, created) = proxy.materialize();
        assert_ne!(cs.id, cs2.id);
        let (_, again) = proxy.materialize();
        proxy.rollback(again);
        assert_eq!(proxy.changeset().map(|c| c.id), Some(cs2.id));
    }
}
