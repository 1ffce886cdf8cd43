//! Engine write path.
//!
//! Every write follows the same sequence: validate, read the current version
//! at latest, skip if nothing changes, materialize the changeset, commit one
//! batch, notify observers. A write that changes nothing never materializes
//! a changeset. A write older than the version it supersedes is rejected, so
//! every chain only grows at its head.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::attribute::{validate_attribute_name, AttributeId, CiAttribute, FactState};
use crate::changeset::{Changeset, ChangesetId, ChangesetProxy};
use crate::ci::CiId;
use crate::error::{AuthorizationError, StrataResult, ValidationError};
use crate::feed::MutationKind;
use crate::layer::LayerId;
use crate::relation::{PredicateId, Relation, RelationId, RelationKey};
use crate::selection::{AttributeSelection, CiSelection, RelationSelection};
use crate::storage::WriteBatch;
use crate::time::TimeThreshold;
use crate::value::AttributeValue;

use super::CmdbEngine;

fn ensure_not_backdated<'a>(
    proxy: &ChangesetProxy,
    fact: impl FnOnce() -> String,
    heads: impl IntoIterator<Item = &'a DateTime<Utc>>,
) -> Result<(), ValidationError> {
    let timestamp = proxy.timestamp();
    match heads.into_iter().max() {
        Some(&head) if head > timestamp => Err(ValidationError::BackdatedWrite {
            fact: fact(),
            timestamp,
            head,
        }),
        _ => Ok(()),
    }
}

/// One (CI, name, value) entry of a bulk replace target state.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeFragment {
    pub ci_id: CiId,
    pub name: String,
    pub value: AttributeValue,
}

impl AttributeFragment {
    #[must_use]
    pub fn new(ci_id: CiId, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self {
            ci_id,
            name: name.into(),
            value: value.into(),
        }
    }
}

/// The slice of a layer an attribute bulk replace owns.
///
/// Live attributes inside the scope that are missing from the fragments are
/// removed; attributes outside it are never touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeScope {
    /// Every attribute in the layer whose name starts with `name_prefix`.
    Layer { name_prefix: String },
    /// Attributes of the listed CIs whose name starts with `name_prefix`.
    Cis {
        ci_ids: HashSet<CiId>,
        name_prefix: String,
    },
}

impl AttributeScope {
    /// The whole layer.
    #[must_use]
    pub fn layer() -> Self {
        Self::Layer {
            name_prefix: String::new(),
        }
    }

    fn name_prefix(&self) -> &str {
        match self {
            Self::Layer { name_prefix } | Self::Cis { name_prefix, .. } => name_prefix,
        }
    }

    fn ci_selection(&self) -> CiSelection {
        match self {
            Self::Layer { .. } => CiSelection::All,
            Self::Cis { ci_ids, .. } => CiSelection::specific(ci_ids.iter().copied()),
        }
    }

    fn contains(&self, ci: CiId, name: &str) -> bool {
        let ci_ok = match self {
            Self::Layer { .. } => true,
            Self::Cis { ci_ids, .. } => ci_ids.contains(&ci),
        };
        ci_ok && name.starts_with(self.name_prefix())
    }
}

/// One relation of a bulk replace target state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationFragment {
    pub from_ci: CiId,
    pub to_ci: CiId,
    pub predicate_id: PredicateId,
}

impl RelationFragment {
    #[must_use]
    pub const fn new(from_ci: CiId, to_ci: CiId, predicate_id: PredicateId) -> Self {
        Self {
            from_ci,
            to_ci,
            predicate_id,
        }
    }

    fn key(&self) -> RelationKey {
        RelationKey::new(self.from_ci, self.to_ci, self.predicate_id.clone())
    }
}

/// The slice of a layer a relation bulk replace owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationScope {
    Layer,
    Predicates(HashSet<PredicateId>),
}

impl RelationScope {
    fn selection(&self) -> RelationSelection {
        match self {
            Self::Layer => RelationSelection::All,
            Self::Predicates(preds) => RelationSelection::WithPredicates(preds.clone()),
        }
    }

    fn contains(&self, predicate: &PredicateId) -> bool {
        match self {
            Self::Layer => true,
            Self::Predicates(preds) => preds.contains(predicate),
        }
    }
}

/// What a bulk replace or layer clear did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReplaceOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// The changeset the diff was committed in; `None` if nothing changed.
    pub changeset_id: Option<ChangesetId>,
}

impl BulkReplaceOutcome {
    #[must_use]
    pub const fn changed(&self) -> bool {
        self.changeset_id.is_some()
    }
}

fn sorted_cis(ids: impl IntoIterator<Item = CiId>) -> Vec<CiId> {
    let mut out: Vec<CiId> = ids.into_iter().collect::<HashSet<_>>().into_iter().collect();
    out.sort_unstable();
    out
}

fn attribute_version(
    changeset: &Changeset,
    layer: &LayerId,
    ci_id: CiId,
    name: String,
    value: AttributeValue,
    state: FactState,
) -> CiAttribute {
    CiAttribute {
        id: AttributeId::new(),
        name,
        ci_id,
        layer_id: layer.clone(),
        value,
        state,
        changeset_id: changeset.id,
        timestamp: changeset.timestamp,
    }
}

fn relation_version(
    changeset: &Changeset,
    layer: &LayerId,
    key: RelationKey,
    state: FactState,
) -> Relation {
    Relation {
        id: RelationId::new(),
        from_ci: key.from_ci,
        to_ci: key.to_ci,
        predicate_id: key.predicate_id,
        layer_id: layer.clone(),
        state,
        changeset_id: changeset.id,
        timestamp: changeset.timestamp,
    }
}

impl CmdbEngine {
    /// Commits versions built against a materialized changeset.
    ///
    /// A changeset created for this commit is forgotten again if the commit
    /// fails, so a failed write leaves no changeset behind.
    fn commit_batch(
        &self,
        proxy: &mut ChangesetProxy,
        changeset: &Changeset,
        created: bool,
        attributes: Vec<CiAttribute>,
        relations: Vec<Relation>,
    ) -> StrataResult<()> {
        let batch = WriteBatch {
            changeset: created.then(|| changeset.clone()),
            attributes,
            relations,
        };
        if let Err(err) = self.store.commit(batch) {
            proxy.rollback(created);
            tracing::warn!(changeset = %changeset.id, error = %err, "commit failed");
            return Err(err.into());
        }
        if created {
            tracing::debug!(
                changeset = %changeset.id,
                user = %changeset.user,
                "changeset materialized"
            );
        }
        Ok(())
    }

    /// Sets an attribute in one layer.
    ///
    /// Returns the current version and whether anything changed. Writing the
    /// value the attribute already holds is a no-op and materializes no
    /// changeset.
    ///
    /// # Errors
    ///
    /// - `InvalidAttributeName` / `InvalidValue` for malformed input
    /// - `BackdatedWrite` if the proxy is older than the attribute's latest version
    /// - `UnknownLayer` / `LayerNotWritable` if the layer cannot be written
    /// - `UnknownCi` if the CI does not exist
    pub fn insert_attribute(
        &self,
        name: &str,
        value: AttributeValue,
        ci: CiId,
        layer: &LayerId,
        proxy: &mut ChangesetProxy,
    ) -> StrataResult<(CiAttribute, bool)> {
        validate_attribute_name(name)?;
        value.validate()?;
        self.writable_layer(layer)?;
        self.ensure_ci_exists(ci)?;

        let current = self
            .store
            .latest_attribute(ci, name, layer, &TimeThreshold::Latest)?;
        let head = current.as_ref().map(|cur| cur.timestamp);
        let state = match current {
            Some(cur) if !cur.is_removed() => {
                if cur.value == value {
                    tracing::debug!(%ci, name, %layer, changed = false, "attribute unchanged");
                    return Ok((cur, false));
                }
                FactState::Changed
            }
            _ => FactState::New,
        };
        ensure_not_backdated(proxy, || format!("({ci}, {name})"), &head)?;

        let (changeset, created) = proxy.materialize();
        let version = attribute_version(&changeset, layer, ci, name.to_string(), value, state);
        self.commit_batch(proxy, &changeset, created, vec![version.clone()], Vec::new())?;

        tracing::debug!(%ci, name, %layer, changed = true, "attribute written");
        self.notify(
            MutationKind::Attributes,
            layer,
            vec![ci],
            changeset.id,
            changeset.timestamp,
        );
        Ok((version, true))
    }

    /// Removes an attribute from one layer by appending a tombstone.
    ///
    /// Returns the tombstone, or `(None, false)` if the attribute is already
    /// absent in that layer.
    ///
    /// # Errors
    ///
    /// - `UnknownLayer` / `LayerNotWritable` if the layer cannot be written
    /// - `UnknownCi` if the CI does not exist
    pub fn remove_attribute(
        &self,
        name: &str,
        ci: CiId,
        layer: &LayerId,
        proxy: &mut ChangesetProxy,
    ) -> StrataResult<(Option<CiAttribute>, bool)> {
        self.writable_layer(layer)?;
        self.ensure_ci_exists(ci)?;

        let current = self
            .store
            .latest_attribute(ci, name, layer, &TimeThreshold::Latest)?;
        let Some(cur) = current.filter(|c| !c.is_removed()) else {
            tracing::debug!(%ci, name, %layer, changed = false, "attribute already absent");
            return Ok((None, false));
        };
        ensure_not_backdated(proxy, || format!("({ci}, {name})"), [&cur.timestamp])?;

        let (changeset, created) = proxy.materialize();
        let tombstone =
            attribute_version(&changeset, layer, ci, cur.name, cur.value, FactState::Removed);
        self.commit_batch(proxy, &changeset, created, vec![tombstone.clone()], Vec::new())?;

        tracing::debug!(%ci, name, %layer, changed = true, "attribute removed");
        self.notify(
            MutationKind::Attributes,
            layer,
            vec![ci],
            changeset.id,
            changeset.timestamp,
        );
        Ok((Some(tombstone), true))
    }

    /// Converges the attributes of one layer scope onto `fragments`.
    ///
    /// Computes the minimal diff against the live state at latest and commits
    /// it as one changeset. Attributes whose value already matches are left
    /// untouched and keep their changeset and timestamp.
    ///
    /// # Errors
    ///
    /// - `FragmentOutOfScope` / `DuplicateFragment` for inconsistent input
    /// - `InvalidAttributeName` / `InvalidValue` for malformed fragments
    /// - `UnknownLayer` / `LayerNotWritable` / `UnknownCi` as for single writes
    pub fn bulk_replace_attributes(
        &self,
        layer: &LayerId,
        scope: &AttributeScope,
        fragments: Vec<AttributeFragment>,
        proxy: &mut ChangesetProxy,
    ) -> StrataResult<BulkReplaceOutcome> {
        self.writable_layer(layer)?;

        let mut target: HashMap<(CiId, String), AttributeValue> =
            HashMap::with_capacity(fragments.len());
        for fragment in fragments {
            validate_attribute_name(&fragment.name)?;
            fragment.value.validate()?;
            let label = format!("({}, {})", fragment.ci_id, fragment.name);
            if !scope.contains(fragment.ci_id, &fragment.name) {
                return Err(ValidationError::FragmentOutOfScope { fragment: label }.into());
            }
            if target
                .insert((fragment.ci_id, fragment.name), fragment.value)
                .is_some()
            {
                return Err(ValidationError::DuplicateFragment { fragment: label }.into());
            }
        }
        for ci in sorted_cis(target.keys().map(|(ci, _)| *ci)) {
            self.ensure_ci_exists(ci)?;
        }

        let current = self.store.live_attributes(
            layer,
            &scope.ci_selection(),
            &AttributeSelection::All,
            &TimeThreshold::Latest,
        )?;

        let mut outcome = BulkReplaceOutcome::default();
        let mut writes: Vec<(CiId, String, AttributeValue, FactState)> = Vec::new();
        let mut superseded = Vec::new();
        for cur in current {
            if !scope.contains(cur.ci_id, &cur.name) {
                continue;
            }
            match target.remove(&(cur.ci_id, cur.name.clone())) {
                Some(value) if value == cur.value => outcome.unchanged += 1,
                Some(value) => {
                    superseded.push(cur.timestamp);
                    outcome.updated += 1;
                    writes.push((cur.ci_id, cur.name, value, FactState::Changed));
                }
                None => {
                    outcome.removed += 1;
                    superseded.push(cur.timestamp);
                    writes.push((cur.ci_id, cur.name, cur.value, FactState::Removed));
                }
            }
        }
        for ((ci, name), value) in target {
            outcome.inserted += 1;
            writes.push((ci, name, value, FactState::New));
        }

        if writes.is_empty() {
            tracing::debug!(%layer, unchanged = outcome.unchanged, "bulk replace is a no-op");
            return Ok(outcome);
        }
        ensure_not_backdated(proxy, || format!("attributes of layer {layer}"), &superseded)?;

        let (changeset, created) = proxy.materialize();
        let touched = sorted_cis(writes.iter().map(|w| w.0));
        let versions: Vec<CiAttribute> = writes
            .into_iter()
            .map(|(ci, name, value, state)| {
                attribute_version(&changeset, layer, ci, name, value, state)
            })
            .collect();
        self.commit_batch(proxy, &changeset, created, versions, Vec::new())?;
        outcome.changeset_id = Some(changeset.id);

        tracing::info!(
            %layer,
            inserted = outcome.inserted,
            updated = outcome.updated,
            removed = outcome.removed,
            unchanged = outcome.unchanged,
            "attribute bulk replace applied"
        );
        self.notify(
            MutationKind::Attributes,
            layer,
            touched,
            changeset.id,
            changeset.timestamp,
        );
        Ok(outcome)
    }

    /// Adds a relation in one layer.
    ///
    /// # Errors
    ///
    /// - `UnknownLayer` / `LayerNotWritable` if the layer cannot be written
    /// - `UnknownCi` if either end does not exist
    pub fn insert_relation(
        &self,
        from_ci: CiId,
        to_ci: CiId,
        predicate_id: PredicateId,
        layer: &LayerId,
        proxy: &mut ChangesetProxy,
    ) -> StrataResult<(Relation, bool)> {
        self.writable_layer(layer)?;
        self.ensure_ci_exists(from_ci)?;
        self.ensure_ci_exists(to_ci)?;

        let key = RelationKey::new(from_ci, to_ci, predicate_id);
        let current = self
            .store
            .latest_relation(&key, layer, &TimeThreshold::Latest)?;
        let head = current.as_ref().map(|cur| cur.timestamp);
        if let Some(cur) = current.filter(|r| !r.is_removed()) {
            tracing::debug!(relation = %key, %layer, changed = false, "relation unchanged");
            return Ok((cur, false));
        }
        ensure_not_backdated(proxy, || key.to_string(), &head)?;

        let (changeset, created) = proxy.materialize();
        let version = relation_version(&changeset, layer, key, FactState::New);
        self.commit_batch(proxy, &changeset, created, Vec::new(), vec![version.clone()])?;

        tracing::debug!(relation = %version.key(), %layer, changed = true, "relation written");
        self.notify(
            MutationKind::Relations,
            layer,
            sorted_cis([from_ci, to_ci]),
            changeset.id,
            changeset.timestamp,
        );
        Ok((version, true))
    }

    /// Removes a relation from one layer by appending a tombstone.
    ///
    /// # Errors
    ///
    /// - `UnknownLayer` / `LayerNotWritable` if the layer cannot be written
    /// - `UnknownCi` if either end does not exist
    pub fn remove_relation(
        &self,
        from_ci: CiId,
        to_ci: CiId,
        predicate_id: PredicateId,
        layer: &LayerId,
        proxy: &mut ChangesetProxy,
    ) -> StrataResult<(Option<Relation>, bool)> {
        self.writable_layer(layer)?;
        self.ensure_ci_exists(from_ci)?;
        self.ensure_ci_exists(to_ci)?;

        let key = RelationKey::new(from_ci, to_ci, predicate_id);
        let current = self
            .store
            .latest_relation(&key, layer, &TimeThreshold::Latest)?;
        let Some(cur) = current.filter(|r| !r.is_removed()) else {
            tracing::debug!(relation = %key, %layer, changed = false, "relation already absent");
            return Ok((None, false));
        };
        ensure_not_backdated(proxy, || key.to_string(), [&cur.timestamp])?;

        let (changeset, created) = proxy.materialize();
        let tombstone = relation_version(&changeset, layer, key, FactState::Removed);
        self.commit_batch(proxy, &changeset, created, Vec::new(), vec![tombstone.clone()])?;

        tracing::debug!(relation = %tombstone.key(), %layer, changed = true, "relation removed");
        self.notify(
            MutationKind::Relations,
            layer,
            sorted_cis([from_ci, to_ci]),
            changeset.id,
            changeset.timestamp,
        );
        Ok((Some(tombstone), true))
    }

    /// Converges the relations of one layer scope onto `fragments`.
    ///
    /// # Errors
    ///
    /// - `FragmentOutOfScope` / `DuplicateFragment` for inconsistent input
    /// - `UnknownLayer` / `LayerNotWritable` / `UnknownCi` as for single writes
    pub fn bulk_replace_relations(
        &self,
        layer: &LayerId,
        scope: &RelationScope,
        fragments: Vec<RelationFragment>,
        proxy: &mut ChangesetProxy,
    ) -> StrataResult<BulkReplaceOutcome> {
        self.writable_layer(layer)?;

        let mut target: HashSet<RelationKey> = HashSet::with_capacity(fragments.len());
        for fragment in &fragments {
            let key = fragment.key();
            if !scope.contains(&key.predicate_id) {
                return Err(ValidationError::FragmentOutOfScope {
                    fragment: key.to_string(),
                }
                .into());
            }
            if !target.insert(key.clone()) {
                return Err(ValidationError::DuplicateFragment {
                    fragment: key.to_string(),
                }
                .into());
            }
        }
        for ci in sorted_cis(target.iter().flat_map(|k| [k.from_ci, k.to_ci])) {
            self.ensure_ci_exists(ci)?;
        }

        let current =
            self.store
                .live_relations(layer, &scope.selection(), &TimeThreshold::Latest)?;

        let mut outcome = BulkReplaceOutcome::default();
        let mut writes: Vec<(RelationKey, FactState)> = Vec::new();
        let mut superseded = Vec::new();
        for cur in current {
            let key = cur.key();
            if target.remove(&key) {
                outcome.unchanged += 1;
            } else {
                outcome.removed += 1;
                superseded.push(cur.timestamp);
                writes.push((key, FactState::Removed));
            }
        }
        for key in target {
            outcome.inserted += 1;
            writes.push((key, FactState::New));
        }

        if writes.is_empty() {
            tracing::debug!(%layer, unchanged = outcome.unchanged, "bulk replace is a no-op");
            return Ok(outcome);
        }
        ensure_not_backdated(proxy, || format!("relations of layer {layer}"), &superseded)?;

        let (changeset, created) = proxy.materialize();
        let touched = sorted_cis(writes.iter().flat_map(|(k, _)| [k.from_ci, k.to_ci]));
        let versions: Vec<Relation> = writes
            .into_iter()
            .map(|(key, state)| relation_version(&changeset, layer, key, state))
            .collect();
        self.commit_batch(proxy, &changeset, created, Vec::new(), versions)?;
        outcome.changeset_id = Some(changeset.id);

        tracing::info!(
            %layer,
            inserted = outcome.inserted,
            removed = outcome.removed,
            unchanged = outcome.unchanged,
            "relation bulk replace applied"
        );
        self.notify(
            MutationKind::Relations,
            layer,
            touched,
            changeset.id,
            changeset.timestamp,
        );
        Ok(outcome)
    }

    /// Tombstones every live attribute and relation of a layer in one changeset.
    ///
    /// Deprecated and marked-for-deletion layers may be cleared; layers fed
    /// by an online source may not.
    ///
    /// # Errors
    ///
    /// - `UnknownLayer` if the layer does not exist
    /// - `LayerNotWritable` if the layer is online
    pub fn clear_layer(
        &self,
        layer: &LayerId,
        proxy: &mut ChangesetProxy,
    ) -> StrataResult<BulkReplaceOutcome> {
        let def = self
            .store
            .get_layer(layer)?
            .ok_or_else(|| AuthorizationError::UnknownLayer {
                layer_id: layer.clone(),
            })?;
        if def.is_online() {
            return Err(AuthorizationError::LayerNotWritable {
                layer_id: layer.clone(),
            }
            .into());
        }

        let attributes = self.store.live_attributes(
            layer,
            &CiSelection::All,
            &AttributeSelection::All,
            &TimeThreshold::Latest,
        )?;
        let relations =
            self.store
                .live_relations(layer, &RelationSelection::All, &TimeThreshold::Latest)?;
        let mut outcome = BulkReplaceOutcome {
            removed: attributes.len() + relations.len(),
            ..BulkReplaceOutcome::default()
        };
        if outcome.removed == 0 {
            return Ok(outcome);
        }
        ensure_not_backdated(
            proxy,
            || format!("layer {layer}"),
            attributes
                .iter()
                .map(|a| &a.timestamp)
                .chain(relations.iter().map(|r| &r.timestamp)),
        )?;

        let (changeset, created) = proxy.materialize();
        let touched = sorted_cis(
            attributes
                .iter()
                .map(|a| a.ci_id)
                .chain(relations.iter().flat_map(|r| [r.from_ci, r.to_ci])),
        );
        let attr_tombstones: Vec<CiAttribute> = attributes
            .into_iter()
            .map(|a| attribute_version(&changeset, layer, a.ci_id, a.name, a.value, FactState::Removed))
            .collect();
        let rel_tombstones: Vec<Relation> = relations
            .into_iter()
            .map(|r| relation_version(&changeset, layer, r.key(), FactState::Removed))
            .collect();
        self.commit_batch(proxy, &changeset, created, attr_tombstones, rel_tombstones)?;
        outcome.changeset_id = Some(changeset.id);

        tracing::info!(%layer, removed = outcome.removed, "layer cleared");
        self.notify(
            MutationKind::LayerCleared,
            layer,
            touched,
            changeset.id,
            changeset.timestamp,
        );
        Ok(outcome)
    }
}
