//! The CMDB engine: write path and layer merge over a [`FactStore`].
//!
//! The engine validates writes, turns them into version batches with a
//! lazily materialized changeset, commits them atomically, and notifies
//! registered [`MutationObserver`]s. Reads merge the per-layer version
//! chains of a [`LayerSet`] into one winner per fact.

mod merge;
mod write_path;

pub use merge::MergedCi;
pub use write_path::{
    AttributeFragment, AttributeScope, BulkReplaceOutcome, RelationFragment, RelationScope,
};

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::attribute::CiAttribute;
use crate::changeset::{Changeset, ChangesetId};
use crate::ci::{Ci, CiId};
use crate::error::{AuthorizationError, StrataResult};
use crate::feed::{MutationEvent, MutationKind, MutationObserver};
use crate::layer::{Layer, LayerId};
use crate::relation::Relation;
use crate::selection::{AttributeSelection, CiSelection, RelationSelection};
use crate::storage::{FactStore, InMemoryFactStore};
use crate::time::TimeRange;

/// Entry point for reading and writing facts.
///
/// # Examples
///
/// ```
/// use strata::{AttributeValue, ChangesetProxy, CmdbEngine, Layer, LayerId, LayerSet, UserRef};
/// use strata::TimeThreshold;
///
/// let engine = CmdbEngine::in_memory();
/// let base = LayerId::new("base").unwrap();
/// engine.upsert_layer(Layer::new(base.clone())).unwrap();
/// let ci = engine.create_ci().unwrap();
///
/// let mut proxy = ChangesetProxy::now(UserRef::new("alice"));
/// let (_, changed) = engine
///     .insert_attribute("hostname", AttributeValue::text("srv1"), ci, &base, &mut proxy)
///     .unwrap();
/// assert!(changed);
///
/// let layers = LayerSet::new([base]).unwrap();
/// let merged = engine.get_merged_ci(ci, &layers, &TimeThreshold::Latest).unwrap().unwrap();
/// assert_eq!(merged.attribute("hostname").unwrap().value(), &AttributeValue::text("srv1"));
/// ```
pub struct CmdbEngine {
    store: Arc<dyn FactStore>,
    observers: Vec<Arc<dyn MutationObserver>>,
}

impl std::fmt::Debug for CmdbEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CmdbEngine")
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl CmdbEngine {
    /// Create a new engine over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn FactStore>) -> Self {
        Self {
            store,
            observers: Vec::new(),
        }
    }

    /// Create an engine over a fresh in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryFactStore::new()))
    }

    /// Register an observer that sees every committed mutation, in
    /// registration order.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn MutationObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn FactStore> {
        &self.store
    }

    /// Creates a CI with a fresh random id.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn create_ci(&self) -> StrataResult<CiId> {
        let id = CiId::new();
        self.store.create_ci(Ci::new(id))?;
        Ok(id)
    }

    /// Creates a CI with a caller-chosen id.
    ///
    /// # Errors
    ///
    /// Returns a storage `DuplicateKey` error if the CI already exists.
    pub fn create_ci_with_id(&self, id: CiId) -> StrataResult<()> {
        self.store.create_ci(Ci::new(id))?;
        Ok(())
    }

    /// Every registered CI.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn ci_ids(&self) -> StrataResult<HashSet<CiId>> {
        Ok(self.store.ci_ids()?)
    }

    /// Inserts or replaces a layer definition.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn upsert_layer(&self, layer: Layer) -> StrataResult<()> {
        tracing::info!(layer = %layer.id, state = ?layer.state, "layer upserted");
        self.store.upsert_layer(layer)?;
        Ok(())
    }

    /// Looks up a layer definition.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn get_layer(&self, id: &LayerId) -> StrataResult<Option<Layer>> {
        Ok(self.store.get_layer(id)?)
    }

    /// All layer definitions.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn list_layers(&self) -> StrataResult<Vec<Layer>> {
        Ok(self.store.list_layers()?)
    }

    /// Looks up a changeset.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn get_changeset(&self, id: ChangesetId) -> StrataResult<Option<Changeset>> {
        Ok(self.store.get_changeset(id)?)
    }

    /// Attribute versions produced by one changeset.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn attributes_of_changeset(&self, id: ChangesetId) -> StrataResult<Vec<CiAttribute>> {
        Ok(self.store.attributes_of_changeset(id)?)
    }

    /// Relation versions produced by one changeset.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn relations_of_changeset(&self, id: ChangesetId) -> StrataResult<Vec<Relation>> {
        Ok(self.store.relations_of_changeset(id)?)
    }

    /// Version history of one attribute key within `range`, oldest first.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn attribute_history(
        &self,
        ci: CiId,
        name: &str,
        layer: &LayerId,
        range: &TimeRange,
    ) -> StrataResult<Vec<CiAttribute>> {
        Ok(self.store.attribute_versions(
            layer,
            &CiSelection::specific([ci]),
            &AttributeSelection::named([name]),
            range,
        )?)
    }

    /// Version history of relations matching `selection` in one layer, oldest first.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn relation_history(
        &self,
        layer: &LayerId,
        selection: &RelationSelection,
        range: &TimeRange,
    ) -> StrataResult<Vec<Relation>> {
        Ok(self.store.relation_versions(layer, selection, range)?)
    }

    /// Resolves a layer that is about to receive writes.
    fn writable_layer(&self, id: &LayerId) -> StrataResult<Layer> {
        let layer = self
            .store
            .get_layer(id)?
            .ok_or_else(|| AuthorizationError::UnknownLayer {
                layer_id: id.clone(),
            })?;
        if !layer.is_writable() {
            return Err(AuthorizationError::LayerNotWritable {
                layer_id: id.clone(),
            }
            .into());
        }
        Ok(layer)
    }

    fn ensure_ci_exists(&self, id: CiId) -> StrataResult<()> {
        if self.store.ci_exists(id)? {
            Ok(())
        } else {
            Err(AuthorizationError::UnknownCi { id }.into())
        }
    }

    /// Reports a committed change to every observer.
    ///
    /// Observer failures are logged, not returned: the write has landed.
    fn notify(
        &self,
        kind: MutationKind,
        layer: &LayerId,
        ci_ids: Vec<CiId>,
        changeset_id: ChangesetId,
        timestamp: DateTime<Utc>,
    ) {
        if self.observers.is_empty() {
            return;
        }
        let event = MutationEvent {
            kind,
            layer: layer.clone(),
            ci_ids,
            changeset_id,
            timestamp,
        };
        for observer in &self.observers {
            if let Err(err) = observer.on_mutation(&event) {
                tracing::error!(%layer, %kind, error = %err, "mutation observer failed");
            }
        }
    }
}
