//! The persistence contract the core consumes.
//!
//! A [`FactStore`] holds append-only version chains for attributes and
//! relations, keyed per layer, and answers "as of" reads against them. It
//! does not merge layers; that is the engine's job.

use std::collections::HashSet;

use thiserror::Error;

use crate::attribute::CiAttribute;
use crate::changeset::{Changeset, ChangesetId};
use crate::ci::{Ci, CiId};
use crate::layer::{Layer, LayerId};
use crate::relation::{Relation, RelationKey};
use crate::selection::{AttributeSelection, CiSelection, RelationSelection};
use crate::time::{TimeRange, TimeThreshold};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// CI not found.
    #[error("CI not found: {0}")]
    CiNotFound(CiId),

    /// Layer not found.
    #[error("Layer not found: {0}")]
    LayerNotFound(LayerId),

    /// A version references a changeset that is neither stored nor part of the batch.
    #[error("Changeset not found: {0}")]
    ChangesetNotFound(ChangesetId),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// Everything one changeset writes, applied all-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    /// A newly materialized changeset to persist before linking versions to it.
    pub changeset: Option<Changeset>,
    pub attributes: Vec<CiAttribute>,
    pub relations: Vec<Relation>,
}

impl WriteBatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.relations.is_empty()
    }

    /// CIs touched by the attribute and relation versions in this batch.
    #[must_use]
    pub fn touched_cis(&self) -> HashSet<CiId> {
        self.attributes
            .iter()
            .map(|a| a.ci_id)
            .chain(self.relations.iter().flat_map(|r| [r.from_ci, r.to_ci]))
            .collect()
    }
}

/// Durable, queryable store of versioned facts.
///
/// # Semantics
/// - Version chains are append-only and ordered by timestamp.
/// - The "current" version of a key at a threshold is the chain entry with
///   the greatest timestamp at or before it; it may be a tombstone.
/// - `commit` is atomic: readers see all of a batch or none of it.
pub trait FactStore: Send + Sync {
    /// Registers a CI. Fails with `DuplicateKey` if it already exists.
    fn create_ci(&self, ci: Ci) -> Result<(), StorageError>;

    fn ci_exists(&self, id: CiId) -> Result<bool, StorageError>;

    /// Every registered CI id.
    fn ci_ids(&self) -> Result<HashSet<CiId>, StorageError>;

    /// Inserts or replaces a layer definition.
    fn upsert_layer(&self, layer: Layer) -> Result<(), StorageError>;

    fn get_layer(&self, id: &LayerId) -> Result<Option<Layer>, StorageError>;

    fn list_layers(&self) -> Result<Vec<Layer>, StorageError>;

    fn get_changeset(&self, id: ChangesetId) -> Result<Option<Changeset>, StorageError>;

    /// The current version of one attribute key, tombstones included.
    fn latest_attribute(
        &self,
        ci: CiId,
        name: &str,
        layer: &LayerId,
        at: &TimeThreshold,
    ) -> Result<Option<CiAttribute>, StorageError>;

    /// Current, non-removed attribute versions in one layer.
    fn live_attributes(
        &self,
        layer: &LayerId,
        cis: &CiSelection,
        names: &AttributeSelection,
        at: &TimeThreshold,
    ) -> Result<Vec<CiAttribute>, StorageError>;

    /// All attribute versions in one layer whose timestamp falls in `range`,
    /// oldest first.
    fn attribute_versions(
        &self,
        layer: &LayerId,
        cis: &CiSelection,
        names: &AttributeSelection,
        range: &TimeRange,
    ) -> Result<Vec<CiAttribute>, StorageError>;

    fn attributes_of_changeset(&self, id: ChangesetId) -> Result<Vec<CiAttribute>, StorageError>;

    /// The current version of one relation key, tombstones included.
    fn latest_relation(
        &self,
        key: &RelationKey,
        layer: &LayerId,
        at: &TimeThreshold,
    ) -> Result<Option<Relation>, StorageError>;

    /// Current, non-removed relation versions in one layer.
    fn live_relations(
        &self,
        layer: &LayerId,
        selection: &RelationSelection,
        at: &TimeThreshold,
    ) -> Result<Vec<Relation>, StorageError>;

    /// All relation versions in one layer whose timestamp falls in `range`,
    /// oldest first.
    fn relation_versions(
        &self,
        layer: &LayerId,
        selection: &RelationSelection,
        range: &TimeRange,
    ) -> Result<Vec<Relation>, StorageError>;

    fn relations_of_changeset(&self, id: ChangesetId) -> Result<Vec<Relation>, StorageError>;

    /// Applies a batch atomically.
    ///
    /// # Errors
    /// - `CiNotFound`: a version references an unregistered CI
    /// - `LayerNotFound`: a version targets an unknown layer
    /// - `ChangesetNotFound`: a version references an unknown changeset
    /// - `DuplicateKey`: the batch's changeset id is already stored
    fn commit(&self, batch: WriteBatch) -> Result<(), StorageError>;
}
