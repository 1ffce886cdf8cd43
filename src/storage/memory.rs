//! In-memory storage backend.
//!
//! A thread-safe implementation of [`FactStore`] for embedded usage, tests,
//! and as a reference for durable backends. All state sits behind one
//! `RwLock`, which makes `commit` trivially atomic with respect to readers.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::attribute::CiAttribute;
use crate::changeset::{Changeset, ChangesetId};
use crate::ci::{Ci, CiId};
use crate::layer::{Layer, LayerId};
use crate::relation::{Relation, RelationKey};
use crate::selection::{AttributeSelection, CiSelection, RelationSelection};
use crate::storage::traits::{FactStore, StorageError, WriteBatch};
use crate::time::{TimeRange, TimeThreshold};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

trait Versioned {
    fn timestamp(&self) -> DateTime<Utc>;
    fn is_removed(&self) -> bool;
}

impl Versioned for CiAttribute {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn is_removed(&self) -> bool {
        self.state.is_removed()
    }
}

impl Versioned for Relation {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn is_removed(&self) -> bool {
        self.state.is_removed()
    }
}

/// The chain entry visible at `at`, tombstones included.
fn current_at<'a, T: Versioned>(chain: &'a [T], at: &TimeThreshold) -> Option<&'a T> {
    match at {
        TimeThreshold::Latest => chain.last(),
        TimeThreshold::At(t) => {
            let idx = chain.partition_point(|v| v.timestamp() <= *t);
            idx.checked_sub(1).map(|i| &chain[i])
        }
    }
}

fn live_at<'a, T: Versioned>(chain: &'a [T], at: &TimeThreshold) -> Option<&'a T> {
    current_at(chain, at).filter(|v| !v.is_removed())
}

/// Keeps the chain ordered by timestamp; equal timestamps keep insertion order.
fn append_version<T: Versioned>(chain: &mut Vec<T>, version: T) {
    let idx = chain.partition_point(|v| v.timestamp() <= version.timestamp());
    chain.insert(idx, version);
}

type NameChains = HashMap<String, Vec<CiAttribute>>;

#[derive(Debug, Default)]
struct LayerFacts {
    attributes: HashMap<CiId, NameChains>,
    relations: HashMap<RelationKey, Vec<Relation>>,
}

impl LayerFacts {
    fn ci_chains<'a>(
        &'a self,
        cis: &'a CiSelection,
    ) -> Box<dyn Iterator<Item = (&'a CiId, &'a NameChains)> + 'a> {
        match cis {
            CiSelection::None => Box::new(std::iter::empty()),
            CiSelection::Specific(ids) => Box::new(
                ids.iter()
                    .filter_map(move |id| self.attributes.get_key_value(id)),
            ),
            CiSelection::All | CiSelection::AllExcept(_) => Box::new(
                self.attributes
                    .iter()
                    .filter(move |(id, _)| cis.contains(**id)),
            ),
        }
    }

    fn name_chains<'a>(
        chains: &'a NameChains,
        names: &'a AttributeSelection,
    ) -> Box<dyn Iterator<Item = &'a Vec<CiAttribute>> + 'a> {
        match names {
            AttributeSelection::Named(set) => {
                Box::new(set.iter().filter_map(move |n| chains.get(n.as_str())))
            }
            AttributeSelection::All | AttributeSelection::Regex(_) => Box::new(
                chains
                    .iter()
                    .filter(move |(n, _)| names.contains(n))
                    .map(|(_, c)| c),
            ),
        }
    }

    fn relation_chains<'a>(
        &'a self,
        selection: &'a RelationSelection,
    ) -> Box<dyn Iterator<Item = &'a Vec<Relation>> + 'a> {
        if let RelationSelection::Exact(key) = selection {
            return Box::new(self.relations.get(key).into_iter());
        }
        Box::new(
            self.relations
                .iter()
                .filter(move |(key, _)| match selection {
                    RelationSelection::All | RelationSelection::Exact(_) => true,
                    RelationSelection::From(ids) => ids.contains(&key.from_ci),
                    RelationSelection::To(ids) => ids.contains(&key.to_ci),
                    RelationSelection::FromOrTo(ids) => {
                        ids.contains(&key.from_ci) || ids.contains(&key.to_ci)
                    }
                    RelationSelection::WithPredicates(preds) => {
                        preds.contains(&key.predicate_id)
                    }
                })
                .map(|(_, c)| c),
        )
    }
}

#[derive(Debug, Default)]
struct FactState {
    cis: HashMap<CiId, Ci>,
    layers: BTreeMap<LayerId, Layer>,
    changesets: HashMap<ChangesetId, Changeset>,
    facts: HashMap<LayerId, LayerFacts>,
}

impl FactState {
    fn check_ci(&self, id: CiId) -> Result<(), StorageError> {
        if self.cis.contains_key(&id) {
            Ok(())
        } else {
            Err(StorageError::CiNotFound(id))
        }
    }

    fn check_layer(&self, id: &LayerId) -> Result<(), StorageError> {
        if self.layers.contains_key(id) {
            Ok(())
        } else {
            Err(StorageError::LayerNotFound(id.clone()))
        }
    }

    fn check_changeset(
        &self,
        id: ChangesetId,
        pending: Option<&Changeset>,
    ) -> Result<(), StorageError> {
        if pending.is_some_and(|cs| cs.id == id) || self.changesets.contains_key(&id) {
            Ok(())
        } else {
            Err(StorageError::ChangesetNotFound(id))
        }
    }

    fn validate(&self, batch: &WriteBatch) -> Result<(), StorageError> {
        if let Some(cs) = &batch.changeset {
            if self.changesets.contains_key(&cs.id) {
                return Err(StorageError::DuplicateKey(format!("changeset {}", cs.id)));
            }
        }
        let pending = batch.changeset.as_ref();
        for attr in &batch.attributes {
            self.check_ci(attr.ci_id)?;
            self.check_layer(&attr.layer_id)?;
            self.check_changeset(attr.changeset_id, pending)?;
        }
        for rel in &batch.relations {
            self.check_ci(rel.from_ci)?;
            self.check_ci(rel.to_ci)?;
            self.check_layer(&rel.layer_id)?;
            self.check_changeset(rel.changeset_id, pending)?;
        }
        Ok(())
    }
}

/// Thread-safe in-memory fact store.
#[derive(Debug, Default)]
pub struct InMemoryFactStore {
    state: RwLock<FactState>,
}

impl InMemoryFactStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FactStore for InMemoryFactStore {
    fn create_ci(&self, ci: Ci) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("facts write"))?;
        if state.cis.contains_key(&ci.id) {
            return Err(StorageError::DuplicateKey(format!("CI {}", ci.id)));
        }
        state.cis.insert(ci.id, ci);
        Ok(())
    }

    fn ci_exists(&self, id: CiId) -> Result<bool, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("facts read"))?;
        Ok(state.cis.contains_key(&id))
    }

    fn ci_ids(&self) -> Result<HashSet<CiId>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("facts read"))?;
        Ok(state.cis.keys().copied().collect())
    }

    fn upsert_layer(&self, layer: Layer) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("facts write"))?;
        state.layers.insert(layer.id.clone(), layer);
        Ok(())
    }

    fn get_layer(&self, id: &LayerId) -> Result<Option<Layer>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("facts read"))?;
        Ok(state.layers.get(id).cloned())
    }

    fn list_layers(&self) -> Result<Vec<Layer>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("facts read"))?;
        Ok(state.layers.values().cloned().collect())
    }

    fn get_changeset(&self, id: ChangesetId) -> Result<Option<Changeset>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("facts read"))?;
        Ok(state.changesets.get(&id).cloned())
    }

    fn latest_attribute(
        &self,
        ci: CiId,
        name: &str,
        layer: &LayerId,
        at: &TimeThreshold,
    ) -> Result<Option<CiAttribute>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("facts read"))?;
        Ok(state
            .facts
            .get(layer)
            .and_then(|f| f.attributes.get(&ci))
            .and_then(|chains| chains.get(name))
            .and_then(|chain| current_at(chain, at))
            .cloned())
    }

    fn live_attributes(
        &self,
        layer: &LayerId,
        cis: &CiSelection,
        names: &AttributeSelection,
        at: &TimeThreshold,
    ) -> Result<Vec<CiAttribute>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("facts read"))?;
        let Some(facts) = state.facts.get(layer) else {
            return Ok(Vec::new());
        };
        Ok(facts
            .ci_chains(cis)
            .flat_map(|(_, chains)| LayerFacts::name_chains(chains, names))
            .filter_map(|chain| live_at(chain, at).cloned())
            .collect())
    }

    fn attribute_versions(
        &self,
        layer: &LayerId,
        cis: &CiSelection,
        names: &AttributeSelection,
        range: &TimeRange,
    ) -> Result<Vec<CiAttribute>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("facts read"))?;
        let Some(facts) = state.facts.get(layer) else {
            return Ok(Vec::new());
        };
        let mut out: Vec<CiAttribute> = facts
            .ci_chains(cis)
            .flat_map(|(_, chains)| LayerFacts::name_chains(chains, names))
            .flatten()
            .filter(|v| range.contains(v.timestamp))
            .cloned()
            .collect();
        out.sort_by_key(|v| v.timestamp);
        Ok(out)
    }

    fn attributes_of_changeset(&self, id: ChangesetId) -> Result<Vec<CiAttribute>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("facts read"))?;
        Ok(state
            .facts
            .values()
            .flat_map(|f| f.attributes.values())
            .flat_map(HashMap::values)
            .flatten()
            .filter(|v| v.changeset_id == id)
            .cloned()
            .collect())
    }

    fn latest_relation(
        &self,
        key: &RelationKey,
        layer: &LayerId,
        at: &TimeThreshold,
    ) -> Result<Option<Relation>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("facts read"))?;
        Ok(state
            .facts
            .get(layer)
            .and_then(|f| f.relations.get(key))
            .and_then(|chain| current_at(chain, at))
            .cloned())
    }

    fn live_relations(
        &self,
        layer: &LayerId,
        selection: &RelationSelection,
        at: &TimeThreshold,
    ) -> Result<Vec<Relation>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("facts read"))?;
        let Some(facts) = state.facts.get(layer) else {
            return Ok(Vec::new());
        };
        Ok(facts
            .relation_chains(selection)
            .filter_map(|chain| live_at(chain, at).cloned())
            .collect())
    }

    fn relation_versions(
        &self,
        layer: &LayerId,
        selection: &RelationSelection,
        range: &TimeRange,
    ) -> Result<Vec<Relation>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("facts read"))?;
        let Some(facts) = state.facts.get(layer) else {
            return Ok(Vec::new());
        };
        let mut out: Vec<Relation> = facts
            .relation_chains(selection)
            .flatten()
            .filter(|v| range.contains(v.timestamp))
            .cloned()
            .collect();
        out.sort_by_key(|v| v.timestamp);
        Ok(out)
    }

    fn relations_of_changeset(&self, id: ChangesetId) -> Result<Vec<Relation>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("facts read"))?;
        Ok(state
            .facts
            .values()
            .flat_map(|f| f.relations.values())
            .flatten()
            .filter(|v| v.changeset_id == id)
            .cloned()
            .collect())
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("facts write"))?;
        state.validate(&batch)?;

        let WriteBatch {
            changeset,
            attributes,
            relations,
        } = batch;
        if let Some(cs) = changeset {
            state.changesets.insert(cs.id, cs);
        }
        for attr in attributes {
            let chain = state
                .facts
                .entry(attr.layer_id.clone())
                .or_default()
                .attributes
                .entry(attr.ci_id)
                .or_default()
                .entry(attr.name.clone())
                .or_default();
            append_version(chain, attr);
        }
        for rel in relations {
            let chain = state
                .facts
                .entry(rel.layer_id.clone())
                .or_default()
                .relations
                .entry(rel.key())
                .or_default();
            append_version(chain, rel);
        }
        Ok(())
    }
}
