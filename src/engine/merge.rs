//! Layer merge.
//!
//! For a fixed fact key the merge looks at every layer of a [`LayerSet`],
//! takes each layer's current version at the threshold, drops absent and
//! removed ones, and lets the highest-precedence survivor win. The surviving
//! layers, in layer set order, form the provenance stack with the winner last.
//!
//! Walking the layer set from lowest to highest precedence and overwriting
//! produces exactly that result in a single pass.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::attribute::{CiAttribute, MergedCiAttribute, CI_NAME_ATTRIBUTE};
use crate::ci::CiId;
use crate::error::StrataResult;
use crate::layer::{LayerId, LayerSet};
use crate::relation::{CompactRelatedCi, MergedRelation, Relation, RelationKey};
use crate::selection::{AttributeSelection, CiSelection, RelationSelection};
use crate::time::TimeThreshold;

use super::CmdbEngine;

/// A CI's merged attributes under one layer set and threshold.
///
/// Derived on every query and never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedCi {
    pub id: CiId,
    pub layers: LayerSet,
    pub at: TimeThreshold,
    pub attributes: HashMap<String, MergedCiAttribute>,
}

impl MergedCi {
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&MergedCiAttribute> {
        self.attributes.get(name)
    }

    /// Display name from the reserved `__name` attribute, if it holds text.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.attributes
            .get(CI_NAME_ATTRIBUTE)
            .filter(|a| !a.value().is_array())
            .and_then(|a| a.value().items().first())
            .and_then(|item| item.as_text())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

fn merge_attribute(
    out: &mut HashMap<String, MergedCiAttribute>,
    layer: &LayerId,
    attr: CiAttribute,
) {
    match out.entry(attr.name.clone()) {
        Entry::Vacant(e) => {
            e.insert(MergedCiAttribute {
                attribute: attr,
                layer_stack: vec![layer.clone()],
            });
        }
        Entry::Occupied(mut e) => {
            let merged = e.get_mut();
            merged.layer_stack.push(layer.clone());
            merged.attribute = attr;
        }
    }
}

fn merge_relation(
    out: &mut HashMap<RelationKey, MergedRelation>,
    layer: &LayerId,
    rel: Relation,
) {
    match out.entry(rel.key()) {
        Entry::Vacant(e) => {
            e.insert(MergedRelation {
                relation: rel,
                layer_stack: vec![layer.clone()],
            });
        }
        Entry::Occupied(mut e) => {
            let merged = e.get_mut();
            merged.layer_stack.push(layer.clone());
            merged.relation = rel;
        }
    }
}

impl CmdbEngine {
    /// Merges one attribute of one CI.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn get_merged_attribute(
        &self,
        ci: CiId,
        name: &str,
        layers: &LayerSet,
        at: &TimeThreshold,
    ) -> StrataResult<Option<MergedCiAttribute>> {
        let mut out = HashMap::with_capacity(1);
        for layer in layers {
            if let Some(attr) = self.store.latest_attribute(ci, name, layer, at)? {
                if !attr.is_removed() {
                    merge_attribute(&mut out, layer, attr);
                }
            }
        }
        Ok(out.remove(name))
    }

    /// Merges the selected attributes of the selected CIs.
    ///
    /// CIs without any live attribute in the layer set are absent from the
    /// result.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn get_merged_attributes(
        &self,
        cis: &CiSelection,
        names: &AttributeSelection,
        layers: &LayerSet,
        at: &TimeThreshold,
    ) -> StrataResult<HashMap<CiId, HashMap<String, MergedCiAttribute>>> {
        let mut out: HashMap<CiId, HashMap<String, MergedCiAttribute>> = HashMap::new();
        if cis.is_none() {
            return Ok(out);
        }
        for layer in layers {
            for attr in self.store.live_attributes(layer, cis, names, at)? {
                merge_attribute(out.entry(attr.ci_id).or_default(), layer, attr);
            }
        }
        Ok(out)
    }

    /// Merges all attributes of one CI, or `None` if the CI does not exist.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn get_merged_ci(
        &self,
        ci: CiId,
        layers: &LayerSet,
        at: &TimeThreshold,
    ) -> StrataResult<Option<MergedCi>> {
        if !self.store.ci_exists(ci)? {
            return Ok(None);
        }
        let mut merged = self.get_merged_attributes(
            &CiSelection::specific([ci]),
            &AttributeSelection::All,
            layers,
            at,
        )?;
        Ok(Some(MergedCi {
            id: ci,
            layers: layers.clone(),
            at: *at,
            attributes: merged.remove(&ci).unwrap_or_default(),
        }))
    }

    /// Merges all attributes of the selected CIs, ordered by CI id.
    ///
    /// With `include_empty`, existing CIs without attributes are returned with
    /// an empty attribute map; otherwise they are skipped.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn get_merged_cis(
        &self,
        cis: &CiSelection,
        layers: &LayerSet,
        at: &TimeThreshold,
        include_empty: bool,
    ) -> StrataResult<Vec<MergedCi>> {
        let mut merged = self.get_merged_attributes(cis, &AttributeSelection::All, layers, at)?;
        let ids: HashSet<CiId> = if include_empty {
            cis.resolve(&self.store.ci_ids()?)
        } else {
            merged.keys().copied().collect()
        };
        let mut out: Vec<MergedCi> = ids
            .into_iter()
            .map(|id| MergedCi {
                id,
                layers: layers.clone(),
                at: *at,
                attributes: merged.remove(&id).unwrap_or_default(),
            })
            .collect();
        out.sort_unstable_by_key(|ci| ci.id);
        Ok(out)
    }

    /// Merges the selected relations, ordered by key.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn get_merged_relations(
        &self,
        selection: &RelationSelection,
        layers: &LayerSet,
        at: &TimeThreshold,
    ) -> StrataResult<Vec<MergedRelation>> {
        let mut out: HashMap<RelationKey, MergedRelation> = HashMap::new();
        for layer in layers {
            for rel in self.store.live_relations(layer, selection, at)? {
                merge_relation(&mut out, layer, rel);
            }
        }
        let mut merged: Vec<MergedRelation> = out.into_values().collect();
        merged.sort_unstable_by_key(|m| m.relation.key());
        Ok(merged)
    }

    /// Merged relations touching `ci`, seen from `ci`.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn related_cis(
        &self,
        ci: CiId,
        layers: &LayerSet,
        at: &TimeThreshold,
    ) -> StrataResult<Vec<CompactRelatedCi>> {
        let merged =
            self.get_merged_relations(&RelationSelection::from_or_to([ci]), layers, at)?;
        Ok(merged
            .iter()
            .filter_map(|m| CompactRelatedCi::from_perspective(ci, m))
            .collect())
    }

    /// CIs in `cis` holding at least one live attribute or relation.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn cis_with_data(
        &self,
        cis: &CiSelection,
        layers: &LayerSet,
        at: &TimeThreshold,
    ) -> StrataResult<HashSet<CiId>> {
        let mut out = HashSet::new();
        if cis.is_none() {
            return Ok(out);
        }
        let relation_selection = match cis.specific_ids() {
            Some(ids) => RelationSelection::FromOrTo(ids),
            None => RelationSelection::All,
        };
        for layer in layers {
            for attr in self
                .store
                .live_attributes(layer, cis, &AttributeSelection::All, at)?
            {
                out.insert(attr.ci_id);
            }
            for rel in self.store.live_relations(layer, &relation_selection, at)? {
                for id in [rel.from_ci, rel.to_ci] {
                    if cis.contains(id) {
                        out.insert(id);
                    }
                }
            }
        }
        Ok(out)
    }
}
