//! Ground-truth trait evaluation over merged CIs.
//!
//! A CI has a trait when every required attribute template matches its merged
//! attribute and every required relation template finds an acceptable number
//! of matching relations. Optional templates never decide membership; they
//! only contribute to the resulting [`EffectiveTrait`].
//!
//! Relation templates may carry trait hints for the other end. Those are
//! checked recursively through the registry. A (CI, trait) pair that is
//! already being checked further up the stack counts as satisfied, so mutual
//! hints between two CIs terminate. Results that leaned on such an assumption
//! are never memoized.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::attribute::MergedCiAttribute;
use crate::ci::CiId;
use crate::engine::{CmdbEngine, MergedCi};
use crate::error::StrataResult;
use crate::layer::LayerSet;
use crate::relation::{CompactRelatedCi, Direction, MergedRelation};
use crate::selection::{AttributeSelection, CiSelection, RelationSelection};
use crate::time::TimeThreshold;

use super::definition::{GenericTrait, RelationTemplate};
use super::findings::{attribute_findings, cardinality_finding, TemplateErrors};
use super::registry::TraitLookup;
use super::{EffectiveTraitModel, TraitMatches};

/// A CI viewed through a trait: the merged facts bound to the trait's
/// template identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveTrait {
    pub trait_id: String,
    pub ci_id: CiId,
    pub attributes: BTreeMap<String, MergedCiAttribute>,
    pub relations: BTreeMap<String, Vec<CompactRelatedCi>>,
}

#[derive(Debug, Default)]
struct EvalContext {
    in_progress: HashSet<(CiId, String)>,
    /// In-progress pairs the current computation assumed to hold.
    assumed: HashSet<(CiId, String)>,
    memo: HashMap<(CiId, String), bool>,
}

fn has_relation_templates(t: &GenericTrait) -> bool {
    !t.required_relations.is_empty() || !t.optional_relations.is_empty()
}

/// Evaluates traits against merged data read from a [`CmdbEngine`].
pub struct TraitEvaluator {
    engine: Arc<CmdbEngine>,
    traits: Arc<dyn TraitLookup>,
}

impl std::fmt::Debug for TraitEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraitEvaluator").finish_non_exhaustive()
    }
}

impl TraitEvaluator {
    #[must_use]
    pub fn new(engine: Arc<CmdbEngine>, traits: Arc<dyn TraitLookup>) -> Self {
        Self { engine, traits }
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<CmdbEngine> {
        &self.engine
    }

    /// Whether `ci` has trait `t`.
    ///
    /// # Errors
    ///
    /// Propagates storage and registry failures.
    pub fn has_trait(&self, ci: &MergedCi, t: &GenericTrait) -> StrataResult<bool> {
        Ok(self.evaluate(ci, t)?.is_some())
    }

    /// The effective trait of `ci`, or `None` if the CI does not have `t`.
    ///
    /// # Errors
    ///
    /// Propagates storage and registry failures.
    pub fn evaluate(&self, ci: &MergedCi, t: &GenericTrait) -> StrataResult<Option<EffectiveTrait>> {
        let relations = self.relations_of(ci, t)?;
        let mut ctx = EvalContext::default();
        self.match_guarded(ci, &relations, t, &mut ctx)
    }

    /// Every finding of `ci` against `t`, instead of stopping at the first.
    ///
    /// Missing optional attributes and absent optional relations produce no
    /// finding; present ones must match their template.
    ///
    /// # Errors
    ///
    /// Propagates storage and registry failures.
    pub fn diagnose(&self, ci: &MergedCi, t: &GenericTrait) -> StrataResult<TemplateErrors> {
        let mut errors = TemplateErrors::new(t.id.clone(), ci.id);
        for (identifier, template) in &t.required_attributes {
            errors.add_attribute(identifier, attribute_findings(template, ci.attribute(&template.name)));
        }
        for (identifier, template) in &t.optional_attributes {
            if let Some(merged) = ci.attribute(&template.name) {
                errors.add_attribute(identifier, attribute_findings(template, Some(merged)));
            }
        }

        let relations = self.relations_of(ci, t)?;
        let mut ctx = EvalContext::default();
        ctx.in_progress.insert((ci.id, t.id.clone()));
        for (identifier, template) in &t.required_relations {
            let found = self.matching_relations(ci, template, &relations, &mut ctx)?.len();
            errors.add_relation(identifier, cardinality_finding(template, found));
        }
        for (identifier, template) in &t.optional_relations {
            let found = self.matching_relations(ci, template, &relations, &mut ctx)?.len();
            if found > 0 {
                errors.add_relation(identifier, cardinality_finding(template, found));
            }
        }
        Ok(errors)
    }

    /// Evaluates `t` for every selected CI with data in `layers`.
    ///
    /// When the trait requires attributes, only CIs holding all required
    /// attribute names are merged in full and checked.
    ///
    /// # Errors
    ///
    /// Propagates storage and registry failures.
    pub fn evaluate_all_for_trait(
        &self,
        t: &GenericTrait,
        layers: &LayerSet,
        cis: &CiSelection,
        at: &TimeThreshold,
    ) -> StrataResult<TraitMatches> {
        let mut out = HashMap::new();
        if cis.is_none() {
            return Ok(out);
        }

        let candidates: HashSet<CiId> = if t.required_attributes.is_empty() {
            self.engine.cis_with_data(cis, layers, at)?
        } else {
            let required = t.required_attribute_names();
            let names = AttributeSelection::Named(required.clone());
            self.engine
                .get_merged_attributes(cis, &names, layers, at)?
                .into_iter()
                .filter(|(_, attrs)| required.iter().all(|n| attrs.contains_key(n)))
                .map(|(id, _)| id)
                .collect()
        };
        if candidates.is_empty() {
            return Ok(out);
        }
        let selection = CiSelection::specific(candidates.iter().copied());

        let mut merged =
            self.engine
                .get_merged_attributes(&selection, &AttributeSelection::All, layers, at)?;
        let mut relations_by_ci: HashMap<CiId, Vec<MergedRelation>> = HashMap::new();
        if has_relation_templates(t) {
            let rels = self.engine.get_merged_relations(
                &RelationSelection::FromOrTo(candidates.clone()),
                layers,
                at,
            )?;
            for m in rels {
                let (from, to) = (m.relation.from_ci, m.relation.to_ci);
                if to != from && candidates.contains(&to) {
                    relations_by_ci.entry(to).or_default().push(m.clone());
                }
                if candidates.contains(&from) {
                    relations_by_ci.entry(from).or_default().push(m);
                }
            }
        }

        let mut ctx = EvalContext::default();
        for id in candidates {
            let ci = MergedCi {
                id,
                layers: layers.clone(),
                at: *at,
                attributes: merged.remove(&id).unwrap_or_default(),
            };
            let relations = relations_by_ci.remove(&id).unwrap_or_default();
            let matched = self.match_guarded(&ci, &relations, t, &mut ctx)?;
            ctx.assumed.clear();
            if let Some(effective) = matched {
                out.insert(id, (ci, effective));
            }
        }
        debug!(trait_id = %t.id, matches = out.len(), "evaluated trait");
        Ok(out)
    }

    fn relations_of(&self, ci: &MergedCi, t: &GenericTrait) -> StrataResult<Vec<MergedRelation>> {
        if !has_relation_templates(t) {
            return Ok(Vec::new());
        }
        self.engine
            .get_merged_relations(&RelationSelection::from_or_to([ci.id]), &ci.layers, &ci.at)
    }

    fn match_guarded(
        &self,
        ci: &MergedCi,
        relations: &[MergedRelation],
        t: &GenericTrait,
        ctx: &mut EvalContext,
    ) -> StrataResult<Option<EffectiveTrait>> {
        let key = (ci.id, t.id.clone());
        let inserted = ctx.in_progress.insert(key.clone());
        let result = self.match_trait(ci, relations, t, ctx);
        if inserted {
            ctx.in_progress.remove(&key);
        }
        result
    }

    fn match_trait(
        &self,
        ci: &MergedCi,
        relations: &[MergedRelation],
        t: &GenericTrait,
        ctx: &mut EvalContext,
    ) -> StrataResult<Option<EffectiveTrait>> {
        let mut attributes = BTreeMap::new();
        for (identifier, template) in &t.required_attributes {
            let merged = ci.attribute(&template.name);
            if !attribute_findings(template, merged).is_empty() {
                return Ok(None);
            }
            if let Some(merged) = merged {
                attributes.insert(identifier.clone(), merged.clone());
            }
        }
        for (identifier, template) in &t.optional_attributes {
            if let Some(merged) = ci.attribute(&template.name) {
                if attribute_findings(template, Some(merged)).is_empty() {
                    attributes.insert(identifier.clone(), merged.clone());
                }
            }
        }

        let mut bound = BTreeMap::new();
        for (identifier, template) in &t.required_relations {
            let matched = self.matching_relations(ci, template, relations, ctx)?;
            if !template.accepts_count(matched.len()) {
                return Ok(None);
            }
            bound.insert(identifier.clone(), matched);
        }
        for (identifier, template) in &t.optional_relations {
            let matched = self.matching_relations(ci, template, relations, ctx)?;
            if !matched.is_empty() && template.accepts_count(matched.len()) {
                bound.insert(identifier.clone(), matched);
            }
        }

        Ok(Some(EffectiveTrait {
            trait_id: t.id.clone(),
            ci_id: ci.id,
            attributes,
            relations: bound,
        }))
    }

    fn matching_relations(
        &self,
        ci: &MergedCi,
        template: &RelationTemplate,
        relations: &[MergedRelation],
        ctx: &mut EvalContext,
    ) -> StrataResult<Vec<CompactRelatedCi>> {
        let mut out = Vec::new();
        for m in relations {
            let r = &m.relation;
            if r.predicate_id != template.predicate_id {
                continue;
            }
            let (this_end, other, direction) = if template.direction_forward {
                (r.from_ci, r.to_ci, Direction::Forward)
            } else {
                (r.to_ci, r.from_ci, Direction::Back)
            };
            if this_end != ci.id {
                continue;
            }
            if !template.trait_hints.is_empty()
                && !self.satisfies_any_hint(other, &template.trait_hints, &ci.layers, &ci.at, ctx)?
            {
                continue;
            }
            out.push(CompactRelatedCi {
                other_ci: other,
                direction,
                predicate_id: r.predicate_id.clone(),
                relation: m.clone(),
            });
        }
        Ok(out)
    }

    fn satisfies_any_hint(
        &self,
        ci: CiId,
        hints: &[String],
        layers: &LayerSet,
        at: &TimeThreshold,
        ctx: &mut EvalContext,
    ) -> StrataResult<bool> {
        for hint in hints {
            if self.has_trait_by_id(ci, hint, layers, at, ctx)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn has_trait_by_id(
        &self,
        ci: CiId,
        trait_id: &str,
        layers: &LayerSet,
        at: &TimeThreshold,
        ctx: &mut EvalContext,
    ) -> StrataResult<bool> {
        let key = (ci, trait_id.to_string());
        if let Some(&known) = ctx.memo.get(&key) {
            return Ok(known);
        }
        if ctx.in_progress.contains(&key) {
            ctx.assumed.insert(key);
            return Ok(true);
        }
        let Some(t) = self.traits.get_trait(trait_id)? else {
            warn!(trait_id, "relation trait hint names an unknown trait");
            return Ok(false);
        };
        let Some(merged) = self.engine.get_merged_ci(ci, layers, at)? else {
            return Ok(false);
        };
        let relations = self.relations_of(&merged, &t)?;

        let outer = std::mem::take(&mut ctx.assumed);
        let result = self.match_guarded(&merged, &relations, &t, ctx);
        let mut assumed = std::mem::replace(&mut ctx.assumed, outer);
        let result = result?.is_some();
        assumed.remove(&key);
        if assumed.is_empty() {
            ctx.memo.insert(key, result);
        } else {
            ctx.assumed.extend(assumed);
        }
        Ok(result)
    }
}

impl EffectiveTraitModel for TraitEvaluator {
    fn evaluate_all_for_trait(
        &self,
        t: &GenericTrait,
        layers: &LayerSet,
        cis: &CiSelection,
        at: &TimeThreshold,
    ) -> StrataResult<TraitMatches> {
        Self::evaluate_all_for_trait(self, t, layers, cis, at)
    }
}
