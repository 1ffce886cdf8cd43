//! Traits: named, structural classifications of CIs.
//!
//! A [`RecursiveTrait`] is what users author. The [`TraitRegistry`] flattens
//! it into a dependency-free [`GenericTrait`] at definition time, and the
//! [`TraitEvaluator`] checks merged CIs against flattened traits in boolean,
//! effective-trait, diagnostic and batch modes.

mod compose;
mod definition;
mod evaluate;
mod findings;
mod registry;

pub use compose::flatten;
pub use definition::{
    AttributeTemplate, GenericTrait, RecursiveTrait, RelationTemplate, TraitAttribute,
    TraitOrigin, TraitRelation, ValueConstraint,
};
pub use evaluate::{EffectiveTrait, TraitEvaluator};
pub use findings::{TemplateErrors, TemplateFinding};
pub use registry::{TraitLookup, TraitRegistry, NAMED_TRAIT_ID};

use std::collections::{HashMap, HashSet};

use crate::ci::CiId;
use crate::engine::MergedCi;
use crate::error::StrataResult;
use crate::layer::LayerSet;
use crate::selection::CiSelection;
use crate::time::TimeThreshold;

/// Batch evaluation result: every matching CI with its merged view.
pub type TraitMatches = HashMap<CiId, (MergedCi, EffectiveTrait)>;

/// Batch trait evaluation.
///
/// Implemented by the uncached [`TraitEvaluator`] and by the cache-backed
/// model, which can stand in for it anywhere.
pub trait EffectiveTraitModel: Send + Sync {
    /// Evaluates `t` for the selected CIs.
    ///
    /// # Errors
    ///
    /// Propagates storage and registry failures.
    fn evaluate_all_for_trait(
        &self,
        t: &GenericTrait,
        layers: &LayerSet,
        cis: &CiSelection,
        at: &TimeThreshold,
    ) -> StrataResult<TraitMatches>;

    /// Ids of the selected CIs having `t`.
    ///
    /// # Errors
    ///
    /// Propagates storage and registry failures.
    fn cis_with_trait(
        &self,
        t: &GenericTrait,
        layers: &LayerSet,
        cis: &CiSelection,
        at: &TimeThreshold,
    ) -> StrataResult<HashSet<CiId>> {
        Ok(self
            .evaluate_all_for_trait(t, layers, cis, at)?
            .into_keys()
            .collect())
    }

    /// Merged views of the selected CIs having `t`, ordered by id.
    ///
    /// # Errors
    ///
    /// Propagates storage and registry failures.
    fn merged_cis_with_trait(
        &self,
        t: &GenericTrait,
        layers: &LayerSet,
        cis: &CiSelection,
        at: &TimeThreshold,
    ) -> StrataResult<Vec<MergedCi>> {
        let mut out: Vec<MergedCi> = self
            .evaluate_all_for_trait(t, layers, cis, at)?
            .into_values()
            .map(|(ci, _)| ci)
            .collect();
        out.sort_unstable_by_key(|ci| ci.id);
        Ok(out)
    }
}
