//! Cache-backed batch trait evaluation.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::ci::CiId;
use crate::engine::CmdbEngine;
use crate::error::StrataResult;
use crate::layer::LayerSet;
use crate::selection::CiSelection;
use crate::time::TimeThreshold;
use crate::traits::{EffectiveTraitModel, GenericTrait, TraitMatches};

use super::EffectiveTraitCache;

/// Drop-in replacement for an uncached [`EffectiveTraitModel`].
///
/// On a hit only the cached superset, narrowed to the caller's selection, is
/// evaluated, and members found to no longer qualify are shrunk away. On a
/// miss the whole CI universe is evaluated once and cached exactly.
///
/// Historical thresholds, layer sets containing an online layer, a disabled
/// cache and traits whose membership follows trait hints on neighbouring CIs
/// all go straight to the inner model.
pub struct CachingEffectiveTraitModel {
    inner: Arc<dyn EffectiveTraitModel>,
    engine: Arc<CmdbEngine>,
    cache: Arc<EffectiveTraitCache>,
    enabled: bool,
}

impl std::fmt::Debug for CachingEffectiveTraitModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingEffectiveTraitModel")
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl CachingEffectiveTraitModel {
    #[must_use]
    pub fn new(
        inner: Arc<dyn EffectiveTraitModel>,
        engine: Arc<CmdbEngine>,
        cache: Arc<EffectiveTraitCache>,
    ) -> Self {
        Self {
            inner,
            engine,
            cache,
            enabled: true,
        }
    }

    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<EffectiveTraitCache> {
        &self.cache
    }

    fn bypasses(
        &self,
        t: &GenericTrait,
        layers: &LayerSet,
        at: &TimeThreshold,
    ) -> StrataResult<bool> {
        if !self.enabled || !at.is_latest() || t.depends_on_neighbours() {
            return Ok(true);
        }
        for id in layers {
            if self.engine.get_layer(id)?.is_some_and(|l| l.is_online()) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl EffectiveTraitModel for CachingEffectiveTraitModel {
    fn evaluate_all_for_trait(
        &self,
        t: &GenericTrait,
        layers: &LayerSet,
        cis: &CiSelection,
        at: &TimeThreshold,
    ) -> StrataResult<TraitMatches> {
        if cis.is_none() {
            return Ok(TraitMatches::new());
        }
        if self.bypasses(t, layers, at)? {
            debug!(trait_id = %t.id, "trait cache bypassed");
            return self.inner.evaluate_all_for_trait(t, layers, cis, at);
        }

        let lookup = self.cache.lookup(&t.id, layers)?;
        if lookup.hit {
            let reduced = cis.intersect(&CiSelection::specific(lookup.superset));
            let Some(candidates) = reduced.specific_ids() else {
                return self.inner.evaluate_all_for_trait(t, layers, cis, at);
            };
            if candidates.is_empty() {
                debug!(trait_id = %t.id, "trait cache hit, nothing selected");
                return Ok(TraitMatches::new());
            }
            let result = self.inner.evaluate_all_for_trait(t, layers, &reduced, at)?;
            if result.len() < candidates.len() {
                let stale: HashSet<CiId> = candidates
                    .into_iter()
                    .filter(|id| !result.contains_key(id))
                    .collect();
                self.cache
                    .shrink_if_current(&stale, &t.id, layers, lookup.generation)?;
            }
            debug!(trait_id = %t.id, matches = result.len(), "trait cache hit");
            return Ok(result);
        }

        let mut all = self
            .inner
            .evaluate_all_for_trait(t, layers, &CiSelection::All, at)?;
        self.cache.full_update_if_current(
            &t.id,
            layers,
            all.keys().copied().collect(),
            lookup.generation,
        )?;
        all.retain(|id, _| cis.contains(*id));
        debug!(trait_id = %t.id, matches = all.len(), "trait cache miss");
        Ok(all)
    }
}
