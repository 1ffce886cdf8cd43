//! One explicitly constructed Strata core.

use std::sync::Arc;

use tracing::info;

use crate::cache::{CachingEffectiveTraitModel, EffectiveTraitCache, TraitCacheInvalidator};
use crate::config::StrataConfig;
use crate::engine::CmdbEngine;
use crate::error::StrataResult;
use crate::feed::MutationFeed;
use crate::storage::{FactStore, InMemoryFactStore};
use crate::traits::{EffectiveTraitModel, TraitEvaluator, TraitRegistry};

/// The engine, trait registry, evaluators, cache and feed, wired together.
///
/// Each instance owns its own cache and feed; nothing is process-global, so
/// tests can build as many isolated instances as they like.
///
/// # Examples
///
/// ```
/// use strata::{Strata, StrataConfig};
///
/// let strata = Strata::in_memory(StrataConfig::default()).unwrap();
/// assert!(strata.registry().get("named").unwrap().is_some());
/// ```
#[derive(Debug)]
pub struct Strata {
    config: StrataConfig,
    engine: Arc<CmdbEngine>,
    registry: Arc<TraitRegistry>,
    evaluator: Arc<TraitEvaluator>,
    cache: Arc<EffectiveTraitCache>,
    model: Arc<CachingEffectiveTraitModel>,
    feed: Arc<MutationFeed>,
}

impl Strata {
    /// Builds a core over `store`.
    ///
    /// # Errors
    ///
    /// Fails if the core traits cannot be registered.
    pub fn new(config: StrataConfig, store: Arc<dyn FactStore>) -> StrataResult<Self> {
        let cache = Arc::new(EffectiveTraitCache::new());
        let feed = Arc::new(MutationFeed::new(&config.feed));
        let invalidator = Arc::new(TraitCacheInvalidator::new(
            Arc::clone(&cache),
            config.trait_config_layers.iter().cloned(),
        ));
        let engine = Arc::new(
            CmdbEngine::new(store)
                .with_observer(invalidator)
                .with_observer(feed.clone()),
        );
        let registry = Arc::new(TraitRegistry::with_cache(Arc::clone(&cache)).with_core_traits()?);
        let evaluator = Arc::new(TraitEvaluator::new(Arc::clone(&engine), registry.clone()));
        let model = Arc::new(
            CachingEffectiveTraitModel::new(evaluator.clone(), Arc::clone(&engine), Arc::clone(&cache))
                .enabled(config.cache.enabled),
        );
        info!(
            cache_enabled = config.cache.enabled,
            feed_capacity = config.feed.capacity,
            trait_config_layers = config.trait_config_layers.len(),
            "strata core ready"
        );
        Ok(Self {
            config,
            engine,
            registry,
            evaluator,
            cache,
            model,
            feed,
        })
    }

    /// Builds a core over a fresh in-memory store.
    ///
    /// # Errors
    ///
    /// Fails if the core traits cannot be registered.
    pub fn in_memory(config: StrataConfig) -> StrataResult<Self> {
        Self::new(config, Arc::new(InMemoryFactStore::new()))
    }

    #[must_use]
    pub const fn config(&self) -> &StrataConfig {
        &self.config
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<CmdbEngine> {
        &self.engine
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<TraitRegistry> {
        &self.registry
    }

    /// The uncached evaluator, for single-CI and diagnostic checks.
    #[must_use]
    pub fn evaluator(&self) -> &Arc<TraitEvaluator> {
        &self.evaluator
    }

    /// The cache-backed batch model.
    #[must_use]
    pub fn traits(&self) -> Arc<dyn EffectiveTraitModel> {
        self.model.clone()
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<EffectiveTraitCache> {
        &self.cache
    }

    #[must_use]
    pub fn feed(&self) -> &Arc<MutationFeed> {
        &self.feed
    }
}
