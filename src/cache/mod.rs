//! Effective-trait cache: a sound superset index of trait membership.

mod caching_model;
mod effective_trait_cache;
mod invalidator;

pub use caching_model::CachingEffectiveTraitModel;
pub use effective_trait_cache::{CacheLookup, EffectiveTraitCache};
pub use invalidator::TraitCacheInvalidator;
