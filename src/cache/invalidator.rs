//! Keeps the effective-trait cache sound as mutations land.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::error::StrataResult;
use crate::feed::{MutationEvent, MutationKind, MutationObserver};
use crate::layer::LayerId;

use super::EffectiveTraitCache;

/// [`MutationObserver`] translating write events into cache operations.
///
/// - a cleared layer purges every entry whose layer set contains it
/// - a write to a trait configuration layer purges the whole cache
/// - any other write grows every entry whose layer set contains the layer
#[derive(Debug)]
pub struct TraitCacheInvalidator {
    cache: Arc<EffectiveTraitCache>,
    trait_config_layers: HashSet<LayerId>,
}

impl TraitCacheInvalidator {
    #[must_use]
    pub fn new(
        cache: Arc<EffectiveTraitCache>,
        trait_config_layers: impl IntoIterator<Item = LayerId>,
    ) -> Self {
        Self {
            cache,
            trait_config_layers: trait_config_layers.into_iter().collect(),
        }
    }
}

impl MutationObserver for TraitCacheInvalidator {
    fn on_mutation(&self, event: &MutationEvent) -> StrataResult<()> {
        if self.trait_config_layers.contains(&event.layer) {
            debug!(layer = %event.layer, "trait configuration changed");
            return self.cache.purge_all();
        }
        match event.kind {
            MutationKind::LayerCleared => self.cache.purge_layer(&event.layer),
            MutationKind::Attributes | MutationKind::Relations => {
                self.cache.grow_on_write(&event.ci_ids, &event.layer)
            }
        }
    }
}
