//! Superset cache of the CIs having a trait under a layer set.
//!
//! Invariant: for every cached (trait, layer set) key, the cached set contains
//! every CI that currently has the trait under that layer set at the latest
//! time. Members may be stale positives; missing CIs never have the trait.
//!
//! One `RwLock` covers the whole nested structure. `lookup` takes it shared;
//! every other operation takes it exclusively.
//!
//! A generation counter is bumped by every operation that can add members or
//! drop entries. Callers that scanned ground truth pass the generation they
//! observed before scanning to [`EffectiveTraitCache::full_update_if_current`]
//! and [`EffectiveTraitCache::shrink_if_current`]; if a write landed in the
//! meantime the update is skipped, so a racing write is never lost.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, trace};

use crate::ci::CiId;
use crate::error::{StrataError, StrataResult};
use crate::layer::{LayerId, LayerSet};

/// Result of [`EffectiveTraitCache::lookup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLookup {
    /// The cached superset; empty on a miss.
    pub superset: HashSet<CiId>,
    pub hit: bool,
    /// Generation at the time of the lookup.
    pub generation: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, HashMap<LayerSet, HashSet<CiId>>>,
    generation: u64,
}

impl CacheState {
    fn bump(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}

/// The effective-trait superset cache.
#[derive(Debug, Default)]
pub struct EffectiveTraitCache {
    state: RwLock<CacheState>,
}

impl EffectiveTraitCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached superset for a key, if any.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the cache lock is poisoned.
    pub fn lookup(&self, trait_id: &str, layers: &LayerSet) -> StrataResult<CacheLookup> {
        let state = self.read()?;
        let cached = state.entries.get(trait_id).and_then(|m| m.get(layers));
        Ok(CacheLookup {
            superset: cached.cloned().unwrap_or_default(),
            hit: cached.is_some(),
            generation: state.generation,
        })
    }

    /// Replaces the cached set for a key with an exactly computed one.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the cache lock is poisoned.
    pub fn full_update(
        &self,
        trait_id: &str,
        layers: &LayerSet,
        exact: HashSet<CiId>,
    ) -> StrataResult<()> {
        let mut state = self.write()?;
        Self::store(&mut state, trait_id, layers, exact);
        Ok(())
    }

    /// [`full_update`](Self::full_update), unless the generation moved past
    /// `observed`. Returns whether the update was applied.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the cache lock is poisoned.
    pub fn full_update_if_current(
        &self,
        trait_id: &str,
        layers: &LayerSet,
        exact: HashSet<CiId>,
        observed: u64,
    ) -> StrataResult<bool> {
        let mut state = self.write()?;
        if state.generation != observed {
            debug!(trait_id, "skipping stale cache fill");
            return Ok(false);
        }
        Self::store(&mut state, trait_id, layers, exact);
        Ok(true)
    }

    /// Adds `cis` to every cached set whose layer set contains `layer`.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the cache lock is poisoned.
    pub fn grow_on_write(&self, cis: &[CiId], layer: &LayerId) -> StrataResult<()> {
        let mut state = self.write()?;
        state.bump();
        let mut grown = 0usize;
        for per_trait in state.entries.values_mut() {
            for (layers, members) in per_trait.iter_mut() {
                if layers.contains(layer) {
                    members.extend(cis.iter().copied());
                    grown += 1;
                }
            }
        }
        trace!(layer = %layer, cis = cis.len(), entries = grown, "cache grown");
        Ok(())
    }

    /// Removes `cis` from one cached set. A missing key is left missing.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the cache lock is poisoned.
    pub fn shrink(&self, cis: &HashSet<CiId>, trait_id: &str, layers: &LayerSet) -> StrataResult<()> {
        let mut state = self.write()?;
        Self::remove_members(&mut state, cis, trait_id, layers);
        Ok(())
    }

    /// [`shrink`](Self::shrink), unless the generation moved past `observed`.
    /// Returns whether the shrink was applied.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the cache lock is poisoned.
    pub fn shrink_if_current(
        &self,
        cis: &HashSet<CiId>,
        trait_id: &str,
        layers: &LayerSet,
        observed: u64,
    ) -> StrataResult<bool> {
        let mut state = self.write()?;
        if state.generation != observed {
            debug!(trait_id, "skipping stale cache shrink");
            return Ok(false);
        }
        Self::remove_members(&mut state, cis, trait_id, layers);
        Ok(true)
    }

    /// Drops every cached set whose layer set contains `layer`.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the cache lock is poisoned.
    pub fn purge_layer(&self, layer: &LayerId) -> StrataResult<()> {
        let mut state = self.write()?;
        state.bump();
        let mut dropped = 0usize;
        for per_trait in state.entries.values_mut() {
            let before = per_trait.len();
            per_trait.retain(|layers, _| !layers.contains(layer));
            dropped += before - per_trait.len();
        }
        state.entries.retain(|_, per_trait| !per_trait.is_empty());
        debug!(layer = %layer, dropped, "cache purged for layer");
        Ok(())
    }

    /// Drops every cached set of one trait.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the cache lock is poisoned.
    pub fn purge_trait(&self, trait_id: &str) -> StrataResult<()> {
        let mut state = self.write()?;
        state.bump();
        state.entries.remove(trait_id);
        debug!(trait_id, "cache purged for trait");
        Ok(())
    }

    /// Drops everything.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the cache lock is poisoned.
    pub fn purge_all(&self) -> StrataResult<()> {
        let mut state = self.write()?;
        state.bump();
        state.entries.clear();
        debug!("cache purged");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an internal error if the cache lock is poisoned.
    pub fn generation(&self) -> StrataResult<u64> {
        Ok(self.read()?.generation)
    }

    /// Number of cached (trait, layer set) keys.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the cache lock is poisoned.
    pub fn len(&self) -> StrataResult<usize> {
        Ok(self.read()?.entries.values().map(HashMap::len).sum())
    }

    /// # Errors
    ///
    /// Returns an internal error if the cache lock is poisoned.
    pub fn is_empty(&self) -> StrataResult<bool> {
        Ok(self.len()? == 0)
    }

    fn store(state: &mut CacheState, trait_id: &str, layers: &LayerSet, exact: HashSet<CiId>) {
        debug!(trait_id, size = exact.len(), "cache filled");
        state
            .entries
            .entry(trait_id.to_string())
            .or_default()
            .insert(layers.clone(), exact);
    }

    fn remove_members(state: &mut CacheState, cis: &HashSet<CiId>, trait_id: &str, layers: &LayerSet) {
        if let Some(members) = state
            .entries
            .get_mut(trait_id)
            .and_then(|m| m.get_mut(layers))
        {
            members.retain(|id| !cis.contains(id));
            debug!(trait_id, removed = cis.len(), "cache shrunk");
        }
    }

    fn read(&self) -> StrataResult<RwLockReadGuard<'_, CacheState>> {
        self.state
            .read()
            .map_err(|_| StrataError::internal("poisoned lock: effective trait cache read"))
    }

    fn write(&self) -> StrataResult<RwLockWriteGuard<'_, CacheState>> {
        self.state
            .write()
            .map_err(|_| StrataError::internal("poisoned lock: effective trait cache write"))
    }
}
