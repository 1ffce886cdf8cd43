//! Trait registry: the provider of flattened trait definitions.
//!
//! Definitions are flattened when they are registered, never lazily during
//! evaluation. Every change re-flattens the whole definition set, so a change
//! that would break a dependent trait is rejected before anything is stored.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::attribute::CI_NAME_ATTRIBUTE;
use crate::cache::EffectiveTraitCache;
use crate::error::{StrataError, StrataResult};
use crate::value::AttributeValueType;

use super::compose::flatten;
use super::definition::{
    AttributeTemplate, GenericTrait, RecursiveTrait, TraitOrigin, ValueConstraint,
};

/// Id of the core trait matched by every CI with a non-empty display name.
pub const NAMED_TRAIT_ID: &str = "named";

/// Read access to flattened traits by id.
pub trait TraitLookup: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the provider cannot be read.
    fn get_trait(&self, id: &str) -> StrataResult<Option<Arc<GenericTrait>>>;
}

#[derive(Debug, Clone)]
struct Flattened {
    generic: Arc<GenericTrait>,
    fingerprint: blake3::Hash,
}

#[derive(Debug, Default)]
struct RegistryState {
    definitions: HashMap<String, RecursiveTrait>,
    flattened: HashMap<String, Flattened>,
}

fn flatten_all(
    definitions: &HashMap<String, RecursiveTrait>,
) -> StrataResult<HashMap<String, Flattened>> {
    definitions
        .iter()
        .map(|(id, def)| {
            let generic = flatten(def, definitions)?;
            let fingerprint = generic.fingerprint()?;
            Ok((
                id.clone(),
                Flattened {
                    generic: Arc::new(generic),
                    fingerprint,
                },
            ))
        })
        .collect()
}

/// Traits whose meaning changed between two flattened sets: added, removed or
/// re-fingerprinted ones, plus every trait whose relation hints reach one of
/// those.
fn changed_traits(
    before: &HashMap<String, Flattened>,
    after: &HashMap<String, Flattened>,
) -> BTreeSet<String> {
    let mut changed: BTreeSet<String> = before
        .keys()
        .chain(after.keys())
        .filter(|id| {
            before.get(*id).map(|f| f.fingerprint) != after.get(*id).map(|f| f.fingerprint)
        })
        .cloned()
        .collect();

    loop {
        let hinted: Vec<String> = after
            .values()
            .filter(|f| !changed.contains(&f.generic.id))
            .filter(|f| {
                f.generic
                    .required_relations
                    .values()
                    .chain(f.generic.optional_relations.values())
                    .flat_map(|r| r.trait_hints.iter())
                    .any(|hint| changed.contains(hint))
            })
            .map(|f| f.generic.id.clone())
            .collect();
        if hinted.is_empty() {
            return changed;
        }
        changed.extend(hinted);
    }
}

/// Holds core and user-defined traits, flattened.
///
/// When wired to an [`EffectiveTraitCache`], every definition change purges
/// the cache entries of the traits whose meaning changed.
#[derive(Debug, Default)]
pub struct TraitRegistry {
    state: RwLock<RegistryState>,
    cache: Option<Arc<EffectiveTraitCache>>,
}

impl TraitRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_cache(cache: Arc<EffectiveTraitCache>) -> Self {
        Self {
            state: RwLock::default(),
            cache: Some(cache),
        }
    }

    /// Registers the built-in traits.
    ///
    /// # Errors
    ///
    /// Fails only if a user trait with a core id was defined first.
    pub fn with_core_traits(self) -> StrataResult<Self> {
        let named = RecursiveTrait::new(NAMED_TRAIT_ID, TraitOrigin::Core).require_attribute(
            "name",
            AttributeTemplate::new(CI_NAME_ATTRIBUTE)
                .of_type(AttributeValueType::Text)
                .array(false)
                .with_constraint(ValueConstraint::TextLength {
                    min: Some(1),
                    max: None,
                }),
        );
        self.define(named)?;
        Ok(self)
    }

    /// Defines or redefines a trait and returns its flattened form.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the trait, or any trait depending on it,
    /// no longer flattens. Core traits cannot be redefined.
    pub fn define(&self, definition: RecursiveTrait) -> StrataResult<Arc<GenericTrait>> {
        let id = definition.id.clone();
        let mut state = self.write_state()?;
        if let Some(existing) = state.definitions.get(&id) {
            if existing.origin == TraitOrigin::Core && definition.origin != TraitOrigin::Core {
                return Err(StrataError::invalid_value(format!(
                    "core trait '{id}' cannot be redefined"
                )));
            }
        }
        let mut definitions = state.definitions.clone();
        definitions.insert(id.clone(), definition);
        self.replace(&mut state, definitions)?;
        let generic = state
            .flattened
            .get(&id)
            .map(|f| Arc::clone(&f.generic))
            .ok_or_else(|| StrataError::internal(format!("trait '{id}' vanished after define")))?;
        info!(trait_id = %id, "trait defined");
        Ok(generic)
    }

    /// Removes a user-defined trait. Returns false if it was not defined.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTrait` if another trait still requires it, and a
    /// validation error for core traits.
    pub fn remove(&self, id: &str) -> StrataResult<bool> {
        let mut state = self.write_state()?;
        match state.definitions.get(id) {
            None => return Ok(false),
            Some(def) if def.origin == TraitOrigin::Core => {
                return Err(StrataError::invalid_value(format!(
                    "core trait '{id}' cannot be removed"
                )));
            }
            Some(_) => {}
        }
        let mut definitions = state.definitions.clone();
        definitions.remove(id);
        self.replace(&mut state, definitions)?;
        info!(trait_id = %id, "trait removed");
        Ok(true)
    }

    /// # Errors
    ///
    /// Returns an internal error if the registry lock is poisoned.
    pub fn get(&self, id: &str) -> StrataResult<Option<Arc<GenericTrait>>> {
        let state = self.read_state()?;
        Ok(state.flattened.get(id).map(|f| Arc::clone(&f.generic)))
    }

    /// The trait as it was defined, before flattening.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the registry lock is poisoned.
    pub fn definition(&self, id: &str) -> StrataResult<Option<RecursiveTrait>> {
        let state = self.read_state()?;
        Ok(state.definitions.get(id).cloned())
    }

    /// Ids of all defined traits, sorted.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the registry lock is poisoned.
    pub fn ids(&self) -> StrataResult<Vec<String>> {
        let state = self.read_state()?;
        let mut ids: Vec<String> = state.definitions.keys().cloned().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn replace(
        &self,
        state: &mut RegistryState,
        definitions: HashMap<String, RecursiveTrait>,
    ) -> StrataResult<()> {
        let flattened = flatten_all(&definitions)?;
        let changed = changed_traits(&state.flattened, &flattened);
        state.definitions = definitions;
        state.flattened = flattened;
        if let Some(cache) = &self.cache {
            for id in &changed {
                cache.purge_trait(id)?;
            }
        }
        debug!(changed = changed.len(), "trait definitions replaced");
        Ok(())
    }

    fn read_state(&self) -> StrataResult<std::sync::RwLockReadGuard<'_, RegistryState>> {
        self.state
            .read()
            .map_err(|_| StrataError::internal("poisoned lock: trait registry read"))
    }

    fn write_state(&self) -> StrataResult<std::sync::RwLockWriteGuard<'_, RegistryState>> {
        self.state
            .write()
            .map_err(|_| StrataError::internal("poisoned lock: trait registry write"))
    }
}

impl TraitLookup for TraitRegistry {
    fn get_trait(&self, id: &str) -> StrataResult<Option<Arc<GenericTrait>>> {
        self.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ci::CiId;
    use crate::layer::LayerSet;
    use crate::relation::PredicateId;
    use crate::traits::definition::RelationTemplate;

    fn text(name: &str) -> AttributeTemplate {
        AttributeTemplate::new(name).of_type(AttributeValueType::Text)
    }

    #[test]
    fn test_define_and_get() {
        let registry = TraitRegistry::new().with_core_traits().unwrap();
        let host = RecursiveTrait::new("host", TraitOrigin::Data)
            .require_attribute("hostname", text("hostname"))
            .require_trait(NAMED_TRAIT_ID);
        let g = registry.define(host).unwrap();
        assert_eq!(g.required_attributes.len(), 2);
        assert_eq!(registry.ids().unwrap(), vec!["host", "named"]);
        assert!(registry.get_trait("host").unwrap().is_some());
        assert!(registry.get_trait("missing").unwrap().is_none());
    }

    #[test]
    fn test_rejected_definition_leaves_registry_unchanged() {
        let registry = TraitRegistry::new();
        registry
            .define(RecursiveTrait::new("a", TraitOrigin::Data).require_attribute("x", text("x")))
            .unwrap();
        registry
            .define(RecursiveTrait::new("b", TraitOrigin::Data).require_trait("a"))
            .unwrap();

        let cyclic = RecursiveTrait::new("a", TraitOrigin::Data).require_trait("b");
        let err = registry.define(cyclic).unwrap_err();
        assert!(err.is_validation());
        assert!(registry.get("a").unwrap().unwrap().required_attributes.contains_key("x"));

        assert!(registry.remove("a").unwrap_err().is_validation());
        assert!(registry.remove("b").unwrap());
        assert!(registry.remove("a").unwrap());
        assert!(!registry.remove("a").unwrap());
    }

    #[test]
    fn test_core_traits_are_protected() {
        let registry = TraitRegistry::new().with_core_traits().unwrap();
        assert!(registry.remove(NAMED_TRAIT_ID).is_err());
        assert!(registry
            .define(RecursiveTrait::new(NAMED_TRAIT_ID, TraitOrigin::Data))
            .is_err());
    }

    #[test]
    fn test_redefinition_purges_changed_and_hinting_traits() {
        let cache = Arc::new(EffectiveTraitCache::new());
        let registry = TraitRegistry::with_cache(cache.clone());
        registry
            .define(RecursiveTrait::new("host", TraitOrigin::Data).require_attribute("h", text("hostname")))
            .unwrap();
        registry
            .define(RecursiveTrait::new("app", TraitOrigin::Data).require_relation(
                "host",
                RelationTemplate::new(PredicateId::new("runs_on").unwrap(), true)
                    .with_trait_hint("host"),
            ))
            .unwrap();
        registry
            .define(RecursiveTrait::new("other", TraitOrigin::Data).require_attribute("o", text("o")))
            .unwrap();

        let layers = LayerSet::from_strs(["base"]).unwrap();
        let ci = CiId::new();
        for id in ["host", "app", "other"] {
            cache.full_update(id, &layers, [ci].into_iter().collect()).unwrap();
        }

        // Identical redefinition changes nothing.
        registry
            .define(RecursiveTrait::new("host", TraitOrigin::Data).require_attribute("h", text("hostname")))
            .unwrap();
        assert!(cache.lookup("host", &layers).unwrap().hit);

        registry
            .define(RecursiveTrait::new("host", TraitOrigin::Data).require_attribute("h", text("fqdn")))
            .unwrap();
        assert!(!cache.lookup("host", &layers).unwrap().hit);
        assert!(!cache.lookup("app", &layers).unwrap().hit);
        assert!(cache.lookup("other", &layers).unwrap().hit);
    }
}
