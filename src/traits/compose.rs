//! Flattening of recursive trait definitions.
//!
//! `flatten` resolves the `required_traits` graph depth-first, tracking the
//! current path to reject cycles, and unions every visited trait's templates
//! into one [`GenericTrait`]. Each trait is expanded at most once, so diamond
//! shaped graphs cost no more than trees.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::ValidationError;

use super::definition::{
    AttributeTemplate, GenericTrait, RecursiveTrait, RelationTemplate, TraitAttribute,
    TraitRelation,
};

#[derive(Debug)]
struct Templates<T> {
    required: BTreeMap<String, T>,
    optional: BTreeMap<String, T>,
}

impl<T> Default for Templates<T> {
    fn default() -> Self {
        Self {
            required: BTreeMap::new(),
            optional: BTreeMap::new(),
        }
    }
}

impl<T: Clone + PartialEq> Templates<T> {
    /// Adds one template. An identifier may be declared any number of times
    /// as long as every declaration is identical; required beats optional.
    fn add(
        &mut self,
        trait_id: &str,
        identifier: &str,
        template: &T,
        required: bool,
    ) -> Result<(), ValidationError> {
        let existing = self
            .required
            .get(identifier)
            .or_else(|| self.optional.get(identifier));
        if let Some(existing) = existing {
            if existing != template {
                return Err(ValidationError::ConflictingTraitDefinition {
                    trait_id: trait_id.to_string(),
                    identifier: identifier.to_string(),
                });
            }
        }
        if required {
            self.optional.remove(identifier);
            self.required
                .insert(identifier.to_string(), template.clone());
        } else if !self.required.contains_key(identifier) {
            self.optional
                .insert(identifier.to_string(), template.clone());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Flattener {
    attributes: Templates<AttributeTemplate>,
    relations: Templates<RelationTemplate>,
    expanded: BTreeSet<String>,
}

impl Flattener {
    fn absorb(&mut self, t: &RecursiveTrait) -> Result<(), ValidationError> {
        let attrs = |list: &[TraitAttribute], required: bool| -> Vec<(String, AttributeTemplate, bool)> {
            list.iter()
                .map(|a| (a.identifier.clone(), a.template.clone(), required))
                .collect()
        };
        for (identifier, template, required) in attrs(&t.required_attributes, true)
            .into_iter()
            .chain(attrs(&t.optional_attributes, false))
        {
            self.attributes.add(&t.id, &identifier, &template, required)?;
        }

        let rels = |list: &[TraitRelation], required: bool| -> Vec<(String, RelationTemplate, bool)> {
            list.iter()
                .map(|r| (r.identifier.clone(), r.template.clone(), required))
                .collect()
        };
        for (identifier, template, required) in rels(&t.required_relations, true)
            .into_iter()
            .chain(rels(&t.optional_relations, false))
        {
            self.relations.add(&t.id, &identifier, &template, required)?;
        }
        Ok(())
    }

    fn visit(
        &mut self,
        t: &RecursiveTrait,
        known: &HashMap<String, RecursiveTrait>,
        path: &mut Vec<String>,
    ) -> Result<(), ValidationError> {
        path.push(t.id.clone());
        self.absorb(t)?;
        for required in &t.required_traits {
            if path.contains(required) {
                let mut cycle = path.clone();
                cycle.push(required.clone());
                return Err(ValidationError::CyclicTraitDefinition { path: cycle });
            }
            if self.expanded.contains(required) {
                continue;
            }
            let dep = known
                .get(required)
                .ok_or_else(|| ValidationError::UnknownTrait {
                    trait_id: required.clone(),
                })?;
            self.visit(dep, known, path)?;
        }
        path.pop();
        self.expanded.insert(t.id.clone());
        Ok(())
    }
}

/// Flattens `root` against the set of known trait definitions.
///
/// # Errors
///
/// - `CyclicTraitDefinition` if `root` reaches itself through `required_traits`
/// - `UnknownTrait` if a required trait is not in `known`
/// - `ConflictingTraitDefinition` if one identifier maps to different templates
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use strata::traits::{flatten, RecursiveTrait, TraitOrigin};
///
/// let a = RecursiveTrait::new("a", TraitOrigin::Data).require_trait("b");
/// let b = RecursiveTrait::new("b", TraitOrigin::Data).require_trait("a");
/// let known: HashMap<String, RecursiveTrait> =
///     [("a".to_string(), a.clone()), ("b".to_string(), b)].into_iter().collect();
/// assert!(flatten(&a, &known).is_err());
/// ```
pub fn flatten(
    root: &RecursiveTrait,
    known: &HashMap<String, RecursiveTrait>,
) -> Result<GenericTrait, ValidationError> {
    root.validate()?;
    let mut flattener = Flattener::default();
    let mut path = Vec::new();
    flattener.visit(root, known, &mut path)?;

    let mut ancestors = flattener.expanded;
    ancestors.remove(&root.id);
    Ok(GenericTrait {
        id: root.id.clone(),
        origin: root.origin.clone(),
        required_attributes: flattener.attributes.required,
        optional_attributes: flattener.attributes.optional,
        required_relations: flattener.relations.required,
        optional_relations: flattener.relations.optional,
        ancestor_traits: ancestors,
    })
}
