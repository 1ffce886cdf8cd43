//! # Strata - a layered, temporal CMDB core
//!
//! Strata stores configuration items (CIs) as facts: attributes and relations,
//! each written into a named layer as an append-only chain of versions. Reads
//! merge an ordered set of layers at a point in time into one view per CI, and
//! traits classify merged CIs by the facts they hold.
//!
//! ## Core Concepts
//!
//! - **Layer / LayerSet**: an isolated fact namespace; a layer set orders
//!   layers by precedence, the last one winning
//! - **Changeset**: the attribution record of one logical write, created only
//!   when something actually changes
//! - **Merged CI**: a CI's attributes resolved across a layer set at a
//!   [`TimeThreshold`], with the contributing layers kept as provenance
//! - **Trait**: a structural classification (required and optional attribute
//!   and relation templates), flattened once and evaluated many times
//! - **Effective-trait cache**: a superset index that makes repeated batch
//!   trait queries cheap without ever hiding a true match
//!
//! ## Usage
//!
//! ```
//! use strata::traits::{AttributeTemplate, EffectiveTraitModel, RecursiveTrait, TraitOrigin};
//! use strata::{
//!     AttributeValue, AttributeValueType, ChangesetProxy, CiSelection, Layer, LayerId,
//!     LayerSet, Strata, StrataConfig, TimeThreshold, UserRef,
//! };
//!
//! let strata = Strata::in_memory(StrataConfig::default())?;
//! let engine = strata.engine();
//! let base = LayerId::new("base")?;
//! engine.upsert_layer(Layer::new(base.clone()))?;
//!
//! let ci = engine.create_ci()?;
//! let mut proxy = ChangesetProxy::now(UserRef::new("alice"));
//! engine.insert_attribute("hostname", AttributeValue::text("srv1"), ci, &base, &mut proxy)?;
//!
//! let host = strata.registry().define(
//!     RecursiveTrait::new("host", TraitOrigin::Data).require_attribute(
//!         "hostname",
//!         AttributeTemplate::new("hostname").of_type(AttributeValueType::Text),
//!     ),
//! )?;
//! let layers = LayerSet::new([base])?;
//! let hosts = strata
//!     .traits()
//!     .cis_with_trait(&host, &layers, &CiSelection::All, &TimeThreshold::Latest)?;
//! assert!(hosts.contains(&ci));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod attribute;
pub mod changeset;
pub mod ci;
pub mod config;
pub mod error;
pub mod layer;
pub mod relation;
pub mod selection;
pub mod time;
pub mod value;

// Subsystems
pub mod cache;
pub mod engine;
pub mod feed;
pub mod instance;
pub mod storage;
pub mod traits;

// Re-export primary types at crate root for convenience
pub use attribute::{AttributeId, CiAttribute, FactState, MergedCiAttribute};
pub use changeset::{Changeset, ChangesetId, ChangesetProxy, UserRef};
pub use ci::{Ci, CiId};
pub use config::{CacheConfig, FeedConfig, StrataConfig};
pub use error::{AuthorizationError, StrataError, StrataResult, ValidationError};
pub use layer::{Layer, LayerId, LayerSet, LayerSource, LayerState};
pub use relation::{
    CompactRelatedCi, Direction, MergedRelation, PredicateId, Relation, RelationId, RelationKey,
};
pub use selection::{AttributeSelection, CiSelection, RelationSelection};
pub use time::{TimeRange, TimeThreshold};
pub use value::{AttributeValue, AttributeValueType, RegexPattern, ScalarValue};

pub use cache::{CachingEffectiveTraitModel, EffectiveTraitCache, TraitCacheInvalidator};
pub use engine::{
    AttributeFragment, AttributeScope, BulkReplaceOutcome, CmdbEngine, MergedCi,
    RelationFragment, RelationScope,
};
pub use feed::{MutationEvent, MutationFeed, MutationKind, MutationObserver};
pub use instance::Strata;
pub use storage::{FactStore, InMemoryFactStore, StorageError};
