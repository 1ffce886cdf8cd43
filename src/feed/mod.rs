//! Mutation notifications.
//!
//! The write path reports every committed change to a list of
//! [`MutationObserver`]s. Observers run synchronously after the commit and
//! before the write returns; the effective-trait cache relies on that to keep
//! its supersets sound. Other derived-index maintainers can subscribe through
//! the asynchronous [`MutationFeed`].

mod channel;

pub use channel::MutationFeed;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::changeset::ChangesetId;
use crate::ci::CiId;
use crate::error::StrataResult;
use crate::layer::LayerId;

/// What kind of change a [`MutationEvent`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// Attribute versions were appended for the listed CIs.
    Attributes,
    /// Relation versions were appended; both ends are listed.
    Relations,
    /// Every live fact in the layer was removed at once.
    LayerCleared,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Attributes => "attributes",
            Self::Relations => "relations",
            Self::LayerCleared => "layer_cleared",
        };
        f.write_str(s)
    }
}

/// A committed change to one layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationEvent {
    pub kind: MutationKind,
    pub layer: LayerId,
    pub ci_ids: Vec<CiId>,
    pub changeset_id: ChangesetId,
    pub timestamp: DateTime<Utc>,
}

/// Receives committed mutations from the write path.
///
/// Implementations must be cheap; they run inline with the write.
pub trait MutationObserver: Send + Sync {
    /// Called once per event after the changeset has been committed.
    ///
    /// # Errors
    ///
    /// An error is logged by the write path; the write itself has already
    /// landed and is not rolled back.
    fn on_mutation(&self, event: &MutationEvent) -> StrataResult<()>;
}
