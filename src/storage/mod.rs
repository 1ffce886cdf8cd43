//! Storage contract and the in-memory backend.
//!
//! The core only depends on [`FactStore`]; durable backends live outside
//! this crate.

mod memory;
mod traits;

pub use memory::InMemoryFactStore;
pub use traits::{FactStore, StorageError, WriteBatch};
