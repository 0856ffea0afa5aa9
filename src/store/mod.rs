//! Data store implementations.
//!
//! The pipeline only sees the [`DataStore`](crate::core::DataStore) trait. Two backends ship
//! with the crate:
//!
//! - [`MemoryStore`]: rows held in process memory, with insert notification. Used by tests and
//!   for embedding the pipeline in another program.
//! - [`JsonlStore`]: an append-only JSON-lines file, one data point per line. Several processes
//!   may append to the same file; each picks up the others' rows on its next read.

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;
