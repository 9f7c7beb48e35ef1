//! Reference collaborator implementations: registry, retriever, checkpoints.

pub mod checkpoint;
pub mod registry;
pub mod retriever;

pub use checkpoint::{InMemoryCheckpointStore, JsonFileCheckpointStore};
pub use registry::InMemoryDocumentRegistry;
pub use retriever::StaticRetriever;
