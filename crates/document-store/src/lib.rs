//! Mosaic Document Store - document persistence and nearest-neighbour search.

pub mod config;
pub mod error;
pub mod lance;
pub mod memory;
pub mod store;

pub use config::LanceStoreConfig;
pub use error::DocumentStoreError;
pub use lance::LanceDocumentStore;
pub use memory::InMemoryDocumentStore;
pub use store::DocumentStore;
