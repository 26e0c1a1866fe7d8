//! Mosaic Test Utils - mock models and fixtures shared by the integration tests.

pub mod fixtures;
pub mod mock;

pub use mock::{MockModelLoader, MockTextExtractor, hash_token};
