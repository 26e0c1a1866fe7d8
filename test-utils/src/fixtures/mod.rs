//! Pre-built documents and on-disk assets for testing.

pub mod documents;
pub mod images;
