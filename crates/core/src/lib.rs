//! Mosaic Core - document types, similarity functions and shared errors.

pub mod document;
pub mod error;
pub mod filter;
pub mod similarity;

pub use document::{Content, ContentType, Document, Meta, Table};
pub use error::{CoreError, UnknownContentType};
pub use filter::Filters;
pub use similarity::SimilarityFunction;
