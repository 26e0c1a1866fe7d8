//! Mosaic Retriever - embeds queries and ranks stored documents against them.

pub mod config;
pub mod error;
pub mod ranking;
pub mod retriever;

pub use config::{RankingMode, RetrieverConfig, RetrieverConfigBuilder};
pub use error::RetrieverError;
pub use retriever::{MultiModalRetriever, QueryFilters};
