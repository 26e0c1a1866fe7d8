//! Document types shared by embedders, retrievers and document stores.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::UnknownContentType;

/// Ordered metadata attached to a document.
pub type Meta = serde_json::Map<String, serde_json::Value>;

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn generate_id() -> String {
    let count = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{nanos:x}-{count:x}")
}

/// The data modality of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Plain text passages.
    Text,
    /// Tables, linearized to text before embedding.
    Table,
    /// Images referenced by path.
    Image,
}

impl ContentType {
    /// Every supported content type, in processing order.
    pub const ALL: [Self; 3] = [Self::Text, Self::Table, Self::Image];

    /// Returns the lowercase tag used in documents and configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Table => "table",
            Self::Image => "image",
        }
    }

    /// Returns `true` if metadata may be prepended to this type's payload.
    pub fn can_embed_meta(self) -> bool {
        matches!(self, Self::Text | Self::Table)
    }

    /// Comma-separated list of every supported tag.
    pub fn supported() -> String {
        Self::ALL
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = UnknownContentType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "table" => Ok(Self::Table),
            "image" => Ok(Self::Image),
            other => Err(UnknownContentType(other.to_string())),
        }
    }
}

/// A table with named columns and string cells.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { columns, rows }
    }
}

/// The raw payload of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Content {
    Text(String),
    Table(Table),
    /// Path to an encoded image on disk.
    Image(PathBuf),
}

impl Content {
    /// Returns the text if this is a text payload.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Table(_) | Self::Image(_) => None,
        }
    }
}

/// A unit of retrievable content.
///
/// `content_type` is kept as the raw tag so that documents coming from
/// external ingestion with an unsupported type are only rejected when they
/// are converted for embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: Content,
    pub content_type: String,
    #[serde(default)]
    pub meta: Meta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl Document {
    /// Creates a document with a generated id.
    pub fn new(content: Content, content_type: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            content,
            content_type: content_type.into(),
            meta: Meta::new(),
            embedding: None,
            score: None,
        }
    }

    /// Creates a text document.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Content::Text(text.into()), ContentType::Text.as_str())
    }

    /// Creates a table document.
    pub fn table(table: Table) -> Self {
        Self::new(Content::Table(table), ContentType::Table.as_str())
    }

    /// Creates an image document pointing at a file on disk.
    pub fn image(path: impl Into<PathBuf>) -> Self {
        Self::new(Content::Image(path.into()), ContentType::Image.as_str())
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_meta(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Parses the document's content type tag.
    pub fn parsed_content_type(&self) -> Result<ContentType, UnknownContentType> {
        self.content_type.parse()
    }
}
