//! Conversion of documents into raw payloads, grouped by content type.

use std::path::Path;

use mosaic_core::{Content, ContentType, Document, Table};

use crate::error::EmbeddingError;
use crate::features::Payload;

/// Payloads of one content type and the batch positions they came from.
#[derive(Debug, Clone)]
pub struct DataGroup {
    pub content_type: ContentType,
    /// Index of each payload's document within the converted slice.
    pub positions: Vec<usize>,
    pub payloads: Vec<Payload>,
}

/// Text payload of a text document.
///
/// A single trailing `?` is dropped. Query documents go through the same
/// converter, so removing this changes retrieval results.
pub fn text_payload(text: &str) -> String {
    text.strip_suffix('?').unwrap_or(text).to_owned()
}

/// Column headers followed by every cell in row-major order, space separated.
pub fn linearize_table(table: &Table) -> String {
    table
        .columns
        .iter()
        .chain(table.rows.iter().flatten())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decodes the image a document points at.
pub fn load_image(path: &Path) -> Result<Payload, EmbeddingError> {
    image::open(path)
        .map(Payload::Image)
        .map_err(|e| EmbeddingError::ImageDecode(format!("{}: {e}", path.display())))
}

/// The metadata prefix: the document's meta field names in insertion order.
pub fn meta_prefix(document: &Document) -> String {
    document
        .meta
        .keys()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

fn mismatch(document: &Document, content_type: ContentType) -> EmbeddingError {
    let found = match document.content {
        Content::Text(_) => "text",
        Content::Table(_) => "table",
        Content::Image(_) => "image",
    };
    EmbeddingError::ContentMismatch {
        id: document.id.clone(),
        content_type,
        found,
    }
}

/// Converts one document, optionally prefixing text-like payloads with its meta fields.
pub fn convert_document(
    document: &Document,
    embed_meta: bool,
) -> Result<(ContentType, Payload), EmbeddingError> {
    let content_type = document.parsed_content_type()?;
    let data = match (content_type, &document.content) {
        (ContentType::Text, Content::Text(text)) => text_payload(text),
        (ContentType::Table, Content::Table(table)) => linearize_table(table),
        (ContentType::Image, Content::Image(path)) => return Ok((content_type, load_image(path)?)),
        _ => return Err(mismatch(document, content_type)),
    };

    if embed_meta && content_type.can_embed_meta() {
        let meta = meta_prefix(document);
        if !meta.is_empty() {
            return Ok((content_type, Payload::Text(format!("{meta} {data}"))));
        }
    }
    Ok((content_type, Payload::Text(data)))
}

/// Rejects the first document whose content type is not supported.
pub fn validate_content_types(documents: &[Document]) -> Result<(), EmbeddingError> {
    for document in documents {
        document.parsed_content_type()?;
    }
    Ok(())
}

/// Converts documents and groups their payloads by content type.
///
/// Groups come out in [`ContentType::ALL`] order and only for types present;
/// within a group, payloads keep their input order.
pub fn docs_to_data(
    documents: &[Document],
    embed_meta: bool,
) -> Result<Vec<DataGroup>, EmbeddingError> {
    validate_content_types(documents)?;

    let mut groups: Vec<DataGroup> = ContentType::ALL
        .iter()
        .map(|&content_type| DataGroup {
            content_type,
            positions: Vec::new(),
            payloads: Vec::new(),
        })
        .collect();

    for (position, document) in documents.iter().enumerate() {
        let (content_type, payload) = convert_document(document, embed_meta)?;
        if let Some(group) = groups.iter_mut().find(|g| g.content_type == content_type) {
            group.positions.push(position);
            group.payloads.push(payload);
        }
    }

    groups.retain(|g| !g.payloads.is_empty());
    Ok(groups)
}
