//! Pre-built document fixtures.

use mosaic_core::{Document, Table};
use serde_json::{Map, Value};

/// The document used to check single-document embedding.
pub fn paris_document() -> Document {
    Document::text("Paris is the capital of France.").with_id("paris")
}

/// Creates a text document carrying `name` and `country` metadata.
pub fn city_document(id: &str, text: &str, country: &str) -> Document {
    Document::text(text)
        .with_id(id)
        .with_meta("name", id)
        .with_meta("country", country)
}

/// Short facts about European cities, two per country for France and Germany.
pub fn city_documents() -> Vec<Document> {
    vec![
        paris_document().with_meta("name", "paris").with_meta("country", "france"),
        city_document("lyon", "Lyon is known for its cuisine.", "france"),
        city_document("berlin", "Berlin is the capital of Germany.", "germany"),
        city_document("hamburg", "Hamburg has a large harbour.", "germany"),
        city_document("rome", "Rome is the capital of Italy.", "italy"),
    ]
}

/// A table of capitals and their countries.
pub fn capitals_table() -> Document {
    Document::table(Table::new(
        vec!["city".into(), "country".into()],
        vec![
            vec!["Paris".into(), "France".into()],
            vec!["Berlin".into(), "Germany".into()],
        ],
    ))
    .with_id("capitals")
}

/// Builds metadata filters from a JSON object literal.
///
/// Panics when `value` is not an object.
pub fn filters(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("filters must be a JSON object, got {other}"),
    }
}
