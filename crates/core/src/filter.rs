//! Metadata filters applied during retrieval.

use serde_json::Value;

use crate::document::Meta;

/// Metadata constraints: every key must match the document's meta value.
///
/// A scalar filter value matches by equality; an array filter value matches
/// when it contains the document's value.
pub type Filters = serde_json::Map<String, Value>;

/// Returns `true` if `meta` satisfies every constraint in `filters`.
pub fn matches(filters: &Filters, meta: &Meta) -> bool {
    filters.iter().all(|(key, expected)| {
        let Some(actual) = meta.get(key) else {
            return false;
        };
        match expected {
            Value::Array(options) => options.contains(actual),
            other => other == actual,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(value: Value) -> Meta {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(matches(&Filters::new(), &Meta::new()));
        assert!(matches(&Filters::new(), &meta(json!({"a": 1}))));
    }

    #[test]
    fn scalar_filter_matches_by_equality() {
        let filters = meta(json!({"source": "docs"}));
        assert!(matches(&filters, &meta(json!({"source": "docs", "x": 1}))));
        assert!(!matches(&filters, &meta(json!({"source": "code"}))));
    }

    #[test]
    fn missing_key_does_not_match() {
        let filters = meta(json!({"source": "docs"}));
        assert!(!matches(&filters, &meta(json!({"other": "docs"}))));
    }

    #[test]
    fn array_filter_matches_any_member() {
        let filters = meta(json!({"year": [2020, 2021]}));
        assert!(matches(&filters, &meta(json!({"year": 2021}))));
        assert!(!matches(&filters, &meta(json!({"year": 2019}))));
    }

    #[test]
    fn all_keys_must_match() {
        let filters = meta(json!({"a": 1, "b": 2}));
        assert!(matches(&filters, &meta(json!({"a": 1, "b": 2}))));
        assert!(!matches(&filters, &meta(json!({"a": 1, "b": 3}))));
    }
}
