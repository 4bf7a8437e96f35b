use serde_json::Value;
use std::collections::HashMap;

/// Sentinel matched by nothing in the index, used to make an empty selection
/// hide all results instead of being ignored (SPEC_FULL.md §4.K.1).
pub const IMPOSSIBLE_VALUE: &str = "__IMPOSSIBLE_VALUE__";

fn term_clause(field: &str, value: &str) -> Value {
    serde_json::json!({ "term": { field: value } })
}

fn terms_clause(field: &str, values: &[String]) -> Value {
    serde_json::json!({ "terms": { field: values } })
}

/// Maps the "semantic" filter keys a caller may use to their underlying
/// index field names; any key not listed here passes through unchanged
/// (SPEC_FULL.md §4.K.1).
fn semantic_field(key: &str) -> &str {
    match key {
        "data_sources" => "filename",
        "document_types" => "mimetype",
        "owners" => "owner",
        other => other,
    }
}

/// Coerces a semantic-map filter (`{field: [values]}`) into term/terms
/// clauses. An empty value list emits an impossible-value term so that
/// selecting nothing hides everything rather than being ignored.
pub fn coerce_semantic_map(filters: &HashMap<String, Vec<String>>) -> Vec<Value> {
    filters
        .iter()
        .map(|(key, values)| {
            let field = semantic_field(key);
            match values.len() {
                0 => term_clause(field, IMPOSSIBLE_VALUE),
                1 => term_clause(field, &values[0]),
                _ => terms_clause(field, values),
            }
        })
        .collect()
}

/// Coerces an explicit `filter: [...]` list of already-built term/terms
/// clauses, dropping any `term` clause whose value is the impossible-value
/// sentinel (SPEC_FULL.md §4.K.1).
pub fn coerce_explicit(filter: &[Value]) -> Vec<Value> {
    filter
        .iter()
        .filter(|clause| {
            clause
                .get("term")
                .and_then(Value::as_object)
                .and_then(|obj| obj.values().next())
                .and_then(Value::as_str)
                != Some(IMPOSSIBLE_VALUE)
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_selection_emits_impossible_value_term() {
        let mut filters = HashMap::new();
        filters.insert("data_sources".to_string(), vec![]);
        let clauses = coerce_semantic_map(&filters);
        assert_eq!(clauses[0]["term"]["filename"], IMPOSSIBLE_VALUE);
    }

    #[test]
    fn single_value_becomes_term_on_mapped_field() {
        let mut filters = HashMap::new();
        filters.insert("owners".to_string(), vec!["alice".to_string()]);
        let clauses = coerce_semantic_map(&filters);
        assert_eq!(clauses[0]["term"]["owner"], "alice");
    }

    #[test]
    fn multiple_values_become_terms() {
        let mut filters = HashMap::new();
        filters.insert(
            "document_types".to_string(),
            vec!["application/pdf".to_string(), "text/plain".to_string()],
        );
        let clauses = coerce_semantic_map(&filters);
        assert!(clauses[0]["terms"]["mimetype"].is_array());
    }

    #[test]
    fn unmapped_key_passes_through_as_field_name() {
        let mut filters = HashMap::new();
        filters.insert("custom_field".to_string(), vec!["x".to_string()]);
        let clauses = coerce_semantic_map(&filters);
        assert_eq!(clauses[0]["term"]["custom_field"], "x");
    }

    #[test]
    fn explicit_clauses_with_impossible_value_are_dropped() {
        let filter = vec![
            serde_json::json!({ "term": { "owner": IMPOSSIBLE_VALUE } }),
            serde_json::json!({ "term": { "owner": "bob" } }),
        ];
        let coerced = coerce_explicit(&filter);
        assert_eq!(coerced.len(), 1);
        assert_eq!(coerced[0]["term"]["owner"], "bob");
    }
}
