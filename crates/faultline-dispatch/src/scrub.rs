//! Payload field scrubbing.
//!
//! The dispatch engine forwards each reporter's scrub-field list to the
//! transport verbatim; the HTTP transport masks the values of those fields
//! here before the payload is serialized onto the wire. Matching is by
//! object key, case-insensitive, at any depth.

use serde_json::Value;

/// Replacement written over scrubbed values.
pub const SCRUB_MASK: &str = "***";

/// Returns a copy of `value` with every field named in `fields` masked.
///
/// Arrays are traversed; non-container values pass through unchanged. The
/// masked value replaces the whole subtree under a matching key, so nested
/// secrets inside a scrubbed object do not survive.
pub fn scrub_value(value: &Value, fields: &[String]) -> Value {
    if fields.is_empty() {
        return value.clone();
    }

    match value {
        Value::Object(map) => {
            let scrubbed = map
                .iter()
                .map(|(key, nested)| {
                    if fields.iter().any(|field| field.eq_ignore_ascii_case(key)) {
                        (key.clone(), Value::String(SCRUB_MASK.to_string()))
                    } else {
                        (key.clone(), scrub_value(nested, fields))
                    }
                })
                .collect();
            Value::Object(scrubbed)
        },
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| scrub_value(item, fields)).collect())
        },
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn masks_top_level_fields() {
        let body = json!({"message": "login failed", "password": "hunter2"});
        let scrubbed = scrub_value(&body, &fields(&["password"]));
        assert_eq!(scrubbed, json!({"message": "login failed", "password": "***"}));
    }

    #[test]
    fn masks_nested_fields_and_whole_subtrees() {
        let body = json!({
            "request": {"headers": {"Authorization": "Bearer abc"}},
            "session": {"user": "ada", "token": {"value": "xyz"}}
        });
        let scrubbed = scrub_value(&body, &fields(&["authorization", "token"]));
        assert_eq!(
            scrubbed,
            json!({
                "request": {"headers": {"Authorization": "***"}},
                "session": {"user": "ada", "token": "***"}
            })
        );
    }

    #[test]
    fn traverses_arrays() {
        let body = json!([{"secret": 1}, {"other": 2}]);
        let scrubbed = scrub_value(&body, &fields(&["secret"]));
        assert_eq!(scrubbed, json!([{"secret": "***"}, {"other": 2}]));
    }

    #[test]
    fn empty_field_list_is_identity() {
        let body = json!({"password": "kept"});
        assert_eq!(scrub_value(&body, &[]), body);
    }
}
