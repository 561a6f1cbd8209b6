//! Schema-on-read record helpers.
//!
//! Records are open-ended JSON objects. The only field the toolkit relies on
//! is `id`; remote rows also carry storage timestamps that never take part in
//! comparisons.

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};

pub type Record = Map<String, Value>;

/// Storage metadata stamped by the remote store.
pub const TIMESTAMP_FIELDS: [&str; 2] = ["created_at", "updated_at"];

pub fn is_timestamp_field(field: &str) -> bool {
    TIMESTAMP_FIELDS.contains(&field)
}

/// String form of the record id. Numeric ids compare by their decimal text.
pub fn record_id(record: &Record) -> Option<String> {
    record.get("id").and_then(value_as_id)
}

/// String form of an id or foreign-key value; null and empty values are none.
pub fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Extracts the objects out of a parsed sequence; anything else is dropped.
pub fn objects_only(values: Vec<Value>) -> (Vec<Record>, usize) {
    let total = values.len();
    let records: Vec<Record> = values
        .into_iter()
        .filter_map(|value| match value {
            Value::Object(record) => Some(record),
            _ => None,
        })
        .collect();
    let dropped = total - records.len();
    (records, dropped)
}

/// Parses a JSON-serialized record sequence. Anything that is not a JSON
/// array yields `None`.
pub fn parse_sequence(raw: &str) -> Option<Vec<Value>> {
    match serde_json::from_str::<Value>(raw).ok()? {
        Value::Array(values) => Some(values),
        _ => None,
    }
}

/// Copy of the record without timestamps, with numbers in canonical form and
/// keys in sorted order.
pub fn normalize_record(record: &Record) -> Record {
    sorted_fields(
        record
            .iter()
            .filter(|(field, _)| !is_timestamp_field(field)),
    )
}

/// Integral floats become integers so `10.0` and `10` serialize identically.
/// Nested objects get sorted keys.
pub fn normalize_value(value: &Value) -> Value {
    match value {
        Value::Number(number) => Value::Number(normalize_number(number)),
        Value::Array(items) => Value::Array(items.iter().map(normalize_value).collect()),
        Value::Object(fields) => Value::Object(sorted_fields(fields.iter())),
        other => other.clone(),
    }
}

fn sorted_fields<'r>(fields: impl Iterator<Item = (&'r String, &'r Value)>) -> Record {
    let sorted: BTreeMap<&String, Value> = fields
        .map(|(field, value)| (field, normalize_value(value)))
        .collect();
    sorted
        .into_iter()
        .map(|(field, value)| (field.clone(), value))
        .collect()
}

fn normalize_number(number: &Number) -> Number {
    if number.is_f64() {
        if let Some(float) = number.as_f64() {
            if float.fract() == 0.0 && float.abs() < 9.007_199_254_740_992e15 {
                return Number::from(float as i64);
            }
        }
    }
    number.clone()
}

/// Deep equality with numeric comparison by value.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => numbers_equal(a, b),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(field, value)| b.get(field).is_some_and(|other| values_equal(value, other)))
        }
        _ => left == right,
    }
}

/// Integers compare exactly; a float on either side compares as `f64`.
fn numbers_equal(a: &Number, b: &Number) -> bool {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
        return a == b;
    }
    if !a.is_f64() && !b.is_f64() {
        // one negative i64, one u64 above i64::MAX
        return false;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture must be an object"),
        }
    }

    #[test]
    fn numeric_and_string_ids_are_both_accepted() {
        assert_eq!(record_id(&record(json!({"id": "c-1"}))), Some("c-1".into()));
        assert_eq!(record_id(&record(json!({"id": 42}))), Some("42".into()));
        assert_eq!(record_id(&record(json!({"id": ""}))), None);
        assert_eq!(record_id(&record(json!({"nome": "x"}))), None);
    }

    #[test]
    fn normalization_strips_timestamps_and_integral_floats() {
        let normalized = normalize_record(&record(json!({
            "id": "d-1",
            "valor": 150.0,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-02T00:00:00Z",
        })));
        assert_eq!(Value::Object(normalized), json!({"id": "d-1", "valor": 150}));
    }

    #[test]
    fn values_compare_numbers_by_value() {
        assert!(values_equal(&json!(10), &json!(10.0)));
        assert!(values_equal(&json!({"a": [1, 2.0]}), &json!({"a": [1.0, 2]})));
        assert!(!values_equal(&json!({"a": 1}), &json!({"a": 1, "b": null})));
        assert!(!values_equal(&json!("10"), &json!(10)));
    }

    #[test]
    fn large_integers_compare_exactly() {
        assert!(!values_equal(
            &json!(9_007_199_254_740_993_u64),
            &json!(9_007_199_254_740_992_u64)
        ));
        assert!(!values_equal(&json!(-1), &json!(u64::MAX)));
        assert!(values_equal(&json!(u64::MAX), &json!(u64::MAX)));
    }

    #[test]
    fn normalization_sorts_keys_at_every_level() {
        let normalized = normalize_record(&record(json!({
            "nome": "Alfa",
            "id": "c-1",
            "endereco": {"rua": "A", "numero": 1},
        })));
        assert_eq!(
            serde_json::to_string(&normalized).expect("serialize"),
            r#"{"endereco":{"numero":1,"rua":"A"},"id":"c-1","nome":"Alfa"}"#
        );
    }

    #[test]
    fn parse_sequence_rejects_non_arrays() {
        assert_eq!(parse_sequence("[]"), Some(vec![]));
        assert!(parse_sequence("{\"id\":1}").is_none());
        assert!(parse_sequence("not json").is_none());
    }
}
