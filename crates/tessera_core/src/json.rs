//! Conversions between cell values and JSON, for the human-readable mirrors.

use serde_json::{Map, Number};
use std::collections::BTreeMap;
use tessera_codec::Value;

/// Converts a cell value to JSON.
///
/// Bytes become an array of numbers and non-text map keys are rendered with
/// their debug form; both only occur in values written by foreign peers.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Integer(n) => serde_json::Value::Number((*n).into()),
        Value::Float(f) => Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Bytes(b) => {
            serde_json::Value::Array(b.iter().map(|x| serde_json::Value::from(*x)).collect())
        }
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Map(pairs) => {
            let mut object = Map::new();
            for (k, v) in pairs {
                let key = match k {
                    Value::Text(s) => s.clone(),
                    other => format!("{other:?}"),
                };
                object.insert(key, value_to_json(v));
            }
            serde_json::Value::Object(object)
        }
    }
}

/// Converts JSON to a cell value. Numbers that fit an `i64` become integers.
pub fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => n.as_f64().map_or(Value::Null, Value::Float),
        },
        serde_json::Value::String(s) => Value::Text(s.clone()),
        serde_json::Value::Array(items) => Value::Array(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(object) => {
            Value::text_map(object.iter().map(|(k, v)| (k.clone(), json_to_value(v))))
        }
    }
}

/// Converts a set of cells to a JSON object.
pub fn cells_to_json(cells: &BTreeMap<String, Value>) -> serde_json::Value {
    serde_json::Value::Object(
        cells
            .iter()
            .map(|(k, v)| (k.clone(), value_to_json(v)))
            .collect(),
    )
}

/// Serde adapter for optional cell values stored in schema definitions.
pub(crate) mod optional_value {
    use super::{json_to_value, value_to_json};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use tessera_codec::Value;

    pub fn serialize<S: Serializer>(value: &Option<Value>, serializer: S) -> Result<S::Ok, S::Error> {
        value.as_ref().map(value_to_json).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
        let json = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(json.as_ref().map(json_to_value))
    }
}
