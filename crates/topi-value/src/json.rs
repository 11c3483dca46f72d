//! JSON mapping used by state snapshots
//!
//! Scalars map to native JSON types and lists to arrays. Sets, maps and
//! enums use single-key wrapper objects so they stay unambiguous:
//! `{"set": [...]}`, `{"map": [[k, v], ...]}`, `{"enum": "Type", "value": "member"}`.

use serde_json::{Map, Number, Value};

use crate::error::{ValueError, ValueResult};
use crate::value::{EnumValue, TaggedValue, ValueMap, ValueSet};

/// Convert a value to JSON
pub fn to_json(value: &TaggedValue) -> ValueResult<Value> {
    Ok(match value {
        TaggedValue::Nil => Value::Null,
        TaggedValue::Bool(b) => Value::Bool(*b),
        TaggedValue::Number(n) => Number::from_f64(*n)
            .map(Value::Number)
            .ok_or_else(|| ValueError::UnsupportedJson(format!("non-finite number {n}")))?,
        TaggedValue::String(s) => Value::String(s.clone()),
        TaggedValue::List(items) => {
            Value::Array(items.iter().map(to_json).collect::<ValueResult<_>>()?)
        }
        TaggedValue::Set(set) => {
            let items = set.iter().map(to_json).collect::<ValueResult<_>>()?;
            wrap("set", Value::Array(items))
        }
        TaggedValue::Map(map) => {
            let pairs = map
                .iter()
                .map(|(k, v)| Ok(Value::Array(vec![to_json(k)?, to_json(v)?])))
                .collect::<ValueResult<_>>()?;
            wrap("map", Value::Array(pairs))
        }
        TaggedValue::Enum(e) => {
            let mut obj = Map::new();
            obj.insert("enum".into(), Value::String(e.type_name.clone()));
            obj.insert("value".into(), Value::String(e.value.clone()));
            Value::Object(obj)
        }
    })
}

fn wrap(key: &str, inner: Value) -> Value {
    let mut obj = Map::new();
    obj.insert(key.into(), inner);
    Value::Object(obj)
}

/// Convert JSON back to a value
pub fn from_json(json: &Value) -> ValueResult<TaggedValue> {
    Ok(match json {
        Value::Null => TaggedValue::Nil,
        Value::Bool(b) => TaggedValue::Bool(*b),
        Value::Number(n) => TaggedValue::Number(
            n.as_f64()
                .ok_or_else(|| ValueError::UnsupportedJson(n.to_string()))?,
        ),
        Value::String(s) => TaggedValue::String(s.clone()),
        Value::Array(items) => {
            TaggedValue::List(items.iter().map(from_json).collect::<ValueResult<_>>()?)
        }
        Value::Object(obj) => from_object(obj)?,
    })
}

fn from_object(obj: &Map<String, Value>) -> ValueResult<TaggedValue> {
    let unsupported = || ValueError::UnsupportedJson(Value::Object(obj.clone()).to_string());

    if let (Some(Value::String(type_name)), Some(Value::String(value)), 2) =
        (obj.get("enum"), obj.get("value"), obj.len())
    {
        return Ok(TaggedValue::Enum(EnumValue::new(type_name.clone(), value.clone())));
    }
    if obj.len() != 1 {
        return Err(unsupported());
    }
    if let Some(Value::Array(items)) = obj.get("set") {
        let mut set = ValueSet::new();
        for item in items {
            set.insert(from_json(item)?);
        }
        return Ok(TaggedValue::Set(set));
    }
    if let Some(Value::Array(pairs)) = obj.get("map") {
        let mut map = ValueMap::new();
        for pair in pairs {
            match pair.as_array().map(Vec::as_slice) {
                Some([k, v]) => {
                    map.insert(from_json(k)?, from_json(v)?);
                }
                _ => return Err(unsupported()),
            }
        }
        return Ok(TaggedValue::Map(map));
    }
    Err(unsupported())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars_are_native() {
        assert_eq!(to_json(&TaggedValue::from(true)).unwrap(), json!(true));
        assert_eq!(to_json(&TaggedValue::from(2.5)).unwrap(), json!(2.5));
        assert_eq!(to_json(&TaggedValue::from("x")).unwrap(), json!("x"));
        assert_eq!(to_json(&TaggedValue::Nil).unwrap(), json!(null));
    }

    #[test]
    fn test_enum_two_field_form() {
        let value = TaggedValue::enumeration("Act", "middle");
        let json = to_json(&value).unwrap();
        assert_eq!(json, json!({"enum": "Act", "value": "middle"}));
        assert_eq!(from_json(&json).unwrap(), value);
    }

    #[test]
    fn test_collections() {
        let mut map = ValueMap::new();
        map.insert("k".into(), 1.into());
        let value = TaggedValue::List(vec![
            TaggedValue::Set([1.into()].into_iter().collect()),
            TaggedValue::Map(map),
        ]);
        let json = to_json(&value).unwrap();
        assert_eq!(json, json!([{"set": [1.0]}, {"map": [["k", 1.0]]}]));
        assert_eq!(from_json(&json).unwrap(), value);
    }

    #[test]
    fn test_non_finite_number_rejected() {
        assert!(to_json(&TaggedValue::Number(f64::INFINITY)).is_err());
    }

    #[test]
    fn test_plain_object_rejected() {
        assert!(from_json(&json!({"a": 1, "b": 2})).is_err());
        assert!(from_json(&json!({"map": [[1]]})).is_err());
    }
}
