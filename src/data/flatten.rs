// Flattening of nested values into a path-addressed string namespace

use super::Value;
use ahash::{HashMap, HashMapExt};

/// Flat mapping from a dotted/indexed path to its string value
pub type FlatNamespace = HashMap<String, String>;

/// Adds a structured value to a flat map, where each key uses a JS-like
/// notation to reach fields or sequence elements.
///
/// e.g. `{"prop":{"arr":[1,2,3]}}` adds
/// `prop.arr[0] => "1"`, `prop.arr[1] => "2"`, `prop.arr[2] => "3"`.
///
/// Non-string scalars are stringified. When two branches produce the same
/// path, the last one written wins.
pub fn add_values(dst: &mut FlatNamespace, prefix: &str, value: &Value) {
    match value {
        Value::String(s) => {
            dst.insert(prefix.to_string(), s.clone());
        }
        Value::Map(map) | Value::MapWithTtl(map) => {
            for (key, entry) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                add_values(dst, &path, entry);
            }
        }
        Value::Sequence(items) => {
            for (idx, item) in items.iter().enumerate() {
                add_values(dst, &format!("{}[{}]", prefix, idx), item);
            }
        }
        scalar => {
            dst.insert(prefix.to_string(), scalar.to_string());
        }
    }
}

/// Flatten a value with no prefix into a fresh namespace
pub fn flatten(value: &Value) -> FlatNamespace {
    let mut dst = FlatNamespace::new();
    add_values(&mut dst, "", value);
    dst
}
