//! Data model shared by the binder and its fetch backends
//!
//! This module provides:
//! - [`Value`], the tagged representation of anything a source can fetch
//! - [`Discovery`] records produced by discoverers
//! - [`Transformed`] results handed to downstream consumers
//! - Flattening of nested values into a path-addressed namespace
//! - Entity name rewrites

mod flatten;
mod rewrite;

pub use flatten::{add_values, flatten, FlatNamespace};
pub use rewrite::{EntityRewrite, EntityRewrites, RewriteAction};

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Name of the field a payload uses to declare its own TTL
pub const TTL_FIELD: &str = "ttl";

/// String-keyed mapping of nested values
pub type Map = BTreeMap<String, Value>;

/// Flat string-to-string mapping (annotations)
pub type StringMap = BTreeMap<String, String>;

/// A fetched value.
///
/// `MapWithTtl` is a mapping that exposes the self-declared TTL capability:
/// its `ttl` field, when present and parseable, overrides the TTL configured
/// for the source that fetched it. A plain `Map` with a `ttl` key does not.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Sequence(Vec<Value>),
    Map(Map),
    MapWithTtl(Map),
}

/// Why a value did not yield a self-declared TTL
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TtlError {
    /// The value does not expose the capability, or has no `ttl` field
    #[error("TTL value not found")]
    NotDeclared,
    /// A `ttl` field is present but is not a valid duration
    #[error("invalid TTL {value:?}: {message}")]
    Invalid { value: String, message: String },
}

/// Capability of a fetched payload to override its cache TTL
pub trait DeclaredTtl {
    fn declared_ttl(&self) -> Result<Duration, TtlError>;
}

impl Value {
    /// Convert a mapping into its TTL-declaring variant. Other shapes are unchanged.
    pub fn with_declared_ttl(self) -> Self {
        match self {
            Value::Map(map) => Value::MapWithTtl(map),
            other => other,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Entries of either mapping variant
    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(map) | Value::MapWithTtl(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl DeclaredTtl for Value {
    fn declared_ttl(&self) -> Result<Duration, TtlError> {
        let Value::MapWithTtl(map) = self else {
            return Err(TtlError::NotDeclared);
        };
        match map.get(TTL_FIELD) {
            Some(Value::String(raw)) => {
                humantime::parse_duration(raw).map_err(|e| TtlError::Invalid {
                    value: raw.clone(),
                    message: e.to_string(),
                })
            }
            Some(other) => Err(TtlError::Invalid {
                value: format!("{}", other),
                message: "expected a duration string".to_string(),
            }),
            None => Err(TtlError::NotDeclared),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => f.write_str(s),
            Value::Sequence(_) | Value::Map(_) | Value::MapWithTtl(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Value::Map(map)
    }
}

impl From<Vec<Value>> for Value {
    fn from(seq: Vec<Value>) -> Self {
        Value::Sequence(seq)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Sequence(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(obj) => {
                Value::Map(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => n.serialize(serializer),
            Value::String(s) => serializer.serialize_str(s),
            Value::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) | Value::MapWithTtl(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a scalar, sequence or string-keyed mapping")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        Deserialize::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Number(v.into()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(Value::Number(v.into()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(serde_json::Number::from_f64(v)
            .map(Value::Number)
            .unwrap_or(Value::Null))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Sequence(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
        let mut map = Map::new();
        while let Some((key, value)) = access.next_entry::<MapKey, Value>()? {
            map.insert(key.0, value);
        }
        Ok(Value::Map(map))
    }
}

/// Mapping key that accepts YAML's non-string scalar keys (`80: http`)
struct MapKey(String);

impl<'de> Deserialize<'de> for MapKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(s) => Ok(MapKey(s)),
            Value::Bool(b) => Ok(MapKey(b.to_string())),
            Value::Number(n) => Ok(MapKey(n.to_string())),
            other => Err(de::Error::custom(format!(
                "mapping keys must be scalars, got {}",
                other
            ))),
        }
    }
}

/// One entity observed by a discoverer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discovery {
    #[serde(default)]
    pub variables: Map,
    #[serde(default, rename = "metricAnnotations", alias = "annotations")]
    pub annotations: StringMap,
    #[serde(default)]
    pub entity_rewrites: EntityRewrites,
    /// Whether `variables.ttl` is a self-declared TTL for the discovery cache
    #[serde(skip)]
    pub declares_ttl: bool,
}

impl Discovery {
    pub fn new(variables: Map, annotations: StringMap, entity_rewrites: EntityRewrites) -> Self {
        Self {
            variables,
            annotations,
            entity_rewrites,
            declares_ttl: false,
        }
    }

    /// Mark the record as exposing the self-declared TTL capability
    pub fn with_declared_ttl(mut self) -> Self {
        self.declares_ttl = true;
        self
    }

    /// Discovery as emitted by external backends, whose annotations may be nested
    pub fn from_generic(generic: GenericDiscovery) -> Self {
        let mut annotations = FlatNamespace::default();
        add_values(&mut annotations, "", &Value::Map(generic.metric_annotations));
        Self::new(
            generic.variables,
            annotations.into_iter().collect(),
            generic.entity_rewrites,
        )
    }
}

/// A list of discoveries declares a TTL through the variables of its
/// TTL-declaring records. The shortest valid declaration wins.
impl DeclaredTtl for Vec<Discovery> {
    fn declared_ttl(&self) -> Result<Duration, TtlError> {
        let mut shortest: Option<Duration> = None;
        let mut first_invalid = None;
        for discovery in self.iter().filter(|d| d.declares_ttl) {
            let Some(raw) = discovery.variables.get(TTL_FIELD) else {
                continue;
            };
            let declared = Value::MapWithTtl(Map::from([(TTL_FIELD.to_string(), raw.clone())]));
            match declared.declared_ttl() {
                Ok(ttl) => shortest = Some(shortest.map_or(ttl, |s| s.min(ttl))),
                Err(e @ TtlError::Invalid { .. }) => {
                    first_invalid.get_or_insert(e);
                }
                Err(TtlError::NotDeclared) => {}
            }
        }
        match (shortest, first_invalid) {
            (Some(ttl), _) => Ok(ttl),
            (None, Some(e)) => Err(e),
            (None, None) => Err(TtlError::NotDeclared),
        }
    }
}

/// Wire shape of a discovery record produced by a discovery backend
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericDiscovery {
    #[serde(default)]
    pub variables: Map,
    #[serde(default, alias = "annotations")]
    pub metric_annotations: Map,
    #[serde(default)]
    pub entity_rewrites: EntityRewrites,
}

/// One resolved template instance, per discovered entity
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transformed<T> {
    pub variables: T,
    pub metric_annotations: StringMap,
    pub entity_rewrites: EntityRewrites,
}
