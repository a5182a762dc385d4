//! Typed task extras and their flat, ordered encoding.
//!
//! Extras travel twice: once into the registry (so a task can be rebuilt after
//! process death) and once through the OS primitive (so the entry point can
//! hand them back to the owner). Both use the same [`EncodedExtra`] list.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// A single typed value attached to a task.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtraValue {
    Bool(bool),
    Double(f64),
    Int(i32),
    Long(i64),
    String(String),
    BoolArray(Vec<bool>),
    DoubleArray(Vec<f64>),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
    StringArray(Vec<String>),
    /// Key present with no value; distinct from an absent key.
    Null,
}

impl ExtraValue {
    pub fn tag(&self) -> ExtraTag {
        match self {
            ExtraValue::Bool(_) => ExtraTag::Bool,
            ExtraValue::Double(_) => ExtraTag::Double,
            ExtraValue::Int(_) => ExtraTag::Int,
            ExtraValue::Long(_) => ExtraTag::Long,
            ExtraValue::String(_) => ExtraTag::String,
            ExtraValue::BoolArray(_) => ExtraTag::BoolArray,
            ExtraValue::DoubleArray(_) => ExtraTag::DoubleArray,
            ExtraValue::IntArray(_) => ExtraTag::IntArray,
            ExtraValue::LongArray(_) => ExtraTag::LongArray,
            ExtraValue::StringArray(_) => ExtraTag::StringArray,
            ExtraValue::Null => ExtraTag::Null,
        }
    }

    /// Convert a dynamic JSON value. Objects, mixed-type arrays, nulls inside
    /// arrays and numbers outside the i64/f64 range have no representation.
    pub fn from_json(key: &str, value: &serde_json::Value) -> Result<Self, CodecError> {
        use serde_json::Value;

        let unsupported = |reason: &str| CodecError::Unsupported {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        match value {
            Value::Null => Ok(ExtraValue::Null),
            Value::Bool(b) => Ok(ExtraValue::Bool(*b)),
            Value::Number(n) => {
                number_from_json(n).ok_or_else(|| unsupported("number out of range"))
            }
            Value::String(s) => Ok(ExtraValue::String(s.clone())),
            Value::Object(_) => Err(unsupported("nested objects are not supported")),
            Value::Array(items) => array_from_json(items)
                .ok_or_else(|| unsupported("arrays must be homogeneous")),
        }
    }
}

fn number_from_json(n: &serde_json::Number) -> Option<ExtraValue> {
    if let Some(i) = n.as_i64() {
        return Some(match i32::try_from(i) {
            Ok(small) => ExtraValue::Int(small),
            Err(_) => ExtraValue::Long(i),
        });
    }
    if n.is_u64() {
        return None;
    }
    n.as_f64().map(ExtraValue::Double)
}

fn array_from_json(items: &[serde_json::Value]) -> Option<ExtraValue> {
    use serde_json::Value;

    // An empty JSON array carries no element type; treat it as strings.
    let Some(first) = items.first() else {
        return Some(ExtraValue::StringArray(Vec::new()));
    };

    match first {
        Value::Bool(_) => items
            .iter()
            .map(Value::as_bool)
            .collect::<Option<Vec<_>>>()
            .map(ExtraValue::BoolArray),
        Value::String(_) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .map(ExtraValue::StringArray),
        Value::Number(_) => {
            if items.iter().all(|v| v.is_i64()) {
                let longs: Vec<i64> = items.iter().filter_map(Value::as_i64).collect();
                match longs.iter().map(|l| i32::try_from(*l)).collect::<Result<Vec<_>, _>>() {
                    Ok(ints) => Some(ExtraValue::IntArray(ints)),
                    Err(_) => Some(ExtraValue::LongArray(longs)),
                }
            } else if items.iter().all(|v| v.is_f64() || v.is_i64()) {
                items
                    .iter()
                    .map(Value::as_f64)
                    .collect::<Option<Vec<_>>>()
                    .map(ExtraValue::DoubleArray)
            } else {
                None
            }
        }
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Ordered key/value payload supplied by the task owner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extras(BTreeMap<String, ExtraValue>);

impl Extras {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build extras from a JSON object. Fails on the first unsupported value.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, CodecError> {
        let serde_json::Value::Object(map) = value else {
            return Err(CodecError::Unsupported {
                key: String::new(),
                reason: "extras must be a JSON object".to_string(),
            });
        };
        map.iter()
            .map(|(k, v)| ExtraValue::from_json(k, v).map(|ev| (k.clone(), ev)))
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Self)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ExtraValue) -> Option<ExtraValue> {
        self.0.insert(key.into(), value)
    }

    pub fn with(mut self, key: impl Into<String>, value: ExtraValue) -> Self {
        self.insert(key, value);
        self
    }

    /// `Some(&ExtraValue::Null)` means "present but null"; `None` means absent.
    pub fn get(&self, key: &str) -> Option<&ExtraValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ExtraValue)> {
        self.0.iter()
    }
}

impl FromIterator<(String, ExtraValue)> for Extras {
    fn from_iter<I: IntoIterator<Item = (String, ExtraValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Type tag of an [`EncodedExtra`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtraTag {
    Bool,
    Double,
    Int,
    Long,
    String,
    BoolArray,
    DoubleArray,
    IntArray,
    LongArray,
    StringArray,
    Null,
}

impl ExtraTag {
    fn is_array(self) -> bool {
        matches!(
            self,
            ExtraTag::BoolArray
                | ExtraTag::DoubleArray
                | ExtraTag::IntArray
                | ExtraTag::LongArray
                | ExtraTag::StringArray
        )
    }
}

/// One flattened extra: key, type tag and zero or more textual values.
///
/// Scalars carry exactly one value, `Null` carries none, arrays carry one
/// value per element in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedExtra {
    pub key: String,
    pub tag: ExtraTag,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// Flatten extras into one item per key, in key order.
pub fn encode(extras: &Extras) -> Vec<EncodedExtra> {
    extras
        .iter()
        .map(|(key, value)| EncodedExtra {
            key: key.clone(),
            tag: value.tag(),
            values: encode_values(value),
        })
        .collect()
}

fn encode_values(value: &ExtraValue) -> Vec<String> {
    // f64's Display is the shortest string that parses back to the same bits.
    fn all<T: ToString>(items: &[T]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    match value {
        ExtraValue::Bool(b) => vec![b.to_string()],
        ExtraValue::Double(d) => vec![d.to_string()],
        ExtraValue::Int(i) => vec![i.to_string()],
        ExtraValue::Long(l) => vec![l.to_string()],
        ExtraValue::String(s) => vec![s.clone()],
        ExtraValue::BoolArray(v) => all(v),
        ExtraValue::DoubleArray(v) => all(v),
        ExtraValue::IntArray(v) => all(v),
        ExtraValue::LongArray(v) => all(v),
        ExtraValue::StringArray(v) => v.clone(),
        ExtraValue::Null => Vec::new(),
    }
}

/// Inverse of [`encode`].
pub fn decode(items: &[EncodedExtra]) -> Result<Extras, CodecError> {
    let mut map = BTreeMap::new();
    for item in items {
        let value = decode_item(item)?;
        if map.insert(item.key.clone(), value).is_some() {
            return Err(CodecError::DuplicateKey(item.key.clone()));
        }
    }
    Ok(Extras(map))
}

fn decode_item(item: &EncodedExtra) -> Result<ExtraValue, CodecError> {
    let malformed = |reason: String| CodecError::Malformed {
        key: item.key.clone(),
        reason,
    };

    let expected = match item.tag {
        ExtraTag::Null => Some(0),
        tag if tag.is_array() => None,
        _ => Some(1),
    };
    if let Some(n) = expected {
        if item.values.len() != n {
            return Err(malformed(format!(
                "{:?} expects {n} value(s), found {}",
                item.tag,
                item.values.len()
            )));
        }
    }

    fn parse_all<T: std::str::FromStr>(values: &[String]) -> Result<Vec<T>, String>
    where
        T::Err: std::fmt::Display,
    {
        values
            .iter()
            .map(|v| v.parse::<T>().map_err(|e| format!("'{v}': {e}")))
            .collect()
    }

    let first = || item.values.first().map(String::as_str).unwrap_or_default();

    let value = match item.tag {
        ExtraTag::Null => ExtraValue::Null,
        ExtraTag::String => ExtraValue::String(first().to_string()),
        ExtraTag::StringArray => ExtraValue::StringArray(item.values.clone()),
        ExtraTag::Bool => ExtraValue::Bool(first().parse().map_err(|e| malformed(format!("{e}")))?),
        ExtraTag::Double => {
            ExtraValue::Double(first().parse().map_err(|e| malformed(format!("{e}")))?)
        }
        ExtraTag::Int => ExtraValue::Int(first().parse().map_err(|e| malformed(format!("{e}")))?),
        ExtraTag::Long => ExtraValue::Long(first().parse().map_err(|e| malformed(format!("{e}")))?),
        ExtraTag::BoolArray => ExtraValue::BoolArray(parse_all(&item.values).map_err(malformed)?),
        ExtraTag::DoubleArray => {
            ExtraValue::DoubleArray(parse_all(&item.values).map_err(malformed)?)
        }
        ExtraTag::IntArray => ExtraValue::IntArray(parse_all(&item.values).map_err(malformed)?),
        ExtraTag::LongArray => ExtraValue::LongArray(parse_all(&item.values).map_err(malformed)?),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn every_type() -> Extras {
        Extras::new()
            .with("bool", ExtraValue::Bool(true))
            .with("double", ExtraValue::Double(-0.1))
            .with("int", ExtraValue::Int(i32::MIN))
            .with("long", ExtraValue::Long(i64::MAX))
            .with("string", ExtraValue::String("héllo, world".into()))
            .with("empty_string", ExtraValue::String(String::new()))
            .with("bools", ExtraValue::BoolArray(vec![false, true, false]))
            .with("doubles", ExtraValue::DoubleArray(vec![1.5, f64::MAX, 1e-300]))
            .with("ints", ExtraValue::IntArray(vec![3, 1, 2]))
            .with("longs", ExtraValue::LongArray(vec![i64::MIN, 0]))
            .with("strings", ExtraValue::StringArray(vec!["b".into(), "".into(), "a".into()]))
            .with("empty_ints", ExtraValue::IntArray(Vec::new()))
            .with("empty_strings", ExtraValue::StringArray(Vec::new()))
            .with("nothing", ExtraValue::Null)
    }

    #[test]
    fn decode_inverts_encode_for_every_type() {
        let extras = every_type();
        let encoded = encode(&extras);
        assert_eq!(encoded.len(), extras.len());
        let decoded = decode(&encoded).expect("decode");
        assert_eq!(decoded, extras);
    }

    #[test]
    fn survives_json_persistence() {
        let extras = every_type();
        let json = serde_json::to_string(&encode(&extras)).expect("serialize");
        let items: Vec<EncodedExtra> = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(decode(&items).expect("decode"), extras);
    }

    #[test]
    fn array_order_is_preserved() {
        let extras = Extras::new().with("ids", ExtraValue::LongArray(vec![9, 4, 7]));
        let encoded = encode(&extras);
        assert_eq!(encoded[0].values, vec!["9", "4", "7"]);
    }

    #[test]
    fn null_is_present_not_absent() {
        let decoded = decode(&encode(&Extras::new().with("k", ExtraValue::Null))).expect("decode");
        assert_eq!(decoded.get("k"), Some(&ExtraValue::Null));
        assert_eq!(decoded.get("missing"), None);
    }

    #[test]
    fn scalar_with_wrong_arity_is_malformed() {
        let item = EncodedExtra {
            key: "n".into(),
            tag: ExtraTag::Int,
            values: vec!["1".into(), "2".into()],
        };
        assert!(matches!(decode(&[item]), Err(CodecError::Malformed { .. })));
    }

    #[test]
    fn unparsable_value_is_malformed() {
        let item = EncodedExtra {
            key: "flag".into(),
            tag: ExtraTag::Bool,
            values: vec!["maybe".into()],
        };
        assert!(matches!(decode(&[item]), Err(CodecError::Malformed { .. })));
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let item = EncodedExtra {
            key: "k".into(),
            tag: ExtraTag::Null,
            values: Vec::new(),
        };
        assert!(matches!(
            decode(&[item.clone(), item]),
            Err(CodecError::DuplicateKey(k)) if k == "k"
        ));
    }

    #[test]
    fn json_object_maps_to_typed_values() {
        let extras = Extras::from_json(&json!({
            "url": "https://example.org",
            "count": 3,
            "big": 5_000_000_000_i64,
            "ratio": 0.25,
            "tags": ["a", "b"],
            "gone": null,
        }))
        .expect("from_json");
        assert_eq!(extras.get("count"), Some(&ExtraValue::Int(3)));
        assert_eq!(extras.get("big"), Some(&ExtraValue::Long(5_000_000_000)));
        assert_eq!(extras.get("ratio"), Some(&ExtraValue::Double(0.25)));
        assert_eq!(
            extras.get("tags"),
            Some(&ExtraValue::StringArray(vec!["a".into(), "b".into()]))
        );
        assert_eq!(extras.get("gone"), Some(&ExtraValue::Null));
    }

    #[test]
    fn nested_object_is_unsupported() {
        let err = Extras::from_json(&json!({ "nested": { "a": 1 } })).unwrap_err();
        assert!(matches!(err, CodecError::Unsupported { key, .. } if key == "nested"));
    }

    #[test]
    fn mixed_array_is_unsupported() {
        let err = Extras::from_json(&json!({ "mixed": [1, "two"] })).unwrap_err();
        assert!(matches!(err, CodecError::Unsupported { .. }));
    }
}
