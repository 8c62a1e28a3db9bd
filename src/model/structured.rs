//! Structured key/value maps stored in a single text column.
//!
//! Calculator inputs and results are free-form maps. They are encoded as JSON
//! text on write. On read, text that fails to decode yields an empty map and a
//! warning; callers never see a decode error.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// A value inside a [`StructuredMap`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MapValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<MapValue>),
    Map(StructuredMap),
}

impl MapValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            MapValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MapValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MapValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<f64> for MapValue {
    fn from(value: f64) -> Self {
        MapValue::Number(value)
    }
}

impl From<i64> for MapValue {
    fn from(value: i64) -> Self {
        MapValue::Number(value as f64)
    }
}

impl From<i32> for MapValue {
    fn from(value: i32) -> Self {
        MapValue::Number(f64::from(value))
    }
}

impl From<bool> for MapValue {
    fn from(value: bool) -> Self {
        MapValue::Bool(value)
    }
}

impl From<&str> for MapValue {
    fn from(value: &str) -> Self {
        MapValue::Text(value.to_string())
    }
}

impl From<String> for MapValue {
    fn from(value: String) -> Self {
        MapValue::Text(value)
    }
}

impl From<Vec<MapValue>> for MapValue {
    fn from(value: Vec<MapValue>) -> Self {
        MapValue::List(value)
    }
}

impl From<StructuredMap> for MapValue {
    fn from(value: StructuredMap) -> Self {
        MapValue::Map(value)
    }
}

/// Ordered string-keyed map of [`MapValue`]s.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructuredMap(BTreeMap<String, MapValue>);

impl StructuredMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<MapValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<MapValue>) -> Option<MapValue> {
        self.0.insert(key.to_string(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&MapValue> {
        self.0.get(key)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(MapValue::as_number)
    }

    pub fn remove(&mut self, key: &str) -> Option<MapValue> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MapValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Encode as JSON text. Non-finite numbers are written as `null`.
    pub fn encode(&self) -> String {
        // String keys only, so serialization cannot fail.
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }

    /// Strict decode.
    pub fn try_decode(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(text)
            .map_err(|e| StoreError::CorruptData(format!("structured map: {}", e)))
    }

    /// Lenient decode: corrupt text becomes an empty map.
    pub fn decode(text: &str) -> Self {
        match Self::try_decode(text) {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, len = text.len(), "discarding unreadable structured map");
                Self::default()
            }
        }
    }
}

impl<K: Into<String>, V: Into<MapValue>> FromIterator<(K, V)> for StructuredMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_map() {
        let empty = StructuredMap::new();
        assert_eq!(empty.encode(), "{}");
        assert_eq!(StructuredMap::decode("{}"), empty);
        assert_eq!(StructuredMap::decode(""), empty);
    }

    #[test]
    fn test_numeric_looking_keys_stay_text() {
        let map = StructuredMap::new().with("10", 1.5).with("007", "bond");
        let decoded = StructuredMap::decode(&map.encode());
        assert_eq!(decoded.get("007"), Some(&MapValue::Text("bond".into())));
        assert_eq!(decoded.number("10"), Some(1.5));
    }

    #[test]
    fn test_integers_decode_as_numbers() {
        let map = StructuredMap::decode(r#"{"width": 50, "height": 60, "ok": true, "x": null}"#);
        assert_eq!(map.number("width"), Some(50.0));
        assert_eq!(map.get("ok"), Some(&MapValue::Bool(true)));
        assert_eq!(map.get("x"), Some(&MapValue::Null));
    }

    #[test]
    fn test_corrupt_text_is_empty_map() {
        assert!(StructuredMap::decode("{not json").is_empty());
        assert!(StructuredMap::decode("[1, 2]").is_empty());
        assert!(matches!(
            StructuredMap::try_decode("{not json"),
            Err(StoreError::CorruptData(_))
        ));
    }

    #[test]
    fn test_nested_values() {
        let inner = StructuredMap::new().with("rows", 12);
        let map = StructuredMap::new()
            .with("panel", inner.clone())
            .with("sizes", vec![MapValue::from(1), MapValue::from("m")]);
        let decoded = StructuredMap::decode(&map.encode());
        assert_eq!(decoded.get("panel"), Some(&MapValue::Map(inner)));
        assert_eq!(decoded, map);
    }

    fn map_value() -> impl Strategy<Value = MapValue> {
        let leaf = prop_oneof![
            Just(MapValue::Null),
            any::<bool>().prop_map(MapValue::Bool),
            // JSON has no NaN or infinity.
            any::<f64>()
                .prop_filter("finite", |n| n.is_finite())
                .prop_map(MapValue::Number),
            ".{0,12}".prop_map(MapValue::Text),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(MapValue::List),
                prop::collection::btree_map(".{0,6}", inner, 0..4)
                    .prop_map(|m| MapValue::Map(StructuredMap(m))),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(
            entries in prop::collection::btree_map("[0-9a-zA-Z_]{0,8}", map_value(), 0..6)
        ) {
            let map = StructuredMap(entries);
            prop_assert_eq!(StructuredMap::decode(&map.encode()), map);
        }
    }
}
