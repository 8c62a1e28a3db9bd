//! Core types for the knitting store.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque unique identifier for a row.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(String);

impl RowId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        RowId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RowId {
    fn from(s: &str) -> Self {
        RowId(s.to_string())
    }
}

impl From<String> for RowId {
    fn from(s: String) -> Self {
        RowId(s)
    }
}

impl fmt::Debug for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowId({})", self.0)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }

    /// The smallest timestamp strictly after `self`.
    pub fn next(self) -> Self {
        Timestamp(self.0 + 1)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Source of row timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Hand-driven clock for tests and deterministic seeding.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            micros: AtomicI64::new(start.0),
        }
    }

    pub fn set(&self, at: Timestamp) {
        self.micros.store(at.0, AtomicOrdering::SeqCst);
    }

    pub fn advance(&self, micros: i64) {
        self.micros.fetch_add(micros, AtomicOrdering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.micros.load(AtomicOrdering::SeqCst))
    }
}

/// A single column value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Total order used for sorting: nulls first, then booleans, numbers, text.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Number(_) => 2,
                Value::Text(_) => 3,
            }
        }

        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&RowId> for Value {
    fn from(id: &RowId) -> Self {
        Value::Text(id.0.clone())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Column name to value.
pub type Fields = BTreeMap<String, Value>;

/// Names of the columns every table carries implicitly.
pub const ID_COLUMN: &str = "id";
pub const CREATED_AT_COLUMN: &str = "created_at";
pub const UPDATED_AT_COLUMN: &str = "updated_at";

/// A stored row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: RowId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Soft-delete marker; hidden from standard queries.
    pub deleted: bool,
    pub fields: Fields,
}

impl Row {
    /// Value of a column, including the implicit ones.
    pub fn get(&self, column: &str) -> Value {
        match column {
            ID_COLUMN => Value::Text(self.id.0.clone()),
            CREATED_AT_COLUMN => Value::Number(self.created_at.0 as f64),
            UPDATED_AT_COLUMN => Value::Number(self.updated_at.0 as f64),
            _ => self.fields.get(column).cloned().unwrap_or(Value::Null),
        }
    }

    pub fn text(&self, column: &str) -> Option<String> {
        self.fields
            .get(column)
            .and_then(Value::as_text)
            .map(str::to_string)
    }

    pub fn number(&self, column: &str) -> Option<f64> {
        self.fields.get(column).and_then(Value::as_number)
    }

    pub fn flag(&self, column: &str) -> Option<bool> {
        self.fields.get(column).and_then(Value::as_bool)
    }
}

/// Store statistics.
#[derive(Clone, Debug, Default)]
pub struct StoreStats {
    pub schema_version: u32,
    pub table_count: usize,
    pub row_count: usize,
    pub deleted_row_count: usize,
    pub frame_count: u64,
    pub file_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = RowId::generate();
        let b = RowId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_value_ordering() {
        let mut values = vec![
            Value::Text("b".into()),
            Value::Number(3.0),
            Value::Null,
            Value::Number(-1.5),
            Value::Text("a".into()),
            Value::Bool(true),
        ];
        values.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Bool(true),
                Value::Number(-1.5),
                Value::Number(3.0),
                Value::Text("a".into()),
                Value::Text("b".into()),
            ]
        );
    }

    #[test]
    fn test_implicit_columns() {
        let row = Row {
            id: RowId::from("r1"),
            created_at: Timestamp(10),
            updated_at: Timestamp(20),
            deleted: false,
            fields: Fields::new(),
        };
        assert_eq!(row.get("id"), Value::Text("r1".into()));
        assert_eq!(row.get("created_at"), Value::Number(10.0));
        assert_eq!(row.get("updated_at"), Value::Number(20.0));
        assert_eq!(row.get("missing"), Value::Null);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(Timestamp(100));
        assert_eq!(clock.now(), Timestamp(100));
        clock.advance(5);
        assert_eq!(clock.now(), Timestamp(105));
        clock.set(Timestamp(7));
        assert_eq!(clock.now(), Timestamp(7));
    }
}
