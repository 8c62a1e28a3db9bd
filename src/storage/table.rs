//! In-memory table with secondary indexes on indexed columns.

use crate::schema::{ColumnSchema, TableSchema};
use crate::types::{Row, RowId, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Hashable form of a [`Value`] for index lookups.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum IndexKey {
    Null,
    Text(String),
    Number(u64),
    Bool(bool),
}

impl From<&Value> for IndexKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => IndexKey::Null,
            Value::Text(s) => IndexKey::Text(s.clone()),
            // -0.0 and 0.0 compare equal, so they must share a key.
            Value::Number(n) if *n == 0.0 => IndexKey::Number(0f64.to_bits()),
            Value::Number(n) => IndexKey::Number(n.to_bits()),
            Value::Bool(b) => IndexKey::Bool(*b),
        }
    }
}

type ColumnIndex = HashMap<IndexKey, BTreeSet<RowId>>;

/// Rows of one table, including soft-deleted ones.
pub struct Table {
    schema: TableSchema,
    rows: BTreeMap<RowId, Row>,
    indexes: HashMap<String, ColumnIndex>,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        let indexes = schema
            .columns
            .iter()
            .filter(|c| c.indexed)
            .map(|c| (c.name.clone(), ColumnIndex::new()))
            .collect();

        Self {
            schema,
            rows: BTreeMap::new(),
            indexes,
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn get(&self, id: &RowId) -> Option<&Row> {
        self.rows.get(id)
    }

    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Insert or replace a row, returning the previous image.
    pub fn put(&mut self, row: Row) -> Option<Row> {
        let previous = self.rows.remove(&row.id);
        if let Some(old) = &previous {
            self.unindex(old);
        }
        self.index(&row);
        self.rows.insert(row.id.clone(), row);
        previous
    }

    pub fn remove(&mut self, id: &RowId) -> Option<Row> {
        let removed = self.rows.remove(id);
        if let Some(old) = &removed {
            self.unindex(old);
        }
        removed
    }

    /// Extend the schema; existing rows get each column's default.
    pub fn add_columns(&mut self, columns: &[ColumnSchema]) {
        for column in columns {
            if let Some(default) = &column.default {
                for row in self.rows.values_mut() {
                    row.fields
                        .entry(column.name.clone())
                        .or_insert_with(|| default.clone());
                }
            }
            self.schema.columns.push(column.clone());
            if column.indexed {
                let mut index = ColumnIndex::new();
                for row in self.rows.values() {
                    index
                        .entry(IndexKey::from(&row.get(&column.name)))
                        .or_default()
                        .insert(row.id.clone());
                }
                self.indexes.insert(column.name.clone(), index);
            }
        }
    }

    /// Ids whose `column` equals `value`, or `None` if the column has no index.
    pub fn lookup(&self, column: &str, value: &Value) -> Option<Vec<RowId>> {
        let index = self.indexes.get(column)?;
        Some(
            index
                .get(&IndexKey::from(value))
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default(),
        )
    }

    /// Size of the index bucket for `column = value`, if indexed.
    pub fn lookup_len(&self, column: &str, value: &Value) -> Option<usize> {
        let index = self.indexes.get(column)?;
        Some(index.get(&IndexKey::from(value)).map_or(0, BTreeSet::len))
    }

    fn index(&mut self, row: &Row) {
        for (column, index) in self.indexes.iter_mut() {
            index
                .entry(IndexKey::from(&row.get(column)))
                .or_default()
                .insert(row.id.clone());
        }
    }

    fn unindex(&mut self, row: &Row) {
        for (column, index) in self.indexes.iter_mut() {
            let key = IndexKey::from(&row.get(column));
            if let Some(ids) = index.get_mut(&key) {
                ids.remove(&row.id);
                if ids.is_empty() {
                    index.remove(&key);
                }
            }
        }
    }
}
