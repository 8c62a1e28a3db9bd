//! Query engine.
//!
//! Queries are plain values: a table, equality predicates, an optional sort
//! and limit. They do no I/O until handed to [`crate::Store::fetch`] or
//! [`crate::Store::observe`], which validate every column against the schema
//! registry before reading anything.

use crate::error::Result;
use crate::model::Model;
use crate::schema::AppSchema;
use crate::storage::{Database, IndexKey};
use crate::transaction::Overlay;
use crate::types::{Row, RowId, Value, CREATED_AT_COLUMN, ID_COLUMN};
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// `column = value`.
#[derive(Clone, Debug, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub value: Value,
}

impl Predicate {
    pub fn matches(&self, row: &Row) -> bool {
        IndexKey::from(&row.get(&self.column)) == IndexKey::from(&self.value)
    }
}

/// Hashable identity of a query, used to share work between subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QuerySignature {
    table: String,
    predicates: Vec<(String, IndexKey)>,
    sort: Option<(String, SortOrder)>,
    limit: Option<usize>,
    include_deleted: bool,
}

impl QuerySignature {
    pub fn table(&self) -> &str {
        &self.table
    }
}

/// Untyped query over one table.
#[derive(Clone, Debug, PartialEq)]
pub struct RowQuery {
    pub(crate) table: String,
    pub(crate) predicates: Vec<Predicate>,
    pub(crate) sort: Option<(String, SortOrder)>,
    pub(crate) limit: Option<usize>,
    pub(crate) include_deleted: bool,
}

impl RowQuery {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            predicates: Vec::new(),
            sort: None,
            limit: None,
            include_deleted: false,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn signature(&self) -> QuerySignature {
        QuerySignature {
            table: self.table.clone(),
            predicates: self
                .predicates
                .iter()
                .map(|p| (p.column.clone(), IndexKey::from(&p.value)))
                .collect(),
            sort: self.sort.clone(),
            limit: self.limit,
            include_deleted: self.include_deleted,
        }
    }

    /// Whether a row satisfies the predicates, ignoring the deleted flag.
    pub fn matches_predicates(&self, row: &Row) -> bool {
        self.predicates.iter().all(|p| p.matches(row))
    }

    pub fn matches(&self, row: &Row) -> bool {
        (self.include_deleted || !row.deleted) && self.matches_predicates(row)
    }

    /// Fail fast on unknown tables or columns.
    pub fn validate(&self, schema: &AppSchema) -> Result<()> {
        let table = schema.table(&self.table)?;
        for predicate in &self.predicates {
            table.require_column(&predicate.column)?;
        }
        if let Some((column, _)) = &self.sort {
            table.require_column(column)?;
        }
        Ok(())
    }

    /// Run against committed state, optionally layered with a transaction's pending writes.
    pub fn execute(
        &self,
        schema: &AppSchema,
        db: &Database,
        overlay: Option<&Overlay>,
    ) -> Result<Vec<Row>> {
        self.validate(schema)?;
        let table = db.table(&self.table)?;

        // Point lookup by id, else the narrowest indexed predicate, else scan.
        let best = self
            .predicates
            .iter()
            .filter_map(|p| table.lookup_len(&p.column, &p.value).map(|n| (n, p)))
            .min_by_key(|(n, _)| *n);

        let by_id = self
            .predicates
            .iter()
            .find(|p| p.column == ID_COLUMN)
            .map(|p| p.value.as_text().map(RowId::from));

        let mut rows: Vec<Row> = match (by_id, best) {
            (Some(id), _) => id
                .and_then(|id| table.get(&id))
                .filter(|row| self.matches(row))
                .cloned()
                .into_iter()
                .collect(),
            (None, Some((_, p))) => table
                .lookup(&p.column, &p.value)
                .unwrap_or_default()
                .iter()
                .filter_map(|id| table.get(id))
                .filter(|row| self.matches(row))
                .cloned()
                .collect(),
            (None, None) => table
                .rows()
                .filter(|row| self.matches(row))
                .cloned()
                .collect(),
        };

        if let Some(pending) = overlay.and_then(|o| o.table(&self.table)) {
            rows.retain(|row| !pending.contains_key(&row.id));
            rows.extend(
                pending
                    .values()
                    .flatten()
                    .filter(|row| self.matches(row))
                    .cloned(),
            );
        }

        self.sort_rows(&mut rows);
        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    fn sort_rows(&self, rows: &mut [Row]) {
        let (column, order) = match &self.sort {
            Some((column, order)) => (column.as_str(), *order),
            None => (CREATED_AT_COLUMN, SortOrder::Asc),
        };

        rows.sort_by(|a, b| {
            let by_value = a.get(column).total_cmp(&b.get(column));
            let by_value = match order {
                SortOrder::Asc => by_value,
                SortOrder::Desc => by_value.reverse(),
            };
            by_value.then_with(|| a.id.cmp(&b.id))
        });
    }
}

/// Typed query returning `T` records.
pub struct Query<T> {
    inner: RowQuery,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Model> Query<T> {
    /// Every live row of `T`'s table.
    pub fn all() -> Self {
        Self {
            inner: RowQuery::new(T::TABLE),
            _marker: PhantomData,
        }
    }

    pub fn where_eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.inner.predicates.push(Predicate {
            column: column.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn sort_by(mut self, column: &str, order: SortOrder) -> Self {
        self.inner.sort = Some((column.to_string(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.inner.limit = Some(limit);
        self
    }

    /// Include soft-deleted rows. Internal use only.
    pub(crate) fn including_deleted(mut self) -> Self {
        self.inner.include_deleted = true;
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.inner.predicates
    }

    pub fn rows(&self) -> &RowQuery {
        &self.inner
    }
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Query").field(&self.inner).finish()
    }
}

impl<T> PartialEq for Query<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

/// Ordered, typed result of a query or observation.
#[derive(Clone, Debug, PartialEq)]
pub struct Collection<T> {
    items: Vec<T>,
}

impl<T: Model> Collection<T> {
    pub(crate) fn from_rows(rows: &[Row]) -> Result<Self> {
        rows.iter()
            .map(T::from_row)
            .collect::<Result<Vec<_>>>()
            .map(|items| Self { items })
    }
}

impl<T> Collection<T> {
    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T> Deref for Collection<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.items
    }
}

impl<T> IntoIterator for Collection<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Collection<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T> FromIterator<T> for Collection<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

/// Two result sets that would decode to the same records.
pub(crate) fn same_rows(a: &[Row], b: &[Row]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.id == y.id
                && x.updated_at == y.updated_at
                && x.deleted == y.deleted
                && x.fields == y.fields
        })
}
