//! Write transactions.
//!
//! [`crate::Store::write`] hands the caller a [`Writer`] that buffers every
//! create, update and delete in an [`Overlay`]. When the closure returns `Ok`
//! the overlay becomes one storage batch; on `Err` it is thrown away.
//!
//! Writers are serialized by a FIFO ticket lock. Re-entering `write` from the
//! thread that already holds the ticket is a [`StoreError::Conflict`].

use crate::error::{Result, StoreError};
use crate::model::{Draft, Model, Patch};
use crate::query::{Collection, Predicate, Query, RowQuery};
use crate::schema::AppSchema;
use crate::storage::{Database, StorageOp};
use crate::types::{Clock, Row, RowId, Timestamp, Value};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap};
use std::thread::{self, ThreadId};
use tracing::debug;

/// Pending row images keyed by table then id. `None` marks a removal.
#[derive(Debug, Default)]
pub struct Overlay {
    tables: HashMap<String, BTreeMap<RowId, Option<Row>>>,
}

impl Overlay {
    pub fn table(&self, name: &str) -> Option<&BTreeMap<RowId, Option<Row>>> {
        self.tables.get(name)
    }

    /// `Some(None)` if removed in this transaction, `None` if untouched.
    fn get(&self, table: &str, id: &RowId) -> Option<Option<&Row>> {
        self.tables
            .get(table)
            .and_then(|rows| rows.get(id))
            .map(Option::as_ref)
    }

    fn put(&mut self, table: &str, row: Row) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(row.id.clone(), Some(row));
    }

    fn remove(&mut self, table: &str, id: &RowId) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(id.clone(), None);
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(BTreeMap::is_empty)
    }
}

struct TicketState {
    next_ticket: u64,
    serving: u64,
    holder: Option<ThreadId>,
}

/// FIFO admission for writers.
pub(crate) struct WriteCoordinator {
    state: Mutex<TicketState>,
    turn: Condvar,
}

impl WriteCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TicketState {
                next_ticket: 0,
                serving: 0,
                holder: None,
            }),
            turn: Condvar::new(),
        }
    }

    /// Block until it is this caller's turn.
    pub fn acquire(&self) -> Result<WriteTicket<'_>> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.holder == Some(me) {
            return Err(StoreError::Conflict(
                "write called from inside another write on the same thread".into(),
            ));
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        while state.serving != ticket {
            self.turn.wait(&mut state);
        }
        state.holder = Some(me);
        Ok(WriteTicket { coordinator: self })
    }
}

/// Held for the whole of one write, commit and notification included.
pub(crate) struct WriteTicket<'a> {
    coordinator: &'a WriteCoordinator,
}

impl Drop for WriteTicket<'_> {
    fn drop(&mut self) {
        let mut state = self.coordinator.state.lock();
        state.serving += 1;
        state.holder = None;
        drop(state);
        self.coordinator.turn.notify_all();
    }
}

/// Buffered writes plus read-your-writes access to committed state.
pub struct Writer<'a> {
    schema: &'a AppSchema,
    db: &'a Database,
    clock: &'a dyn Clock,
    overlay: Overlay,
    seeded: bool,
}

impl<'a> Writer<'a> {
    pub(crate) fn new(schema: &'a AppSchema, db: &'a Database, clock: &'a dyn Clock) -> Self {
        Self {
            schema,
            db,
            clock,
            overlay: Overlay::default(),
            seeded: false,
        }
    }

    /// Insert a new record. The store assigns its id and timestamps.
    pub fn create<D: Draft>(&mut self, draft: D) -> Result<D::Model> {
        draft.validate()?;
        let table = <D::Model as Model>::TABLE;
        let schema = self.schema.table(table)?;

        let mut fields = draft.into_fields();
        for column in &schema.columns {
            if let Some(default) = &column.default {
                fields
                    .entry(column.name.clone())
                    .or_insert_with(|| default.clone());
            }
        }

        let now = self.clock.now();
        let row = Row {
            id: RowId::generate(),
            created_at: now,
            updated_at: now,
            deleted: false,
            fields,
        };
        self.check_row(table, &row)?;
        self.check_parents(table, &row)?;

        let model = D::Model::from_row(&row)?;
        debug!(table, id = %row.id, "buffered create");
        self.overlay.put(table, row);
        Ok(model)
    }

    /// Apply a partial update to a live record.
    pub fn update<P: Patch>(&mut self, id: &RowId, patch: P) -> Result<P::Model> {
        patch.validate()?;
        let table = <P::Model as Model>::TABLE;
        let mut row = self.live_row(table, id)?;

        patch.apply(&mut row.fields);
        P::validate_merged(&row.fields)?;
        row.updated_at = self.stamp_after(&row);
        self.check_row(table, &row)?;
        self.check_parents(table, &row)?;

        let model = P::Model::from_row(&row)?;
        self.overlay.put(table, row);
        Ok(model)
    }

    pub fn find<T: Model>(&self, id: &RowId) -> Result<T> {
        T::from_row(&self.live_row(T::TABLE, id)?)
    }

    pub(crate) fn find_including_deleted<T: Model>(&self, id: &RowId) -> Result<T> {
        T::from_row(&self.any_row(T::TABLE, id)?)
    }

    /// Run a query against committed state plus this transaction's writes.
    pub fn fetch<T: Model>(&self, query: &Query<T>) -> Result<Collection<T>> {
        let rows = query
            .rows()
            .execute(self.schema, self.db, Some(&self.overlay))?;
        Collection::from_rows(&rows)
    }

    /// Hide a record from standard queries.
    pub fn mark_as_deleted<T: Model>(&mut self, id: &RowId) -> Result<()> {
        let row = self.any_row(T::TABLE, id)?;
        self.soft_delete(T::TABLE, row, false);
        Ok(())
    }

    /// Hide a record and, recursively, every live record referencing it.
    /// Returns how many rows were marked.
    pub fn mark_tree_as_deleted<T: Model>(&mut self, id: &RowId) -> Result<usize> {
        let row = self.any_row(T::TABLE, id)?;
        Ok(self.soft_delete(T::TABLE, row, true))
    }

    /// Remove a record and, recursively, every record referencing it,
    /// soft-deleted or not. Returns how many rows were removed.
    pub fn destroy_permanently<T: Model>(&mut self, id: &RowId) -> Result<usize> {
        self.any_row(T::TABLE, id)?;
        self.destroy(T::TABLE, id)
    }

    /// Like [`Writer::destroy_permanently`] by table name; rows already gone count as zero.
    pub(crate) fn destroy_row(&mut self, table: &str, id: &RowId) -> Result<usize> {
        if self.any_row(table, id).is_err() {
            return Ok(0);
        }
        self.destroy(table, id)
    }

    fn soft_delete(&mut self, table: &str, mut row: Row, cascade: bool) -> usize {
        let mut count = 0;
        if cascade {
            for (child_table, child) in self.children(table, &row.id, false) {
                count += self.soft_delete(&child_table, child, true);
            }
        }
        if !row.deleted {
            row.deleted = true;
            row.updated_at = self.stamp_after(&row);
            self.overlay.put(table, row);
            count += 1;
        }
        count
    }

    fn destroy(&mut self, table: &str, id: &RowId) -> Result<usize> {
        let mut count = 0;
        for (child_table, child) in self.children(table, id, true) {
            count += self.destroy(&child_table, &child.id)?;
        }
        self.overlay.remove(table, id);
        Ok(count + 1)
    }

    /// Rows in any table whose foreign key points at `table/id`.
    fn children(&self, table: &str, id: &RowId, include_deleted: bool) -> Vec<(String, Row)> {
        let mut found = Vec::new();
        for (child_table, column) in self.schema.children_of(table) {
            let query = RowQuery {
                predicates: vec![Predicate {
                    column: column.to_string(),
                    value: Value::from(id),
                }],
                include_deleted,
                ..RowQuery::new(child_table)
            };
            // Child tables come from the registry, so the query is valid.
            if let Ok(rows) = query.execute(self.schema, self.db, Some(&self.overlay)) {
                found.extend(rows.into_iter().map(|row| (child_table.to_string(), row)));
            }
        }
        found
    }

    fn any_row(&self, table: &str, id: &RowId) -> Result<Row> {
        self.schema.table(table)?;
        let row = match self.overlay.get(table, id) {
            Some(pending) => pending,
            None => self.db.get(table, id),
        };
        row.cloned().ok_or_else(|| StoreError::not_found(table, id))
    }

    fn live_row(&self, table: &str, id: &RowId) -> Result<Row> {
        let row = self.any_row(table, id)?;
        if row.deleted {
            return Err(StoreError::not_found(table, id));
        }
        Ok(row)
    }

    /// Timestamps strictly increase per row even if the clock stalls.
    fn stamp_after(&self, row: &Row) -> Timestamp {
        self.clock.now().max(row.updated_at.next())
    }

    fn check_row(&self, table: &str, row: &Row) -> Result<()> {
        let schema = self.schema.table(table)?;
        for name in row.fields.keys() {
            schema.column(name)?;
        }
        for column in &schema.columns {
            column.check(table, &row.get(&column.name))?;
        }
        Ok(())
    }

    /// Every foreign key must name a live parent.
    fn check_parents(&self, table: &str, row: &Row) -> Result<()> {
        let schema = self.schema.table(table)?;
        for (column, parent) in schema.foreign_keys() {
            let Some(parent_id) = row.get(column).as_text().map(RowId::from) else {
                continue;
            };
            self.live_row(parent, &parent_id)?;
        }
        Ok(())
    }

    /// Record the sample data as written when this transaction commits.
    pub(crate) fn mark_seeded(&mut self) {
        self.seeded = true;
    }

    /// Turn the overlay into a storage batch.
    pub(crate) fn into_ops(self) -> Vec<StorageOp> {
        let mut tables: Vec<_> = self.overlay.tables.into_iter().collect();
        tables.sort_by(|a, b| a.0.cmp(&b.0));

        let mut ops = Vec::new();
        for (table, rows) in tables {
            for (id, row) in rows {
                match row {
                    Some(row) => ops.push(StorageOp::Put {
                        table: table.clone(),
                        row,
                    }),
                    // Created and destroyed in the same transaction.
                    None if self.db.get(&table, &id).is_none() => {}
                    None => ops.push(StorageOp::Remove {
                        table: table.clone(),
                        id,
                    }),
                }
            }
        }
        if self.seeded && !self.db.is_seeded() {
            ops.push(StorageOp::MarkSeeded);
        }
        ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewCalculation, NewNote, NewProject, Project, ProjectPatch, ProjectStatus};
    use crate::model::{Calculation, Note};
    use crate::schema::knit;
    use crate::types::ManualClock;
    use std::sync::Arc;
    use std::time::Duration;

    fn database(schema: &AppSchema) -> Database {
        let mut db = Database::default();
        let ops: Vec<_> = schema
            .tables
            .iter()
            .cloned()
            .map(StorageOp::CreateTable)
            .collect();
        db.apply(&ops);
        db
    }

    fn commit(db: &mut Database, ops: Vec<StorageOp>) {
        db.check(&ops).unwrap();
        db.apply(&ops);
    }

    #[test]
    fn test_reads_see_pending_writes() {
        let schema = knit::app_schema().unwrap();
        let db = database(&schema);
        let clock = ManualClock::new(Timestamp(100));
        let mut w = Writer::new(&schema, &db, &clock);

        let p = w
            .create(NewProject::new("Светр", ProjectStatus::InProgress))
            .unwrap();
        assert_eq!(w.find::<Project>(p.id()).unwrap().name, "Светр");

        w.create(NewNote::new("Gauge", "22 sts").attach(p.id())).unwrap();
        assert_eq!(w.fetch(&p.notes()).unwrap().len(), 1);
        assert!(db.table(knit::NOTES).unwrap().is_empty());
    }

    #[test]
    fn test_child_needs_live_parent() {
        let schema = knit::app_schema().unwrap();
        let mut db = database(&schema);
        let clock = ManualClock::new(Timestamp(100));

        let mut w = Writer::new(&schema, &db, &clock);
        let missing = RowId::from("nope");
        assert!(matches!(
            w.create(NewCalculation::new("yarn", "Yarn").attach(&missing)),
            Err(StoreError::NotFound { .. })
        ));

        let p = w
            .create(NewProject::new("Шапка", ProjectStatus::Planned))
            .unwrap();
        let ops = w.into_ops();
        commit(&mut db, ops);

        let mut w = Writer::new(&schema, &db, &clock);
        w.mark_as_deleted::<Project>(p.id()).unwrap();
        assert!(matches!(
            w.create(NewCalculation::new("yarn", "Yarn").attach(p.id())),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_update_bumps_timestamp_even_with_stalled_clock() {
        let schema = knit::app_schema().unwrap();
        let mut db = database(&schema);
        let clock = ManualClock::new(Timestamp(100));

        let mut w = Writer::new(&schema, &db, &clock);
        let p = w
            .create(NewProject::new("Шапка", ProjectStatus::Planned))
            .unwrap();
        let ops = w.into_ops();
        commit(&mut db, ops);

        let mut w = Writer::new(&schema, &db, &clock);
        let updated = w
            .update(
                p.id(),
                ProjectPatch {
                    progress: Some(Some(20.0)),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.meta.created_at, Timestamp(100));
        assert_eq!(updated.meta.updated_at, Timestamp(101));
        assert_eq!(updated.progress, Some(20.0));
        assert_eq!(updated.name, "Шапка");
    }

    #[test]
    fn test_destroy_cascades_to_children() {
        let schema = knit::app_schema().unwrap();
        let mut db = database(&schema);
        let clock = ManualClock::new(Timestamp(100));

        let mut w = Writer::new(&schema, &db, &clock);
        let p = w
            .create(NewProject::new("Плед", ProjectStatus::Planned))
            .unwrap();
        let other = w
            .create(NewProject::new("Носки", ProjectStatus::Planned))
            .unwrap();
        for i in 0..3 {
            w.create(NewCalculation::new("yarn", &format!("calc {}", i)).attach(p.id()))
                .unwrap();
        }
        let kept = w
            .create(NewNote::new("keep", "me").attach(other.id()))
            .unwrap();
        let gone = w
            .create(NewNote::new("soft", "deleted").attach(p.id()))
            .unwrap();
        let ops = w.into_ops();
        commit(&mut db, ops);

        let mut w = Writer::new(&schema, &db, &clock);
        w.mark_as_deleted::<Note>(gone.id()).unwrap();
        let ops = w.into_ops();
        commit(&mut db, ops);

        let mut w = Writer::new(&schema, &db, &clock);
        assert_eq!(w.destroy_permanently::<Project>(p.id()).unwrap(), 5);
        let ops = w.into_ops();
        commit(&mut db, ops);

        assert!(db.get(knit::PROJECTS, p.id()).is_none());
        assert!(db.get(knit::NOTES, gone.id()).is_none());
        assert!(db.get(knit::NOTES, kept.id()).is_some());
        assert!(db.table(knit::CALCULATIONS).unwrap().is_empty());
    }

    #[test]
    fn test_tree_soft_delete_marks_children() {
        let schema = knit::app_schema().unwrap();
        let mut db = database(&schema);
        let clock = ManualClock::new(Timestamp(100));

        let mut w = Writer::new(&schema, &db, &clock);
        let p = w
            .create(NewProject::new("Плед", ProjectStatus::Planned))
            .unwrap();
        let c = w
            .create(NewCalculation::new("yarn", "Yarn").attach(p.id()))
            .unwrap();
        let ops = w.into_ops();
        commit(&mut db, ops);

        let mut w = Writer::new(&schema, &db, &clock);
        assert_eq!(w.mark_tree_as_deleted::<Project>(p.id()).unwrap(), 2);
        assert!(w.find::<Calculation>(c.id()).is_err());
        assert!(w.find_including_deleted::<Calculation>(c.id()).is_ok());
    }

    #[test]
    fn test_create_then_destroy_writes_nothing() {
        let schema = knit::app_schema().unwrap();
        let db = database(&schema);
        let clock = ManualClock::new(Timestamp(100));

        let mut w = Writer::new(&schema, &db, &clock);
        let p = w
            .create(NewProject::new("Draft", ProjectStatus::Planned))
            .unwrap();
        w.destroy_permanently::<Project>(p.id()).unwrap();
        assert!(w.into_ops().is_empty());
    }

    #[test]
    fn test_nested_acquire_conflicts() {
        let coordinator = WriteCoordinator::new();
        let _ticket = coordinator.acquire().unwrap();
        assert!(matches!(
            coordinator.acquire(),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn test_tickets_are_fifo() {
        let coordinator = Arc::new(WriteCoordinator::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = coordinator.acquire().unwrap();
        let mut handles = Vec::new();
        for i in 0..4 {
            let worker_coordinator = Arc::clone(&coordinator);
            let order = Arc::clone(&order);
            handles.push(thread::spawn(move || {
                let _ticket = worker_coordinator.acquire().unwrap();
                order.lock().push(i);
            }));
            // Let thread i take its ticket before i + 1 starts.
            while coordinator.state.lock().next_ticket < i as u64 + 2 {
                thread::sleep(Duration::from_millis(1));
            }
        }
        drop(first);
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }
}
