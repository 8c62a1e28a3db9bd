//! Subscription manager: re-runs live queries after each commit.

use crate::query::{same_rows, QuerySignature, RowQuery};
use crate::schema::AppSchema;
use crate::storage::{ChangeSet, Database};
use crate::types::Row;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{DropReason, Event, SubscriptionId};

/// Default max snapshots buffered per subscriber before it is dropped.
pub const DEFAULT_BUFFER: usize = 64;

/// Internal subscription state.
struct Subscriber {
    sender: Sender<Event>,
    /// Last snapshot delivered; repeats are suppressed.
    last: Arc<Vec<Row>>,
}

/// Subscribers sharing one query signature.
struct Group {
    query: RowQuery,
    subscribers: HashMap<SubscriptionId, Subscriber>,
}

impl Group {
    /// Whether a commit could change this query's result.
    fn affected_by(&self, changes: &ChangeSet) -> bool {
        if changes.schema_changed {
            return true;
        }
        changes.rows.iter().any(|change| {
            change.table == self.query.table()
                && [&change.before, &change.after]
                    .into_iter()
                    .flatten()
                    .any(|row| self.query.matches_predicates(row))
        })
    }
}

#[derive(Default)]
struct Registry {
    groups: HashMap<QuerySignature, Group>,
    by_id: HashMap<SubscriptionId, QuerySignature>,
}

impl Registry {
    fn remove(&mut self, id: SubscriptionId) -> Option<Subscriber> {
        let signature = self.by_id.remove(&id)?;
        let group = self.groups.get_mut(&signature)?;
        let subscriber = group.subscribers.remove(&id);
        if group.subscribers.is_empty() {
            self.groups.remove(&signature);
        }
        subscriber
    }
}

/// Manages live queries and pushes snapshots to them.
pub struct SubscriptionManager {
    registry: RwLock<Registry>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    buffer: usize,
}

impl SubscriptionManager {
    pub fn new(buffer: usize) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Register a query whose current result is `initial`.
    ///
    /// The caller must hold the database read lock while computing
    /// `initial` and calling this, so no commit can slip in between.
    pub(crate) fn subscribe(
        &self,
        query: &RowQuery,
        initial: Vec<Row>,
    ) -> (SubscriptionId, Receiver<Event>) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        // One spare slot so a drop notice always fits.
        let (sender, receiver) = bounded(self.buffer + 1);

        let initial = Arc::new(initial);
        // Fresh channel; cannot be full.
        let _ = sender.try_send(Event::Snapshot(Arc::clone(&initial)));

        let signature = query.signature();
        let mut registry = self.registry.write();
        registry
            .groups
            .entry(signature.clone())
            .or_insert_with(|| Group {
                query: query.clone(),
                subscribers: HashMap::new(),
            })
            .subscribers
            .insert(
                id,
                Subscriber {
                    sender,
                    last: initial,
                },
            );
        registry.by_id.insert(id, signature);

        debug!(subscription = id.0, table = query.table(), "subscribed");
        (id, receiver)
    }

    /// Unsubscribe and clean up. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if self.registry.write().remove(id).is_some() {
            debug!(subscription = id.0, "unsubscribed");
        }
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.registry.read().by_id.len()
    }

    /// Number of distinct queries being watched.
    pub fn query_count(&self) -> usize {
        self.registry.read().groups.len()
    }

    /// Re-run every query the commit could affect and fan the results out.
    ///
    /// `db` must be the committed state that includes `changes`.
    pub(crate) fn publish(&self, schema: &AppSchema, db: &Database, changes: &ChangeSet) {
        let mut registry = self.registry.write();
        let mut to_remove = Vec::new();

        for group in registry.groups.values_mut() {
            if !group.affected_by(changes) {
                continue;
            }

            let rows = match group.query.execute(schema, db, None) {
                Ok(rows) => Arc::new(rows),
                Err(e) => {
                    warn!(table = group.query.table(), error = %e, "live query failed");
                    for (id, sub) in &group.subscribers {
                        let _ = sub
                            .sender
                            .try_send(Event::Dropped(DropReason::Error(e.to_string())));
                        to_remove.push(*id);
                    }
                    continue;
                }
            };

            for (id, sub) in group.subscribers.iter_mut() {
                if same_rows(&sub.last, &rows) {
                    continue;
                }
                if sub.sender.len() >= self.buffer {
                    let _ = sub
                        .sender
                        .try_send(Event::Dropped(DropReason::BufferOverflow));
                    to_remove.push(*id);
                    continue;
                }
                match sub.sender.try_send(Event::Snapshot(Arc::clone(&rows))) {
                    Ok(()) => sub.last = Arc::clone(&rows),
                    // Receiver gone; its handle will never unsubscribe.
                    Err(_) => to_remove.push(*id),
                }
            }
        }

        for id in to_remove {
            if registry.remove(id).is_some() {
                warn!(subscription = id.0, "dropped subscriber");
            }
        }
    }

    /// Tell every subscriber the store is going away.
    pub(crate) fn close(&self) {
        let mut registry = self.registry.write();
        for group in registry.groups.values() {
            for sub in group.subscribers.values() {
                let _ = sub.sender.try_send(Event::Dropped(DropReason::StoreClosed));
            }
        }
        *registry = Registry::default();
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}
