//! Subscription types for live queries.

use crate::error::{Result, StoreError};
use crate::model::Model;
use crate::query::{Collection, Query};
use crate::store::Shared;
use crate::types::Row;
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// The query stopped being runnable.
    Error(String),
    /// The store was closed.
    StoreClosed,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::BufferOverflow => f.write_str("buffer overflow"),
            DropReason::Error(message) => write!(f, "error: {}", message),
            DropReason::StoreClosed => f.write_str("store closed"),
        }
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// What travels over a subscriber's channel.
#[derive(Clone, Debug)]
pub(crate) enum Event {
    Snapshot(Arc<Vec<Row>>),
    Dropped(DropReason),
}

/// A query that keeps delivering fresh results.
///
/// The first snapshot is available immediately. After that, one snapshot
/// arrives per commit that changed the result. Dropping the handle
/// unsubscribes it.
pub struct LiveQuery<T: Model> {
    id: SubscriptionId,
    query: Query<T>,
    receiver: Receiver<Event>,
    store: Weak<Shared>,
}

impl<T: Model> LiveQuery<T> {
    pub(crate) fn new(
        id: SubscriptionId,
        query: Query<T>,
        receiver: Receiver<Event>,
        store: Weak<Shared>,
    ) -> Self {
        Self {
            id,
            query,
            receiver,
            store,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn query(&self) -> &Query<T> {
        &self.query
    }

    /// Block until the next snapshot.
    pub fn recv(&self) -> Result<Collection<T>> {
        match self.receiver.recv() {
            Ok(event) => decode(event),
            Err(_) => Err(StoreError::SubscriptionClosed),
        }
    }

    /// `Ok(None)` if nothing arrived in time.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Collection<T>>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => decode(event).map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(StoreError::SubscriptionClosed),
        }
    }

    /// `Ok(None)` if no snapshot is waiting.
    pub fn try_recv(&self) -> Result<Option<Collection<T>>> {
        match self.receiver.try_recv() {
            Ok(event) => decode(event).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(StoreError::SubscriptionClosed),
        }
    }

    /// Most recent waiting snapshot, discarding older ones.
    pub fn latest(&self) -> Result<Option<Collection<T>>> {
        let mut latest = None;
        while let Some(snapshot) = self.try_recv()? {
            latest = Some(snapshot);
        }
        Ok(latest)
    }

    /// Subscribe again, e.g. after being dropped for falling behind.
    /// A fresh initial snapshot follows.
    pub fn restart(&mut self) -> Result<()> {
        let store = self.store.upgrade().ok_or(StoreError::SubscriptionClosed)?;
        store.subscriptions.unsubscribe(self.id);
        let (id, receiver) = store.subscribe(self.query.rows())?;
        self.id = id;
        self.receiver = receiver;
        Ok(())
    }

    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl<T: Model> Drop for LiveQuery<T> {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.subscriptions.unsubscribe(self.id);
        }
    }
}

impl<T: Model> fmt::Debug for LiveQuery<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveQuery")
            .field("id", &self.id)
            .field("query", &self.query)
            .finish()
    }
}

fn decode<T: Model>(event: Event) -> Result<Collection<T>> {
    match event {
        Event::Snapshot(rows) => Collection::from_rows(&rows),
        Event::Dropped(reason) => Err(StoreError::SubscriptionDropped(reason)),
    }
}
