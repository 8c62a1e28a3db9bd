//! Live queries.
//!
//! [`crate::Store::observe`] registers a query and returns a [`LiveQuery`].
//! After every commit a single notifier thread hands the commit's change set
//! to the [`SubscriptionManager`], which:
//! - skips queries the change set cannot affect,
//! - re-runs each affected query once per signature,
//! - fans the result out to every subscriber on that signature, unless it
//!   equals what the subscriber last saw.
//!
//! Buffers are bounded. A subscriber that falls behind is dropped with
//! [`DropReason::BufferOverflow`]; the writer never waits on it.
//!
//! # Example
//!
//! ```ignore
//! let live = store.observe_calculations(&project_id)?;
//! let initial = live.recv()?;
//! // ... after a commit touching this project's calculations:
//! let next = live.recv()?;
//! ```

mod manager;
mod types;

pub use manager::{SubscriptionManager, DEFAULT_BUFFER};
pub(crate) use types::Event;
pub use types::{DropReason, LiveQuery, SubscriptionId};
