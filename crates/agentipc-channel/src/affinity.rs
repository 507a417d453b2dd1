//! Thread-affinity guard for consumer connections.
//!
//! A consumer connection is a private, stateful stream with at most one
//! outstanding request. Sharing it between threads interleaves requests and
//! replies, so the first thread that writes on a connection becomes its owner
//! and every other thread is refused.

use std::fmt;
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use serde::Serialize;

/// Process-unique identity of one consumer connection.
///
/// Allocated by the registry that created the connection; never reused while
/// that registry lives, unlike raw file descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The numeric identifier.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A write attempted from a thread that does not own the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AffinityViolation {
    pub connection: ConnectionId,
    pub owner: ThreadId,
    pub caller: ThreadId,
}

/// Concurrent map from connection to owning thread.
#[derive(Debug, Default)]
pub struct ThreadAffinity {
    owners: DashMap<ConnectionId, ThreadId>,
}

impl ThreadAffinity {
    /// Create an empty affinity map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `connection` to the calling thread on first use, or verify the binding.
    ///
    /// The claim is an atomic check-and-set: when two threads race on an
    /// unclaimed connection exactly one becomes the owner.
    pub fn check(&self, connection: ConnectionId) -> Result<(), AffinityViolation> {
        let caller = thread::current().id();
        let owner = *self.owners.entry(connection).or_insert(caller);
        if owner == caller {
            Ok(())
        } else {
            Err(AffinityViolation {
                connection,
                owner,
                caller,
            })
        }
    }

    /// The thread bound to `connection`, if any.
    pub fn owner(&self, connection: ConnectionId) -> Option<ThreadId> {
        self.owners.get(&connection).map(|entry| *entry)
    }

    /// Forget `connection`; called when the consumer is dropped.
    pub fn release(&self, connection: ConnectionId) {
        self.owners.remove(&connection);
    }

    /// Number of connections currently bound to a thread.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// True if no connection is bound.
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
