//! Node handles and the per-node handle table.
//!
//! # Handles vs. Handle State
//!
//! A [`NodeHandle`] is an immutable descriptor (identifier plus optional
//! transport address) that can be copied freely into buckets, leaf sets and
//! wire messages. Everything that changes about a remote node (liveness,
//! proximity, who cares about it) lives in the owning node's
//! [`HandleTable`], keyed by identifier.
//!
//! Structures never hold callbacks into each other. Instead they register a
//! [`Subscriber`] tag in the table; when the reactor applies a liveness flip
//! it gets back the list of tags and notifies each structure in the same
//! tick.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;

use meridian_id::Id;
use serde::{Deserialize, Serialize};

/// Proximity value meaning "not yet measured".
pub const UNKNOWN_PROXIMITY: u32 = u32::MAX;

/// Reference to a participant in the overlay.
///
/// Equality and hashing consider only the identifier.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct NodeHandle {
    id: Id,
    addr: Option<SocketAddr>,
}

impl NodeHandle {
    /// A handle with no known transport address.
    pub const fn new(id: Id) -> Self {
        Self { id, addr: None }
    }

    /// A handle reachable at `addr`.
    pub const fn with_addr(id: Id, addr: SocketAddr) -> Self {
        Self {
            id,
            addr: Some(addr),
        }
    }

    pub const fn id(&self) -> Id {
        self.id
    }

    pub const fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }
}

impl PartialEq for NodeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NodeHandle {}

impl Hash for NodeHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr {
            Some(addr) => write!(f, "NodeHandle({} @ {})", self.id, addr),
            None => write!(f, "NodeHandle({})", self.id),
        }
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.id, f)
    }
}

impl From<Id> for NodeHandle {
    fn from(id: Id) -> Self {
        Self::new(id)
    }
}

/// Cached liveness of a remote node.
///
/// Ordered from most to least usable, so `liveness <= threshold` reads as
/// "at least this alive". Every routing decision uses [`ROUTABLE`]: a
/// suspected handle stays a candidate until a probe confirms it dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Liveness {
    #[default]
    Alive,
    Suspected,
    Dead,
}

/// Least-alive state still eligible as a next hop or leaf-set member.
pub const ROUTABLE: Liveness = Liveness::Suspected;

impl Liveness {
    /// At least [`ROUTABLE`].
    pub fn is_alive(&self) -> bool {
        *self <= ROUTABLE
    }
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alive => write!(f, "alive"),
            Self::Suspected => write!(f, "suspected"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

/// A structure interested in a handle's state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subscriber {
    /// The leaf set holds the handle and repairs itself when it dies.
    LeafSet,
    /// The routing-table cell deferred the handle until its proximity is known.
    RouteBucket { row: usize, col: usize },
}

/// A liveness flip, returned so the caller can notify subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessChange {
    pub handle: NodeHandle,
    pub previous: Liveness,
    pub current: Liveness,
    pub subscribers: Vec<Subscriber>,
}

#[derive(Debug, Clone)]
struct HandleState {
    handle: NodeHandle,
    liveness: Liveness,
    proximity: u32,
    subscribers: Vec<Subscriber>,
}

impl HandleState {
    fn new(handle: NodeHandle) -> Self {
        Self {
            handle,
            liveness: Liveness::Alive,
            proximity: UNKNOWN_PROXIMITY,
            subscribers: Vec::new(),
        }
    }

    /// Entry carries nothing a fresh lookup would not reproduce.
    fn is_default(&self) -> bool {
        self.liveness == Liveness::Alive
            && self.proximity == UNKNOWN_PROXIMITY
            && self.subscribers.is_empty()
    }
}

/// Per-node registry of remote handle state.
///
/// Handles that were never recorded read as alive with unknown proximity.
/// Dead entries are kept as tombstones so merges do not resurrect them
/// before a fresh liveness report arrives.
#[derive(Debug, Clone, Default)]
pub struct HandleTable {
    entries: HashMap<Id, HandleState>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a handle, coalescing with any existing entry for its id.
    ///
    /// Returns the canonical handle. A newly learned address replaces a
    /// missing one but never overwrites a known address.
    pub fn learn(&mut self, handle: NodeHandle) -> NodeHandle {
        let state = self
            .entries
            .entry(handle.id())
            .or_insert_with(|| HandleState::new(handle));
        if state.handle.addr.is_none() && handle.addr.is_some() {
            state.handle.addr = handle.addr;
        }
        state.handle
    }

    /// The canonical handle for `id`, if recorded.
    pub fn get(&self, id: &Id) -> Option<&NodeHandle> {
        self.entries.get(id).map(|s| &s.handle)
    }

    pub fn liveness(&self, id: &Id) -> Liveness {
        self.entries
            .get(id)
            .map(|s| s.liveness)
            .unwrap_or_default()
    }

    /// Not confirmed dead.
    pub fn is_alive(&self, id: &Id) -> bool {
        self.liveness(id).is_alive()
    }

    pub fn proximity(&self, id: &Id) -> u32 {
        self.entries
            .get(id)
            .map(|s| s.proximity)
            .unwrap_or(UNKNOWN_PROXIMITY)
    }

    /// Apply a liveness report.
    ///
    /// Returns the change only when the value actually flipped.
    pub fn set_liveness(&mut self, id: &Id, liveness: Liveness) -> Option<LivenessChange> {
        let state = self
            .entries
            .entry(*id)
            .or_insert_with(|| HandleState::new(NodeHandle::new(*id)));
        let previous = state.liveness;
        if previous == liveness {
            return None;
        }
        state.liveness = liveness;
        let change = LivenessChange {
            handle: state.handle,
            previous,
            current: liveness,
            subscribers: state.subscribers.clone(),
        };
        if state.is_default() {
            self.entries.remove(id);
        }
        Some(change)
    }

    /// Record a proximity measurement. Returns the subscribers to notify.
    pub fn set_proximity(&mut self, id: &Id, proximity: u32) -> Vec<Subscriber> {
        let state = self
            .entries
            .entry(*id)
            .or_insert_with(|| HandleState::new(NodeHandle::new(*id)));
        if state.proximity == proximity {
            return Vec::new();
        }
        state.proximity = proximity;
        state.subscribers.clone()
    }

    /// Register interest in `handle`.
    pub fn subscribe(&mut self, handle: NodeHandle, subscriber: Subscriber) {
        let state = self
            .entries
            .entry(handle.id())
            .or_insert_with(|| HandleState::new(handle));
        if !state.subscribers.contains(&subscriber) {
            state.subscribers.push(subscriber);
        }
    }

    /// Drop interest in `id`, forgetting the entry if nothing else is recorded.
    pub fn unsubscribe(&mut self, id: &Id, subscriber: Subscriber) {
        if let Some(state) = self.entries.get_mut(id) {
            state.subscribers.retain(|s| *s != subscriber);
            if state.is_default() {
                self.entries.remove(id);
            }
        }
    }

    /// Forget `id` once no structure holds it.
    ///
    /// Tombstones and entries with subscribers are kept. Returns whether an
    /// entry was removed.
    pub fn release(&mut self, id: &Id) -> bool {
        let removable = self
            .entries
            .get(id)
            .is_some_and(|s| s.liveness != Liveness::Dead && s.subscribers.is_empty());
        removable && self.entries.remove(id).is_some()
    }

    pub fn subscribers(&self, id: &Id) -> &[Subscriber] {
        self.entries
            .get(id)
            .map(|s| s.subscribers.as_slice())
            .unwrap_or(&[])
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
