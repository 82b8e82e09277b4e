//! Bounded routing-table cells.

use meridian_id::Id;

use crate::handle::{HandleTable, Liveness, NodeHandle, UNKNOWN_PROXIMITY};

/// Outcome of offering a handle to a [`RouteBucket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketInsert {
    /// Stored in a free slot.
    Added,
    /// Stored in place of the returned handle.
    Replaced(NodeHandle),
    /// Bucket is full of live entries and the newcomer's proximity is
    /// unknown. Worth offering again once it has been measured.
    Deferred,
    /// Already present, or not better than any entry.
    Rejected,
}

impl BucketInsert {
    /// Whether the bucket contents changed.
    pub fn changed(&self) -> bool {
        matches!(self, Self::Added | Self::Replaced(_))
    }
}

/// Up to `capacity` handles sharing one (row, digit) prefix.
///
/// Entries are not required to be live. Stale entries are skipped by
/// selection and are the first to go when a newcomer needs room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteBucket {
    capacity: usize,
    nodes: Vec<NodeHandle>,
}

impl RouteBucket {
    /// # Panics
    ///
    /// If `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "route bucket capacity must be non-zero");
        Self {
            capacity,
            nodes: Vec::with_capacity(capacity),
        }
    }

    /// Offer a handle.
    ///
    /// When full: a dead entry is replaced first, otherwise the entry with
    /// the worst proximity if the newcomer is measurably closer. `pinned` is
    /// never evicted.
    pub fn put(&mut self, handle: NodeHandle, handles: &HandleTable, pinned: &Id) -> BucketInsert {
        if self.member(&handle.id()) {
            return BucketInsert::Rejected;
        }
        if self.nodes.len() < self.capacity {
            self.nodes.push(handle);
            return BucketInsert::Added;
        }

        let dead = self
            .nodes
            .iter()
            .position(|h| h.id() != *pinned && handles.liveness(&h.id()) == Liveness::Dead);
        if let Some(i) = dead {
            let old = std::mem::replace(&mut self.nodes[i], handle);
            return BucketInsert::Replaced(old);
        }

        let proximity = handles.proximity(&handle.id());
        if proximity == UNKNOWN_PROXIMITY {
            return BucketInsert::Deferred;
        }

        let worst = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, h)| h.id() != *pinned)
            .map(|(i, h)| (i, handles.proximity(&h.id())))
            .max_by_key(|&(_, p)| p);
        match worst {
            Some((i, worst_proximity)) if proximity < worst_proximity => {
                let old = std::mem::replace(&mut self.nodes[i], handle);
                BucketInsert::Replaced(old)
            }
            _ => BucketInsert::Rejected,
        }
    }

    pub fn remove(&mut self, id: &Id) -> Option<NodeHandle> {
        let pos = self.nodes.iter().position(|h| h.id() == *id)?;
        Some(self.nodes.remove(pos))
    }

    pub fn get(&self, id: &Id) -> Option<&NodeHandle> {
        self.nodes.iter().find(|h| h.id() == *id)
    }

    pub fn member(&self, id: &Id) -> bool {
        self.get(id).is_some()
    }

    /// Best-proximity entry at least as alive as `min_liveness`.
    ///
    /// Ties go to the lower identifier.
    pub fn closest_node(&self, handles: &HandleTable, min_liveness: Liveness) -> Option<NodeHandle> {
        self.nodes
            .iter()
            .filter(|h| handles.liveness(&h.id()) <= min_liveness)
            .min_by_key(|h| (handles.proximity(&h.id()), h.id()))
            .copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeHandle> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(v: u128) -> NodeHandle {
        NodeHandle::new(Id::new(v))
    }

    #[test]
    fn fills_then_defers_unmeasured() {
        let handles = HandleTable::new();
        let mut bucket = RouteBucket::new(2);
        let pinned = Id::new(0);
        assert_eq!(bucket.put(h(1), &handles, &pinned), BucketInsert::Added);
        assert_eq!(bucket.put(h(2), &handles, &pinned), BucketInsert::Added);
        assert_eq!(bucket.put(h(1), &handles, &pinned), BucketInsert::Rejected);
        assert_eq!(bucket.put(h(3), &handles, &pinned), BucketInsert::Deferred);
        assert_eq!(bucket.len(), 2);
    }

    #[test]
    fn dead_entry_replaced_first() {
        let mut handles = HandleTable::new();
        let mut bucket = RouteBucket::new(2);
        let pinned = Id::new(0);
        bucket.put(h(1), &handles, &pinned);
        bucket.put(h(2), &handles, &pinned);
        handles.set_liveness(&Id::new(2), Liveness::Dead);

        assert_eq!(bucket.put(h(3), &handles, &pinned), BucketInsert::Replaced(h(2)));
        assert!(bucket.member(&Id::new(3)));
        assert!(!bucket.member(&Id::new(2)));
    }

    #[test]
    fn closer_proximity_replaces_worst() {
        let mut handles = HandleTable::new();
        let mut bucket = RouteBucket::new(2);
        let pinned = Id::new(0);
        handles.set_proximity(&Id::new(1), 10);
        handles.set_proximity(&Id::new(2), 50);
        bucket.put(h(1), &handles, &pinned);
        bucket.put(h(2), &handles, &pinned);

        handles.set_proximity(&Id::new(3), 60);
        assert_eq!(bucket.put(h(3), &handles, &pinned), BucketInsert::Rejected);

        handles.set_proximity(&Id::new(3), 20);
        assert_eq!(bucket.put(h(3), &handles, &pinned), BucketInsert::Replaced(h(2)));
    }

    #[test]
    fn pinned_entry_survives() {
        let mut handles = HandleTable::new();
        let mut bucket = RouteBucket::new(1);
        let pinned = Id::new(1);
        bucket.put(h(1), &handles, &pinned);
        handles.set_liveness(&Id::new(1), Liveness::Dead);
        handles.set_proximity(&Id::new(2), 1);

        assert_eq!(bucket.put(h(2), &handles, &pinned), BucketInsert::Rejected);
        assert!(bucket.member(&pinned));
    }

    #[test]
    fn closest_node_skips_dead_and_breaks_ties_by_id() {
        let mut handles = HandleTable::new();
        let mut bucket = RouteBucket::new(4);
        let pinned = Id::MAX;
        for v in [5, 3, 9] {
            bucket.put(h(v), &handles, &pinned);
        }
        assert_eq!(bucket.closest_node(&handles, Liveness::Alive), Some(h(3)));

        handles.set_liveness(&Id::new(3), Liveness::Dead);
        assert_eq!(bucket.closest_node(&handles, Liveness::Alive), Some(h(5)));

        handles.set_proximity(&Id::new(9), 1);
        assert_eq!(bucket.closest_node(&handles, Liveness::Alive), Some(h(9)));

        handles.set_liveness(&Id::new(9), Liveness::Suspected);
        assert_eq!(bucket.closest_node(&handles, Liveness::Alive), Some(h(5)));
        assert_eq!(bucket.closest_node(&handles, Liveness::Suspected), Some(h(9)));
    }

    #[test]
    #[should_panic]
    fn zero_capacity_panics() {
        let _ = RouteBucket::new(0);
    }
}
