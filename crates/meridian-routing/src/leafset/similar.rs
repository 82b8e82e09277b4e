//! One half of a leaf set.

use meridian_id::{Distance, Id};
use serde::{Deserialize, Serialize};

use crate::handle::NodeHandle;

/// Which way round the ring a half looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Clockwise,
    CounterClockwise,
}

/// Bounded list of handles ordered by distance from a base identifier,
/// measured in one direction only.
///
/// A handle on the "wrong" side ranks by the long way round, so on a ring
/// larger than the capacity each half fills with its own side only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimilarSet {
    base: NodeHandle,
    side: Side,
    capacity: usize,
    nodes: Vec<NodeHandle>,
}

impl SimilarSet {
    pub fn new(base: NodeHandle, side: Side, capacity: usize) -> Self {
        Self {
            base,
            side,
            capacity,
            nodes: Vec::with_capacity(capacity),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Distance from the base walked in this half's direction.
    pub fn rank(&self, id: &Id) -> Distance {
        let base = self.base.id();
        match self.side {
            Side::Clockwise => base.cw_distance(id),
            Side::CounterClockwise => base.ccw_distance(id),
        }
    }

    /// Would [`put`](Self::put) accept this handle?
    pub fn test(&self, handle: &NodeHandle) -> bool {
        let id = handle.id();
        if id == self.base.id() || self.member(&id) {
            return false;
        }
        if self.nodes.len() < self.capacity {
            return true;
        }
        match self.nodes.last() {
            Some(farthest) => self.rank(&id) < self.rank(&farthest.id()),
            None => false,
        }
    }

    /// Insert in sorted position, evicting the farthest member if full and
    /// the newcomer is strictly closer.
    pub fn put(&mut self, handle: NodeHandle) -> bool {
        if !self.test(&handle) {
            return false;
        }
        if self.nodes.len() == self.capacity {
            self.nodes.pop();
        }
        let rank = self.rank(&handle.id());
        let pos = self.nodes.partition_point(|h| self.rank(&h.id()) < rank);
        self.nodes.insert(pos, handle);
        true
    }

    /// Member at 0-based rank `i`.
    pub fn get(&self, i: usize) -> Option<&NodeHandle> {
        self.nodes.get(i)
    }

    /// Member at rank `i`, where `-1` stands for the base.
    pub(crate) fn get_or_base(&self, i: isize) -> Option<&NodeHandle> {
        if i == -1 {
            Some(&self.base)
        } else {
            usize::try_from(i).ok().and_then(|i| self.nodes.get(i))
        }
    }

    pub fn get_by_id(&self, id: &Id) -> Option<&NodeHandle> {
        self.nodes.iter().find(|h| h.id() == *id)
    }

    pub fn get_index(&self, id: &Id) -> Option<usize> {
        self.nodes.iter().position(|h| h.id() == *id)
    }

    pub fn member(&self, id: &Id) -> bool {
        self.get_index(id).is_some()
    }

    pub fn remove(&mut self, id: &Id) -> Option<NodeHandle> {
        let pos = self.get_index(id)?;
        Some(self.nodes.remove(pos))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NodeHandle> {
        self.nodes.iter()
    }

    /// Rank of the member closest to `key`, or `-1` when the base is at
    /// least as close as the nearest member.
    ///
    /// Walks outward and stops at the first member farther than its
    /// predecessor, which is exact because members are sorted along one
    /// direction.
    pub fn most_similar(&self, key: &Id) -> isize {
        let Some(first) = self.nodes.first() else {
            return -1;
        };
        let mut d = first.id().distance(key);
        if self.base.id().distance(key) <= d {
            return -1;
        }
        for (i, h) in self.nodes.iter().enumerate().skip(1) {
            let next = h.id().distance(key);
            if d <= next {
                return i as isize - 1;
            }
            d = next;
        }
        self.nodes.len() as isize - 1
    }

    /// Sorted, bounded, free of duplicates and of the base.
    pub(crate) fn is_well_formed(&self) -> bool {
        let base = self.base.id();
        self.nodes.len() <= self.capacity
            && self.nodes.iter().all(|h| h.id() != base)
            && self
                .nodes
                .windows(2)
                .all(|w| self.rank(&w[0].id()) < self.rank(&w[1].id()))
    }

    pub(crate) fn base(&self) -> &NodeHandle {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(v: u128) -> NodeHandle {
        NodeHandle::new(Id::new(v))
    }

    #[test]
    fn clockwise_orders_by_cw_distance() {
        let mut set = SimilarSet::new(h(100), Side::Clockwise, 3);
        assert!(set.put(h(130)));
        assert!(set.put(h(110)));
        assert!(set.put(h(120)));
        let ids: Vec<_> = set.iter().map(|h| h.id().as_u128()).collect();
        assert_eq!(ids, vec![110, 120, 130]);

        // Full: farther rejected, closer evicts the farthest
        assert!(!set.test(&h(140)));
        assert!(!set.put(h(140)));
        assert!(set.put(h(105)));
        let ids: Vec<_> = set.iter().map(|h| h.id().as_u128()).collect();
        assert_eq!(ids, vec![105, 110, 120]);
    }

    #[test]
    fn counter_clockwise_ranks_wrong_side_last() {
        let mut set = SimilarSet::new(h(100), Side::CounterClockwise, 2);
        set.put(h(110)); // long way round
        set.put(h(90));
        assert_eq!(set.get(0), Some(&h(90)));
        assert_eq!(set.get(1), Some(&h(110)));

        set.put(h(80));
        assert_eq!(set.get(1), Some(&h(80)));
        assert!(!set.member(&Id::new(110)));
    }

    #[test]
    fn rejects_base_and_duplicates() {
        let mut set = SimilarSet::new(h(5), Side::Clockwise, 4);
        assert!(!set.put(h(5)));
        assert!(set.put(h(6)));
        assert!(!set.put(h(6)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn most_similar_walks_outward() {
        let mut set = SimilarSet::new(h(100), Side::Clockwise, 4);
        for v in [110, 120, 130] {
            set.put(h(v));
        }
        assert_eq!(set.most_similar(&Id::new(101)), -1);
        assert_eq!(set.most_similar(&Id::new(111)), 0);
        assert_eq!(set.most_similar(&Id::new(122)), 1);
        assert_eq!(set.most_similar(&Id::new(500)), 2);

        let empty = SimilarSet::new(h(100), Side::Clockwise, 4);
        assert_eq!(empty.most_similar(&Id::new(1)), -1);
    }

    #[test]
    fn remove_and_index() {
        let mut set = SimilarSet::new(h(0), Side::Clockwise, 4);
        set.put(h(3));
        set.put(h(1));
        assert_eq!(set.get_index(&Id::new(3)), Some(1));
        assert_eq!(set.remove(&Id::new(1)), Some(h(1)));
        assert_eq!(set.get_index(&Id::new(3)), Some(0));
        assert_eq!(set.remove(&Id::new(1)), None);
        assert!(set.is_well_formed());
    }
}
