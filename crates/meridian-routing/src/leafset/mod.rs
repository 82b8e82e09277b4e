//! The leaf set: a node's immediate neighbors on the ring.
//!
//! # Indexing
//!
//! Members are addressed by signed rank. `0` is the local node itself,
//! `+n` is the n-th nearest clockwise member and `-n` the n-th nearest
//! counter-clockwise member:
//!
//! ```text
//!   -3   -2   -1    0    +1   +2   +3
//!   ccw  ccw  ccw [base] cw   cw   cw
//! ```
//!
//! # Small Rings
//!
//! When the ring holds fewer nodes than the leaf set's capacity, both
//! halves end up holding every node and [`LeafSet::overlaps`] turns true.
//! Merges then fall back to an unrestricted pass so no node is missed on
//! account of being on the "wrong" side.
//!
//! # Merge
//!
//! [`LeafSet::merge`] folds a remote node's leaf set into ours. It first
//! locates our own identifier in the remote set to decide which remote
//! indices can possibly improve each local half, then walks those ranges
//! through the usual `put` path, so a malformed remote set can waste work
//! but never break ordering or capacity.

mod similar;

use meridian_id::{Id, IdRange};
use serde::{Deserialize, Serialize};

pub use similar::{Side, SimilarSet};

use crate::bucket::BucketInsert;
use crate::config::MAX_LEAF_SET_SIZE;
use crate::handle::{HandleTable, NodeHandle};
use crate::table::RoutingTable;

/// Whether a merge mutates or only reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    Apply,
    TestOnly,
}

/// What a merge did (or would do).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// The local leaf set changed (or would change).
    pub changed: bool,
    /// Handles that were (or would be) accepted by the leaf set.
    pub inserted: Vec<NodeHandle>,
    /// Handles the routing table deferred until their proximity is known.
    pub deferred: Vec<NodeHandle>,
    /// Routing-table entries replaced by merged handles.
    pub displaced: Vec<NodeHandle>,
}

impl MergeOutcome {
    fn offer(&mut self, handle: NodeHandle, insert: BucketInsert) {
        match insert {
            BucketInsert::Deferred => self.deferred.push(handle),
            BucketInsert::Replaced(old) => self.displaced.push(old),
            BucketInsert::Added | BucketInsert::Rejected => {}
        }
    }

    fn record(&mut self, handle: NodeHandle, accepted: bool) {
        if accepted {
            self.changed = true;
            if !self.inserted.contains(&handle) {
                self.inserted.push(handle);
            }
        }
    }
}

/// Two [`SimilarSet`] halves of `capacity / 2` each around a base handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafSet {
    base: NodeHandle,
    capacity: usize,
    cw: SimilarSet,
    ccw: SimilarSet,
}

impl LeafSet {
    /// # Panics
    ///
    /// If `capacity` is odd or below 2.
    pub fn new(base: NodeHandle, capacity: usize) -> Self {
        assert!(
            capacity >= 2 && capacity % 2 == 0,
            "leaf set capacity must be even and at least 2, got {}",
            capacity
        );
        Self {
            base,
            capacity,
            cw: SimilarSet::new(base, Side::Clockwise, capacity / 2),
            ccw: SimilarSet::new(base, Side::CounterClockwise, capacity / 2),
        }
    }

    pub fn base(&self) -> &NodeHandle {
        &self.base
    }

    pub fn base_id(&self) -> Id {
        self.base.id()
    }

    /// Offer a handle to both halves.
    pub fn put(&mut self, handle: NodeHandle) -> bool {
        let id = handle.id();
        if id == self.base.id() || self.member(&id) {
            return false;
        }
        let cw = self.cw.put(handle);
        let ccw = self.ccw.put(handle);
        cw || ccw
    }

    /// Would [`put`](Self::put) change the set?
    pub fn test(&self, handle: &NodeHandle) -> bool {
        let id = handle.id();
        if id == self.base.id() || self.member(&id) {
            return false;
        }
        self.cw.test(handle) || self.ccw.test(handle)
    }

    /// The farthest member of one half also sits in the other half.
    pub fn overlaps(&self) -> bool {
        if self.size() == 0 {
            return false;
        }
        let cw_far = self.cw.iter().last().map(|h| h.id());
        let ccw_far = self.ccw.iter().last().map(|h| h.id());
        cw_far.is_some_and(|id| self.ccw.member(&id)) || ccw_far.is_some_and(|id| self.cw.member(&id))
    }

    /// Member at signed rank `index` (`0` is the base).
    pub fn get(&self, index: isize) -> Option<&NodeHandle> {
        match index {
            0 => Some(&self.base),
            i if i > 0 => self.cw.get(i.unsigned_abs() - 1),
            i => self.ccw.get(i.unsigned_abs() - 1),
        }
    }

    pub fn get_by_id(&self, id: &Id) -> Option<&NodeHandle> {
        self.cw.get_by_id(id).or_else(|| self.ccw.get_by_id(id))
    }

    /// Signed rank of `id`, preferring the clockwise half.
    pub fn get_index(&self, id: &Id) -> Option<isize> {
        if *id == self.base.id() {
            return Some(0);
        }
        if let Some(i) = self.cw.get_index(id) {
            return Some(i as isize + 1);
        }
        self.ccw.get_index(id).map(|i| -(i as isize) - 1)
    }

    pub fn member(&self, id: &Id) -> bool {
        self.cw.member(id) || self.ccw.member(id)
    }

    /// Remove `id` from both halves.
    pub fn remove(&mut self, id: &Id) -> Option<NodeHandle> {
        let cw = self.cw.remove(id);
        let ccw = self.ccw.remove(id);
        cw.or(ccw)
    }

    pub fn max_size(&self) -> usize {
        self.capacity
    }

    /// Sum of both halves (a member present in both counts twice).
    pub fn size(&self) -> usize {
        self.cw.len() + self.ccw.len()
    }

    pub fn cw_size(&self) -> usize {
        self.cw.len()
    }

    pub fn ccw_size(&self) -> usize {
        self.ccw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn half(&self, side: Side) -> &SimilarSet {
        match side {
            Side::Clockwise => &self.cw,
            Side::CounterClockwise => &self.ccw,
        }
    }

    /// Distinct members, counter-clockwise farthest first, then clockwise.
    pub fn members(&self) -> Vec<NodeHandle> {
        let mut out: Vec<NodeHandle> = Vec::with_capacity(self.size());
        for h in self.ccw.iter().rev().chain(self.cw.iter()) {
            if !out.contains(h) {
                out.push(*h);
            }
        }
        out
    }

    /// Map an index in one half to the index of the same handle in the
    /// other half. Indices with no counterpart are returned unchanged.
    pub fn complement(&self, index: isize) -> isize {
        let ccw_size = self.ccw_size() as isize;
        let cw_size = self.cw_size() as isize;
        if index == 0 {
            return 0;
        }
        let mapped = if index < 0 {
            if index < -ccw_size {
                return index;
            }
            self.ccw
                .get(index.unsigned_abs() - 1)
                .and_then(|h| self.cw.get_index(&h.id()))
                .map(|i| i as isize + 1)
        } else {
            if index > cw_size {
                return index;
            }
            self.cw
                .get(index.unsigned_abs() - 1)
                .and_then(|h| self.ccw.get_index(&h.id()))
                .map(|i| -(i as isize) - 1)
        };
        mapped.unwrap_or(index)
    }

    /// Signed rank of the member closest to `key` (`0` when the base is).
    ///
    /// Equal distances on both sides resolve to the member clockwise of
    /// the key.
    pub fn most_similar(&self, key: &Id) -> isize {
        let cw_last = self.cw_size() as isize - 1;
        let ccw_last = self.ccw_size() as isize - 1;

        let (cw_ms, ccw_ms) = if self.base.id().clockwise(key) {
            let cw_ms = self.cw.most_similar(key);
            if cw_ms < cw_last {
                return cw_ms + 1;
            }
            (cw_ms, self.ccw.most_similar(key))
        } else {
            let ccw_ms = self.ccw.most_similar(key);
            if ccw_ms < ccw_last {
                return -ccw_ms - 1;
            }
            (self.cw.most_similar(key), ccw_ms)
        };

        let cw_node = self.cw.get_or_base(cw_ms).copied().unwrap_or(self.base);
        let ccw_node = self.ccw.get_or_base(ccw_ms).copied().unwrap_or(self.base);
        let cw_dist = cw_node.id().distance(key);
        let ccw_dist = ccw_node.id().distance(key);

        if cw_dist < ccw_dist || (cw_dist == ccw_dist && key.clockwise(&cw_node.id())) {
            cw_ms + 1
        } else {
            -ccw_ms - 1
        }
    }

    /// The `max` members (base included) nearest to `key`, nearest first.
    ///
    /// Empty when `key` lies outside the span of a non-overlapping set,
    /// since its root cannot be determined locally.
    pub fn replica_set(&self, key: &Id, max: usize) -> Vec<NodeHandle> {
        let mut set: Vec<NodeHandle> = Vec::new();
        if max < 1 {
            return set;
        }

        let cw_size = self.cw_size() as isize;
        let ccw_size = self.ccw_size() as isize;

        if !self.overlaps() && self.size() > 0 {
            let (Some(ccw_edge), Some(cw_edge)) = (self.get(-ccw_size), self.get(cw_size)) else {
                return set;
            };
            if !key.is_between(&ccw_edge.id(), &cw_edge.id()) && *key != cw_edge.id() {
                return set;
            }
        }

        let nearest = self.most_similar(key);
        let Some(root) = self.get(nearest) else {
            return set;
        };
        set.push(*root);

        let mut cw = nearest;
        let mut ccw = nearest;
        let mut wrapped = 0;

        while set.len() < max && wrapped < 3 {
            let (Some(cw_node), Some(ccw_node)) = (self.get(cw).copied(), self.get(ccw).copied()) else {
                break;
            };

            if cw_node.id().distance(key) <= ccw_node.id().distance(key) {
                push_unique(&mut set, cw_node);
                if cw == cw_size {
                    let prev = cw;
                    cw = self.complement(cw);
                    if cw == prev {
                        return set;
                    }
                    wrapped += 1;
                }
                cw += 1;
            } else {
                push_unique(&mut set, ccw_node);
                if -ccw == ccw_size {
                    let prev = ccw;
                    ccw = self.complement(ccw);
                    if ccw == prev {
                        return set;
                    }
                    wrapped += 1;
                }
                ccw -= 1;
            }
        }
        set
    }

    /// Up to `max` neighbors of the base (base included), widened to a
    /// whole half once the other half has been exhausted.
    pub fn neighbor_set(&self, max: usize) -> Vec<NodeHandle> {
        let cw_size = self.cw_size() as isize;
        let ccw_size = self.ccw_size() as isize;
        let mut set = self.replica_set(&self.base.id(), max);

        let (Some(cw_edge), Some(ccw_edge)) = (self.get(cw_size).copied(), self.get(-ccw_size).copied()) else {
            return set;
        };

        let has_cw_edge = set.contains(&cw_edge);
        let has_ccw_edge = set.contains(&ccw_edge);
        if !has_cw_edge && !has_ccw_edge {
            return set;
        }
        if !has_cw_edge {
            for h in self.cw.iter() {
                push_unique(&mut set, *h);
            }
        }
        if !has_ccw_edge {
            for h in self.ccw.iter() {
                push_unique(&mut set, *h);
            }
        }
        set
    }

    /// Keys for which `node` is among the `rank + 1` closest members.
    ///
    /// `None` when `node` is not in the set or the set is too small to
    /// tell.
    pub fn range(&self, node: &Id, rank: usize) -> Option<IdRange> {
        let pos = self.get_index(node)?;
        if self.size() == 0 && rank == 0 {
            return Some(IdRange::full(*node));
        }

        let cw_size = self.cw_size() as isize;
        let ccw_size = self.ccw_size() as isize;
        let mut min = pos;
        let mut max = pos;
        for _ in 0..=rank {
            if min == -ccw_size {
                min = self.complement(min);
                if min == -ccw_size {
                    return None;
                }
            }
            if max == cw_size {
                max = self.complement(max);
                if max == cw_size {
                    return None;
                }
            }
            min -= 1;
            max += 1;
        }

        let min_id = self.get(min)?.id();
        let max_id = self.get(max)?.id();

        if !node.is_between(&min_id, &max_id) && min_id != max_id {
            return Some(IdRange::full(*node));
        }

        let cw = arc(*node, max_id).ccw_half();
        let ccw = arc(min_id, *node).cw_half();
        ccw.merge(&cw)
    }

    /// Fold `remote` (received from `from`) into this leaf set.
    ///
    /// Every live candidate is also offered to `routes`. In
    /// [`MergeMode::TestOnly`] nothing is mutated and the outcome reports
    /// what `Apply` would have done.
    pub fn merge(
        &mut self,
        remote: &LeafSet,
        from: &NodeHandle,
        routes: &mut RoutingTable,
        handles: &HandleTable,
        mode: MergeMode,
    ) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        let cw_size = remote.cw_size() as isize;
        let ccw_size = remote.ccw_size() as isize;
        let base = self.base.id();

        let (cw_start, ccw_start) = match (remote.cw.get_index(&base), remote.ccw.get_index(&base)) {
            // We are unknown to the remote: anchor on its member closest to us
            (None, None) => {
                if remote.size() < 2 {
                    (0, 0)
                } else {
                    let closest = remote.most_similar(&base);
                    let toward_cw = remote
                        .get(closest)
                        .map(|h| base.clockwise(&h.id()))
                        .unwrap_or(false);
                    match (closest.signum(), toward_cw) {
                        (0, true) | (-1, true) => (closest, remote.complement(closest - 1)),
                        (0, false) => (remote.complement(closest + 1), closest),
                        (-1, false) => (closest + 1, remote.complement(closest)),
                        (_, true) => (remote.complement(closest), closest - 1),
                        (_, false) => (remote.complement(closest + 1), closest),
                    }
                }
            }
            (None, Some(ccw_idx)) => {
                let ccw = -(ccw_idx as isize) - 2;
                (ccw + 2, ccw)
            }
            (Some(cw_idx), None) => {
                let cw = cw_idx as isize + 2;
                (cw, cw - 2)
            }
            (Some(cw_idx), Some(ccw_idx)) => (-(ccw_idx as isize), cw_idx as isize),
        };

        let candidate = |i: isize| -> Option<NodeHandle> {
            if i == 0 {
                Some(*from)
            } else {
                remote.get(i).copied()
            }
        };

        for i in cw_start..=cw_size {
            let Some(nh) = candidate(i) else { continue };
            if !handles.is_alive(&nh.id()) {
                continue;
            }
            let accepted = match mode {
                MergeMode::TestOnly => self.cw.test(&nh),
                MergeMode::Apply => {
                    let accepted = self.cw.put(nh);
                    outcome.offer(nh, routes.put(nh, handles));
                    accepted
                }
            };
            outcome.record(nh, accepted);
        }

        for i in (-ccw_size..=ccw_start).rev() {
            let Some(nh) = candidate(i) else { continue };
            if !handles.is_alive(&nh.id()) {
                continue;
            }
            let accepted = match mode {
                MergeMode::TestOnly => self.ccw.test(&nh),
                MergeMode::Apply => {
                    let accepted = self.ccw.put(nh);
                    outcome.offer(nh, routes.put(nh, handles));
                    accepted
                }
            };
            outcome.record(nh, accepted);
        }

        if self.overlaps() {
            for i in -ccw_size..=cw_size {
                let Some(nh) = candidate(i) else { continue };
                if !handles.is_alive(&nh.id()) {
                    continue;
                }
                let accepted = match mode {
                    MergeMode::TestOnly => self.test(&nh),
                    MergeMode::Apply => self.put(nh),
                };
                outcome.record(nh, accepted);
            }
        }

        outcome
    }

    /// Structural sanity check for leaf sets received off the wire.
    pub fn is_well_formed(&self) -> bool {
        let half = self.capacity / 2;
        self.capacity >= 2
            && self.capacity % 2 == 0
            && self.capacity <= MAX_LEAF_SET_SIZE
            && self.cw.side() == Side::Clockwise
            && self.ccw.side() == Side::CounterClockwise
            && self.cw.capacity() == half
            && self.ccw.capacity() == half
            && *self.cw.base() == self.base
            && *self.ccw.base() == self.base
            && self.cw.is_well_formed()
            && self.ccw.is_well_formed()
    }
}

fn push_unique(set: &mut Vec<NodeHandle>, handle: NodeHandle) {
    if !set.contains(&handle) {
        set.push(handle);
    }
}

/// Clockwise arc from `ccw` to `cw`, where equal ends mean the whole ring.
fn arc(ccw: Id, cw: Id) -> IdRange {
    if ccw == cw {
        IdRange::full(ccw)
    } else {
        IdRange::new(ccw, cw)
    }
}
