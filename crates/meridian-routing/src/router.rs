//! Next-hop selection.
//!
//! # Decision Order
//!
//! 1. **Leaf set**: if the key falls within the span of the leaf set, the
//!    member closest to it (possibly the local node) is the answer. A dead
//!    member is dropped from the leaf set and the decision restarts.
//! 2. **Routing table**: the live entry with the best proximity in the
//!    key's prefix cell.
//! 3. **Alternate route**: the live entry in the key's row that is closest
//!    to the key, if strictly closer than the local node.
//! 4. **Fallback**: the leaf-set member nearest the key, even though the
//!    key is outside the leaf-set span. Forward progress over optimality.
//!
//! The router never fails. With nothing live anywhere the local node is
//! the terminus.

use meridian_id::Id;
use tracing::trace;

use crate::handle::{HandleTable, NodeHandle, ROUTABLE};
use crate::leafset::LeafSet;
use crate::table::RoutingTable;

/// Which rule produced a next hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopKind {
    Local,
    LeafSet,
    RoutingTable,
    AlternateRoute,
    Fallback,
}

/// Outcome of next-hop selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub hop: NodeHandle,
    pub kind: HopKind,
    /// Dead members removed from the leaf set along the way.
    pub evicted: Vec<NodeHandle>,
}

/// Borrowed view of one node's routing state.
pub struct Router<'a> {
    local: NodeHandle,
    leaf_set: &'a mut LeafSet,
    routes: &'a RoutingTable,
    handles: &'a HandleTable,
}

impl<'a> Router<'a> {
    pub fn new(
        local: NodeHandle,
        leaf_set: &'a mut LeafSet,
        routes: &'a RoutingTable,
        handles: &'a HandleTable,
    ) -> Self {
        Self {
            local,
            leaf_set,
            routes,
            handles,
        }
    }

    /// Pick the next hop toward `target`.
    pub fn resolve(&mut self, target: &Id) -> Resolution {
        let mut evicted = Vec::new();
        loop {
            let pos = self.leaf_set.most_similar(target);
            if pos == 0 {
                return self.finish(target, self.local, HopKind::Local, evicted);
            }

            if self.within_leaf_range(pos, target) {
                match self.live_leaf(pos) {
                    Ok(hop) => return self.finish(target, hop, HopKind::LeafSet, evicted),
                    Err(dead) => {
                        evicted.push(dead);
                        continue;
                    }
                }
            }

            let primary = self
                .routes
                .best_entry(target)
                .and_then(|bucket| bucket.closest_node(self.handles, ROUTABLE));
            if let Some(hop) = primary {
                return self.finish(target, hop, HopKind::RoutingTable, evicted);
            }

            let alternate = self.routes.best_alternate_route(target, self.handles);
            let leaf = self.leaf_set.get(pos).copied();
            let use_leaf = match (alternate, leaf) {
                (_, None) => false,
                (None, Some(_)) => true,
                (Some(alt), Some(leaf)) => leaf.id().distance(target) < alt.id().distance(target),
            };

            if use_leaf {
                match self.live_leaf(pos) {
                    Ok(hop) => return self.finish(target, hop, HopKind::Fallback, evicted),
                    Err(dead) => {
                        evicted.push(dead);
                        continue;
                    }
                }
            }

            let hop = alternate.unwrap_or(self.local);
            let kind = if alternate.is_some() {
                HopKind::AlternateRoute
            } else {
                HopKind::Local
            };
            return self.finish(target, hop, kind, evicted);
        }
    }

    /// Whether leaf `pos` is the closest node the leaf set can vouch for,
    /// i.e. the key does not lie beyond the outermost member on that side.
    fn within_leaf_range(&self, pos: isize, target: &Id) -> bool {
        let cw_size = self.leaf_set.cw_size() as isize;
        let ccw_size = self.leaf_set.ccw_size() as isize;
        let Some(member) = self.leaf_set.get(pos) else {
            return false;
        };
        if pos > 0 {
            pos < cw_size || !member.id().clockwise(target)
        } else {
            -pos < ccw_size || member.id().clockwise(target)
        }
    }

    /// The leaf at `pos`, or the dead handle after removing it.
    fn live_leaf(&mut self, pos: isize) -> Result<NodeHandle, NodeHandle> {
        let Some(leaf) = self.leaf_set.get(pos).copied() else {
            return Err(self.local);
        };
        if self.handles.is_alive(&leaf.id()) {
            Ok(leaf)
        } else {
            self.leaf_set.remove(&leaf.id());
            Err(leaf)
        }
    }

    fn finish(&self, target: &Id, hop: NodeHandle, kind: HopKind, evicted: Vec<NodeHandle>) -> Resolution {
        trace!(target = %target, hop = %hop, ?kind, "resolved next hop");
        Resolution { hop, kind, evicted }
    }
}

/// Row the previous hop is missing, if any.
///
/// A previous hop sharing as long a prefix with the key as we do should
/// have been able to skip us; send it our row so it can next time.
pub fn route_table_hole(local: &Id, prev: &Id, key: &Id, digit_bits: u8) -> Option<usize> {
    let mine = local.msdd(key, digit_bits)?;
    let theirs = prev.msdd(key, digit_bits)?;
    (mine == theirs).then_some(mine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Liveness;

    fn h(v: u128) -> NodeHandle {
        NodeHandle::new(Id::new(v))
    }

    struct Fixture {
        local: NodeHandle,
        leaf_set: LeafSet,
        routes: RoutingTable,
        handles: HandleTable,
    }

    impl Fixture {
        fn new(local: u128) -> Self {
            Self {
                local: h(local),
                leaf_set: LeafSet::new(h(local), 4),
                routes: RoutingTable::new(h(local), 4, 4),
                handles: HandleTable::new(),
            }
        }

        fn leaf(&mut self, v: u128) {
            self.leaf_set.put(h(v));
            self.routes.put(h(v), &self.handles);
        }

        fn route(&mut self, v: u128) {
            self.routes.put(h(v), &self.handles);
        }

        fn resolve(&mut self, key: u128) -> Resolution {
            Router::new(self.local, &mut self.leaf_set, &self.routes, &self.handles).resolve(&Id::new(key))
        }
    }

    #[test]
    fn empty_node_delivers_locally() {
        let mut f = Fixture::new(0x1000);
        let r = f.resolve(0xdead_beef);
        assert_eq!(r.kind, HopKind::Local);
        assert_eq!(r.hop, h(0x1000));
    }

    #[test]
    fn key_inside_leaf_span_goes_to_leaf() {
        let mut f = Fixture::new(0x1000);
        for v in [0x1010, 0x0ff0, 0x2000, 0x0000] {
            f.leaf(v);
        }
        let r = f.resolve(0x1f00);
        assert_eq!(r.kind, HopKind::LeafSet);
        assert_eq!(r.hop, h(0x2000));

        let r = f.resolve(0x1004);
        assert_eq!(r.kind, HopKind::Local);
    }

    #[test]
    fn dead_leaf_is_removed_and_skipped() {
        let mut f = Fixture::new(0x1000);
        for v in [0x1010, 0x0ff0, 0x2000, 0x0000] {
            f.leaf(v);
        }
        f.handles.set_liveness(&Id::new(0x1010), Liveness::Dead);
        let r = f.resolve(0x1012);
        assert_eq!(r.evicted, vec![h(0x1010)]);
        assert!(!f.leaf_set.member(&Id::new(0x1010)));
        assert_eq!(r.hop, h(0x1000));
    }

    #[test]
    fn far_key_uses_routing_table() {
        let mut f = Fixture::new(0x1000);
        for v in [0x1010, 0x0ff0, 0x2000, 0x0000] {
            f.leaf(v);
        }
        let far = 0x8000_0000_0000_0000_0000_0000_0000_0000u128;
        f.route(far + 5);
        let r = f.resolve(far);
        assert_eq!(r.kind, HopKind::RoutingTable);
        assert_eq!(r.hop, h(far + 5));
    }

    #[test]
    fn suspected_handles_remain_candidates() {
        let mut f = Fixture::new(0x1000);
        for v in [0x1010, 0x0ff0, 0x2000, 0x0000] {
            f.leaf(v);
        }
        let far = 0x8000_0000_0000_0000_0000_0000_0000_0000u128;
        f.route(far + 5);
        f.handles.set_liveness(&Id::new(far + 5), Liveness::Suspected);
        f.handles.set_liveness(&Id::new(0x2000), Liveness::Suspected);

        let r = f.resolve(far);
        assert_eq!(r.kind, HopKind::RoutingTable);
        assert_eq!(r.hop, h(far + 5));

        let r = f.resolve(0x1f00);
        assert_eq!(r.kind, HopKind::LeafSet);
        assert_eq!(r.hop, h(0x2000));
        assert!(r.evicted.is_empty());
    }

    #[test]
    fn dead_primary_falls_back_to_alternate() {
        let mut f = Fixture::new(0x1000);
        for v in [0x1010, 0x0ff0, 0x2000, 0x0000] {
            f.leaf(v);
        }
        let far = 0x8000_0000_0000_0000_0000_0000_0000_0000u128;
        let nine = 0x9000_0000_0000_0000_0000_0000_0000_0000u128;
        f.route(far + 5);
        f.route(nine);
        f.handles.set_liveness(&Id::new(far + 5), Liveness::Dead);

        let r = f.resolve(far);
        assert_eq!(r.kind, HopKind::AlternateRoute);
        assert_eq!(r.hop, h(nine));
    }

    #[test]
    fn nothing_in_table_falls_back_to_leaf() {
        let mut f = Fixture::new(0x1000);
        for v in [0x1010, 0x0ff0, 0x2000, 0x0000] {
            f.leaf(v);
        }
        // Beyond 0x2000, outside the span; table row is empty
        let r = f.resolve(0x0100_0000);
        assert_eq!(r.kind, HopKind::Fallback);
        assert_eq!(r.hop, h(0x2000));
    }

    #[test]
    fn hole_detection() {
        let key = Id::new(0xf000);
        assert_eq!(route_table_hole(&Id::new(0x1000), &Id::new(0x2000), &key, 4), Some(3));
        assert_eq!(route_table_hole(&Id::new(0xf100), &Id::new(0x2000), &key, 4), None);
        assert_eq!(route_table_hole(&Id::new(0xf000), &Id::new(0x2000), &key, 4), None);
    }
}
