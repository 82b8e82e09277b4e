//! Leaf-set maintenance.
//!
//! Neighbors push their leaf sets to each other on a timer and on demand.
//! A receiver folds what it hears into its own set, probes any member the
//! sender does not appear to know about, and repairs its set by asking the
//! outermost live member on each side whenever a member dies.

use rand::Rng;
use tracing::{debug, trace, warn};

use crate::handle::{Liveness, NodeHandle};
use crate::leafset::LeafSet;
use crate::wire::{BroadcastKind, BroadcastLeafSet, RequestLeafSet, WireMessage};

use super::Node;

impl Node {
    pub(super) fn on_broadcast_leaf_set(&mut self, bls: BroadcastLeafSet) {
        let from = self.learn(bls.from);
        self.last_heard.insert(from.id(), self.now);
        if self.handles.liveness(&from.id()) != Liveness::Alive {
            self.apply_liveness(&from.id(), Liveness::Alive);
        }
        self.offer_route(from);

        let remote = bls.leaf_set;
        match bls.kind {
            BroadcastKind::JoinInitial => {
                self.merge_remote(&remote, &from);
                debug!(
                    "Node {} joined via {} with {} neighbors",
                    self.local,
                    from,
                    self.leaf_set.members().len()
                );
                for handle in self.live_neighbors() {
                    self.broadcast_leaf_set(handle, BroadcastKind::JoinAdvertise);
                }
            }
            kind => {
                for handle in self.live_neighbors() {
                    if handle.id() != from.id() && remote.test(&handle) {
                        self.check_liveness(handle);
                    }
                }
                for handle in remote.neighbor_set(usize::MAX) {
                    if self.handles.liveness(&handle.id()) == Liveness::Dead {
                        self.check_liveness(handle);
                    }
                }

                self.merge_remote(&remote, &from);

                if kind == BroadcastKind::JoinAdvertise && self.leaf_set.member(&from.id()) {
                    self.correct_joiner(&remote, from);
                }
            }
        }
    }

    /// Tell neighbors the joiner does not know about that it exists, and
    /// tell the joiner about them.
    fn correct_joiner(&mut self, remote: &LeafSet, joiner: NodeHandle) {
        let missing: Vec<NodeHandle> = self
            .live_neighbors()
            .into_iter()
            .filter(|h| h.id() != joiner.id() && remote.test(h))
            .collect();
        if missing.is_empty() {
            return;
        }
        trace!("Node {} correcting {} about {} nodes", self.local, joiner, missing.len());
        for handle in missing {
            self.broadcast_leaf_set(handle, BroadcastKind::Correction);
        }
        self.broadcast_leaf_set(joiner, BroadcastKind::Correction);
    }

    pub(super) fn on_request_leaf_set(&mut self, request: RequestLeafSet) {
        let requester = self.learn(request.return_handle);
        if self.handles.is_alive(&requester.id()) {
            self.broadcast_leaf_set(requester, BroadcastKind::Update);
        }
    }

    /// Push our leaf set to the counter-clockwise neighbor and ask for its
    /// own, then probe immediate neighbors that have gone quiet.
    pub(super) fn on_ping_neighbor(&mut self) {
        if let Some(left) = self.leaf_set.get(-1).copied() {
            self.broadcast_leaf_set(left, BroadcastKind::Update);
            self.request_leaf_set(left);
        }

        let quiet_after = self.config.check_liveness_period.as_millis() as u64;
        for index in [1isize, -1] {
            let Some(neighbor) = self.leaf_set.get(index).copied() else {
                continue;
            };
            let quiet = self
                .last_heard
                .get(&neighbor.id())
                .map_or(true, |heard| self.now.saturating_sub(*heard) > quiet_after);
            if quiet {
                self.check_liveness(neighbor);
            }
        }
    }

    /// Exchange leaf sets with one random neighbor and probe another.
    pub(super) fn on_maintain_leaf_set(&mut self) {
        let set = self.leaf_set.neighbor_set(usize::MAX);
        if set.len() > 1 {
            let peer = set[self.rng.gen_range(1..set.len())];
            self.request_leaf_set(peer);
            self.broadcast_leaf_set(peer, BroadcastKind::Update);

            let probe = set[self.rng.gen_range(1..set.len())];
            self.check_liveness(probe);
        }

        if self.leaf_set.size() < self.leaf_set.max_size() {
            self.request_leaf_sets();
        }
    }

    pub(super) fn on_leaf_member_dead(&mut self, handle: NodeHandle) {
        let before = self.leaf_set.members();
        if self.leaf_set.remove(&handle.id()).is_none() {
            return;
        }
        debug!("Node {} removing dead neighbor {}", self.local, handle);
        self.apply_leaf_changes(&before);
        self.request_leaf_sets();
    }

    /// Ask the outermost live member on each side for its leaf set.
    pub(super) fn request_leaf_sets(&mut self) {
        let ccw_size = self.leaf_set.ccw_size() as isize;
        let cw_size = self.leaf_set.cw_size() as isize;

        let ccw = (-ccw_size..0).find_map(|i| self.live_leaf(i));
        let cw = (1..=cw_size).rev().find_map(|i| self.live_leaf(i));

        match (ccw, cw) {
            (Some(ccw), Some(cw)) => {
                self.request_leaf_set(ccw);
                if cw.id() != ccw.id() {
                    self.request_leaf_set(cw);
                }
            }
            (Some(only), None) | (None, Some(only)) => {
                self.request_leaf_set(only);
                if !self.leaf_set.is_empty() {
                    warn!("Node {} has no live neighbors on one side of the ring", self.local);
                }
            }
            (None, None) => {
                if !self.leaf_set.is_empty() {
                    warn!("Node {} has no live neighbors on either side of the ring", self.local);
                }
            }
        }
    }

    fn live_leaf(&self, index: isize) -> Option<NodeHandle> {
        self.leaf_set
            .get(index)
            .filter(|h| self.handles.is_alive(&h.id()))
            .copied()
    }

    /// Live leaf-set members, excluding this node.
    fn live_neighbors(&self) -> Vec<NodeHandle> {
        self.leaf_set
            .neighbor_set(usize::MAX)
            .into_iter()
            .filter(|h| h.id() != self.local.id() && self.handles.is_alive(&h.id()))
            .collect()
    }

    fn broadcast_leaf_set(&mut self, to: NodeHandle, kind: BroadcastKind) {
        let message = WireMessage::BroadcastLeafSet(BroadcastLeafSet {
            kind,
            from: self.local,
            leaf_set: self.leaf_set.clone(),
            timestamp: self.now,
        });
        self.send(to, message);
    }

    fn request_leaf_set(&mut self, to: NodeHandle) {
        let message = WireMessage::RequestLeafSet(RequestLeafSet {
            return_handle: self.local,
            timestamp: self.now,
        });
        self.send(to, message);
    }
}

#[cfg(test)]
mod tests {
    use crate::config::NodeConfig;
    use crate::handle::{Liveness, NodeHandle};
    use crate::leafset::LeafSet;
    use crate::node::{Effect, Event, Node, Timer};
    use crate::wire::{BroadcastKind, BroadcastLeafSet, RequestLeafSet, WireMessage};
    use meridian_id::Id;

    fn h(v: u128) -> NodeHandle {
        NodeHandle::new(Id::new(v))
    }

    fn node(v: u128) -> Node {
        let config = NodeConfig::default().with_leaf_set_size(4).with_rng_seed(7);
        Node::new(config, h(v)).unwrap()
    }

    fn leaf_set(base: u128, members: &[u128]) -> LeafSet {
        let mut ls = LeafSet::new(h(base), 4);
        for &m in members {
            ls.put(h(m));
        }
        ls
    }

    fn bls(kind: BroadcastKind, from: u128, members: &[u128]) -> Event {
        Event::Message(WireMessage::BroadcastLeafSet(BroadcastLeafSet {
            kind,
            from: h(from),
            leaf_set: leaf_set(from, members),
            timestamp: 0,
        }))
    }

    fn sent(effects: &[Effect], kind: &str) -> Vec<NodeHandle> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send { to, message } if message.kind() == kind => Some(*to),
                _ => None,
            })
            .collect()
    }

    fn probes(effects: &[Effect]) -> Vec<NodeHandle> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::CheckLiveness(h) => Some(*h),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn request_is_answered_with_update() {
        let mut n = node(0x1000);
        n.handle_event(
            Event::Message(WireMessage::RequestLeafSet(RequestLeafSet {
                return_handle: h(0x2000),
                timestamp: 0,
            })),
            0,
        );
        let effects = n.drain_effects();
        assert_eq!(sent(&effects, "broadcast-leaf-set"), vec![h(0x2000)]);
    }

    #[test]
    fn request_from_dead_node_is_ignored() {
        let mut n = node(0x1000);
        n.handle_event(
            Event::LivenessChanged {
                id: Id::new(0x2000),
                liveness: Liveness::Dead,
            },
            0,
        );
        n.handle_event(
            Event::Message(WireMessage::RequestLeafSet(RequestLeafSet {
                return_handle: h(0x2000),
                timestamp: 0,
            })),
            0,
        );
        assert!(n.drain_effects().is_empty());
    }

    #[test]
    fn update_probes_members_sender_lacks() {
        let mut n = node(0x1000);
        n.handle_event(bls(BroadcastKind::JoinInitial, 0x0ff0, &[0x1010, 0x2000, 0x0000]), 0);
        n.drain_effects();

        // 0x1010 sits between the sender and us but the sender does not list it
        n.handle_event(bls(BroadcastKind::Update, 0x1020, &[0x1000, 0x2000]), 1);
        let effects = n.drain_effects();
        assert!(probes(&effects).contains(&h(0x1010)));
    }

    #[test]
    fn advertise_from_joiner_triggers_corrections() {
        let mut n = node(0x1000);
        n.handle_event(bls(BroadcastKind::JoinInitial, 0x0ff0, &[0x1010, 0x2000, 0x0000]), 0);
        n.drain_effects();

        // 0x1008 joined knowing only us; it lacks 0x1010
        n.handle_event(bls(BroadcastKind::JoinAdvertise, 0x1008, &[0x1000]), 1);
        assert!(n.leaf_set().member(&Id::new(0x1008)));

        let effects = n.drain_effects();
        let corrected = sent(&effects, "broadcast-leaf-set");
        assert!(corrected.contains(&h(0x1008)));
        assert!(corrected.contains(&h(0x0ff0)));
    }

    #[test]
    fn ping_targets_left_neighbor_and_probes_quiet_ones() {
        let mut n = node(0x1000);
        n.handle_event(bls(BroadcastKind::JoinInitial, 0x0ff0, &[0x1010, 0x2000, 0x0000]), 0);
        n.drain_effects();

        n.handle_event(Event::Timer(Timer::PingNeighbor), 100_000);
        let effects = n.drain_effects();
        assert_eq!(sent(&effects, "request-leaf-set"), vec![h(0x0ff0)]);
        assert_eq!(sent(&effects, "broadcast-leaf-set"), vec![h(0x0ff0)]);
        // neither immediate neighbor has spoken within the window
        let probed = probes(&effects);
        assert!(probed.contains(&h(0x1010)));
        assert!(probed.contains(&h(0x0ff0)));
    }

    #[test]
    fn recent_neighbor_is_not_probed() {
        let mut n = node(0x1000);
        n.handle_event(bls(BroadcastKind::JoinInitial, 0x0ff0, &[0x1010, 0x2000, 0x0000]), 1_000);
        n.drain_effects();

        n.handle_event(Event::Timer(Timer::PingNeighbor), 2_000);
        let probed = probes(&n.drain_effects());
        assert!(!probed.contains(&h(0x0ff0)));
        assert!(probed.contains(&h(0x1010)));
    }

    #[test]
    fn maintenance_picks_a_neighbor() {
        let mut n = node(0x1000);
        n.handle_event(bls(BroadcastKind::JoinInitial, 0x0ff0, &[0x1010, 0x2000, 0x0000]), 0);
        n.drain_effects();

        n.handle_event(Event::Timer(Timer::MaintainLeafSet), 1);
        let effects = n.drain_effects();
        let requested = sent(&effects, "request-leaf-set");
        assert_eq!(requested.len(), 1);
        assert!(n.leaf_set().member(&requested[0].id()));
        assert_eq!(probes(&effects).len(), 1);
    }

    #[test]
    fn maintenance_on_lone_node_is_quiet() {
        let mut n = node(0x1000);
        n.handle_event(Event::Timer(Timer::MaintainLeafSet), 0);
        n.handle_event(Event::Timer(Timer::PingNeighbor), 0);
        assert!(n.drain_effects().is_empty());
    }

    #[test]
    fn repair_asks_outermost_members() {
        let mut n = node(0x1000);
        n.handle_event(bls(BroadcastKind::JoinInitial, 0x0ff0, &[0x1010, 0x2000, 0x0000]), 0);
        n.drain_effects();

        n.handle_event(
            Event::LivenessChanged {
                id: Id::new(0x0ff0),
                liveness: Liveness::Dead,
            },
            1,
        );
        let requested = sent(&n.drain_effects(), "request-leaf-set");
        assert!(requested.contains(&h(0x0000)));
        assert!(requested.contains(&h(0x2000)));
        assert!(!requested.contains(&h(0x0ff0)));
    }
}
