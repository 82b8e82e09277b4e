//! The per-node state machine.
//!
//! A [`Node`] owns one participant's routing state and is driven entirely
//! by [`Event`]s. It performs no I/O: every outbound message and liveness
//! probe is queued as an [`Effect`] for the caller (the tokio reactor or
//! the simulator) to carry out, and their outcomes come back as events.
//!
//! ```text
//!   Event ──> handle_event ──> structures ──> drain_effects ──> Effect
//!     ^                                                           |
//!     +──────────── transport / pinger / timers ──────────────────+
//! ```
//!
//! Because all mutation happens inside `handle_event`, a liveness flip and
//! the leaf-set repair it triggers land in the same step, before any later
//! routing decision can see stale state.

mod maintenance;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;

use meridian_id::{Id, IdRange};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, trace, warn};

use crate::app::Application;
use crate::bucket::BucketInsert;
use crate::config::NodeConfig;
use crate::envelope::{AppAddress, RouteEnvelope, RouteStep};
use crate::error::{Error, Result};
use crate::handle::{HandleTable, Liveness, NodeHandle, Subscriber};
use crate::leafset::{LeafSet, MergeMode};
use crate::router::{route_table_hole, HopKind, Router};
use crate::table::RoutingTable;
use crate::wire::{BroadcastRouteRow, Priority, WireMessage};

/// Periodic maintenance ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    /// Exchange leaf sets with the immediate neighbors.
    PingNeighbor,
    /// Exchange leaf sets with a random neighbor.
    MaintainLeafSet,
}

/// An application's request to send a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRequest {
    pub key: Id,
    pub app: AppAddress,
    pub payload: Vec<u8>,
    /// Seeds the first hop instead of consulting the router.
    pub hint: Option<NodeHandle>,
    /// Application asked at every hop. Defaults to `app`.
    pub aux: Option<AppAddress>,
}

impl RouteRequest {
    pub fn new(key: Id, app: AppAddress, payload: Vec<u8>) -> Self {
        Self {
            key,
            app,
            payload,
            hint: None,
            aux: None,
        }
    }

    #[must_use]
    pub fn with_hint(mut self, hint: NodeHandle) -> Self {
        self.hint = Some(hint);
        self
    }

    #[must_use]
    pub fn with_aux(mut self, aux: AppAddress) -> Self {
        self.aux = Some(aux);
        self
    }
}

/// Input to [`Node::handle_event`].
#[derive(Debug, Clone)]
pub enum Event {
    /// A decoded message from a peer.
    Message(WireMessage),
    /// A raw frame from the transport.
    Frame(Vec<u8>),
    /// Route a payload on behalf of a local application.
    Route(RouteRequest),
    /// The pinger's verdict on a handle.
    LivenessChanged { id: Id, liveness: Liveness },
    /// A round-trip measurement (lower is closer).
    ProximityMeasured { id: Id, proximity: u32 },
    /// The transport could not deliver `message` to `to`.
    SendFailed { to: NodeHandle, message: WireMessage },
    Timer(Timer),
}

/// Output of a node, to be carried out by its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Send { to: NodeHandle, message: WireMessage },
    /// Probe the handle and report back with [`Event::LivenessChanged`].
    CheckLiveness(NodeHandle),
}

impl Effect {
    pub fn priority(&self) -> Priority {
        match self {
            Effect::Send { message, .. } => message.priority(),
            Effect::CheckLiveness(_) => Priority::High,
        }
    }
}

/// Immutable copy of a node's routing state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub local: NodeHandle,
    pub leaf_set: LeafSet,
    pub routes: Vec<NodeHandle>,
    pub known_handles: usize,
}

/// One overlay participant.
pub struct Node {
    config: NodeConfig,
    local: NodeHandle,
    handles: HandleTable,
    routes: RoutingTable,
    leaf_set: LeafSet,
    apps: BTreeMap<AppAddress, Box<dyn Application>>,
    /// Last leaf-set broadcast received per leaf-set member, in node
    /// milliseconds.
    last_heard: HashMap<Id, u64>,
    /// Offers each full routing-table cell is holding until proximity is
    /// measured, oldest first. At most `bucket_capacity` per cell.
    deferred: HashMap<(usize, usize), VecDeque<Id>>,
    /// Handles seen during the current event, released at its end unless a
    /// structure still holds them.
    touched: Vec<Id>,
    rng: StdRng,
    now: u64,
    outbox: Vec<Effect>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("local", &self.local)
            .field("leaf_set", &self.leaf_set.members().len())
            .field("routes", &self.routes.len())
            .field("apps", &self.apps.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Node {
    /// A node with empty routing state.
    pub fn new(config: NodeConfig, local: NodeHandle) -> Result<Self> {
        config.validate()?;
        let routes = RoutingTable::new(local, config.digit_bits, config.bucket_capacity);
        let leaf_set = LeafSet::new(local, config.leaf_set_size);
        let rng = StdRng::seed_from_u64(config.rng_seed);

        info!(
            "Node {} started (b = {}, L = {}, k = {})",
            local, config.digit_bits, config.leaf_set_size, config.bucket_capacity
        );

        Ok(Self {
            config,
            local,
            handles: HandleTable::new(),
            routes,
            leaf_set,
            apps: BTreeMap::new(),
            last_heard: HashMap::new(),
            deferred: HashMap::new(),
            touched: Vec::new(),
            rng,
            now: 0,
            outbox: Vec::new(),
        })
    }

    /// Register an application, returning any it replaced.
    pub fn register(&mut self, address: AppAddress, app: Box<dyn Application>) -> Option<Box<dyn Application>> {
        self.apps.insert(address, app)
    }

    pub fn local(&self) -> &NodeHandle {
        &self.local
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn leaf_set(&self) -> &LeafSet {
        &self.leaf_set
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routes
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    /// Apply one event at node time `now_ms`.
    pub fn handle_event(&mut self, event: Event, now_ms: u64) {
        self.now = self.now.max(now_ms);
        match event {
            Event::Message(message) => self.on_message(message),
            Event::Frame(frame) => match WireMessage::decode(&frame) {
                Ok(message) => self.on_message(message),
                Err(e) => warn!("Node {} dropping frame ({} bytes): {}", self.local, frame.len(), e),
            },
            Event::Route(request) => self.route(request),
            Event::LivenessChanged { id, liveness } => self.apply_liveness(&id, liveness),
            Event::ProximityMeasured { id, proximity } => self.apply_proximity(&id, proximity),
            Event::SendFailed { to, message } => self.on_send_failed(to, message),
            Event::Timer(Timer::PingNeighbor) => self.on_ping_neighbor(),
            Event::Timer(Timer::MaintainLeafSet) => self.on_maintain_leaf_set(),
        }
        self.release_unreferenced();
    }

    /// Take every queued effect.
    pub fn drain_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.outbox)
    }

    /// Route a payload. Best effort; never fails.
    pub fn route(&mut self, request: RouteRequest) {
        let mut envelope = RouteEnvelope::new(request.key, request.app, request.payload);
        if let Some(aux) = request.aux {
            envelope = envelope.with_aux(aux);
        }
        if let Some(hint) = request.hint {
            envelope.set_next_hop(hint);
        }
        self.process_envelope(envelope);
        self.release_unreferenced();
    }

    /// Live routing-table entries closer to `key` than this node.
    ///
    /// `safe` is accepted for API compatibility; no secure routing table
    /// exists to draw from.
    pub fn local_lookup(&self, key: &Id, count: usize, _safe: bool) -> Vec<NodeHandle> {
        self.routes.alternate_routes(key, count, &self.handles)
    }

    /// Up to `count` ring neighbors, this node first.
    pub fn neighbor_set(&self, count: usize) -> Vec<NodeHandle> {
        self.leaf_set.neighbor_set(count)
    }

    /// The nodes that would become root for `key`, nearest first.
    pub fn replica_set(&self, key: &Id, max_rank: usize) -> Result<Vec<NodeHandle>> {
        let limit = self.leaf_set.max_size() / 2 + 1;
        if max_rank > limit {
            return Err(Error::InvalidArgument(format!(
                "replica set of {} exceeds maximum {}",
                max_rank, limit
            )));
        }
        Ok(self.leaf_set.replica_set(key, max_rank))
    }

    /// Keys for which `node` is among the `rank + 1` closest nodes.
    pub fn range(&self, node: &NodeHandle, rank: usize) -> Option<IdRange> {
        self.leaf_set.range(&node.id(), rank)
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            local: self.local,
            leaf_set: self.leaf_set.clone(),
            routes: self.routes.handles().copied().collect(),
            known_handles: self.handles.len(),
        }
    }

    fn on_message(&mut self, message: WireMessage) {
        trace!("Node {} received {}", self.local, message.kind());
        match message {
            WireMessage::Route(envelope) => self.process_envelope(envelope),
            WireMessage::BroadcastLeafSet(bls) => self.on_broadcast_leaf_set(bls),
            WireMessage::RequestLeafSet(rls) => self.on_request_leaf_set(rls),
            WireMessage::BroadcastRouteRow(row) => self.on_route_row(row),
        }
    }

    fn process_envelope(&mut self, mut envelope: RouteEnvelope) {
        if let Some(prev) = envelope.prev_hop().copied() {
            if prev.id() != self.local.id() {
                let prev = self.learn(prev);
                self.offer_route(prev);
            }
        }

        if envelope.next_hop().is_none() {
            let target = *envelope.target();
            let before = self.leaf_set.members();
            let resolution =
                Router::new(self.local, &mut self.leaf_set, &self.routes, &self.handles).resolve(&target);

            if !resolution.evicted.is_empty() {
                self.apply_leaf_changes(&before);
                self.request_leaf_sets();
            }
            if resolution.kind == HopKind::RoutingTable {
                if let Some(prev) = envelope.prev_hop().copied() {
                    self.repair_route_hole(&prev, &target);
                }
            }
            envelope.set_next_hop(resolution.hop);
        }

        let Some(next) = envelope.next_hop().copied() else {
            return;
        };

        // Asked at every hop, the terminal one included
        let observer = envelope.aux().unwrap_or_else(|| envelope.destination());
        if let Some(app) = self.apps.get_mut(&observer) {
            if !app.forward(&envelope, &next) {
                debug!("Node {} forward to {} suppressed by {}", self.local, next, observer);
                return;
            }
        }

        let local_id = self.local.id();
        match envelope.route_step(&local_id) {
            RouteStep::NotReady => {}
            RouteStep::Deliver => self.deliver(envelope),
            RouteStep::Transmit(hop) => {
                envelope.set_prev_hop(self.local);
                self.send(hop, WireMessage::Route(envelope));
            }
        }
    }

    fn deliver(&mut self, envelope: RouteEnvelope) {
        let destination = envelope.destination();
        match self.apps.get_mut(&destination) {
            Some(app) => {
                debug!(
                    "Node {} delivering {} after {} hops to {}",
                    self.local,
                    envelope.target(),
                    envelope.hops(),
                    destination
                );
                app.deliver(envelope.target(), envelope.payload());
            }
            None => warn!(
                "Node {} has no application {}; dropping message for {}",
                self.local,
                destination,
                envelope.target()
            ),
        }
    }

    fn on_send_failed(&mut self, to: NodeHandle, message: WireMessage) {
        debug!("Node {} could not reach {} ({})", self.local, to, message.kind());
        self.apply_liveness(&to.id(), Liveness::Dead);
        if let WireMessage::Route(mut envelope) = message {
            if envelope.options().reroute_on_failure {
                envelope.clear_next_hop();
                self.process_envelope(envelope);
            }
        }
    }

    fn apply_liveness(&mut self, id: &Id, liveness: Liveness) {
        if *id == self.local.id() {
            return;
        }
        self.touched.push(*id);
        let Some(change) = self.handles.set_liveness(id, liveness) else {
            return;
        };
        debug!(
            "Node {} sees {} as {} (was {})",
            self.local, change.handle, change.current, change.previous
        );
        if change.current == Liveness::Dead && change.subscribers.contains(&Subscriber::LeafSet) {
            self.on_leaf_member_dead(change.handle);
        }
    }

    fn apply_proximity(&mut self, id: &Id, proximity: u32) {
        self.touched.push(*id);
        for subscriber in self.handles.set_proximity(id, proximity) {
            if let Subscriber::RouteBucket { row, col } = subscriber {
                if let Some(queue) = self.deferred.get_mut(&(row, col)) {
                    queue.retain(|d| d != id);
                    if queue.is_empty() {
                        self.deferred.remove(&(row, col));
                    }
                }
                self.handles.unsubscribe(id, subscriber);
                let handle = self.handles.get(id).copied().unwrap_or(NodeHandle::new(*id));
                self.offer_route(handle);
            }
        }
    }

    fn on_route_row(&mut self, row: BroadcastRouteRow) {
        let from = self.learn(row.from);
        self.offer_route(from);
        if row.row >= self.routes.num_rows() {
            return;
        }
        for handle in row.handles {
            if handle.id() != self.local.id() && self.handles.is_alive(&handle.id()) {
                let handle = self.learn(handle);
                self.offer_route(handle);
            }
        }
    }

    /// Send `prev` our row for `key` if it appears to be missing it.
    fn repair_route_hole(&mut self, prev: &NodeHandle, key: &Id) {
        if prev.id() == self.local.id() || !self.handles.is_alive(&prev.id()) {
            return;
        }
        let Some(row) = route_table_hole(&self.local.id(), &prev.id(), key, self.config.digit_bits) else {
            return;
        };
        let handles = self.routes.live_row(row, &self.handles);
        trace!("Node {} sending row {} to {}", self.local, row, prev);
        self.send(
            *prev,
            WireMessage::BroadcastRouteRow(BroadcastRouteRow {
                from: self.local,
                row,
                handles,
            }),
        );
    }

    /// Offer a handle to the routing table, deferring it until its
    /// proximity is known if its cell is full.
    fn offer_route(&mut self, handle: NodeHandle) {
        match self.routes.put(handle, &self.handles) {
            BucketInsert::Deferred => self.defer_route(handle),
            BucketInsert::Replaced(old) => {
                trace!("Node {} routing table: {} replaced {}", self.local, handle, old);
                self.touched.push(old.id());
            }
            BucketInsert::Added | BucketInsert::Rejected => {}
        }
    }

    fn defer_route(&mut self, handle: NodeHandle) {
        let Some((row, col)) = self.routes.cell_of(&handle.id()) else {
            return;
        };
        let queue = self.deferred.entry((row, col)).or_default();
        if queue.contains(&handle.id()) {
            return;
        }
        queue.push_back(handle.id());
        let dropped = if queue.len() > self.config.bucket_capacity {
            queue.pop_front()
        } else {
            None
        };

        let subscriber = Subscriber::RouteBucket { row, col };
        self.handles.subscribe(handle, subscriber);
        if let Some(old) = dropped {
            self.handles.unsubscribe(&old, subscriber);
            self.touched.push(old);
        }
    }

    /// Fold a remote leaf set into ours.
    fn merge_remote(&mut self, remote: &LeafSet, from: &NodeHandle) -> bool {
        let before = self.leaf_set.members();
        let outcome = self
            .leaf_set
            .merge(remote, from, &mut self.routes, &self.handles, MergeMode::Apply);
        for handle in outcome.deferred {
            self.defer_route(handle);
        }
        self.touched.extend(outcome.displaced.iter().map(|h| h.id()));
        if outcome.changed {
            self.apply_leaf_changes(&before);
        }
        outcome.changed
    }

    /// Reconcile subscriptions and fire `update` upcalls after the leaf set
    /// changed from `before`.
    fn apply_leaf_changes(&mut self, before: &[NodeHandle]) {
        let after = self.leaf_set.members();
        for handle in after.iter().filter(|h| !before.contains(h)) {
            let handle = self.learn(*handle);
            self.handles.subscribe(handle, Subscriber::LeafSet);
            debug!("Node {} leaf set gained {}", self.local, handle);
            for app in self.apps.values_mut() {
                app.update(&handle, true);
            }
        }
        for handle in before.iter().filter(|h| !after.contains(h)) {
            self.handles.unsubscribe(&handle.id(), Subscriber::LeafSet);
            self.touched.push(handle.id());
            debug!("Node {} leaf set lost {}", self.local, handle);
            for app in self.apps.values_mut() {
                app.update(handle, false);
            }
        }
    }

    /// Record a handle for the duration of the current event.
    fn learn(&mut self, handle: NodeHandle) -> NodeHandle {
        self.touched.push(handle.id());
        self.handles.learn(handle)
    }

    /// Forget handles seen this event that neither the leaf set nor the
    /// routing table holds. Tombstones and pending offers stay.
    fn release_unreferenced(&mut self) {
        for id in std::mem::take(&mut self.touched) {
            if self.leaf_set.member(&id) {
                continue;
            }
            self.last_heard.remove(&id);
            if self.routes.get(&id).is_none() && self.handles.release(&id) {
                trace!("Node {} released {}", self.local, id);
            }
        }
    }

    fn send(&mut self, to: NodeHandle, message: WireMessage) {
        if to.id() == self.local.id() {
            trace!("Node {} not sending {} to itself", self.local, message.kind());
            return;
        }
        self.outbox.push(Effect::Send { to, message });
    }

    fn check_liveness(&mut self, handle: NodeHandle) {
        if handle.id() == self.local.id() {
            return;
        }
        let effect = Effect::CheckLiveness(handle);
        if !self.outbox.contains(&effect) {
            self.outbox.push(effect);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{BroadcastKind, BroadcastLeafSet};
    use std::sync::mpsc;

    struct Recorder {
        tx: mpsc::Sender<(Id, Vec<u8>)>,
        suppress: bool,
        updates: mpsc::Sender<(NodeHandle, bool)>,
    }

    impl Application for Recorder {
        fn deliver(&mut self, key: &Id, payload: &[u8]) {
            let _ = self.tx.send((*key, payload.to_vec()));
        }

        fn forward(&mut self, _envelope: &RouteEnvelope, _next_hop: &NodeHandle) -> bool {
            !self.suppress
        }

        fn update(&mut self, handle: &NodeHandle, joined: bool) {
            let _ = self.updates.send((*handle, joined));
        }
    }

    const APP: AppAddress = AppAddress(1);

    fn h(v: u128) -> NodeHandle {
        NodeHandle::new(Id::new(v))
    }

    fn node(v: u128) -> (Node, mpsc::Receiver<(Id, Vec<u8>)>, mpsc::Receiver<(NodeHandle, bool)>) {
        let config = NodeConfig::default().with_leaf_set_size(4);
        let mut node = Node::new(config, h(v)).unwrap();
        let (tx, rx) = mpsc::channel();
        let (utx, urx) = mpsc::channel();
        node.register(
            APP,
            Box::new(Recorder {
                tx,
                suppress: false,
                updates: utx,
            }),
        );
        (node, rx, urx)
    }

    fn join(node: &mut Node, from: u128, members: &[u128]) {
        let mut ls = LeafSet::new(h(from), 4);
        for &m in members {
            ls.put(h(m));
        }
        node.handle_event(
            Event::Message(WireMessage::BroadcastLeafSet(BroadcastLeafSet {
                kind: BroadcastKind::JoinInitial,
                from: h(from),
                leaf_set: ls,
                timestamp: 0,
            })),
            0,
        );
    }

    fn sends(effects: &[Effect]) -> Vec<(NodeHandle, &'static str)> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send { to, message } => Some((*to, message.kind())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn lone_node_delivers_to_itself() {
        let (mut node, rx, _) = node(0x1000);
        node.handle_event(Event::Route(RouteRequest::new(Id::new(0xffff), APP, b"hi".to_vec())), 0);
        assert_eq!(rx.try_recv().unwrap(), (Id::new(0xffff), b"hi".to_vec()));
        assert!(node.drain_effects().is_empty());
    }

    #[test]
    fn join_initial_populates_and_advertises() {
        let (mut node, _, updates) = node(0x1000);
        join(&mut node, 0x0ff0, &[0x1010, 0x2000, 0x0000]);

        assert!(node.leaf_set().member(&Id::new(0x0ff0)));
        assert!(node.leaf_set().member(&Id::new(0x1010)));
        let gained: Vec<_> = updates.try_iter().filter(|(_, j)| *j).map(|(h, _)| h).collect();
        assert!(gained.contains(&h(0x0ff0)));

        let effects = node.drain_effects();
        let advertised: Vec<_> = sends(&effects)
            .into_iter()
            .filter(|(_, kind)| *kind == "broadcast-leaf-set")
            .map(|(to, _)| to)
            .collect();
        assert!(advertised.contains(&h(0x0ff0)));
        assert!(advertised.contains(&h(0x1010)));
    }

    #[test]
    fn routes_to_leaf_and_marks_prev_hop() {
        let (mut node, _, _) = node(0x1000);
        join(&mut node, 0x0ff0, &[0x1010, 0x2000, 0x0000]);
        node.drain_effects();

        node.route(RouteRequest::new(Id::new(0x1011), APP, vec![1]));
        let effects = node.drain_effects();
        match &effects[..] {
            [Effect::Send {
                to,
                message: WireMessage::Route(env),
            }] => {
                assert_eq!(*to, h(0x1010));
                assert_eq!(env.prev_hop(), Some(&h(0x1000)));
                assert_eq!(env.hops(), 1);
                assert!(env.next_hop().is_none());
            }
            other => panic!("unexpected effects {:?}", other),
        }
    }

    #[test]
    fn dead_leaf_triggers_repair_and_update() {
        let (mut node, _, updates) = node(0x1000);
        join(&mut node, 0x0ff0, &[0x1010, 0x2000, 0x0000]);
        node.drain_effects();
        let _ = updates.try_iter().count();

        node.handle_event(
            Event::LivenessChanged {
                id: Id::new(0x1010),
                liveness: Liveness::Dead,
            },
            1,
        );
        assert!(!node.leaf_set().member(&Id::new(0x1010)));
        assert_eq!(updates.try_recv().unwrap(), (h(0x1010), false));

        let effects = node.drain_effects();
        let requests: Vec<_> = sends(&effects)
            .into_iter()
            .filter(|(_, kind)| *kind == "request-leaf-set")
            .collect();
        assert!(!requests.is_empty());
    }

    #[test]
    fn send_failure_reroutes() {
        let (mut node, rx, _) = node(0x1000);
        join(&mut node, 0x0ff0, &[0x1010, 0x2000, 0x0000]);
        node.drain_effects();

        node.route(RouteRequest::new(Id::new(0x1011), APP, vec![9]));
        let effects = node.drain_effects();
        let Some(Effect::Send { to, message }) = effects.into_iter().next() else {
            panic!("expected a send");
        };
        node.handle_event(Event::SendFailed { to, message }, 2);

        // 0x1010 is gone; this node is now closest to 0x1011
        assert!(!node.leaf_set().member(&Id::new(0x1010)));
        assert_eq!(rx.try_recv().unwrap().1, vec![9]);
    }

    #[test]
    fn forward_upcall_can_suppress() {
        let (mut node, _, _) = node(0x1000);
        let (tx, _rx) = mpsc::channel();
        let (utx, _urx) = mpsc::channel();
        let aux = AppAddress(2);
        node.register(
            aux,
            Box::new(Recorder {
                tx,
                suppress: true,
                updates: utx,
            }),
        );
        join(&mut node, 0x0ff0, &[0x1010, 0x2000, 0x0000]);
        node.drain_effects();

        node.route(RouteRequest::new(Id::new(0x1011), APP, vec![1]).with_aux(aux));
        assert!(node.drain_effects().is_empty());
    }

    /// Counts `forward` upcalls and optionally stops the envelope.
    struct Watcher {
        forwards: mpsc::Sender<NodeHandle>,
        suppress: bool,
    }

    impl Application for Watcher {
        fn deliver(&mut self, _key: &Id, _payload: &[u8]) {}

        fn forward(&mut self, _envelope: &RouteEnvelope, next_hop: &NodeHandle) -> bool {
            let _ = self.forwards.send(*next_hop);
            !self.suppress
        }
    }

    fn passing_through(key: u128) -> Event {
        let mut envelope = RouteEnvelope::new(Id::new(key), AppAddress(7), vec![5]);
        envelope.set_prev_hop(h(0x0000));
        Event::Message(WireMessage::Route(envelope))
    }

    #[test]
    fn forward_asks_destination_without_aux() {
        let (mut node, _, _) = node(0x1000);
        let (tx, forwards) = mpsc::channel();
        node.register(AppAddress(7), Box::new(Watcher { forwards: tx, suppress: false }));
        join(&mut node, 0x0ff0, &[0x1010, 0x2000, 0x0000]);
        node.drain_effects();

        node.handle_event(passing_through(0x1011), 1);
        assert_eq!(forwards.try_iter().collect::<Vec<_>>(), vec![h(0x1010)]);
        let transmitted = sends(&node.drain_effects())
            .into_iter()
            .filter(|(_, kind)| *kind == "route")
            .count();
        assert_eq!(transmitted, 1);

        // terminal hop is asked too, with the local node as next hop
        node.handle_event(passing_through(0x1001), 2);
        assert_eq!(forwards.try_iter().collect::<Vec<_>>(), vec![h(0x1000)]);
    }

    #[test]
    fn destination_can_suppress_its_own_messages() {
        let (mut node, _, _) = node(0x1000);
        let (tx, forwards) = mpsc::channel();
        node.register(AppAddress(7), Box::new(Watcher { forwards: tx, suppress: true }));
        join(&mut node, 0x0ff0, &[0x1010, 0x2000, 0x0000]);
        node.drain_effects();

        node.handle_event(passing_through(0x1011), 1);
        assert_eq!(forwards.try_iter().count(), 1);
        assert!(node.drain_effects().is_empty());
    }

    #[test]
    fn passing_traffic_does_not_grow_handle_table() {
        let config = NodeConfig::default().with_leaf_set_size(4).with_bucket_capacity(1);
        let mut node = Node::new(config, h(0x1000)).unwrap();

        // every previous hop lands in routing cell [0][8]
        let base = 0x8000_0000_0000_0000_0000_0000_0000_0000u128;
        for i in 0..500u128 {
            let mut envelope = RouteEnvelope::new(Id::new(base + i), APP, vec![]);
            envelope.set_prev_hop(h(base + (i << 64)));
            node.handle_event(Event::Message(WireMessage::Route(envelope)), i as u64);
        }

        assert_eq!(node.routing_table().len(), 1);
        // the cell's entry plus its one pending offer
        assert!(node.handles().len() <= 2, "{} handles", node.handles().len());
    }

    #[test]
    fn lost_leaf_member_is_released() {
        let (mut node, _, _) = node(0x1000);
        join(&mut node, 0x0ff0, &[0x1010, 0x2000, 0x0000]);
        node.drain_effects();
        assert!(node.handles().get(&Id::new(0x2000)).is_some());

        // a nearer clockwise node pushes 0x2000 out of the half
        let mut ls = LeafSet::new(h(0x1010), 4);
        ls.put(h(0x1008));
        ls.put(h(0x1000));
        node.handle_event(
            Event::Message(WireMessage::BroadcastLeafSet(BroadcastLeafSet {
                kind: BroadcastKind::Update,
                from: h(0x1010),
                leaf_set: ls,
                timestamp: 0,
            })),
            1,
        );
        assert!(node.leaf_set().member(&Id::new(0x1008)));
        assert!(!node.leaf_set().member(&Id::new(0x2000)));
        assert!(node.handles().get(&Id::new(0x2000)).is_none());
        assert_eq!(node.handles().len(), node.leaf_set().members().len());
    }

    #[test]
    fn undecodable_frame_is_dropped() {
        let (mut node, _, _) = node(0x1000);
        node.handle_event(Event::Frame(vec![42, 1, 2, 3]), 0);
        node.handle_event(Event::Frame(Vec::new()), 0);
        assert!(node.drain_effects().is_empty());
        assert!(node.leaf_set().is_empty());
    }

    #[test]
    fn replica_set_rank_limit() {
        let (node, _, _) = node(0x1000);
        assert!(node.replica_set(&Id::new(1), 3).is_ok());
        assert!(matches!(
            node.replica_set(&Id::new(1), 4),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn route_row_fills_table() {
        let (mut node, _, _) = node(0x1000);
        let far = h(0x8000_0000_0000_0000_0000_0000_0000_0000);
        node.handle_event(
            Event::Message(WireMessage::BroadcastRouteRow(BroadcastRouteRow {
                from: h(0x2000),
                row: 31,
                handles: vec![far, h(0x1000)],
            })),
            0,
        );
        assert_eq!(node.routing_table().get(&far.id()), Some(&far));
        assert_eq!(node.routing_table().get(&Id::new(0x2000)), Some(&h(0x2000)));
        assert_eq!(node.local_lookup(&far.id(), 4, false), vec![far]);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let (mut node, _, _) = node(0x1000);
        join(&mut node, 0x0ff0, &[0x1010]);
        let snap = node.snapshot();
        node.handle_event(
            Event::LivenessChanged {
                id: Id::new(0x1010),
                liveness: Liveness::Dead,
            },
            0,
        );
        assert!(snap.leaf_set.member(&Id::new(0x1010)));
        assert!(!node.leaf_set().member(&Id::new(0x1010)));
    }
}
