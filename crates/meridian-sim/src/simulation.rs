//! Many nodes, one process, one FIFO network.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::mpsc;

use meridian_id::Id;
use meridian_routing::{
    AppAddress, Application, BroadcastKind, BroadcastLeafSet, BroadcastRouteRow, Effect, Event, LeafSet,
    Liveness, Node, NodeConfig, NodeHandle, RouteRequest, Timer, WireMessage,
};
use tracing::{debug, info, warn};

use crate::error::{Result, SimError};
use crate::events::{Delivery, HopStats, SimEvent};

/// Address of the recording application on every simulated node.
pub const SIM_APP: AppAddress = AppAddress(0x5349_4d00);

/// Configuration for the simulation.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Seed for deterministic simulation
    pub seed: u64,
    /// Configuration shared by every node (each gets its own rng seed)
    pub node_config: NodeConfig,
    /// Upper bound on network steps per [`Simulation::run`]
    pub max_steps: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            node_config: NodeConfig::default(),
            max_steps: 1_000_000,
        }
    }
}

enum Observation {
    Delivered { node: Id, key: Id, payload: Vec<u8> },
    LeafSet { node: Id, peer: Id, joined: bool },
}

/// Records upcalls back to the simulation.
struct Recorder {
    node: Id,
    tx: mpsc::Sender<Observation>,
}

impl Application for Recorder {
    fn deliver(&mut self, key: &Id, payload: &[u8]) {
        let _ = self.tx.send(Observation::Delivered {
            node: self.node,
            key: *key,
            payload: payload.to_vec(),
        });
    }

    fn update(&mut self, handle: &NodeHandle, joined: bool) {
        let _ = self.tx.send(Observation::LeafSet {
            node: self.node,
            peer: handle.id(),
            joined,
        });
    }
}

enum Pending {
    /// An encoded message in flight.
    Frame { from: Id, to: NodeHandle, bytes: Vec<u8> },
    /// An event raised at a node by its host (probe verdicts, failed sends).
    Local { node: Id, event: Event },
}

/// A deterministic overlay of [`Node`]s.
///
/// Messages are delivered in send order with no loss. A node that has been
/// killed silently stops; frames addressed to it bounce back to the sender
/// as [`Event::SendFailed`], and liveness probes are answered truthfully.
pub struct Simulation {
    config: SimulationConfig,
    nodes: BTreeMap<Id, Node>,
    live: BTreeSet<Id>,
    queue: VecDeque<Pending>,
    clock_ms: u64,
    steps: u64,
    next_message: u64,
    /// Hops taken so far by each in-flight message.
    hops: HashMap<u64, u32>,
    events: Vec<SimEvent>,
    deliveries: Vec<Delivery>,
    tx: mpsc::Sender<Observation>,
    rx: mpsc::Receiver<Observation>,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            config,
            nodes: BTreeMap::new(),
            live: BTreeSet::new(),
            queue: VecDeque::new(),
            clock_ms: 0,
            steps: 0,
            next_message: 0,
            hops: HashMap::new(),
            events: Vec::new(),
            deliveries: Vec::new(),
            tx,
            rx,
        }
    }

    /// Create a node and bootstrap it from the closest live node.
    ///
    /// The bootstrap node hands over its populated routing-table rows and a
    /// `JoinInitial` leaf-set broadcast, then the network runs until quiet.
    pub fn add_node(&mut self, id: Id) -> Result<()> {
        if self.nodes.contains_key(&id) {
            return Err(SimError::DuplicateNode(id));
        }

        let config = self
            .config
            .node_config
            .clone()
            .with_rng_seed(self.config.seed ^ (id.as_u128() as u64));
        let local = NodeHandle::new(id);
        let mut node = Node::new(config, local)?;
        node.register(
            SIM_APP,
            Box::new(Recorder {
                node: id,
                tx: self.tx.clone(),
            }),
        );

        let bootstrap = self.closest_live(&id);
        self.nodes.insert(id, node);
        self.live.insert(id);
        self.events.push(SimEvent::NodeJoined {
            node: id,
            bootstrap,
            step: self.steps,
        });

        if let Some(bootstrap) = bootstrap.and_then(|b| self.nodes.get(&b)) {
            let from = *bootstrap.local();
            let table = bootstrap.routing_table();
            let mut messages = Vec::new();
            for row in 0..table.num_rows() {
                let handles = table.live_row(row, bootstrap.handles());
                if !handles.is_empty() {
                    messages.push(WireMessage::BroadcastRouteRow(BroadcastRouteRow { from, row, handles }));
                }
            }
            messages.push(WireMessage::BroadcastLeafSet(BroadcastLeafSet {
                kind: BroadcastKind::JoinInitial,
                from,
                leaf_set: bootstrap.leaf_set().clone(),
                timestamp: self.clock_ms,
            }));
            for message in messages {
                self.enqueue(from.id(), local, &message);
            }
        }

        self.run()?;
        debug!("Simulated node {} joined ({} live)", id, self.live.len());
        Ok(())
    }

    /// Stop a node. Its state is kept but it never runs again.
    pub fn kill(&mut self, id: &Id) -> Result<()> {
        if !self.live.remove(id) {
            return Err(SimError::UnknownNode(*id));
        }
        info!("Killed simulated node {}", id);
        self.events.push(SimEvent::NodeKilled {
            node: *id,
            step: self.steps,
        });
        Ok(())
    }

    /// Route `payload` from `from` toward `key` and run until quiet.
    ///
    /// Returns the message's sequence number for matching against
    /// [`deliveries`](Self::deliveries).
    pub fn route(&mut self, from: &Id, key: Id, payload: &[u8]) -> Result<u64> {
        if !self.live.contains(from) {
            return Err(SimError::UnknownNode(*from));
        }
        let message = self.next_message;
        self.next_message += 1;

        let mut framed = message.to_be_bytes().to_vec();
        framed.extend_from_slice(payload);
        self.hops.insert(message, 0);
        self.dispatch(*from, Event::Route(RouteRequest::new(key, SIM_APP, framed)));
        self.run()?;
        Ok(message)
    }

    /// Advance the clock by one ping period and fire every node's ping.
    pub fn tick_ping(&mut self) -> Result<()> {
        let period = self.config.node_config.ping_neighbor_period.as_millis() as u64;
        self.tick(period, Timer::PingNeighbor)
    }

    /// Advance the clock by one maintenance period and fire every node's
    /// leaf-set maintenance.
    pub fn tick_maintenance(&mut self) -> Result<()> {
        let period = self.config.node_config.maintenance_period.as_millis() as u64;
        self.tick(period, Timer::MaintainLeafSet)
    }

    fn tick(&mut self, advance_ms: u64, timer: Timer) -> Result<()> {
        self.clock_ms += advance_ms;
        let live: Vec<Id> = self.live.iter().copied().collect();
        for id in live {
            self.dispatch(id, Event::Timer(timer));
        }
        self.run()?;
        Ok(())
    }

    /// Process queued traffic until the network is quiet.
    ///
    /// Returns the number of steps taken.
    pub fn run(&mut self) -> Result<usize> {
        let mut taken = 0;
        while let Some(pending) = self.queue.pop_front() {
            if taken == self.config.max_steps {
                self.queue.push_front(pending);
                warn!("Simulation still busy after {} steps", taken);
                return Err(SimError::StepLimit(taken));
            }
            taken += 1;
            self.steps += 1;
            self.step(pending);
        }
        Ok(taken)
    }

    fn step(&mut self, pending: Pending) {
        match pending {
            Pending::Frame { from, to, bytes } => {
                if self.live.contains(&to.id()) {
                    self.dispatch(to.id(), Event::Frame(bytes));
                } else if self.live.contains(&from) {
                    match WireMessage::decode(&bytes) {
                        Ok(message) => self.queue.push_back(Pending::Local {
                            node: from,
                            event: Event::SendFailed { to, message },
                        }),
                        Err(e) => warn!("Dropping undecodable frame from {}: {}", from, e),
                    }
                }
            }
            Pending::Local { node, event } => {
                if self.live.contains(&node) {
                    self.dispatch(node, event);
                }
            }
        }
    }

    /// Hand one event to a node and queue whatever it produces.
    fn dispatch(&mut self, id: Id, event: Event) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        node.handle_event(event, self.clock_ms);
        let effects = node.drain_effects();

        for effect in effects {
            match effect {
                Effect::Send { to, message } => {
                    if let WireMessage::Route(envelope) = &message {
                        if let Some(seq) = message_number(envelope.payload()) {
                            self.hops.insert(seq, envelope.hops());
                        }
                    }
                    self.enqueue(id, to, &message);
                }
                Effect::CheckLiveness(handle) => {
                    let liveness = if self.live.contains(&handle.id()) {
                        Liveness::Alive
                    } else {
                        Liveness::Dead
                    };
                    self.queue.push_back(Pending::Local {
                        node: id,
                        event: Event::LivenessChanged {
                            id: handle.id(),
                            liveness,
                        },
                    });
                }
            }
        }

        self.collect_observations();
    }

    fn enqueue(&mut self, from: Id, to: NodeHandle, message: &WireMessage) {
        match message.encode() {
            Ok(bytes) => self.queue.push_back(Pending::Frame { from, to, bytes }),
            Err(e) => warn!("Failed to encode {} from {}: {}", message.kind(), from, e),
        }
    }

    fn collect_observations(&mut self) {
        while let Ok(observation) = self.rx.try_recv() {
            match observation {
                Observation::Delivered { node, key, payload } => {
                    let Some(message) = message_number(&payload) else {
                        continue;
                    };
                    let hops = self.hops.remove(&message).unwrap_or(0);
                    self.events.push(SimEvent::Delivered {
                        node,
                        key,
                        message,
                        hops,
                        step: self.steps,
                    });
                    self.deliveries.push(Delivery {
                        message,
                        key,
                        node,
                        hops,
                        payload: payload[8..].to_vec(),
                    });
                }
                Observation::LeafSet { node, peer, joined } => {
                    self.events.push(SimEvent::LeafSetChanged {
                        node,
                        peer,
                        joined,
                        step: self.steps,
                    });
                }
            }
        }
    }

    /// The live node numerically closest to `key`; ties go to the lower id.
    pub fn closest_live(&self, key: &Id) -> Option<Id> {
        self.live.iter().copied().min_by_key(|id| (id.distance(key), *id))
    }

    pub fn leaf_set(&self, id: &Id) -> Option<&LeafSet> {
        self.nodes.get(id).map(|n| n.leaf_set())
    }

    pub fn node(&self, id: &Id) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn is_live(&self, id: &Id) -> bool {
        self.live.contains(id)
    }

    /// Live node ids in ascending order.
    pub fn live_nodes(&self) -> impl Iterator<Item = &Id> + '_ {
        self.live.iter()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn deliveries(&self) -> &[Delivery] {
        &self.deliveries
    }

    pub fn hop_stats(&self) -> HopStats {
        HopStats::from_deliveries(&self.deliveries)
    }

    pub fn events(&self) -> &[SimEvent] {
        &self.events
    }

    pub fn clock_ms(&self) -> u64 {
        self.clock_ms
    }

    /// Serialize the event timeline.
    pub fn timeline_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.events)?)
    }
}

fn message_number(payload: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = payload.get(..8)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}
