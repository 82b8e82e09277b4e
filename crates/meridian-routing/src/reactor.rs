//! Async host for a [`Node`].
//!
//! The reactor owns the node on a single tokio task. Callers talk to it
//! through a cloneable [`ReactorHandle`]; the transport is anything that can
//! push a frame at a handle and start a liveness probe. Transport outcomes
//! (received frames, failed sends, probe verdicts) come back in through the
//! same handle, so every state change is serialized on the reactor task.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use meridian_id::Id;

use crate::error::{Error, Result};
use crate::handle::{Liveness, NodeHandle};
use crate::node::{Effect, Event, Node, NodeSnapshot, RouteRequest, Timer};
use crate::wire::{Priority, WireMessage};

/// Outbound side of a node's network.
pub trait Transport: Send + Sync + 'static {
    /// Hand an encoded frame to the network. Failures are reported back
    /// through [`ReactorHandle::send_failed`].
    fn send(&self, to: &NodeHandle, frame: Vec<u8>, priority: Priority);

    /// Start a liveness probe. The verdict is reported back through
    /// [`ReactorHandle::report_liveness`].
    fn check_liveness(&self, handle: &NodeHandle);
}

enum Command {
    Event(Event),
    Snapshot(oneshot::Sender<NodeSnapshot>),
    Shutdown,
}

/// Cloneable client for a running reactor.
#[derive(Debug, Clone)]
pub struct ReactorHandle {
    local: NodeHandle,
    tx: mpsc::UnboundedSender<Command>,
}

impl ReactorHandle {
    pub fn local(&self) -> &NodeHandle {
        &self.local
    }

    fn submit(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| Error::ReactorClosed)
    }

    pub fn route(&self, request: RouteRequest) -> Result<()> {
        self.submit(Command::Event(Event::Route(request)))
    }

    /// A frame arrived from the network.
    pub fn deliver_bytes(&self, frame: Vec<u8>) -> Result<()> {
        self.submit(Command::Event(Event::Frame(frame)))
    }

    pub fn report_liveness(&self, id: Id, liveness: Liveness) -> Result<()> {
        self.submit(Command::Event(Event::LivenessChanged { id, liveness }))
    }

    pub fn report_proximity(&self, id: Id, proximity: u32) -> Result<()> {
        self.submit(Command::Event(Event::ProximityMeasured { id, proximity }))
    }

    /// A frame handed to [`Transport::send`] could not be delivered.
    pub fn send_failed(&self, to: NodeHandle, frame: &[u8]) -> Result<()> {
        let message = WireMessage::decode(frame)?;
        self.submit(Command::Event(Event::SendFailed { to, message }))
    }

    /// Copy of the node's current routing state.
    pub async fn snapshot(&self) -> Result<NodeSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.submit(Command::Snapshot(tx))?;
        rx.await.map_err(|_| Error::ReactorClosed)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.submit(Command::Shutdown)
    }
}

/// Drives one node on a tokio task.
pub struct Reactor<T: Transport> {
    node: Node,
    transport: Arc<T>,
    rx: mpsc::UnboundedReceiver<Command>,
    started: Instant,
}

impl<T: Transport> Reactor<T> {
    /// Spawn the reactor onto the current runtime.
    pub fn spawn(node: Node, transport: Arc<T>) -> (ReactorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ReactorHandle {
            local: *node.local(),
            tx,
        };
        let reactor = Self {
            node,
            transport,
            rx,
            started: Instant::now(),
        };
        (handle, tokio::spawn(reactor.run()))
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    async fn run(mut self) {
        let config = self.node.config().clone();
        let mut ping = interval(config.ping_neighbor_period);
        let mut maintain = interval(config.maintenance_period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        maintain.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Both intervals fire immediately; a fresh node has nothing to maintain
        ping.tick().await;
        maintain.tick().await;

        info!("Reactor for {} running", self.node.local());

        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(Command::Event(event)) => self.apply(event),
                    Some(Command::Snapshot(reply)) => {
                        let _ = reply.send(self.node.snapshot());
                    }
                    Some(Command::Shutdown) | None => break,
                },
                _ = ping.tick() => self.apply(Event::Timer(Timer::PingNeighbor)),
                _ = maintain.tick() => self.apply(Event::Timer(Timer::MaintainLeafSet)),
            }
        }

        info!("Reactor for {} stopped", self.node.local());
    }

    fn apply(&mut self, event: Event) {
        let now = self.now_ms();
        self.node.handle_event(event, now);
        self.flush();
    }

    /// Carry out queued effects, maintenance traffic first.
    fn flush(&mut self) {
        let mut effects = self.node.drain_effects();
        effects.sort_by_key(|e| std::cmp::Reverse(e.priority()));
        for effect in effects {
            match effect {
                Effect::Send { to, message } => match message.encode() {
                    Ok(frame) => self.transport.send(&to, frame, message.priority()),
                    Err(e) => warn!("Failed to encode {} for {}: {}", message.kind(), to, e),
                },
                Effect::CheckLiveness(handle) => {
                    debug!("Probing {}", handle);
                    self.transport.check_liveness(&handle);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Application;
    use crate::config::NodeConfig;
    use crate::envelope::AppAddress;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Routes frames between reactors in the same process.
    #[derive(Default)]
    struct Loopback {
        peers: Mutex<HashMap<Id, ReactorHandle>>,
    }

    impl Loopback {
        fn attach(&self, handle: ReactorHandle) {
            self.peers.lock().unwrap().insert(handle.local().id(), handle);
        }
    }

    impl Transport for Loopback {
        fn send(&self, to: &NodeHandle, frame: Vec<u8>, _priority: Priority) {
            if let Some(peer) = self.peers.lock().unwrap().get(&to.id()) {
                let _ = peer.deliver_bytes(frame);
            }
        }

        fn check_liveness(&self, _handle: &NodeHandle) {}
    }

    struct Inbox(mpsc::UnboundedSender<(Id, Vec<u8>)>);

    impl Application for Inbox {
        fn deliver(&mut self, key: &Id, payload: &[u8]) {
            let _ = self.0.send((*key, payload.to_vec()));
        }
    }

    const APP: AppAddress = AppAddress(3);

    fn node(v: u128) -> (Node, mpsc::UnboundedReceiver<(Id, Vec<u8>)>) {
        let config = NodeConfig::default()
            .with_leaf_set_size(4)
            .with_ping_neighbor_period(Duration::from_secs(3600))
            .with_maintenance_period(Duration::from_secs(3600));
        let mut node = Node::new(config, NodeHandle::new(Id::new(v))).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        node.register(APP, Box::new(Inbox(tx)));
        (node, rx)
    }

    #[tokio::test]
    async fn two_nodes_exchange_leaf_sets_and_route() {
        let transport = Arc::new(Loopback::default());
        let (a, mut a_rx) = node(0x1000);
        let (b, _b_rx) = node(0x9000);
        let (a, _) = Reactor::spawn(a, transport.clone());
        let (b, _) = Reactor::spawn(b, transport.clone());
        transport.attach(a.clone());
        transport.attach(b.clone());

        // b asks a for its leaf set; a answers and learns b on the way
        let request = WireMessage::RequestLeafSet(crate::wire::RequestLeafSet {
            return_handle: *b.local(),
            timestamp: 0,
        });
        a.deliver_bytes(request.encode().unwrap()).unwrap();

        let mut joined = false;
        for _ in 0..50 {
            let snap = b.snapshot().await.unwrap();
            if snap.leaf_set.member(&Id::new(0x1000)) {
                joined = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(joined);

        // a knows nobody, so anything b forwards to it terminates there
        b.route(RouteRequest::new(Id::new(0x1001), APP, b"ping".to_vec())).unwrap();
        let delivered = tokio::time::timeout(Duration::from_secs(1), a_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered, (Id::new(0x1001), b"ping".to_vec()));
    }

    #[tokio::test]
    async fn closed_reactor_reports_error() {
        let (n, _rx) = node(0x1000);
        let (handle, task) = Reactor::spawn(n, Arc::new(Loopback::default()));
        tokio_test::assert_ok!(handle.shutdown());
        task.await.unwrap();
        tokio_test::assert_err!(handle.deliver_bytes(vec![1]));
        assert!(matches!(handle.snapshot().await, Err(Error::ReactorClosed)));
        assert!(matches!(
            handle.route(RouteRequest::new(Id::new(1), APP, vec![])),
            Err(Error::ReactorClosed)
        ));
    }
}
