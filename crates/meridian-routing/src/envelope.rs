//! The routable envelope.

use std::fmt;

use meridian_id::Id;
use serde::{Deserialize, Serialize};

use crate::handle::NodeHandle;

/// Address of an application registered on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppAddress(pub u32);

impl AppAddress {
    /// Derive an address from an application name.
    pub fn named(name: &str) -> Self {
        let digest = Id::hash(name.as_bytes()).to_bytes();
        Self(u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]))
    }
}

impl fmt::Display for AppAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "app:{:08x}", self.0)
    }
}

/// Per-envelope delivery options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOptions {
    /// Re-resolve the next hop if the chosen one turns out unreachable.
    pub reroute_on_failure: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            reroute_on_failure: true,
        }
    }
}

/// Result of consuming the next-hop cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStep {
    /// No hop was resolved; nothing happened.
    NotReady,
    /// The local node is the terminus.
    Deliver,
    /// Hand the envelope to this node.
    Transmit(NodeHandle),
}

/// A payload travelling toward the node closest to `target`.
///
/// The next-hop cache is resolved immediately before each transmission and
/// consumed by [`route_step`](Self::route_step). It is never serialized,
/// so every receiving node starts unresolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEnvelope {
    target: Id,
    destination: AppAddress,
    #[serde(with = "serde_bytes")]
    payload: Vec<u8>,
    options: SendOptions,
    aux: Option<AppAddress>,
    prev_hop: Option<NodeHandle>,
    hops: u32,
    #[serde(skip)]
    next_hop: Option<NodeHandle>,
}

impl RouteEnvelope {
    pub fn new(target: Id, destination: AppAddress, payload: Vec<u8>) -> Self {
        Self {
            target,
            destination,
            payload,
            options: SendOptions::default(),
            aux: None,
            prev_hop: None,
            hops: 0,
            next_hop: None,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: SendOptions) -> Self {
        self.options = options;
        self
    }

    /// Ask `aux` rather than the destination application at every hop.
    #[must_use]
    pub fn with_aux(mut self, aux: AppAddress) -> Self {
        self.aux = Some(aux);
        self
    }

    pub fn target(&self) -> &Id {
        &self.target
    }

    pub fn destination(&self) -> AppAddress {
        self.destination
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn options(&self) -> &SendOptions {
        &self.options
    }

    pub fn aux(&self) -> Option<AppAddress> {
        self.aux
    }

    /// The node that last transmitted this envelope.
    pub fn prev_hop(&self) -> Option<&NodeHandle> {
        self.prev_hop.as_ref()
    }

    pub fn set_prev_hop(&mut self, handle: NodeHandle) {
        self.prev_hop = Some(handle);
    }

    /// Transmissions so far.
    pub fn hops(&self) -> u32 {
        self.hops
    }

    pub fn next_hop(&self) -> Option<&NodeHandle> {
        self.next_hop.as_ref()
    }

    pub fn set_next_hop(&mut self, handle: NodeHandle) {
        self.next_hop = Some(handle);
    }

    /// Drop a resolved hop without using it.
    pub fn clear_next_hop(&mut self) {
        self.next_hop = None;
    }

    /// Consume the resolved hop.
    ///
    /// Calling this with an empty cache is a no-op returning
    /// [`RouteStep::NotReady`].
    pub fn route_step(&mut self, local: &Id) -> RouteStep {
        match self.next_hop.take() {
            None => RouteStep::NotReady,
            Some(hop) if hop.id() == *local => RouteStep::Deliver,
            Some(hop) => {
                self.hops = self.hops.saturating_add(1);
                RouteStep::Transmit(hop)
            }
        }
    }
}
