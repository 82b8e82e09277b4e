//! Simulation timeline.

use meridian_id::Id;
use serde::{Deserialize, Serialize};

/// Something that happened during a simulation.
///
/// `step` is the number of network steps processed when the event was
/// recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimEvent {
    /// A node was created, bootstrapped from the closest live node if any.
    NodeJoined {
        node: Id,
        bootstrap: Option<Id>,
        step: u64,
    },

    /// A node stopped responding.
    NodeKilled { node: Id, step: u64 },

    /// A routed message reached its terminus.
    Delivered {
        node: Id,
        key: Id,
        message: u64,
        hops: u32,
        step: u64,
    },

    /// `peer` entered or left `node`'s leaf set.
    LeafSetChanged {
        node: Id,
        peer: Id,
        joined: bool,
        step: u64,
    },
}

impl SimEvent {
    pub fn step(&self) -> u64 {
        match self {
            SimEvent::NodeJoined { step, .. } => *step,
            SimEvent::NodeKilled { step, .. } => *step,
            SimEvent::Delivered { step, .. } => *step,
            SimEvent::LeafSetChanged { step, .. } => *step,
        }
    }
}

/// One delivered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    /// Sequence number assigned by [`Simulation::route`](crate::Simulation::route).
    pub message: u64,
    pub key: Id,
    /// The node that delivered it.
    pub node: Id,
    pub hops: u32,
    pub payload: Vec<u8>,
}

/// Hop counts over a set of deliveries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HopStats {
    pub count: usize,
    pub mean: f64,
    pub max: u32,
}

impl HopStats {
    pub fn from_deliveries(deliveries: &[Delivery]) -> Self {
        if deliveries.is_empty() {
            return Self::default();
        }
        let total: u64 = deliveries.iter().map(|d| u64::from(d.hops)).sum();
        Self {
            count: deliveries.len(),
            mean: total as f64 / deliveries.len() as f64,
            max: deliveries.iter().map(|d| d.hops).max().unwrap_or(0),
        }
    }
}
