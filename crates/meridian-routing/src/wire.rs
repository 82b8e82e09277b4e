//! Wire messages and framing.
//!
//! # Frame Format
//!
//! ```text
//! +---------+------------------------------+
//! | version | bincode(WireMessage)         |
//! | 1 byte  | variable                     |
//! +---------+------------------------------+
//! ```
//!
//! A frame with an unknown version byte is rejected on its own; the
//! receiving node drops it and keeps running.

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::envelope::RouteEnvelope;
use crate::error::WireError;
use crate::handle::NodeHandle;
use crate::leafset::LeafSet;

/// Current frame version.
pub const WIRE_VERSION: u8 = 1;

/// Upper bound on a decoded frame body.
pub const MAX_FRAME_BYTES: u64 = 4 * 1024 * 1024;

/// Send priority. Maintenance traffic goes out before routed payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Normal,
    High,
}

/// Why a leaf set is being pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BroadcastKind {
    /// Periodic or on-request refresh.
    Update,
    /// Sent to a joining node by its closest existing node.
    JoinInitial,
    /// Sent by a newly joined node to its neighbors.
    JoinAdvertise,
    /// Sent to neighbors the sender believes are missing members.
    Correction,
}

/// A node's full leaf set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastLeafSet {
    pub kind: BroadcastKind,
    pub from: NodeHandle,
    pub leaf_set: LeafSet,
    /// Sender clock in milliseconds, echoed for correlation.
    pub timestamp: u64,
}

/// Ask `return_handle`'s peer to send back its leaf set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLeafSet {
    pub return_handle: NodeHandle,
    pub timestamp: u64,
}

/// One routing-table row, offered to a node that appears to lack it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastRouteRow {
    pub from: NodeHandle,
    pub row: usize,
    pub handles: Vec<NodeHandle>,
}

/// Everything one node sends another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireMessage {
    Route(RouteEnvelope),
    BroadcastLeafSet(BroadcastLeafSet),
    RequestLeafSet(RequestLeafSet),
    BroadcastRouteRow(BroadcastRouteRow),
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_FRAME_BYTES)
}

impl WireMessage {
    pub fn priority(&self) -> Priority {
        match self {
            Self::Route(_) => Priority::Normal,
            _ => Priority::High,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Route(_) => "route",
            Self::BroadcastLeafSet(_) => "broadcast-leaf-set",
            Self::RequestLeafSet(_) => "request-leaf-set",
            Self::BroadcastRouteRow(_) => "broadcast-route-row",
        }
    }

    /// Frame the message with the current version byte.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let body = codec().serialize(self)?;
        let mut frame = Vec::with_capacity(body.len() + 1);
        frame.push(WIRE_VERSION);
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Parse and validate a frame.
    pub fn decode(frame: &[u8]) -> Result<Self, WireError> {
        let (&version, body) = frame.split_first().ok_or(WireError::Empty)?;
        if version != WIRE_VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }
        let message: WireMessage = codec().deserialize(body)?;
        message.validate()?;
        Ok(message)
    }

    fn validate(&self) -> Result<(), WireError> {
        match self {
            Self::BroadcastLeafSet(b) => {
                if !b.leaf_set.is_well_formed() {
                    return Err(WireError::Invalid("malformed leaf set"));
                }
                if b.leaf_set.base_id() != b.from.id() {
                    return Err(WireError::Invalid("leaf set base does not match sender"));
                }
                Ok(())
            }
            Self::BroadcastRouteRow(r) => {
                if r.row >= meridian_id::ID_BITS as usize {
                    return Err(WireError::Invalid("route row out of range"));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
