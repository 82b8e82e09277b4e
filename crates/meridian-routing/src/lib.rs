//! Meridian Routing
//!
//! Prefix routing for the Meridian overlay. Each node keeps two structures:
//!
//! - A **routing table** of rows × 2^b cells. Row `r` holds nodes that share
//!   the local identifier down to digit `r` and differ there; a message for
//!   a key is forwarded to the cell named by the key's digit at the most
//!   significant digit where key and local node differ.
//! - A **leaf set** of the L/2 numerically nearest nodes on each side of
//!   the local identifier. Keys within its span go straight to the closest
//!   member, which is how a message finds its terminus.
//!
//! # Layering
//!
//! ```text
//!   reactor   tokio task, timers, transport
//!      |
//!   node      event in, effects out; maintenance protocol
//!      |
//!   router    leaf set ─ routing table ─ alternate ─ fallback
//!      |
//!   leafset / table / bucket / handle
//! ```
//!
//! [`Node`] is a pure state machine; the simulator in `meridian-sim` drives
//! thousands of them deterministically without a runtime.

pub mod app;
pub mod bucket;
pub mod config;
pub mod envelope;
pub mod error;
pub mod handle;
pub mod leafset;
pub mod node;
pub mod reactor;
pub mod router;
pub mod table;
pub mod wire;

pub use app::Application;
pub use bucket::{BucketInsert, RouteBucket};
pub use config::{NodeConfig, MAX_LEAF_SET_SIZE};
pub use envelope::{AppAddress, RouteEnvelope, RouteStep, SendOptions};
pub use error::{ConfigError, Error, Result, WireError};
pub use handle::{HandleTable, Liveness, NodeHandle, Subscriber, ROUTABLE, UNKNOWN_PROXIMITY};
pub use leafset::{LeafSet, MergeMode, MergeOutcome, Side, SimilarSet};
pub use node::{Effect, Event, Node, NodeSnapshot, RouteRequest, Timer};
pub use reactor::{Reactor, ReactorHandle, Transport};
pub use router::{route_table_hole, HopKind, Resolution, Router};
pub use table::RoutingTable;
pub use wire::{BroadcastKind, BroadcastLeafSet, BroadcastRouteRow, Priority, RequestLeafSet, WireMessage};

pub use meridian_id::Id;
