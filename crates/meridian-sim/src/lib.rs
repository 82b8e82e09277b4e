//! Meridian Overlay Simulation
//!
//! Runs many [`meridian_routing::Node`]s in one process over a lossless FIFO
//! network, without a runtime. Nodes can be added and killed at will; the
//! simulation answers liveness probes with the truth and bounces frames
//! sent to dead nodes, so the maintenance protocol can be observed
//! converging step by step.
//!
//! # Usage
//!
//! ```
//! use meridian_id::Id;
//! use meridian_sim::{Simulation, SimulationConfig};
//!
//! let mut sim = Simulation::new(SimulationConfig::default());
//! for v in [10u128, 20, 30] {
//!     sim.add_node(Id::new(v)).unwrap();
//! }
//! sim.route(&Id::new(10), Id::new(29), b"hello").unwrap();
//! assert_eq!(sim.deliveries()[0].node, Id::new(30));
//! ```

mod error;
mod events;
mod simulation;

pub use error::{Result, SimError};
pub use events::{Delivery, HopStats, SimEvent};
pub use simulation::{Simulation, SimulationConfig, SIM_APP};
