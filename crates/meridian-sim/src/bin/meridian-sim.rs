//! Meridian overlay simulator
//!
//! Builds a ring of N nodes, routes M random keys and reports hop counts.
//!
//! ```text
//! meridian-sim [nodes] [lookups] [timeline.json]
//! ```

use std::env;

use meridian_id::Id;
use meridian_sim::{Simulation, SimulationConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meridian=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = env::args().collect();

    let node_count: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(64);
    let lookups: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(200);
    let timeline = args.get(3);
    if node_count == 0 {
        return Err("need at least one node".into());
    }

    let config = SimulationConfig::default();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut sim = Simulation::new(config);

    println!("Meridian Overlay Simulator");
    println!("==========================");
    println!();
    println!("Building ring with {} nodes...", node_count);

    for i in 0..node_count {
        sim.add_node(Id::new(rng.gen()))?;
        if (i + 1) % 100 == 0 {
            println!("  Added {} nodes...", i + 1);
        }
    }
    for _ in 0..3 {
        sim.tick_ping()?;
        sim.tick_maintenance()?;
    }

    let origins: Vec<Id> = sim.live_nodes().copied().collect();
    let mut misrouted = 0;
    for _ in 0..lookups {
        let from = origins[rng.gen_range(0..origins.len())];
        let key = Id::new(rng.gen());
        let seq = sim.route(&from, key, b"lookup")?;
        let delivered = sim.deliveries().iter().find(|d| d.message == seq).map(|d| d.node);
        if delivered != sim.closest_live(&key) {
            misrouted += 1;
        }
    }

    let stats = sim.hop_stats();
    println!();
    println!("Simulation complete:");
    println!("  Nodes:      {}", sim.live_count());
    println!("  Events:     {}", sim.events().len());
    println!("  Delivered:  {} / {}", stats.count, lookups);
    println!("  Misrouted:  {}", misrouted);
    println!("  Mean hops:  {:.2}", stats.mean);
    println!("  Max hops:   {}", stats.max);

    if let Some(path) = timeline {
        std::fs::write(path, sim.timeline_json()?)?;
        println!("  Timeline:   {}", path);
    }

    Ok(())
}
