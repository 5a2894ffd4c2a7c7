// In-process mesh simulation
//
// Spins up one mesh service per node on a shared memory hub, wires them in
// the requested shape, waits for every node to learn the whole graph and
// then routes a chat message from the first node to the last.

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use colored::*;
use hopmesh_core::{
    current_timestamp_ms, start_mesh_service, Identity, MemoryHub, MeshConfig, MeshEvent,
    MeshHandle, MeshNode, PeerHandle, VertexId,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Topology {
    /// node0 - node1 - ... - nodeN
    Chain,
    /// node0 in the middle, every other node a leaf
    Star,
    /// A chain whose ends are linked too
    Ring,
}

impl Topology {
    /// Links to establish, as (central, peripheral) node indexes
    pub fn links(self, nodes: usize) -> Vec<(usize, usize)> {
        match self {
            Topology::Chain => (1..nodes).map(|i| (i - 1, i)).collect(),
            Topology::Star => (1..nodes).map(|i| (0, i)).collect(),
            Topology::Ring => {
                let mut links: Vec<_> = (1..nodes).map(|i| (i - 1, i)).collect();
                if nodes > 2 {
                    links.push((nodes - 1, 0));
                }
                links
            }
        }
    }
}

pub struct SimulationOptions {
    pub nodes: usize,
    pub topology: Topology,
    /// Upper bound for each wait (convergence, delivery)
    pub timeout: Duration,
    pub message: String,
}

/// Outcome of a finished run
#[derive(Debug)]
pub struct SimulationReport {
    pub converged: bool,
    /// Hops from the first node to the last, last node included
    pub route: Vec<VertexId>,
    pub delivered: bool,
}

struct SimNode {
    id: VertexId,
    link: PeerHandle,
    handle: MeshHandle,
}

/// Same limits as `base`, but exchange sweeps every second so multi-hop
/// knowledge spreads quickly.
pub fn simulation_config(base: &MeshConfig) -> MeshConfig {
    MeshConfig {
        exchange_sweep_secs: 1,
        last_exchange_interval_secs: 1,
        ..base.clone()
    }
}

fn spawn_node(hub: &MemoryHub, index: usize, config: &MeshConfig) -> Result<SimNode> {
    let link = PeerHandle::new(format!("mem-{}", index));
    let (transport, inbox) = hub.register(link.clone());

    let identity = Identity::generate(&format!("node{}", index))?;
    let id = identity.vertex_id();
    let node = MeshNode::new(
        identity,
        config.clone(),
        Arc::new(transport),
        current_timestamp_ms(),
    )?;

    let handle = start_mesh_service(node, inbox);
    debug!("Spawned {} on {}", id, link);

    Ok(SimNode { id, link, handle })
}

/// Poll until every node knows every other node, or `limit` runs out
async fn wait_for_convergence(nodes: &[SimNode], limit: Duration) -> Result<bool> {
    let started = Instant::now();
    let expected = nodes.len() - 1;

    loop {
        let mut converged = true;
        for node in nodes {
            if node.handle.known_vertices().await?.len() < expected {
                converged = false;
                break;
            }
        }
        if converged {
            return Ok(true);
        }
        if started.elapsed() >= limit {
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

async fn wait_for_message(
    events: &mut broadcast::Receiver<MeshEvent>,
    text: &str,
    limit: Duration,
) -> bool {
    let delivered = tokio::time::timeout(limit, async {
        loop {
            match events.recv().await {
                Ok(MeshEvent::MessageReceived(msg)) if msg.message == text => return true,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return false,
            }
        }
    })
    .await;
    delivered.unwrap_or(false)
}

pub async fn run(options: &SimulationOptions, base: &MeshConfig) -> Result<SimulationReport> {
    if options.nodes < 2 {
        bail!("A simulation needs at least 2 nodes");
    }
    let config = simulation_config(base);
    config.validate()?;

    println!(
        "{}",
        format!(
            "Simulating a {:?} mesh of {} nodes",
            options.topology, options.nodes
        )
        .bold()
    );
    println!();

    let hub = MemoryHub::new(config.max_transport_payload);
    let mut nodes = Vec::with_capacity(options.nodes);
    for index in 0..options.nodes {
        nodes.push(spawn_node(&hub, index, &config)?);
    }

    for (central, peripheral) in options.topology.links(options.nodes) {
        if !hub.connect(&nodes[central].link, &nodes[peripheral].link) {
            bail!("Could not link node{} and node{}", central, peripheral);
        }
        println!(
            "  {} {} <-> {}",
            "✓".green(),
            nodes[central].id.display_name().bright_cyan(),
            nodes[peripheral].id.display_name().bright_cyan()
        );
    }
    println!();

    let started = Instant::now();
    let converged = wait_for_convergence(&nodes, options.timeout).await?;
    if converged {
        println!(
            "  {} Converged in {:.1}s",
            "✓".green(),
            started.elapsed().as_secs_f64()
        );
    } else {
        println!(
            "  {} Not fully converged after {}s",
            "⚠".yellow(),
            options.timeout.as_secs()
        );
    }
    info!("Convergence wait finished (converged: {})", converged);

    for node in &nodes {
        let known = node.handle.known_vertices().await?;
        let neighbors = node.handle.neighbors().await?;
        println!(
            "    {:<8} knows {:>3}   neighbors {:>3}",
            node.id.display_name(),
            known.len(),
            neighbors.len()
        );
    }
    println!();

    let first = &nodes[0];
    let last = &nodes[nodes.len() - 1];
    let route = first
        .handle
        .route_to(last.id.clone())
        .await?
        .with_context(|| format!("{} has no route to {}", first.id, last.id))?;

    let path: Vec<String> = std::iter::once(first.id.display_name().to_string())
        .chain(route.iter().map(|hop| hop.display_name().to_string()))
        .collect();
    println!("{}", "Route".bold());
    println!("  {} ({} hops)", path.join(" → ").bright_cyan(), route.len());

    let mut inbox = last.handle.subscribe();
    first
        .handle
        .send_chat(last.id.clone(), options.message.clone())
        .await?;
    let delivered = wait_for_message(&mut inbox, &options.message, options.timeout).await;
    if delivered {
        println!(
            "  {} Delivered to {}: {}",
            "✓".green(),
            last.id.display_name().bright_cyan(),
            options.message
        );
    } else {
        println!("  {} Message was not delivered", "✗".red());
    }

    for node in &nodes {
        node.handle.shutdown().await?;
    }

    Ok(SimulationReport {
        converged,
        route,
        delivered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_links() {
        assert_eq!(Topology::Chain.links(3), vec![(0, 1), (1, 2)]);
        assert_eq!(Topology::Star.links(4), vec![(0, 1), (0, 2), (0, 3)]);
        assert_eq!(Topology::Ring.links(4), vec![(0, 1), (1, 2), (2, 3), (3, 0)]);
        // Two nodes already form the whole ring
        assert_eq!(Topology::Ring.links(2), vec![(0, 1)]);
    }

    #[test]
    fn test_simulation_config_keeps_limits() {
        let base = MeshConfig {
            max_segment_size: 200,
            ..Default::default()
        };
        let config = simulation_config(&base);
        assert_eq!(config.max_segment_size, 200);
        assert_eq!(config.exchange_sweep_secs, 1);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_chain_simulation_routes_end_to_end() {
        let options = SimulationOptions {
            nodes: 3,
            topology: Topology::Chain,
            timeout: Duration::from_secs(20),
            message: "end to end".to_string(),
        };
        let report = run(&options, &MeshConfig::default()).await.unwrap();

        assert!(report.converged);
        assert!(report.delivered);
        assert_eq!(report.route.len(), 2);
    }

    #[tokio::test]
    async fn test_star_simulation_converges() {
        let options = SimulationOptions {
            nodes: 4,
            topology: Topology::Star,
            timeout: Duration::from_secs(20),
            message: "around the hub".to_string(),
        };
        let report = run(&options, &MeshConfig::default()).await.unwrap();

        // Leaves only count once they learned each other through the hub
        assert!(report.converged);
        assert!(report.delivered);
        assert_eq!(report.route.len(), 1);
    }

    #[tokio::test]
    async fn test_single_node_rejected() {
        let options = SimulationOptions {
            nodes: 1,
            topology: Topology::Star,
            timeout: Duration::from_secs(1),
            message: String::new(),
        };
        assert!(run(&options, &MeshConfig::default()).await.is_err());
    }
}
