// Mesh service: runs a MeshNode on a single tokio task
//
// Every transport event, periodic sweep, timer expiry and API call is a
// message into one actor loop, so protocol handlers never run concurrently.

use crate::events::MeshEvent;
use crate::node::MeshNode;
use crate::protocol::TimerToken;
use crate::topology::VertexId;
use crate::transport::TransportEvent;
use crate::{current_timestamp_ms, MeshError};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

/// Capacity of the observer event channel; slow subscribers see `Lagged`
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Commands sent to the mesh actor
#[derive(Debug)]
pub enum MeshCommand {
    /// Send a chat message, directly or routed
    SendChat {
        target: VertexId,
        message: String,
        reply: mpsc::Sender<Result<(), MeshError>>,
    },
    /// Current direct neighbors
    Neighbors { reply: mpsc::Sender<Vec<VertexId>> },
    /// Every vertex in the graph except ourselves
    KnownVertices { reply: mpsc::Sender<Vec<VertexId>> },
    /// Hops to a target, if reachable
    Route {
        target: VertexId,
        reply: mpsc::Sender<Option<Vec<VertexId>>>,
    },
    /// A ping timeout armed earlier has expired
    TimerFired(TimerToken),
    /// Stop the actor
    Shutdown,
}

/// Handle for talking to a running mesh service
#[derive(Clone)]
pub struct MeshHandle {
    command_tx: mpsc::Sender<MeshCommand>,
    events_tx: broadcast::Sender<MeshEvent>,
}

impl MeshHandle {
    pub async fn send_chat(
        &self,
        target: VertexId,
        message: impl Into<String>,
    ) -> Result<(), MeshError> {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.command_tx
            .send(MeshCommand::SendChat {
                target,
                message: message.into(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| MeshError::ServiceStopped)?;

        reply_rx.recv().await.ok_or(MeshError::ServiceStopped)?
    }

    pub async fn neighbors(&self) -> Result<Vec<VertexId>, MeshError> {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.command_tx
            .send(MeshCommand::Neighbors { reply: reply_tx })
            .await
            .map_err(|_| MeshError::ServiceStopped)?;

        reply_rx.recv().await.ok_or(MeshError::ServiceStopped)
    }

    pub async fn known_vertices(&self) -> Result<Vec<VertexId>, MeshError> {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.command_tx
            .send(MeshCommand::KnownVertices { reply: reply_tx })
            .await
            .map_err(|_| MeshError::ServiceStopped)?;

        reply_rx.recv().await.ok_or(MeshError::ServiceStopped)
    }

    pub async fn route_to(&self, target: VertexId) -> Result<Option<Vec<VertexId>>, MeshError> {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.command_tx
            .send(MeshCommand::Route {
                target,
                reply: reply_tx,
            })
            .await
            .map_err(|_| MeshError::ServiceStopped)?;

        reply_rx.recv().await.ok_or(MeshError::ServiceStopped)
    }

    /// Observer stream of everything the node reports
    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.events_tx.subscribe()
    }

    pub async fn shutdown(&self) -> Result<(), MeshError> {
        self.command_tx
            .send(MeshCommand::Shutdown)
            .await
            .map_err(|_| MeshError::ServiceStopped)
    }
}

async fn send_reply<T>(reply: mpsc::Sender<T>, value: T, command: &str) {
    if reply.send(value).await.is_err() {
        debug!("Caller of {} went away before the reply", command);
    }
}

/// Spawn the actor that owns `node` and return a handle to it.
///
/// Must be called from within a tokio runtime. The actor stops on
/// `Shutdown` or once every `MeshHandle` has been dropped.
pub fn start_mesh_service(
    node: MeshNode,
    mut transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
) -> MeshHandle {
    let (command_tx, mut command_rx) = mpsc::channel(64);
    let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    let handle = MeshHandle {
        command_tx: command_tx.clone(),
        events_tx: events_tx.clone(),
    };
    // Timers only keep the actor alive while a handle does
    let timer_tx = command_tx.downgrade();
    drop(command_tx);

    tokio::spawn(async move {
        let mut node = node;
        let mut liveness = tokio::time::interval(node.config().liveness_sweep());
        let mut exchange = tokio::time::interval(node.config().exchange_sweep());
        // Both intervals tick immediately; the first real sweep is one period out
        liveness.tick().await;
        exchange.tick().await;

        info!("Mesh service started for {}", node.self_id());

        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    let Some(command) = command else {
                        debug!("All mesh handles dropped");
                        break;
                    };
                    match command {
                        MeshCommand::SendChat { target, message, reply } => {
                            let result = node.send_chat(&message, &target);
                            send_reply(reply, result, "send_chat").await;
                        }
                        MeshCommand::Neighbors { reply } => {
                            send_reply(reply, node.neighbors(), "neighbors").await;
                        }
                        MeshCommand::KnownVertices { reply } => {
                            send_reply(reply, node.known_vertices(), "known_vertices").await;
                        }
                        MeshCommand::Route { target, reply } => {
                            send_reply(reply, node.route_to(&target), "route").await;
                        }
                        MeshCommand::TimerFired(token) => {
                            node.on_timer(token, current_timestamp_ms());
                        }
                        MeshCommand::Shutdown => {
                            info!("Mesh service shutting down");
                            break;
                        }
                    }
                }

                Some(event) = transport_rx.recv() => {
                    debug!("Transport event: {}", event);
                    if let Err(e) = node.handle_transport_event(event, current_timestamp_ms()) {
                        debug!("Transport event dropped: {}", e);
                    }
                }

                _ = liveness.tick() => {
                    node.run_liveness_sweep(current_timestamp_ms());
                }

                _ = exchange.tick() => {
                    node.run_exchange_maintenance(current_timestamp_ms());
                }
            }

            for request in node.drain_timer_requests() {
                let timer_tx = timer_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(request.after).await;
                    if let Some(tx) = timer_tx.upgrade() {
                        let _ = tx.send(MeshCommand::TimerFired(request.token)).await;
                    }
                });
            }

            for event in node.drain_events() {
                // Err only means nobody is subscribed
                let _ = events_tx.send(event);
            }
        }
    });

    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeshConfig;
    use crate::topology::Identity;
    use crate::transport::{MemoryHub, PeerHandle};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_abandoned_reply_does_not_stop_service() {
        let hub = MemoryHub::new(512);
        let (transport, inbox) = hub.register(PeerHandle::new("ble-a"));
        let identity = Identity::with_id("alice", "a1").unwrap();
        let node = MeshNode::new(identity, MeshConfig::default(), Arc::new(transport), 0).unwrap();
        let handle = start_mesh_service(node, inbox);

        let (reply_tx, reply_rx) = mpsc::channel(1);
        drop(reply_rx);
        handle
            .command_tx
            .send(MeshCommand::Neighbors { reply: reply_tx })
            .await
            .unwrap();

        assert_eq!(handle.neighbors().await, Ok(Vec::new()));
        handle.shutdown().await.unwrap();
    }
}
