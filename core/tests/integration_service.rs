// Integration test: mesh service actors over the in-memory hub
//
// Real tokio tasks, real clock; sweep intervals are shortened so
// convergence and eviction happen within a few seconds.

use hopmesh_core::{
    current_timestamp_ms, start_mesh_service, ExchangeDirection, Identity, MemoryHub, MeshConfig,
    MeshError, MeshEvent, MeshHandle, MeshNode, PeerHandle, VertexId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{sleep, timeout};

fn id(name: &str) -> VertexId {
    VertexId::from_full_name(format!("{}#{}-id", name, name))
}

fn start(hub: &MemoryHub, name: &str, config: MeshConfig) -> (MeshHandle, PeerHandle) {
    let link = PeerHandle::new(format!("ble-{}", name));
    let (transport, inbox) = hub.register(link.clone());
    let identity = Identity::with_id(name, format!("{}-id", name)).unwrap();
    let node = MeshNode::new(identity, config, Arc::new(transport), current_timestamp_ms()).unwrap();
    (start_mesh_service(node, inbox), link)
}

async fn wait_for(
    events: &mut broadcast::Receiver<MeshEvent>,
    wanted: impl Fn(&MeshEvent) -> bool,
) -> MeshEvent {
    timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(event) if wanted(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for mesh event")
}

fn fast_config() -> MeshConfig {
    MeshConfig {
        exchange_sweep_secs: 1,
        last_exchange_interval_secs: 1,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_service_delivers_direct_chat() {
    tracing_subscriber::fmt()
        .with_env_filter("warn")
        .try_init()
        .ok();

    let hub = MemoryHub::new(512);
    let (alice, alice_link) = start(&hub, "alice", MeshConfig::default());
    let (bob, bob_link) = start(&hub, "bob", MeshConfig::default());
    let mut alice_events = alice.subscribe();
    let mut bob_events = bob.subscribe();

    assert!(hub.connect(&alice_link, &bob_link));
    wait_for(&mut alice_events, |e| {
        matches!(
            e,
            MeshEvent::ExchangeCompleted {
                direction: ExchangeDirection::Inbound,
                ..
            }
        )
    })
    .await;

    assert_eq!(alice.neighbors().await.unwrap(), vec![id("bob")]);
    assert_eq!(alice.known_vertices().await.unwrap(), vec![id("bob")]);

    alice.send_chat(id("bob"), "hello over the air").await.unwrap();
    let received = wait_for(&mut bob_events, |e| matches!(e, MeshEvent::MessageReceived(_))).await;
    match received {
        MeshEvent::MessageReceived(msg) => {
            assert_eq!(msg.message, "hello over the air");
            assert_eq!(msg.sender, id("alice").as_str());
        }
        other => panic!("unexpected event {}", other),
    }

    let missing = alice.send_chat(id("nobody"), "?").await;
    assert_eq!(missing, Err(MeshError::NoRoute(id("nobody").to_string())));

    alice.shutdown().await.unwrap();
    assert_eq!(alice.neighbors().await, Err(MeshError::ServiceStopped));
    bob.shutdown().await.unwrap();

    println!("✓ Service actors exchange graphs and deliver chat");
}

#[tokio::test]
async fn test_service_routes_across_chain() {
    let hub = MemoryHub::new(512);
    let (alice, alice_link) = start(&hub, "alice", fast_config());
    let (bob, bob_link) = start(&hub, "bob", fast_config());
    let (carol, carol_link) = start(&hub, "carol", fast_config());
    let mut carol_events = carol.subscribe();

    hub.connect(&alice_link, &bob_link);
    hub.connect(&bob_link, &carol_link);

    let route = timeout(Duration::from_secs(10), async {
        loop {
            if let Some(route) = alice.route_to(id("carol")).await.unwrap() {
                return route;
            }
            sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .expect("alice never learned a route to carol");
    assert_eq!(route, vec![id("bob"), id("carol")]);

    alice.send_chat(id("carol"), "two hops").await.unwrap();
    let received = wait_for(&mut carol_events, |e| matches!(e, MeshEvent::MessageReceived(_))).await;
    assert!(matches!(received, MeshEvent::MessageReceived(msg) if msg.message == "two hops"));

    for handle in [alice, bob, carol] {
        handle.shutdown().await.unwrap();
    }
}

#[tokio::test]
async fn test_service_evicts_silent_neighbor() {
    let config = MeshConfig {
        liveness_sweep_secs: 1,
        last_connection_interval_secs: 1,
        ping_timeout_secs: 1,
        ..Default::default()
    };
    let hub = MemoryHub::new(512);
    let (alice, alice_link) = start(&hub, "alice", config.clone());
    let (_bob, bob_link) = start(&hub, "bob", config);
    let mut alice_events = alice.subscribe();

    hub.connect(&alice_link, &bob_link);
    wait_for(&mut alice_events, |e| matches!(e, MeshEvent::VertexAdded(_))).await;

    hub.set_muted(&bob_link, true);
    let removed = wait_for(&mut alice_events, |e| matches!(e, MeshEvent::VertexRemoved(_))).await;
    assert_eq!(removed, MeshEvent::VertexRemoved(id("bob")));
    assert!(alice.neighbors().await.unwrap().is_empty());
    assert!(!hub.is_linked(&alice_link, &bob_link));
}
