//! Two nodes talking over real TCP sockets.

use std::net::SocketAddr;
use std::time::Duration;

use gavel_node::config::BootstrapPeer;
use gavel_node::proto::{self, MakeBidResponse, OpenAuctionResponse};
use gavel_node::{GossipPolicy, Node, NodeConfig};
use gavel_p2p::TcpTransport;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;

async fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

async fn wait_for<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

async fn request<T: serde::de::DeserializeOwned>(
    addr: SocketAddr,
    method: &str,
    body: serde_json::Value,
) -> Result<T, gavel_node::NodeError> {
    let response = TcpTransport::anonymous()
        .request(addr, method, body.to_string().as_bytes())
        .await?;
    proto::parse_response(&response)
}

#[tokio::test]
async fn bootstrap_bid_and_merge_over_tcp() {
    let alice_dir = tempfile::tempdir().unwrap();
    let bob_dir = tempfile::tempdir().unwrap();

    let mut alice_config = NodeConfig::new("alice", free_addr().await);
    alice_config.data_dir = Some(alice_dir.path().to_path_buf());
    alice_config.gossip.policy = GossipPolicy::Merge;
    alice_config.gossip.call_timeout_ms = 500;
    let alice = Node::build(alice_config.clone()).unwrap();
    let alice_id = alice.peer_id();
    let alice_addr = alice_config.listen_addr;

    let mut bob_config = NodeConfig::new("bob", free_addr().await);
    bob_config.data_dir = Some(bob_dir.path().to_path_buf());
    bob_config.gossip.policy = GossipPolicy::Merge;
    bob_config.gossip.call_timeout_ms = 500;
    bob_config.bootstrap.push(BootstrapPeer {
        public_key: alice_id,
        address: alice_addr,
        name: Some("alice".to_string()),
    });
    let bob = Node::build(bob_config.clone()).unwrap();
    let bob_id = bob.peer_id();
    let bob_addr = bob_config.listen_addr;

    let alice_service = alice.service().clone();
    let bob_service = bob.service().clone();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let alice_task = tokio::spawn(alice.run(shutdown_rx.clone()));
    assert!(
        wait_for(|| std::net::TcpStream::connect(alice_addr).is_ok()).await,
        "alice never started listening"
    );
    let bob_task = tokio::spawn(bob.run(shutdown_rx));

    // bob's handshake registers each node with the other
    assert!(wait_for(|| alice_service.registry().is_active(&bob_id)).await);
    assert!(bob_service.registry().is_active(&alice_id));

    let opened: OpenAuctionResponse = request(
        alice_addr,
        "openAuction",
        json!({"clientName": "alice", "item": "vase", "price": 10}),
    )
    .await
    .unwrap();
    assert_eq!(opened.item, "vase");

    // Gossip reaches bob, who merges it and can take bids locally
    assert!(wait_for(|| bob_service.ledger().get("vase").is_some()).await);
    let bid: MakeBidResponse = request(
        bob_addr,
        "makeBid",
        json!({"clientName": "bob", "item": "vase", "amount": 15}),
    )
    .await
    .unwrap();
    assert!(bid.accepted);
    assert!(
        wait_for(|| alice_service
            .ledger()
            .get("vase")
            .and_then(|a| a.highest_amount())
            == Some(15.0))
        .await
    );

    let err = request::<serde_json::Value>(
        alice_addr,
        "closeAuction",
        json!({"clientName": "bob", "item": "vase"}),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "NotAuthorized");

    shutdown_tx.send(true).unwrap();
    alice_task.await.unwrap().unwrap();
    bob_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn stopped_peer_is_pruned_over_tcp() {
    let mut alice_config = NodeConfig::new("alice", free_addr().await);
    alice_config.gossip.call_timeout_ms = 500;
    let alice = Node::build(alice_config.clone()).unwrap();
    let alice_service = alice.service().clone();

    let bob = Node::build(NodeConfig::new("bob", free_addr().await)).unwrap();
    let bob_id = bob.peer_id();
    let bob_addr = bob.config().listen_addr;
    let bob_server = bob.bind().await.unwrap();
    let (bob_stop, bob_rx) = watch::channel(false);
    let bob_task = tokio::spawn(bob_server.serve(bob_rx));

    assert!(
        alice_service
            .join(bob_id, Some(&bob_addr.to_string()), None)
            .await
    );

    bob_stop.send(true).unwrap();
    bob_task.await.unwrap();

    let opened = alice_service
        .open_auction(
            None,
            &proto::OpenAuctionRequest {
                client_name: "alice".to_string(),
                item: "lamp".to_string(),
                price: 2.0,
            },
        )
        .await;
    assert!(opened.is_ok());
    assert!(!alice_service.registry().is_active(&bob_id));
}
