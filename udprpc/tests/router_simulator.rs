#![cfg(feature = "router_simulator")]

use futures::channel::mpsc;
use futures::StreamExt;
use serde_json::json;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use udprpc::transport::ROUTER_PORT_RANGE;
use udprpc::{
    Datagram, InboundRequest, NativeUdpTransport, Responder, RouterSimulatorTransport, RpcConfig, Transport, UdpRpc,
};

fn localhost(port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
}

fn listen<T: Transport>(transport: &mut T) -> mpsc::UnboundedReceiver<Datagram> {
    let (tx, rx) = mpsc::unbounded();
    transport.on_message(Arc::new(move |datagram: Datagram| {
        let _ = tx.unbounded_send(datagram);
    }));
    rx
}

async fn next_within(rx: &mut mpsc::UnboundedReceiver<Datagram>, ms: u64) -> Option<Datagram> {
    tokio::time::timeout(Duration::from_millis(ms), rx.next()).await.ok().flatten()
}

fn echo(request: InboundRequest, responder: Responder) {
    responder.succeed(request.param(0).cloned().unwrap_or_default());
}

/// A node behind the router contacts a registry on a native socket. The registry sees the router's port rather than
/// the node's, and can answer on it because the node's outbound message punched a hole.
#[tokio::test]
async fn registry_answers_through_the_punched_hole() {
    env_logger::try_init().ok();
    let node_port = 3101;
    let mut registry = NativeUdpTransport::new();
    let mut registry_inbox = listen(&mut registry);
    registry.bind(0).await.unwrap();
    let registry_address = localhost(registry.local_port().unwrap());

    let mut node = RouterSimulatorTransport::new();
    let mut node_inbox = listen(&mut node);
    node.bind(node_port).await.unwrap();
    let router_port = node.local_port().unwrap();
    assert_ne!(router_port, node_port);
    assert!(ROUTER_PORT_RANGE.contains(&router_port));
    assert_eq!(node.requested_port(), Some(node_port));

    node.send(b"message1".to_vec(), registry_address).await.unwrap();
    assert!(node.is_punched(registry_address.port()));
    let received = next_within(&mut registry_inbox, 1000).await.expect("registry to receive message1");
    assert_eq!(received.payload, b"message1");
    assert_eq!(received.source.port(), router_port);

    registry.send(b"message2".to_vec(), localhost(received.source.port())).await.unwrap();
    let reply = next_within(&mut node_inbox, 1000).await.expect("node to receive message2");
    assert_eq!(reply.payload, b"message2");

    node.close().await.unwrap();
    registry.close().await.unwrap();
}

#[tokio::test]
async fn unsolicited_traffic_is_dropped() {
    env_logger::try_init().ok();
    let mut node = RouterSimulatorTransport::new();
    let mut node_inbox = listen(&mut node);
    node.bind(3102).await.unwrap();
    let router_address = localhost(node.local_port().unwrap());

    let mut stranger = NativeUdpTransport::new();
    stranger.bind(0).await.unwrap();
    stranger.send(b"hello?".to_vec(), router_address).await.unwrap();
    assert!(next_within(&mut node_inbox, 200).await.is_none());

    node.close().await.unwrap();
    stranger.close().await.unwrap();
}

#[tokio::test]
async fn engine_behind_a_router() {
    env_logger::try_init().ok();
    let config = RpcConfig::new(Duration::from_millis(40), Duration::from_millis(150));

    let mut server = UdpRpc::with_config(0, config);
    server.register(echo);
    server.start().await.unwrap();
    let server_address = localhost(server.local_port().unwrap());

    let mut node = UdpRpc::with_transport(3103, config, RouterSimulatorTransport::new());
    node.register(echo);
    node.start().await.unwrap();
    assert_eq!(node.port(), 3103);
    let router_address = localhost(node.local_port().unwrap());

    // Calls out through the router work, and punch a hole for the server
    assert_eq!(node.send("echo", vec![json!("out")], server_address).await.unwrap(), json!("out"));
    assert_eq!(server.send("echo", vec![json!("in")], router_address).await.unwrap(), json!("in"));

    // Everyone else is kept out
    let mut stranger = UdpRpc::with_config(0, config);
    stranger.start().await.unwrap();
    let err = stranger.send("echo", vec![json!("hi")], router_address).await.unwrap_err();
    assert!(err.is_retries_exhausted());

    stranger.stop().await.unwrap();
    node.stop().await.unwrap();
    node.stop().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn closing_frees_the_router_port() {
    env_logger::try_init().ok();
    let mut node = RouterSimulatorTransport::new();
    node.bind(3104).await.unwrap();
    let router_port = node.local_port().unwrap();
    node.close().await.unwrap();
    assert_eq!(node.local_port(), None);
    let rebound = std::net::UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, router_port));
    assert!(rebound.is_ok(), "router port {router_port} still in use after close: {rebound:?}");
}
