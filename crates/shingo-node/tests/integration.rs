//! Integration tests for the node runtime over loopback sockets
//!
//! Nodes bind distinct 127.0.0.0/8 addresses on ephemeral ports and list
//! each other as static peers, so broadcasts reach them without a real
//! broadcast domain.

use std::net::Ipv4Addr;
use std::time::Duration;

use shingo_core::InterfaceId;
use shingo_node::{InterfaceConfig, NodeConfig, NodeError, NodeEvent, ShingoNode};
use shingo_routing::RouterConfig;

const IFACE: InterfaceId = InterfaceId(1);

fn make_config(address: Ipv4Addr) -> NodeConfig {
    NodeConfig::default()
        .with_router(RouterConfig::testing(11).with_periodic_update_interval(Duration::from_millis(200)))
        .with_interface(InterfaceConfig::new(1, address, 8).with_port(0))
}

async fn make_pair(a: Ipv4Addr, b: Ipv4Addr) -> (ShingoNode, ShingoNode) {
    let mut node_a = ShingoNode::bind(make_config(a)).await.unwrap();
    let mut node_b = ShingoNode::bind(make_config(b)).await.unwrap();
    let addr_a = node_a.local_addr(IFACE).unwrap();
    let addr_b = node_b.local_addr(IFACE).unwrap();
    node_a.add_peer(IFACE, addr_b).unwrap();
    node_b.add_peer(IFACE, addr_a).unwrap();
    (node_a, node_b)
}

#[tokio::test]
async fn test_single_node_lifecycle() {
    let node = ShingoNode::bind(make_config(Ipv4Addr::new(127, 0, 1, 1))).await.unwrap();
    let handle = node.start().unwrap();
    assert_eq!(handle.main_address(), Some(Ipv4Addr::new(127, 0, 1, 1)));

    let dump = handle.dump_tables().await.unwrap();
    assert!(dump.contains("Wall clock:"));
    assert!(dump.contains("127.0.1.1"));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_neighbors_learn_each_other() {
    let (a, b) = make_pair(Ipv4Addr::new(127, 0, 2, 1), Ipv4Addr::new(127, 0, 2, 2)).await;
    let handle_a = a.start().unwrap();
    let handle_b = b.start().unwrap();

    let route = tokio::time::timeout(Duration::from_secs(5), handle_a.resolve(Ipv4Addr::new(127, 0, 2, 2)))
        .await
        .expect("resolve timed out")
        .unwrap();
    assert_eq!(route.gateway, Ipv4Addr::new(127, 0, 2, 2));
    assert_eq!(route.interface, Some(IFACE));

    tokio::time::sleep(Duration::from_millis(300)).await;
    let stats = handle_b.stats().await.unwrap();
    assert!(stats.control_received > 0);
    assert!(stats.control_sent > 0);

    handle_a.shutdown().await.unwrap();
    handle_b.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_destination_fails_discovery() {
    let config = NodeConfig::default()
        .with_router(RouterConfig::testing(5).with_rreq_retries(0).with_net_diameter(2))
        .with_interface(InterfaceConfig::new(1, Ipv4Addr::new(127, 0, 3, 1), 8).with_port(0));
    let handle = ShingoNode::bind(config).await.unwrap().start().unwrap();
    let mut events = handle.events();

    let result = tokio::time::timeout(Duration::from_secs(10), handle.resolve(Ipv4Addr::new(127, 0, 3, 99)))
        .await
        .expect("resolve timed out");
    assert!(matches!(result, Err(NodeError::Unreachable { .. })));
    assert!(matches!(events.recv().await.unwrap(), NodeEvent::Unreachable { .. }));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_interface_down() {
    let handle = ShingoNode::bind(make_config(Ipv4Addr::new(127, 0, 4, 1)))
        .await
        .unwrap()
        .start()
        .unwrap();

    handle.interface_down(IFACE).await.unwrap();
    assert!(matches!(
        handle.interface_down(IFACE).await,
        Err(NodeError::InterfaceNotFound(_))
    ));
    assert!(handle.resolve(Ipv4Addr::new(127, 0, 4, 2)).await.is_err());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_bind_rejects_empty_config() {
    assert!(matches!(
        ShingoNode::bind(NodeConfig::default()).await,
        Err(NodeError::Config(_))
    ));
}

#[test]
fn test_shutdown_from_blocking_context() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        let handle = ShingoNode::bind(make_config(Ipv4Addr::new(127, 0, 5, 1)))
            .await
            .unwrap()
            .start()
            .unwrap();
        tokio_test::assert_ok!(handle.shutdown().await);
    });
}
