mod common;

use common::{node, Network};
use meshkv::config::DiscoverySettings;
use meshkv::discovery::{format_message, parse_message, Announcement, Discovery};
use meshkv::*;
use std::net::SocketAddr;
use std::time::Duration;

#[test]
fn test_message_roundtrip() {
    let message = format_message("node-a", "http://10.0.0.5:8086");
    assert_eq!(message, "MESHKV|1|node-a|http://10.0.0.5:8086");
    assert_eq!(
        parse_message(&message),
        Some(Announcement {
            node_id: "node-a".to_string(),
            uri: "http://10.0.0.5:8086".to_string(),
        })
    );
}

#[test]
fn test_parse_normalizes_uri() {
    let parsed = parse_message("MESHKV|1|node-a|http://10.0.0.5:8086/\n").unwrap();
    assert_eq!(parsed.uri, "http://10.0.0.5:8086");
}

#[test]
fn test_parse_rejects_foreign_messages() {
    assert_eq!(parse_message("WOLFDISK|1|a|b|S|L"), None);
    assert_eq!(parse_message("MESHKV|2|node-a|http://a:1"), None);
    assert_eq!(parse_message("MESHKV|1|node-a"), None);
    assert_eq!(parse_message("MESHKV|x|node-a|http://a:1"), None);
    assert_eq!(parse_message("MESHKV|1||http://a:1"), None);
    assert_eq!(parse_message(""), None);
}

fn discovery(node: &KvNode) -> Discovery {
    Discovery::new(
        "local".to_string(),
        DiscoverySettings::default(),
        AntiEntropy::new(node.context().clone()),
    )
}

fn sender() -> SocketAddr {
    "10.0.0.9:3571".parse().unwrap()
}

#[tokio::test]
async fn test_handle_ignores_self_known_and_malformed() {
    let network = Network::new();
    let local = node(&network, "http://local:1");
    local.context().registry.add(["http://known:1"]);
    let discovery = discovery(&local);

    assert!(discovery.handle("garbage", sender()).is_none());
    assert!(discovery
        .handle(&format_message("local", "http://elsewhere:1"), sender())
        .is_none());
    assert!(discovery
        .handle(&format_message("other", "http://local:1"), sender())
        .is_none());
    assert!(discovery
        .handle(&format_message("known", "http://known:1"), sender())
        .is_none());
    assert_eq!(network.calls(), 0);
}

#[tokio::test]
async fn test_slow_sender_does_not_hold_up_others() {
    let network = Network::new();
    let local = node(&network, "http://local:1");
    let _slow = node(&network, "http://slow:1");
    let _fast = node(&network, "http://fast:1");
    network.set_delay("http://slow:1", Duration::from_millis(250));
    let discovery = discovery(&local);

    let slow_task = discovery
        .handle(&format_message("slow", "http://slow:1"), sender())
        .unwrap();
    assert!(discovery
        .handle(&format_message("slow", "http://slow:1"), sender())
        .is_none());

    let fast_task = discovery
        .handle(&format_message("fast", "http://fast:1"), sender())
        .unwrap();
    fast_task.await.unwrap();
    assert!(local.context().registry.contains("http://fast:1"));
    assert!(!local.context().registry.contains("http://slow:1"));

    slow_task.await.unwrap();
    assert!(local.context().registry.contains("http://slow:1"));
}
