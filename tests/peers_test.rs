mod common;

use common::Recorder;
use meshkv::*;
use std::sync::Arc;

const ME: &str = "http://10.0.0.1:8086";

#[test]
fn test_add_never_includes_self() {
    let registry = PeerRegistry::new(ME);
    let added = registry.add([ME, "http://10.0.0.1:8086/", "http://10.0.0.2:8086"]);

    assert_eq!(added, vec!["http://10.0.0.2:8086".to_string()]);
    assert!(!registry.contains(ME));
    assert!(!registry.snapshot().contains(ME));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_add_normalizes_and_deduplicates() {
    let registry = PeerRegistry::new(ME);
    registry.add(["http://10.0.0.2:8086/", "http://10.0.0.2:8086", ""]);

    assert_eq!(registry.len(), 1);
    assert!(registry.contains("http://10.0.0.2:8086/"));
    assert!(registry.add(["http://10.0.0.2:8086"]).is_empty());
}

#[test]
fn test_snapshot_is_immutable() {
    let registry = PeerRegistry::new(ME);
    registry.add(["http://10.0.0.2:8086"]);

    let before = registry.snapshot();
    registry.add(["http://10.0.0.3:8086"]);
    registry.remove(["http://10.0.0.2:8086"]);

    assert_eq!(before.len(), 1);
    assert!(before.contains("http://10.0.0.2:8086"));
    assert_eq!(registry.len(), 1);
    assert!(registry.contains("http://10.0.0.3:8086"));
}

#[test]
fn test_listeners_notified_only_for_changes() {
    let registry = PeerRegistry::new(ME);
    let recorder = Arc::new(Recorder::default());
    let id = registry.subscribe(recorder.clone());

    registry.add(["http://a:1", "http://b:1"]);
    registry.add(["http://a:1"]);
    registry.remove(["http://a:1", "http://missing:1"]);

    assert_eq!(
        recorder.events(),
        vec!["+http://a:1", "+http://b:1", "-http://a:1"]
    );

    registry.unsubscribe(id);
    registry.add(["http://c:1"]);
    assert_eq!(recorder.events().len(), 3);
}

#[test]
fn test_shuffled_contains_every_peer() {
    let registry = PeerRegistry::new(ME);
    let peers: Vec<String> = (0..20).map(|i| format!("http://10.0.1.{}:8086", i)).collect();
    registry.add(&peers);

    let mut shuffled = registry.shuffled();
    shuffled.sort();
    let mut expected = peers.clone();
    expected.sort();
    assert_eq!(shuffled, expected);
}

#[test]
fn test_concurrent_adds_are_not_lost() {
    let registry = Arc::new(PeerRegistry::new(ME));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for i in 0..50 {
                    registry.add([format!("http://10.{}.0.{}:8086", t, i)]);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(registry.len(), 400);
}

#[test]
fn test_eviction_after_threshold() {
    let registry = Arc::new(PeerRegistry::new(ME));
    registry.add(["http://a:1"]);
    let tracker = EvictionTracker::new(registry.clone(), 2);
    let err = Error::unreachable("http://a:1", "connection refused");

    assert!(!tracker.record_failure("http://a:1", &err));
    assert_eq!(tracker.failure_count("http://a:1"), 1);
    assert!(registry.contains("http://a:1"));

    tracker.record_success("http://a:1");
    assert_eq!(tracker.failure_count("http://a:1"), 0);

    assert!(!tracker.record_failure("http://a:1", &err));
    assert!(tracker.record_failure("http://a:1", &err));
    assert!(!registry.contains("http://a:1"));
}

#[test]
fn test_cancellation_never_counts() {
    let registry = Arc::new(PeerRegistry::new(ME));
    registry.add(["http://a:1"]);
    let tracker = EvictionTracker::new(registry.clone(), 1);

    tracker.record_cancelled("http://a:1");
    tracker.record_cancelled("http://a:1");

    assert_eq!(tracker.failure_count("http://a:1"), 0);
    assert!(registry.contains("http://a:1"));
}
