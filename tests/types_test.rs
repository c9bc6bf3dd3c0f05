use meshkv::*;
use proptest::prelude::*;

#[test]
fn test_normalize_uri() {
    assert_eq!(normalize_uri("http://a:1/"), "http://a:1");
    assert_eq!(normalize_uri(" http://a:1 "), "http://a:1");
    assert_eq!(normalize_uri("http://a:1"), "http://a:1");
}

#[test]
fn test_merge_prefers_newer() {
    let old = Some(VersionedValue::new("old", 1));
    let new = Some(VersionedValue::new("new", 2));

    assert_eq!(lww_merge(&old, &new), new);
    assert_eq!(lww_merge(&new, &old), new);
    assert_eq!(lww_merge(&None, &old), old);
    assert_eq!(lww_merge(&old, &None), old);
    assert_eq!(lww_merge(&None, &None), None);
}

#[test]
fn test_merge_tie_broken_by_value() {
    let a = Some(VersionedValue::new("a", 5));
    let b = Some(VersionedValue::new("b", 5));

    assert_eq!(lww_merge(&a, &b), b);
    assert_eq!(lww_merge(&b, &a), b);
}

#[test]
fn test_put_request_timestamp_optional() {
    let req: PutRequest = serde_json::from_str(r#"{"value":"v"}"#).unwrap();
    assert_eq!(req.timestamp, None);
    let req: PutRequest = serde_json::from_str(r#"{"value":"v","timestamp":7}"#).unwrap();
    assert_eq!(req.timestamp, Some(7));
}

fn versioned() -> impl Strategy<Value = Option<VersionedValue>> {
    prop::option::of(("[a-c]{0,2}", 0u64..8).prop_map(|(v, ts)| VersionedValue::new(v, ts)))
}

proptest! {
    #[test]
    fn merge_is_order_independent(
        seed in versioned(),
        results in prop::collection::vec(versioned(), 0..8),
        rotation in 0usize..8,
    ) {
        let forward = results.iter().fold(seed.clone(), |acc, r| lww_merge(&acc, r));

        let mut reordered = results.clone();
        reordered.reverse();
        if !reordered.is_empty() {
            let n = rotation % reordered.len();
            reordered.rotate_left(n);
        }
        let shuffled = reordered.iter().fold(seed.clone(), |acc, r| lww_merge(&acc, r));

        prop_assert_eq!(forward, shuffled);
    }

    #[test]
    fn merge_never_loses_newest_timestamp(
        seed in versioned(),
        results in prop::collection::vec(versioned(), 0..8),
    ) {
        let merged = results.iter().fold(seed.clone(), |acc, r| lww_merge(&acc, r));
        let newest = std::iter::once(&seed)
            .chain(results.iter())
            .flatten()
            .map(|v| v.timestamp)
            .max();
        prop_assert_eq!(merged.map(|v| v.timestamp), newest);
    }
}
