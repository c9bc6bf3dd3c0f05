use meshkv::*;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type Failures = Arc<Mutex<Vec<(String, bool)>>>;

fn count(acc: &usize, _: &u32) -> usize {
    acc + 1
}

fn recording(failures: &Failures) -> impl Fn(&str, Option<&Error>) + Send + Sync + 'static {
    let failures = failures.clone();
    move |peer, cause| {
        failures
            .lock()
            .unwrap()
            .push((peer.to_string(), cause.is_some()))
    }
}

fn ok_after(peer: &str, delay: Duration, value: u32) -> PendingOp<u32> {
    PendingOp::new(peer, async move {
        tokio::time::sleep(delay).await;
        Ok(value)
    })
}

fn fail_after(peer: &str, delay: Duration) -> PendingOp<u32> {
    let name = peer.to_string();
    PendingOp::new(peer, async move {
        tokio::time::sleep(delay).await;
        Err(Error::unreachable(&name, "connection refused"))
    })
}

#[test]
fn test_quorum_larger_than_total_rejected() {
    let result = QuorumOp::new(3, 2, 0usize, count);
    assert!(matches!(
        result,
        Err(Error::InvalidQuorum {
            quorum: 3,
            total: 2
        })
    ));
}

#[tokio::test]
async fn test_returns_without_waiting_for_straggler() {
    let failures: Failures = Arc::default();
    let op = Arc::new(
        QuorumOp::new(2, 3, 0usize, count)
            .unwrap()
            .on_peer_failure(recording(&failures)),
    );

    op.attach(vec![
        ok_after("a", Duration::from_millis(5), 1),
        ok_after("b", Duration::from_millis(10), 2),
        ok_after("c", Duration::from_secs(30), 3),
    ])
    .unwrap();

    let started = Instant::now();
    let merged = op.wait_timeout(Duration::from_secs(10)).await.unwrap();
    assert_eq!(merged, 2);
    assert!(started.elapsed() < Duration::from_secs(5));

    op.cancel();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        *failures.lock().unwrap(),
        vec![("c".to_string(), false)]
    );
    assert_eq!(op.progress(), (2, 1));
}

#[tokio::test]
async fn test_fail_fast_when_quorum_unreachable() {
    let op = Arc::new(QuorumOp::new(2, 3, 0usize, count).unwrap());

    op.attach(vec![
        fail_after("a", Duration::from_millis(5)),
        fail_after("b", Duration::from_millis(10)),
        ok_after("c", Duration::from_secs(30), 3),
    ])
    .unwrap();

    let started = Instant::now();
    let result = op.wait().await;
    assert!(matches!(
        result,
        Err(Error::QuorumNotReached {
            reached: 0,
            required: 2
        })
    ));
    assert!(started.elapsed() < Duration::from_secs(5));
    op.cancel();
}

#[tokio::test]
async fn test_timeout_reports_partial_progress() {
    let op = Arc::new(QuorumOp::new(2, 2, 0usize, count).unwrap());
    op.attach(vec![
        ok_after("a", Duration::from_millis(1), 1),
        ok_after("b", Duration::from_secs(30), 2),
    ])
    .unwrap();

    let result = op.wait_timeout(Duration::from_millis(100)).await;
    assert!(matches!(
        result,
        Err(Error::QuorumNotReached {
            reached: 1,
            required: 2
        })
    ));
    op.cancel();
}

#[tokio::test]
async fn test_attach_exactly_once() {
    let op = Arc::new(QuorumOp::new(1, 1, 0usize, count).unwrap());

    let wrong = op.attach(vec![]);
    assert!(matches!(
        wrong,
        Err(Error::OperationCount {
            expected: 1,
            actual: 0
        })
    ));

    op.attach(vec![ok_after("a", Duration::ZERO, 1)]).unwrap();
    let again = op.attach(vec![ok_after("a", Duration::ZERO, 1)]);
    assert!(matches!(again, Err(Error::AlreadyAttached)));

    assert_eq!(op.wait().await.unwrap(), 1);
}

#[tokio::test]
async fn test_cancel_wakes_waiter_and_is_idempotent() {
    let op = Arc::new(QuorumOp::new(1, 1, 0usize, count).unwrap());
    op.attach(vec![ok_after("a", Duration::from_secs(30), 1)])
        .unwrap();

    let waiter = {
        let op = op.clone();
        tokio::spawn(async move { op.wait().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    op.cancel();
    op.cancel();
    assert!(op.is_cancelled());

    let result = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(Error::OperationCancelled)));
}

#[tokio::test]
async fn test_seed_merged_with_results() {
    let op = Arc::new(
        QuorumOp::new(2, 2, Some(VersionedValue::new("local", 10)), lww_merge).unwrap(),
    );
    let ops = vec![
        PendingOp::new("a", async { Ok(Some(VersionedValue::new("old", 5))) }),
        PendingOp::new("b", async { Ok(Some(VersionedValue::new("new", 20))) }),
    ];
    op.attach(ops).unwrap();

    let merged = op.wait().await.unwrap();
    assert_eq!(merged, Some(VersionedValue::new("new", 20)));
}

#[tokio::test]
async fn test_zero_quorum_resolves_immediately() {
    let op = Arc::new(QuorumOp::new(0, 1, 7usize, count).unwrap());
    op.attach(vec![ok_after("a", Duration::from_secs(30), 1)])
        .unwrap();
    assert_eq!(op.wait().await.unwrap(), 7);
    op.cancel();
}
