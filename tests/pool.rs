mod common;

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::{MockConnector, MockDb, init_tracing};
use pgloadgen::errors::Error;
use pgloadgen::metrics::LoadgenMetrics;
use pgloadgen::pool::ConnectionPool;

fn size(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).expect("non-zero")
}

#[tokio::test]
async fn opens_every_requested_connection() {
    init_tracing();
    let db = MockDb::new();
    let connector = MockConnector::new(Arc::clone(&db));
    let metrics = Arc::new(LoadgenMetrics::new("mock").expect("metrics"));

    let pool = ConnectionPool::establish(&connector, size(4), Arc::clone(&metrics))
        .await
        .expect("pool");

    assert_eq!(pool.len(), 4);
    assert_eq!(metrics.nconns.get(), 4);
    assert_eq!(db.open.load(Ordering::SeqCst), 4);

    let indexes: Vec<usize> = pool.into_connections().iter().map(|c| c.index).collect();
    assert_eq!(indexes, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn failed_connection_rolls_back_the_batch() {
    init_tracing();
    let db = MockDb::failing_at(1);
    let connector = MockConnector::new(Arc::clone(&db));
    let metrics = Arc::new(LoadgenMetrics::new("mock").expect("metrics"));

    let err = match ConnectionPool::establish(&connector, size(2), Arc::clone(&metrics)).await {
        Ok(_) => panic!("pool should not come up"),
        Err(e) => e,
    };

    assert!(matches!(err, Error::Connect { index: 1, total: 2, .. }), "{err}");
    assert_eq!(metrics.nconns.get(), 0);
    assert_eq!(db.open.load(Ordering::SeqCst), 0);
    assert_eq!(db.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stops_at_first_failure() {
    init_tracing();
    let db = MockDb::failing_at(2);
    let connector = MockConnector::new(Arc::clone(&db));
    let metrics = Arc::new(LoadgenMetrics::new("mock").expect("metrics"));

    let result = ConnectionPool::establish(&connector, size(10), Arc::clone(&metrics)).await;

    assert!(result.is_err());
    // Connections are opened one at a time, so nothing after the failure is attempted.
    assert_eq!(db.connect_attempts.load(Ordering::SeqCst), 3);
    assert_eq!(db.closed.load(Ordering::SeqCst), 2);
    assert_eq!(metrics.nconns.get(), 0);
}

#[tokio::test]
async fn rollback_continues_past_close_errors() {
    init_tracing();
    let db = MockDb::failing_at(3);
    db.fail_close.store(true, Ordering::SeqCst);
    let connector = MockConnector::new(Arc::clone(&db));
    let metrics = Arc::new(LoadgenMetrics::new("mock").expect("metrics"));

    let err = match ConnectionPool::establish(&connector, size(4), Arc::clone(&metrics)).await {
        Ok(_) => panic!("pool should not come up"),
        Err(e) => e,
    };

    // The connect failure is reported, not the close failures.
    assert!(err.to_string().contains("connection refused (attempt 3)"), "{err}");
    assert_eq!(db.closed.load(Ordering::SeqCst), 3);
    assert_eq!(metrics.nconns.get(), 0);
}

#[tokio::test]
async fn close_tears_down_a_ready_pool() {
    let db = MockDb::new();
    let connector = MockConnector::new(Arc::clone(&db));
    let metrics = Arc::new(LoadgenMetrics::new("mock").expect("metrics"));

    let pool = ConnectionPool::establish(&connector, size(3), Arc::clone(&metrics))
        .await
        .expect("pool");
    pool.close().await;

    assert_eq!(metrics.nconns.get(), 0);
    assert_eq!(db.closed.load(Ordering::SeqCst), 3);
}
