//! Consumer-side contract tests against a seeded lake, through the public
//! API only.

mod common;

use common::seed_lake;
use ledgerlake::{
    ledger_sequence, BackendError, BatchSchema, BufferedStorageBackend,
    BufferedStorageBackendConfig, LedgerBackend, LedgerRange, MemoryDataStore, XdrZstdCodec,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn backend(
    store: Arc<MemoryDataStore>,
    schema: BatchSchema,
) -> BufferedStorageBackend {
    BufferedStorageBackend::new(
        BufferedStorageBackendConfig {
            buffer_size: 4,
            num_workers: 2,
            retry_limit: 0,
            retry_wait: Duration::from_millis(1),
        },
        store,
        Arc::new(XdrZstdCodec::new(schema)),
        CancellationToken::new(),
    )
    .unwrap()
}

#[tokio::test]
async fn consumes_a_lake_in_strict_sequence_order() {
    let schema = BatchSchema::new(10, 1).unwrap();
    let store = Arc::new(MemoryDataStore::new(schema));
    seed_lake(&store, &schema, 2, 49);

    let backend = backend(store, schema);
    backend
        .prepare_range(LedgerRange::bounded(2, 49))
        .await
        .unwrap();

    for sequence in 2..=49 {
        let meta = backend.get_ledger(sequence).await.unwrap();
        assert_eq!(ledger_sequence(&meta), sequence);
    }
    backend.close().await.unwrap();
}

#[tokio::test]
async fn every_cursor_violation_is_reported_distinctly() {
    let schema = BatchSchema::new(10, 1).unwrap();
    let store = Arc::new(MemoryDataStore::new(schema));
    seed_lake(&store, &schema, 2, 29);

    let backend = backend(store, schema);
    backend
        .prepare_range(LedgerRange::bounded(10, 29))
        .await
        .unwrap();

    assert!(matches!(
        backend.get_ledger(9).await,
        Err(BackendError::PrecedesRange { .. })
    ));
    assert!(matches!(
        backend.get_ledger(30).await,
        Err(BackendError::BeyondRange { .. })
    ));
    assert!(matches!(
        backend.get_ledger(12).await,
        Err(BackendError::NonContiguous { .. })
    ));

    backend.get_ledger(10).await.unwrap();
    backend.get_ledger(11).await.unwrap();
    // Repeating the last delivered ledger is allowed while its batch is
    // cached; anything earlier is not.
    backend.get_ledger(11).await.unwrap();
    assert!(matches!(
        backend.get_ledger(10).await,
        Err(BackendError::PrecedesLast { .. })
    ));

    // The cursor did not move during the failed calls.
    let meta = backend.get_ledger(12).await.unwrap();
    assert_eq!(ledger_sequence(&meta), 12);
    backend.close().await.unwrap();
}

#[tokio::test]
async fn latest_ledger_follows_consumption() {
    let schema = BatchSchema::new(10, 1).unwrap();
    let store = Arc::new(MemoryDataStore::new(schema));
    seed_lake(&store, &schema, 2, 39);

    let backend = backend(store, schema);
    let range = LedgerRange::bounded(2, 39);
    backend.prepare_range(range).await.unwrap();
    assert!(backend.is_prepared(range).await.unwrap());

    // Prefetch makes ledgers visible ahead of consumption.
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    loop {
        let latest = backend.latest_ledger_sequence().await.unwrap();
        if latest == 39 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "prefetch stalled");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    for sequence in 2..=39 {
        backend.get_ledger(sequence).await.unwrap();
    }
    assert_eq!(backend.latest_ledger_sequence().await.unwrap(), 39);
    backend.close().await.unwrap();
}

#[tokio::test]
async fn close_from_another_task_interrupts_a_blocked_consumer() {
    let schema = BatchSchema::new(1, 10).unwrap();
    let store = Arc::new(MemoryDataStore::new(schema));
    // Empty lake, unbounded range: the consumer blocks waiting for ledger 2.

    let backend = Arc::new(backend(store, schema));
    backend
        .prepare_range(LedgerRange::unbounded(2))
        .await
        .unwrap();

    let consumer = {
        let backend = Arc::clone(&backend);
        tokio::spawn(async move { backend.get_ledger(2).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!consumer.is_finished());

    backend.close().await.unwrap();
    assert!(matches!(
        consumer.await.unwrap(),
        Err(BackendError::Cancelled)
    ));
    assert!(matches!(
        backend.get_ledger(2).await,
        Err(BackendError::Closed)
    ));
}
