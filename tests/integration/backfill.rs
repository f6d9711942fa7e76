//! Backfill properties: the lookback window, the batch concurrency
//! bound, per-message failure isolation, fetch-failure propagation.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::watch;

use onebox::prelude::*;
use onebox::sync::backfill::run_backfill;

use crate::mocks::*;

fn pipeline_over(store: Arc<MemoryMessageStore>) -> IngestPipeline {
    IngestPipeline::new(
        store,
        Arc::new(StaticClassifier(Category::NotInterested)),
        Arc::new(RecordingIndexer::default()),
        Arc::new(RecordingNotifier::default()),
    )
}

#[tokio::test]
async fn backfill_honors_the_lookback_window() {
    let server = MockMailServer::new();
    let now = Utc::now();
    let too_old = now - ChronoDuration::days(31);
    let in_window = now - ChronoDuration::days(29);
    let recent = now - ChronoDuration::hours(1);

    server.add_message(
        raw_message(1, Some("too-old@remote"), "a@ex.com", "old", "old", too_old),
        too_old,
        false,
    );
    server.add_message(
        raw_message(2, Some("in-window@remote"), "a@ex.com", "mid", "mid", in_window),
        in_window,
        false,
    );
    server.add_message(
        raw_message(3, Some("recent@remote"), "a@ex.com", "new", "new", recent),
        recent,
        false,
    );

    let store = Arc::new(MemoryMessageStore::new());
    let pipeline = pipeline_over(store.clone());
    let account = test_account("user@example.com");
    let settings = test_settings();
    let (_stop_tx, stop_rx) = watch::channel(false);

    let mut session = MockMailSession::new(server.clone());
    let count = run_backfill(&mut session, &account, &pipeline, &settings, &stop_rx)
        .await
        .unwrap();

    assert_eq!(count, 2);
    let ids: Vec<String> = store
        .records()
        .into_iter()
        .map(|m| m.message_id)
        .collect();
    assert!(ids.contains(&"in-window@remote".to_string()));
    assert!(ids.contains(&"recent@remote".to_string()));
    assert!(!ids.contains(&"too-old@remote".to_string()));
}

#[tokio::test]
async fn batches_bound_concurrency_and_run_sequentially() {
    let server = MockMailServer::new();
    let now = Utc::now();
    for uid in 1..=25u32 {
        server.add_message(
            raw_message(
                uid,
                Some(&format!("m{}@remote", uid)),
                "a@ex.com",
                "subject",
                "body",
                now,
            ),
            now,
            false,
        );
    }

    // slow inserts make overlapping pipeline runs observable
    let store = Arc::new(MemoryMessageStore::with_insert_delay(Duration::from_millis(
        20,
    )));
    let pipeline = pipeline_over(store.clone());
    let account = test_account("user@example.com");
    let settings = test_settings();
    let (_stop_tx, stop_rx) = watch::channel(false);

    let mut session = MockMailSession::new(server.clone());
    let count = run_backfill(&mut session, &account, &pipeline, &settings, &stop_rx)
        .await
        .unwrap();

    assert_eq!(count, 25);
    assert_eq!(store.count(), 25);
    // 25 messages, batch size 10: three sequential fetches
    assert_eq!(server.fetch_calls.load(Ordering::SeqCst), 3);
    // and never more in-flight ingests than one batch's worth
    let max = store.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= 10, "saw {} concurrent ingests", max);
    assert!(max >= 2, "batch members should overlap, saw {}", max);
}

#[tokio::test]
async fn one_bad_message_does_not_abort_the_batch() {
    let server = MockMailServer::new();
    let now = Utc::now();
    for uid in 1..=4u32 {
        server.add_message(
            raw_message(
                uid,
                Some(&format!("ok{}@remote", uid)),
                "a@ex.com",
                "fine",
                "body",
                now,
            ),
            now,
            false,
        );
    }
    server.add_message(headerless_message(5), now, false);

    let store = Arc::new(MemoryMessageStore::new());
    let pipeline = pipeline_over(store.clone());
    let account = test_account("user@example.com");
    let settings = test_settings();
    let (_stop_tx, stop_rx) = watch::channel(false);

    let mut session = MockMailSession::new(server.clone());
    let count = run_backfill(&mut session, &account, &pipeline, &settings, &stop_rx)
        .await
        .unwrap();

    // four ingested, the headerless one skipped, nobody crashed
    assert_eq!(count, 4);
    assert_eq!(store.count(), 4);
}

#[tokio::test]
async fn fetch_failure_aborts_backfill_as_connection_error() {
    let server = MockMailServer::new();
    let now = Utc::now();
    server.add_message(
        raw_message(1, Some("m1@remote"), "a@ex.com", "subject", "body", now),
        now,
        false,
    );
    server.set_fail_fetches(true);

    let store = Arc::new(MemoryMessageStore::new());
    let pipeline = pipeline_over(store.clone());
    let account = test_account("user@example.com");
    let settings = test_settings();
    let (_stop_tx, stop_rx) = watch::channel(false);

    let mut session = MockMailSession::new(server.clone());
    let result = run_backfill(&mut session, &account, &pipeline, &settings, &stop_rx).await;

    assert!(matches!(result, Err(SyncError::Connection(_))));
    assert_eq!(store.count(), 0);
}
