//! Supervisor lifecycle properties: start/stop semantics, stop safety
//! mid-backfill, reconnect resumption without re-ingestion, live
//! listening.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::time::sleep;

use onebox::prelude::*;

use crate::mocks::*;

struct EngineFixture {
    server: Arc<MockMailServer>,
    store: Arc<MemoryMessageStore>,
    repo: Arc<MemoryAccountRepository>,
    engine: SyncEngine,
}

fn fixture_with(accounts: Vec<Account>, settings: SyncSettings) -> EngineFixture {
    let server = MockMailServer::new();
    let store = Arc::new(MemoryMessageStore::new());
    let repo = Arc::new(MemoryAccountRepository::new(accounts));
    let pipeline = Arc::new(IngestPipeline::new(
        store.clone(),
        Arc::new(StaticClassifier(Category::NotInterested)),
        Arc::new(RecordingIndexer::default()),
        Arc::new(RecordingNotifier::default()),
    ));
    let transport = Arc::new(MockMailTransport::new(server.clone()));
    let engine = SyncEngine::new(transport, repo.clone(), pipeline, settings);
    EngineFixture {
        server,
        store,
        repo,
        engine,
    }
}

fn fixture(accounts: Vec<Account>) -> EngineFixture {
    fixture_with(accounts, test_settings())
}

const ACCOUNT: &str = "user@example.com";

fn seed_messages(server: &MockMailServer, how_many: u32) {
    let now = Utc::now();
    for uid in 1..=how_many {
        let received = now - ChronoDuration::minutes(i64::from(how_many - uid));
        server.add_message(
            raw_message(
                uid,
                Some(&format!("m{}@remote", uid)),
                "sender@example.com",
                "subject",
                "body",
                received,
            ),
            received,
            false,
        );
    }
}

#[tokio::test]
async fn start_requires_a_registered_account() {
    let f = fixture(vec![]);
    let result = f.engine.start("ghost@example.com").await;
    assert!(matches!(result, Err(SyncError::Configuration(_))));
}

#[tokio::test]
async fn start_rejects_incomplete_connection_config() {
    let mut account = test_account(ACCOUNT);
    account.imap.host.clear();
    let f = fixture(vec![account]);

    let result = f.engine.start(ACCOUNT).await;
    assert!(matches!(result, Err(SyncError::Configuration(_))));
    // nothing was attempted against the server
    assert_eq!(f.server.connect_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn second_start_reports_already_running() {
    let f = fixture(vec![test_account(ACCOUNT)]);
    f.engine.start(ACCOUNT).await.unwrap();

    let result = f.engine.start(ACCOUNT).await;
    assert!(matches!(result, Err(SyncError::AlreadyRunning(_))));

    f.engine.stop(ACCOUNT).await.unwrap();
    // stop then start is the supported way to restart
    f.engine.start(ACCOUNT).await.unwrap();
    f.engine.stop(ACCOUNT).await.unwrap();
}

#[tokio::test]
async fn stop_is_an_idempotent_no_op_without_a_session() {
    let f = fixture(vec![test_account(ACCOUNT)]);
    f.engine.stop(ACCOUNT).await.unwrap();
    f.engine.stop(ACCOUNT).await.unwrap();
    assert_eq!(f.server.close_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn backfill_then_listening_with_last_synced_update() {
    let f = fixture(vec![test_account(ACCOUNT)]);
    seed_messages(&f.server, 2);

    f.engine.start(ACCOUNT).await.unwrap();
    wait_until("listening", || async {
        f.engine.status(ACCOUNT).await.state == SupervisorState::Listening
    })
    .await;

    assert_eq!(f.store.count(), 2);
    assert!(f.repo.last_synced(ACCOUNT).is_some());

    let status = f.engine.status(ACCOUNT).await;
    assert!(status.connected);

    f.engine.stop(ACCOUNT).await.unwrap();
    let status = f.engine.status(ACCOUNT).await;
    assert!(!status.connected);
}

#[tokio::test]
async fn stop_mid_backfill_closes_the_session_exactly_once() {
    let mut settings = test_settings();
    // long pauses hold the backfill in a cancellable suspension point
    settings.batch_pause = Duration::from_millis(200);
    let f = fixture_with(vec![test_account(ACCOUNT)], settings);
    seed_messages(&f.server, 30);

    f.engine.start(ACCOUNT).await.unwrap();
    wait_until("first batch fetched", || async {
        f.server.fetch_calls.load(Ordering::SeqCst) >= 1
    })
    .await;

    f.engine.stop(ACCOUNT).await.unwrap();

    assert_eq!(f.server.close_calls.load(Ordering::SeqCst), 1);
    assert!(!f.engine.status(ACCOUNT).await.connected);

    // no further fetches once stop has returned
    let fetches_at_stop = f.server.fetch_calls.load(Ordering::SeqCst);
    sleep(Duration::from_millis(400)).await;
    assert_eq!(f.server.fetch_calls.load(Ordering::SeqCst), fetches_at_stop);
    // and the interrupted backfill never advanced the sync marker
    assert!(f.repo.last_synced(ACCOUNT).is_none());
}

#[tokio::test]
async fn listener_error_triggers_reconnect_without_reingestion() {
    let f = fixture(vec![test_account(ACCOUNT)]);
    seed_messages(&f.server, 2);

    f.engine.start(ACCOUNT).await.unwrap();
    wait_until("listening", || async {
        f.engine.status(ACCOUNT).await.state == SupervisorState::Listening
    })
    .await;
    assert_eq!(f.store.count(), 2);
    assert_eq!(f.server.connect_calls.load(Ordering::SeqCst), 1);

    // simulated connection error while listening
    f.server.push_event(Err(TransportError::Connection(
        "connection reset".to_string(),
    )));

    wait_until("reconnected and listening again", || async {
        f.server.connect_calls.load(Ordering::SeqCst) == 2
            && f.engine.status(ACCOUNT).await.state == SupervisorState::Listening
    })
    .await;

    // the dead session was closed, the replacement backfill found only
    // known messages
    assert_eq!(f.server.close_calls.load(Ordering::SeqCst), 1);
    assert_eq!(f.store.count(), 2);

    f.engine.stop(ACCOUNT).await.unwrap();
    assert_eq!(f.server.close_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn new_mail_events_are_ingested_while_listening() {
    let f = fixture(vec![test_account(ACCOUNT)]);
    seed_messages(&f.server, 2);

    f.engine.start(ACCOUNT).await.unwrap();
    wait_until("listening", || async {
        f.engine.status(ACCOUNT).await.state == SupervisorState::Listening
    })
    .await;

    let now = Utc::now();
    f.server.add_message(
        raw_message(
            10,
            Some("fresh@remote"),
            "sender@example.com",
            "just arrived",
            "body",
            now,
        ),
        now,
        true,
    );
    f.server.push_event(Ok(SessionEvent::NewMail { count: 1 }));

    wait_until("new message ingested", || async { f.store.count() == 3 }).await;

    let ids: Vec<String> = f
        .store
        .records()
        .into_iter()
        .map(|m| m.message_id)
        .collect();
    assert!(ids.contains(&"fresh@remote".to_string()));

    f.engine.stop(ACCOUNT).await.unwrap();
}

#[tokio::test]
async fn failed_reconnect_attempts_keep_retrying() {
    let f = fixture(vec![test_account(ACCOUNT)]);
    seed_messages(&f.server, 1);

    f.engine.start(ACCOUNT).await.unwrap();
    wait_until("listening", || async {
        f.engine.status(ACCOUNT).await.state == SupervisorState::Listening
    })
    .await;

    // kill the session and make the next two reconnects fail too
    f.server.fail_next_connects(2);
    f.server.push_event(Err(TransportError::Closed));

    wait_until("recovered after failed attempts", || async {
        f.server.connect_calls.load(Ordering::SeqCst) >= 4
            && f.engine.status(ACCOUNT).await.state == SupervisorState::Listening
    })
    .await;

    assert_eq!(f.store.count(), 1);
    f.engine.stop(ACCOUNT).await.unwrap();
}
