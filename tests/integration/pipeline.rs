//! Ingestion pipeline properties: idempotence, classification fan-out,
//! side-effect isolation, malformed-payload resilience.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;

use onebox::prelude::*;

use crate::mocks::*;

struct PipelineFixture {
    store: Arc<MemoryMessageStore>,
    indexer: Arc<RecordingIndexer>,
    notifier: Arc<RecordingNotifier>,
    pipeline: IngestPipeline,
}

fn fixture(classifier: impl Classifier + 'static) -> PipelineFixture {
    let store = Arc::new(MemoryMessageStore::new());
    let indexer = Arc::new(RecordingIndexer::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let pipeline = IngestPipeline::new(
        store.clone(),
        Arc::new(classifier),
        indexer.clone(),
        notifier.clone(),
    );
    PipelineFixture {
        store,
        indexer,
        notifier,
        pipeline,
    }
}

#[tokio::test]
async fn ingest_is_idempotent_under_redelivery() {
    let f = fixture(StaticClassifier(Category::NotInterested));
    let account = test_account("user@example.com");
    let raw = raw_message(
        1,
        Some("m1@remote"),
        "alice@example.com",
        "Hello",
        "first delivery",
        Utc::now(),
    );

    assert_eq!(
        f.pipeline.ingest(&raw, &account, "INBOX").await,
        IngestOutcome::Ingested
    );
    assert_eq!(
        f.pipeline.ingest(&raw, &account, "INBOX").await,
        IngestOutcome::AlreadyProcessed
    );
    assert_eq!(f.store.count(), 1);
    // redelivery triggers no second round of side effects
    assert_eq!(f.indexer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_message_id_falls_back_to_account_and_uid() {
    let f = fixture(StaticClassifier(Category::NotInterested));
    let account = test_account("user@example.com");
    let raw = raw_message(
        7,
        None,
        "alice@example.com",
        "No message id here",
        "body",
        Utc::now(),
    );

    assert_eq!(
        f.pipeline.ingest(&raw, &account, "INBOX").await,
        IngestOutcome::Ingested
    );
    let records = f.store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message_id, "user@example.com-7");
}

#[tokio::test]
async fn interested_messages_notify_exactly_once() {
    let f = fixture(StaticClassifier(Category::Interested));
    let account = test_account("user@example.com");
    let raw = raw_message(
        1,
        Some("hot-lead@remote"),
        "prospect@corp.com",
        "Re: proposal",
        "we would like to move forward",
        Utc::now(),
    );

    f.pipeline.ingest(&raw, &account, "INBOX").await;
    assert_eq!(f.notifier.calls.load(Ordering::SeqCst), 1);

    let dispatched = f.notifier.dispatched.lock().unwrap();
    assert_eq!(dispatched[0].1, Category::Interested);
}

#[tokio::test]
async fn non_interested_messages_never_notify() {
    for category in [
        Category::MeetingBooked,
        Category::NotInterested,
        Category::Spam,
        Category::OutOfOffice,
    ] {
        let f = fixture(StaticClassifier(category));
        let account = test_account("user@example.com");
        let raw = raw_message(
            1,
            Some("m1@remote"),
            "alice@example.com",
            "Subject",
            "body",
            Utc::now(),
        );

        assert_eq!(
            f.pipeline.ingest(&raw, &account, "INBOX").await,
            IngestOutcome::Ingested
        );
        assert_eq!(f.notifier.calls.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test]
async fn headerless_payload_is_skipped_not_fatal() {
    let f = fixture(StaticClassifier(Category::NotInterested));
    let account = test_account("user@example.com");

    assert_eq!(
        f.pipeline
            .ingest(&headerless_message(3), &account, "INBOX")
            .await,
        IngestOutcome::Skipped
    );
    assert_eq!(f.store.count(), 0);
    assert_eq!(f.indexer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn index_failure_does_not_fail_ingestion() {
    let f = fixture(StaticClassifier(Category::NotInterested));
    f.indexer.fail.store(true, Ordering::SeqCst);
    let account = test_account("user@example.com");
    let raw = raw_message(
        1,
        Some("m1@remote"),
        "alice@example.com",
        "Subject",
        "body",
        Utc::now(),
    );

    assert_eq!(
        f.pipeline.ingest(&raw, &account, "INBOX").await,
        IngestOutcome::Ingested
    );
    assert_eq!(f.store.count(), 1);
}

#[tokio::test]
async fn notify_failure_does_not_fail_ingestion() {
    let f = fixture(StaticClassifier(Category::Interested));
    f.notifier.fail.store(true, Ordering::SeqCst);
    let account = test_account("user@example.com");
    let raw = raw_message(
        1,
        Some("m1@remote"),
        "alice@example.com",
        "Subject",
        "body",
        Utc::now(),
    );

    assert_eq!(
        f.pipeline.ingest(&raw, &account, "INBOX").await,
        IngestOutcome::Ingested
    );
    assert_eq!(f.store.count(), 1);
}

#[tokio::test]
async fn bodies_are_capped_before_persisting() {
    let f = fixture(StaticClassifier(Category::NotInterested));
    let account = test_account("user@example.com");
    let huge_body = "x".repeat(20_000);
    let raw = raw_message(
        1,
        Some("big@remote"),
        "alice@example.com",
        "Big one",
        &huge_body,
        Utc::now(),
    );

    f.pipeline.ingest(&raw, &account, "INBOX").await;
    let records = f.store.records();
    assert!(records[0].body.len() <= 5_000);
}

#[tokio::test]
async fn keyword_classifier_drives_real_categories() {
    let f = fixture(KeywordClassifier);
    let account = test_account("user@example.com");
    let raw = raw_message(
        1,
        Some("lead@remote"),
        "recruiter@acme.com",
        "Job opportunity at Acme",
        "we would like to discuss next steps",
        Utc::now(),
    );

    f.pipeline.ingest(&raw, &account, "INBOX").await;
    let records = f.store.records();
    assert_eq!(records[0].category, Category::Interested);
    assert_eq!(f.notifier.calls.load(Ordering::SeqCst), 1);
}
