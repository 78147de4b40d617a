//! End-to-end pipeline tests.
//!
//! Drive full watch runs against a temporary database with a scripted
//! extraction worker and a recording notification channel: extraction,
//! diff, event emission, subscription matching, and delivery dispatch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;

use pagewatch::dispatch::{ChannelSender, DeliveryProcessor, SendError};
use pagewatch::extract::{ExtractError, ExtractionRequest, ExtractionWorker};
use pagewatch::filter::{Condition, FilterSet};
use pagewatch::models::{
    ChannelConfig, DeliveryStatus, EntityStatus, Event, EventKind, Record, RunStatus,
    Subscription, Watch, WatchStatus,
};
use pagewatch::repository::DbContext;
use pagewatch::scheduler::{RunExecutor, TriggerOutcome};

/// Serves whatever record set the test has loaded.
struct ScriptedWorker {
    records: Mutex<Vec<Record>>,
}

impl ScriptedWorker {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(Vec::new()),
        })
    }

    async fn set_records(&self, records: Vec<serde_json::Value>) {
        let records = records
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap_or_default())
            .collect();
        *self.records.lock().await = records;
    }
}

#[async_trait]
impl ExtractionWorker for ScriptedWorker {
    async fn extract(&self, _request: &ExtractionRequest) -> Result<Vec<Record>, ExtractError> {
        Ok(self.records.lock().await.clone())
    }
}

/// Records every send instead of doing network IO.
struct RecordingSender {
    sent: Mutex<Vec<(Vec<String>, Event)>>,
    fail_next: Mutex<bool>,
}

impl RecordingSender {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail_next: Mutex::new(false),
        })
    }
}

#[async_trait]
impl ChannelSender for RecordingSender {
    async fn send(&self, recipients: &[String], event: &Event) -> Result<(), SendError> {
        let mut fail = self.fail_next.lock().await;
        if *fail {
            *fail = false;
            return Err(SendError::Retryable("scripted failure".to_string()));
        }
        self.sent
            .lock()
            .await
            .push((recipients.to_vec(), event.clone()));
        Ok(())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    db: DbContext,
    worker: Arc<ScriptedWorker>,
    sender: Arc<RecordingSender>,
    executor: Arc<RunExecutor>,
    dispatcher: Arc<DeliveryProcessor>,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = DbContext::new(&dir.path().join("test.db"));
    db.init_schema().await.unwrap();

    let worker = ScriptedWorker::new();
    let sender = RecordingSender::new();
    let executor = Arc::new(RunExecutor::new(
        db.clone(),
        worker.clone(),
        Duration::from_secs(5),
        3,
    ));
    let dispatcher = Arc::new(
        DeliveryProcessor::new(db.clone(), Duration::from_secs(10), Duration::from_secs(30), 2)
            .with_sender("webhook", sender.clone()),
    );

    Harness {
        _dir: dir,
        db,
        worker,
        sender,
        executor,
        dispatcher,
    }
}

fn product_watch() -> Watch {
    Watch::new(
        "org-1".to_string(),
        "store inventory".to_string(),
        "https://shop.example/catalog".to_string(),
        "product".to_string(),
        json!({"selector": ".product"}),
        "*/5 * * * *".to_string(),
        vec!["sku".to_string()],
    )
}

fn price_drop_subscription(watch_id: &str) -> Subscription {
    Subscription::new(
        "org-1".to_string(),
        "price drops".to_string(),
        vec![EventKind::EntityChanged],
        Some(watch_id.to_string()),
        FilterSet {
            conditions: vec![Condition::Decreased {
                field: "price".to_string(),
            }],
        },
        "webhook".to_string(),
        ChannelConfig {
            to: vec!["https://hooks.example/price".to_string()],
        },
    )
}

#[tokio::test]
async fn test_price_drop_end_to_end() {
    let h = harness().await;

    let watch = product_watch();
    h.db.watches().save(&watch).await.unwrap();
    let sub = price_drop_subscription(&watch.id);
    h.db.subscriptions().save(&sub).await.unwrap();

    // First run: both products appear, but the subscription only cares
    // about changes, so nothing is queued.
    h.worker
        .set_records(vec![
            json!({"sku": "A-1", "price": 40.0}),
            json!({"sku": "B-2", "price": 15.0}),
        ])
        .await;
    h.executor.execute(&watch).await.unwrap().unwrap();

    let events = h.db.events().recent(Some(&watch.id), 10).await.unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.kind == EventKind::EntityAppeared));
    assert_eq!(
        h.db.deliveries()
            .count_by_status(DeliveryStatus::Pending)
            .await
            .unwrap(),
        0
    );

    // Second run: one price drops, the other rises.
    let watch = h.db.watches().get(&watch.id).await.unwrap().unwrap();
    h.worker
        .set_records(vec![
            json!({"sku": "A-1", "price": 33.0}),
            json!({"sku": "B-2", "price": 18.0}),
        ])
        .await;
    h.executor.execute(&watch).await.unwrap().unwrap();

    let pending = h
        .db
        .deliveries()
        .count_by_status(DeliveryStatus::Pending)
        .await
        .unwrap();
    assert_eq!(pending, 1, "only the price drop should match");

    // Dispatch it.
    h.dispatcher.clone().sweep().await.unwrap();

    let sent = h.sender.sent.lock().await;
    assert_eq!(sent.len(), 1);
    let (recipients, event) = &sent[0];
    assert_eq!(recipients, &vec!["https://hooks.example/price".to_string()]);
    assert_eq!(event.kind, EventKind::EntityChanged);
    assert_eq!(event.payload.entity["sku"], json!("A-1"));
    assert_eq!(event.payload.changes.len(), 1);
    assert_eq!(event.payload.changes[0].field, "price");
    assert_eq!(event.payload.changes[0].old, json!(40.0));
    assert_eq!(event.payload.changes[0].new, json!(33.0));
    drop(sent);

    assert_eq!(
        h.db.deliveries()
            .count_by_status(DeliveryStatus::Delivered)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_disappearance_and_reactivation() {
    let h = harness().await;

    let watch = product_watch();
    h.db.watches().save(&watch).await.unwrap();

    h.worker
        .set_records(vec![json!({"sku": "A-1", "price": 40.0})])
        .await;
    h.executor.execute(&watch).await.unwrap().unwrap();

    let stored = h.db.entities().snapshot_for_watch(&watch.id).await.unwrap();
    assert_eq!(stored.len(), 1);
    let entity_id = stored[0].id.clone();

    // Product vanishes.
    h.worker.set_records(vec![]).await;
    h.executor.execute(&watch).await.unwrap().unwrap();

    let stored = h.db.entities().snapshot_for_watch(&watch.id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, EntityStatus::Removed);

    let events = h.db.events().recent(Some(&watch.id), 10).await.unwrap();
    assert_eq!(events[0].kind, EventKind::EntityDisappeared);

    // Empty page again: the removed row emits nothing further.
    h.executor.execute(&watch).await.unwrap().unwrap();
    let events = h.db.events().recent(Some(&watch.id), 10).await.unwrap();
    assert_eq!(events.len(), 2);

    // It comes back: appearance event on the same row.
    h.worker
        .set_records(vec![json!({"sku": "A-1", "price": 45.0})])
        .await;
    h.executor.execute(&watch).await.unwrap().unwrap();

    let stored = h.db.entities().snapshot_for_watch(&watch.id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, entity_id, "reactivation reuses the row");
    assert_eq!(stored[0].status, EntityStatus::Active);

    let events = h.db.events().recent(Some(&watch.id), 10).await.unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].kind, EventKind::EntityAppeared);
}

#[tokio::test]
async fn test_trigger_respects_watch_state() {
    let h = harness().await;

    let watch = product_watch();
    h.db.watches().save(&watch).await.unwrap();
    h.worker.set_records(vec![]).await;

    match h.executor.trigger(&watch.id).await.unwrap() {
        TriggerOutcome::Accepted { run_id } => {
            let run = h.db.runs().get(&run_id).await.unwrap().unwrap();
            assert_eq!(run.status, RunStatus::Completed);
        }
        other => panic!("expected accepted trigger, got {:?}", other),
    }

    h.db.watches()
        .set_status(&watch.id, WatchStatus::Paused)
        .await
        .unwrap();
    assert_eq!(
        h.executor.trigger(&watch.id).await.unwrap(),
        TriggerOutcome::NotSchedulable
    );

    assert_eq!(
        h.executor.trigger("no-such-watch").await.unwrap(),
        TriggerOutcome::NotFound
    );
}

#[tokio::test]
async fn test_failed_delivery_retries_then_succeeds() {
    let h = harness().await;

    let watch = product_watch();
    h.db.watches().save(&watch).await.unwrap();
    let sub = Subscription::new(
        "org-1".to_string(),
        "everything".to_string(),
        vec![
            EventKind::EntityAppeared,
            EventKind::EntityChanged,
            EventKind::EntityDisappeared,
        ],
        None,
        FilterSet::default(),
        "webhook".to_string(),
        ChannelConfig {
            to: vec!["https://hooks.example/all".to_string()],
        },
    );
    h.db.subscriptions().save(&sub).await.unwrap();

    h.worker
        .set_records(vec![json!({"sku": "A-1", "price": 9.5})])
        .await;
    h.executor.execute(&watch).await.unwrap().unwrap();

    *h.sender.fail_next.lock().await = true;
    h.dispatcher.clone().sweep().await.unwrap();

    // Failed attempt: still pending, scheduled in the future.
    let deliveries = h
        .db
        .deliveries()
        .count_by_status(DeliveryStatus::Pending)
        .await
        .unwrap();
    assert_eq!(deliveries, 1);

    // Not due yet, so an immediate sweep claims nothing.
    assert_eq!(h.dispatcher.clone().sweep().await.unwrap(), 0);

    // Force it due again and sweep.
    let events = h.db.events().recent(Some(&watch.id), 1).await.unwrap();
    let deliveries = h.db.deliveries().for_event(&events[0].id).await.unwrap();
    let delivery = &deliveries[0];
    h.db.deliveries()
        .mark_retry(
            &delivery.id,
            delivery.attempts,
            chrono::Utc::now() - chrono::Duration::seconds(1),
            "forced due",
        )
        .await
        .unwrap();

    h.dispatcher.clone().sweep().await.unwrap();
    assert_eq!(
        h.db.deliveries()
            .count_by_status(DeliveryStatus::Delivered)
            .await
            .unwrap(),
        1
    );
    assert_eq!(h.sender.sent.lock().await.len(), 1);
}

#[tokio::test]
async fn test_delivery_exhausts_attempts_then_fails_terminally() {
    let h = harness().await;

    struct DownSender;
    #[async_trait]
    impl ChannelSender for DownSender {
        async fn send(&self, _recipients: &[String], _event: &Event) -> Result<(), SendError> {
            Err(SendError::Retryable("endpoint down".to_string()))
        }
    }

    let dispatcher = Arc::new(
        DeliveryProcessor::new(h.db.clone(), Duration::from_secs(10), Duration::from_secs(30), 2)
            .with_sender("webhook", Arc::new(DownSender)),
    );

    let watch = product_watch();
    h.db.watches().save(&watch).await.unwrap();
    let sub = Subscription::new(
        "org-1".to_string(),
        "everything".to_string(),
        vec![EventKind::EntityAppeared],
        None,
        FilterSet::default(),
        "webhook".to_string(),
        ChannelConfig {
            to: vec!["https://hooks.example/dead".to_string()],
        },
    );
    h.db.subscriptions().save(&sub).await.unwrap();

    h.worker
        .set_records(vec![json!({"sku": "A-1", "price": 9.5})])
        .await;
    h.executor.execute(&watch).await.unwrap().unwrap();

    let events = h.db.events().recent(Some(&watch.id), 1).await.unwrap();
    let delivery_id = h.db.deliveries().for_event(&events[0].id).await.unwrap()[0]
        .id
        .clone();

    let max_attempts = h.db.deliveries().get(&delivery_id).await.unwrap().unwrap().max_attempts;
    assert_eq!(max_attempts, 5);

    for attempt in 1..=max_attempts {
        // Each retry lands in the future; pull it back so the sweep
        // picks it up without changing the attempt counter.
        let delivery = h.db.deliveries().get(&delivery_id).await.unwrap().unwrap();
        h.db.deliveries()
            .mark_retry(
                &delivery.id,
                delivery.attempts,
                chrono::Utc::now() - chrono::Duration::seconds(1),
                "forced due",
            )
            .await
            .unwrap();
        assert_eq!(dispatcher.clone().sweep().await.unwrap(), 1);

        let delivery = h.db.deliveries().get(&delivery_id).await.unwrap().unwrap();
        assert_eq!(delivery.attempts, attempt);
        if attempt < max_attempts {
            assert_eq!(delivery.status, DeliveryStatus::Pending);
        } else {
            assert_eq!(
                delivery.status,
                DeliveryStatus::Failed,
                "final attempt ends the retry budget"
            );
        }
    }

    // Terminally failed rows never come back into the sweep.
    let delivery = h.db.deliveries().get(&delivery_id).await.unwrap().unwrap();
    h.db.deliveries()
        .mark_retry(
            &delivery.id,
            delivery.attempts,
            chrono::Utc::now() - chrono::Duration::seconds(1),
            "forced due",
        )
        .await
        .unwrap();
    assert_eq!(dispatcher.clone().sweep().await.unwrap(), 0);
}

#[tokio::test]
async fn test_failing_runs_trip_the_ceiling() {
    let h = harness().await;

    // A worker URL that resolves nowhere makes every extraction fail.
    let watch = product_watch();
    h.db.watches().save(&watch).await.unwrap();

    struct FailingWorker;
    #[async_trait]
    impl ExtractionWorker for FailingWorker {
        async fn extract(
            &self,
            _request: &ExtractionRequest,
        ) -> Result<Vec<Record>, ExtractError> {
            Err(ExtractError::Status {
                status: reqwest::StatusCode::BAD_GATEWAY,
                body: "upstream down".to_string(),
            })
        }
    }

    let executor = Arc::new(RunExecutor::new(
        h.db.clone(),
        Arc::new(FailingWorker),
        Duration::from_secs(5),
        2,
    ));

    executor.execute(&watch).await.unwrap().unwrap();
    let watch = h.db.watches().get(&watch.id).await.unwrap().unwrap();
    assert_eq!(watch.status, WatchStatus::Active);
    assert_eq!(watch.consecutive_failures, 1);

    executor.execute(&watch).await.unwrap().unwrap();
    let watch = h.db.watches().get(&watch.id).await.unwrap().unwrap();
    assert_eq!(watch.status, WatchStatus::Error, "second failure hits the ceiling");

    // Errored watches are no longer due.
    let due = h.db.watches().due(chrono::Utc::now()).await.unwrap();
    assert!(due.is_empty());

    // Resume clears the streak and makes it due again.
    h.db.watches().resume(&watch.id).await.unwrap();
    let watch = h.db.watches().get(&watch.id).await.unwrap().unwrap();
    assert_eq!(watch.status, WatchStatus::Active);
    assert_eq!(watch.consecutive_failures, 0);
}
