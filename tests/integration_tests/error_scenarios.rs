//! Failure-path scenarios
//!
//! What instances report when things go wrong, and how failed work is
//! settled: retry history and terminal states on the store side, dead
//! letters on the queue side.

use chrono::Utc;
use herald::cache::Cache;
use herald::models::{CampaignStatus, LogStatus};
use herald::queue::{Job, JobPayload, Queue, QUEUE_CONFLICT, QUEUE_MESSAGES};
use herald::store::Store;
use herald::webhook::events::{is_manual_device, InstanceEvent};
use uuid::Uuid;

use super::fixtures;

async fn connect_store() -> Store {
    let store = Store::connect(&fixtures::test_database_url(), 4)
        .await
        .unwrap();
    store.init_schema().await.unwrap();
    store
}

// ============================================================================
// Instance payloads
// ============================================================================

#[test]
fn test_instance_payloads_parse_to_their_kinds() {
    let samples = [
        (fixtures::SAMPLE_SESSION_READY, "session_ready"),
        (fixtures::SAMPLE_SESSION_DISCONNECTED, "session_disconnected"),
        (fixtures::SAMPLE_STATUS_UPDATED, "message_status_updated"),
        (fixtures::SAMPLE_MANUAL_MESSAGE_CREATE, "message_create"),
        (fixtures::SAMPLE_WEB_MESSAGE_CREATE, "message_create"),
    ];

    for (body, kind) in samples {
        let event: InstanceEvent = serde_json::from_str(body).unwrap();
        assert_eq!(event.kind(), kind);
    }
}

#[test]
fn test_unknown_payload_is_rejected() {
    let result: Result<InstanceEvent, _> = serde_json::from_str(fixtures::SAMPLE_UNKNOWN_EVENT);
    assert!(result.is_err(), "Unknown event kinds must not parse");
}

#[test]
fn test_disconnect_carries_its_reason() {
    let event: InstanceEvent = serde_json::from_str(fixtures::SAMPLE_SESSION_DISCONNECTED).unwrap();

    let InstanceEvent::SessionDisconnected { session_id, reason } = event else {
        panic!("expected a disconnect event");
    };
    assert_eq!(session_id, "ws-1-main");
    assert_eq!(reason.as_deref(), Some("connection closed by phone"));
}

#[test]
fn test_manual_and_web_creates_classify_differently() {
    let manual: InstanceEvent =
        serde_json::from_str(fixtures::SAMPLE_MANUAL_MESSAGE_CREATE).unwrap();
    let web: InstanceEvent = serde_json::from_str(fixtures::SAMPLE_WEB_MESSAGE_CREATE).unwrap();

    let InstanceEvent::MessageCreate {
        from_me,
        device_type,
        ..
    } = manual
    else {
        panic!("expected a message create");
    };
    assert!(from_me);
    assert!(is_manual_device(device_type.as_deref()));

    let InstanceEvent::MessageCreate { device_type, .. } = web else {
        panic!("expected a message create");
    };
    // Our own gateway sends surface as web creates and must not pause
    assert!(!is_manual_device(device_type.as_deref()));
}

// ============================================================================
// Store failure settlement
// ============================================================================

#[tokio::test]
#[ignore = "Requires running PostgreSQL"]
async fn test_failure_history_accumulates_in_order() {
    let store = connect_store().await;
    let (_, account, campaign) = fixtures::seed_campaign(&store, 1).await;

    store.materialize_logs(campaign.id).await.unwrap();
    let log_id = store
        .claim_next_logs(campaign.id, 1, Utc::now())
        .await
        .unwrap()[0]
        .id;

    let past = Utc::now() - chrono::Duration::seconds(1);
    for error in ["connection reset", "send timeout"] {
        assert!(store
            .mark_log_failed(log_id, Some(account.id), error, Some(past))
            .await
            .unwrap());
        assert!(store.claim_log(log_id, Utc::now()).await.unwrap().is_some());
    }

    // The third failure is terminal
    assert!(store
        .mark_log_failed(log_id, Some(account.id), "number not on whatsapp", None)
        .await
        .unwrap());

    let log = store.get_log(log_id).await.unwrap().unwrap();
    assert_eq!(log.status, LogStatus::Failed);
    assert_eq!(log.retry_count, 2);
    assert!(log.next_retry_at.is_none());
    assert_eq!(log.error.as_deref(), Some("number not on whatsapp"));

    let retries = store.list_log_retries(log_id).await.unwrap();
    assert_eq!(retries.len(), 2);
    assert_eq!(retries[0].error.as_deref(), Some("connection reset"));
    assert_eq!(retries[1].error.as_deref(), Some("send timeout"));

    let stats = store.compute_stats(campaign.id).await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
#[ignore = "Requires running PostgreSQL"]
async fn test_failed_campaign_is_terminal() {
    let store = connect_store().await;
    let (_, _, campaign) = fixtures::seed_campaign(&store, 1).await;

    assert!(store
        .fail_campaign(campaign.id, "No healthy account available")
        .await
        .unwrap());
    assert!(!store.fail_campaign(campaign.id, "again").await.unwrap());
    assert!(!store.mark_campaign_ongoing(campaign.id).await.unwrap());

    let campaign = store.get_campaign(campaign.id).await.unwrap().unwrap();
    assert_eq!(campaign.status, CampaignStatus::Failed);
    assert_eq!(
        campaign.failure_reason.as_deref(),
        Some("No healthy account available")
    );
}

// ============================================================================
// Queue failure settlement
// ============================================================================

#[tokio::test]
#[ignore = "Requires running Redis"]
async fn test_nack_walks_retry_then_the_dead_letter_list() {
    let cache = Cache::new(&fixtures::test_cache_config()).await.unwrap();
    let queue = Queue::new(
        cache.pool(),
        format!("herald-test-{}", Uuid::new_v4()),
        30,
        2,
    );

    let job = Job::new(JobPayload::ConflictCheck {
        session_id: "ws-1-main".to_string(),
        attempt: 0,
    });
    queue.enqueue(&job).await.unwrap();

    let claimed = queue.dequeue(QUEUE_CONFLICT).await.unwrap().unwrap();
    let retried = queue
        .nack(&claimed, chrono::Duration::zero())
        .await
        .unwrap();
    assert!(retried, "First failure stays within the attempt budget");

    assert_eq!(queue.promote_due(QUEUE_CONFLICT, 10).await.unwrap(), 1);
    let claimed = queue.dequeue(QUEUE_CONFLICT).await.unwrap().unwrap();
    assert_eq!(claimed.job.attempt, 1);

    let retried = queue
        .nack(&claimed, chrono::Duration::zero())
        .await
        .unwrap();
    assert!(!retried, "Second failure exhausts the budget");

    let depth = queue.depth(QUEUE_CONFLICT).await.unwrap();
    assert_eq!(depth.dead, 1);
    assert_eq!(depth.ready, 0);
    assert!(queue.dequeue(QUEUE_CONFLICT).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "Requires running Redis"]
async fn test_expired_lease_at_the_attempt_budget_parks() {
    let cache = Cache::new(&fixtures::test_cache_config()).await.unwrap();
    // Zero lease and a single allowed attempt: the reclaim pass must
    // park instead of requeueing
    let queue = Queue::new(
        cache.pool(),
        format!("herald-test-{}", Uuid::new_v4()),
        0,
        1,
    );

    let job = Job::new(JobPayload::LogSend {
        campaign_id: Uuid::new_v4(),
        log_id: Uuid::new_v4(),
    });
    queue.enqueue(&job).await.unwrap();
    queue.dequeue(QUEUE_MESSAGES).await.unwrap().unwrap();

    assert_eq!(queue.reclaim_expired(QUEUE_MESSAGES, 10).await.unwrap(), 1);

    let depth = queue.depth(QUEUE_MESSAGES).await.unwrap();
    assert_eq!(depth.dead, 1);
    assert_eq!(depth.leased, 0);
    assert!(queue.dequeue(QUEUE_MESSAGES).await.unwrap().is_none());
}
