//! End-to-end campaign pipeline tests
//!
//! These walk real campaigns through materialization, claiming, send
//! outcomes, receipts and completion against live services.

use chrono::Utc;
use herald::cache::Cache;
use herald::dispatch::refresh_stats;
use herald::models::{CampaignStatus, LogStatus};
use herald::store::Store;
use uuid::Uuid;

use super::fixtures;

async fn connect_store() -> Store {
    let store = Store::connect(&fixtures::test_database_url(), 4)
        .await
        .unwrap();
    store.init_schema().await.unwrap();
    store
}

#[tokio::test]
#[ignore = "Requires running PostgreSQL"]
async fn test_campaign_lifecycle_end_to_end() {
    let store = connect_store().await;
    let (_, account, campaign) = fixtures::seed_campaign(&store, 3).await;
    let now = Utc::now();

    assert!(store.mark_campaign_ongoing(campaign.id).await.unwrap());
    // A second worker arriving later must lose the transition
    assert!(!store.mark_campaign_ongoing(campaign.id).await.unwrap());

    assert_eq!(store.materialize_logs(campaign.id).await.unwrap(), 3);
    // Materialization is idempotent
    assert_eq!(store.materialize_logs(campaign.id).await.unwrap(), 0);

    let logs = store.claim_next_logs(campaign.id, 10, now).await.unwrap();
    assert_eq!(logs.len(), 3);
    assert!(logs.iter().all(|log| log.status == LogStatus::Ongoing));

    // One success, one retryable failure, one terminal failure
    assert!(store
        .mark_log_success(logs[0].id, account.id, Some("wamid.100"))
        .await
        .unwrap());
    assert!(store
        .mark_log_failed(
            logs[1].id,
            Some(account.id),
            "send timeout",
            Some(now - chrono::Duration::seconds(1)),
        )
        .await
        .unwrap());
    assert!(store
        .mark_log_failed(logs[2].id, Some(account.id), "invalid phone", None)
        .await
        .unwrap());

    let open = store.count_open_work(campaign.id).await.unwrap();
    assert_eq!(open.open, 0);
    assert_eq!(open.awaiting_retry, 1);
    assert!(!open.is_resolved());

    // The retry comes due, is claimed again and succeeds
    let retried = store.claim_log(logs[1].id, Utc::now()).await.unwrap();
    assert!(retried.is_some());
    assert_eq!(retried.unwrap().retry_count, 1);
    assert!(store
        .mark_log_success(logs[1].id, account.id, Some("wamid.101"))
        .await
        .unwrap());

    let open = store.count_open_work(campaign.id).await.unwrap();
    assert!(open.is_resolved());

    let stats = store.compute_stats(campaign.id).await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.sent, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.pending, 0);

    assert!(store.complete_campaign(campaign.id).await.unwrap());
    let finished = store.get_campaign(campaign.id).await.unwrap().unwrap();
    assert_eq!(finished.status, CampaignStatus::Completed);
    assert!(finished.completed_at.is_some());

    // The failed attempt left exactly one history row
    let retries = store.list_log_retries(logs[1].id).await.unwrap();
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].error.as_deref(), Some("send timeout"));
}

#[tokio::test]
#[ignore = "Requires running PostgreSQL"]
async fn test_receipts_mark_delivery_and_read() {
    let store = connect_store().await;
    let (_, account, campaign) = fixtures::seed_campaign(&store, 1).await;

    store.mark_campaign_ongoing(campaign.id).await.unwrap();
    store.materialize_logs(campaign.id).await.unwrap();

    let logs = store
        .claim_next_logs(campaign.id, 1, Utc::now())
        .await
        .unwrap();
    let message_id = format!("wamid.{}", Uuid::new_v4());
    store
        .mark_log_success(logs[0].id, account.id, Some(&message_id))
        .await
        .unwrap();

    // Delivery receipt resolves to the owning campaign
    let delivered = store.mark_delivered(&message_id).await.unwrap();
    assert_eq!(delivered, Some(campaign.id));

    let log = store.get_log(logs[0].id).await.unwrap().unwrap();
    assert_eq!(log.status, LogStatus::Success);
    assert!(log.delivered_at.is_some());
    assert!(log.read_at.is_none());

    let read = store.mark_read(&message_id).await.unwrap();
    assert_eq!(read, Some(campaign.id));
    let log = store.get_log(logs[0].id).await.unwrap().unwrap();
    assert!(log.read_at.is_some());

    // Receipts for unknown messages are ignored
    assert_eq!(store.mark_delivered("wamid.never-seen").await.unwrap(), None);
}

#[tokio::test]
#[ignore = "Requires running PostgreSQL and Redis"]
async fn test_stats_refresh_updates_campaign_counters() {
    let store = connect_store().await;
    let cache = Cache::new(&fixtures::test_cache_config()).await.unwrap();
    let (_, account, campaign) = fixtures::seed_campaign(&store, 2).await;

    store.mark_campaign_ongoing(campaign.id).await.unwrap();
    store.materialize_logs(campaign.id).await.unwrap();
    let logs = store
        .claim_next_logs(campaign.id, 2, Utc::now())
        .await
        .unwrap();

    let message_id = format!("wamid.{}", Uuid::new_v4());
    store
        .mark_log_success(logs[0].id, account.id, Some(&message_id))
        .await
        .unwrap();
    store
        .mark_log_failed(logs[1].id, Some(account.id), "number not on whatsapp", None)
        .await
        .unwrap();

    let stats = refresh_stats(&store, &cache, campaign.id)
        .await
        .unwrap()
        .expect("Lock should be free");
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.failed, 1);

    let row = store.get_campaign(campaign.id).await.unwrap().unwrap();
    assert_eq!(row.sent_count, 1);
    assert_eq!(row.failed_count, 1);

    // A concurrent holder makes the refresh skip instead of blocking
    let lock = cache
        .acquire_stats_lock(campaign.id)
        .await
        .unwrap()
        .expect("Lock should be free");
    let skipped = refresh_stats(&store, &cache, campaign.id).await.unwrap();
    assert!(skipped.is_none());
    cache.release_stats_lock(lock).await.unwrap();
}

#[tokio::test]
#[ignore = "Requires running PostgreSQL"]
async fn test_released_log_is_claimable_again() {
    let store = connect_store().await;
    let (_, _, campaign) = fixtures::seed_campaign(&store, 1).await;

    store.materialize_logs(campaign.id).await.unwrap();
    let logs = store
        .claim_next_logs(campaign.id, 1, Utc::now())
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);

    // No account was available; the claim is handed back untouched
    assert!(store.release_log(logs[0].id).await.unwrap());
    let log = store.get_log(logs[0].id).await.unwrap().unwrap();
    assert_eq!(log.status, LogStatus::Pending);
    assert_eq!(log.retry_count, 0);

    assert!(store
        .claim_log(logs[0].id, Utc::now())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
#[ignore = "Requires running PostgreSQL"]
async fn test_outcomes_require_a_live_claim() {
    let store = connect_store().await;
    let (_, account, campaign) = fixtures::seed_campaign(&store, 1).await;

    store.materialize_logs(campaign.id).await.unwrap();
    let log_id = store.list_logs(campaign.id).await.unwrap()[0].id;

    // The log was never claimed; a stale worker cannot write an outcome
    assert!(!store
        .mark_log_success(log_id, account.id, Some("wamid.stale"))
        .await
        .unwrap());
    assert!(!store
        .mark_log_failed(log_id, Some(account.id), "late failure", None)
        .await
        .unwrap());

    let log = store.get_log(log_id).await.unwrap().unwrap();
    assert_eq!(log.status, LogStatus::Pending);
}

#[tokio::test]
#[ignore = "Requires running PostgreSQL"]
async fn test_mobile_pause_blocks_and_resume_restores() {
    let store = connect_store().await;
    let (_, account, campaign) = fixtures::seed_campaign(&store, 1).await;

    store.mark_campaign_ongoing(campaign.id).await.unwrap();
    assert!(store
        .pause_campaign_for_mobile(campaign.id, "Mobile activity detected", &account.session_id)
        .await
        .unwrap());

    let paused = store.get_campaign(campaign.id).await.unwrap().unwrap();
    assert_eq!(paused.status, CampaignStatus::PausedMobile);
    assert_eq!(paused.pause_count, 1);
    assert_eq!(
        paused.paused_by_session.as_deref(),
        Some(account.session_id.as_str())
    );

    // Pausing an already paused campaign is a no-op
    assert!(!store
        .pause_campaign_for_mobile(campaign.id, "again", &account.session_id)
        .await
        .unwrap());

    assert!(store.resume_campaign(campaign.id).await.unwrap());
    let resumed = store.get_campaign(campaign.id).await.unwrap().unwrap();
    assert_eq!(resumed.status, CampaignStatus::Ongoing);
    assert!(resumed.pause_reason.is_none());
    // The pause counter keeps its history across resumes
    assert_eq!(resumed.pause_count, 1);
}
