//! Test fixtures for integration tests
//!
//! Provides sample webhook payloads and helpers that seed the
//! live-service tests with workspaces, accounts and campaigns.

use chrono::Utc;
use herald::cache::CacheConfig;
use herald::models::{
    Account, AccountStatus, Campaign, CampaignRecipient, CampaignStatus, CampaignType,
    ProviderType, SpeedTier, Workspace,
};
use herald::store::Store;
use uuid::Uuid;

/// Session came online and can send
pub const SAMPLE_SESSION_READY: &str = r#"{
    "event": "session_ready",
    "session_id": "ws-1-main"
}"#;

/// Session dropped with a reason from the instance
pub const SAMPLE_SESSION_DISCONNECTED: &str = r#"{
    "event": "session_disconnected",
    "session_id": "ws-1-main",
    "reason": "connection closed by phone"
}"#;

/// Provider receipt moved a message to delivered
pub const SAMPLE_STATUS_UPDATED: &str = r#"{
    "event": "message_status_updated",
    "message_id": "wamid.77",
    "status": "delivered"
}"#;

/// The account owner typed a message on the phone itself
pub const SAMPLE_MANUAL_MESSAGE_CREATE: &str = r#"{
    "event": "message_create",
    "session_id": "ws-1-main",
    "from_me": true,
    "device_type": "android",
    "timestamp": "2026-08-01T12:00:00Z"
}"#;

/// Echo of a send this engine made through the web client
pub const SAMPLE_WEB_MESSAGE_CREATE: &str = r#"{
    "event": "message_create",
    "session_id": "ws-1-main",
    "from_me": true,
    "device_type": "web"
}"#;

/// Event kind this engine does not know
pub const SAMPLE_UNKNOWN_EVENT: &str = r#"{
    "event": "session_migrated",
    "session_id": "ws-1-main"
}"#;

/// Connection string for the test database
pub fn test_database_url() -> String {
    std::env::var("POSTGRES_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .unwrap_or_else(|_| "postgresql://localhost/herald_test".to_string())
}

/// Cache configuration with a unique key prefix per test run
pub fn test_cache_config() -> CacheConfig {
    CacheConfig {
        url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
        key_prefix: format!("herald-test-{}", Uuid::new_v4()),
        ..CacheConfig::default()
    }
}

pub fn make_workspace() -> Workspace {
    Workspace {
        id: Uuid::new_v4(),
        name: format!("it-workspace-{}", Uuid::new_v4()),
        timezone: "+00:00".to_string(),
        retry_enabled: true,
        retry_intervals_mins: vec![1, 5],
        failed_group_id: None,
        created_at: Utc::now(),
    }
}

pub fn make_account(workspace_id: Uuid) -> Account {
    let now = Utc::now();
    Account {
        id: Uuid::new_v4(),
        workspace_id,
        session_id: format!("it-session-{}", Uuid::new_v4()),
        provider: ProviderType::Webjs,
        status: AccountStatus::Connected,
        health_score: 100,
        instance_index: None,
        instance_url: None,
        migration_count: 0,
        disconnect_reason: None,
        consecutive_failures: 0,
        ban_risk: 0,
        last_activity_at: Some(now),
        last_used_at: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn make_campaign(workspace_id: Uuid) -> Campaign {
    let now = Utc::now();
    Campaign {
        id: Uuid::new_v4(),
        workspace_id,
        name: format!("it-campaign-{}", Uuid::new_v4()),
        campaign_type: CampaignType::Direct,
        status: CampaignStatus::Pending,
        preferred_provider: None,
        speed_tier: SpeedTier::Normal,
        account_id: None,
        template_name: None,
        template_language: None,
        message_body: Some("Olá {{name}}".to_string()),
        scheduled_at: None,
        sent_count: 0,
        delivered_count: 0,
        read_count: 0,
        failed_count: 0,
        pause_reason: None,
        paused_by_session: None,
        pause_count: 0,
        failure_reason: None,
        completed_at: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn make_recipients(campaign_id: Uuid, count: usize) -> Vec<CampaignRecipient> {
    (0..count)
        .map(|i| CampaignRecipient {
            id: Uuid::new_v4(),
            campaign_id,
            phone: format!("55119999{:05}", i),
            name: Some(format!("Recipient {i}")),
            variables: None,
        })
        .collect()
}

/// Insert a workspace, one connected account and a campaign with
/// `recipient_count` recipients. Nothing is materialized or claimed.
pub async fn seed_campaign(
    store: &Store,
    recipient_count: usize,
) -> (Workspace, Account, Campaign) {
    let workspace = make_workspace();
    store.upsert_workspace(&workspace).await.unwrap();

    let account = make_account(workspace.id);
    store.upsert_account(&account).await.unwrap();

    let campaign = make_campaign(workspace.id);
    store.insert_campaign(&campaign).await.unwrap();

    let recipients = make_recipients(campaign.id, recipient_count);
    let inserted = store.insert_recipients(&recipients).await.unwrap();
    assert_eq!(inserted, recipient_count);

    (workspace, account, campaign)
}
