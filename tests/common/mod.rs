//! Common test utilities

use chrono::Utc;
use herald::models::{
    Account, AccountStatus, Campaign, CampaignRecipient, CampaignStatus, CampaignType,
    ProviderType, SpeedTier, Workspace,
};
use uuid::Uuid;

/// Create a test workspace with retries enabled
pub fn create_test_workspace() -> Workspace {
    Workspace {
        id: Uuid::new_v4(),
        name: "acme-test".to_string(),
        timezone: "+00:00".to_string(),
        retry_enabled: true,
        retry_intervals_mins: vec![5, 30, 120],
        failed_group_id: None,
        created_at: Utc::now(),
    }
}

/// Create a connected, fully healthy test account
pub fn create_test_account(workspace_id: Uuid) -> Account {
    let now = Utc::now();
    Account {
        id: Uuid::new_v4(),
        workspace_id,
        session_id: format!("session-{}", Uuid::new_v4()),
        provider: ProviderType::Webjs,
        status: AccountStatus::Connected,
        health_score: 100,
        instance_index: Some(0),
        instance_url: Some("http://instance-0:3020".to_string()),
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

/// Create a direct-body test campaign
pub fn create_test_campaign(workspace_id: Uuid) -> Campaign {
    let now = Utc::now();
    Campaign {
        id: Uuid::new_v4(),
        workspace_id,
        name: "welcome-blast".to_string(),
        campaign_type: CampaignType::Direct,
        status: CampaignStatus::Pending,
        preferred_provider: None,
        speed_tier: SpeedTier::Normal,
        account_id: None,
        template_name: None,
        template_language: None,
        message_body: Some("Olá {{name}}, sua conta está pronta.".to_string()),
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

/// Create a recipient with a given phone number
#[allow(dead_code)]
pub fn create_test_recipient(campaign_id: Uuid, phone: &str) -> CampaignRecipient {
    CampaignRecipient {
        id: Uuid::new_v4(),
        campaign_id,
        phone: phone.to_string(),
        name: None,
        variables: None,
    }
}
