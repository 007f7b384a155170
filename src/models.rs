// Core data structures for the herald dispatch engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Minimum health score for an account to count as healthy.
pub const HEALTHY_SCORE_MIN: i32 = 70;

/// Campaign lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    #[default]
    Pending,
    Scheduled,
    Ongoing,
    PausedMobile,
    Completed,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Ongoing => "ongoing",
            Self::PausedMobile => "paused_mobile",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "scheduled" => Some(Self::Scheduled),
            "ongoing" => Some(Self::Ongoing),
            "paused_mobile" => Some(Self::PausedMobile),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// True once the campaign can never send again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// True while the dispatch engine may pick the campaign up.
    /// `paused_mobile` is deliberately excluded: sends stay halted until
    /// the conflict resolver flips the campaign back to `ongoing`.
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, Self::Pending | Self::Scheduled | Self::Ongoing)
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Template campaigns render a provider template; direct campaigns carry
/// the message body themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignType {
    Template,
    Direct,
}

impl CampaignType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::Direct => "direct",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "template" => Some(Self::Template),
            "direct" => Some(Self::Direct),
            _ => None,
        }
    }
}

impl std::fmt::Display for CampaignType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Messaging provider backing an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Meta,
    Webjs,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Meta => "meta",
            Self::Webjs => "webjs",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "meta" => Some(Self::Meta),
            "webjs" => Some(Self::Webjs),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Account/session connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    QrScanning,
    Authenticated,
    Connected,
    #[default]
    Disconnected,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QrScanning => "qr_scanning",
            Self::Authenticated => "authenticated",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "qr_scanning" => Some(Self::QrScanning),
            "authenticated" => Some(Self::Authenticated),
            "connected" => Some(Self::Connected),
            "disconnected" => Some(Self::Disconnected),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-recipient delivery state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    #[default]
    Pending,
    Ongoing,
    Success,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ongoing => "ongoing",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "ongoing" => Some(Self::Ongoing),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sending speed tier. Slower tiers pace sends further apart and wait
/// longer before resuming after a mobile conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpeedTier {
    Slow,
    #[default]
    Normal,
    Fast,
}

impl SpeedTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slow => "slow",
            Self::Normal => "normal",
            Self::Fast => "fast",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "slow" => Some(Self::Slow),
            "normal" => Some(Self::Normal),
            "fast" => Some(Self::Fast),
            _ => None,
        }
    }

    /// Sends per minute allowed on an account at this tier.
    pub fn messages_per_minute(&self) -> u32 {
        match self {
            Self::Slow => 6,
            Self::Normal => 20,
            Self::Fast => 60,
        }
    }

    /// Cooldown before a conflict resume check, from a configured base.
    pub fn resume_cooldown_secs(&self, base_secs: u64) -> u64 {
        match self {
            Self::Slow => base_secs * 2,
            Self::Normal => base_secs,
            Self::Fast => (base_secs / 2).max(30),
        }
    }
}

impl std::fmt::Display for SpeedTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tenant owning campaigns and accounts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Uuid,
    pub name: String,
    /// UTC offset in "+09:00" form; scheduled campaigns are gated against
    /// local time in this offset.
    pub timezone: String,
    pub retry_enabled: bool,
    /// Ordered delays (minutes) between send attempts. The list length
    /// bounds the retry count for every log in the workspace.
    pub retry_intervals_mins: Vec<i32>,
    /// Contacts whose retries are exhausted are moved here.
    pub failed_group_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Workspace {
    /// Delay before retry attempt number `retry_count + 1`, or `None`
    /// once the interval list is exhausted.
    pub fn retry_interval(&self, retry_count: usize) -> Option<chrono::Duration> {
        if !self.retry_enabled {
            return None;
        }
        self.retry_intervals_mins
            .get(retry_count)
            .map(|mins| chrono::Duration::minutes(*mins as i64))
    }

    pub fn max_retries(&self) -> usize {
        if self.retry_enabled {
            self.retry_intervals_mins.len()
        } else {
            0
        }
    }
}

/// A single authenticated messaging identity, bound to exactly one
/// worker instance at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub workspace_id: Uuid,
    /// Provider-side session identifier, unique across the deployment.
    pub session_id: String,
    pub provider: ProviderType,
    pub status: AccountStatus,
    pub health_score: i32,
    pub instance_index: Option<i32>,
    pub instance_url: Option<String>,
    pub migration_count: i32,
    pub disconnect_reason: Option<String>,
    /// Failed sends since the last success; cleared on success.
    pub consecutive_failures: i32,
    /// Ban-risk signal in [0,100] reported by the worker instance.
    pub ban_risk: i32,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Healthy means score at or above the threshold while connected.
    pub fn is_healthy(&self) -> bool {
        self.health_score >= HEALTHY_SCORE_MIN && self.status == AccountStatus::Connected
    }

    pub fn is_connected(&self) -> bool {
        self.status == AccountStatus::Connected
    }
}

/// A batch send operation targeting a recipient set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub campaign_type: CampaignType,
    pub status: CampaignStatus,
    pub preferred_provider: Option<ProviderType>,
    pub speed_tier: SpeedTier,
    /// Account most recently used for this campaign; informational, the
    /// selector re-evaluates on every send.
    pub account_id: Option<Uuid>,
    /// Provider template identifier for `template` campaigns.
    pub template_name: Option<String>,
    /// Provider template language code, e.g. "en" or "pt_BR".
    pub template_language: Option<String>,
    /// Direct body, or the template source rendered per recipient.
    pub message_body: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_count: i32,
    pub delivered_count: i32,
    pub read_count: i32,
    pub failed_count: i32,
    pub pause_reason: Option<String>,
    pub paused_by_session: Option<String>,
    pub pause_count: i32,
    /// Set when the campaign fails as a whole, e.g. "no suitable account".
    pub failure_reason: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One target of a campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignRecipient {
    pub id: Uuid,
    pub campaign_id: Uuid,
    /// E.164 digits without the leading plus.
    pub phone: String,
    pub name: Option<String>,
    /// Per-recipient template variables.
    pub variables: Option<serde_json::Value>,
}

/// The per-recipient unit of delivery work and its terminal outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignLog {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub recipient_id: Uuid,
    pub account_id: Option<Uuid>,
    pub status: LogStatus,
    /// Provider message id from a successful send.
    pub message_id: Option<String>,
    pub error: Option<String>,
    /// Mirror of the retry-history row count, kept in the same
    /// transaction that appends the history row.
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only attempt history for a log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignLogRetry {
    pub id: Uuid,
    pub log_id: Uuid,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate counters recomputed from log rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CampaignStats {
    pub total: i32,
    pub sent: i32,
    pub delivered: i32,
    pub read: i32,
    pub failed: i32,
    pub pending: i32,
}

impl CampaignStats {
    /// Delivered as a percentage of sent
    pub fn delivery_rate(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            (self.delivered as f64 / self.sent as f64) * 100.0
        }
    }

    /// Read as a percentage of delivered
    pub fn read_rate(&self) -> f64 {
        if self.delivered == 0 {
            0.0
        } else {
            (self.read as f64 / self.delivered as f64) * 100.0
        }
    }

    /// Failed as a percentage of all logs
    pub fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.failed as f64 / self.total as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_campaign_status_round_trip() {
        for status in [
            CampaignStatus::Pending,
            CampaignStatus::Scheduled,
            CampaignStatus::Ongoing,
            CampaignStatus::PausedMobile,
            CampaignStatus::Completed,
            CampaignStatus::Failed,
        ] {
            assert_eq!(CampaignStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CampaignStatus::parse("invalid"), None);
    }

    #[test]
    fn test_paused_campaign_is_not_dispatchable() {
        assert!(CampaignStatus::Ongoing.is_dispatchable());
        assert!(CampaignStatus::Pending.is_dispatchable());
        assert!(!CampaignStatus::PausedMobile.is_dispatchable());
        assert!(!CampaignStatus::Completed.is_dispatchable());
        assert!(!CampaignStatus::PausedMobile.is_terminal());
    }

    #[test]
    fn test_account_status_parse() {
        assert_eq!(
            AccountStatus::parse("qr_scanning"),
            Some(AccountStatus::QrScanning)
        );
        assert_eq!(
            AccountStatus::parse("connected"),
            Some(AccountStatus::Connected)
        );
        assert_eq!(AccountStatus::parse("banned"), None);
    }

    #[test]
    fn test_healthy_requires_connection_and_score() {
        let mut account = sample_account();
        account.health_score = 85;
        account.status = AccountStatus::Connected;
        assert!(account.is_healthy());

        account.health_score = HEALTHY_SCORE_MIN;
        assert!(account.is_healthy());

        account.health_score = HEALTHY_SCORE_MIN - 1;
        assert!(!account.is_healthy());

        account.health_score = 100;
        account.status = AccountStatus::Disconnected;
        assert!(!account.is_healthy());
    }

    #[test]
    fn test_speed_tier_cooldown() {
        assert_eq!(SpeedTier::Slow.resume_cooldown_secs(180), 360);
        assert_eq!(SpeedTier::Normal.resume_cooldown_secs(180), 180);
        assert_eq!(SpeedTier::Fast.resume_cooldown_secs(180), 90);
        // Fast never drops below the floor
        assert_eq!(SpeedTier::Fast.resume_cooldown_secs(40), 30);
    }

    #[test]
    fn test_workspace_retry_intervals() {
        let workspace = Workspace {
            id: Uuid::new_v4(),
            name: "acme".to_string(),
            timezone: "+00:00".to_string(),
            retry_enabled: true,
            retry_intervals_mins: vec![5, 30, 120],
            failed_group_id: None,
            created_at: Utc::now(),
        };

        assert_eq!(
            workspace.retry_interval(0),
            Some(chrono::Duration::minutes(5))
        );
        assert_eq!(
            workspace.retry_interval(2),
            Some(chrono::Duration::minutes(120))
        );
        assert_eq!(workspace.retry_interval(3), None);
        assert_eq!(workspace.max_retries(), 3);
    }

    #[test]
    fn test_retries_disabled_yields_no_interval() {
        let workspace = Workspace {
            id: Uuid::new_v4(),
            name: "acme".to_string(),
            timezone: "+00:00".to_string(),
            retry_enabled: false,
            retry_intervals_mins: vec![5, 30],
            failed_group_id: None,
            created_at: Utc::now(),
        };

        assert_eq!(workspace.retry_interval(0), None);
        assert_eq!(workspace.max_retries(), 0);
    }

    #[test]
    fn test_stats_rates() {
        let stats = CampaignStats {
            total: 100,
            sent: 80,
            delivered: 40,
            read: 10,
            failed: 20,
            pending: 0,
        };
        assert_eq!(stats.delivery_rate(), 50.0);
        assert_eq!(stats.read_rate(), 25.0);
        assert_eq!(stats.failure_rate(), 20.0);

        let empty = CampaignStats::default();
        assert_eq!(empty.delivery_rate(), 0.0);
        assert_eq!(empty.failure_rate(), 0.0);
    }

    fn sample_account() -> Account {
        let now = Utc::now();
        Account {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            session_id: "ws-1-main".to_string(),
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
}
