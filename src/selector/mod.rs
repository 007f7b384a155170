//! Account selector
//!
//! Picks the account a campaign sends through. Candidates are the
//! workspace's connected accounts, narrowed by the campaign's preferred
//! provider when set, ranked healthiest first and least recently used
//! within equal health. Disconnected accounts are never candidates.

use anyhow::Result;
use uuid::Uuid;

use crate::models::{Account, Campaign};
use crate::store::Store;

#[derive(Clone)]
pub struct AccountSelector {
    store: Store,
}

impl AccountSelector {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Best account for this campaign right now, or `None` when the
    /// workspace has no connected account matching the campaign's
    /// provider preference. `None` fails the campaign upstream.
    pub async fn select_best_account(&self, campaign: &Campaign) -> Result<Option<Account>> {
        let candidates = self
            .store
            .list_candidate_accounts(campaign.workspace_id, campaign.preferred_provider)
            .await?;

        let best = candidates.into_iter().next();

        match &best {
            Some(account) => tracing::debug!(
                campaign_id = %campaign.id,
                account_id = %account.id,
                health = account.health_score,
                "Selected account"
            ),
            None => tracing::warn!(
                campaign_id = %campaign.id,
                workspace_id = %campaign.workspace_id,
                provider = ?campaign.preferred_provider,
                "No connected account available"
            ),
        }

        Ok(best)
    }

    /// Remaining candidates in selection order, minus the account a
    /// send already failed on. Used for the fallback cascade.
    pub async fn fallback_accounts(
        &self,
        campaign: &Campaign,
        excluding: Uuid,
    ) -> Result<Vec<Account>> {
        let candidates = self
            .store
            .list_candidate_accounts(campaign.workspace_id, campaign.preferred_provider)
            .await?;

        Ok(candidates
            .into_iter()
            .filter(|account| account.id != excluding)
            .collect())
    }
}
