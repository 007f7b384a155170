//! Account selection ordering
//!
//! The selector ranks a workspace's connected accounts healthiest
//! first and least recently used within equal health, narrowed by the
//! campaign's provider preference when set. Disconnected accounts are
//! never offered, and the fallback list is the same ranking minus the
//! account a send already failed on.

use chrono::{DateTime, Duration, Utc};
use herald::models::{Account, AccountStatus, ProviderType};
use herald::selector::AccountSelector;
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

fn account_with(
    workspace_id: Uuid,
    health: i32,
    last_used_at: Option<DateTime<Utc>>,
) -> Account {
    let mut account = fixtures::make_account(workspace_id);
    account.health_score = health;
    account.last_used_at = last_used_at;
    account
}

#[tokio::test]
#[ignore = "Requires running PostgreSQL"]
async fn test_selection_ranks_health_then_least_recent_use() {
    let store = connect_store().await;

    let workspace = fixtures::make_workspace();
    store.upsert_workspace(&workspace).await.unwrap();
    let campaign = fixtures::make_campaign(workspace.id);
    store.insert_campaign(&campaign).await.unwrap();

    let now = Utc::now();
    // Highest health wins even when it was just used
    let strong = account_with(workspace.id, 95, Some(now));
    // Within equal health, never-used sorts ahead of any used account
    let fresh = account_with(workspace.id, 90, None);
    let rested = account_with(workspace.id, 90, Some(now - Duration::hours(2)));
    let recent = account_with(workspace.id, 90, Some(now - Duration::minutes(1)));

    for account in [&strong, &fresh, &rested, &recent] {
        store.upsert_account(account).await.unwrap();
    }

    let selector = AccountSelector::new(store.clone());

    let best = selector.select_best_account(&campaign).await.unwrap();
    assert_eq!(best.unwrap().id, strong.id);

    let fallbacks = selector
        .fallback_accounts(&campaign, strong.id)
        .await
        .unwrap();
    let order: Vec<Uuid> = fallbacks.iter().map(|account| account.id).collect();
    assert_eq!(order, vec![fresh.id, rested.id, recent.id]);
}

#[tokio::test]
#[ignore = "Requires running PostgreSQL"]
async fn test_disconnected_accounts_are_never_selected() {
    let store = connect_store().await;

    let workspace = fixtures::make_workspace();
    store.upsert_workspace(&workspace).await.unwrap();
    let campaign = fixtures::make_campaign(workspace.id);
    store.insert_campaign(&campaign).await.unwrap();

    let weak = account_with(workspace.id, 10, None);
    store.upsert_account(&weak).await.unwrap();

    let mut offline = account_with(workspace.id, 100, None);
    offline.status = AccountStatus::Disconnected;
    store.upsert_account(&offline).await.unwrap();

    let selector = AccountSelector::new(store.clone());

    // A barely-healthy connected account still beats a perfect offline one
    let best = selector.select_best_account(&campaign).await.unwrap();
    assert_eq!(best.unwrap().id, weak.id);

    store
        .update_account_status(weak.id, AccountStatus::Disconnected, Some("logged out"))
        .await
        .unwrap();

    assert!(selector
        .select_best_account(&campaign)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[ignore = "Requires running PostgreSQL"]
async fn test_provider_preference_narrows_candidates() {
    let store = connect_store().await;

    let workspace = fixtures::make_workspace();
    store.upsert_workspace(&workspace).await.unwrap();

    let webjs = account_with(workspace.id, 100, None);
    store.upsert_account(&webjs).await.unwrap();

    let mut meta = account_with(workspace.id, 40, None);
    meta.provider = ProviderType::Meta;
    store.upsert_account(&meta).await.unwrap();

    let selector = AccountSelector::new(store.clone());

    let mut campaign = fixtures::make_campaign(workspace.id);
    campaign.preferred_provider = Some(ProviderType::Meta);
    store.insert_campaign(&campaign).await.unwrap();

    // The preference outranks health: the weaker meta account is chosen
    let best = selector.select_best_account(&campaign).await.unwrap();
    assert_eq!(best.unwrap().id, meta.id);

    let unpinned = fixtures::make_campaign(workspace.id);
    store.insert_campaign(&unpinned).await.unwrap();

    let best = selector.select_best_account(&unpinned).await.unwrap();
    assert_eq!(best.unwrap().id, webjs.id);
}

#[tokio::test]
#[ignore = "Requires running PostgreSQL"]
async fn test_sole_account_has_no_fallback() {
    let store = connect_store().await;
    let (_, account, campaign) = fixtures::seed_campaign(&store, 1).await;

    let selector = AccountSelector::new(store.clone());

    // The only connected account just failed a send; nothing is left
    // to cascade onto
    let fallbacks = selector
        .fallback_accounts(&campaign, account.id)
        .await
        .unwrap();
    assert!(fallbacks.is_empty());
}
