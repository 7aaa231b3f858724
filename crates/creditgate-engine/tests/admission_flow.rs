//! End-to-end admission and ledger-consistency tests.
//!
//! Exercises the full engine over both store backends, including the
//! concurrency properties: quota enforcement and overdraw protection must
//! hold when requests for the same user race.

use creditgate_core::{
    GatewayConfig, MeterError, MeteringStore, ModelRateConfig, UserAccount, UserRole,
};
use creditgate_engine::{Gateway, NewPlan, TokenIdentityProvider};
use creditgate_storage::{MemoryStore, SqliteStore};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

struct Harness {
    store: Arc<dyn MeteringStore>,
    identity: Arc<TokenIdentityProvider>,
    gateway: Arc<Gateway>,
    admin_token: String,
}

impl Harness {
    async fn new(store: Arc<dyn MeteringStore>, config: GatewayConfig) -> Self {
        let identity = Arc::new(TokenIdentityProvider::new());
        let gateway = Arc::new(Gateway::new(Arc::clone(&store), identity.clone(), &config));

        let admin = UserAccount::new("root", "root@example.com").with_role(UserRole::Admin);
        let admin_id = admin.id;
        store.create_user(&admin).await.unwrap();
        let admin_token = identity.issue(admin_id, UserRole::Admin).await;

        Self {
            store,
            identity,
            gateway,
            admin_token,
        }
    }

    async fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), GatewayConfig::default()).await
    }

    async fn user(&self, username: &str, credits: Decimal) -> String {
        let mut user = UserAccount::new(username, format!("{username}@example.com"));
        user.credits = credits;
        let id = user.id;
        self.store.create_user(&user).await.unwrap();
        self.identity.issue(id, UserRole::User).await
    }

    async fn plan(&self, name: &str, price: Decimal, max_chats_per_hour: u32) -> creditgate_core::PlanId {
        self.gateway
            .create_plan(
                &self.admin_token,
                NewPlan {
                    name: name.to_string(),
                    price,
                    duration_days: 30,
                    max_chats_per_hour,
                    max_tokens_per_month: 10_000_000,
                    can_access_vip_models: false,
                    description: None,
                },
            )
            .await
            .unwrap()
            .id
    }
}

#[tokio::test]
async fn test_full_flow_over_memory_store() {
    let h = Harness::memory().await;
    let token = h.user("alice", dec!(100)).await;
    let plan_id = h.plan("basic", dec!(9.99), 100).await;

    h.gateway.subscribe(&token, plan_id).await.unwrap();
    assert_eq!(h.gateway.get_balance(&token).await.unwrap(), dec!(90.01));

    let record = h
        .gateway
        .create_chat(&token, "gpt-3.5-turbo", 1000, 1000)
        .await
        .unwrap();
    assert_eq!(record.cost, dec!(0.0035));

    let usage = h.gateway.get_usage(&token).await.unwrap();
    assert_eq!(usage.chats_this_hour, 1);
    assert_eq!(usage.tokens_this_month, 2000);

    // Replay: signed amounts sum to the live balance.
    let entries = h.gateway.get_transactions(&token, 0, 100).await.unwrap();
    assert_eq!(entries.len(), 2);
    let replayed: Decimal = entries.iter().map(|e| e.amount).sum::<Decimal>() + dec!(100);
    assert_eq!(replayed, h.gateway.get_balance(&token).await.unwrap());
}

#[tokio::test]
async fn test_full_flow_over_sqlite_store() {
    let store = Arc::new(SqliteStore::new("sqlite::memory:").await.unwrap());
    let h = Harness::new(store, GatewayConfig::default()).await;
    let token = h.user("alice", dec!(50)).await;
    let plan_id = h.plan("basic", dec!(10), 100).await;

    h.gateway.subscribe(&token, plan_id).await.unwrap();
    let record = h
        .gateway
        .create_chat(&token, "gpt-4", 1000, 1000)
        .await
        .unwrap();
    assert_eq!(record.cost, dec!(0.09));
    assert_eq!(h.gateway.get_balance(&token).await.unwrap(), dec!(39.91));

    let entries = h.gateway.get_transactions(&token, 0, 100).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].balance_after, dec!(39.91));

    let stats = h.gateway.get_statistics(&token).await.unwrap();
    assert_eq!(stats.total_chats, 1);
    assert_eq!(stats.total_cost, dec!(0.09));
}

#[tokio::test]
async fn test_concurrent_chats_respect_quota_exactly() {
    let h = Harness::memory().await;
    let token = h.user("alice", dec!(1000)).await;
    let plan_id = h.plan("small", Decimal::ZERO, 5).await;
    h.gateway.subscribe(&token, plan_id).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let gateway = Arc::clone(&h.gateway);
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            gateway.create_chat(&token, "gpt-3.5-turbo", 10, 10).await
        }));
    }

    let mut admitted = 0;
    let mut rate_limited = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(MeterError::RateLimitExceeded(_)) => rate_limited += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    // The quota admits exactly five racing requests, never six.
    assert_eq!(admitted, 5);
    assert_eq!(rate_limited, 5);
    assert_eq!(h.gateway.get_chats(&token, 0, 100).await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_concurrent_chats_cannot_overdraw() {
    // Price a model at 6 credits per request so two requests overdraw a
    // balance of 10.
    let mut config = GatewayConfig::default();
    config.pricing.custom_models.insert(
        "expensive".to_string(),
        ModelRateConfig {
            input_per_thousand: 3.0,
            output_per_thousand: 3.0,
        },
    );

    let h = Harness::new(Arc::new(MemoryStore::new()), config).await;
    let token = h.user("alice", dec!(10)).await;
    let plan_id = h.plan("basic", Decimal::ZERO, 100).await;
    h.gateway.subscribe(&token, plan_id).await.unwrap();

    let (a, b) = tokio::join!(
        h.gateway.create_chat(&token, "expensive", 1000, 1000),
        h.gateway.create_chat(&token, "expensive", 1000, 1000),
    );

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(MeterError::InsufficientBalance { .. })
    )));
    assert_eq!(h.gateway.get_balance(&token).await.unwrap(), dec!(4));
    assert_eq!(h.gateway.get_chats(&token, 0, 100).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_subscribe_preserves_prior_subscription() {
    let h = Harness::memory().await;
    let token = h.user("alice", dec!(10)).await;
    let plan_a = h.plan("plan-a", dec!(10), 100).await;
    let plan_b = h.plan("plan-b", dec!(50), 100).await;

    let sub_a = h.gateway.subscribe(&token, plan_a).await.unwrap();

    let err = h.gateway.subscribe(&token, plan_b).await.unwrap_err();
    assert!(matches!(err, MeterError::InsufficientBalance { .. }));

    let current = h.gateway.get_subscription(&token).await.unwrap().unwrap();
    assert_eq!(current.id, sub_a.id);
    assert_eq!(h.gateway.get_balance(&token).await.unwrap(), Decimal::ZERO);
}

#[tokio::test]
async fn test_expired_subscription_blocks_chats() {
    let h = Harness::memory().await;
    let token = h.user("alice", dec!(10)).await;
    let plan_id = h.plan("basic", Decimal::ZERO, 100).await;

    // Activate a subscription whose end date has already passed.
    let alice = h.store.user_by_username("alice").await.unwrap().unwrap();
    let mut expired = creditgate_core::Subscription::new(alice.id, plan_id, 30);
    expired.ends_at = chrono::Utc::now() - chrono::Duration::days(1);
    h.store.activate_subscription(&expired).await.unwrap();

    assert!(!h.gateway.get_subscription_status(&token).await.unwrap());
    assert!(h.gateway.get_subscription(&token).await.unwrap().is_none());

    let err = h
        .gateway
        .create_chat(&token, "gpt-3.5-turbo", 10, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, MeterError::AccessDenied { .. }));
}

#[tokio::test]
async fn test_cross_user_requests_do_not_contend() {
    let h = Harness::memory().await;
    let plan_id = h.plan("basic", Decimal::ZERO, 100).await;

    let mut tokens = Vec::new();
    for i in 0..4 {
        let token = h.user(&format!("user{i}"), dec!(10)).await;
        h.gateway.subscribe(&token, plan_id).await.unwrap();
        tokens.push(token);
    }

    let mut handles = Vec::new();
    for token in &tokens {
        for _ in 0..3 {
            let gateway = Arc::clone(&h.gateway);
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                gateway.create_chat(&token, "gpt-3.5-turbo", 100, 100).await
            }));
        }
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    for token in &tokens {
        assert_eq!(h.gateway.get_chats(token, 0, 100).await.unwrap().len(), 3);
    }
}

#[tokio::test]
async fn test_subscription_history_preserved_across_switches() {
    let h = Harness::memory().await;
    let token = h.user("alice", dec!(100)).await;
    let plan_a = h.plan("plan-a", dec!(10), 100).await;
    let plan_b = h.plan("plan-b", dec!(20), 100).await;

    h.gateway.subscribe(&token, plan_a).await.unwrap();
    h.gateway.subscribe(&token, plan_b).await.unwrap();

    let history = h
        .gateway
        .get_subscription_history(&token, 0, 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert!(!history[0].is_active);
    assert!(history[1].is_active);

    // Both plan charges are on the ledger.
    let entries = h.gateway.get_transactions(&token, 0, 10).await.unwrap();
    let descriptions: Vec<&str> = entries.iter().map(|e| e.description.as_str()).collect();
    assert_eq!(
        descriptions,
        vec!["Subscription: plan-a", "Subscription: plan-b"]
    );
    assert_eq!(h.gateway.get_balance(&token).await.unwrap(), dec!(70));
}
