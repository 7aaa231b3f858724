//! Chat admission: the orchestration of one metered request.
//!
//! Entitlement check, quota check, pricing, debit, and usage recording run
//! under the caller's user stripe, so concurrent requests from the same
//! user cannot both pass the quota check and then both debit past a
//! limit. The debit is the last fallible business step: a rejected
//! request never leaves a usage record or a ledger entry behind.

use creditgate_core::{
    ChatId, ChatStatistics, ChatUsageRecord, MeterError, MeteringStore, ModelUsage, Result,
    TransactionKind, UserId,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::entitlement::EntitlementEngine;
use crate::ledger::Ledger;
use crate::locks::UserLocks;
use crate::pricing::PriceTable;
use crate::with_store_timeout;

/// Admits, prices, and records chat requests.
#[derive(Clone)]
pub struct AdmissionController {
    store: Arc<dyn MeteringStore>,
    entitlement: EntitlementEngine,
    ledger: Ledger,
    pricing: Arc<PriceTable>,
    locks: Arc<UserLocks>,
    store_timeout: Duration,
}

impl AdmissionController {
    /// Create a new admission controller.
    pub fn new(
        store: Arc<dyn MeteringStore>,
        entitlement: EntitlementEngine,
        ledger: Ledger,
        pricing: Arc<PriceTable>,
        locks: Arc<UserLocks>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            entitlement,
            ledger,
            pricing,
            locks,
            store_timeout,
        }
    }

    /// Admit one chat request for a user.
    ///
    /// Checks model access and quota, prices the request, debits the cost,
    /// and persists a usage record. Zero-cost requests (zero tokens) skip
    /// the debit so no zero-amount ledger entry is created.
    pub async fn admit_chat(
        &self,
        user_id: UserId,
        model_name: &str,
        input_tokens: i64,
        output_tokens: i64,
    ) -> Result<ChatUsageRecord> {
        let input = u32::try_from(input_tokens)
            .map_err(|_| MeterError::InvalidTokenCount(input_tokens))?;
        let output = u32::try_from(output_tokens)
            .map_err(|_| MeterError::InvalidTokenCount(output_tokens))?;

        let _guard = self.locks.acquire(user_id).await;

        if !self.entitlement.can_access_model(user_id, model_name).await? {
            warn!(user_id = %user_id, model = model_name, "model access denied");
            return Err(MeterError::AccessDenied {
                model: model_name.to_string(),
            });
        }

        if !self.entitlement.can_send_chat(user_id).await? {
            warn!(user_id = %user_id, "chat rejected: quota exhausted");
            return Err(MeterError::RateLimitExceeded(
                "chat or token quota exhausted for the current window".to_string(),
            ));
        }

        let cost = self
            .pricing
            .cost(model_name, input_tokens, output_tokens)?;

        if cost > Decimal::ZERO {
            self.ledger
                .debit(user_id, cost, TransactionKind::ChatCost, model_name)
                .await?;
        }

        let record = ChatUsageRecord::new(user_id, model_name, input, output, cost);
        with_store_timeout(self.store_timeout, self.store.insert_chat(&record)).await?;

        info!(
            user_id = %user_id,
            chat_id = %record.id,
            model = model_name,
            input_tokens = input,
            output_tokens = output,
            cost = %cost,
            "chat admitted"
        );
        Ok(record)
    }

    /// Fetch a usage record by ID.
    pub async fn chat(&self, chat_id: ChatId) -> Result<ChatUsageRecord> {
        with_store_timeout(self.store_timeout, self.store.chat(chat_id))
            .await?
            .ok_or(MeterError::ChatNotFound { chat_id })
    }

    /// A user's usage records in insertion order, paginated.
    pub async fn chats(
        &self,
        user_id: UserId,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<ChatUsageRecord>> {
        with_store_timeout(self.store_timeout, self.store.chats(user_id, offset, limit)).await
    }

    /// Aggregate chat statistics for a user, with a per-model breakdown.
    pub async fn statistics(&self, user_id: UserId) -> Result<ChatStatistics> {
        let records = with_store_timeout(
            self.store_timeout,
            self.store.chats(user_id, 0, u32::MAX),
        )
        .await?;

        let mut per_model: HashMap<String, ModelUsage> = HashMap::new();
        let mut total_tokens = 0u64;
        let mut total_cost = Decimal::ZERO;
        for record in &records {
            total_tokens += record.total_tokens();
            total_cost += record.cost;
            let slot = per_model.entry(record.model_name.clone()).or_default();
            slot.chats += 1;
            slot.tokens += record.total_tokens();
            slot.cost += record.cost;
        }

        Ok(ChatStatistics {
            total_chats: records.len() as u64,
            total_tokens,
            total_cost,
            per_model,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{NewPlan, PlanCatalog};
    use crate::models::ModelRegistry;
    use creditgate_core::{PricingConfig, UserAccount};
    use creditgate_storage::MemoryStore;
    use rust_decimal_macros::dec;

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct Fixture {
        store: Arc<MemoryStore>,
        admission: AdmissionController,
        entitlement: EntitlementEngine,
        ledger: Ledger,
        catalog: PlanCatalog,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let locks = Arc::new(UserLocks::new());
        let ledger = Ledger::new(store.clone(), TIMEOUT);
        let catalog = PlanCatalog::new(store.clone(), TIMEOUT);
        let entitlement = EntitlementEngine::new(
            store.clone(),
            ledger.clone(),
            catalog.clone(),
            Arc::new(ModelRegistry::builtin()),
            locks.clone(),
            TIMEOUT,
        );
        let admission = AdmissionController::new(
            store.clone(),
            entitlement.clone(),
            ledger.clone(),
            Arc::new(PriceTable::new(&PricingConfig::default())),
            locks,
            TIMEOUT,
        );
        Fixture {
            store,
            admission,
            entitlement,
            ledger,
            catalog,
        }
    }

    async fn subscribed_user(fx: &Fixture, credits: Decimal) -> UserId {
        let mut user = UserAccount::new("alice", "alice@example.com");
        user.credits = credits;
        let id = user.id;
        fx.store.create_user(&user).await.unwrap();
        let plan = fx
            .catalog
            .create(NewPlan {
                name: "basic".to_string(),
                price: Decimal::ZERO,
                duration_days: 30,
                max_chats_per_hour: 10,
                max_tokens_per_month: 1_000_000,
                can_access_vip_models: false,
                description: None,
            })
            .await
            .unwrap();
        fx.entitlement.subscribe(id, plan.id).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_admit_chat_debits_and_records() {
        let fx = fixture();
        let user = subscribed_user(&fx, dec!(1)).await;

        let record = fx
            .admission
            .admit_chat(user, "gpt-3.5-turbo", 1000, 1000)
            .await
            .unwrap();
        assert_eq!(record.cost, dec!(0.0035));
        assert_eq!(fx.ledger.balance(user).await.unwrap(), dec!(0.9965));

        let entries = fx.ledger.history(user, 0, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, TransactionKind::ChatCost);
        assert_eq!(entries[0].description, "gpt-3.5-turbo");
    }

    #[tokio::test]
    async fn test_admit_chat_denied_model() {
        let fx = fixture();
        let user = subscribed_user(&fx, dec!(10)).await;

        let err = fx
            .admission
            .admit_chat(user, "vip-gpt-4", 100, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, MeterError::AccessDenied { .. }));
        assert!(fx.admission.chats(user, 0, 10).await.unwrap().is_empty());
        assert_eq!(fx.ledger.balance(user).await.unwrap(), dec!(10));
    }

    #[tokio::test]
    async fn test_admit_chat_quota_exhausted() {
        let fx = fixture();
        let user = subscribed_user(&fx, dec!(10)).await;

        for _ in 0..10 {
            fx.store
                .insert_chat(&ChatUsageRecord::new(user, "gpt-3.5-turbo", 1, 1, dec!(0.0001)))
                .await
                .unwrap();
        }

        let err = fx
            .admission
            .admit_chat(user, "gpt-3.5-turbo", 100, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, MeterError::RateLimitExceeded(_)));
        assert_eq!(fx.ledger.balance(user).await.unwrap(), dec!(10));
    }

    #[tokio::test]
    async fn test_admit_chat_insufficient_balance_leaves_no_record() {
        let fx = fixture();
        let user = subscribed_user(&fx, dec!(0.001)).await;

        let err = fx
            .admission
            .admit_chat(user, "gpt-3.5-turbo", 1000, 1000)
            .await
            .unwrap_err();
        assert!(matches!(err, MeterError::InsufficientBalance { .. }));
        assert!(fx.admission.chats(user, 0, 10).await.unwrap().is_empty());
        assert_eq!(fx.ledger.balance(user).await.unwrap(), dec!(0.001));
    }

    #[tokio::test]
    async fn test_admit_chat_negative_tokens_rejected() {
        let fx = fixture();
        let user = subscribed_user(&fx, dec!(10)).await;
        assert!(matches!(
            fx.admission.admit_chat(user, "gpt-3.5-turbo", -1, 0).await,
            Err(MeterError::InvalidTokenCount(-1))
        ));
    }

    #[tokio::test]
    async fn test_zero_cost_chat_records_without_ledger_entry() {
        let fx = fixture();
        let user = subscribed_user(&fx, Decimal::ZERO).await;

        let record = fx
            .admission
            .admit_chat(user, "gpt-3.5-turbo", 0, 0)
            .await
            .unwrap();
        assert_eq!(record.cost, Decimal::ZERO);
        assert_eq!(fx.admission.chats(user, 0, 10).await.unwrap().len(), 1);
        assert!(fx.ledger.history(user, 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chat_lookup() {
        let fx = fixture();
        let user = subscribed_user(&fx, dec!(10)).await;
        let record = fx
            .admission
            .admit_chat(user, "gpt-3.5-turbo", 10, 10)
            .await
            .unwrap();

        let fetched = fx.admission.chat(record.id).await.unwrap();
        assert_eq!(fetched.id, record.id);
        assert!(matches!(
            fx.admission.chat(ChatId::new()).await,
            Err(MeterError::ChatNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_statistics_aggregation() {
        let fx = fixture();
        let user = subscribed_user(&fx, dec!(10)).await;
        fx.admission
            .admit_chat(user, "gpt-3.5-turbo", 1000, 1000)
            .await
            .unwrap();
        fx.admission
            .admit_chat(user, "gpt-3.5-turbo", 1000, 1000)
            .await
            .unwrap();
        fx.admission
            .admit_chat(user, "llama-2", 1000, 1000)
            .await
            .unwrap();

        let stats = fx.admission.statistics(user).await.unwrap();
        assert_eq!(stats.total_chats, 3);
        assert_eq!(stats.total_tokens, 6000);
        assert_eq!(stats.total_cost, dec!(0.008));
        assert_eq!(stats.per_model.len(), 2);
        let turbo = &stats.per_model["gpt-3.5-turbo"];
        assert_eq!(turbo.chats, 2);
        assert_eq!(turbo.tokens, 4000);
        assert_eq!(turbo.cost, dec!(0.007));
    }

    #[tokio::test]
    async fn test_concurrent_admissions_serialize() {
        let fx = fixture();
        let user = subscribed_user(&fx, dec!(10)).await;

        let admission = fx.admission.clone();
        let (a, b) = tokio::join!(
            admission.admit_chat(user, "gpt-3.5-turbo", 1000, 1000),
            fx.admission.admit_chat(user, "gpt-3.5-turbo", 1000, 1000),
        );
        assert!(a.is_ok());
        assert!(b.is_ok());

        // Both admitted inside quota; the ledger saw two serialized debits.
        assert_eq!(fx.ledger.balance(user).await.unwrap(), dec!(9.993));
        assert_eq!(fx.ledger.history(user, 0, 10).await.unwrap().len(), 2);
        assert_eq!(fx.admission.chats(user, 0, 10).await.unwrap().len(), 2);
    }
}
