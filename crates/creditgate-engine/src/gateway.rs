//! Gateway facade: the logical API surface.
//!
//! Wires the engine components over a store and an identity provider and
//! exposes the operations a transport layer calls. Every per-user
//! operation resolves the caller token first; the engine below never sees
//! credential material.

use creditgate_core::{
    CallerIdentity, ChatId, ChatStatistics, ChatUsageRecord, GatewayConfig, IdentityProvider,
    LedgerEntry, MeterError, MeteringStore, ModelEntry, PlanId, RateLimitStatus, Result,
    Subscription, SubscriptionPlan, UsageSummary,
};
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::admission::AdmissionController;
use crate::catalog::{NewPlan, PlanCatalog};
use crate::entitlement::EntitlementEngine;
use crate::ledger::Ledger;
use crate::locks::UserLocks;
use crate::models::ModelRegistry;
use crate::pricing::PriceTable;

/// The metering engine behind one gateway deployment.
pub struct Gateway {
    identity: Arc<dyn IdentityProvider>,
    ledger: Ledger,
    catalog: PlanCatalog,
    entitlement: EntitlementEngine,
    admission: AdmissionController,
    registry: Arc<ModelRegistry>,
}

impl Gateway {
    /// Assemble the engine components over a store and identity provider.
    pub fn new(
        store: Arc<dyn MeteringStore>,
        identity: Arc<dyn IdentityProvider>,
        config: &GatewayConfig,
    ) -> Self {
        let store_timeout = config.store_timeout();
        let locks = Arc::new(UserLocks::new());
        let registry = Arc::new(ModelRegistry::builtin());
        let pricing = Arc::new(PriceTable::new(&config.pricing));

        let ledger = Ledger::new(Arc::clone(&store), store_timeout);
        let catalog = PlanCatalog::new(Arc::clone(&store), store_timeout);
        let entitlement = EntitlementEngine::new(
            Arc::clone(&store),
            ledger.clone(),
            catalog.clone(),
            Arc::clone(&registry),
            Arc::clone(&locks),
            store_timeout,
        );
        let admission = AdmissionController::new(
            Arc::clone(&store),
            entitlement.clone(),
            ledger.clone(),
            pricing,
            locks,
            store_timeout,
        );

        Self {
            identity,
            ledger,
            catalog,
            entitlement,
            admission,
            registry,
        }
    }

    /// The ledger component.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// The plan catalog component.
    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    /// The entitlement engine component.
    pub fn entitlement(&self) -> &EntitlementEngine {
        &self.entitlement
    }

    /// The admission controller component.
    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    async fn authenticate(&self, token: &str) -> Result<CallerIdentity> {
        self.identity.authenticate(token).await
    }

    // -- chats -------------------------------------------------------------

    /// Admit a chat request for the caller.
    pub async fn create_chat(
        &self,
        token: &str,
        model_name: &str,
        input_tokens: i64,
        output_tokens: i64,
    ) -> Result<ChatUsageRecord> {
        let caller = self.authenticate(token).await?;
        self.admission
            .admit_chat(caller.user_id, model_name, input_tokens, output_tokens)
            .await
    }

    /// Fetch one of the caller's usage records.
    pub async fn get_chat(&self, token: &str, chat_id: ChatId) -> Result<ChatUsageRecord> {
        let caller = self.authenticate(token).await?;
        let record = self.admission.chat(chat_id).await?;
        if record.user_id != caller.user_id && !caller.role.is_admin() {
            return Err(MeterError::Forbidden(
                "chat record belongs to another user".to_string(),
            ));
        }
        Ok(record)
    }

    /// The caller's usage records, paginated.
    pub async fn get_chats(
        &self,
        token: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<ChatUsageRecord>> {
        let caller = self.authenticate(token).await?;
        self.admission.chats(caller.user_id, offset, limit).await
    }

    /// The caller's aggregate chat statistics.
    pub async fn get_statistics(&self, token: &str) -> Result<ChatStatistics> {
        let caller = self.authenticate(token).await?;
        self.admission.statistics(caller.user_id).await
    }

    // -- ledger ------------------------------------------------------------

    /// The caller's current balance.
    pub async fn get_balance(&self, token: &str) -> Result<Decimal> {
        let caller = self.authenticate(token).await?;
        self.ledger.balance(caller.user_id).await
    }

    /// The caller's ledger entries, paginated in insertion order.
    pub async fn get_transactions(
        &self,
        token: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<LedgerEntry>> {
        let caller = self.authenticate(token).await?;
        self.ledger.history(caller.user_id, offset, limit).await
    }

    /// Add credits to the caller's balance.
    pub async fn top_up(&self, token: &str, amount: Decimal) -> Result<LedgerEntry> {
        let caller = self.authenticate(token).await?;
        self.ledger
            .credit(caller.user_id, amount, &format!("Added {amount} credits"))
            .await
    }

    // -- plans & subscriptions ---------------------------------------------

    /// Create a subscription plan. Admin only.
    pub async fn create_plan(&self, token: &str, new_plan: NewPlan) -> Result<SubscriptionPlan> {
        let caller = self.authenticate(token).await?;
        if !caller.role.is_admin() {
            return Err(MeterError::Forbidden(
                "only admins may create plans".to_string(),
            ));
        }
        self.catalog.create(new_plan).await
    }

    /// Fetch a plan by ID.
    pub async fn get_plan(&self, plan_id: PlanId) -> Result<SubscriptionPlan> {
        self.catalog.get(plan_id).await
    }

    /// List plans, paginated.
    pub async fn list_plans(&self, offset: u32, limit: u32) -> Result<Vec<SubscriptionPlan>> {
        self.catalog.list(offset, limit).await
    }

    /// Subscribe the caller to a plan.
    pub async fn subscribe(&self, token: &str, plan_id: PlanId) -> Result<Subscription> {
        let caller = self.authenticate(token).await?;
        self.entitlement.subscribe(caller.user_id, plan_id).await
    }

    /// The caller's active subscription, if any.
    pub async fn get_subscription(&self, token: &str) -> Result<Option<Subscription>> {
        let caller = self.authenticate(token).await?;
        self.entitlement.current_subscription(caller.user_id).await
    }

    /// Whether the caller has a live subscription.
    pub async fn get_subscription_status(&self, token: &str) -> Result<bool> {
        let caller = self.authenticate(token).await?;
        self.entitlement.is_active(caller.user_id).await
    }

    /// All of the caller's subscriptions, paginated.
    pub async fn get_subscription_history(
        &self,
        token: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Subscription>> {
        let caller = self.authenticate(token).await?;
        self.entitlement
            .subscription_history(caller.user_id, offset, limit)
            .await
    }

    // -- entitlement views -------------------------------------------------

    /// The caller's quota consumption for the current windows.
    pub async fn get_usage(&self, token: &str) -> Result<UsageSummary> {
        let caller = self.authenticate(token).await?;
        self.entitlement.usage(caller.user_id).await
    }

    /// The models the caller may currently target, gated by role and plan.
    pub async fn get_available_models(&self, token: &str) -> Result<Vec<ModelEntry>> {
        let caller = self.authenticate(token).await?;
        let usage = self.entitlement.usage(caller.user_id).await?;
        Ok(self.registry.available_for(caller.role, usage.plan.as_ref()))
    }

    /// The caller's usage plus the verdict for the next chat.
    pub async fn get_rate_limit_status(&self, token: &str) -> Result<RateLimitStatus> {
        let caller = self.authenticate(token).await?;
        let usage = self.entitlement.usage(caller.user_id).await?;
        let can_send_chat = self.entitlement.can_send_chat(caller.user_id).await?;
        Ok(RateLimitStatus {
            usage,
            can_send_chat,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
