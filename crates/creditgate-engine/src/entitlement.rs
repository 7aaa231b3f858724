//! Subscription lifecycle and entitlement checks.
//!
//! Owns subscription activation and deactivation, lazy expiry, quota
//! window aggregation, and the model-access and send-quota decisions the
//! admission controller consumes. Plan charges go through the ledger so
//! an unaffordable plan never changes subscription state.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Utc};
use creditgate_core::{
    MeterError, MeteringStore, PlanId, Result, Subscription, TransactionKind, UsageSummary, UserId,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::catalog::PlanCatalog;
use crate::ledger::Ledger;
use crate::locks::UserLocks;
use crate::models::ModelRegistry;
use crate::with_store_timeout;

/// First instant of the UTC calendar month containing `now`.
fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    let day_one = now.date_naive().with_day(1).unwrap_or(now.date_naive());
    let midnight = day_one.and_hms_opt(0, 0, 0).unwrap_or(now.naive_utc());
    DateTime::from_naive_utc_and_offset(midnight, Utc)
}

/// Subscription and entitlement operations.
#[derive(Clone)]
pub struct EntitlementEngine {
    store: Arc<dyn MeteringStore>,
    ledger: Ledger,
    catalog: PlanCatalog,
    registry: Arc<ModelRegistry>,
    locks: Arc<UserLocks>,
    store_timeout: Duration,
}

impl EntitlementEngine {
    /// Create a new entitlement engine.
    pub fn new(
        store: Arc<dyn MeteringStore>,
        ledger: Ledger,
        catalog: PlanCatalog,
        registry: Arc<ModelRegistry>,
        locks: Arc<UserLocks>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            catalog,
            registry,
            locks,
            store_timeout,
        }
    }

    /// Subscribe a user to a plan.
    ///
    /// Charges `plan.price` through the ledger first, then atomically
    /// swaps the active subscription. An unaffordable plan fails with
    /// [`creditgate_core::MeterError::InsufficientBalance`] and leaves the
    /// prior subscription active. Zero-price plans skip the ledger charge.
    pub async fn subscribe(&self, user_id: UserId, plan_id: PlanId) -> Result<Subscription> {
        let _guard = self.locks.acquire(user_id).await;

        let plan = self.catalog.get(plan_id).await?;

        if plan.price > Decimal::ZERO {
            self.ledger
                .debit(
                    user_id,
                    plan.price,
                    TransactionKind::Subscription,
                    &format!("Subscription: {}", plan.name),
                )
                .await?;
        }

        let subscription = Subscription::new(user_id, plan.id, plan.duration_days);
        with_store_timeout(
            self.store_timeout,
            self.store.activate_subscription(&subscription),
        )
        .await?;

        info!(
            user_id = %user_id,
            plan = %plan.name,
            subscription_id = %subscription.id,
            ends_at = %subscription.ends_at,
            "subscription activated"
        );
        Ok(subscription)
    }

    /// The user's active subscription, if any.
    pub async fn current_subscription(&self, user_id: UserId) -> Result<Option<Subscription>> {
        with_store_timeout(self.store_timeout, self.store.active_subscription(user_id)).await
    }

    /// Whether the user has a live (active and unexpired) subscription.
    ///
    /// An expired subscription is lazily marked inactive on first
    /// observation; subsequent [`Self::current_subscription`] calls return
    /// `None`.
    pub async fn is_active(&self, user_id: UserId) -> Result<bool> {
        let _guard = self.locks.acquire(user_id).await;
        Ok(self.live_subscription(user_id).await?.is_some())
    }

    /// Quota consumption for the current windows.
    ///
    /// Chats are counted over the last rolling hour; tokens since the
    /// first instant of the current UTC month. Users without a live
    /// subscription get zeros and no plan.
    pub async fn usage(&self, user_id: UserId) -> Result<UsageSummary> {
        let Some(subscription) = self.live_subscription(user_id).await? else {
            return Ok(UsageSummary::empty());
        };
        let plan = self.catalog.get(subscription.plan_id).await?;

        let now = Utc::now();
        let hour_ago = now - ChronoDuration::hours(1);
        let chats_this_hour = with_store_timeout(
            self.store_timeout,
            self.store.count_chats_since(user_id, hour_ago),
        )
        .await?;
        let tokens_this_month = with_store_timeout(
            self.store_timeout,
            self.store.sum_tokens_since(user_id, start_of_month(now)),
        )
        .await?;

        Ok(UsageSummary {
            chats_this_hour,
            tokens_this_month,
            plan: Some(plan),
        })
    }

    /// Whether the user may target the given model.
    ///
    /// Admins bypass all gating. Everyone else needs a live subscription;
    /// VIP-gated models additionally require a plan with VIP access, and
    /// admin-only models are denied outright.
    pub async fn can_access_model(&self, user_id: UserId, model_name: &str) -> Result<bool> {
        let user = with_store_timeout(self.store_timeout, self.store.user(user_id))
            .await?
            .ok_or(MeterError::UserNotFound { user_id })?;
        if user.role.is_admin() {
            return Ok(true);
        }
        if self.registry.admin_gated(model_name) {
            return Ok(false);
        }

        let Some(subscription) = self.live_subscription(user_id).await? else {
            return Ok(false);
        };

        if self.registry.vip_gated(model_name) {
            let plan = self.catalog.get(subscription.plan_id).await?;
            return Ok(plan.can_access_vip_models);
        }
        Ok(true)
    }

    /// Whether the user is under both quota limits.
    ///
    /// The comparisons are inclusive: a user who has consumed exactly the
    /// limit is already over it.
    pub async fn can_send_chat(&self, user_id: UserId) -> Result<bool> {
        let usage = self.usage(user_id).await?;
        let Some(plan) = usage.plan else {
            return Ok(false);
        };

        if usage.chats_this_hour >= u64::from(plan.max_chats_per_hour) {
            debug!(
                user_id = %user_id,
                chats_this_hour = usage.chats_this_hour,
                limit = plan.max_chats_per_hour,
                "chat quota exhausted"
            );
            return Ok(false);
        }
        if usage.tokens_this_month >= plan.max_tokens_per_month {
            debug!(
                user_id = %user_id,
                tokens_this_month = usage.tokens_this_month,
                limit = plan.max_tokens_per_month,
                "token quota exhausted"
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// All of a user's subscriptions in insertion order, paginated.
    pub async fn subscription_history(
        &self,
        user_id: UserId,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Subscription>> {
        with_store_timeout(
            self.store_timeout,
            self.store.subscriptions(user_id, offset, limit),
        )
        .await
    }

    /// Fetch the active subscription, expiring it lazily.
    ///
    /// Deactivation is idempotent, so concurrent observers of the same
    /// expired subscription converge on the same state.
    async fn live_subscription(&self, user_id: UserId) -> Result<Option<Subscription>> {
        let Some(subscription) =
            with_store_timeout(self.store_timeout, self.store.active_subscription(user_id))
                .await?
        else {
            return Ok(None);
        };

        if subscription.is_expired(Utc::now()) {
            info!(
                user_id = %user_id,
                subscription_id = %subscription.id,
                ends_at = %subscription.ends_at,
                "subscription expired"
            );
            with_store_timeout(
                self.store_timeout,
                self.store.deactivate_subscription(subscription.id),
            )
            .await?;
            return Ok(None);
        }
        Ok(Some(subscription))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
