//! Subscription plan catalog.
//!
//! Storage and lookup only; quota enforcement against a plan lives in the
//! entitlement engine.

use creditgate_core::{MeterError, MeteringStore, PlanId, Result, SubscriptionPlan};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::with_store_timeout;

/// Parameters for a new plan; the catalog assigns the ID.
#[derive(Debug, Clone)]
pub struct NewPlan {
    /// Unique plan name.
    pub name: String,
    /// Price in credits, charged on activation.
    pub price: Decimal,
    /// Subscription length in days.
    pub duration_days: u32,
    /// Maximum chats admitted per rolling hour.
    pub max_chats_per_hour: u32,
    /// Maximum (input + output) tokens per calendar month.
    pub max_tokens_per_month: u64,
    /// Whether the plan grants access to VIP-gated models.
    pub can_access_vip_models: bool,
    /// Optional human-readable description.
    pub description: Option<String>,
}

/// CRUD over subscription plans.
#[derive(Clone)]
pub struct PlanCatalog {
    store: Arc<dyn MeteringStore>,
    store_timeout: Duration,
}

impl PlanCatalog {
    /// Create a new catalog over the given store.
    pub fn new(store: Arc<dyn MeteringStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    /// Create a plan. Fails with [`MeterError::DuplicatePlan`] when the
    /// name is taken.
    pub async fn create(&self, new_plan: NewPlan) -> Result<SubscriptionPlan> {
        let plan = SubscriptionPlan {
            id: PlanId::new(),
            name: new_plan.name,
            price: new_plan.price,
            duration_days: new_plan.duration_days,
            max_chats_per_hour: new_plan.max_chats_per_hour,
            max_tokens_per_month: new_plan.max_tokens_per_month,
            can_access_vip_models: new_plan.can_access_vip_models,
            description: new_plan.description,
        };
        with_store_timeout(self.store_timeout, self.store.create_plan(&plan)).await?;
        info!(plan_id = %plan.id, name = %plan.name, "plan created");
        Ok(plan)
    }

    /// Fetch a plan by ID. Fails with [`MeterError::PlanNotFound`] when
    /// absent.
    pub async fn get(&self, plan_id: PlanId) -> Result<SubscriptionPlan> {
        with_store_timeout(self.store_timeout, self.store.plan(plan_id))
            .await?
            .ok_or(MeterError::PlanNotFound { plan_id })
    }

    /// Fetch a plan by unique name.
    pub async fn get_by_name(&self, name: &str) -> Result<Option<SubscriptionPlan>> {
        with_store_timeout(self.store_timeout, self.store.plan_by_name(name)).await
    }

    /// List plans in insertion order, paginated.
    pub async fn list(&self, offset: u32, limit: u32) -> Result<Vec<SubscriptionPlan>> {
        with_store_timeout(self.store_timeout, self.store.list_plans(offset, limit)).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use creditgate_storage::MemoryStore;
    use rust_decimal_macros::dec;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn basic_plan(name: &str) -> NewPlan {
        NewPlan {
            name: name.to_string(),
            price: dec!(9.99),
            duration_days: 30,
            max_chats_per_hour: 10,
            max_tokens_per_month: 1_000_000,
            can_access_vip_models: false,
            description: None,
        }
    }

    fn catalog() -> PlanCatalog {
        PlanCatalog::new(Arc::new(MemoryStore::new()), TIMEOUT)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let catalog = catalog();
        let created = catalog.create(basic_plan("basic")).await.unwrap();
        let fetched = catalog.get(created.id).await.unwrap();
        assert_eq!(fetched.name, "basic");
        assert_eq!(fetched.price, dec!(9.99));
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let catalog = catalog();
        catalog.create(basic_plan("basic")).await.unwrap();
        let err = catalog.create(basic_plan("basic")).await.unwrap_err();
        assert!(matches!(err, MeterError::DuplicatePlan(_)));
    }

    #[tokio::test]
    async fn test_get_unknown_plan() {
        let catalog = catalog();
        assert!(matches!(
            catalog.get(PlanId::new()).await,
            Err(MeterError::PlanNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_get_by_name_and_list() {
        let catalog = catalog();
        catalog.create(basic_plan("basic")).await.unwrap();
        catalog.create(basic_plan("premium")).await.unwrap();

        let by_name = catalog.get_by_name("premium").await.unwrap();
        assert!(by_name.is_some());
        assert!(catalog.get_by_name("missing").await.unwrap().is_none());

        let listed = catalog.list(0, 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "basic");
    }
}
