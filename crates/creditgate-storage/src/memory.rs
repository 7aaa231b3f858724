//! In-memory store for testing and development.
//!
//! Data is lost when the struct is dropped. All methods are `O(n)` linear
//! scans. Ledger and subscription mutations take the relevant write locks
//! for the whole operation, so each store call is atomic on its own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use creditgate_core::{
    ChatId, ChatUsageRecord, LedgerEntry, MeterError, MeteringStore, PlanId, Result, Subscription,
    SubscriptionId, SubscriptionPlan, TransactionId, TransactionKind, UserAccount, UserId,
};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

/// In-memory [`MeteringStore`] implementation.
pub struct MemoryStore {
    users: RwLock<Vec<UserAccount>>,
    transactions: RwLock<Vec<LedgerEntry>>,
    plans: RwLock<Vec<SubscriptionPlan>>,
    subscriptions: RwLock<Vec<Subscription>>,
    chats: RwLock<Vec<ChatUsageRecord>>,
}

impl MemoryStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self {
            users: RwLock::new(Vec::new()),
            transactions: RwLock::new(Vec::new()),
            plans: RwLock::new(Vec::new()),
            subscriptions: RwLock::new(Vec::new()),
            chats: RwLock::new(Vec::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply offset/limit pagination to an already-ordered vector.
fn paginate<T>(mut items: Vec<T>, offset: u32, limit: u32) -> Vec<T> {
    let offset = offset as usize;
    if offset >= items.len() {
        return Vec::new();
    }
    let mut tail = items.split_off(offset);
    tail.truncate(limit as usize);
    tail
}

#[async_trait]
impl MeteringStore for MemoryStore {
    // -- users -------------------------------------------------------------

    async fn create_user(&self, user: &UserAccount) -> Result<()> {
        let mut users = self.users.write().await;
        if users.iter().any(|u| u.username == user.username) {
            return Err(MeterError::DuplicateUser(user.username.clone()));
        }
        if users.iter().any(|u| u.email == user.email) {
            return Err(MeterError::DuplicateUser(user.email.clone()));
        }
        users.push(user.clone());
        Ok(())
    }

    async fn user(&self, id: UserId) -> Result<Option<UserAccount>> {
        let users = self.users.read().await;
        Ok(users.iter().find(|u| u.id == id).cloned())
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<UserAccount>> {
        let users = self.users.read().await;
        Ok(users.iter().find(|u| u.username == username).cloned())
    }

    async fn list_users(&self, offset: u32, limit: u32) -> Result<Vec<UserAccount>> {
        let users = self.users.read().await;
        Ok(paginate(users.clone(), offset, limit))
    }

    async fn update_user(&self, user: &UserAccount) -> Result<()> {
        let mut users = self.users.write().await;
        match users.iter_mut().find(|u| u.id == user.id) {
            Some(existing) => {
                *existing = user.clone();
                Ok(())
            }
            None => Err(MeterError::UserNotFound { user_id: user.id }),
        }
    }

    async fn delete_user(&self, id: UserId) -> Result<bool> {
        let mut users = self.users.write().await;
        let before = users.len();
        users.retain(|u| u.id != id);
        Ok(users.len() < before)
    }

    // -- ledger ------------------------------------------------------------

    async fn apply_credit(
        &self,
        user_id: UserId,
        amount: Decimal,
        description: &str,
    ) -> Result<LedgerEntry> {
        let mut users = self.users.write().await;
        let user = users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(MeterError::UserNotFound { user_id })?;

        user.credits += amount;
        let entry = LedgerEntry {
            id: TransactionId::new(),
            user_id,
            amount,
            kind: TransactionKind::Deposit,
            description: description.to_string(),
            balance_after: user.credits,
            created_at: Utc::now(),
        };

        let mut transactions = self.transactions.write().await;
        transactions.push(entry.clone());
        Ok(entry)
    }

    async fn apply_debit(
        &self,
        user_id: UserId,
        amount: Decimal,
        kind: TransactionKind,
        description: &str,
    ) -> Result<LedgerEntry> {
        let mut users = self.users.write().await;
        let user = users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(MeterError::UserNotFound { user_id })?;

        if user.credits < amount {
            return Err(MeterError::InsufficientBalance {
                required: amount,
                available: user.credits,
            });
        }

        user.credits -= amount;
        let entry = LedgerEntry {
            id: TransactionId::new(),
            user_id,
            amount: -amount,
            kind,
            description: description.to_string(),
            balance_after: user.credits,
            created_at: Utc::now(),
        };

        let mut transactions = self.transactions.write().await;
        transactions.push(entry.clone());
        Ok(entry)
    }

    async fn transactions(
        &self,
        user_id: UserId,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<LedgerEntry>> {
        let transactions = self.transactions.read().await;
        let for_user: Vec<LedgerEntry> = transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        Ok(paginate(for_user, offset, limit))
    }

    // -- plans -------------------------------------------------------------

    async fn create_plan(&self, plan: &SubscriptionPlan) -> Result<()> {
        let mut plans = self.plans.write().await;
        if plans.iter().any(|p| p.name == plan.name) {
            return Err(MeterError::DuplicatePlan(plan.name.clone()));
        }
        plans.push(plan.clone());
        Ok(())
    }

    async fn plan(&self, id: PlanId) -> Result<Option<SubscriptionPlan>> {
        let plans = self.plans.read().await;
        Ok(plans.iter().find(|p| p.id == id).cloned())
    }

    async fn plan_by_name(&self, name: &str) -> Result<Option<SubscriptionPlan>> {
        let plans = self.plans.read().await;
        Ok(plans.iter().find(|p| p.name == name).cloned())
    }

    async fn list_plans(&self, offset: u32, limit: u32) -> Result<Vec<SubscriptionPlan>> {
        let plans = self.plans.read().await;
        Ok(paginate(plans.clone(), offset, limit))
    }

    // -- subscriptions -----------------------------------------------------

    async fn activate_subscription(&self, subscription: &Subscription) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        for existing in subscriptions
            .iter_mut()
            .filter(|s| s.user_id == subscription.user_id && s.is_active)
        {
            existing.is_active = false;
        }
        subscriptions.push(subscription.clone());
        Ok(())
    }

    async fn deactivate_subscription(&self, id: SubscriptionId) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        if let Some(sub) = subscriptions.iter_mut().find(|s| s.id == id) {
            sub.is_active = false;
        }
        Ok(())
    }

    async fn active_subscription(&self, user_id: UserId) -> Result<Option<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions
            .iter()
            .find(|s| s.user_id == user_id && s.is_active)
            .cloned())
    }

    async fn subscriptions(
        &self,
        user_id: UserId,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        let for_user: Vec<Subscription> = subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        Ok(paginate(for_user, offset, limit))
    }

    // -- chat usage --------------------------------------------------------

    async fn insert_chat(&self, record: &ChatUsageRecord) -> Result<()> {
        let mut chats = self.chats.write().await;
        chats.push(record.clone());
        Ok(())
    }

    async fn chat(&self, id: ChatId) -> Result<Option<ChatUsageRecord>> {
        let chats = self.chats.read().await;
        Ok(chats.iter().find(|c| c.id == id).cloned())
    }

    async fn chats(
        &self,
        user_id: UserId,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<ChatUsageRecord>> {
        let chats = self.chats.read().await;
        let for_user: Vec<ChatUsageRecord> = chats
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        Ok(paginate(for_user, offset, limit))
    }

    async fn count_chats_since(&self, user_id: UserId, since: DateTime<Utc>) -> Result<u64> {
        let chats = self.chats.read().await;
        Ok(chats
            .iter()
            .filter(|c| c.user_id == user_id && c.created_at >= since)
            .count() as u64)
    }

    async fn sum_tokens_since(&self, user_id: UserId, since: DateTime<Utc>) -> Result<u64> {
        let chats = self.chats.read().await;
        Ok(chats
            .iter()
            .filter(|c| c.user_id == user_id && c.created_at >= since)
            .map(ChatUsageRecord::total_tokens)
            .sum())
    }

    // -- health ------------------------------------------------------------

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
