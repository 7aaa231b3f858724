//! Core types, traits, and errors for CreditGate
//!
//! This crate contains the foundational types shared across all CreditGate
//! components: entity records for the metering data model, the store and
//! identity-provider traits, the error taxonomy, and configuration types.
//! It carries no business logic.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Unique identifier for a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Create a new random user ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a subscription plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanId(pub Uuid);

impl PlanId {
    /// Create a new random plan ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    /// Create a new random subscription ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    /// Create a new random transaction ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a chat usage record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub Uuid);

impl ChatId {
    /// Create a new random chat ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Roles & auth types
// ---------------------------------------------------------------------------

/// Role attached to a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Regular account.
    User,
    /// Elevated account; identical to `User` for entitlement purposes
    /// unless a plan grants more.
    Vip,
    /// Full access: bypasses model gating, may manage plans.
    Admin,
}

impl UserRole {
    /// Whether this role bypasses entitlement checks.
    #[must_use]
    pub fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Vip => write!(f, "vip"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "vip" => Ok(Self::Vip),
            "admin" => Ok(Self::Admin),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

/// Authenticated caller context resolved by an [`IdentityProvider`].
#[derive(Debug, Clone, Copy)]
pub struct CallerIdentity {
    /// User the caller is authenticated as.
    pub user_id: UserId,
    /// Role attached to the account at authentication time.
    pub role: UserRole,
}

// ---------------------------------------------------------------------------
// Ledger types
// ---------------------------------------------------------------------------

/// Kind of balance mutation recorded by a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Credits added to the balance.
    Deposit,
    /// Generic withdrawal.
    Withdrawal,
    /// Debit charged for an admitted chat request.
    ChatCost,
    /// Debit charged when activating a subscription plan.
    Subscription,
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deposit => write!(f, "deposit"),
            Self::Withdrawal => write!(f, "withdrawal"),
            Self::ChatCost => write!(f, "chat_cost"),
            Self::Subscription => write!(f, "subscription"),
        }
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(Self::Deposit),
            "withdrawal" => Ok(Self::Withdrawal),
            "chat_cost" => Ok(Self::ChatCost),
            "subscription" => Ok(Self::Subscription),
            _ => Err(format!("unknown transaction kind: {s}")),
        }
    }
}

/// A user account with its credit balance.
///
/// The balance is mutated exclusively through ledger operations; no other
/// component writes `credits`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    /// Unique identifier.
    pub id: UserId,
    /// Unique username.
    pub username: String,
    /// Unique email address.
    pub email: String,
    /// Role for entitlement bypass and plan management.
    pub role: UserRole,
    /// Current credit balance. Never negative.
    pub credits: Decimal,
    /// Whether the account may authenticate.
    pub is_active: bool,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    /// Create a new account with a zero balance and the `User` role.
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            username: username.into(),
            email: email.into(),
            role: UserRole::User,
            credits: Decimal::ZERO,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    /// Set the role.
    pub fn with_role(mut self, role: UserRole) -> Self {
        self.role = role;
        self
    }
}

/// An append-only record of a single balance mutation.
///
/// Entries are never updated or deleted. Replaying a user's entries in
/// insertion order and summing the signed amounts reproduces the current
/// balance exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique identifier.
    pub id: TransactionId,
    /// User whose balance was mutated.
    pub user_id: UserId,
    /// Signed amount: positive for credits, negative for debits.
    pub amount: Decimal,
    /// Kind of mutation.
    pub kind: TransactionKind,
    /// Human-readable description.
    pub description: String,
    /// Balance immediately after this mutation.
    pub balance_after: Decimal,
    /// When the mutation happened.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Subscription types
// ---------------------------------------------------------------------------

/// A subscription plan definition: price, duration, and quota limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    /// Unique identifier.
    pub id: PlanId,
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

/// A user's subscription to a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Unique identifier.
    pub id: SubscriptionId,
    /// Subscribing user.
    pub user_id: UserId,
    /// Plan subscribed to.
    pub plan_id: PlanId,
    /// When the subscription started.
    pub starts_at: DateTime<Utc>,
    /// When the subscription ends: `starts_at + plan.duration_days`.
    pub ends_at: DateTime<Utc>,
    /// Whether this is the user's current subscription. At most one
    /// subscription per user is active at any time.
    pub is_active: bool,
}

impl Subscription {
    /// Create a new active subscription starting now.
    pub fn new(user_id: UserId, plan_id: PlanId, duration_days: u32) -> Self {
        let starts_at = Utc::now();
        Self {
            id: SubscriptionId::new(),
            user_id,
            plan_id,
            starts_at,
            ends_at: starts_at + Duration::days(i64::from(duration_days)),
            is_active: true,
        }
    }

    /// Whether the subscription's end time has passed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ends_at < now
    }
}

// ---------------------------------------------------------------------------
// Chat usage types
// ---------------------------------------------------------------------------

/// An immutable record of one admitted chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatUsageRecord {
    /// Unique identifier.
    pub id: ChatId,
    /// User the request was admitted for.
    pub user_id: UserId,
    /// Model the request targeted.
    pub model_name: String,
    /// Prompt token count.
    pub input_tokens: u32,
    /// Completion token count.
    pub output_tokens: u32,
    /// Cost debited for this request.
    pub cost: Decimal,
    /// When the request was admitted.
    pub created_at: DateTime<Utc>,
}

impl ChatUsageRecord {
    /// Create a new usage record timestamped now.
    pub fn new(
        user_id: UserId,
        model_name: impl Into<String>,
        input_tokens: u32,
        output_tokens: u32,
        cost: Decimal,
    ) -> Self {
        Self {
            id: ChatId::new(),
            user_id,
            model_name: model_name.into(),
            input_tokens,
            output_tokens,
            cost,
            created_at: Utc::now(),
        }
    }

    /// Total token count (input + output).
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        u64::from(self.input_tokens) + u64::from(self.output_tokens)
    }
}

/// Quota consumption for the current windows, as seen by the rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSummary {
    /// Chats admitted in the last rolling hour.
    pub chats_this_hour: u64,
    /// Tokens consumed since the first instant of the current UTC month.
    pub tokens_this_month: u64,
    /// The active plan, if any.
    pub plan: Option<SubscriptionPlan>,
}

impl UsageSummary {
    /// Zero usage with no plan, returned for users without an active
    /// subscription.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            chats_this_hour: 0,
            tokens_this_month: 0,
            plan: None,
        }
    }
}

/// Usage summary plus the admission verdict, for the rate-limit status API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitStatus {
    /// Current quota consumption.
    pub usage: UsageSummary,
    /// Whether the next chat would pass the quota checks.
    pub can_send_chat: bool,
}

/// Per-model slice of a user's chat statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelUsage {
    /// Number of chats against this model.
    pub chats: u64,
    /// Total tokens consumed against this model.
    pub tokens: u64,
    /// Total cost debited for this model.
    pub cost: Decimal,
}

/// Aggregate chat statistics for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatStatistics {
    /// Total number of chats.
    pub total_chats: u64,
    /// Total tokens across all chats.
    pub total_tokens: u64,
    /// Total cost across all chats.
    pub total_cost: Decimal,
    /// Breakdown by model name.
    pub per_model: HashMap<String, ModelUsage>,
}

// ---------------------------------------------------------------------------
// Model registry types
// ---------------------------------------------------------------------------

/// A model known to the gateway, with its access gating attributes.
///
/// Gating is an explicit attribute rather than a naming convention; the
/// `vip_`/`vip-` name prefix is honoured only as a fallback for models
/// absent from the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Model name as sent by clients.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Whether access requires a plan with VIP model access.
    pub requires_vip: bool,
    /// Whether access requires the `Admin` role.
    #[serde(default)]
    pub admin_only: bool,
}

// ---------------------------------------------------------------------------
// Configuration types
// ---------------------------------------------------------------------------

/// Per-model pricing override (per 1 000 tokens).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelRateConfig {
    /// Cost per 1 000 input tokens.
    pub input_per_thousand: f64,
    /// Cost per 1 000 output tokens.
    pub output_per_thousand: f64,
}

/// Pricing configuration section within [`GatewayConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Enable cost calculation. When disabled every chat prices at zero.
    #[serde(default = "default_pricing_enabled")]
    pub enabled: bool,
    /// Optional path to an external pricing YAML file, loaded at startup
    /// and reloadable at runtime. Missing or malformed files fall back to
    /// the built-in table.
    #[serde(default)]
    pub pricing_file: Option<String>,
    /// Inline per-model overrides (model name → per-1000 rates).
    #[serde(default)]
    pub custom_models: HashMap<String, ModelRateConfig>,
}

fn default_pricing_enabled() -> bool {
    true
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            enabled: default_pricing_enabled(),
            pricing_file: None,
            custom_models: HashMap::new(),
        }
    }
}

/// Storage configuration section within [`GatewayConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Storage profile: `"memory"` (in-memory) or `"sqlite"`.
    #[serde(default = "default_store_profile")]
    pub profile: String,
    /// Database file path (used by the `"sqlite"` profile).
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_store_profile() -> String {
    "sqlite".to_string()
}

fn default_database_path() -> String {
    "creditgate.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            profile: default_store_profile(),
            database_path: default_database_path(),
        }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Pricing configuration.
    #[serde(default)]
    pub pricing: PricingConfig,
    /// Storage configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Upper bound in milliseconds for any single store operation issued
    /// by the engine. Expiry surfaces [`MeterError::StoreTimeout`].
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            pricing: PricingConfig::default(),
            store: StoreConfig::default(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| MeterError::Config(format!("failed to read config '{path}': {e}")))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| MeterError::Config(format!("failed to parse config '{path}': {e}")))
    }

    /// Effective store timeout as a [`std::time::Duration`].
    #[must_use]
    pub fn store_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.store_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error taxonomy for ledger, entitlement, and admission operations.
///
/// Every failure is surfaced as a typed variant; partial mutations are
/// never committed behind an error.
#[derive(thiserror::Error, Debug)]
pub enum MeterError {
    /// No user account with the given ID.
    #[error("user not found: {user_id}")]
    UserNotFound {
        /// The unknown user ID.
        user_id: UserId,
    },

    /// No subscription plan with the given ID.
    #[error("plan not found: {plan_id}")]
    PlanNotFound {
        /// The unknown plan ID.
        plan_id: PlanId,
    },

    /// No chat usage record with the given ID.
    #[error("chat record not found: {chat_id}")]
    ChatNotFound {
        /// The unknown chat ID.
        chat_id: ChatId,
    },

    /// Username or email already taken.
    #[error("duplicate user: {0}")]
    DuplicateUser(String),

    /// Plan name already taken.
    #[error("duplicate plan: {0}")]
    DuplicatePlan(String),

    /// Balance too low for the requested debit. No mutation occurred.
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Amount the debit asked for.
        required: Decimal,
        /// Balance at the time of the check.
        available: Decimal,
    },

    /// The caller's role/plan does not grant access to the model.
    #[error("access denied: model '{model}' is not available on the current plan")]
    AccessDenied {
        /// The gated model name.
        model: String,
    },

    /// A chat or token quota for the current window is exhausted.
    #[error("rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Non-positive credit/debit amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// Negative token count.
    #[error("invalid token count: {0}")]
    InvalidTokenCount(i64),

    /// The caller token did not resolve to a user.
    #[error("unauthenticated")]
    Unauthenticated,

    /// The caller's role does not permit the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Storage layer error. Retryable.
    #[error("storage error: {0}")]
    Store(String),

    /// A store operation exceeded its bounded timeout. Retryable.
    #[error("storage operation timed out after {0:?}")]
    StoreTimeout(std::time::Duration),

    /// Serialization / deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl MeterError {
    /// Whether the caller may safely retry the operation.
    ///
    /// Only transient store failures are retryable; every other variant
    /// reflects a stable decision.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::StoreTimeout(_))
    }
}

/// Convenience alias for `std::result::Result<T, MeterError>`.
pub type Result<T> = std::result::Result<T, MeterError>;

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Persistent store consumed by the metering engine.
///
/// Implementations must make each individual method atomic: `apply_debit`
/// performs its balance check, mutation, and entry append as one
/// indivisible step, and `activate_subscription` deactivates the prior
/// active subscription and inserts the new one as one step. Serialization
/// of multi-call sequences (quota check followed by debit) is the
/// engine's responsibility.
#[async_trait]
pub trait MeteringStore: Send + Sync {
    // -- users -------------------------------------------------------------

    /// Insert a new user. Fails with [`MeterError::DuplicateUser`] when the
    /// username or email is taken.
    async fn create_user(&self, user: &UserAccount) -> Result<()>;

    /// Fetch a user by ID.
    async fn user(&self, id: UserId) -> Result<Option<UserAccount>>;

    /// Fetch a user by unique username.
    async fn user_by_username(&self, username: &str) -> Result<Option<UserAccount>>;

    /// List users, paginated in insertion order.
    async fn list_users(&self, offset: u32, limit: u32) -> Result<Vec<UserAccount>>;

    /// Replace a user record. Fails with [`MeterError::UserNotFound`] when
    /// absent. Must not be used to mutate `credits`; balance changes go
    /// through [`Self::apply_credit`] / [`Self::apply_debit`].
    async fn update_user(&self, user: &UserAccount) -> Result<()>;

    /// Delete a user. Returns `false` when the user was absent.
    async fn delete_user(&self, id: UserId) -> Result<bool>;

    // -- ledger ------------------------------------------------------------

    /// Atomically increase a user's balance and append a `Deposit` entry.
    async fn apply_credit(
        &self,
        user_id: UserId,
        amount: Decimal,
        description: &str,
    ) -> Result<LedgerEntry>;

    /// Atomically check the balance, decrease it, and append an entry of
    /// the given kind with a negative signed amount. Fails with
    /// [`MeterError::InsufficientBalance`], without mutating anything,
    /// when the balance is below `amount`.
    async fn apply_debit(
        &self,
        user_id: UserId,
        amount: Decimal,
        kind: TransactionKind,
        description: &str,
    ) -> Result<LedgerEntry>;

    /// List a user's ledger entries in insertion order, paginated.
    async fn transactions(
        &self,
        user_id: UserId,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<LedgerEntry>>;

    // -- plans -------------------------------------------------------------

    /// Insert a new plan. Fails with [`MeterError::DuplicatePlan`] when the
    /// name is taken.
    async fn create_plan(&self, plan: &SubscriptionPlan) -> Result<()>;

    /// Fetch a plan by ID.
    async fn plan(&self, id: PlanId) -> Result<Option<SubscriptionPlan>>;

    /// Fetch a plan by unique name.
    async fn plan_by_name(&self, name: &str) -> Result<Option<SubscriptionPlan>>;

    /// List plans, paginated in insertion order.
    async fn list_plans(&self, offset: u32, limit: u32) -> Result<Vec<SubscriptionPlan>>;

    // -- subscriptions -----------------------------------------------------

    /// Atomically deactivate the user's prior active subscription (if any)
    /// and insert `subscription` as the new active one.
    async fn activate_subscription(&self, subscription: &Subscription) -> Result<()>;

    /// Mark a subscription inactive. Idempotent.
    async fn deactivate_subscription(&self, id: SubscriptionId) -> Result<()>;

    /// Fetch the user's active subscription, if any.
    async fn active_subscription(&self, user_id: UserId) -> Result<Option<Subscription>>;

    /// List all of a user's subscriptions in insertion order, paginated.
    async fn subscriptions(
        &self,
        user_id: UserId,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Subscription>>;

    // -- chat usage --------------------------------------------------------

    /// Insert a chat usage record.
    async fn insert_chat(&self, record: &ChatUsageRecord) -> Result<()>;

    /// Fetch a chat usage record by ID.
    async fn chat(&self, id: ChatId) -> Result<Option<ChatUsageRecord>>;

    /// List a user's chat records in insertion order, paginated.
    async fn chats(&self, user_id: UserId, offset: u32, limit: u32)
        -> Result<Vec<ChatUsageRecord>>;

    /// Count a user's chat records with `created_at >= since`.
    async fn count_chats_since(&self, user_id: UserId, since: DateTime<Utc>) -> Result<u64>;

    /// Sum (input + output) tokens over a user's chat records with
    /// `created_at >= since`.
    async fn sum_tokens_since(&self, user_id: UserId, since: DateTime<Utc>) -> Result<u64>;

    // -- health ------------------------------------------------------------

    /// Verify the store is reachable.
    async fn health_check(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Identity provider trait
// ---------------------------------------------------------------------------

/// External collaborator resolving an opaque caller token to a user.
///
/// The engine never inspects credential material; it passes the token
/// through and consumes the resolved [`CallerIdentity`].
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a caller token. Fails with [`MeterError::Unauthenticated`]
    /// when the token is unknown or revoked.
    async fn authenticate(&self, token: &str) -> Result<CallerIdentity>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    #[test]
    fn test_role_round_trip() {
        for role in [UserRole::User, UserRole::Vip, UserRole::Admin] {
            let parsed = UserRole::from_str(&role.to_string()).unwrap();
            assert_eq!(parsed, role);
        }
        assert!(UserRole::from_str("superuser").is_err());
    }

    #[test]
    fn test_transaction_kind_round_trip() {
        for kind in [
            TransactionKind::Deposit,
            TransactionKind::Withdrawal,
            TransactionKind::ChatCost,
            TransactionKind::Subscription,
        ] {
            let parsed = TransactionKind::from_str(&kind.to_string()).unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_new_account_defaults() {
        let user = UserAccount::new("alice", "alice@example.com");
        assert_eq!(user.role, UserRole::User);
        assert_eq!(user.credits, Decimal::ZERO);
        assert!(user.is_active);
    }

    #[test]
    fn test_subscription_expiry_boundary() {
        let sub = Subscription::new(UserId::new(), PlanId::new(), 30);
        assert!(!sub.is_expired(Utc::now()));
        assert!(sub.is_expired(sub.ends_at + Duration::seconds(1)));
    }

    #[test]
    fn test_total_tokens() {
        let rec = ChatUsageRecord::new(UserId::new(), "gpt-4", 100, 250, dec!(0.02));
        assert_eq!(rec.total_tokens(), 350);
    }

    #[test]
    fn test_error_retryability() {
        assert!(MeterError::Store("down".into()).is_retryable());
        assert!(MeterError::StoreTimeout(std::time::Duration::from_secs(5)).is_retryable());
        assert!(!MeterError::Unauthenticated.is_retryable());
        assert!(!MeterError::InsufficientBalance {
            required: dec!(5),
            available: dec!(1),
        }
        .is_retryable());
    }

    #[test]
    fn test_config_defaults() {
        let config = GatewayConfig::default();
        assert!(config.pricing.enabled);
        assert_eq!(config.store.profile, "sqlite");
        assert_eq!(config.store_timeout_ms, 5_000);
    }
}
