//! SQLite store backed by a `sqlx` connection pool.
//!
//! Entities map to one table each; balances, prices, and costs are stored
//! as decimal strings to avoid float drift. Ledger entries rely on the
//! implicit `rowid` for insertion ordering. The debit and
//! subscription-activation paths run inside SQL transactions so a failure
//! at any step rolls the whole operation back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use creditgate_core::{
    ChatId, ChatUsageRecord, LedgerEntry, MeterError, MeteringStore, PlanId, Result, Subscription,
    SubscriptionId, SubscriptionPlan, TransactionId, TransactionKind, UserAccount, UserId,
    UserRole,
};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Schema migrations
// ---------------------------------------------------------------------------

const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT NOT NULL PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL UNIQUE,
        role TEXT NOT NULL,
        credits TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS transactions (
        id TEXT NOT NULL PRIMARY KEY,
        user_id TEXT NOT NULL,
        amount TEXT NOT NULL,
        kind TEXT NOT NULL,
        description TEXT NOT NULL,
        balance_after TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions(user_id)",
    "CREATE TABLE IF NOT EXISTS plans (
        id TEXT NOT NULL PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        price TEXT NOT NULL,
        duration_days INTEGER NOT NULL,
        max_chats_per_hour INTEGER NOT NULL,
        max_tokens_per_month INTEGER NOT NULL,
        can_access_vip_models INTEGER NOT NULL,
        description TEXT
    )",
    "CREATE TABLE IF NOT EXISTS subscriptions (
        id TEXT NOT NULL PRIMARY KEY,
        user_id TEXT NOT NULL,
        plan_id TEXT NOT NULL,
        starts_at TEXT NOT NULL,
        ends_at TEXT NOT NULL,
        is_active INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON subscriptions(user_id, is_active)",
    "CREATE TABLE IF NOT EXISTS chats (
        id TEXT NOT NULL PRIMARY KEY,
        user_id TEXT NOT NULL,
        model_name TEXT NOT NULL,
        input_tokens INTEGER NOT NULL,
        output_tokens INTEGER NOT NULL,
        cost TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_chats_user_time ON chats(user_id, created_at)",
];

// ---------------------------------------------------------------------------
// Pool builder
// ---------------------------------------------------------------------------

/// Open (or create) a SQLite connection pool configured for CreditGate.
pub(crate) async fn open_pool(database_url: &str) -> Result<SqlitePool> {
    let connect_opts = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| MeterError::Store(format!("invalid database URL: {e}")))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    // For in-memory databases every connection gets its own database, so
    // restrict the pool to a single connection to keep a consistent view.
    let max_conns: u32 = if database_url.contains(":memory:") {
        1
    } else {
        10
    };

    sqlx::pool::PoolOptions::<Sqlite>::new()
        .max_connections(max_conns)
        .connect_with(connect_opts)
        .await
        .map_err(|e| MeterError::Store(format!("failed to connect to SQLite: {e}")))
}

// ---------------------------------------------------------------------------
// Row mapping helpers
// ---------------------------------------------------------------------------

fn parse_uuid(value: &str, field: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| MeterError::Store(format!("invalid {field}: {e}")))
}

fn parse_decimal(value: &str, field: &str) -> Result<Decimal> {
    Decimal::from_str(value).map_err(|e| MeterError::Store(format!("invalid {field}: {e}")))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed"))
}

fn row_to_user(row: &SqliteRow) -> Result<UserAccount> {
    let role: String = row.get("role");
    Ok(UserAccount {
        id: UserId(parse_uuid(row.get("id"), "user id")?),
        username: row.get("username"),
        email: row.get("email"),
        role: UserRole::from_str(&role).map_err(MeterError::Store)?,
        credits: parse_decimal(row.get("credits"), "credits")?,
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
    })
}

fn row_to_entry(row: &SqliteRow) -> Result<LedgerEntry> {
    let kind: String = row.get("kind");
    Ok(LedgerEntry {
        id: TransactionId(parse_uuid(row.get("id"), "transaction id")?),
        user_id: UserId(parse_uuid(row.get("user_id"), "user id")?),
        amount: parse_decimal(row.get("amount"), "amount")?,
        kind: TransactionKind::from_str(&kind).map_err(MeterError::Store)?,
        description: row.get("description"),
        balance_after: parse_decimal(row.get("balance_after"), "balance_after")?,
        created_at: row.get("created_at"),
    })
}

fn row_to_plan(row: &SqliteRow) -> Result<SubscriptionPlan> {
    Ok(SubscriptionPlan {
        id: PlanId(parse_uuid(row.get("id"), "plan id")?),
        name: row.get("name"),
        price: parse_decimal(row.get("price"), "price")?,
        duration_days: row.get::<i64, _>("duration_days") as u32,
        max_chats_per_hour: row.get::<i64, _>("max_chats_per_hour") as u32,
        max_tokens_per_month: row.get::<i64, _>("max_tokens_per_month") as u64,
        can_access_vip_models: row.get("can_access_vip_models"),
        description: row.get("description"),
    })
}

fn row_to_subscription(row: &SqliteRow) -> Result<Subscription> {
    Ok(Subscription {
        id: SubscriptionId(parse_uuid(row.get("id"), "subscription id")?),
        user_id: UserId(parse_uuid(row.get("user_id"), "user id")?),
        plan_id: PlanId(parse_uuid(row.get("plan_id"), "plan id")?),
        starts_at: row.get("starts_at"),
        ends_at: row.get("ends_at"),
        is_active: row.get("is_active"),
    })
}

fn row_to_chat(row: &SqliteRow) -> Result<ChatUsageRecord> {
    Ok(ChatUsageRecord {
        id: ChatId(parse_uuid(row.get("id"), "chat id")?),
        user_id: UserId(parse_uuid(row.get("user_id"), "user id")?),
        model_name: row.get("model_name"),
        input_tokens: row.get::<i64, _>("input_tokens") as u32,
        output_tokens: row.get::<i64, _>("output_tokens") as u32,
        cost: parse_decimal(row.get("cost"), "cost")?,
        created_at: row.get("created_at"),
    })
}

// ---------------------------------------------------------------------------
// SqliteStore
// ---------------------------------------------------------------------------

/// SQLite [`MeteringStore`] implementation.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open the database at `database_url` and run pending migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = open_pool(database_url).await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        for statement in MIGRATIONS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| MeterError::Store(format!("migration failed: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl MeteringStore for SqliteStore {
    // -- users -------------------------------------------------------------

    async fn create_user(&self, user: &UserAccount) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO users (id, username, email, role, credits, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(user.id.0.to_string())
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.role.to_string())
        .bind(user.credits.to_string())
        .bind(user.is_active)
        .bind(user.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                Err(MeterError::DuplicateUser(user.username.clone()))
            }
            Err(e) => Err(MeterError::Store(format!("failed to insert user: {e}"))),
        }
    }

    async fn user(&self, id: UserId) -> Result<Option<UserAccount>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?1")
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MeterError::Store(format!("failed to get user: {e}")))?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<UserAccount>> {
        let row = sqlx::query("SELECT * FROM users WHERE username = ?1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MeterError::Store(format!("failed to get user by username: {e}")))?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn list_users(&self, offset: u32, limit: u32) -> Result<Vec<UserAccount>> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY rowid LIMIT ?1 OFFSET ?2")
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MeterError::Store(format!("failed to list users: {e}")))?;
        rows.iter().map(row_to_user).collect()
    }

    async fn update_user(&self, user: &UserAccount) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET username = ?1, email = ?2, role = ?3, is_active = ?4 WHERE id = ?5",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.role.to_string())
        .bind(user.is_active)
        .bind(user.id.0.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| MeterError::Store(format!("failed to update user: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(MeterError::UserNotFound { user_id: user.id });
        }
        Ok(())
    }

    async fn delete_user(&self, id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?1")
            .bind(id.0.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| MeterError::Store(format!("failed to delete user: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    // -- ledger ------------------------------------------------------------

    async fn apply_credit(
        &self,
        user_id: UserId,
        amount: Decimal,
        description: &str,
    ) -> Result<LedgerEntry> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MeterError::Store(format!("failed to begin transaction: {e}")))?;

        let row = sqlx::query("SELECT credits FROM users WHERE id = ?1")
            .bind(user_id.0.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| MeterError::Store(format!("failed to read balance: {e}")))?
            .ok_or(MeterError::UserNotFound { user_id })?;
        let credits = parse_decimal(row.get("credits"), "credits")?;

        let balance_after = credits + amount;
        let entry = LedgerEntry {
            id: TransactionId::new(),
            user_id,
            amount,
            kind: TransactionKind::Deposit,
            description: description.to_string(),
            balance_after,
            created_at: Utc::now(),
        };

        sqlx::query("UPDATE users SET credits = ?1 WHERE id = ?2")
            .bind(balance_after.to_string())
            .bind(user_id.0.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| MeterError::Store(format!("failed to update balance: {e}")))?;

        insert_entry(&mut tx, &entry).await?;

        tx.commit()
            .await
            .map_err(|e| MeterError::Store(format!("failed to commit transaction: {e}")))?;
        Ok(entry)
    }

    async fn apply_debit(
        &self,
        user_id: UserId,
        amount: Decimal,
        kind: TransactionKind,
        description: &str,
    ) -> Result<LedgerEntry> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MeterError::Store(format!("failed to begin transaction: {e}")))?;

        let row = sqlx::query("SELECT credits FROM users WHERE id = ?1")
            .bind(user_id.0.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| MeterError::Store(format!("failed to read balance: {e}")))?
            .ok_or(MeterError::UserNotFound { user_id })?;
        let credits = parse_decimal(row.get("credits"), "credits")?;

        if credits < amount {
            // Dropping the transaction rolls it back.
            return Err(MeterError::InsufficientBalance {
                required: amount,
                available: credits,
            });
        }

        let balance_after = credits - amount;
        let entry = LedgerEntry {
            id: TransactionId::new(),
            user_id,
            amount: -amount,
            kind,
            description: description.to_string(),
            balance_after,
            created_at: Utc::now(),
        };

        sqlx::query("UPDATE users SET credits = ?1 WHERE id = ?2")
            .bind(balance_after.to_string())
            .bind(user_id.0.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| MeterError::Store(format!("failed to update balance: {e}")))?;

        insert_entry(&mut tx, &entry).await?;

        tx.commit()
            .await
            .map_err(|e| MeterError::Store(format!("failed to commit transaction: {e}")))?;
        Ok(entry)
    }

    async fn transactions(
        &self,
        user_id: UserId,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM transactions WHERE user_id = ?1 ORDER BY rowid LIMIT ?2 OFFSET ?3",
        )
        .bind(user_id.0.to_string())
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MeterError::Store(format!("failed to list transactions: {e}")))?;
        rows.iter().map(row_to_entry).collect()
    }

    // -- plans -------------------------------------------------------------

    async fn create_plan(&self, plan: &SubscriptionPlan) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO plans (id, name, price, duration_days, max_chats_per_hour,
                                max_tokens_per_month, can_access_vip_models, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(plan.id.0.to_string())
        .bind(&plan.name)
        .bind(plan.price.to_string())
        .bind(i64::from(plan.duration_days))
        .bind(i64::from(plan.max_chats_per_hour))
        .bind(plan.max_tokens_per_month as i64)
        .bind(plan.can_access_vip_models)
        .bind(&plan.description)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(MeterError::DuplicatePlan(plan.name.clone())),
            Err(e) => Err(MeterError::Store(format!("failed to insert plan: {e}"))),
        }
    }

    async fn plan(&self, id: PlanId) -> Result<Option<SubscriptionPlan>> {
        let row = sqlx::query("SELECT * FROM plans WHERE id = ?1")
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MeterError::Store(format!("failed to get plan: {e}")))?;
        row.as_ref().map(row_to_plan).transpose()
    }

    async fn plan_by_name(&self, name: &str) -> Result<Option<SubscriptionPlan>> {
        let row = sqlx::query("SELECT * FROM plans WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MeterError::Store(format!("failed to get plan by name: {e}")))?;
        row.as_ref().map(row_to_plan).transpose()
    }

    async fn list_plans(&self, offset: u32, limit: u32) -> Result<Vec<SubscriptionPlan>> {
        let rows = sqlx::query("SELECT * FROM plans ORDER BY rowid LIMIT ?1 OFFSET ?2")
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MeterError::Store(format!("failed to list plans: {e}")))?;
        rows.iter().map(row_to_plan).collect()
    }

    // -- subscriptions -----------------------------------------------------

    async fn activate_subscription(&self, subscription: &Subscription) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MeterError::Store(format!("failed to begin transaction: {e}")))?;

        sqlx::query("UPDATE subscriptions SET is_active = 0 WHERE user_id = ?1 AND is_active = 1")
            .bind(subscription.user_id.0.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| MeterError::Store(format!("failed to deactivate subscription: {e}")))?;

        sqlx::query(
            "INSERT INTO subscriptions (id, user_id, plan_id, starts_at, ends_at, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(subscription.id.0.to_string())
        .bind(subscription.user_id.0.to_string())
        .bind(subscription.plan_id.0.to_string())
        .bind(subscription.starts_at)
        .bind(subscription.ends_at)
        .bind(subscription.is_active)
        .execute(&mut *tx)
        .await
        .map_err(|e| MeterError::Store(format!("failed to insert subscription: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| MeterError::Store(format!("failed to commit transaction: {e}")))?;
        Ok(())
    }

    async fn deactivate_subscription(&self, id: SubscriptionId) -> Result<()> {
        sqlx::query("UPDATE subscriptions SET is_active = 0 WHERE id = ?1")
            .bind(id.0.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| MeterError::Store(format!("failed to deactivate subscription: {e}")))?;
        Ok(())
    }

    async fn active_subscription(&self, user_id: UserId) -> Result<Option<Subscription>> {
        let row = sqlx::query(
            "SELECT * FROM subscriptions WHERE user_id = ?1 AND is_active = 1 LIMIT 1",
        )
        .bind(user_id.0.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MeterError::Store(format!("failed to get active subscription: {e}")))?;
        row.as_ref().map(row_to_subscription).transpose()
    }

    async fn subscriptions(
        &self,
        user_id: UserId,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Subscription>> {
        let rows = sqlx::query(
            "SELECT * FROM subscriptions WHERE user_id = ?1 ORDER BY rowid LIMIT ?2 OFFSET ?3",
        )
        .bind(user_id.0.to_string())
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MeterError::Store(format!("failed to list subscriptions: {e}")))?;
        rows.iter().map(row_to_subscription).collect()
    }

    // -- chat usage --------------------------------------------------------

    async fn insert_chat(&self, record: &ChatUsageRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO chats (id, user_id, model_name, input_tokens, output_tokens, cost, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(record.id.0.to_string())
        .bind(record.user_id.0.to_string())
        .bind(&record.model_name)
        .bind(i64::from(record.input_tokens))
        .bind(i64::from(record.output_tokens))
        .bind(record.cost.to_string())
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| MeterError::Store(format!("failed to insert chat record: {e}")))?;
        Ok(())
    }

    async fn chat(&self, id: ChatId) -> Result<Option<ChatUsageRecord>> {
        let row = sqlx::query("SELECT * FROM chats WHERE id = ?1")
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MeterError::Store(format!("failed to get chat record: {e}")))?;
        row.as_ref().map(row_to_chat).transpose()
    }

    async fn chats(
        &self,
        user_id: UserId,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<ChatUsageRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM chats WHERE user_id = ?1 ORDER BY rowid LIMIT ?2 OFFSET ?3",
        )
        .bind(user_id.0.to_string())
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MeterError::Store(format!("failed to list chat records: {e}")))?;
        rows.iter().map(row_to_chat).collect()
    }

    async fn count_chats_since(&self, user_id: UserId, since: DateTime<Utc>) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM chats WHERE user_id = ?1 AND created_at >= ?2",
        )
        .bind(user_id.0.to_string())
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| MeterError::Store(format!("failed to count chats: {e}")))?;
        Ok(row.get::<i64, _>("count") as u64)
    }

    async fn sum_tokens_since(&self, user_id: UserId, since: DateTime<Utc>) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(input_tokens + output_tokens), 0) AS total
             FROM chats WHERE user_id = ?1 AND created_at >= ?2",
        )
        .bind(user_id.0.to_string())
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| MeterError::Store(format!("failed to sum tokens: {e}")))?;
        Ok(row.get::<i64, _>("total") as u64)
    }

    // -- health ------------------------------------------------------------

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MeterError::Store(format!("health check failed: {e}")))?;
        Ok(())
    }
}

/// Insert a ledger entry using the provided transaction.
async fn insert_entry(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    entry: &LedgerEntry,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO transactions (id, user_id, amount, kind, description, balance_after, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(entry.id.0.to_string())
    .bind(entry.user_id.0.to_string())
    .bind(entry.amount.to_string())
    .bind(entry.kind.to_string())
    .bind(&entry.description)
    .bind(entry.balance_after.to_string())
    .bind(entry.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| MeterError::Store(format!("failed to insert ledger entry: {e}")))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn open_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    async fn store_with_user(store: &SqliteStore, credits: Decimal) -> UserId {
        let mut user = UserAccount::new("alice", "alice@example.com");
        user.credits = credits;
        let id = user.id;
        store.create_user(&user).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_user_round_trip() {
        let store = open_store().await;
        let user = UserAccount::new("alice", "alice@example.com").with_role(UserRole::Vip);
        store.create_user(&user).await.unwrap();

        let fetched = store.user(user.id).await.unwrap().unwrap();
        assert_eq!(fetched.username, "alice");
        assert_eq!(fetched.role, UserRole::Vip);
        assert_eq!(fetched.credits, Decimal::ZERO);

        let by_name = store.user_by_username("alice").await.unwrap().unwrap();
        assert_eq!(by_name.id, user.id);
    }

    #[tokio::test]
    async fn test_duplicate_username_conflict() {
        let store = open_store().await;
        store
            .create_user(&UserAccount::new("alice", "a@example.com"))
            .await
            .unwrap();
        let err = store
            .create_user(&UserAccount::new("alice", "b@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, MeterError::DuplicateUser(_)));
    }

    #[tokio::test]
    async fn test_debit_rolls_back_on_insufficient_balance() {
        let store = open_store().await;
        let id = store_with_user(&store, dec!(3)).await;

        let err = store
            .apply_debit(id, dec!(10), TransactionKind::ChatCost, "gpt-4")
            .await
            .unwrap_err();
        assert!(matches!(err, MeterError::InsufficientBalance { .. }));

        let user = store.user(id).await.unwrap().unwrap();
        assert_eq!(user.credits, dec!(3));
        assert!(store.transactions(id, 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ledger_replay_matches_balance() {
        let store = open_store().await;
        let id = store_with_user(&store, Decimal::ZERO).await;

        store.apply_credit(id, dec!(20), "top-up").await.unwrap();
        store
            .apply_debit(id, dec!(7.5), TransactionKind::Withdrawal, "w")
            .await
            .unwrap();
        store.apply_credit(id, dec!(1.25), "bonus").await.unwrap();

        let entries = store.transactions(id, 0, 100).await.unwrap();
        let replayed: Decimal = entries.iter().map(|e| e.amount).sum();
        let user = store.user(id).await.unwrap().unwrap();
        assert_eq!(replayed, user.credits);
        assert_eq!(entries.last().unwrap().balance_after, user.credits);
    }

    #[tokio::test]
    async fn test_plan_round_trip_and_conflict() {
        let store = open_store().await;
        let plan = SubscriptionPlan {
            id: PlanId::new(),
            name: "basic".to_string(),
            price: dec!(9.99),
            duration_days: 30,
            max_chats_per_hour: 10,
            max_tokens_per_month: 1_000_000,
            can_access_vip_models: false,
            description: Some("entry plan".to_string()),
        };
        store.create_plan(&plan).await.unwrap();

        let fetched = store.plan(plan.id).await.unwrap().unwrap();
        assert_eq!(fetched.price, dec!(9.99));
        assert_eq!(fetched.max_tokens_per_month, 1_000_000);

        let mut dup = plan.clone();
        dup.id = PlanId::new();
        assert!(matches!(
            store.create_plan(&dup).await.unwrap_err(),
            MeterError::DuplicatePlan(_)
        ));
    }

    #[tokio::test]
    async fn test_activate_subscription_swaps_active() {
        let store = open_store().await;
        let user_id = UserId::new();

        let first = Subscription::new(user_id, PlanId::new(), 30);
        store.activate_subscription(&first).await.unwrap();
        let second = Subscription::new(user_id, PlanId::new(), 7);
        store.activate_subscription(&second).await.unwrap();

        let active = store.active_subscription(user_id).await.unwrap().unwrap();
        assert_eq!(active.id, second.id);
        let all = store.subscriptions(user_id, 0, 10).await.unwrap();
        assert_eq!(all.iter().filter(|s| s.is_active).count(), 1);
    }

    #[tokio::test]
    async fn test_chat_window_queries() {
        let store = open_store().await;
        let user_id = UserId::new();

        let mut old = ChatUsageRecord::new(user_id, "gpt-4", 100, 100, dec!(0.09));
        old.created_at = Utc::now() - chrono::Duration::hours(3);
        store.insert_chat(&old).await.unwrap();
        store
            .insert_chat(&ChatUsageRecord::new(user_id, "llama-2", 40, 60, dec!(0.0001)))
            .await
            .unwrap();

        let hour_ago = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(store.count_chats_since(user_id, hour_ago).await.unwrap(), 1);
        assert_eq!(store.sum_tokens_since(user_id, hour_ago).await.unwrap(), 100);

        let long_ago = Utc::now() - chrono::Duration::days(2);
        assert_eq!(
            store.sum_tokens_since(user_id, long_ago).await.unwrap(),
            300
        );
    }

    #[tokio::test]
    async fn test_health_check() {
        let store = open_store().await;
        assert!(store.health_check().await.is_ok());
    }
}
