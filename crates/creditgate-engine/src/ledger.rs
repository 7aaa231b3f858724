//! Credit ledger: the only writer of user balances.
//!
//! Every balance mutation goes through [`Ledger::credit`] or
//! [`Ledger::debit`] and produces exactly one ledger entry carrying the
//! resulting balance. The store performs the check-and-mutate step
//! atomically; this component adds validation, logging, and the bounded
//! store timeout.

use creditgate_core::{
    LedgerEntry, MeterError, MeteringStore, Result, TransactionKind, UserId,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::with_store_timeout;

/// Balance and transaction-history operations for user accounts.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn MeteringStore>,
    store_timeout: Duration,
}

impl Ledger {
    /// Create a new ledger over the given store.
    pub fn new(store: Arc<dyn MeteringStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    /// Increase a user's balance and append a `Deposit` entry.
    ///
    /// Fails with [`MeterError::InvalidAmount`] when `amount <= 0` and
    /// [`MeterError::UserNotFound`] when the user is unknown. There is no
    /// upper bound.
    pub async fn credit(
        &self,
        user_id: UserId,
        amount: Decimal,
        description: &str,
    ) -> Result<LedgerEntry> {
        if amount <= Decimal::ZERO {
            return Err(MeterError::InvalidAmount(amount));
        }

        let entry = with_store_timeout(
            self.store_timeout,
            self.store.apply_credit(user_id, amount, description),
        )
        .await?;

        info!(
            user_id = %user_id,
            amount = %amount,
            balance_after = %entry.balance_after,
            "credit applied"
        );
        Ok(entry)
    }

    /// Decrease a user's balance and append an entry of the given kind.
    ///
    /// The balance check and mutation are a single indivisible store
    /// operation: a debit that would overdraw fails with
    /// [`MeterError::InsufficientBalance`] and leaves balance and history
    /// untouched.
    pub async fn debit(
        &self,
        user_id: UserId,
        amount: Decimal,
        kind: TransactionKind,
        description: &str,
    ) -> Result<LedgerEntry> {
        if amount <= Decimal::ZERO {
            return Err(MeterError::InvalidAmount(amount));
        }

        let entry = with_store_timeout(
            self.store_timeout,
            self.store.apply_debit(user_id, amount, kind, description),
        )
        .await?;

        info!(
            user_id = %user_id,
            amount = %amount,
            kind = %kind,
            balance_after = %entry.balance_after,
            "debit applied"
        );
        Ok(entry)
    }

    /// Current balance for a user.
    pub async fn balance(&self, user_id: UserId) -> Result<Decimal> {
        let user = with_store_timeout(self.store_timeout, self.store.user(user_id))
            .await?
            .ok_or(MeterError::UserNotFound { user_id })?;
        Ok(user.credits)
    }

    /// Ledger entries for a user in insertion order, paginated.
    pub async fn history(
        &self,
        user_id: UserId,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<LedgerEntry>> {
        debug!(user_id = %user_id, offset, limit, "listing ledger history");
        with_store_timeout(
            self.store_timeout,
            self.store.transactions(user_id, offset, limit),
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
