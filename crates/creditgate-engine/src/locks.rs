//! Per-user serialization via lock striping.
//!
//! All mutating flows for a given user (chat admission, subscription
//! changes, lazy expiry) are serialized by acquiring that user's stripe
//! before touching the store. Different users never contend.

use creditgate_core::UserId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Map of `user id → lock stripe`.
///
/// Stripes are created on first use and kept for the lifetime of the map.
pub struct UserLocks {
    inner: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl UserLocks {
    /// Create an empty lock map.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the stripe for `user_id`, waiting if another operation on
    /// the same user is in flight. The stripe is held until the returned
    /// guard is dropped.
    pub async fn acquire(&self, user_id: UserId) -> OwnedMutexGuard<()> {
        let stripe = {
            let mut map = self.inner.lock().await;
            Arc::clone(map.entry(user_id).or_default())
        };
        stripe.lock_owned().await
    }
}

impl Default for UserLocks {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
