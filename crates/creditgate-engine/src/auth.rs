//! Token-based identity provider.
//!
//! Issues opaque bearer tokens and resolves them to a user and role. Only
//! the SHA-256 digest of a token is kept; the plaintext is returned once
//! at issue time and never stored.

use async_trait::async_trait;
use creditgate_core::{CallerIdentity, IdentityProvider, MeterError, Result, UserId, UserRole};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Prefix for issued tokens.
const TOKEN_PREFIX: &str = "cg_";

/// Number of random bytes in an issued token (256 bits).
const TOKEN_RANDOM_BYTES: usize = 32;

/// Compute the SHA-256 hex digest of a plaintext token.
#[must_use]
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// In-process [`IdentityProvider`] keyed by token digest.
pub struct TokenIdentityProvider {
    tokens: RwLock<HashMap<String, CallerIdentity>>,
}

impl TokenIdentityProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Issue a new token for a user and return the plaintext.
    ///
    /// The plaintext is shown only here; afterwards only its digest can be
    /// matched.
    pub async fn issue(&self, user_id: UserId, role: UserRole) -> String {
        let mut random_bytes = [0u8; TOKEN_RANDOM_BYTES];
        rand::thread_rng().fill_bytes(&mut random_bytes);
        let plaintext = format!("{TOKEN_PREFIX}{}", hex::encode(random_bytes));

        let mut tokens = self.tokens.write().await;
        tokens.insert(hash_token(&plaintext), CallerIdentity { user_id, role });
        plaintext
    }

    /// Revoke a token. Returns `false` when the token was unknown.
    pub async fn revoke(&self, token: &str) -> bool {
        let mut tokens = self.tokens.write().await;
        tokens.remove(&hash_token(token)).is_some()
    }
}

impl Default for TokenIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for TokenIdentityProvider {
    async fn authenticate(&self, token: &str) -> Result<CallerIdentity> {
        let tokens = self.tokens.read().await;
        tokens
            .get(&hash_token(token))
            .copied()
            .ok_or(MeterError::Unauthenticated)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
