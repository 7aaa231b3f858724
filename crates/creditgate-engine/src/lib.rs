//! CreditGate metering engine library interface.
//!
//! Hosts the five engine components (ledger, plan catalog, entitlement
//! engine, pricing calculator, and chat admission controller) plus the
//! per-user serialization primitive, the model registry, a token-based
//! identity provider, and the [`Gateway`] facade that exposes the logical
//! API surface to a transport layer.

pub mod admission;
pub mod auth;
pub mod catalog;
pub mod entitlement;
pub mod gateway;
pub mod ledger;
pub mod locks;
pub mod models;
pub mod pricing;

// Re-export key types for convenience
pub use admission::AdmissionController;
pub use auth::TokenIdentityProvider;
pub use catalog::{NewPlan, PlanCatalog};
pub use entitlement::EntitlementEngine;
pub use gateway::Gateway;
pub use ledger::Ledger;
pub use locks::UserLocks;
pub use models::ModelRegistry;
pub use pricing::PriceTable;

use creditgate_core::{MeterError, Result};
use std::future::Future;
use std::time::Duration;

/// Run a store operation under the configured bound.
///
/// Expiry surfaces [`MeterError::StoreTimeout`] instead of letting a stuck
/// store call hang the request.
pub(crate) async fn with_store_timeout<T, F>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(MeterError::StoreTimeout(limit)),
    }
}
