use async_trait::async_trait;
use std::time::Duration;

/// Fencing token returned by a successful acquire. Release must present the
/// same token so an expired lease cannot release a lock it no longer holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub String);

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Lock contended: {0}")]
    Contended(String),

    #[error("Lock backend error: {0}")]
    Backend(String),
}

/// Per-key mutual exclusion with a lease TTL.
///
/// The lock reduces contention; it is not the correctness arbiter. Writers
/// must still use status-matching compare-and-set updates, which is what
/// protects against a lease expiring under a long channel call.
#[async_trait]
pub trait LockService: Send + Sync {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<LockToken, LockError>;

    async fn release(&self, key: &str, token: &LockToken) -> Result<(), LockError>;
}
