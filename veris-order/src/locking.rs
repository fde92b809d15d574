use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;
use uuid::Uuid;
use veris_core::{LockError, LockService, LockToken};

/// How orchestrators take per-order locks.
#[derive(Debug, Clone)]
pub struct LockPolicy {
    pub ttl: Duration,
    pub acquire_attempts: u32,
    pub retry_base_ms: u64,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            acquire_attempts: 3,
            retry_base_ms: 50,
        }
    }
}

pub fn payment_lock_key(order_id: Uuid) -> String {
    format!("lock:payment:{}", order_id)
}

pub fn refund_lock_key(refund_id: Uuid) -> String {
    format!("lock:refund:{}", refund_id)
}

/// Bounded acquire with linear backoff plus jitter. Contention past the last
/// attempt surfaces as `LockError::Contended`; it never proceeds lockless.
pub(crate) async fn acquire_with_retry(
    locks: &Arc<dyn LockService>,
    key: &str,
    policy: &LockPolicy,
) -> Result<LockToken, LockError> {
    let mut attempt: u32 = 0;
    loop {
        match locks.acquire(key, policy.ttl).await {
            Ok(token) => return Ok(token),
            Err(LockError::Contended(_)) if attempt + 1 < policy.acquire_attempts => {
                attempt += 1;
                let jitter = rand::thread_rng().gen_range(0..=policy.retry_base_ms);
                sleep(Duration::from_millis(
                    policy.retry_base_ms * u64::from(attempt) + jitter,
                ))
                .await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Best-effort release; a failed release only shortens to the lease TTL.
pub(crate) async fn release_quietly(locks: &Arc<dyn LockService>, key: &str, token: &LockToken) {
    if let Err(e) = locks.release(key, token).await {
        warn!(key, error = %e, "Lock release failed; lease will expire on its own");
    }
}
