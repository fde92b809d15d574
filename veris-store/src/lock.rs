use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;
use veris_core::{LockError, LockService, LockToken};

/// Single-process lock service. Leases live in a map keyed by lock name;
/// an expired lease is treated as absent so a crashed holder cannot wedge
/// the key.
#[derive(Default)]
pub struct InMemoryLockService {
    leases: Mutex<HashMap<String, (String, Instant)>>,
}

impl InMemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<LockToken, LockError> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|e| LockError::Backend(e.to_string()))?;
        let now = Instant::now();
        if let Some((_, expires)) = leases.get(key) {
            if *expires > now {
                return Err(LockError::Contended(key.to_string()));
            }
        }
        let token = Uuid::new_v4().to_string();
        leases.insert(key.to_string(), (token.clone(), now + ttl));
        Ok(LockToken(token))
    }

    async fn release(&self, key: &str, token: &LockToken) -> Result<(), LockError> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|e| LockError::Backend(e.to_string()))?;
        // Only the holder may release; a stale token means the lease expired
        // and someone else may hold the key now.
        if let Some((held, _)) = leases.get(key) {
            if *held == token.0 {
                leases.remove(key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_contends_until_release() {
        let locks = InMemoryLockService::new();
        let token = locks.acquire("k", Duration::from_secs(30)).await.unwrap();
        assert!(matches!(
            locks.acquire("k", Duration::from_secs(30)).await,
            Err(LockError::Contended(_))
        ));
        locks.release("k", &token).await.unwrap();
        locks.acquire("k", Duration::from_secs(30)).await.unwrap();
    }

    #[tokio::test]
    async fn expired_lease_is_reacquirable() {
        let locks = InMemoryLockService::new();
        locks.acquire("k", Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        locks.acquire("k", Duration::from_secs(30)).await.unwrap();
    }

    #[tokio::test]
    async fn stale_token_cannot_release_new_lease() {
        let locks = InMemoryLockService::new();
        let stale = locks.acquire("k", Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let _current = locks.acquire("k", Duration::from_secs(30)).await.unwrap();

        locks.release("k", &stale).await.unwrap();
        // The new holder's lease must still be in place.
        assert!(matches!(
            locks.acquire("k", Duration::from_secs(30)).await,
            Err(LockError::Contended(_))
        ));
    }
}
