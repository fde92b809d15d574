use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;
use veris_core::{LockError, LockService, LockToken};

const RELEASE_SCRIPT: &str = r#"
    if redis.call("GET", KEYS[1]) == ARGV[1] then
        return redis.call("DEL", KEYS[1])
    else
        return 0
    end
"#;

/// Redis-backed lock service: SET NX EX for the lease, a GET-compare-DEL
/// script for release so only the token holder can free the key.
#[derive(Clone)]
pub struct RedisLockService {
    client: redis::Client,
}

impl RedisLockService {
    pub fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LockService for RedisLockService {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<LockToken, LockError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;
        let token = Uuid::new_v4().to_string();

        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;

        match result {
            Some(_) => Ok(LockToken(token)),
            None => Err(LockError::Contended(key.to_string())),
        }
    }

    async fn release(&self, key: &str, token: &LockToken) -> Result<(), LockError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;
        let script = redis::Script::new(RELEASE_SCRIPT);
        let _deleted: i64 = script
            .key(key)
            .arg(&token.0)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;
        Ok(())
    }
}
