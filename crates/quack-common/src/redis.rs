//! Redis-backed [`StateStore`].
//!
//! A multiplexed connection is opened per call, so a Redis restart heals on
//! the next operation. Failures are logged and propagated; callers decide
//! whether a failed write is fatal.
use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::warn;

use crate::error::CommonError;
use crate::store::StateStore;

pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    /// Create the client. Does not connect; see [`RedisStore::is_available`].
    pub fn new(url: &str) -> Result<Self, CommonError> {
        let client = redis::Client::open(url)
            .inspect_err(|e| warn!(error = %e, url, "failed to create redis client"))?;
        Ok(Self { client })
    }

    /// Test the connection by sending a PING. Returns `true` if Redis is reachable.
    pub async fn is_available(&self) -> bool {
        match self.client.get_multiplexed_async_connection().await {
            Ok(mut conn) => {
                let result: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
                result.is_ok()
            }
            Err(_) => false,
        }
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CommonError> {
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .inspect_err(|e| warn!(error = %e, "redis connection failed"))?;
        Ok(conn)
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CommonError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn
            .get(key)
            .await
            .inspect_err(|e| warn!(error = %e, key, "redis GET failed"))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CommonError> {
        let mut conn = self.connection().await?;
        conn.set::<_, _, ()>(key, value)
            .await
            .inspect_err(|e| warn!(error = %e, key, "redis SET failed"))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CommonError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(key)
            .await
            .inspect_err(|e| warn!(error = %e, key, "redis DEL failed"))?;
        Ok(())
    }
}
