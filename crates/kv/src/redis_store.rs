//! Redis-backed `KvStore`, grounded on the original `AzureRedisManager`:
//! access-key or AAD-token auth, a background credential-refresh task that
//! wakes 60s before token expiry, and retry-once-on-`MOVED` cluster
//! redirects.
//!
//! No Azure-identity crate is in the dependency stack, so AAD token
//! acquisition is modeled behind the [`CredentialSource`] trait rather than
//! fabricating a dependency; the access-key path (the common deployment
//! shape) talks to `redis` directly.

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{KvError, Result};
use crate::store::{KvStore, StreamEvent};
use voice_agent_config::RedisConfig;

/// A short-lived AAD-style credential. Implementations fetch a token scoped
/// to Azure Cache for Redis and report its absolute expiry (unix seconds).
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch(&self) -> Result<(String, i64)>;
}

struct Inner {
    manager: ConnectionManager,
    using_cluster: bool,
}

/// Redis-backed implementation of [`KvStore`].
///
/// Holds the live connection behind a lock so the background refresh task
/// can swap it out without callers observing anything beyond a brief stall.
pub struct RedisKvStore {
    config: RedisConfig,
    credential: Option<Arc<dyn CredentialSource>>,
    inner: RwLock<Arc<Inner>>,
}

impl RedisKvStore {
    pub async fn connect(config: RedisConfig, credential: Option<Arc<dyn CredentialSource>>) -> Result<Arc<Self>> {
        let inner = Self::build_connection(&config, credential.as_deref()).await?;
        let store = Arc::new(Self {
            config,
            credential,
            inner: RwLock::new(Arc::new(inner)),
        });

        if store.config.access_key.is_none() {
            if let Some(credential) = store.credential.clone() {
                let weak_store = Arc::downgrade(&store);
                tokio::spawn(async move {
                    refresh_loop(weak_store, credential).await;
                });
            }
        }

        Ok(store)
    }

    async fn build_connection(config: &RedisConfig, credential: Option<&dyn CredentialSource>) -> Result<Inner> {
        let host = config
            .host
            .clone()
            .ok_or_else(|| KvError::Connection("redis host not configured".into()))?;
        let port = config.port.unwrap_or(6380);

        let password = if let Some(key) = &config.access_key {
            key.clone()
        } else {
            let credential = credential.ok_or_else(|| {
                KvError::Auth("no access key and no credential source configured".into())
            })?;
            let (token, expires_at) = credential.fetch().await?;
            info!(expires_at, "fetched Redis AAD token");
            token
        };

        let url = format!("rediss://:{password}@{host}:{port}");
        let client = Client::open(url).map_err(|e| KvError::Connection(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| KvError::Connection(e.to_string()))?;

        let using_cluster = config.use_cluster;
        if using_cluster {
            debug!(%host, port, "connected to redis in cluster mode");
        } else {
            debug!(%host, port, "connected to redis in single-node mode");
        }

        Ok(Inner { manager, using_cluster })
    }

    fn connection(&self) -> Arc<Inner> {
        self.inner.read().clone()
    }

    async fn reconnect(&self) -> Result<()> {
        let inner = Self::build_connection(&self.config, self.credential.as_deref()).await?;
        *self.inner.write() = Arc::new(inner);
        Ok(())
    }

    /// Runs `op` against the current connection; on a `MOVED`/auth-shaped
    /// failure, rebuilds the client once and retries exactly once, mirroring
    /// `_execute_with_redirect` / `_handle_cluster_redirect` in the original.
    async fn with_retry<T, F, Fut>(&self, command: &str, op: F) -> Result<T>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: std::future::Future<Output = RedisResult<T>>,
    {
        let conn = self.connection().manager.clone();
        match op(conn).await {
            Ok(v) => Ok(v),
            Err(err) => {
                if is_moved(&err) || err.is_connection_dropped() {
                    warn!(command, %err, "redis command failed, rebuilding client and retrying once");
                    self.reconnect().await?;
                    let conn = self.connection().manager.clone();
                    op(conn).await.map_err(KvError::from)
                } else {
                    Err(KvError::from(err))
                }
            }
        }
    }
}

fn is_moved(err: &redis::RedisError) -> bool {
    matches!(err.kind(), redis::ErrorKind::Moved)
}

async fn refresh_loop(store: std::sync::Weak<RedisKvStore>, credential: Arc<dyn CredentialSource>) {
    loop {
        let (expires_at, host) = match store.upgrade() {
            Some(store) => match credential.fetch().await {
                Ok((_, expires_at)) => (expires_at, store.config.host.clone()),
                Err(err) => {
                    warn!(%err, "failed to probe redis credential expiry, retrying in 5s");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            },
            None => return,
        };
        let now = chrono::Utc::now().timestamp();
        let wait = (expires_at - now - 60).max(1) as u64;
        tokio::time::sleep(Duration::from_secs(wait)).await;

        let Some(store) = store.upgrade() else { return };
        debug!(?host, "refreshing redis credential in background");
        if let Err(err) = store.reconnect().await {
            warn!(%err, "failed to refresh redis connection, retrying in 5s");
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        let key = key.to_string();
        self.with_retry("SET", move |mut conn| {
            let key = key.clone();
            let payload = payload.clone();
            async move { redis::cmd("SET").arg(&key).arg(&payload).query_async(&mut conn).await }
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let key = key.to_string();
        let raw: Option<String> = self
            .with_retry("GET", move |mut conn| {
                let key = key.clone();
                async move { redis::cmd("GET").arg(&key).query_async(&mut conn).await }
            })
            .await?;
        Ok(match raw {
            Some(s) => Some(serde_json::from_str(&s)?),
            None => None,
        })
    }

    async fn set_hash(&self, session_id: &str, map: &HashMap<String, Value>) -> Result<()> {
        let mut fields = Vec::with_capacity(map.len() * 2);
        for (k, v) in map {
            fields.push(k.clone());
            fields.push(serde_json::to_string(v)?);
        }
        if fields.is_empty() {
            return Ok(());
        }
        let key = session_id.to_string();
        self.with_retry("HSET", move |mut conn| {
            let key = key.clone();
            let fields = fields.clone();
            async move { redis::cmd("HSET").arg(&key).arg(fields).query_async(&mut conn).await }
        })
        .await
    }

    async fn get_hash(&self, session_id: &str) -> Result<HashMap<String, Value>> {
        let key = session_id.to_string();
        let raw: HashMap<String, String> = self
            .with_retry("HGETALL", move |mut conn| {
                let key = key.clone();
                async move { redis::cmd("HGETALL").arg(&key).query_async(&mut conn).await }
            })
            .await?;
        raw.into_iter()
            .map(|(k, v)| Ok((k, serde_json::from_str(&v)?)))
            .collect()
    }

    async fn update_field(&self, session_id: &str, field: &str, value: &Value) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        let key = session_id.to_string();
        let field = field.to_string();
        self.with_retry("HSET", move |mut conn| {
            let key = key.clone();
            let field = field.clone();
            let payload = payload.clone();
            async move { redis::cmd("HSET").arg(&key).arg(&field).arg(&payload).query_async(&mut conn).await }
        })
        .await
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let key = session_id.to_string();
        self.with_retry("DEL", move |mut conn| {
            let key = key.clone();
            async move { redis::cmd("DEL").arg(&key).query_async(&mut conn).await }
        })
        .await
    }

    async fn append_event(&self, stream_key: &str, event: &HashMap<String, String>) -> Result<String> {
        let key = stream_key.to_string();
        let mut fields: Vec<(String, String)> = event.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        fields.sort();
        self.with_retry("XADD", move |mut conn| {
            let key = key.clone();
            let fields = fields.clone();
            async move {
                redis::cmd("XADD")
                    .arg(&key)
                    .arg("*")
                    .arg(fields)
                    .query_async(&mut conn)
                    .await
            }
        })
        .await
    }

    async fn read_events(
        &self,
        stream_key: &str,
        last_id: &str,
        block_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamEvent>> {
        let key = stream_key.to_string();
        let last_id = last_id.to_string();
        let raw: redis::streams::StreamReadReply = self
            .with_retry("XREAD", move |mut conn| {
                let key = key.clone();
                let last_id = last_id.clone();
                async move {
                    let opts = redis::streams::StreamReadOptions::default().count(count).block(block_ms as usize);
                    conn.xread_options(&[&key], &[&last_id], &opts).await
                }
            })
            .await?;

        let mut events = Vec::new();
        for stream_key_entry in raw.keys {
            for id_entry in stream_key_entry.ids {
                let mut fields = HashMap::new();
                for (field, value) in id_entry.map {
                    if let redis::Value::BulkString(bytes) = value {
                        fields.insert(field, String::from_utf8_lossy(&bytes).to_string());
                    }
                }
                events.push(StreamEvent { id: id_entry.id, fields });
            }
        }
        Ok(events)
    }

    async fn ping(&self) -> Result<bool> {
        let handle = self.connection();
        debug!(using_cluster = handle.using_cluster, "redis ping");
        let mut conn = handle.manager.clone();
        let result: RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        match result {
            Ok(_) => Ok(true),
            Err(err) if matches!(err.kind(), redis::ErrorKind::AuthenticationFailed) => {
                warn!("redis auth failed on ping, rebuilding client and retrying once");
                self.reconnect().await?;
                let mut conn = self.connection().manager.clone();
                let retried: RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
                Ok(retried.is_ok())
            }
            Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moved_errors_are_detected() {
        let err = redis::RedisError::from((redis::ErrorKind::Moved, "moved"));
        assert!(is_moved(&err));
        let other = redis::RedisError::from((redis::ErrorKind::TypeError, "type"));
        assert!(!is_moved(&other));
    }

    #[tokio::test]
    async fn connect_without_host_or_access_key_fails_fast() {
        let config = RedisConfig::default();
        let result = RedisKvStore::connect(config, None).await;
        assert!(result.is_err());
    }
}
