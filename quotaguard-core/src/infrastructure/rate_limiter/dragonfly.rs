//! Dragonfly/Redis sliding window log
//!
//! One sorted set per `(subject, resource)` holds the timestamps of admitted
//! requests, scored by epoch milliseconds. Keys expire one second after the
//! policy window so abandoned subjects clean themselves up.
// cspell:ignore Dragonfly ZREMRANGEBYSCORE ZCARD ZADD ZRANGE WITHSCORES

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::storage::DistributedWindowStore;
use super::types::{StoreEvent, WindowDecision};
use crate::config::DistributedStoreConfig;
use crate::domain::rate_limit::value_objects::{escape_glob, subject_key_prefix};
use crate::domain::rate_limit::{Policy, RateLimitKey, StoreError};

/// Keys examined per SCAN round trip during a subject reset
const SCAN_BATCH: u32 = 200;

/// Prune, count, and conditionally insert in one server-side step.
/// Returns `{allowed, remaining, reset_at_ms}`.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local member = ARGV[4]
local ttl = tonumber(ARGV[5])

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)

if count >= limit then
    local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
    local reset = now + window
    if oldest[2] then
        reset = tonumber(oldest[2]) + window
    end
    return {0, 0, reset}
end

redis.call('ZADD', key, now, member)
redis.call('EXPIRE', key, ttl)
return {1, limit - count - 1, now + window}
"#;

struct Inner {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    connected: AtomicBool,
    reconnecting: AtomicBool,
    events: broadcast::Sender<StoreEvent>,
    config: DistributedStoreConfig,
    key_prefix: String,
    script: Script,
    shutdown: CancellationToken,
}

impl Inner {
    /// Open a fresh connection and prove it with PING
    async fn establish(&self) -> Result<MultiplexedConnection, StoreError> {
        let connect = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<_, StoreError>(conn)
        };

        tokio::time::timeout(self.config.connect_timeout(), connect)
            .await
            .map_err(|_| StoreError::Timeout {
                operation: "connect",
                timeout_ms: self.config.connect_timeout_ms,
            })?
    }

    async fn install(&self, conn: MultiplexedConnection) {
        *self.connection.write().await = Some(conn);
        self.connected.store(true, Ordering::SeqCst);
        // No receivers is fine
        let _ = self.events.send(StoreEvent::Connected);
    }

    async fn drop_connection(self: &Arc<Self>) {
        *self.connection.write().await = None;
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(StoreEvent::Disconnected);
        }
        Self::spawn_reconnect(self);
    }

    fn spawn_reconnect(inner: &Arc<Self>) {
        if inner.shutdown.is_cancelled() || inner.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }

        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            inner.reconnect_loop().await;
        });
    }

    async fn reconnect_loop(&self) {
        let max_delay = Duration::from_millis(self.config.reconnect_max_delay_ms);
        let mut delay = Duration::from_millis(self.config.reconnect_initial_delay_ms);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.establish().await {
                Ok(conn) => {
                    // Cleared before installing so a failure right after the
                    // install can start a new supervisor
                    self.reconnecting.store(false, Ordering::SeqCst);
                    self.install(conn).await;
                    info!(url = %self.config.url, "Reconnected to Dragonfly for rate limiting");
                    return;
                }
                Err(e) => {
                    debug!(
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Dragonfly reconnect attempt failed"
                    );
                    delay = std::cmp::min(delay * 2, max_delay);
                }
            }
        }
    }
}

/// Dragonfly/Redis storage backend
#[derive(Clone)]
pub struct DragonflyWindowStore {
    inner: Arc<Inner>,
}

impl DragonflyWindowStore {
    /// Create a new Dragonfly window store.
    ///
    /// Only an unparseable URL is an error. If the server cannot be reached the
    /// store starts disconnected and keeps reconnecting in the background,
    /// emitting [`StoreEvent::Connected`] once it succeeds.
    pub async fn connect(
        config: DistributedStoreConfig,
        key_prefix: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let client = Client::open(config.url.as_str()).map_err(|e| {
            warn!("Failed to create Redis client for rate limiting: {}", e);
            StoreError::InvalidUrl(e)
        })?;

        let (events, _) = broadcast::channel(16);
        let inner = Arc::new(Inner {
            client,
            connection: RwLock::new(None),
            connected: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            events,
            config,
            key_prefix: key_prefix.into(),
            script: Script::new(SLIDING_WINDOW_SCRIPT),
            shutdown: CancellationToken::new(),
        });

        match inner.establish().await {
            Ok(conn) => {
                inner.install(conn).await;
                debug!("Successfully connected to Dragonfly for rate limiting");
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Failed to connect to Dragonfly for rate limiting, reconnecting in background"
                );
                Inner::spawn_reconnect(&inner);
            }
        }

        Ok(Self { inner })
    }

    /// Run one round trip with the configured timeout and retry budget.
    ///
    /// Once the budget is spent the connection is dropped and the reconnect
    /// supervisor takes over.
    async fn execute<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut(MultiplexedConnection) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let config = &self.inner.config;
        let mut attempt = 0;

        loop {
            let conn = self
                .inner
                .connection
                .read()
                .await
                .clone()
                .ok_or(StoreError::Disconnected)?;

            let result = match tokio::time::timeout(config.operation_timeout(), op(conn)).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout {
                    operation,
                    timeout_ms: config.operation_timeout_ms,
                }),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < config.max_retries => {
                    attempt += 1;
                    debug!(
                        operation,
                        attempt,
                        max_retries = config.max_retries,
                        error = %e,
                        "Retrying Dragonfly operation"
                    );
                    tokio::time::sleep(config.retry_delay()).await;
                }
                Err(e) => {
                    Inner::drop_connection(&self.inner).await;
                    return Err(e);
                }
            }
        }
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }

        self.execute("delete", |mut conn| async move {
            let deleted: u64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
            Ok(deleted)
        })
        .await
    }
}

async fn scripted_check(
    script: &Script,
    mut conn: MultiplexedConnection,
    redis_key: &str,
    member: &str,
    policy: &Policy,
    now_ms: u64,
) -> Result<WindowDecision, StoreError> {
    let reply: Vec<i64> = script
        .key(redis_key)
        .arg(now_ms)
        .arg(policy.window_ms)
        .arg(policy.max_requests)
        .arg(member)
        .arg(policy.key_ttl_secs())
        .invoke_async(&mut conn)
        .await?;

    match reply.as_slice() {
        [allowed, remaining, reset_at] => {
            let reset_at_ms = u64::try_from(*reset_at).unwrap_or(now_ms);
            if *allowed == 1 {
                Ok(WindowDecision::allowed(
                    u32::try_from(*remaining).unwrap_or(0),
                    reset_at_ms,
                ))
            } else {
                Ok(WindowDecision::denied(reset_at_ms))
            }
        }
        other => Err(StoreError::UnexpectedReply(format!(
            "sliding window script returned {:?}",
            other
        ))),
    }
}

/// Prune, count and insert as separate round trips. Concurrent callers can
/// both observe `count < max` and both insert, overshooting slightly.
async fn stepwise_check(
    mut conn: MultiplexedConnection,
    redis_key: &str,
    member: &str,
    policy: &Policy,
    now_ms: u64,
) -> Result<WindowDecision, StoreError> {
    let window_start = now_ms as i64 - policy.window_ms as i64;

    let _: u64 = redis::cmd("ZREMRANGEBYSCORE")
        .arg(redis_key)
        .arg("-inf")
        .arg(window_start)
        .query_async(&mut conn)
        .await?;

    let count: u64 = redis::cmd("ZCARD")
        .arg(redis_key)
        .query_async(&mut conn)
        .await?;

    if count >= u64::from(policy.max_requests) {
        let oldest: Vec<String> = redis::cmd("ZRANGE")
            .arg(redis_key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;

        let oldest_ms = oldest
            .get(1)
            .and_then(|score| score.parse::<f64>().ok())
            .map(|score| score as u64)
            .unwrap_or(now_ms);

        return Ok(WindowDecision::denied(oldest_ms + policy.window_ms));
    }

    let _: () = redis::pipe()
        .cmd("ZADD")
        .arg(redis_key)
        .arg(now_ms)
        .arg(member)
        .ignore()
        .cmd("EXPIRE")
        .arg(redis_key)
        .arg(policy.key_ttl_secs())
        .ignore()
        .query_async(&mut conn)
        .await?;

    Ok(WindowDecision::allowed(
        policy.max_requests - count as u32 - 1,
        now_ms + policy.window_ms,
    ))
}

#[async_trait]
impl DistributedWindowStore for DragonflyWindowStore {
    async fn check(
        &self,
        key: &RateLimitKey,
        policy: &Policy,
        now_ms: u64,
    ) -> Result<WindowDecision, StoreError> {
        let redis_key = key.to_redis_key(&self.inner.key_prefix);
        // Several requests can land in the same millisecond; each needs its own member
        let member = format!("{}-{}", now_ms, Uuid::new_v4().simple());
        let (redis_key, member) = (redis_key.as_str(), member.as_str());

        if self.inner.config.atomic_window {
            let script = &self.inner.script;
            self.execute("window_check", |conn| {
                scripted_check(script, conn, redis_key, member, policy, now_ms)
            })
            .await
        } else {
            self.execute("window_check", |conn| {
                stepwise_check(conn, redis_key, member, policy, now_ms)
            })
            .await
        }
    }

    async fn reset(
        &self,
        subject_id: &str,
        resource_path: Option<&str>,
    ) -> Result<u64, StoreError> {
        let subject_prefix = subject_key_prefix(&self.inner.key_prefix, subject_id);

        if let Some(resource) = resource_path {
            let key = format!("{}{}", subject_prefix, resource);
            return self.delete_keys(&[key]).await;
        }

        let pattern = format!("{}*", escape_glob(&subject_prefix));
        let pattern = pattern.as_str();
        let mut cursor: u64 = 0;
        let mut deleted = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = self
                .execute("scan", |mut conn| async move {
                    let reply: (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await?;
                    Ok(reply)
                })
                .await?;

            deleted += self.delete_keys(&keys).await?;

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(subject = %subject_id, deleted, "Cleared distributed rate limit windows");
        Ok(deleted)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.inner.shutdown.cancel();
        *self.inner.connection.write().await = None;
        self.inner.connected.store(false, Ordering::SeqCst);
    }
}
