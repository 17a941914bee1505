//! Redis store backend.
//!
//! Windows are sorted sets scored by millisecond timestamp. Values are plain
//! strings with a server-side TTL. Every call is bounded by `op_timeout` and
//! any failure surfaces as [`StoreError::Unavailable`] so the rate limiter can
//! fall back to its local store.
//!
//! Credentials and revocations on the same connection live in
//! [`crate::redis_records`].

use crate::kv::{KeyValueStore, SlidingWindowStore, StoreBackend, WindowState};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tollgate_core::{Clock, StoreError, StoreResult, SystemClock};
use uuid::Uuid;

const DEFAULT_NAMESPACE: &str = "tollgate";
const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(250);
const SCAN_BATCH: usize = 500;

// Prune, count and conditionally append in one server-side step.
// Returns {admitted (0/1), count, oldest score or -1}.
const ADMIT_SCRIPT: &str = r"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1] - ARGV[2])
local count = redis.call('ZCARD', KEYS[1])
local admitted = 0
if count < tonumber(ARGV[3]) then
    redis.call('ZADD', KEYS[1], ARGV[1], ARGV[4])
    count = count + 1
    admitted = 1
end
redis.call('PEXPIRE', KEYS[1], ARGV[2] * 2)
local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
local oldest_ms = -1
if oldest[2] then
    oldest_ms = tonumber(oldest[2])
end
return {admitted, count, oldest_ms}
";

#[derive(Clone)]
pub struct RedisStore {
    pub(crate) conn: ConnectionManager,
    pub(crate) namespace: String,
    pub(crate) clock: Arc<dyn Clock>,
    op_timeout: Duration,
    admit_script: redis::Script,
}

impl RedisStore {
    /// Open a managed connection to `url`.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::unavailable(format!("invalid redis url: {}", e)))?;
        let conn = tokio::time::timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::unavailable("redis connect timed out"))?
            .map_err(|e| StoreError::unavailable(format!("redis connect failed: {}", e)))?;

        tracing::info!(namespace = DEFAULT_NAMESPACE, "Connected to Redis");
        Ok(Self {
            conn,
            namespace: DEFAULT_NAMESPACE.to_string(),
            clock: Arc::new(SystemClock),
            op_timeout: DEFAULT_OP_TIMEOUT,
            admit_script: redis::Script::new(ADMIT_SCRIPT),
        })
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    /// Time source for credential timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn window_key(&self, key: &str) -> String {
        format!("{}:rl:{}", self.namespace, key)
    }

    fn value_key(&self, key: &str) -> String {
        format!("{}:cache:{}", self.namespace, key)
    }

    pub(crate) async fn run<T, F>(&self, op: &'static str, fut: F) -> StoreResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(StoreError::unavailable(format!("redis {} failed: {}", op, e))),
            Err(_) => Err(StoreError::unavailable(format!("redis {} timed out", op))),
        }
    }

    fn window_state(count: u64, oldest: Vec<(String, f64)>, admitted: bool) -> WindowState {
        WindowState {
            count,
            oldest_ms: oldest.first().map(|(_, score)| *score as i64),
            admitted,
        }
    }

    fn member(now_ms: i64) -> String {
        format!("{}-{}", now_ms, Uuid::new_v4().simple())
    }

    /// `prefix` as a literal `SCAN MATCH` pattern.
    fn glob_prefix(prefix: &str) -> String {
        let mut pattern = String::with_capacity(prefix.len() + 1);
        for c in prefix.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('*');
        pattern
    }
}

#[async_trait]
impl StoreBackend for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: String = self
            .run("ping", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SlidingWindowStore for RedisStore {
    async fn admit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u64,
    ) -> StoreResult<WindowState> {
        let mut conn = self.conn.clone();
        let mut invocation = self.admit_script.key(self.window_key(key));
        invocation
            .arg(now_ms)
            .arg(window_ms)
            .arg(limit)
            .arg(Self::member(now_ms));
        let (admitted, count, oldest): (i64, u64, i64) = self
            .run("admit", invocation.invoke_async(&mut conn))
            .await?;

        Ok(WindowState {
            count,
            oldest_ms: (oldest >= 0).then_some(oldest),
            admitted: admitted == 1,
        })
    }

    async fn record(&self, key: &str, now_ms: i64, window_ms: i64) -> StoreResult<WindowState> {
        let mut conn = self.conn.clone();
        let key = self.window_key(key);
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&key)
            .arg("-inf")
            .arg(now_ms - window_ms)
            .ignore()
            .cmd("ZADD")
            .arg(&key)
            .arg(now_ms)
            .arg(Self::member(now_ms))
            .ignore()
            .cmd("PEXPIRE")
            .arg(&key)
            .arg(window_ms * 2)
            .ignore()
            .cmd("ZCARD")
            .arg(&key)
            .cmd("ZRANGE")
            .arg(&key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES");
        let (count, oldest): (u64, Vec<(String, f64)>) =
            self.run("record", pipe.query_async(&mut conn)).await?;
        Ok(Self::window_state(count, oldest, true))
    }

    async fn snapshot(&self, key: &str, now_ms: i64, window_ms: i64) -> StoreResult<WindowState> {
        let mut conn = self.conn.clone();
        let key = self.window_key(key);
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&key)
            .arg("-inf")
            .arg(now_ms - window_ms)
            .ignore()
            .cmd("ZCARD")
            .arg(&key)
            .cmd("ZRANGE")
            .arg(&key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES");
        let (count, oldest): (u64, Vec<(String, f64)>) =
            self.run("snapshot", pipe.query_async(&mut conn)).await?;
        Ok(Self::window_state(count, oldest, false))
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let key = self.value_key(key);
        self.run("get", conn.get(key)).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let key = self.value_key(key);
        let seconds = ttl.as_secs().max(1);
        let _: () = self.run("set_ex", conn.set_ex(key, value, seconds)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let key = self.value_key(key);
        let removed: u64 = self.run("del", conn.del(key)).await?;
        Ok(removed > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let pattern = Self::glob_prefix(&self.value_key(prefix));
        let mut cursor: u64 = 0;
        let mut removed = 0u64;

        loop {
            let (next, keys): (u64, Vec<String>) = self
                .run(
                    "scan",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn),
                )
                .await?;

            if !keys.is_empty() {
                let unlinked: u64 = self
                    .run("unlink", redis::cmd("UNLINK").arg(&keys).query_async(&mut conn))
                    .await?;
                removed += unlinked;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }
}
