//! Broker connection lifecycle.
//!
//! One `ConnectionManager` per process owns the Redis connection. A
//! supervisor task pings it, marks the broker unavailable on failure,
//! reconnects after a fixed delay and re-declares every registered queue.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tracing::{debug, info, warn};

use reel_models::JobType;

use crate::error::{is_connection_error, QueueError, QueueResult};

/// Connection and key configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix for stream and group names
    pub prefix: String,
    /// Delay before a reconnect attempt
    pub reconnect_delay: Duration,
    /// Interval between health pings
    pub health_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            prefix: "reel".to_string(),
            reconnect_delay: Duration::from_secs(5),
            health_interval: Duration::from_secs(10),
        }
    }
}

impl ConnectionConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            prefix: std::env::var("QUEUE_PREFIX").unwrap_or_else(|_| "reel".to_string()),
            reconnect_delay: Duration::from_secs(
                std::env::var("QUEUE_RECONNECT_DELAY_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            health_interval: Duration::from_secs(
                std::env::var("QUEUE_HEALTH_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
        }
    }

    /// Stream backing the durable queue of a job type.
    pub fn stream(&self, job_type: JobType) -> String {
        format!("{}:queue:{}", self.prefix, job_type)
    }

    /// Consumer group shared by all workers.
    pub fn group(&self) -> String {
        format!("{}:workers", self.prefix)
    }

    /// Dead-letter stream for discarded messages.
    pub fn dlq(&self) -> String {
        format!("{}:dlq", self.prefix)
    }
}

/// Owns the broker connection and exposes availability.
pub struct ConnectionManager {
    client: redis::Client,
    config: ConnectionConfig,
    conn: RwLock<Option<MultiplexedConnection>>,
    available: AtomicBool,
    queues: Mutex<BTreeSet<JobType>>,
    lost: Notify,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> QueueResult<Arc<Self>> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Arc::new(Self {
            client,
            config,
            conn: RwLock::new(None),
            available: AtomicBool::new(false),
            queues: Mutex::new(BTreeSet::new()),
            lost: Notify::new(),
        }))
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Whether the broker can currently be used.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Shared connection, or `None` while degraded.
    pub async fn channel(&self) -> Option<MultiplexedConnection> {
        if !self.is_available() {
            return None;
        }
        self.conn.read().await.clone()
    }

    /// Fresh connection for blocking reads, which would stall the shared one.
    pub async fn dedicated(&self) -> QueueResult<MultiplexedConnection> {
        if !self.is_available() {
            return Err(QueueError::Unavailable);
        }
        match self.client.get_multiplexed_async_connection().await {
            Ok(conn) => Ok(conn),
            Err(e) => {
                self.report_failure(&e);
                Err(e.into())
            }
        }
    }

    /// Register a durable queue; declared now if connected and on every reconnect.
    pub async fn register_queue(&self, job_type: JobType) -> QueueResult<()> {
        self.queues.lock().await.insert(job_type);
        if let Some(mut conn) = self.channel().await {
            self.declare(&mut conn, job_type).await?;
        }
        Ok(())
    }

    /// Mark the broker unavailable if `err` indicates a lost connection.
    pub fn report_failure(&self, err: &redis::RedisError) {
        if is_connection_error(err) {
            self.mark_unavailable(&err.to_string());
        }
    }

    fn mark_unavailable(&self, reason: &str) {
        if self.available.swap(false, Ordering::AcqRel) {
            warn!(reason = reason, "Broker connection lost, queue degraded");
            metrics::gauge!(crate::metrics::names::BROKER_AVAILABLE).set(0.0);
            self.lost.notify_one();
        }
    }

    /// Connect and declare all registered queues.
    pub async fn connect(&self) -> QueueResult<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;

        let queues: Vec<JobType> = self.queues.lock().await.iter().copied().collect();
        for job_type in queues {
            self.declare(&mut conn, job_type).await?;
        }

        *self.conn.write().await = Some(conn);
        self.available.store(true, Ordering::Release);
        metrics::gauge!(crate::metrics::names::BROKER_AVAILABLE).set(1.0);
        info!(url = %redact(&self.config.redis_url), "Broker connected");
        Ok(())
    }

    /// Create the consumer group (and stream) for a job type.
    async fn declare(&self, conn: &mut MultiplexedConnection, job_type: JobType) -> QueueResult<()> {
        let stream = self.config.stream(job_type);
        let group = self.config.group();

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&stream)
            .arg(&group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;

        match result {
            Ok(_) => info!(stream = %stream, "Declared durable queue"),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(stream = %stream, "Durable queue already declared");
            }
            Err(e) => {
                self.report_failure(&e);
                return Err(QueueError::Redis(e));
            }
        }
        Ok(())
    }

    async fn ping(&self) -> QueueResult<()> {
        let Some(mut conn) = self.channel().await else {
            return Err(QueueError::Unavailable);
        };
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    /// Supervise the connection until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut failures: u32 = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }

            if self.is_available() {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = self.lost.notified() => {}
                    _ = tokio::time::sleep(self.config.health_interval) => {
                        if let Err(e) = self.ping().await {
                            self.mark_unavailable(&e.to_string());
                        }
                    }
                }
                continue;
            }

            match self.connect().await {
                Ok(()) => {
                    if failures > 0 {
                        info!(attempts = failures, "Broker reconnected");
                    }
                    failures = 0;
                }
                Err(e) => {
                    failures += 1;
                    // Log the first failure and then every tenth to keep outages readable.
                    if failures == 1 || failures % 10 == 0 {
                        warn!(
                            attempts = failures,
                            delay_secs = self.config.reconnect_delay.as_secs(),
                            "Broker connect failed: {}",
                            e
                        );
                    }
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                    }
                }
            }
        }
        debug!("Connection supervisor stopped");
    }
}

/// Hide credentials in a Redis URL for logging.
fn redact(url: &str) -> String {
    match url.split_once('@') {
        Some((scheme_and_auth, host)) => {
            let scheme = scheme_and_auth.split("://").next().unwrap_or("redis");
            format!("{}://***@{}", scheme, host)
        }
        None => url.to_string(),
    }
}
