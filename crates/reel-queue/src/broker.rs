//! Broker abstraction and the Redis Streams implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use reel_models::JobType;

use crate::connection::ConnectionManager;
use crate::error::{QueueError, QueueResult};
use crate::message::{entry_fields, Attempt, Delivery, QueueMessage, BODY_FIELD, RETRY_HEADER};

/// Durable queue operations used by the producer and the worker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Whether publishes can currently succeed.
    fn is_available(&self) -> bool;

    /// Declare the durable queue for a job type.
    async fn declare(&self, job_type: JobType) -> QueueResult<()>;

    /// Publish a persistent message. Returns the broker message id.
    async fn publish(
        &self,
        message: &QueueMessage,
        priority: u8,
        attempt: Attempt,
    ) -> QueueResult<String>;

    /// Read up to `count` new messages, blocking at most `block`.
    async fn consume(
        &self,
        job_type: JobType,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> QueueResult<Vec<Delivery>>;

    /// Acknowledge and remove a message.
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Discard a message without requeue, keeping a copy on the dead-letter stream.
    async fn reject(&self, delivery: &Delivery, reason: &str) -> QueueResult<()>;

    /// Take over messages another consumer left unacknowledged for `min_idle`.
    async fn reclaim(
        &self,
        job_type: JobType,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>>;

    /// Reset the idle time of a message this consumer still holds, so
    /// `reclaim` elsewhere does not take it over mid-run.
    async fn touch(&self, delivery: &Delivery, consumer: &str) -> QueueResult<()>;

    /// Number of dead-lettered messages.
    async fn dead_lettered(&self) -> QueueResult<u64>;
}

/// Redis Streams broker.
pub struct RedisBroker {
    connection: Arc<ConnectionManager>,
    /// One blocking-read connection per consumer name.
    readers: Mutex<HashMap<String, MultiplexedConnection>>,
}

impl RedisBroker {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self {
            connection,
            readers: Mutex::new(HashMap::new()),
        }
    }

    /// Number of cached blocking-read connections.
    pub async fn reader_count(&self) -> usize {
        self.readers.lock().await.len()
    }

    /// Cached reader for `consumer`, opened on first use.
    async fn reader(&self, consumer: &str) -> QueueResult<MultiplexedConnection> {
        if !self.connection.is_available() {
            self.readers.lock().await.clear();
            return Err(QueueError::Unavailable);
        }
        let mut readers = self.readers.lock().await;
        if let Some(conn) = readers.get(consumer) {
            return Ok(conn.clone());
        }
        let conn = self.connection.dedicated().await?;
        debug!(consumer = consumer, "Opened blocking reader");
        readers.insert(consumer.to_string(), conn.clone());
        Ok(conn)
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    async fn channel(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.connection.channel().await.ok_or(QueueError::Unavailable)
    }

    /// Surface connection loss to the manager before returning the error.
    fn track<T>(&self, result: redis::RedisResult<T>) -> QueueResult<T> {
        result.map_err(|e| {
            self.connection.report_failure(&e);
            QueueError::Redis(e)
        })
    }
}

fn entry_to_delivery(job_type: JobType, entry: StreamId) -> Delivery {
    let mut fields = HashMap::new();
    for (key, value) in entry.map {
        match redis::from_redis_value::<String>(&value) {
            Ok(s) => {
                fields.insert(key, s);
            }
            Err(e) => debug!(message_id = %entry.id, field = %key, "Skipping non-string field: {}", e),
        }
    }
    Delivery::new(entry.id, job_type, fields)
}

#[async_trait]
impl Broker for RedisBroker {
    fn is_available(&self) -> bool {
        self.connection.is_available()
    }

    async fn declare(&self, job_type: JobType) -> QueueResult<()> {
        self.connection.register_queue(job_type).await
    }

    async fn publish(
        &self,
        message: &QueueMessage,
        priority: u8,
        attempt: Attempt,
    ) -> QueueResult<String> {
        let mut conn = self.channel().await?;
        let stream = self.connection.config().stream(message.job_type());
        let fields = entry_fields(message, priority, attempt)?;

        let id: String = self.track(conn.xadd(&stream, "*", &fields).await)?;
        debug!(
            job_id = %message.job_id,
            message_id = %id,
            retry_count = attempt.value(),
            "Published message to {}",
            stream
        );
        Ok(id)
    }

    async fn consume(
        &self,
        job_type: JobType,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.reader(consumer).await?;
        let config = self.connection.config();

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(config.group())
            .arg(consumer)
            .arg("COUNT")
            .arg(count);
        // BLOCK 0 would wait forever; a zero block means poll once.
        if !block.is_zero() {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("STREAMS").arg(config.stream(job_type)).arg(">");

        let reply: Option<StreamReadReply> = match cmd.query_async(&mut conn).await {
            Ok(reply) => reply,
            Err(e) => {
                // Replace the reader on the next poll.
                self.readers.lock().await.remove(consumer);
                self.connection.report_failure(&e);
                return Err(QueueError::Redis(e));
            }
        };

        let deliveries: Vec<Delivery> = reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|k| k.ids)
            .map(|entry| entry_to_delivery(job_type, entry))
            .collect();
        if !deliveries.is_empty() {
            debug!(job_type = %job_type, count = deliveries.len(), "Consumed messages");
        }
        Ok(deliveries)
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut conn = self.channel().await?;
        let config = self.connection.config();
        let stream = config.stream(delivery.job_type);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .xack(&stream, config.group(), &[&delivery.id])
            .ignore()
            .xdel(&stream, &[&delivery.id])
            .ignore();
        self.track(pipe.query_async::<()>(&mut conn).await)?;

        debug!(message_id = %delivery.id, "Acknowledged message");
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery, reason: &str) -> QueueResult<()> {
        let mut conn = self.channel().await?;
        let config = self.connection.config();

        let fields = [
            (BODY_FIELD, delivery.body().unwrap_or_default()),
            ("reason", reason),
            ("queue", delivery.job_type.as_str()),
            ("original_id", delivery.id.as_str()),
            (
                RETRY_HEADER,
                delivery.fields.get(RETRY_HEADER).map(String::as_str).unwrap_or("0"),
            ),
        ];
        self.track(conn.xadd::<_, _, _, _, ()>(config.dlq(), "*", &fields).await)?;
        self.ack(delivery).await?;

        warn!(message_id = %delivery.id, queue = %delivery.job_type, reason = reason, "Message dead-lettered");
        Ok(())
    }

    async fn reclaim(
        &self,
        job_type: JobType,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.channel().await?;
        let config = self.connection.config();
        let stream = config.stream(job_type);
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = self.track(
            redis::cmd("XPENDING")
                .arg(&stream)
                .arg(config.group())
                .arg("IDLE")
                .arg(min_idle_ms)
                .arg("-")
                .arg("+")
                .arg(count)
                .query_async(&mut conn)
                .await,
        )?;
        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&str> = pending.ids.iter().map(|p| p.id.as_str()).collect();
        let claimed: StreamClaimReply = self.track(
            redis::cmd("XCLAIM")
                .arg(&stream)
                .arg(config.group())
                .arg(consumer)
                .arg(min_idle_ms)
                .arg(&ids)
                .query_async(&mut conn)
                .await,
        )?;

        let deliveries: Vec<Delivery> = claimed
            .ids
            .into_iter()
            .map(|entry| entry_to_delivery(job_type, entry))
            .collect();
        if !deliveries.is_empty() {
            info!(job_type = %job_type, count = deliveries.len(), "Reclaimed stale messages");
        }
        Ok(deliveries)
    }

    async fn touch(&self, delivery: &Delivery, consumer: &str) -> QueueResult<()> {
        let mut conn = self.channel().await?;
        let config = self.connection.config();

        // Claiming to the current owner with min-idle 0 only resets the idle clock.
        self.track(
            redis::cmd("XCLAIM")
                .arg(config.stream(delivery.job_type))
                .arg(config.group())
                .arg(consumer)
                .arg(0)
                .arg(&delivery.id)
                .arg("JUSTID")
                .query_async::<()>(&mut conn)
                .await,
        )
    }

    async fn dead_lettered(&self) -> QueueResult<u64> {
        let mut conn = self.channel().await?;
        self.track(conn.xlen(self.connection.config().dlq()).await)
    }
}
