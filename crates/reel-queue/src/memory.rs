//! In-process broker with the same delivery semantics as the Redis one.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use reel_models::JobType;

use crate::broker::Broker;
use crate::error::{QueueError, QueueResult};
use crate::message::{entry_fields, Attempt, Delivery, QueueMessage};

/// A message that was dead-lettered.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub delivery: Delivery,
    pub reason: String,
}

#[derive(Default)]
struct State {
    ready: HashMap<JobType, VecDeque<Delivery>>,
    pending: HashMap<String, (Delivery, Instant)>,
    published: Vec<Delivery>,
    acked: Vec<String>,
    dead: Vec<DeadLetter>,
}

/// Broker kept in memory. Records every publish, ack and reject.
pub struct MemoryBroker {
    state: Mutex<State>,
    available: AtomicBool,
    next_id: AtomicU64,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
            available: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
        }
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing or regaining the broker.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    fn next_id(&self) -> String {
        format!("{}-0", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Enqueue raw entry fields, bypassing the envelope encoder.
    pub async fn push_raw(&self, job_type: JobType, fields: &[(&str, &str)]) -> String {
        let id = self.next_id();
        let delivery = Delivery::new(
            id.clone(),
            job_type,
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self.state
            .lock()
            .await
            .ready
            .entry(job_type)
            .or_default()
            .push_back(delivery);
        id
    }

    /// Every message published through `publish`, in order.
    pub async fn published(&self) -> Vec<Delivery> {
        self.state.lock().await.published.clone()
    }

    pub async fn acked(&self) -> Vec<String> {
        self.state.lock().await.acked.clone()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead.clone()
    }

    /// Messages waiting to be consumed on a queue.
    pub async fn ready_len(&self, job_type: JobType) -> usize {
        self.state
            .lock()
            .await
            .ready
            .get(&job_type)
            .map_or(0, VecDeque::len)
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    fn check(&self) -> QueueResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(QueueError::Unavailable)
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    async fn declare(&self, job_type: JobType) -> QueueResult<()> {
        self.state.lock().await.ready.entry(job_type).or_default();
        Ok(())
    }

    async fn publish(
        &self,
        message: &QueueMessage,
        priority: u8,
        attempt: Attempt,
    ) -> QueueResult<String> {
        self.check()?;
        let id = self.next_id();
        let fields = entry_fields(message, priority, attempt)?
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let delivery = Delivery::new(id.clone(), message.job_type(), fields);

        let mut state = self.state.lock().await;
        state.published.push(delivery.clone());
        state
            .ready
            .entry(message.job_type())
            .or_default()
            .push_back(delivery);
        Ok(id)
    }

    async fn consume(
        &self,
        job_type: JobType,
        _consumer: &str,
        count: usize,
        block: Duration,
    ) -> QueueResult<Vec<Delivery>> {
        self.check()?;
        let taken: Vec<Delivery> = {
            let mut state = self.state.lock().await;
            let queue = state.ready.entry(job_type).or_default();
            let n = count.min(queue.len());
            let taken: Vec<Delivery> = queue.drain(..n).collect();
            let now = Instant::now();
            for d in &taken {
                state.pending.insert(d.id.clone(), (d.clone(), now));
            }
            taken
        };
        if taken.is_empty() && !block.is_zero() {
            tokio::time::sleep(block.min(Duration::from_millis(50))).await;
        }
        Ok(taken)
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        self.check()?;
        let mut state = self.state.lock().await;
        state.pending.remove(&delivery.id);
        state.acked.push(delivery.id.clone());
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery, reason: &str) -> QueueResult<()> {
        self.check()?;
        let mut state = self.state.lock().await;
        state.pending.remove(&delivery.id);
        state.acked.push(delivery.id.clone());
        state.dead.push(DeadLetter {
            delivery: delivery.clone(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn reclaim(
        &self,
        job_type: JobType,
        _consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        self.check()?;
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let mut claimed = Vec::new();
        for (delivery, since) in state.pending.values_mut() {
            if claimed.len() >= count {
                break;
            }
            if delivery.job_type == job_type && now.duration_since(*since) >= min_idle {
                *since = now;
                claimed.push(delivery.clone());
            }
        }
        Ok(claimed)
    }

    async fn touch(&self, delivery: &Delivery, _consumer: &str) -> QueueResult<()> {
        self.check()?;
        if let Some((_, since)) = self.state.lock().await.pending.get_mut(&delivery.id) {
            *since = Instant::now();
        }
        Ok(())
    }

    async fn dead_lettered(&self) -> QueueResult<u64> {
        self.check()?;
        Ok(self.state.lock().await.dead.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ContentGenerationJob, JobPayload};
    use reel_models::{JobId, ProductId};

    fn message() -> QueueMessage {
        QueueMessage::new(
            JobId::from_string("j1"),
            JobPayload::ContentGeneration(ContentGenerationJob {
                product_id: ProductId::from_string("p1"),
            }),
        )
    }

    #[tokio::test]
    async fn test_publish_consume_ack() {
        let broker = MemoryBroker::new();
        broker.publish(&message(), 4, Attempt::initial()).await.unwrap();

        let got = broker
            .consume(JobType::ContentGeneration, "c", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].priority(), 4);
        assert_eq!(got[0].attempt(3), Attempt::initial());
        assert_eq!(broker.pending_len().await, 1);

        broker.ack(&got[0]).await.unwrap();
        assert_eq!(broker.pending_len().await, 0);
        assert_eq!(broker.acked().await, vec![got[0].id.clone()]);
    }

    #[tokio::test]
    async fn test_reject_dead_letters() {
        let broker = MemoryBroker::new();
        broker.push_raw(JobType::VideoComposition, &[("body", "garbage")]).await;
        let got = broker
            .consume(JobType::VideoComposition, "c", 1, Duration::ZERO)
            .await
            .unwrap();
        broker.reject(&got[0], "malformed").await.unwrap();

        assert_eq!(broker.dead_lettered().await.unwrap(), 1);
        assert_eq!(broker.dead_letters().await[0].reason, "malformed");
        assert!(broker.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_reclaim_idle_pending() {
        let broker = MemoryBroker::new();
        broker.publish(&message(), 0, Attempt::initial()).await.unwrap();
        broker
            .consume(JobType::ContentGeneration, "crashed", 1, Duration::ZERO)
            .await
            .unwrap();

        let claimed = broker
            .reclaim(JobType::ContentGeneration, "c2", Duration::ZERO, 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert!(broker
            .reclaim(JobType::ContentGeneration, "c2", Duration::from_secs(60), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_touch_resets_idle_time() {
        let broker = MemoryBroker::new();
        broker.publish(&message(), 0, Attempt::initial()).await.unwrap();
        let got = broker
            .consume(JobType::ContentGeneration, "c1", 1, Duration::ZERO)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        broker.touch(&got[0], "c1").await.unwrap();
        assert!(broker
            .reclaim(JobType::ContentGeneration, "c2", Duration::from_millis(50), 10)
            .await
            .unwrap()
            .is_empty());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(
            broker
                .reclaim(JobType::ContentGeneration, "c2", Duration::from_millis(50), 10)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_unavailable() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        assert!(matches!(
            broker.publish(&message(), 0, Attempt::initial()).await,
            Err(QueueError::Unavailable)
        ));
    }
}
