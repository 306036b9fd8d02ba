//! Application state.

use std::sync::Arc;

use tracing::{info, warn};

use reel_queue::{Broker, ConnectionConfig, ConnectionManager, JobProducer, RedisBroker};
use reel_services::{Services, ServicesConfig};
use reel_store::{JobStore, ProductStore, RedisStore};
use reel_worker::{ContentHandler, InlineExecutor};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub jobs: Arc<dyn JobStore>,
    pub products: Arc<dyn ProductStore>,
    pub broker: Arc<dyn Broker>,
    pub producer: JobProducer,
    /// Runs content generation in-request while the broker is down
    pub inline: Option<InlineExecutor>,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        jobs: Arc<dyn JobStore>,
        products: Arc<dyn ProductStore>,
        broker: Arc<dyn Broker>,
        max_attempts: u32,
    ) -> Self {
        let producer = JobProducer::new(jobs.clone(), broker.clone()).with_max_attempts(max_attempts);
        Self {
            config,
            jobs,
            products,
            broker,
            producer,
            inline: None,
        }
    }

    /// Enable inline fallback with the given services.
    pub fn with_inline(mut self, services: Services) -> Self {
        if services.text.is_none() {
            warn!("Text service not configured, inline fallback disabled");
            return self;
        }
        let handler = Arc::new(ContentHandler::new(self.products.clone(), services));
        self.inline = Some(InlineExecutor::new(
            self.producer.clone(),
            self.jobs.clone(),
            handler,
        ));
        self
    }

    /// Build Redis-backed state. The connection manager must be run by the caller.
    pub fn from_env(config: ApiConfig) -> anyhow::Result<(Self, Arc<ConnectionManager>)> {
        let connection = ConnectionManager::new(ConnectionConfig::from_env())?;
        let store = Arc::new(RedisStore::from_env()?);
        let broker = Arc::new(RedisBroker::new(connection.clone()));
        let max_attempts = std::env::var("JOB_MAX_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(reel_models::DEFAULT_MAX_ATTEMPTS);

        let services = Services::from_config(&ServicesConfig::from_env())?;
        let state = Self::new(config, store.clone(), store, broker, max_attempts).with_inline(services);
        info!(inline_fallback = state.inline.is_some(), "Application state ready");
        Ok((state, connection))
    }
}
