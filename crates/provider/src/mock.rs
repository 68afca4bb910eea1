//! In-memory provider for tests
//!
//! Behaves like a well-mannered channel API: stock lives in a map, updates
//! are recorded, and failures can be injected per call kind. Used by the
//! engine's unit tests and the end-to-end scenario suite.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::registry::ProviderFactory;
use crate::{ExternalProduct, HealthStatus, PosTransaction, Provider, ProviderError};
use stocksync_domain::{Channel, ChannelType};

/// Failure to inject; maps onto the real taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Auth,
    NotFound,
    RateLimited,
    Server,
    Network,
    Timeout,
    Validation,
    NotConnected,
}

impl MockFailure {
    fn to_error(self) -> ProviderError {
        match self {
            MockFailure::Auth => ProviderError::Auth("mock auth failure".into()),
            MockFailure::NotFound => ProviderError::NotFound("mock missing product".into()),
            MockFailure::RateLimited => ProviderError::RateLimited { retry_after: None },
            MockFailure::Server => ProviderError::Server("mock 500".into()),
            MockFailure::Network => ProviderError::Network("mock connection reset".into()),
            MockFailure::Timeout => ProviderError::Timeout,
            MockFailure::Validation => ProviderError::Validation("mock 400".into()),
            MockFailure::NotConnected => ProviderError::NotConnected,
        }
    }
}

#[derive(Default)]
struct MockState {
    stock: HashMap<String, i64>,
    update_log: Vec<(String, i64)>,
    fail_updates: Option<MockFailure>,
    fail_reads: Option<MockFailure>,
    transactions: Vec<PosTransaction>,
}

/// Scriptable in-memory channel.
pub struct MockProvider {
    channel_type: ChannelType,
    connected: AtomicBool,
    healthy: AtomicBool,
    state: Mutex<MockState>,
}

impl MockProvider {
    pub fn new(channel_type: ChannelType) -> Self {
        Self {
            channel_type,
            connected: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            state: Mutex::new(MockState::default()),
        }
    }

    pub async fn seed_product(&self, external_id: &str, quantity: i64) {
        let mut state = self.state.lock().await;
        state.stock.insert(external_id.to_string(), quantity);
    }

    pub async fn stock_of(&self, external_id: &str) -> Option<i64> {
        let state = self.state.lock().await;
        state.stock.get(external_id).copied()
    }

    /// Every `update_stock` call observed, in order.
    pub async fn update_log(&self) -> Vec<(String, i64)> {
        let state = self.state.lock().await;
        state.update_log.clone()
    }

    pub async fn fail_updates_with(&self, failure: Option<MockFailure>) {
        let mut state = self.state.lock().await;
        state.fail_updates = failure;
    }

    pub async fn fail_reads_with(&self, failure: Option<MockFailure>) {
        let mut state = self.state.lock().await;
        state.fail_reads = failure;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub async fn push_transaction(&self, transaction: PosTransaction) {
        let mut state = self.state.lock().await;
        state.transactions.push(transaction);
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    async fn connect(&self, _credentials: &str) -> Result<(), ProviderError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn health_check(&self) -> HealthStatus {
        if self.healthy.load(Ordering::SeqCst) {
            HealthStatus::connected()
        } else {
            HealthStatus::disconnected("mock channel marked unhealthy")
        }
    }

    async fn get_product(&self, external_id: &str) -> Result<ExternalProduct, ProviderError> {
        let state = self.state.lock().await;

        if let Some(failure) = state.fail_reads {
            return Err(failure.to_error());
        }

        match state.stock.get(external_id) {
            Some(&quantity) => Ok(ExternalProduct {
                external_id: external_id.to_string(),
                quantity,
                name: None,
                sku: None,
            }),
            None => Err(ProviderError::NotFound(format!(
                "no product {external_id}"
            ))),
        }
    }

    async fn update_stock(&self, external_id: &str, quantity: i64) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;

        if let Some(failure) = state.fail_updates {
            return Err(failure.to_error());
        }

        state.stock.insert(external_id.to_string(), quantity);
        state.update_log.push((external_id.to_string(), quantity));
        Ok(())
    }

    async fn recent_transactions(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PosTransaction>, ProviderError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.completed_at > since)
            .cloned()
            .collect())
    }
}

/// Factory handing out pre-registered mocks, or fresh ones for unknown
/// channels. Tests keep their own `Arc<MockProvider>` to script and inspect.
pub struct MockProviderFactory {
    registered: std::sync::Mutex<HashMap<Uuid, Arc<MockProvider>>>,
}

impl MockProviderFactory {
    pub fn new() -> Self {
        Self {
            registered: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, channel_id: Uuid, provider: Arc<MockProvider>) {
        self.registered
            .lock()
            .expect("mock factory lock")
            .insert(channel_id, provider);
    }
}

impl Default for MockProviderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderFactory for MockProviderFactory {
    fn create(&self, channel: &Channel) -> Result<Arc<dyn Provider>, ProviderError> {
        let mut registered = self.registered.lock().expect("mock factory lock");

        let provider = registered
            .entry(channel.id)
            .or_insert_with(|| Arc::new(MockProvider::new(channel.channel_type)));

        Ok(Arc::clone(provider) as Arc<dyn Provider>)
    }
}
