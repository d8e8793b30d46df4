/// Connection lifecycle management
///
/// The [`ConnectionManager`] owns the single link to the device. Dialling is
/// split in two so the session can drive it from an event loop: [`connect`]
/// hands out a [`ConnectAttempt`] future (or nothing, when a link is already
/// open or being opened) and [`complete_connect`] folds its result back into
/// the connection state.
///
/// [`connect`]: ConnectionManager::connect
/// [`complete_connect`]: ConnectionManager::complete_connect

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use log::{debug, info, warn};

use crate::client::{Connector, FieldbusClient, DEFAULT_IO_TIMEOUT_MS};
use crate::config::{DeviceTarget, MonitorConfig, DEFAULT_RETRY_DELAY_MS};
use crate::error::{MonitorError, MonitorResult};

/// An in-flight connection attempt
pub type ConnectAttempt<C> = BoxFuture<'static, MonitorResult<C>>;

/// Link lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Observable connection state
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnectionState {
    pub is_open: bool,
    /// Target of the current or last successful link
    pub target: String,
    pub last_error: Option<String>,
}

/// Outcome of a finished connection attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectEvent {
    Succeeded { target: String },
    Failed { error: MonitorError, retry_after: Duration },
}

/// Owner of the link to the device
pub struct ConnectionManager<K: Connector> {
    connector: Arc<K>,
    target: DeviceTarget,
    io_timeout: Duration,
    retry_delay: Duration,
    client: Option<K::Client>,
    link: LinkState,
    state: ConnectionState,
}

impl<K: Connector> ConnectionManager<K> {
    /// Create a manager for `target` with default timeout and retry delay
    pub fn new(connector: K, target: DeviceTarget) -> Self {
        Self {
            connector: Arc::new(connector),
            target,
            io_timeout: Duration::from_millis(DEFAULT_IO_TIMEOUT_MS),
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            client: None,
            link: LinkState::Disconnected,
            state: ConnectionState::default(),
        }
    }

    /// Create a manager from a resolved configuration
    pub fn from_config(connector: K, config: &MonitorConfig) -> Self {
        Self::new(connector, config.device.clone())
            .with_io_timeout(config.io_timeout())
            .with_retry_delay(config.retry_delay())
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Start a connection attempt
    ///
    /// Returns `None` without doing anything when the link is open or an
    /// attempt is already in flight. Otherwise the manager is marked
    /// `Connecting` and the returned future performs the dial; its result
    /// must be passed to [`complete_connect`](Self::complete_connect).
    pub fn connect(&mut self) -> Option<ConnectAttempt<K::Client>> {
        if self.link != LinkState::Disconnected || self.is_open() {
            debug!("Connect ignored, link is {:?}", self.link);
            return None;
        }

        info!("Connecting to {}", self.target);
        self.link = LinkState::Connecting;

        let connector = Arc::clone(&self.connector);
        let target = self.target.clone();
        Some(Box::pin(async move { connector.connect(&target).await }))
    }

    /// Fold the result of a connection attempt into the connection state
    pub fn complete_connect(&mut self, result: MonitorResult<K::Client>) -> ConnectEvent {
        match result {
            Ok(mut client) => {
                client.set_timeout(self.io_timeout);
                self.client = Some(client);
                self.link = LinkState::Connected;
                self.state = ConnectionState {
                    is_open: true,
                    target: self.target.to_string(),
                    last_error: None,
                };
                info!("Connected to {}", self.state.target);
                ConnectEvent::Succeeded {
                    target: self.state.target.clone(),
                }
            }
            Err(error) => {
                self.client = None;
                self.link = LinkState::Disconnected;
                self.state.is_open = false;
                self.state.last_error = Some(error.to_string());
                warn!(
                    "Connection to {} failed: {}; retrying in {}ms",
                    self.target,
                    error,
                    self.retry_delay.as_millis()
                );
                ConnectEvent::Failed {
                    error,
                    retry_after: self.retry_delay,
                }
            }
        }
    }

    /// Run a connection attempt to completion in place
    ///
    /// Returns `None` when [`connect`](Self::connect) would have been a no-op.
    pub async fn connect_now(&mut self) -> Option<ConnectEvent> {
        let attempt = self.connect()?;
        let result = attempt.await;
        Some(self.complete_connect(result))
    }

    /// Close the link; safe to call when already closed
    pub async fn close(&mut self) {
        if let Some(mut client) = self.client.take() {
            if client.is_open() {
                if let Err(err) = client.close().await {
                    warn!("Error closing link to {}: {}", self.target, err);
                }
            }
            info!("Disconnected from {}", self.target);
        }
        self.link = LinkState::Disconnected;
        self.state.is_open = false;
    }

    /// Drop a link the poll cycle found dead
    ///
    /// Leaves the manager `Disconnected` so the next [`connect`](Self::connect)
    /// starts a fresh attempt immediately.
    pub fn mark_link_lost(&mut self, reason: &str) {
        warn!("Link to {} lost: {}", self.target, reason);
        self.client = None;
        self.link = LinkState::Disconnected;
        self.state.is_open = false;
        self.state.last_error = Some(reason.to_string());
    }

    /// Client of the open link
    pub fn client_mut(&mut self) -> Option<&mut K::Client> {
        self.client.as_mut()
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn link_state(&self) -> LinkState {
        self.link
    }

    /// Check if the link is connected and the client reports it open
    pub fn is_open(&self) -> bool {
        self.link == LinkState::Connected && self.client.as_ref().map_or(false, |c| c.is_open())
    }

    pub fn target(&self) -> &DeviceTarget {
        &self.target
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SlaveId;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullClient {
        open: bool,
        timeout: Option<Duration>,
    }

    #[async_trait]
    impl FieldbusClient for NullClient {
        fn set_slave(&mut self, _slave_id: SlaveId) {}

        fn set_timeout(&mut self, timeout: Duration) {
            self.timeout = Some(timeout);
        }

        async fn read_coils(&mut self, _address: u16, _quantity: u16) -> MonitorResult<Vec<bool>> {
            Ok(vec![false])
        }

        async fn read_discrete_inputs(&mut self, _address: u16, _quantity: u16) -> MonitorResult<Vec<bool>> {
            Ok(vec![false])
        }

        async fn read_holding_registers(&mut self, _address: u16, _quantity: u16) -> MonitorResult<Vec<u16>> {
            Ok(vec![0])
        }

        async fn read_input_registers(&mut self, _address: u16, _quantity: u16) -> MonitorResult<Vec<u16>> {
            Ok(vec![0])
        }

        fn is_open(&self) -> bool {
            self.open
        }

        async fn close(&mut self) -> MonitorResult<()> {
            self.open = false;
            Ok(())
        }
    }

    /// Connector that fails the first `failures` dials
    struct CountingConnector {
        dials: Arc<AtomicUsize>,
        failures: usize,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        type Client = NullClient;

        async fn connect(&self, _target: &DeviceTarget) -> MonitorResult<NullClient> {
            let dial = self.dials.fetch_add(1, Ordering::SeqCst);
            if dial < self.failures {
                return Err(MonitorError::connection("connection refused"));
            }
            Ok(NullClient { open: true, timeout: None })
        }
    }

    fn manager(failures: usize) -> (ConnectionManager<CountingConnector>, Arc<AtomicUsize>) {
        let dials = Arc::new(AtomicUsize::new(0));
        let connector = CountingConnector {
            dials: dials.clone(),
            failures,
        };
        let target = DeviceTarget::Tcp {
            host: "127.0.0.1".to_string(),
            port: 502,
        };
        (ConnectionManager::new(connector, target), dials)
    }

    #[tokio::test]
    async fn test_connect_is_idempotent_while_connecting() {
        let (mut manager, dials) = manager(0);

        let attempt = manager.connect().expect("first connect starts an attempt");
        assert_eq!(manager.link_state(), LinkState::Connecting);
        assert!(manager.connect().is_none());

        let event = manager.complete_connect(attempt.await);
        assert_eq!(dials.load(Ordering::SeqCst), 1);
        assert_eq!(
            event,
            ConnectEvent::Succeeded {
                target: "127.0.0.1:502".to_string()
            }
        );
        assert!(manager.is_open());
        assert!(manager.connect().is_none());
        assert_eq!(
            manager.client_mut().unwrap().timeout,
            Some(Duration::from_millis(DEFAULT_IO_TIMEOUT_MS))
        );
    }

    #[tokio::test]
    async fn test_failed_connect_schedules_retry() {
        let (manager, dials) = manager(1);
        let mut manager = manager.with_retry_delay(Duration::from_millis(250));

        match manager.connect_now().await {
            Some(ConnectEvent::Failed { retry_after, .. }) => {
                assert_eq!(retry_after, Duration::from_millis(250));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(manager.link_state(), LinkState::Disconnected);
        assert!(manager.state().last_error.as_deref().unwrap().contains("refused"));

        assert!(matches!(manager.connect_now().await, Some(ConnectEvent::Succeeded { .. })));
        assert_eq!(dials.load(Ordering::SeqCst), 2);
        assert_eq!(manager.state().last_error, None);
    }

    #[tokio::test]
    async fn test_link_lost_and_close() {
        let (mut manager, dials) = manager(0);
        manager.connect_now().await;

        manager.mark_link_lost("Port Not Open");
        assert!(!manager.is_open());
        assert!(!manager.state().is_open);
        assert_eq!(manager.link_state(), LinkState::Disconnected);

        assert!(manager.connect_now().await.is_some());
        assert_eq!(dials.load(Ordering::SeqCst), 2);

        manager.close().await;
        assert!(!manager.is_open());
        manager.close().await;
        assert_eq!(manager.link_state(), LinkState::Disconnected);
    }
}
