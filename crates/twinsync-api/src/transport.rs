//! Publish/subscribe transport seam.
//!
//! The synchronization core never talks to a broker directly. It consumes
//! [`InboundMessage`]s and hands outbound payloads to anything implementing
//! [`Transport`]. [`LoopbackTransport`] is an in-process implementation used
//! by tests and by the `replay` command; broker-backed clients live outside
//! this workspace and are expected to honor [`RetryConfig`] on reconnect.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::error::Error;
use crate::topic::topic_matches;

const INBOUND_CHANNEL_CAPACITY: usize = 1024;

// ── InboundMessage ───────────────────────────────────────────────────

/// A `(topic, payload)` pair delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

// ── RetryConfig ──────────────────────────────────────────────────────

/// Fixed-delay reconnection policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Delay between reconnection attempts. Default: 5s.
    pub retry_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(5),
            max_retries: None,
        }
    }
}

impl RetryConfig {
    /// Delay before reconnection attempt `attempt` (1-based), or `None`
    /// once the retry budget is exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match self.max_retries {
            Some(max) if attempt > max => None,
            _ => Some(self.retry_delay),
        }
    }
}

// ── Transport ────────────────────────────────────────────────────────

/// Contract consumed by the synchronization core.
pub trait Transport: Send + Sync {
    fn connect(&self) -> impl Future<Output = Result<(), Error>> + Send;

    fn disconnect(&self) -> impl Future<Output = Result<(), Error>> + Send;

    fn publish(&self, topic: &str, payload: Bytes)
    -> impl Future<Output = Result<(), Error>> + Send;

    fn subscribe(&self, filter: &str) -> impl Future<Output = Result<(), Error>> + Send;

    /// Receiver for messages matching any active subscription.
    fn inbound(&self) -> broadcast::Receiver<InboundMessage>;
}

// ── LoopbackTransport ────────────────────────────────────────────────

/// In-process transport: every published message matching one of the
/// active subscription filters is delivered to all inbound receivers.
#[derive(Clone)]
pub struct LoopbackTransport {
    inner: Arc<LoopbackInner>,
}

struct LoopbackInner {
    connected: AtomicBool,
    filters: Mutex<Vec<String>>,
    inbound_tx: broadcast::Sender<InboundMessage>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        let (inbound_tx, _) = broadcast::channel(INBOUND_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(LoopbackInner {
                connected: AtomicBool::new(false),
                filters: Mutex::new(Vec::new()),
                inbound_tx,
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    fn ensure_connected(&self) -> Result<(), Error> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn is_subscribed(&self, topic: &str) -> bool {
        self.inner
            .filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|f| topic_matches(f, topic))
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LoopbackTransport {
    async fn connect(&self) -> Result<(), Error> {
        self.inner.connected.store(true, Ordering::Release);
        debug!("loopback transport connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Error> {
        self.inner.connected.store(false, Ordering::Release);
        self.inner
            .filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!("loopback transport disconnected");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), Error> {
        self.ensure_connected()?;
        if !self.is_subscribed(topic) {
            trace!(topic, "no subscription matches, dropping");
            return Ok(());
        }
        // Zero receivers is not an error: nobody is listening yet.
        let _ = self.inner.inbound_tx.send(InboundMessage {
            topic: topic.to_owned(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<(), Error> {
        self.ensure_connected()?;
        let mut filters = self
            .inner
            .filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !filters.iter().any(|f| f == filter) {
            filters.push(filter.to_owned());
        }
        debug!(filter, "loopback subscription added");
        Ok(())
    }

    fn inbound(&self) -> broadcast::Receiver<InboundMessage> {
        self.inner.inbound_tx.subscribe()
    }
}
