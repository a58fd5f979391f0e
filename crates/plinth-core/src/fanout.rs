//! Cross-process WebSocket fanout.
//!
//! Any worker may publish a `send` or `close` for a connection id. Every worker
//! runs one listener thread that pulls messages off the transport and queues
//! them into the local connection's inbox, when that connection lives here.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use plinth_types::FanoutMessage;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::Result;
use crate::config::FanoutConfig;
use crate::error::Error;
use crate::lifecycle::Shutdown;
use crate::registry::ConnectionRegistry;

const MAX_BACKOFF: Duration = Duration::from_secs(5);
const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(2);

/// Broadcast medium shared by every worker.
///
/// `publish` runs on the worker's event loop and must not block it.
/// `listen` runs on the dedicated fanout thread and may block.
#[async_trait]
pub trait FanoutTransport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn publish(&self, message: &FanoutMessage) -> Result<()>;

    /// Subscribe and hand every decoded message to `sink` until shutdown.
    ///
    /// Implementations wake at least every `poll_interval` to check `shutdown`.
    fn listen(
        &self,
        poll_interval: Duration,
        shutdown: &Shutdown,
        sink: &mut dyn FnMut(FanoutMessage),
    ) -> Result<()>;
}

/// Redis pub/sub transport for multi-process deployments.
pub struct RedisTransport {
    client: redis::Client,
    channel: String,
    timeout: Duration,
    publisher: tokio::sync::Mutex<Option<MultiplexedConnection>>,
}

impl RedisTransport {
    pub fn open(url: &str, channel: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            channel: channel.into(),
            timeout: DEFAULT_PUBLISH_TIMEOUT,
            publisher: tokio::sync::Mutex::new(None),
        })
    }

    /// Bound on connecting plus one `PUBLISH` round trip.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    async fn publisher(&self) -> Result<MultiplexedConnection> {
        let mut slot = self.publisher.lock().await;
        if let Some(connection) = slot.as_ref() {
            return Ok(connection.clone());
        }
        let connection = self.client.get_multiplexed_async_connection().await?;
        *slot = Some(connection.clone());
        Ok(connection)
    }
}

#[async_trait]
impl FanoutTransport for RedisTransport {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, message: &FanoutMessage) -> Result<()> {
        let payload = message.to_bytes()?;
        let attempt = async {
            let mut connection = self.publisher().await?;
            let receivers: i64 = connection.publish(&self.channel, payload).await?;
            Ok::<_, Error>(receivers)
        };
        let outcome = match tokio::time::timeout(self.timeout, attempt).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Transport(format!(
                "publish to {} timed out after {} ms",
                self.channel,
                self.timeout.as_millis()
            ))),
        };
        match outcome {
            Ok(receivers) => {
                trace!(target: "plinth::fanout", receivers, "Published fanout message");
                Ok(())
            }
            Err(err) => {
                // Reconnect on the next publish.
                self.publisher.lock().await.take();
                Err(err)
            }
        }
    }

    fn listen(
        &self,
        poll_interval: Duration,
        shutdown: &Shutdown,
        sink: &mut dyn FnMut(FanoutMessage),
    ) -> Result<()> {
        let mut connection = self.client.get_connection_with_timeout(self.timeout)?;
        let mut pubsub = connection.as_pubsub();
        pubsub.subscribe(&self.channel)?;
        pubsub.set_read_timeout(Some(poll_interval))?;
        info!(target: "plinth::fanout", channel = %self.channel, "Subscribed to fanout channel");

        while !shutdown.is_triggered() {
            let message = match pubsub.get_message() {
                Ok(message) => message,
                Err(err) if err.is_timeout() => continue,
                Err(err) => return Err(err.into()),
            };
            let payload: Vec<u8> = match message.get_payload() {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(target: "plinth::fanout", error = %err, "Unreadable fanout payload");
                    continue;
                }
            };
            match FanoutMessage::from_slice(&payload) {
                Ok(message) => sink(message),
                Err(err) => {
                    warn!(target: "plinth::fanout", error = %err, "Malformed fanout message, skipping");
                }
            }
        }
        Ok(())
    }
}

/// In-process queue used when no broker is configured. Single consumer.
pub struct LocalTransport {
    tx: mpsc::Sender<FanoutMessage>,
    rx: Mutex<Option<mpsc::Receiver<FanoutMessage>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FanoutTransport for LocalTransport {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn publish(&self, message: &FanoutMessage) -> Result<()> {
        self.tx
            .send(message.clone())
            .map_err(|_| Error::Transport("local fanout queue is closed".into()))
    }

    fn listen(
        &self,
        poll_interval: Duration,
        shutdown: &Shutdown,
        sink: &mut dyn FnMut(FanoutMessage),
    ) -> Result<()> {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| Error::Transport("local fanout queue already has a listener".into()))?;

        while !shutdown.is_triggered() {
            match rx.recv_timeout(poll_interval) {
                Ok(message) => sink(message),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        *self.rx.lock().unwrap_or_else(PoisonError::into_inner) = Some(rx);
        Ok(())
    }
}

/// Publisher side of fanout, cheap to clone.
#[derive(Clone)]
pub struct Fanout {
    transport: Arc<dyn FanoutTransport>,
}

impl Fanout {
    pub fn new(transport: Arc<dyn FanoutTransport>) -> Self {
        Self { transport }
    }

    /// Redis when a broker URL is configured, the local queue otherwise.
    pub fn from_config(config: &FanoutConfig) -> Result<Self> {
        let transport: Arc<dyn FanoutTransport> = match &config.redis_url {
            Some(url) => Arc::new(
                RedisTransport::open(url, config.channel.clone())?
                    .with_timeout(config.publish_timeout()),
            ),
            None => Arc::new(LocalTransport::new()),
        };
        Ok(Self::new(transport))
    }

    pub fn transport(&self) -> Arc<dyn FanoutTransport> {
        self.transport.clone()
    }

    pub async fn publish_send<T: Serialize + ?Sized>(
        &self,
        connection_id: &str,
        data: &T,
    ) -> Result<()> {
        let data = serde_json::to_value(data)?;
        debug!(target: "plinth::fanout", %connection_id, "Publishing send");
        self.transport
            .publish(&FanoutMessage::send(connection_id, data))
            .await
    }

    pub async fn publish_close(&self, connection_id: &str, code: u16, reason: &str) -> Result<()> {
        debug!(target: "plinth::fanout", %connection_id, code, "Publishing close");
        self.transport
            .publish(&FanoutMessage::close(connection_id, code, reason))
            .await
    }
}

/// Listener thread delivering fanout messages into the local registry.
pub struct FanoutBridge {
    handle: Option<JoinHandle<()>>,
    shutdown: Shutdown,
}

impl FanoutBridge {
    pub fn spawn(
        transport: Arc<dyn FanoutTransport>,
        registry: ConnectionRegistry,
        poll_interval: Duration,
        shutdown: Shutdown,
    ) -> std::io::Result<Self> {
        let thread_shutdown = shutdown.clone();
        let handle = thread::Builder::new()
            .name("plinth-fanout".to_string())
            .spawn(move || run_listener(transport, registry, poll_interval, thread_shutdown))?;
        Ok(Self {
            handle: Some(handle),
            shutdown,
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Trigger shutdown and wait for the listener thread to exit.
    pub fn stop(mut self) {
        self.shutdown.trigger();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(target: "plinth::fanout", "Fanout listener thread panicked");
            }
        }
    }
}

fn run_listener(
    transport: Arc<dyn FanoutTransport>,
    registry: ConnectionRegistry,
    poll_interval: Duration,
    shutdown: Shutdown,
) {
    info!(target: "plinth::fanout", transport = transport.name(), "Fanout listener started");
    let mut backoff = Backoff::new(poll_interval);

    while !shutdown.is_triggered() {
        let started = Instant::now();
        let mut delivered = false;
        let result = transport.listen(poll_interval, &shutdown, &mut |message: FanoutMessage| {
            delivered = true;
            deliver(&registry, message);
        });
        match result {
            Ok(()) => break,
            Err(err) => {
                // A subscription that carried traffic or held for a while was healthy.
                if delivered || started.elapsed() >= MAX_BACKOFF {
                    backoff.reset();
                }
                let delay = backoff.next_delay();
                warn!(
                    target: "plinth::fanout",
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "Fanout transport failed, resubscribing"
                );
                thread::sleep(delay);
            }
        }
    }
    info!(target: "plinth::fanout", "Fanout listener stopped");
}

/// Exponential reconnect delay, doubling up to `MAX_BACKOFF`.
#[derive(Debug, Clone)]
struct Backoff {
    initial: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration) -> Self {
        Self {
            initial,
            current: initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_BACKOFF);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

fn deliver(registry: &ConnectionRegistry, message: FanoutMessage) {
    match registry.deliver(&message) {
        Ok(true) => {
            trace!(target: "plinth::fanout", connection_id = %message.connection_id, "Delivered fanout message");
        }
        Ok(false) => {}
        Err(err) => {
            warn!(
                target: "plinth::fanout",
                connection_id = %message.connection_id,
                error = %err,
                "Malformed fanout message, skipping"
            );
        }
    }
}
