//! Connection Manager
//!
//! Owns the single logical push connection and its reconnect state machine:
//!
//! ```text
//! Idle ──connect()──▶ Connecting ──opened──▶ Open
//!                        ▲                    │ closed / failed
//!                        │ fixed_delay        ▼
//!                   Reconnecting ◀── budget left?  ──no──▶ Exhausted
//! ```
//!
//! Every attempt runs under a generation number. Results and timers from a
//! superseded generation are ignored, which keeps at most one attempt in
//! flight and guarantees nothing fires after `disconnect()`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::state::{ConnectionState, ReconnectPolicy};
use super::transport::{CloseInfo, Connector, TransportError, TransportEvent, TransportLink};
use crate::dispatch::{
    Dispatcher, LifecycleClose, LifecycleError, LifecycleOpen, SnapshotStats, SnapshotStatus,
};
use crate::protocol::{self, ClientRequest, WireMessage};

/// Reconnection and liveness settings
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Delay between a failure and the next attempt
    pub fixed_delay: Duration,
    /// Automatic attempts per failure episode
    pub max_attempts: u32,
    /// Treat an open link as dead after this long without a frame
    pub idle_timeout: Option<Duration>,
    /// Give up on an open attempt (TCP connect plus handshake) after this long
    pub connect_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            fixed_delay: Duration::from_secs(3),
            max_attempts: 5,
            idle_timeout: Some(Duration::from_secs(15)),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Why a `send` was not transmitted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("Connection is {0}, not open")]
    NotOpen(ConnectionState),

    #[error("Transport link already closed")]
    LinkClosed,
}

/// Owns one logical push connection
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    dispatcher: Arc<Dispatcher>,
    idle_timeout: Option<Duration>,
    connect_timeout: Duration,
    shared: Mutex<Shared>,
    state_tx: watch::Sender<ConnectionState>,
}

struct Shared {
    state: ConnectionState,
    policy: ReconnectPolicy,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<String>>,
    connection_id: Option<String>,
    task: Option<JoinHandle<()>>,
    retry_timer: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        dispatcher: Arc<Dispatcher>,
        options: ConnectionOptions,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);

        Self {
            inner: Arc::new(Inner {
                connector,
                dispatcher,
                idle_timeout: options.idle_timeout,
                connect_timeout: options.connect_timeout,
                shared: Mutex::new(Shared {
                    state: ConnectionState::Idle,
                    policy: ReconnectPolicy::new(options.fixed_delay, options.max_attempts),
                    generation: 0,
                    outbound: None,
                    connection_id: None,
                    task: None,
                    retry_timer: None,
                }),
                state_tx,
            }),
        }
    }

    /// Start connecting
    ///
    /// No-op while Connecting or Open. From Exhausted this restarts the
    /// cycle with a fresh attempt budget; from Reconnecting it skips the
    /// remaining delay.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Tear down the connection and any pending reconnect, back to Idle
    pub fn disconnect(&self) {
        if self.inner.teardown() {
            tracing::info!(endpoint = %self.inner.connector.endpoint(), "Push connection disconnected");
        }
    }

    /// Transmit `text` if the connection is open
    pub fn send(&self, text: &str) -> Result<(), SendError> {
        let shared = self.inner.lock();

        if shared.state != ConnectionState::Open {
            tracing::debug!(state = %shared.state, text, "Send discarded; connection not open");
            return Err(SendError::NotOpen(shared.state));
        }

        match &shared.outbound {
            Some(outbound) => outbound.send(text.to_string()).map_err(|_| {
                tracing::debug!(text, "Send discarded; transport link closed");
                SendError::LinkClosed
            }),
            None => Err(SendError::LinkClosed),
        }
    }

    /// Send a typed client request
    pub fn request(&self, request: ClientRequest) -> Result<(), SendError> {
        self.send(request.as_str())
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Receiver that observes every state transition
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn attempts_used(&self) -> u32 {
        self.inner.lock().policy.attempts_used()
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.inner.lock().policy.clone()
    }

    /// ID of the currently open link, for log correlation
    pub fn connection_id(&self) -> Option<String> {
        self.inner.lock().connection_id.clone()
    }

    pub fn endpoint(&self) -> &str {
        self.inner.connector.endpoint()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, shared: &mut Shared, state: ConnectionState) {
        if shared.state != state {
            tracing::debug!(from = %shared.state, to = %state, "Connection state change");
        }
        shared.state = state;
        self.state_tx.send_replace(state);
    }

    fn connect(self: &Arc<Self>) {
        let mut shared = self.lock();

        match shared.state {
            ConnectionState::Connecting | ConnectionState::Open => {
                tracing::debug!(state = %shared.state, "connect() ignored");
                return;
            }
            ConnectionState::Exhausted => {
                tracing::info!("Restarting connection cycle after exhaustion");
                shared.policy.reset();
            }
            ConnectionState::Reconnecting => {
                if let Some(timer) = shared.retry_timer.take() {
                    timer.abort();
                }
            }
            ConnectionState::Idle => {}
        }

        self.begin_attempt(&mut shared);
    }

    fn begin_attempt(self: &Arc<Self>, shared: &mut Shared) {
        shared.generation += 1;
        let generation = shared.generation;
        self.set_state(shared, ConnectionState::Connecting);

        tracing::info!(
            endpoint = %self.connector.endpoint(),
            attempt = shared.policy.attempts_used(),
            "Opening push connection"
        );

        let inner = Arc::clone(self);
        shared.task = Some(tokio::spawn(async move {
            inner.run(generation).await;
        }));
    }

    /// Returns whether anything was torn down
    fn teardown(&self) -> bool {
        let mut shared = self.lock();

        shared.generation += 1;
        let was_active = shared.state != ConnectionState::Idle;

        if let Some(task) = shared.task.take() {
            task.abort();
        }
        if let Some(timer) = shared.retry_timer.take() {
            timer.abort();
        }
        shared.outbound = None;
        shared.connection_id = None;
        shared.policy.reset();
        self.set_state(&mut shared, ConnectionState::Idle);

        was_active
    }

    async fn run(self: Arc<Self>, generation: u64) {
        let opened =
            match tokio::time::timeout(self.connect_timeout, self.connector.open()).await {
                Ok(opened) => opened,
                Err(_) => Err(TransportError::ConnectTimeout(self.connect_timeout)),
            };

        let link = match opened {
            Ok(link) => link,
            Err(error) => {
                tracing::warn!(
                    endpoint = %self.connector.endpoint(),
                    error = %error,
                    "Failed to open push connection"
                );
                self.fail(
                    generation,
                    Some(error),
                    CloseInfo::abnormal("connection could not be opened"),
                );
                return;
            }
        };

        let TransportLink {
            outbound,
            mut inbound,
        } = link;
        let connection_id = Uuid::new_v4().to_string();

        if !self.mark_open(generation, &outbound, &connection_id) {
            return;
        }
        self.dispatcher.dispatch::<LifecycleOpen>(&());

        let (error, close) = self
            .read_frames(generation, &outbound, &mut inbound, &connection_id)
            .await;

        match &error {
            Some(error) => {
                tracing::warn!(connection_id = %connection_id, error = %error, "Push connection failed")
            }
            None => tracing::info!(
                connection_id = %connection_id,
                code = ?close.code,
                reason = %close.reason,
                "Push connection closed"
            ),
        }

        drop(outbound);
        drop(inbound);
        self.fail(generation, error, close);
    }

    fn mark_open(
        &self,
        generation: u64,
        outbound: &mpsc::UnboundedSender<String>,
        connection_id: &str,
    ) -> bool {
        let mut shared = self.lock();

        if shared.generation != generation || shared.state != ConnectionState::Connecting {
            return false;
        }

        shared.policy.reset();
        shared.outbound = Some(outbound.clone());
        shared.connection_id = Some(connection_id.to_string());
        self.set_state(&mut shared, ConnectionState::Open);

        tracing::info!(
            connection_id = %connection_id,
            endpoint = %self.connector.endpoint(),
            "Push connection open"
        );
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    async fn read_frames(
        &self,
        generation: u64,
        outbound: &mpsc::UnboundedSender<String>,
        inbound: &mut mpsc::UnboundedReceiver<TransportEvent>,
        connection_id: &str,
    ) -> (Option<TransportError>, CloseInfo) {
        loop {
            let event = match self.idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, inbound.recv()).await {
                    Ok(event) => event,
                    Err(_) => {
                        return (
                            Some(TransportError::IdleTimeout(limit)),
                            CloseInfo::abnormal("idle timeout"),
                        )
                    }
                },
                None => inbound.recv().await,
            };

            // Buffered events must not outlive a disconnect()
            if !self.is_current(generation) {
                return (None, CloseInfo::abnormal("superseded"));
            }

            match event {
                Some(TransportEvent::Frame(text)) => self.handle_frame(&text, outbound, connection_id),
                Some(TransportEvent::Closed(info)) => return (None, info),
                Some(TransportEvent::Failed(error)) => {
                    let close = CloseInfo::abnormal(error.to_string());
                    return (Some(error), close);
                }
                None => return (None, CloseInfo::abnormal("transport ended")),
            }
        }
    }

    fn handle_frame(
        &self,
        text: &str,
        outbound: &mpsc::UnboundedSender<String>,
        connection_id: &str,
    ) {
        match protocol::decode(text) {
            Ok(WireMessage::Stats(stats)) => {
                self.dispatcher.dispatch::<SnapshotStats>(&stats);
            }
            Ok(WireMessage::Status(status)) => {
                self.dispatcher.dispatch::<SnapshotStatus>(&status);
            }
            Ok(WireMessage::Heartbeat { timestamp }) => {
                tracing::trace!(connection_id = %connection_id, ?timestamp, "Heartbeat received");
                if outbound.send(ClientRequest::Ping.as_str().to_string()).is_err() {
                    tracing::debug!(connection_id = %connection_id, "Heartbeat reply discarded; link closed");
                }
            }
            Err(e) => {
                tracing::warn!(connection_id = %connection_id, error = %e, "Dropping undecodable frame");
            }
        }
    }

    /// Run the close transition for `generation`
    fn fail(self: &Arc<Self>, generation: u64, error: Option<TransportError>, close: CloseInfo) {
        let next = {
            let mut shared = self.lock();
            if shared.generation != generation {
                return;
            }

            shared.outbound = None;
            shared.connection_id = None;

            let next = match shared.policy.try_consume() {
                Some(_) => ConnectionState::Reconnecting,
                None => ConnectionState::Exhausted,
            };
            self.set_state(&mut shared, next);
            next
        };

        if let Some(error) = &error {
            self.dispatcher.dispatch::<LifecycleError>(error);
        }
        self.dispatcher.dispatch::<LifecycleClose>(&close);

        let mut shared = self.lock();
        if shared.generation != generation || shared.state != next {
            return;
        }

        match next {
            ConnectionState::Reconnecting => {
                let delay = shared.policy.fixed_delay();
                tracing::info!(
                    attempt = shared.policy.attempts_used(),
                    max_attempts = shared.policy.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnect"
                );

                let inner = Arc::clone(self);
                shared.retry_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.fire_retry(generation);
                }));
            }
            _ => {
                tracing::warn!(
                    max_attempts = shared.policy.max_attempts(),
                    "Reconnect attempts exhausted; waiting for an explicit connect()"
                );
            }
        }
    }

    fn fire_retry(self: &Arc<Self>, generation: u64) {
        let mut shared = self.lock();

        if shared.generation != generation || shared.state != ConnectionState::Reconnecting {
            tracing::debug!(state = %shared.state, "Stale reconnect timer ignored");
            return;
        }

        // This task is the timer; dropping its own handle is fine
        shared.retry_timer = None;
        self.begin_attempt(&mut shared);
    }
}
