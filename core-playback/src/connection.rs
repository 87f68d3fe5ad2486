//! # Connection Selector
//!
//! Picks a live endpoint for the media server among its candidate connections
//! and tracks the connection state machine:
//!
//! ```text
//! NotConnected --connect--> Connecting --success--> Connected
//!                           Connecting --exhausted--> ConnectionFailed
//! ```
//!
//! Every `connect()` cancels the attempt in flight. Only the most recent
//! attempt may commit its result; a superseded attempt returns `None` and
//! leaves the state to its successor. An attempt whose future is dropped
//! before committing falls back to `NotConnected`.

use crate::config::ConnectionConfig;
use crate::error::{PlaybackError, Result};
use crate::retry::{RetryExecutor, RetryOutcome};
use bridge_traits::{BridgeError, MediaServer, NetworkChangeStream, NetworkEvent};
use core_async::sync::{watch, CancellationToken};
use core_async::task::{JoinHandle, JoinSet};
use core_async::time::timeout;
use core_library::models::ServerConnection;
use core_runtime::events::{ConnectionEvent, CoreEvent, EventBus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    NotConnected,
    Connecting,
    Connected,
    ConnectionFailed,
}

/// Receives the active server base URL whenever a connection attempt commits.
///
/// Called outside the selector's locks, possibly from a background task.
pub trait ServerUrlListener: Send + Sync {
    fn on_server_url_changed(&self, new_url: &str);
}

struct AttemptSlot {
    generation: u64,
    cancel: CancellationToken,
}

/// Resets `Connecting` to `NotConnected` if the attempt is dropped while
/// still the latest one.
struct PendingAttempt<'a> {
    selector: &'a ConnectionSelector,
    generation: u64,
    armed: bool,
}

impl PendingAttempt<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingAttempt<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let slot = self.selector.attempt.lock();
        if slot.generation == self.generation
            && *self.selector.state_tx.borrow() == ConnectionState::Connecting
        {
            slot.cancel.cancel();
            self.selector
                .state_tx
                .send_replace(ConnectionState::NotConnected);
            debug!(generation = self.generation, "Connection attempt dropped before completing");
        }
    }
}

/// Races candidate endpoints and owns the active server URL.
pub struct ConnectionSelector {
    server: Arc<dyn MediaServer>,
    config: ConnectionConfig,
    retry: RetryExecutor,
    candidates: Mutex<Arc<[ServerConnection]>>,
    state_tx: watch::Sender<ConnectionState>,
    url_tx: watch::Sender<Option<String>>,
    attempt: Mutex<AttemptSlot>,
    listeners: Mutex<Vec<Arc<dyn ServerUrlListener>>>,
    event_bus: Option<Arc<EventBus>>,
}

impl ConnectionSelector {
    pub fn new(server: Arc<dyn MediaServer>, config: ConnectionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::NotConnected);
        let (url_tx, _) = watch::channel(None);
        let retry = RetryExecutor::new(config.retry.clone());

        Self {
            server,
            config,
            retry,
            candidates: Mutex::new(Arc::from(Vec::new())),
            state_tx,
            url_tx,
            attempt: Mutex::new(AttemptSlot {
                generation: 0,
                cancel: CancellationToken::new(),
            }),
            listeners: Mutex::new(Vec::new()),
            event_bus: None,
        }
    }

    /// Set event bus for connection events.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Replace the candidate set. The previous set is discarded, never merged.
    pub fn set_connections(&self, connections: Vec<ServerConnection>) {
        let count = connections.len();
        *self.candidates.lock() = Arc::from(connections);
        debug!(count, "Server connection candidates replaced");
    }

    pub fn connections(&self) -> Arc<[ServerConnection]> {
        self.candidates.lock().clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// The last committed server URL. Kept across connection loss.
    pub fn active_server_url(&self) -> Option<String> {
        self.url_tx.borrow().clone()
    }

    pub fn subscribe_server_url(&self) -> watch::Receiver<Option<String>> {
        self.url_tx.subscribe()
    }

    pub fn add_server_url_listener(&self, listener: Arc<dyn ServerUrlListener>) {
        self.listeners.lock().push(listener);
    }

    /// Health-check the candidates and return the URI of a live one.
    ///
    /// A single candidate is checked directly and its raw failure returned so
    /// the retry policy can classify it. Several candidates are raced
    /// concurrently, local ones first; the first success wins and the other
    /// checks are aborted.
    pub async fn choose_viable_connection(&self, candidates: &[ServerConnection]) -> Result<String> {
        match candidates {
            [] => Err(PlaybackError::NoConnectionCandidates),
            [single] => self.check_single(single).await,
            _ => self.race(candidates).await,
        }
    }

    async fn check_single(&self, candidate: &ServerConnection) -> Result<String> {
        match timeout(
            self.config.attempt_timeout,
            self.server.check_server(&candidate.uri),
        )
        .await
        {
            Ok(Ok(())) => Ok(candidate.uri.clone()),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(BridgeError::Timeout(format!(
                "{} did not respond within {}ms",
                candidate.uri,
                self.config.attempt_timeout.as_millis()
            ))
            .into()),
        }
    }

    async fn race(&self, candidates: &[ServerConnection]) -> Result<String> {
        let mut ordered = candidates.to_vec();
        ordered.sort_by_key(|c| (!c.local, c.weight.unwrap_or(u32::MAX)));

        let mut checks = JoinSet::new();
        for candidate in ordered {
            let server = self.server.clone();
            checks.spawn(async move {
                let result = server.check_server(&candidate.uri).await;
                (candidate.uri, result)
            });
        }

        let mut last_reason: Option<String> = None;
        let first_success = async {
            while let Some(joined) = checks.join_next().await {
                match joined {
                    Ok((uri, Ok(()))) => return Some(uri),
                    Ok((uri, Err(err))) => {
                        debug!(uri = %uri, error = %err, "Candidate health check failed");
                        last_reason = Some(format!("{}: {}", uri, err));
                    }
                    Err(join_err) => {
                        last_reason = Some(format!("health check aborted: {}", join_err));
                    }
                }
            }
            None
        };

        let outcome = timeout(self.config.attempt_timeout, first_success).await;
        checks.abort_all();

        match outcome {
            Ok(Some(uri)) => Ok(uri),
            Ok(None) => Err(PlaybackError::NoViableConnection { last_reason }),
            Err(_) => Err(PlaybackError::ConnectionTimeout { last_reason }),
        }
    }

    /// Run a fresh connection attempt, cancelling any attempt in flight.
    ///
    /// Returns the committed server URL, or `None` when every attempt failed
    /// or this attempt was superseded.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Option<String> {
        let (generation, cancel) = self.begin_attempt();
        let mut pending = PendingAttempt {
            selector: self,
            generation,
            armed: true,
        };
        let candidates = self.connections();
        self.emit(ConnectionEvent::Connecting {
            candidate_count: candidates.len(),
        });

        let outcome = self
            .retry
            .execute_cancellable(
                &cancel,
                |attempt| {
                    let candidates = candidates.clone();
                    async move {
                        debug!(attempt, candidates = candidates.len(), "Selecting server connection");
                        self.choose_viable_connection(&candidates).await
                    }
                },
                PlaybackError::is_transient,
                |_| {},
            )
            .await;

        let Some(outcome) = outcome else {
            debug!(generation, "Connection attempt cancelled");
            return None;
        };

        let committed = {
            let slot = self.attempt.lock();
            if slot.generation != generation {
                debug!(generation, current = slot.generation, "Connection attempt superseded");
                return None;
            }
            pending.disarm();

            match outcome {
                RetryOutcome::Success { value, attempt } => {
                    let previous = self.url_tx.send_replace(Some(value.clone()));
                    self.state_tx.send_replace(ConnectionState::Connected);
                    info!(server_url = %value, attempt, "Server connection established");
                    Some((value, previous))
                }
                RetryOutcome::Failure { error, attempts } => {
                    self.state_tx.send_replace(ConnectionState::ConnectionFailed);
                    warn!(error = %error, attempts, "Server connection failed");
                    self.emit(ConnectionEvent::Failed {
                        reason: error.to_string(),
                    });
                    None
                }
            }
        };

        let (url, previous) = committed?;
        self.emit(ConnectionEvent::Connected {
            server_url: url.clone(),
        });
        if previous.as_deref() != Some(url.as_str()) {
            self.emit(ConnectionEvent::ServerUrlChanged {
                previous,
                current: url.clone(),
            });
        }
        self.notify_listeners();

        Some(url)
    }

    /// The network went away: cancel any attempt and fall back to
    /// `NotConnected`. The last known URL stays available.
    pub fn connection_has_been_lost(&self) {
        {
            let mut slot = self.attempt.lock();
            slot.cancel.cancel();
            slot.generation += 1;
            slot.cancel = CancellationToken::new();
            self.state_tx.send_replace(ConnectionState::NotConnected);
        }

        let last_known_url = self.active_server_url();
        info!(last_known_url = ?last_known_url, "Server connection lost");
        self.emit(ConnectionEvent::Lost { last_known_url });
    }

    /// React to network changes: "available" starts a new attempt, "lost"
    /// marks the connection lost. Ends when the stream ends.
    pub fn watch_network(self: Arc<Self>, mut changes: Box<dyn NetworkChangeStream>) -> JoinHandle<()> {
        core_async::spawn(async move {
            while let Some(info) = changes.next().await {
                match info.change_event() {
                    Some(NetworkEvent::Available) => {
                        debug!(network_type = ?info.network_type, "Network available, reconnecting");
                        let selector = self.clone();
                        core_async::spawn(async move {
                            selector.connect().await;
                        });
                    }
                    Some(NetworkEvent::Lost) => self.connection_has_been_lost(),
                    None => debug!("Network status indeterminate, ignoring"),
                }
            }
            debug!("Network change stream ended");
        })
    }

    fn begin_attempt(&self) -> (u64, CancellationToken) {
        let mut slot = self.attempt.lock();
        slot.cancel.cancel();
        slot.generation += 1;
        slot.cancel = CancellationToken::new();
        self.state_tx.send_replace(ConnectionState::Connecting);
        (slot.generation, slot.cancel.clone())
    }

    fn notify_listeners(&self) {
        let Some(url) = self.active_server_url() else {
            return;
        };
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener.on_server_url_changed(&url);
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Connection(event));
        }
    }
}
