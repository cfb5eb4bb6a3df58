//! Lifecycle of a single long-lived stream.

use crate::error::{FitError, Result};
use crate::stream::transport::{Frame, Transport};
use crate::stream::{ConnectionState, FailureReason};
use futures_util::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Callback invoked with the payload of every inbound text frame.
///
/// An `Err` is logged and the read loop moves on to the next frame.
pub type FrameHandler = Arc<dyn Fn(&str) -> Result<()> + Send + Sync>;

/// State shared between a connection and its read-loop task.
struct Shared {
    name: String,
    state_tx: watch::Sender<ConnectionState>,
    /// Bumped on every open/close; a task only writes state while its
    /// epoch is current, so a stale loop can never resurrect a closed channel.
    epoch: AtomicU64,
    /// Times a read loop reached `Connected`. Survives watch updates that
    /// collapse a short-lived session into its final `Failed` state.
    connected: AtomicU64,
}

impl Shared {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn transition(&self, epoch: u64, next: ConnectionState) -> bool {
        self.state_tx.send_if_modified(|state| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            if next == ConnectionState::Connected {
                self.connected.fetch_add(1, Ordering::SeqCst);
            }
            *state = next;
            true
        })
    }
}

/// Owns one network stream: open, read loop, close.
pub struct StreamConnection {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    handler: FrameHandler,
    connect_timeout: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamConnection {
    /// Create a closed connection that will feed text frames to `handler`.
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        connect_timeout: Duration,
        handler: FrameHandler,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state_tx,
                epoch: AtomicU64::new(0),
                connected: AtomicU64::new(0),
            }),
            transport,
            handler,
            connect_timeout,
            task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state_tx.borrow().clone()
    }

    /// Receiver notified on every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// How many times this connection has been established.
    pub fn connected_count(&self) -> u64 {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Start connecting to `address` in the background.
    ///
    /// Returns `false` without doing anything when the connection is already
    /// connecting or connected. Must be called inside a tokio runtime.
    pub fn open(&self, address: &str) -> bool {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if self.state().is_active() {
            debug!("Channel {} already open, ignoring connect to {}", self.name(), address);
            return false;
        }

        if let Some(previous) = task.take() {
            previous.abort();
        }

        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.state_tx.send_replace(ConnectionState::Connecting);

        let read_loop = ReadLoop {
            shared: Arc::clone(&self.shared),
            epoch,
            connection_id: Uuid::new_v4(),
            address: address.to_string(),
            transport: Arc::clone(&self.transport),
            handler: Arc::clone(&self.handler),
            connect_timeout: self.connect_timeout,
        };
        *task = Some(tokio::spawn(read_loop.run()));
        true
    }

    /// Cancel the read loop and release the connection. Safe to call at any
    /// time, any number of times.
    pub fn close(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = task.take() {
            handle.abort();
            info!("Closed channel {}", self.name());
        }
        self.shared.state_tx.send_replace(ConnectionState::Disconnected);
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.task.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }
}

/// Everything the spawned read-loop task owns.
struct ReadLoop {
    shared: Arc<Shared>,
    epoch: u64,
    connection_id: Uuid,
    address: String,
    transport: Arc<dyn Transport>,
    handler: FrameHandler,
    connect_timeout: Duration,
}

impl ReadLoop {
    async fn run(self) {
        let name = self.shared.name.as_str();
        info!("Connecting channel {} to {} ({})", name, self.address, self.connection_id);

        let opened = tokio::time::timeout(self.connect_timeout, self.transport.open(&self.address)).await;
        let mut frames = match opened {
            Ok(Ok(frames)) => frames,
            Ok(Err(FitError::Unauthorized)) => {
                warn!("Channel {} rejected our credential", name);
                self.fail(FailureReason::Unauthorized);
                return;
            }
            Ok(Err(e)) => {
                warn!("Channel {} failed to connect: {}", name, e);
                self.fail(FailureReason::Transport(e.to_string()));
                return;
            }
            Err(_) => {
                warn!("Channel {} connect timed out after {:?}", name, self.connect_timeout);
                self.fail(FailureReason::Timeout);
                return;
            }
        };

        if !self.shared.transition(self.epoch, ConnectionState::Connected) {
            return;
        }
        info!("Channel {} connected ({})", name, self.connection_id);

        while let Some(frame) = frames.next().await {
            if !self.shared.is_current(self.epoch) {
                return;
            }
            match frame {
                Ok(Frame::Text(payload)) => {
                    if let Err(e) = (self.handler)(&payload) {
                        warn!("Channel {} frame handler failed: {}", name, e);
                    }
                }
                Ok(Frame::Binary(data)) => {
                    debug!("Channel {} ignoring {}-byte binary frame", name, data.len());
                }
                Ok(Frame::Control) => {}
                Ok(Frame::Close) => break,
                Err(e) => {
                    warn!("Channel {} read failed: {}", name, e);
                    self.fail(FailureReason::Transport(e.to_string()));
                    return;
                }
            }
        }

        info!("Channel {} closed by peer ({})", name, self.connection_id);
        self.fail(FailureReason::ClosedByPeer);
    }

    fn fail(&self, reason: FailureReason) {
        self.shared.transition(self.epoch, ConnectionState::Failed(reason));
    }
}
