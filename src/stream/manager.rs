//! Registry of named, replayable telemetry channels.

use crate::stream::connection::{FrameHandler, StreamConnection};
use crate::stream::decode::decode_int;
use crate::stream::transport::Transport;
use crate::stream::ConnectionState;
use futures_util::stream::{self, BoxStream};
use futures_util::{future, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

/// Latest value followed by every later value of one channel.
pub type Subscription<T> = BoxStream<'static, T>;

/// Turns a text payload into a channel value. Must not fail.
pub type Decoder<T> = Arc<dyn Fn(&str) -> T + Send + Sync>;

/// Latest value plus the fan-out sender, updated together so a subscriber
/// never misses or duplicates a value between replay and live delivery.
struct Slot<T> {
    latest: Option<T>,
    tx: broadcast::Sender<T>,
}

struct Channel<T> {
    slot: Arc<Mutex<Slot<T>>>,
    connection: StreamConnection,
}

impl<T: Clone> Channel<T> {
    fn latest(&self) -> Option<T> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .latest
            .clone()
    }
}

/// Supervises named stream connections and exposes each as a replay-one,
/// multi-subscriber channel.
///
/// Failed connections are not retried here; see
/// [`Reconnector`](crate::stream::Reconnector).
pub struct StreamManager<T> {
    transport: Arc<dyn Transport>,
    decoder: Decoder<T>,
    connect_timeout: Duration,
    capacity: usize,
    channels: Mutex<HashMap<String, Arc<Channel<T>>>>,
}

impl StreamManager<i64> {
    /// Manager for channels carrying decimal integers.
    pub fn integer(transport: Arc<dyn Transport>) -> Self {
        Self::new(transport, Arc::new(decode_int))
    }
}

impl<T> StreamManager<T>
where
    T: Clone + Send + Sync + std::fmt::Debug + 'static,
{
    pub fn new(transport: Arc<dyn Transport>, decoder: Decoder<T>) -> Self {
        Self {
            transport,
            decoder,
            connect_timeout: Duration::from_millis(crate::DEFAULT_CONNECT_TIMEOUT_MS),
            capacity: crate::DEFAULT_CHANNEL_CAPACITY,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Set the timeout applied to every connection attempt.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set how many values a slow subscriber may fall behind before skipping.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Get the named channel, creating it (disconnected) on first use.
    fn channel(&self, name: &str) -> Arc<Channel<T>> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(channel) = channels.get(name) {
            return Arc::clone(channel);
        }

        let (tx, _) = broadcast::channel(self.capacity);
        let slot = Arc::new(Mutex::new(Slot { latest: None, tx }));

        let decoder = Arc::clone(&self.decoder);
        let publish_slot = Arc::clone(&slot);
        let channel_name = name.to_string();
        let handler: FrameHandler = Arc::new(move |payload: &str| {
            let value = decoder(payload);
            debug!("Channel {} received {:?}", channel_name, value);
            let mut slot = publish_slot.lock().unwrap_or_else(PoisonError::into_inner);
            slot.latest = Some(value.clone());
            // No receivers is fine: the value is still kept for replay.
            let _ = slot.tx.send(value);
            Ok(())
        });

        let channel = Arc::new(Channel {
            slot,
            connection: StreamConnection::new(
                name,
                Arc::clone(&self.transport),
                self.connect_timeout,
                handler,
            ),
        });
        channels.insert(name.to_string(), Arc::clone(&channel));
        debug!("Created channel {}", name);
        channel
    }

    /// Connect `name` to `address` unless it is already connecting or
    /// connected. Returns immediately; returns whether an attempt was started.
    pub fn connect(&self, name: &str, address: &str) -> bool {
        let started = self.channel(name).connection.open(address);
        if started {
            info!("Connecting channel {} to {}", name, address);
        }
        started
    }

    /// Subscribe to a channel. The first item is the latest value, if any.
    ///
    /// Subscribing never connects. The stream ends when the channel is
    /// closed.
    pub fn subscribe(&self, name: &str) -> Subscription<T> {
        let channel = self.channel(name);
        let (latest, rx) = {
            let slot = channel.slot.lock().unwrap_or_else(PoisonError::into_inner);
            (slot.latest.clone(), slot.tx.subscribe())
        };

        let channel_name = name.to_string();
        let live = BroadcastStream::new(rx).filter_map(move |item| {
            future::ready(match item {
                Ok(value) => Some(value),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!("Subscriber of {} lagged, skipped {} values", channel_name, skipped);
                    None
                }
            })
        });

        Box::pin(stream::iter(latest).chain(live))
    }

    /// Receiver for the channel's connection state.
    pub fn state(&self, name: &str) -> watch::Receiver<ConnectionState> {
        self.channel(name).connection.watch_state()
    }

    /// Current state of a channel, or `None` if no such channel exists.
    pub fn current_state(&self, name: &str) -> Option<ConnectionState> {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels.get(name).map(|channel| channel.connection.state())
    }

    /// How many times a channel has been established, or `None` if no such
    /// channel exists.
    pub fn connected_count(&self, name: &str) -> Option<u64> {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels.get(name).map(|channel| channel.connection.connected_count())
    }

    /// Most recently delivered value of a channel.
    pub fn latest(&self, name: &str) -> Option<T> {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels.get(name).and_then(|channel| channel.latest())
    }

    /// Names of all registered channels.
    pub fn channels(&self) -> Vec<String> {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Close one channel and drop it from the registry.
    pub fn disconnect(&self, name: &str) {
        let removed = self
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        if let Some(channel) = removed {
            channel.connection.close();
        }
    }

    /// Close every connection and clear the registry.
    pub fn close_all(&self) {
        let drained: Vec<_> = {
            let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
            channels.drain().collect()
        };
        for (name, channel) in &drained {
            debug!("Closing channel {}", name);
            channel.connection.close();
        }
        if !drained.is_empty() {
            info!("Closed {} channels", drained.len());
        }
    }
}

impl<T> Drop for StreamManager<T> {
    fn drop(&mut self) {
        let channels = self.channels.get_mut().unwrap_or_else(PoisonError::into_inner);
        for channel in channels.values() {
            channel.connection.close();
        }
        channels.clear();
    }
}
