//! Consumer-side reconnect policy.

use crate::error::{FitError, Result};
use crate::stream::manager::StreamManager;
use crate::stream::ConnectionState;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How the wait between attempts grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every attempt
    Fixed,
    /// Delay multiplied by `factor` per attempt, capped at `max_delay_ms`
    Exponential { factor: f64, max_delay_ms: u64 },
}

/// When and how often a failed channel is reconnected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Base delay before an attempt, in milliseconds
    pub delay_ms: u64,
    pub backoff: Backoff,
    /// Random extra delay added per attempt, up to this many milliseconds
    pub jitter_ms: u64,
    /// Give up after this many consecutive failed attempts; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_millis(crate::DEFAULT_RECONNECT_DELAY_MS))
    }
}

impl ReconnectPolicy {
    /// Fixed delay, no jitter, unbounded attempts.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay_ms: delay.as_millis() as u64,
            backoff: Backoff::Fixed,
            jitter_ms: 0,
            max_attempts: None,
        }
    }

    /// Exponential backoff starting at `initial`.
    pub fn exponential(initial: Duration, factor: f64, max_delay: Duration) -> Self {
        Self {
            delay_ms: initial.as_millis() as u64,
            backoff: Backoff::Exponential {
                factor,
                max_delay_ms: max_delay.as_millis() as u64,
            },
            jitter_ms: 0,
            max_attempts: None,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter_ms = jitter.as_millis() as u64;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Backoff::Exponential { factor, max_delay_ms } = &self.backoff {
            if !factor.is_finite() || *factor < 1.0 {
                return Err(FitError::config_error("backoff factor must be >= 1.0"));
            }
            if *max_delay_ms < self.delay_ms {
                return Err(FitError::config_error("max_delay_ms must be >= delay_ms"));
            }
        }
        if self.max_attempts == Some(0) {
            return Err(FitError::config_error("max_attempts must be positive when set"));
        }
        Ok(())
    }

    /// Whether attempt number `attempt` (1-based) may run.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }

    /// Delay before attempt number `attempt` (1-based), jitter excluded.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let millis = match &self.backoff {
            Backoff::Fixed => self.delay_ms,
            Backoff::Exponential { factor, max_delay_ms } => {
                let exponent = attempt.saturating_sub(1).min(63) as i32;
                let scaled = self.delay_ms as f64 * factor.powi(exponent);
                scaled.min(*max_delay_ms as f64) as u64
            }
        };
        Duration::from_millis(millis)
    }

    /// Delay before attempt number `attempt` (1-based), jitter included.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        self.base_delay(attempt) + Duration::from_millis(jitter)
    }
}

/// Called when a channel fails because our credential was rejected.
pub type UnauthorizedHook = Arc<dyn Fn() + Send + Sync>;

/// Reconnects one channel of a [`StreamManager`] whenever it fails.
///
/// At most one attempt runs per delay window. The pending timer is
/// cancelled when the reconnector is dropped or [`cancel`](Self::cancel)led.
pub struct Reconnector {
    channel: String,
    task: JoinHandle<()>,
}

impl Reconnector {
    /// Start supervising `channel`, reconnecting it to `address` on failure.
    pub fn spawn<T>(
        manager: Arc<StreamManager<T>>,
        channel: impl Into<String>,
        address: impl Into<String>,
        policy: ReconnectPolicy,
        on_unauthorized: Option<UnauthorizedHook>,
    ) -> Self
    where
        T: Clone + Send + Sync + std::fmt::Debug + 'static,
    {
        let channel = channel.into();
        let task = tokio::spawn(supervise(
            manager,
            channel.clone(),
            address.into(),
            policy,
            on_unauthorized,
        ));
        Self { channel, task }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Whether supervision has stopped (gave up, unauthorized, or channel closed).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop supervising and cancel any pending attempt.
    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for Reconnector {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn supervise<T>(
    manager: Arc<StreamManager<T>>,
    channel: String,
    address: String,
    policy: ReconnectPolicy,
    on_unauthorized: Option<UnauthorizedHook>,
) where
    T: Clone + Send + Sync + std::fmt::Debug + 'static,
{
    let mut state_rx = manager.state(&channel);
    let mut attempts: u32 = 0;
    let mut connected_seen = manager.connected_count(&channel).unwrap_or(0);

    loop {
        let state = state_rx.borrow_and_update().clone();
        // A session may have come and gone between two wakeups.
        if let Some(connected) = manager.connected_count(&channel) {
            if connected != connected_seen {
                connected_seen = connected;
                attempts = 0;
            }
        }
        match state {
            ConnectionState::Connected => attempts = 0,
            ConnectionState::Failed(reason) if reason.needs_reauthentication() => {
                warn!("Channel {} unauthorized, not reconnecting", channel);
                if let Some(hook) = &on_unauthorized {
                    hook();
                }
                return;
            }
            ConnectionState::Failed(reason) => {
                attempts += 1;
                if !policy.allows(attempts) {
                    warn!(
                        "Channel {} failed ({}), giving up after {} attempts",
                        channel,
                        reason,
                        attempts - 1
                    );
                    return;
                }

                let delay = policy.delay_for(attempts);
                info!(
                    "Channel {} failed ({}), reconnecting in {:?} (attempt {})",
                    channel, reason, delay, attempts
                );
                tokio::time::sleep(delay).await;

                // Someone else may have reconnected or closed it meanwhile.
                match manager.current_state(&channel) {
                    Some(ConnectionState::Failed(_)) => {
                        manager.connect(&channel, &address);
                    }
                    Some(other) => debug!("Channel {} is {} after delay, skipping attempt", channel, other),
                    None => {
                        debug!("Channel {} was closed, stopping reconnects", channel);
                        return;
                    }
                }
                continue;
            }
            ConnectionState::Disconnected | ConnectionState::Connecting => {}
        }

        if state_rx.changed().await.is_err() {
            debug!("Channel {} dropped, stopping reconnects", channel);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::transport::{Frame, FrameStream, Transport};
    use async_trait::async_trait;
    use futures_util::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    /// Accepts every connection, sends one value, then hangs up.
    #[derive(Default)]
    struct HangUpTransport {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Transport for HangUpTransport {
        async fn open(&self, _address: &str) -> Result<FrameStream> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let frames: FrameStream = Box::pin(stream::iter(vec![
                Ok(Frame::Text("1".to_string())),
                Ok(Frame::Close),
            ]));
            Ok(frames)
        }
    }

    #[test]
    fn test_default_policy_matches_fixed_five_seconds() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.backoff, Backoff::Fixed);
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(100), Duration::from_secs(5));
        assert!(policy.allows(u32::MAX));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = ReconnectPolicy::exponential(Duration::from_millis(100), 2.0, Duration::from_millis(1000));
        assert_eq!(policy.base_delay(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay(4), Duration::from_millis(800));
        assert_eq!(policy.base_delay(5), Duration::from_millis(1000));
        assert_eq!(policy.base_delay(500), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = ReconnectPolicy::fixed(Duration::from_millis(100)).with_jitter(Duration::from_millis(50));
        for attempt in 1..50 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_max_attempts() {
        let policy = ReconnectPolicy::default().with_max_attempts(3);
        assert!(policy.allows(3));
        assert!(!policy.allows(4));
    }

    #[test]
    fn test_validate() {
        assert_ok!(ReconnectPolicy::default().validate());
        let bad = ReconnectPolicy::exponential(Duration::from_secs(1), 0.5, Duration::from_secs(10));
        assert_err!(bad.validate());
        let bad = ReconnectPolicy::exponential(Duration::from_secs(10), 2.0, Duration::from_secs(1));
        assert_err!(bad.validate());
        let mut bad = ReconnectPolicy::default();
        bad.max_attempts = Some(0);
        assert_err!(bad.validate());
    }

    #[tokio::test]
    async fn test_successful_sessions_reset_attempt_count() {
        let transport = Arc::new(HangUpTransport::default());
        let manager = Arc::new(StreamManager::integer(transport.clone()));
        manager.connect("steps", "ws://backend/steps");
        let reconnector = Reconnector::spawn(
            Arc::clone(&manager),
            "steps",
            "ws://backend/steps",
            ReconnectPolicy::fixed(Duration::from_millis(20)).with_max_attempts(2),
            None,
        );

        // Well past the initial attempt plus two retries.
        tokio::time::timeout(Duration::from_secs(5), async {
            while transport.attempts.load(Ordering::SeqCst) < 8 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Should keep reconnecting while every session connects");

        assert!(!reconnector.is_finished());
        assert!(manager.connected_count("steps").unwrap() >= 7);
        reconnector.cancel();
    }

    #[test]
    fn test_policy_json() {
        let policy: ReconnectPolicy = serde_json::from_str(
            r#"{"delay_ms": 250, "backoff": {"kind": "exponential", "factor": 1.5, "max_delay_ms": 4000}}"#,
        )
        .unwrap();
        assert_eq!(policy.delay_ms, 250);
        assert_eq!(policy.max_attempts, None);
        assert_eq!(
            policy.backoff,
            Backoff::Exponential {
                factor: 1.5,
                max_delay_ms: 4000
            }
        );
    }
}
