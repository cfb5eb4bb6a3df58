//! The client facade UI code talks to.

use crate::config::ClientConfig;
use crate::diary::{validate_date, DailyAggregate, LedgerEntry, LedgerStore, UserScope};
use crate::error::{FitError, Result};
use crate::stream::reconnect::UnauthorizedHook;
use crate::stream::{ConnectionState, Reconnector, StreamManager, Subscription, Transport, WebSocketTransport};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::watch;
use tracing::{info, warn};

/// Single entry point for live telemetry and the food diary.
///
/// Streams are shared by every subscriber of a channel; ledger operations
/// always run against the signed-in [`UserScope`] and fail with
/// [`FitError::Scope`] when nobody is signed in.
pub struct FitnessClient {
    config: ClientConfig,
    streams: Arc<StreamManager<i64>>,
    ledger: LedgerStore,
    scope: RwLock<Option<UserScope>>,
    reconnectors: Mutex<HashMap<String, Reconnector>>,
    reauth_tx: Arc<watch::Sender<bool>>,
}

impl FitnessClient {
    /// Create a client using `transport` for every telemetry channel.
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let streams = StreamManager::integer(transport)
            .with_connect_timeout(config.connect_timeout())
            .with_capacity(config.channel_capacity);
        let ledger = LedgerStore::new(&config.data_dir);
        let (reauth_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            streams: Arc::new(streams),
            ledger,
            scope: RwLock::new(None),
            reconnectors: Mutex::new(HashMap::new()),
            reauth_tx: Arc::new(reauth_tx),
        })
    }

    /// Create a client that streams over WebSocket, optionally sending a bearer token.
    pub fn with_websocket(config: ClientConfig, bearer_token: Option<String>) -> Result<Self> {
        let mut transport = WebSocketTransport::new();
        if let Some(token) = bearer_token {
            transport = transport.with_bearer_token(token);
        }
        Self::new(config, Arc::new(transport))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Make `scope` the current user. Clears any pending re-auth signal.
    pub fn sign_in(&self, scope: UserScope) {
        info!("Signed in as {}", scope);
        *self.scope.write().unwrap_or_else(PoisonError::into_inner) = Some(scope);
        self.reauth_tx.send_replace(false);
    }

    /// Forget the current user and close every stream.
    pub fn sign_out(&self) {
        self.close();
        let previous = self.scope.write().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(scope) = previous {
            info!("Signed out {}", scope);
        }
    }

    /// The signed-in user.
    pub fn scope(&self) -> Result<UserScope> {
        self.scope
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| FitError::scope_error("no user is signed in"))
    }

    /// Connect `channel` to `address` and keep it reconnected per the
    /// configured policy. Returns immediately.
    pub fn connect(&self, channel: &str, address: &str) {
        self.streams.connect(channel, address);

        let mut reconnectors = self.reconnectors.lock().unwrap_or_else(PoisonError::into_inner);
        let running = reconnectors
            .get(channel)
            .map_or(false, |reconnector| !reconnector.is_finished());
        if running {
            return;
        }

        let reauth_tx = Arc::clone(&self.reauth_tx);
        let on_unauthorized: UnauthorizedHook = Arc::new(move || {
            reauth_tx.send_replace(true);
        });
        let reconnector = Reconnector::spawn(
            Arc::clone(&self.streams),
            channel,
            address,
            self.config.reconnect.clone(),
            Some(on_unauthorized),
        );
        reconnectors.insert(channel.to_string(), reconnector);
    }

    /// Latest value of `channel` followed by every later one.
    pub fn subscribe(&self, channel: &str) -> Subscription<i64> {
        self.streams.subscribe(channel)
    }

    /// Connection state of `channel`, for "live" vs "reconnecting" display.
    pub fn connection_state(&self, channel: &str) -> watch::Receiver<ConnectionState> {
        self.streams.state(channel)
    }

    /// Most recent value of `channel`, if any arrived.
    pub fn latest(&self, channel: &str) -> Option<i64> {
        self.streams.latest(channel)
    }

    /// Close one channel and stop reconnecting it.
    pub fn disconnect(&self, channel: &str) {
        self.reconnectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(channel);
        self.streams.disconnect(channel);
    }

    /// Flips to `true` when the backend rejects our credential.
    pub fn reauth_required(&self) -> watch::Receiver<bool> {
        self.reauth_tx.subscribe()
    }

    /// Report an authorization failure seen outside the streaming layer.
    pub fn report_unauthorized(&self) {
        warn!("Authorization rejected, re-authentication required");
        self.reauth_tx.send_replace(true);
    }

    /// Log `entry` for the current user. Returns the updated day totals.
    pub async fn append(&self, entry: LedgerEntry) -> Result<DailyAggregate> {
        let scope = self.scope()?;
        self.ledger.append(&scope, entry).await
    }

    pub async fn entries_for_date(&self, date: &str) -> Result<Vec<LedgerEntry>> {
        let scope = self.scope()?;
        validate_date(date)?;
        Ok(self.ledger.entries_for_date(&scope, date).await)
    }

    pub async fn aggregate_for_date(&self, date: &str) -> Result<Option<DailyAggregate>> {
        let scope = self.scope()?;
        validate_date(date)?;
        Ok(self.ledger.aggregate_for_date(&scope, date).await)
    }

    pub async fn all_aggregates(&self) -> Result<Vec<DailyAggregate>> {
        let scope = self.scope()?;
        Ok(self.ledger.all_aggregates(&scope).await)
    }

    pub async fn aggregate_range(&self, from: &str, to: &str) -> Result<Vec<DailyAggregate>> {
        let scope = self.scope()?;
        self.ledger.aggregate_range(&scope, from, to).await
    }

    pub async fn rebuild_aggregates(&self) -> Result<Vec<DailyAggregate>> {
        let scope = self.scope()?;
        self.ledger.rebuild_aggregates(&scope).await
    }

    /// Cancel pending reconnects and close every stream.
    pub fn close(&self) {
        self.reconnectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.streams.close_all();
    }
}

impl Drop for FitnessClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diary::Nutrients;

    fn client(dir: &std::path::Path) -> FitnessClient {
        FitnessClient::with_websocket(ClientConfig::new(dir), None).unwrap()
    }

    #[tokio::test]
    async fn test_ledger_requires_scope() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path());
        let entry = LedgerEntry::builder("2024-01-10", "Rice").calories(200.0).build().unwrap();

        assert!(matches!(client.append(entry).await, Err(FitError::Scope(_))));
        assert!(matches!(client.all_aggregates().await, Err(FitError::Scope(_))));
        assert!(matches!(
            client.entries_for_date("2024-01-10").await,
            Err(FitError::Scope(_))
        ));
    }

    #[tokio::test]
    async fn test_append_through_facade() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path());
        client.sign_in(UserScope::new("alice").unwrap());

        let day = client
            .append(
                LedgerEntry::builder("2024-01-10", "Rice")
                    .nutrients(Nutrients::new(200.0, 4.0, 0.5, 44.0))
                    .build()
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(day.entry_count, 1);

        assert_eq!(client.entries_for_date("2024-01-10").await.unwrap().len(), 1);
        assert!(client.aggregate_for_date("2024-01-10").await.unwrap().is_some());
        assert!(client.aggregate_for_date("10-01-2024").await.is_err());

        client.sign_out();
        assert!(client.scope().is_err());
    }

    #[tokio::test]
    async fn test_report_unauthorized_and_sign_in_reset() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path());
        let reauth = client.reauth_required();
        assert!(!*reauth.borrow());

        client.report_unauthorized();
        assert!(*reauth.borrow());

        client.sign_in(UserScope::new("alice").unwrap());
        assert!(!*reauth.borrow());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ClientConfig::default().with_channel_capacity(0);
        assert!(FitnessClient::with_websocket(config, None).is_err());
    }
}
