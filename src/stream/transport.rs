//! Network transports that yield inbound frames.

use crate::error::{FitError, Result};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::debug;

/// One inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// Ping, pong and other control traffic
    Control,
    /// The peer started a close handshake
    Close,
}

/// Inbound frames of one open connection. Dropping it releases the connection.
pub type FrameStream = BoxStream<'static, Result<Frame>>;

/// Opens a long-lived stream to an address.
///
/// Implementations perform exactly one connection attempt per call.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to `address` and return its inbound frames.
    async fn open(&self, address: &str) -> Result<FrameStream>;
}

/// WebSocket transport backed by tokio-tungstenite.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    bearer_token: Option<String>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `Authorization: Bearer <token>` with every handshake.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, address: &str) -> Result<FrameStream> {
        let mut request = address
            .into_client_request()
            .map_err(|e| FitError::connection_error(format!("Invalid address {}: {}", address, e)))?;

        if let Some(token) = &self.bearer_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| FitError::config_error(format!("Invalid bearer token: {}", e)))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, response) = connect_async(request).await.map_err(map_ws_error)?;
        debug!("WebSocket handshake with {} completed: {}", address, response.status());

        let frames = ws_stream.map(|msg| match msg {
            Ok(Message::Text(text)) => Ok(Frame::Text(text)),
            Ok(Message::Binary(data)) => Ok(Frame::Binary(data)),
            Ok(Message::Close(_)) => Ok(Frame::Close),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => Ok(Frame::Control),
            Err(e) => Err(map_ws_error(e)),
        });

        Ok(Box::pin(frames))
    }
}

/// Map tungstenite errors into the crate taxonomy. Handshake rejections
/// with 401/403 become [`FitError::Unauthorized`].
fn map_ws_error(err: WsError) -> FitError {
    match err {
        WsError::Http(response)
            if response.status() == StatusCode::UNAUTHORIZED
                || response.status() == StatusCode::FORBIDDEN =>
        {
            FitError::Unauthorized
        }
        other => FitError::connection_error(other.to_string()),
    }
}
