//! WebSocket client for connecting to a ComfyUI instance.
//!
//! [`ComfyUIClient`] holds the connection configuration for a single
//! ComfyUI instance.  Call [`ComfyUIClient::connect`] to establish a
//! live [`ComfyUIConnection`] over WebSocket, scoped to one client ID.

use std::time::Duration;

use comfybridge_core::config::ComfyUIConfig;
use comfybridge_core::types::ClientId;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream};

/// The raw WebSocket stream type produced by [`ComfyUIClient::connect`].
pub type ComfyUIStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for a ComfyUI instance's event feed.
///
/// Stores the WebSocket URL and token needed to subscribe to one
/// ComfyUI server. Create a [`ComfyUIConnection`] by calling
/// [`connect`](Self::connect).
pub struct ComfyUIClient {
    ws_url: String,
    auth_token: Option<String>,
}

/// A live WebSocket connection to a ComfyUI instance.
pub struct ComfyUIConnection {
    /// Client ID sent during the WebSocket handshake.
    pub client_id: ClientId,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: ComfyUIStream,
}

/// Upper bound on sending the close frame when tearing a socket down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

impl ComfyUIConnection {
    /// Send a close frame and drop the socket. Failures are logged only;
    /// the connection is being abandoned either way.
    pub async fn close(mut self) {
        match tokio::time::timeout(CLOSE_TIMEOUT, self.ws_stream.close(None)).await {
            Ok(Ok(())) => tracing::debug!(client_id = %self.client_id, "WebSocket closed"),
            Ok(Err(e)) => {
                tracing::debug!(client_id = %self.client_id, error = %e, "WebSocket close failed")
            }
            Err(_) => tracing::debug!(client_id = %self.client_id, "WebSocket close timed out"),
        }
    }
}

/// Generate a fresh subscription client ID (UUID v4).
pub fn new_client_id() -> ClientId {
    uuid::Uuid::new_v4().to_string()
}

impl ComfyUIClient {
    /// Create a new client targeting the configured ComfyUI instance.
    pub fn new(config: &ComfyUIConfig) -> Self {
        Self {
            ws_url: config.ws_url(),
            auth_token: config.auth_token.clone(),
        }
    }

    /// WebSocket base URL (e.g. `ws://host:8188`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Connect to the ComfyUI WebSocket endpoint.
    ///
    /// Appends `client_id` as the `clientId` query parameter so that
    /// ComfyUI addresses execution messages for prompts submitted with
    /// the same ID to this socket only.
    pub async fn connect(&self, client_id: &str) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let url = format!("{}/ws?clientId={}", self.ws_url, client_id);

        let mut request = url
            .into_client_request()
            .map_err(|e| ComfyUIClientError::Protocol(format!("Invalid WebSocket URL: {e}")))?;

        if let Some(token) = &self.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                ComfyUIClientError::Protocol(format!("Invalid auth token header: {e}"))
            })?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, _response) = connect_async(request).await.map_err(|e| match e {
            WsError::Http(response) if response.status() == StatusCode::UNAUTHORIZED => {
                let body = response
                    .body()
                    .as_deref()
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default();
                ComfyUIClientError::Unauthorized { body }
            }
            other => ComfyUIClientError::Connection(format!(
                "Failed to connect to ComfyUI at {}: {other}",
                self.ws_url
            )),
        })?;

        tracing::info!(
            client_id = %client_id,
            "Connected to ComfyUI at {}",
            self.ws_url,
        );

        Ok(ComfyUIConnection {
            client_id: client_id.to_string(),
            ws_stream,
        })
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the initial WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server refused the handshake with HTTP 401.
    #[error("ComfyUI rejected the WebSocket credentials: {body}")]
    Unauthorized { body: String },

    /// The handshake request could not be built.
    #[error("Protocol error: {0}")]
    Protocol(String),
}
