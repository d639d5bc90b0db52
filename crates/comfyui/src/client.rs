//! WebSocket client for connecting to a ComfyUI instance.
//!
//! [`ComfyUIClient`] holds the WebSocket base URL of one ComfyUI
//! instance.  Call [`ComfyUIClient::connect`] with a session client ID to
//! establish a live [`ComfyUIConnection`].

use std::time::Duration;

use tokio_tungstenite::{connect_async, MaybeTlsStream};

/// The raw WebSocket stream type used for ComfyUI connections.
pub type ComfyUIStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Host (and optional port) of a ComfyUI instance plus its scheme family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendAddress {
    /// e.g. `127.0.0.1:8188`.
    pub host: String,
    /// Use `https` / `wss` instead of `http` / `ws`.
    pub secure: bool,
}

impl BackendAddress {
    pub fn new(host: impl Into<String>, secure: bool) -> Self {
        Self {
            host: host.into(),
            secure,
        }
    }

    /// HTTP base URL, e.g. `http://127.0.0.1:8188`.
    pub fn api_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}", self.host)
    }

    /// WebSocket base URL, e.g. `ws://127.0.0.1:8188`.
    pub fn ws_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}", self.host)
    }
}

/// Connection configuration for a ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIClient {
    ws_url: String,
}

/// A live WebSocket connection to a ComfyUI instance.
pub struct ComfyUIConnection {
    /// Client ID sent during the WebSocket handshake. Must be passed with
    /// every prompt submitted from this session.
    pub client_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: ComfyUIStream,
}

impl ComfyUIClient {
    /// * `ws_url` - WebSocket base URL, e.g. `ws://host:8188`.
    pub fn new(ws_url: String) -> Self {
        Self { ws_url }
    }

    /// WebSocket base URL (e.g. `ws://host:8188`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Full handshake URL for a session.
    pub fn session_url(&self, client_id: &str) -> String {
        format!("{}/ws?clientId={}", self.ws_url, client_id)
    }

    /// Connect to the ComfyUI WebSocket endpoint as `client_id`.
    ///
    /// The handshake is abandoned after `timeout`.
    pub async fn connect(
        &self,
        client_id: &str,
        timeout: Duration,
    ) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let url = self.session_url(client_id);

        let (ws_stream, _response) = tokio::time::timeout(timeout, connect_async(&url))
            .await
            .map_err(|_| ComfyUIClientError::Timeout {
                url: self.ws_url.clone(),
                timeout,
            })?
            .map_err(|e| {
                ComfyUIClientError::Connection(format!(
                    "Failed to connect to ComfyUI at {}: {e}",
                    self.ws_url
                ))
            })?;

        tracing::info!(client_id = %client_id, "Connected to ComfyUI at {}", self.ws_url);

        Ok(ComfyUIConnection {
            client_id: client_id.to_string(),
            ws_stream,
        })
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The handshake did not complete in time.
    #[error("Connection to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
}
