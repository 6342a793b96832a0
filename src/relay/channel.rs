use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use serde_json::Value;
use tracing::debug;

use crate::error::RelayError;

/// Client-originated input, after transport noise is filtered out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Close,
}

/// One bidirectional text channel to a client.
#[async_trait]
pub trait ClientChannel: Send {
    /// Completes the handshake. Channels that arrive already upgraded
    /// return `Ok(())`.
    async fn accept(&mut self) -> Result<(), RelayError>;

    /// Next client message, or `None` once the transport is gone.
    ///
    /// Must be cancel-safe: the relay races it against the agent's stream.
    async fn recv(&mut self) -> Option<Result<Inbound, RelayError>>;

    async fn send_json(&mut self, payload: &Value) -> Result<(), RelayError>;
}

#[async_trait]
impl ClientChannel for WebSocket {
    async fn accept(&mut self) -> Result<(), RelayError> {
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Inbound, RelayError>> {
        loop {
            let message = match WebSocket::recv(self).await? {
                Ok(message) => message,
                Err(err) => return Some(Err(RelayError::TransportRead(err.to_string()))),
            };
            match message {
                Message::Text(text) if text.as_str().trim().is_empty() => {
                    debug!("ignoring empty text frame");
                }
                Message::Text(text) => return Some(Ok(Inbound::Text(text.as_str().to_owned()))),
                Message::Close(_) => return Some(Ok(Inbound::Close)),
                Message::Binary(data) => {
                    debug!(len = data.len(), "ignoring binary frame");
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    }

    async fn send_json(&mut self, payload: &Value) -> Result<(), RelayError> {
        let text = serde_json::to_string(payload)
            .map_err(|err| RelayError::TransportWrite(err.to_string()))?;
        WebSocket::send(self, Message::Text(text.into()))
            .await
            .map_err(|err| RelayError::TransportWrite(err.to_string()))
    }
}
