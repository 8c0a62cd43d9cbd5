//! WebSocket Handler
//!
//! Accepts WebSocket upgrades, registers each socket with the hub and
//! unregisters it when the peer goes away.

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::event::Event;
use super::hub::Hub;
use super::subscriber::{DeliveryError, Subscriber};
use crate::api::AppState;

/// WebSocket upgrade handler
///
/// This is the entry point for realtime connections.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Write half of an accepted socket, registered with the hub
///
/// Closing it cancels `closed`, which ends the connection's read loop even
/// when the close frame itself cannot be written.
pub struct WebSocketSubscriber {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    closed: CancellationToken,
}

impl WebSocketSubscriber {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
            closed: CancellationToken::new(),
        }
    }

    /// Token cancelled once the hub has closed this subscriber
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Close the socket with a "try again later" frame
    async fn reject(&self, reason: String) {
        let frame = CloseFrame {
            code: close_code::AGAIN,
            reason: reason.into(),
        };
        let _ = self.sink.lock().await.send(Message::Close(Some(frame))).await;
    }
}

#[async_trait]
impl Subscriber for WebSocketSubscriber {
    async fn send(&self, event: &Event) -> Result<(), DeliveryError> {
        let frame = event.to_frame()?;
        self.sink
            .lock()
            .await
            .send(Message::Text(frame))
            .await
            .map_err(|e| DeliveryError::Io(e.to_string()))
    }

    async fn close(&self) {
        self.closed.cancel();
        let _ = self.sink.lock().await.close().await;
    }
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, hub: Hub) {
    let (sender, mut receiver) = socket.split();
    let subscriber = Arc::new(WebSocketSubscriber::new(sender));

    let subscriber_id = match hub.try_register(subscriber.clone()).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected WebSocket connection");
            subscriber.reject(e.to_string()).await;
            return;
        }
    };

    let closed = subscriber.closed();

    // Clients have nothing to say; reading only detects the peer going away.
    loop {
        let result = tokio::select! {
            _ = closed.cancelled() => {
                tracing::debug!(subscriber_id = %subscriber_id, "Hub closed connection");
                break;
            }
            next = receiver.next() => match next {
                Some(result) => result,
                None => break,
            },
        };

        match result {
            Ok(Message::Close(_)) => {
                tracing::debug!(subscriber_id = %subscriber_id, "Client requested close");
                break;
            }
            Ok(_) => {
                tracing::trace!(subscriber_id = %subscriber_id, "Ignoring client message");
            }
            Err(e) => {
                tracing::debug!(
                    subscriber_id = %subscriber_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
        }
    }

    hub.unregister(&subscriber_id).await;
}
