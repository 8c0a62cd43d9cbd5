//! Subscriber Handles
//!
//! A subscriber is anything the hub can push an [`Event`] into: a WebSocket
//! connection, or an in-process channel.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use super::event::Event;

/// Unique identifier for a registered subscriber
pub type SubscriberId = String;

/// A connected client the hub can deliver events to
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Write one event to the remote peer
    ///
    /// Any error is terminal: the hub unregisters the subscriber and never
    /// calls `send` on it again.
    async fn send(&self, event: &Event) -> Result<(), DeliveryError>;

    /// Release the underlying connection after the hub dropped it
    async fn close(&self) {}
}

/// Why a delivery to one subscriber failed
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Connection closed by peer")]
    Closed,

    #[error("Write failed: {0}")]
    Io(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Write timed out after {0:?}")]
    Timeout(Duration),

    #[error("Subscriber panicked during delivery")]
    Panicked,
}

/// In-process subscriber backed by a bounded channel
///
/// When the channel is full `send` waits, so a consumer that stops reading
/// eventually hits the hub's write timeout.
pub struct ChannelSubscriber {
    sender: mpsc::Sender<Event>,
}

impl ChannelSubscriber {
    /// Create a subscriber and the receiver its events arrive on
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    async fn send(&self, event: &Event) -> Result<(), DeliveryError> {
        self.sender
            .send(event.clone())
            .await
            .map_err(|_| DeliveryError::Closed)
    }
}
