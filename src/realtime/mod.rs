//! Realtime Fan-Out
//!
//! Pushes vote and song events to every connected client.
//!
//! ## Architecture
//!
//! - **Hub**: Owns the subscriber registry, the event queue and the single
//!   delivery loop
//! - **Publisher**: Publish-only handle for request handlers
//! - **Subscriber**: Anything the hub can write an event to
//! - **Handler**: WebSocket upgrade and connection lifecycle
//!
//! ## Usage
//!
//! Clients connect to `/ws` and receive every event as a JSON frame:
//!
//! ```javascript
//! const ws = new WebSocket('ws://localhost:8081/ws');
//!
//! ws.onmessage = (event) => {
//!   const msg = JSON.parse(event.data);
//!   if (msg.type === 'vote_cast') updateVotes(msg.data);
//! };
//! ```
//!
//! Producers publish after committing their change:
//!
//! ```rust,no_run
//! use groovegarden_hub::realtime::{Event, Hub, HubConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let hub = Hub::new(HubConfig::default());
//!     hub.start().unwrap();
//!
//!     let publisher = hub.publisher();
//!     publisher.publish(Event::new("vote_cast", json!({"id": 7, "votes": 5})));
//!
//!     hub.shutdown().await.unwrap();
//! }
//! ```

mod event;
mod handler;
mod hub;
mod queue;
mod registry;
mod subscriber;

pub use event::{Event, SONG_ADDED, VOTE_CAST};
pub use handler::{websocket_handler, WebSocketSubscriber};
pub use hub::{Hub, HubConfig, HubError, HubStats, Publisher};
pub use queue::OverflowPolicy;
pub use subscriber::{ChannelSubscriber, DeliveryError, Subscriber, SubscriberId};
