//! # GrooveGarden Hub
//!
//! Realtime fan-out for the GrooveGarden music backend: votes and new songs
//! are pushed to every connected client as soon as they are committed.
//!
//! ## Modules
//!
//! - [`realtime`]: Hub, publisher handles, subscribers and the WebSocket acceptor
//! - [`api`]: Axum router exposing `/ws` and health probes
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use groovegarden_hub::realtime::{ChannelSubscriber, Event, Hub, HubConfig};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = Hub::new(HubConfig::default());
//!     hub.start()?;
//!
//!     // An in-process listener
//!     let (listener, mut events) = ChannelSubscriber::new(64);
//!     hub.register(Arc::new(listener)).await;
//!
//!     // A request handler announcing a vote
//!     hub.publisher().publish(Event::new("vote_cast", json!({"id": 7, "votes": 5})));
//!
//!     let event = events.recv().await;
//!     println!("Received {:?}", event);
//!
//!     hub.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod realtime;

pub use api::{build_router, serve, ApiError, AppState};

pub use realtime::{
    ChannelSubscriber, DeliveryError, Event, Hub, HubConfig, HubError, HubStats, OverflowPolicy,
    Publisher, Subscriber, SubscriberId, websocket_handler,
};

pub use config::{Config, ConfigError, LoggingConfig, ServerConfig};
