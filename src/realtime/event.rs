//! Hub Event Types
//!
//! Defines the events producers hand to the hub and the JSON frame
//! remote peers receive for each of them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind tag for a vote that changed a song's tally
pub const VOTE_CAST: &str = "vote_cast";

/// Kind tag for a newly created song
pub const SONG_ADDED: &str = "song_added";

/// An immutable event broadcast to every connected subscriber
///
/// Serialized on the wire as `{"type": <kind>, "data": <payload>}`.
/// The hub never looks inside `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Semantic tag clients switch on (e.g. "vote_cast")
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque cargo
    #[serde(rename = "data")]
    pub payload: Value,
}

impl Event {
    /// Create an event from an already-built JSON payload
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Create an event from any serializable payload
    pub fn from_serialize<T: Serialize>(
        kind: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(kind, serde_json::to_value(payload)?))
    }

    /// A song received a vote; payload is the updated song record
    pub fn vote_cast<T: Serialize>(song: &T) -> Result<Self, serde_json::Error> {
        Self::from_serialize(VOTE_CAST, song)
    }

    /// A song was added; payload is the new song record
    pub fn song_added<T: Serialize>(song: &T) -> Result<Self, serde_json::Error> {
        Self::from_serialize(SONG_ADDED, song)
    }

    /// Render the wire frame sent to remote peers
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
