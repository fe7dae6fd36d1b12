use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::dto::session::{GameState, Presence, Roster};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, ToSchema)]
/// Frames accepted from session clients.
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Replace the sender's presence.
    #[serde(rename = "presence")]
    Presence { presence: Presence },
    /// Content change batch for the synchronization layer.
    #[serde(rename = "update")]
    Update {
        #[serde(default)]
        #[schema(value_type = Object)]
        updates: Value,
    },
    /// Ask for the authoritative content snapshot.
    #[serde(rename = "recovery")]
    Recovery,
    /// Replace the session game-state.
    #[serde(rename = "gameState")]
    GameState {
        #[serde(rename = "gameState")]
        game_state: GameState,
    },
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Parse a text frame.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, ToSchema)]
/// Frames pushed by the session coordinator.
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Identifier assigned to the receiving connection.
    #[serde(rename = "connectionId")]
    ConnectionId {
        #[serde(rename = "connectionId")]
        connection_id: String,
    },
    /// Full game-state.
    #[serde(rename = "gameState")]
    GameState {
        #[serde(rename = "gameState")]
        game_state: GameState,
    },
    /// Full roster, sent on every join and leave.
    #[serde(rename = "connections")]
    Connections {
        #[schema(value_type = Object)]
        connections: Roster,
    },
    /// Presence change of another connection.
    #[serde(rename = "presence")]
    Presence {
        #[serde(rename = "connectionId")]
        connection_id: String,
        presence: Presence,
    },
    /// Content change batch accepted from another connection.
    #[serde(rename = "update")]
    Update {
        #[schema(value_type = Object)]
        updates: Value,
    },
    /// Authoritative content snapshot.
    #[serde(rename = "recovery")]
    Recovery {
        #[schema(value_type = Object)]
        snapshot: Value,
    },
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Parse a text frame.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serialize into a single-line JSON text frame.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
