use std::time::Duration;

use crate::dto::{
    session::{Connection, GameState, Presence, Roster},
    ws::ServerMessage,
};

/// Read model published by a session link.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkView {
    /// Id assigned by the coordinator to the current (or last) connection.
    pub connection_id: Option<String>,
    /// Last roster received; replaced wholesale on every `connections` frame.
    pub connections: Roster,
    /// Last game-state received or set locally.
    pub game_state: GameState,
    /// True while a socket is open.
    pub live: bool,
    /// Delay the next reconnect would use.
    pub backoff: Duration,
}

impl LinkView {
    /// Roster entry of this link.
    pub fn self_connection(&self) -> Option<&Connection> {
        self.connection_id
            .as_deref()
            .and_then(|id| self.connections.get(id))
    }

    /// Every roster entry except this link.
    pub fn others(&self) -> impl Iterator<Item = &Connection> {
        let own = self.connection_id.as_deref();
        self.connections
            .values()
            .filter(move |connection| Some(connection.connection_id.as_str()) != own)
    }

    /// Connection ids of every other participant, in roster order.
    pub fn other_connection_ids(&self) -> Vec<&str> {
        self.others()
            .map(|connection| connection.connection_id.as_str())
            .collect()
    }

    /// Another participant's entry; `None` for unknown ids and for this link.
    pub fn other(&self, connection_id: &str) -> Option<&Connection> {
        if self.connection_id.as_deref() == Some(connection_id) {
            return None;
        }
        self.connections.get(connection_id)
    }

    /// Presence of this link, once it has a roster entry.
    pub fn my_presence(&self) -> Option<&Presence> {
        self.self_connection().map(|connection| &connection.presence)
    }

    /// Fold one coordinator frame into the view. Returns false for frames the link
    /// does not track.
    pub fn apply(&mut self, message: ServerMessage) -> bool {
        match message {
            ServerMessage::ConnectionId { connection_id } => {
                self.connection_id = Some(connection_id);
            }
            ServerMessage::Connections { connections } => {
                self.connections = connections;
            }
            ServerMessage::GameState { game_state } => {
                self.game_state = game_state;
            }
            ServerMessage::Presence {
                connection_id,
                presence,
            } => match self.connections.get_mut(&connection_id) {
                Some(connection) => connection.presence = presence,
                None => return false,
            },
            ServerMessage::Update { .. } | ServerMessage::Recovery { .. } | ServerMessage::Unknown => {
                return false;
            }
        }
        true
    }

    /// Replace this link's own presence locally. Returns false before admission.
    pub fn set_own_presence(&mut self, presence: Presence) -> bool {
        let Some(id) = self.connection_id.as_deref() else {
            return false;
        };
        match self.connections.get_mut(id) {
            Some(connection) => {
                connection.presence = presence;
                true
            }
            None => false,
        }
    }
}
