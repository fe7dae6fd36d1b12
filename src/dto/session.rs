use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;
use validator::Validate;

/// Page every new connection starts on.
pub const DEFAULT_PAGE_ID: &str = "page:page";

/// Roster of open connections keyed by connection id.
pub type Roster = IndexMap<String, Connection>;

/// Redacted public profile of an authenticated participant.
///
/// Only the fields listed here ever leave the identity collaborator; raw credentials
/// and private profile data are dropped before the descriptor reaches a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Stable identifier of the participant; host election compares this value.
    #[validate(length(min = 1, max = 128))]
    pub id: String,
    /// Account name.
    #[serde(default)]
    #[validate(length(max = 128))]
    pub username: String,
    /// Display name, when the participant set one.
    #[serde(default, alias = "global_name")]
    #[validate(length(max = 128))]
    pub global_name: Option<String>,
    /// Avatar reference, resolved by the client.
    #[serde(default)]
    pub avatar: Option<String>,
    /// Legacy discriminator, kept for display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<String>,
}

impl Identity {
    /// Build an identity that only carries an id (used by the anonymous mode and tests).
    pub fn with_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            username: id.clone(),
            id,
            global_name: None,
            avatar: None,
            discriminator: None,
        }
    }
}

/// Cursor position on the shared canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Cursor {
    /// Horizontal canvas coordinate.
    pub x: f64,
    /// Vertical canvas coordinate.
    pub y: f64,
}

/// Ephemeral per-connection view state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    /// Page the participant is looking at.
    pub page_id: String,
    /// Cursor position, `null` when the pointer is outside the canvas.
    pub cursor: Option<Cursor>,
}

impl Default for Presence {
    fn default() -> Self {
        Self {
            page_id: DEFAULT_PAGE_ID.to_owned(),
            cursor: None,
        }
    }
}

/// One entry of the roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Opaque id assigned on admission.
    pub connection_id: String,
    /// Who opened the connection.
    pub identity: Identity,
    /// True iff `identity.id` equals the session host.
    pub is_host: bool,
    /// Current page and cursor.
    pub presence: Presence,
}

/// Tabletop rule system selected for a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum GameSystem {
    /// Dungeons & Dragons, fifth edition.
    #[serde(rename = "d&d5e")]
    Dnd5e,
    /// Pathfinder.
    #[serde(rename = "pathfinder")]
    Pathfinder,
    /// Daggerheart.
    #[serde(rename = "daggerheart")]
    Daggerheart,
    /// Any other system.
    #[serde(rename = "other")]
    Other,
}

/// Application-defined state shared by every connection of a session.
///
/// Only `system` is interpreted; any other field is carried through untouched so
/// clients can extend the payload without a server release.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
pub struct GameState {
    /// Selected rule system, `null` until chosen.
    pub system: Option<GameSystem>,
    /// Fields the server does not interpret.
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub extra: Map<String, Value>,
}
