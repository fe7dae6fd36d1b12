use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::dto::session::{GameState, Roster};

/// Query string of the session endpoint.
#[derive(Debug, Clone, Deserialize, Validate, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query, rename_all = "camelCase")]
pub struct SessionQuery {
    /// Key of the session (board instance) to join.
    #[validate(length(min = 1, max = 256))]
    pub instance_id: String,
    /// Access token forwarded to the identity provider, when one is configured.
    pub access_token: Option<String>,
}

/// Read-only view of a live session.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Session key (`instanceId`).
    pub session_key: String,
    /// Host identity id.
    pub host: Option<String>,
    /// Campaign derived from the host.
    pub campaign_id: Option<String>,
    /// Open connections.
    #[schema(value_type = Object)]
    pub connections: Roster,
    /// Current game-state.
    pub game_state: GameState,
}
