use axum::{
    Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::rejection::WebSocketUpgradeRejection,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
};
use axum_valid::Valid;
use tracing::{debug, warn};

use crate::{
    dto::query::SessionQuery,
    error::AppError,
    services::{identity_service, websocket_service},
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/ws",
    tag = "realtime",
    params(SessionQuery),
    responses(
        (status = 101, description = "Switching protocols to WebSocket"),
        (status = 400, description = "Missing or invalid instanceId"),
        (status = 401, description = "Caller could not be identified"),
        (status = 426, description = "Request is not a WebSocket upgrade")
    )
)]
/// Join the session named by `instanceId` over a WebSocket link.
pub async fn ws_handler(
    State(state): State<SharedState>,
    Valid(Query(query)): Valid<Query<SessionQuery>>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<impl IntoResponse, AppError> {
    let ws = ws.map_err(|rejection| {
        debug!(session = %query.instance_id, %rejection, "non-upgrade request on session endpoint");
        AppError::UpgradeRequired("expected a WebSocket upgrade".into())
    })?;

    let identity = identity_service::resolve_identity(
        &state.config().identity,
        &headers,
        query.access_token.as_deref(),
    )
    .await
    .inspect_err(|err| warn!(session = %query.instance_id, error = %err, "admission refused"))?;

    let session_key = query.instance_id;
    Ok(ws.on_upgrade(move |socket| {
        websocket_service::handle_socket(state, socket, session_key, identity)
    }))
}

/// Configure the WebSocket endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/ws", get(ws_handler))
}
