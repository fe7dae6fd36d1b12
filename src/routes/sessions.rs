use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use crate::{dto::query::SessionSummary, error::AppError, state::SharedState};

/// Read-only introspection of running sessions.
pub fn router() -> Router<SharedState> {
    Router::new().route("/sessions/{key}", get(session_summary))
}

#[utoipa::path(
    get,
    path = "/sessions/{key}",
    tag = "sessions",
    params(("key" = String, Path, description = "Session key (instanceId)")),
    responses(
        (status = 200, description = "Live session view", body = SessionSummary),
        (status = 404, description = "No running coordinator for this key")
    )
)]
/// Return host, campaign, roster and game-state of a running session.
pub async fn session_summary(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> Result<Json<SessionSummary>, AppError> {
    let handle = state
        .sessions()
        .get(&key)
        .ok_or_else(|| AppError::NotFound(format!("session `{key}` is not running")))?;
    let summary = handle.summary().await?;
    Ok(Json(summary))
}
