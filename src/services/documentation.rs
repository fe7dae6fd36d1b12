use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the Adventure Board backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sessions::session_summary,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::query::SessionSummary,
            crate::dto::session::Identity,
            crate::dto::session::Presence,
            crate::dto::session::Cursor,
            crate::dto::session::Connection,
            crate::dto::session::GameState,
            crate::dto::session::GameSystem,
            crate::dto::ws::ClientMessage,
            crate::dto::ws::ServerMessage,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sessions", description = "Session introspection"),
        (name = "realtime", description = "WebSocket session links"),
    )
)]
/// OpenAPI document of the HTTP surface.
pub struct ApiDoc;
