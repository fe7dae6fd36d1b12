/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Caller identity resolution for session admission.
pub mod identity_service;
/// Storage connectivity supervisor driving degraded mode.
pub mod storage_supervisor;
/// WebSocket session link handling.
pub mod websocket_service;
