/// Health check body.
pub mod health;
/// Query parameters and introspection bodies.
pub mod query;
/// Roster, identity and game-state types.
pub mod session;
/// WebSocket frames.
pub mod ws;
