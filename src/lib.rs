//! Library crate for adventureboard-back, exposing modules for binaries and integration tests.

/// Reconnecting client link.
pub mod client;
/// Application configuration.
pub mod config;
/// Durable key-value storage.
pub mod dao;
/// Wire types.
pub mod dto;
/// Service and HTTP errors.
pub mod error;
/// HTTP routes.
pub mod routes;
/// Connection handling, identity, health and docs.
pub mod services;
/// Shared state and session coordinators.
pub mod state;
