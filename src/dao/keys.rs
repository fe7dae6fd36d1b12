//! Key layout of the shared key-value store.
//!
//! Campaign data is keyed by the host identity so a host finds the same campaign
//! from every board instance. Session-local records are scoped by session key.

/// Campaign ids owned by `host`, stored as a JSON array.
pub fn campaigns(host: &str) -> String {
    format!("{host}-campaigns")
}

/// Campaign currently selected by `host`.
pub fn selected_campaign(host: &str) -> String {
    format!("{host}-selectedCampaignId")
}

/// Content snapshot of a campaign.
pub fn snapshot(host: &str, campaign_id: &str) -> String {
    format!("{host}-{campaign_id}-snapshot")
}

/// Game-state of a campaign.
pub fn game_state(host: &str, campaign_id: &str) -> String {
    format!("{host}-{campaign_id}-gameState")
}

/// Session-local record names.
pub mod local {
    /// Persisted roster.
    pub const CONNECTIONS: &str = "connections";
    /// Persisted host identity id.
    pub const HOST: &str = "host";
}

/// Prefix isolating the session-local records of `session_key`.
pub fn session_scope(session_key: &str) -> String {
    format!("session::{session_key}::")
}
