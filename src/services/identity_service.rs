use axum::http::HeaderMap;
use tracing::{debug, warn};
use validator::Validate;

use crate::{config::IdentityConfig, dto::session::Identity, error::ServiceError};

/// Resolve the caller identity of an admission request.
///
/// Sources, first match wins: the identity header set by the upstream auth layer, the
/// identity provider queried with `access_token`, the configured anonymous identity.
pub async fn resolve_identity(
    config: &IdentityConfig,
    headers: &HeaderMap,
    access_token: Option<&str>,
) -> Result<Identity, ServiceError> {
    if let Some(raw) = headers.get(config.header.as_str()) {
        let raw = raw
            .to_str()
            .map_err(|_| ServiceError::Unauthorized("identity header is not valid UTF-8".into()))?;
        return parse_identity(raw);
    }

    if let (Some(base_url), Some(token)) = (
        config.provider_base_url.as_deref(),
        access_token.filter(|token| !token.is_empty()),
    ) {
        return fetch_identity(base_url, token).await;
    }

    if let Some(id) = &config.anonymous_identity {
        debug!(identity = %id, "admitting caller with the anonymous identity");
        return Ok(Identity::with_id(id.clone()));
    }

    Err(ServiceError::Unauthorized("no identity provided".into()))
}

/// Parse and validate a JSON identity descriptor; unknown fields are discarded.
pub fn parse_identity(raw: &str) -> Result<Identity, ServiceError> {
    let identity: Identity = serde_json::from_str(raw).map_err(|err| {
        warn!(error = %err, "malformed identity descriptor");
        ServiceError::Unauthorized("malformed identity".into())
    })?;
    identity.validate().map_err(|err| {
        warn!(error = %err, "invalid identity descriptor");
        ServiceError::Unauthorized("invalid identity".into())
    })?;
    Ok(identity)
}

#[cfg(feature = "remote-identity")]
async fn fetch_identity(base_url: &str, token: &str) -> Result<Identity, ServiceError> {
    let url = format!("{base_url}/users/@me");
    let response = reqwest::Client::new()
        .get(&url)
        .bearer_auth(token)
        .send()
        .await
        .map_err(|err| {
            warn!(error = %err, "identity provider unreachable");
            ServiceError::Unauthorized("identity provider unreachable".into())
        })?;

    if !response.status().is_success() {
        warn!(status = %response.status(), "identity provider rejected the token");
        return Err(ServiceError::Unauthorized("access token rejected".into()));
    }

    let body = response.text().await.map_err(|err| {
        warn!(error = %err, "failed to read identity provider response");
        ServiceError::Unauthorized("identity provider response unreadable".into())
    })?;
    parse_identity(&body)
}

#[cfg(not(feature = "remote-identity"))]
async fn fetch_identity(_base_url: &str, _token: &str) -> Result<Identity, ServiceError> {
    warn!("identity provider configured but remote-identity support is not compiled in");
    Err(ServiceError::Unauthorized("identity provider unavailable".into()))
}
