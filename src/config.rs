//! Application-level configuration: storage backend, identity resolution and session tuning.

use std::{env, fs, io::ErrorKind, path::PathBuf, str::FromStr, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "ADVENTUREBOARD_CONFIG_PATH";
/// Environment variable that overrides the configured storage backend.
const STORE_BACKEND_ENV: &str = "STORE_BACKEND";
/// Header carrying the pre-validated identity descriptor.
const DEFAULT_IDENTITY_HEADER: &str = "x-session-identity";
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_SNAPSHOT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Durable store implementation selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local store, lost on restart.
    #[default]
    Memory,
    /// MongoDB collection, see `MONGO_URI`/`MONGO_DB`.
    Mongo,
    /// CouchDB database, see `COUCH_BASE_URL`/`COUCH_DB`.
    Couch,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "mongo" | "mongodb" => Ok(Self::Mongo),
            "couch" | "couchdb" => Ok(Self::Couch),
            other => Err(format!("unknown store backend `{other}`")),
        }
    }
}

/// How admissions obtain an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityConfig {
    /// Header holding a JSON identity descriptor set by the upstream auth layer.
    pub header: String,
    /// Base URL of the identity provider queried with `accessToken`, if any.
    pub provider_base_url: Option<String>,
    /// Fixed identity id used when nothing else identifies the caller.
    ///
    /// Testing aid only; leave unset in production so unidentified callers get 401.
    pub anonymous_identity: Option<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            header: DEFAULT_IDENTITY_HEADER.to_owned(),
            provider_base_url: None,
            anonymous_identity: None,
        }
    }
}

/// Tuning of session coordinators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long a coordinator with an empty roster waits before stopping.
    pub idle_timeout: Duration,
    /// Minimum spacing between two content snapshot writes.
    pub snapshot_flush_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            snapshot_flush_interval: DEFAULT_SNAPSHOT_FLUSH_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Durable store backend.
    pub store: StoreBackend,
    /// Identity resolution for admissions.
    pub identity: IdentityConfig,
    /// Coordinator timings.
    pub session: SessionConfig,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults, then apply
    /// environment overrides.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let mut config = match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json_str(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded configuration file");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        if let Ok(raw) = env::var(STORE_BACKEND_ENV) {
            match raw.parse::<StoreBackend>() {
                Ok(backend) => config.store = backend,
                Err(err) => warn!(error = %err, "ignoring {STORE_BACKEND_ENV}"),
            }
        }

        if config.identity.anonymous_identity.is_some() {
            warn!("anonymous identity mode is enabled; unidentified callers will be admitted");
        }

        config
    }

    /// Parse a JSON configuration document; missing sections take their defaults.
    pub fn from_json_str(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    store: StoreBackend,
    identity: RawIdentity,
    session: RawSession,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawIdentity {
    header: Option<String>,
    provider_base_url: Option<String>,
    anonymous_identity: Option<String>,
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawSession {
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    idle_timeout_ms: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    snapshot_flush_interval_ms: Option<Duration>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let identity = IdentityConfig {
            header: value
                .identity
                .header
                .filter(|header| !header.trim().is_empty())
                .map(|header| header.to_ascii_lowercase())
                .unwrap_or_else(|| DEFAULT_IDENTITY_HEADER.to_owned()),
            provider_base_url: value
                .identity
                .provider_base_url
                .map(|url| url.trim_end_matches('/').to_owned()),
            anonymous_identity: value
                .identity
                .anonymous_identity
                .filter(|id| !id.is_empty()),
        };
        let session = SessionConfig {
            idle_timeout: value
                .session
                .idle_timeout_ms
                .unwrap_or(DEFAULT_IDLE_TIMEOUT),
            snapshot_flush_interval: value
                .session
                .snapshot_flush_interval_ms
                .unwrap_or(DEFAULT_SNAPSHOT_FLUSH_INTERVAL),
        };
        Self {
            store: value.store,
            identity,
            session,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
