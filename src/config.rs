//! Server configuration loaded from the environment.
//!
//! Every value the coordinator needs at runtime comes from environment
//! variables (optionally seeded from a `.env` file by `main`):
//! - listening port
//! - allowed origin for the WebSocket handshake and CORS
//! - shared JWT secret (must match the credential issuer)
//! - heartbeat and idle timeout for connection liveness

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Port used when neither `SOCKET_PORT` nor `PORT` is set
const DEFAULT_PORT: u16 = 3001;

/// Origin of the web application in local development
const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";

const DEFAULT_HEARTBEAT_SECS: u64 = 30;

const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 90;

/// Errors raised while reading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("JWT_SECRET environment variable not set")]
    MissingSecret,

    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// Runtime configuration for the coordinator
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port the HTTP/WebSocket listener binds to
    pub port: u16,
    /// Origin accepted on the handshake (`*` accepts any)
    pub allowed_origin: String,
    /// HS256 secret shared with the credential issuer
    pub jwt_secret: String,
    /// Interval between transport-level ping frames
    pub heartbeat_interval: Duration,
    /// Close a connection after this long without inbound frames (`None` disables)
    pub idle_timeout: Option<Duration>,
}

impl ServerConfig {
    /// Create a config with defaults for everything except the secret
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            port: DEFAULT_PORT,
            allowed_origin: DEFAULT_ALLOWED_ORIGIN.to_string(),
            jwt_secret: jwt_secret.into(),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("JWT_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingSecret)?;

        let mut config = Self::new(jwt_secret);

        if let Some((name, raw)) = first_set(&lookup, &["SOCKET_PORT", "PORT"]) {
            config.port = parse_var(name, &raw)?;
        }

        if let Some((_, origin)) = first_set(&lookup, &["ALLOWED_ORIGIN", "NEXT_PUBLIC_APP_URL"]) {
            config.allowed_origin = origin.trim_end_matches('/').to_string();
        }

        if let Some(raw) = lookup("HEARTBEAT_INTERVAL_SECS") {
            let secs: u64 = parse_var("HEARTBEAT_INTERVAL_SECS", &raw)?;
            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    name: "HEARTBEAT_INTERVAL_SECS",
                    value: raw,
                });
            }
            config.heartbeat_interval = Duration::from_secs(secs);
        }

        if let Some(raw) = lookup("IDLE_TIMEOUT_SECS") {
            let secs: u64 = parse_var("IDLE_TIMEOUT_SECS", &raw)?;
            config.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        Ok(config)
    }

    /// Address to bind on all interfaces
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    /// Whether every origin is accepted
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origin == "*"
    }

    /// Check a handshake `Origin` header against the configured origin
    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.allows_any_origin() || origin.trim_end_matches('/') == self.allowed_origin
    }
}

fn first_set<F>(lookup: &F, names: &[&'static str]) -> Option<(&'static str, String)>
where
    F: Fn(&str) -> Option<String>,
{
    names
        .iter()
        .find_map(|name| lookup(name).filter(|v| !v.is_empty()).map(|v| (*name, v)))
}

fn parse_var<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: raw.to_string(),
    })
}
