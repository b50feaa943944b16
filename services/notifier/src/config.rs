//! Notifier configuration loading.
//!
//! TOML is the sole config source; the CLI may override the user id and the
//! control API bind address. Default config path:
//! `<config dir>/glinax/notifier.toml`.
//!
//! # Required fields
//! - `schema_version = 1`
//! - `server.base_url`
//!
//! # Token file format
//! Raw token string on a single line; trimmed on read.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::actor::StoreSettings;
use crate::connection::ChannelSettings;
use crate::engine::EngineSettings;
use crate::model::Identity;
use crate::reconcile::EvictionPolicy;

const DEFAULT_PUSH_PATH: &str = "/ws/v1/notifications";
const DEFAULT_BIND: &str = "127.0.0.1:9191";
const MAX_READ_EVICTION_MS: u64 = 24 * 60 * 60 * 1000;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub schema_version: u32,
    pub server: ServerConfig,
    /// Absent until a user is known; the push channel stays idle.
    pub identity: Option<IdentityConfig>,
    pub timing: TimingConfig,
    pub eviction_policy: EvictionPolicy,
    pub control_api: ControlApiConfig,
    pub alerts: AlertsConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub base_url: String,
    /// Fully resolved `ws://`/`wss://` URL of the push endpoint.
    pub push_url: String,
}

#[derive(Clone)]
pub struct IdentityConfig {
    pub user_id: String,
    /// Bearer token (read from the token file, not the file path).
    pub token: Option<String>,
}

impl std::fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("user_id", &self.user_id)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingConfig {
    pub read_eviction_ms: u64,
    pub sweep_interval_ms: u64,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            read_eviction_ms: 5000,
            sweep_interval_ms: 10_000,
            reconnect_attempts: 5,
            reconnect_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControlApiConfig {
    pub bind: String,
}

#[derive(Debug, Clone)]
pub struct AlertsConfig {
    pub enabled: bool,
}

impl NotifierConfig {
    pub fn identity(&self) -> Option<Identity> {
        self.identity
            .as_ref()
            .map(|i| Identity::new(i.user_id.clone(), i.token.clone()))
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            store: StoreSettings {
                read_eviction: Duration::from_millis(self.timing.read_eviction_ms),
                sweep_interval: Duration::from_millis(self.timing.sweep_interval_ms),
                eviction_policy: self.eviction_policy,
            },
            channel: ChannelSettings {
                push_url: self.server.push_url.clone(),
                reconnect_attempts: self.timing.reconnect_attempts,
                reconnect_delay: Duration::from_millis(self.timing.reconnect_delay_ms),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    server: Option<RawServerConfig>,
    identity: Option<RawIdentityConfig>,
    timing: Option<RawTimingConfig>,
    eviction: Option<RawEvictionConfig>,
    control_api: Option<RawControlApiConfig>,
    alerts: Option<RawAlertsConfig>,
}

#[derive(Debug, Deserialize)]
struct RawServerConfig {
    base_url: Option<String>,
    push_url: Option<String>,
    push_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawIdentityConfig {
    user_id: Option<String>,
    token_file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTimingConfig {
    read_eviction_ms: Option<u64>,
    sweep_interval_ms: Option<u64>,
    reconnect_attempts: Option<u32>,
    reconnect_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawEvictionConfig {
    policy: Option<EvictionPolicy>,
}

#[derive(Debug, Deserialize)]
struct RawControlApiConfig {
    bind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAlertsConfig {
    enabled: Option<bool>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// `<config dir>/glinax/notifier.toml`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("glinax").join("notifier.toml"))
}

pub fn load_config_from_path(path: &Path) -> Result<NotifierConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(format!("reading config file '{}': {}", path.display(), e))
    })?;
    load_config_from_str(&toml_str)
}

pub fn load_config() -> Result<NotifierConfig, ConfigError> {
    let path = default_config_path()
        .ok_or_else(|| ConfigError::Io("no platform config directory".to_owned()))?;
    load_config_from_path(&path)
}

pub fn load_config_from_str(toml_str: &str) -> Result<NotifierConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {}",
            schema_version
        )));
    }

    // Server
    let raw_server = raw
        .server
        .ok_or_else(|| ConfigError::MissingField("server".to_owned()))?;
    let base_url = raw_server
        .base_url
        .ok_or_else(|| ConfigError::MissingField("server.base_url".to_owned()))?;
    let push_url = match raw_server.push_url {
        Some(url) => url,
        None => derive_push_url(
            &base_url,
            raw_server.push_path.as_deref().unwrap_or(DEFAULT_PUSH_PATH),
        )?,
    };

    // Identity
    let identity = match raw.identity {
        Some(i) => match i.user_id {
            Some(user_id) if !user_id.trim().is_empty() => Some(IdentityConfig {
                user_id: user_id.trim().to_owned(),
                token: i.token_file.as_deref().map(read_token_file).transpose()?,
            }),
            Some(_) => {
                return Err(ConfigError::InvalidValue(
                    "identity.user_id must not be empty".to_owned(),
                ));
            }
            None => None,
        },
        None => None,
    };

    // Timing defaults
    let defaults = TimingConfig::default();
    let timing = match raw.timing {
        Some(t) => TimingConfig {
            read_eviction_ms: t.read_eviction_ms.unwrap_or(defaults.read_eviction_ms),
            sweep_interval_ms: t.sweep_interval_ms.unwrap_or(defaults.sweep_interval_ms),
            reconnect_attempts: t.reconnect_attempts.unwrap_or(defaults.reconnect_attempts),
            reconnect_delay_ms: t.reconnect_delay_ms.unwrap_or(defaults.reconnect_delay_ms),
        },
        None => defaults,
    };
    if timing.sweep_interval_ms == 0 {
        return Err(ConfigError::InvalidValue(
            "timing.sweep_interval_ms must be greater than 0".to_owned(),
        ));
    }
    if timing.read_eviction_ms == 0 || timing.read_eviction_ms > MAX_READ_EVICTION_MS {
        return Err(ConfigError::InvalidValue(format!(
            "timing.read_eviction_ms must be between 1 and {}",
            MAX_READ_EVICTION_MS
        )));
    }

    let eviction_policy = raw.eviction.and_then(|e| e.policy).unwrap_or_default();

    let control_api = ControlApiConfig {
        bind: raw
            .control_api
            .and_then(|c| c.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_owned()),
    };

    let alerts = AlertsConfig {
        enabled: raw.alerts.and_then(|a| a.enabled).unwrap_or(true),
    };

    Ok(NotifierConfig {
        schema_version,
        server: ServerConfig { base_url, push_url },
        identity,
        timing,
        eviction_policy,
        control_api,
        alerts,
    })
}

/// `http(s)://host/...` -> `ws(s)://host{push_path}`.
fn derive_push_url(base_url: &str, push_path: &str) -> Result<String, ConfigError> {
    let mut url = Url::parse(base_url)
        .map_err(|e| ConfigError::InvalidValue(format!("server.base_url '{}': {}", base_url, e)))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ConfigError::InvalidValue(format!(
                "server.base_url has unsupported scheme '{}'",
                other
            )));
        }
    };
    url.set_scheme(scheme).map_err(|_| {
        ConfigError::InvalidValue(format!("cannot derive push URL from '{}'", base_url))
    })?;
    url.set_path(push_path);
    url.set_query(None);
    Ok(url.to_string())
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}

// ---------------------------------------------------------------------------
// Token file reader
// ---------------------------------------------------------------------------

fn read_token_file(path: &str) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading token file '{}': {}", path, e)))?;
    Ok(content.trim().to_owned())
}
