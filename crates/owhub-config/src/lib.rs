//! Configuration for the owhub CLI.
//!
//! TOML profiles, access-token resolution (env + keyring + plaintext),
//! and translation to `owhub_core::HubConfig`. The core crate never
//! reads files; everything disk- and env-related lives here.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use owhub_core::{Channel, HubConfig, ReconnectConfig, websocket_endpoint};

/// Keyring service name for stored tokens.
pub const KEYRING_SERVICE: &str = "owhub";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found")]
    UnknownProfile { name: String },

    #[error("no access token configured for profile '{profile}'")]
    NoToken { profile: String },

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl From<keyring::Error> for ConfigError {
    fn from(err: keyring::Error) -> Self {
        Self::Keyring(err.to_string())
    }
}

// ── TOML config structs ─────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when `--profile` is not given.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named backend profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Resolve `name` (or the default profile) to a profile.
    pub fn profile<'a>(
        &'a self,
        name: Option<&'a str>,
    ) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name.or(self.default_profile.as_deref()).unwrap_or("default");
        self.profiles
            .get_key_value(name)
            .map(|(k, p)| (k.as_str(), p))
            .ok_or_else(|| ConfigError::UnknownProfile { name: name.into() })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    /// Events kept per channel.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Consecutive reconnect failures before a channel gives up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// CLI output format: "table", "json" or "plain".
    #[serde(default = "default_output")]
    pub output: String,

    /// Where `export` writes files when `--out` is not given.
    pub export_dir: Option<PathBuf>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            output: default_output(),
            export_dir: None,
        }
    }
}

fn default_buffer_capacity() -> usize {
    owhub_core::DEFAULT_BUFFER_CAPACITY
}
fn default_max_retries() -> u32 {
    10
}
fn default_initial_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_output() -> String {
    "table".into()
}

/// One deployment of the three backend services.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Device gateway base URL (e.g., "https://gw.example.com:16002").
    pub controller_url: String,

    /// Security service base URL.
    pub security_url: Option<String>,

    /// Firmware service base URL.
    pub firmware_url: Option<String>,

    /// Access token (plaintext, prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable holding the access token.
    pub token_env: Option<String>,

    /// Override `defaults.buffer_capacity`.
    pub buffer_capacity: Option<usize>,

    /// Override `defaults.max_retries`.
    pub max_retries: Option<u32>,
}

impl Profile {
    /// Configured service URL per channel, controller first.
    pub fn service_urls(&self) -> Vec<(Channel, &str)> {
        let mut urls = vec![(Channel::Controller, self.controller_url.as_str())];
        if let Some(ref url) = self.security_url {
            urls.push((Channel::Security, url));
        }
        if let Some(ref url) = self.firmware_url {
            urls.push((Channel::Firmware, url));
        }
        urls
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "owhub", "owhub").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("owhub");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Defaults, then `path` (if it exists), then `OWHUB_*` env vars
/// (`__` separates nesting: `OWHUB_DEFAULTS__MAX_RETRIES=3`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("OWHUB_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Token resolution ────────────────────────────────────────────────

fn keyring_entry(profile_name: &str) -> Result<keyring::Entry, ConfigError> {
    Ok(keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/token"))?)
}

/// Resolve the access token: `token_env` → keyring → plaintext.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    // 1. Profile's token_env → env var lookup
    if let Some(ref env_name) = profile.token_env {
        if let Ok(val) = std::env::var(env_name) {
            if !val.is_empty() {
                return Ok(SecretString::from(val));
            }
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring_entry(profile_name) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref token) = profile.token {
        if !token.is_empty() {
            return Ok(SecretString::from(token.clone()));
        }
    }

    Err(ConfigError::NoToken {
        profile: profile_name.into(),
    })
}

/// Store `token` in the system keyring for `profile_name`.
pub fn store_token(profile_name: &str, token: &SecretString) -> Result<(), ConfigError> {
    keyring_entry(profile_name)?.set_password(token.expose_secret())?;
    Ok(())
}

// ── Translation to HubConfig ────────────────────────────────────────

/// Build a `HubConfig` from a profile plus global defaults.
pub fn profile_to_hub_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<HubConfig, ConfigError> {
    if profile.controller_url.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "controller_url".into(),
            reason: "must not be empty".into(),
        });
    }

    let mut endpoints = BTreeMap::new();
    for (channel, url) in profile.service_urls() {
        let endpoint = websocket_endpoint(url).map_err(|e| ConfigError::Validation {
            field: format!("{channel}_url"),
            reason: e.to_string(),
        })?;
        endpoints.insert(channel, endpoint);
    }

    let reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(defaults.initial_delay_ms),
        max_delay: Duration::from_millis(defaults.max_delay_ms),
        max_retries: Some(profile.max_retries.unwrap_or(defaults.max_retries)),
        ..ReconnectConfig::default()
    };

    Ok(HubConfig {
        endpoints,
        buffer_capacity: profile.buffer_capacity.unwrap_or(defaults.buffer_capacity),
        reconnect,
    })
}

// ── Tests ───────────────────────────────────────────────────────────
