//! Config loading for the CLI, plus translation of profile + flags into
//! a ready-to-connect `Hub`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::ValueEnum;
use secrecy::SecretString;

use owhub_config::{Config, Profile};
use owhub_core::{Hub, StaticToken};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;

pub use owhub_config::{config_path, load_config_from, save_config_to};

/// Everything a hub-backed command needs.
pub struct HubContext {
    pub hub: Hub,
    pub profile: String,
    pub output: OutputFormat,
    pub export_dir: Option<PathBuf>,
}

/// The config file in effect: `--config` or the platform default.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(config_path)
}

/// Load config; a missing default file yields defaults, a broken
/// explicitly named one is an error.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    match global.config {
        Some(ref path) => Ok(load_config_from(path)?),
        None => Ok(owhub_config::load_config_or_default()),
    }
}

pub fn active_profile_name(global: &GlobalOpts, cfg: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| cfg.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// `--output` wins, then `defaults.output`, then table.
pub fn output_format(global: &GlobalOpts, cfg: &Config) -> OutputFormat {
    global.output.unwrap_or_else(|| {
        OutputFormat::from_str(&cfg.defaults.output, true).unwrap_or(OutputFormat::Table)
    })
}

pub fn available_profiles(cfg: &Config) -> String {
    if cfg.profiles.is_empty() {
        "(none)".into()
    } else {
        cfg.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// Build a `Hub` from the config file, profile, and CLI overrides.
pub fn hub_context(global: &GlobalOpts) -> Result<HubContext, CliError> {
    let cfg = load(global)?;
    let profile_name = active_profile_name(global, &cfg);

    let (profile, token) = if let Some(stored) = cfg.profiles.get(&profile_name) {
        let mut profile = stored.clone();
        if let Some(ref url) = global.controller_url {
            profile.controller_url.clone_from(url);
        }
        let token = match global.token {
            Some(ref token) => SecretString::from(token.clone()),
            None => owhub_config::resolve_token(&profile, &profile_name)?,
        };
        (profile, token)
    } else {
        if global.profile.is_some() {
            return Err(CliError::ProfileNotFound {
                name: profile_name,
                available: available_profiles(&cfg),
            });
        }
        // No profile: build from flags / env vars alone.
        let controller_url = global.controller_url.clone().ok_or_else(|| CliError::NoConfig {
            path: config_file(global).display().to_string(),
        })?;
        let token = global
            .token
            .clone()
            .map(SecretString::from)
            .ok_or_else(|| CliError::NoToken {
                profile: profile_name.clone(),
            })?;
        let profile = Profile {
            controller_url,
            ..Profile::default()
        };
        (profile, token)
    };

    let hub_config = owhub_config::profile_to_hub_config(&profile, &cfg.defaults)?;
    tracing::debug!(
        profile = %profile_name,
        channels = hub_config.endpoints.len(),
        "hub configured"
    );

    Ok(HubContext {
        hub: Hub::new(hub_config, Arc::new(StaticToken::from(token))),
        output: output_format(global, &cfg),
        export_dir: cfg.defaults.export_dir.clone(),
        profile: profile_name,
    })
}
