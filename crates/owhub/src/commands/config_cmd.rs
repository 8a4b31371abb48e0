//! Config subcommand handlers.

use secrecy::{ExposeSecret, SecretString};

use owhub_config::{Config, Profile};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

/// Format config for display, masking tokens.
fn format_config_redacted(cfg: &Config) -> String {
    use std::fmt::Write;
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let d = &cfg.defaults;
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "buffer_capacity = {}", d.buffer_capacity);
    let _ = writeln!(out, "max_retries = {}", d.max_retries);
    let _ = writeln!(out, "initial_delay_ms = {}", d.initial_delay_ms);
    let _ = writeln!(out, "max_delay_ms = {}", d.max_delay_ms);
    let _ = writeln!(out, "output = \"{}\"", d.output);
    if let Some(ref dir) = d.export_dir {
        let _ = writeln!(out, "export_dir = \"{}\"", dir.display());
    }

    for (name, p) in &cfg.profiles {
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let _ = writeln!(out, "controller_url = \"{}\"", p.controller_url);
        if let Some(ref url) = p.security_url {
            let _ = writeln!(out, "security_url = \"{url}\"");
        }
        if let Some(ref url) = p.firmware_url {
            let _ = writeln!(out, "firmware_url = \"{url}\"");
        }
        if p.token.is_some() {
            let _ = writeln!(out, "token = \"****\"");
        }
        if let Some(ref env) = p.token_env {
            let _ = writeln!(out, "token_env = \"{env}\"");
        }
        if let Some(cap) = p.buffer_capacity {
            let _ = writeln!(out, "buffer_capacity = {cap}");
        }
        if let Some(retries) = p.max_retries {
            let _ = writeln!(out, "max_retries = {retries}");
        }
    }

    out
}

fn redacted(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    for profile in cfg.profiles.values_mut() {
        if profile.token.is_some() {
            profile.token = Some("****".into());
        }
    }
    cfg
}

fn prompt_token() -> Result<SecretString, CliError> {
    let token = rpassword::prompt_password("Access token: ").map_err(|e| CliError::Validation {
        field: "token".into(),
        reason: format!("prompt failed: {e}"),
    })?;
    if token.trim().is_empty() {
        return Err(CliError::Validation {
            field: "token".into(),
            reason: "token cannot be empty".into(),
        });
    }
    Ok(SecretString::from(token.trim().to_owned()))
}

fn profile_not_found(name: String, cfg: &Config) -> CliError {
    CliError::ProfileNotFound {
        name,
        available: config::available_profiles(cfg),
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = config::config_file(global);

    match args.command {
        // ── Init ────────────────────────────────────────────────────
        ConfigCommand::Init {
            name,
            controller,
            security,
            firmware,
            token_env,
            plaintext,
        } => {
            let mut cfg = config::load(global)?;
            let mut profile = Profile {
                controller_url: controller,
                security_url: security,
                firmware_url: firmware,
                token_env,
                ..Profile::default()
            };

            // Reject bad URLs before anything is written.
            owhub_config::profile_to_hub_config(&profile, &cfg.defaults)?;

            if profile.token_env.is_none() {
                let token = prompt_token()?;
                if plaintext {
                    profile.token = Some(token.expose_secret().to_owned());
                } else {
                    owhub_config::store_token(&name, &token)?;
                    eprintln!("   ✓ Token stored in system keyring");
                }
            }

            cfg.profiles.insert(name.clone(), profile);
            cfg.default_profile = Some(name.clone());
            config::save_config_to(&cfg, &path)?;

            eprintln!("✓ Configuration written to {}", path.display());
            eprintln!("  Active profile: {name}");
            eprintln!("\n  Test it: owhub status");
            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let cfg = config::load(global)?;
            let format = config::output_format(global, &cfg);
            let out = output::render_single(format, &redacted(&cfg), format_config_redacted, |_| {
                path.display().to_string()
            })?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        // ── Profiles ────────────────────────────────────────────────
        ConfigCommand::Profiles => {
            let cfg = config::load(global)?;
            let default = cfg.default_profile.as_deref().unwrap_or("default");
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured. Run: owhub config init --controller <URL>");
            } else {
                for name in cfg.profiles.keys() {
                    let marker = if name == default { " *" } else { "" };
                    println!("{name}{marker}");
                }
            }
            Ok(())
        }

        // ── Use <name> ─────────────────────────────────────────────
        ConfigCommand::Use { name } => {
            let mut cfg = config::load(global)?;
            if !cfg.profiles.contains_key(&name) {
                return Err(profile_not_found(name, &cfg));
            }

            cfg.default_profile = Some(name.clone());
            config::save_config_to(&cfg, &path)?;
            eprintln!("✓ Default profile set to '{name}'");
            Ok(())
        }

        // ── SetToken ────────────────────────────────────────────────
        ConfigCommand::SetToken { profile } => {
            let cfg = config::load(global)?;
            let name = profile.unwrap_or_else(|| config::active_profile_name(global, &cfg));
            if !cfg.profiles.contains_key(&name) {
                return Err(profile_not_found(name, &cfg));
            }

            let token = prompt_token()?;
            owhub_config::store_token(&name, &token)?;
            eprintln!("✓ Token stored in system keyring for profile '{name}'");
            Ok(())
        }
    }
}
