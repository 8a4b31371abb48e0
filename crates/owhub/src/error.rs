//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use owhub_config::ConfigError;
use owhub_core::{CoreError, ExportError};

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to the {channel} service")]
    #[diagnostic(
        code(owhub::connection_failed),
        help(
            "Check that the service is reachable and the URL is right.\n\
             Reason: {reason}\n\
             Try: owhub status -v"
        )
    )]
    ConnectionFailed { channel: String, reason: String },

    #[error("The {channel} channel is not configured")]
    #[diagnostic(
        code(owhub::channel_not_configured),
        help("Add {channel}_url to the profile, or drop --channel {channel}.")
    )]
    ChannelNotConfigured { channel: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed")]
    #[diagnostic(
        code(owhub::auth_failed),
        help(
            "The service rejected the access token.\n\
             Run: owhub config set-token --profile {profile}"
        )
    )]
    AuthFailed { profile: String },

    #[error("No access token configured for profile '{profile}'")]
    #[diagnostic(
        code(owhub::no_token),
        help(
            "Store one with: owhub config set-token\n\
             Or set OWHUB_TOKEN / the profile's token_env variable."
        )
    )]
    NoToken { profile: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(owhub::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(owhub::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: owhub config init --name {name} --controller <URL>"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No profile configured")]
    #[diagnostic(
        code(owhub::no_config),
        help(
            "Create one with: owhub config init --controller <URL>\n\
             Or pass --controller-url and --token.\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(owhub::config))]
    Config { message: String },

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Timed out after {after} waiting for {waiting_for}")]
    #[diagnostic(
        code(owhub::timeout),
        help("Increase the limit with --timeout, or check the device with: owhub watch -s <SERIAL>")
    )]
    Timeout { waiting_for: String, after: String },

    // ── Export / IO ──────────────────────────────────────────────────
    #[error("Export failed: {0}")]
    #[diagnostic(code(owhub::export))]
    Export(#[from] ExportError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON output failed: {0}")]
    #[diagnostic(code(owhub::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoToken { .. } => exit_code::AUTH,
            Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::ChannelNotConfigured { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { reason } => CliError::ConnectionFailed {
                channel: "backend".into(),
                reason,
            },

            CoreError::AuthenticationFailed { message: _ } => CliError::AuthFailed {
                profile: "current".into(),
            },

            CoreError::ChannelNotConfigured { channel } => {
                CliError::ChannelNotConfigured { channel }
            }

            CoreError::UnknownChannel { name } => CliError::Validation {
                field: "channel".into(),
                reason: format!("unknown channel '{name}'"),
            },

            CoreError::Config { message } => CliError::Config { message },

            CoreError::Export(e) => CliError::Export(e),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::UnknownProfile { name } => CliError::ProfileNotFound {
                name,
                available: "(unknown)".into(),
            },
            ConfigError::NoToken { profile } => CliError::NoToken { profile },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_stable() {
        let auth = CliError::NoToken {
            profile: "lab".into(),
        };
        assert_eq!(auth.exit_code(), exit_code::AUTH);

        let timeout = CliError::Timeout {
            waiting_for: "reconnect".into(),
            after: "5m".into(),
        };
        assert_eq!(timeout.exit_code(), exit_code::TIMEOUT);

        let conn: CliError = CoreError::ConnectionFailed {
            reason: "refused".into(),
        }
        .into();
        assert_eq!(conn.exit_code(), exit_code::CONNECTION);
    }

    #[test]
    fn config_errors_keep_their_meaning() {
        let err: CliError = ConfigError::NoToken {
            profile: "lab".into(),
        }
        .into();
        assert!(matches!(err, CliError::NoToken { ref profile } if profile == "lab"));

        let err: CliError = ConfigError::Validation {
            field: "security_url".into(),
            reason: "bad".into(),
        }
        .into();
        assert_eq!(err.exit_code(), exit_code::USAGE);
    }
}
