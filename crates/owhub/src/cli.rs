//! Clap derive structures for the `owhub` CLI.
//!
//! Compiled both into the binary and into `build.rs` (man pages), so it
//! may only depend on clap, clap_complete and humantime.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// owhub -- live device events from the command line
#[derive(Debug, Parser)]
#[command(
    name = "owhub",
    version,
    about = "Watch, confirm and export live WiFi device events",
    long_about = "Keeps streaming connections to the controller, security and firmware\n\
        services, decodes their events, confirms device commands by watching\n\
        for the device to drop and come back, and exports time-windowed logs.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Profile to use
    #[arg(long, short = 'p', env = "OWHUB_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "OWHUB_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Controller service URL (overrides profile)
    #[arg(long, env = "OWHUB_CONTROLLER_URL", global = true)]
    pub controller_url: Option<String>,

    /// Access token (overrides profile and keyring)
    #[arg(long, env = "OWHUB_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Output format (defaults to the config's `defaults.output`)
    #[arg(long, short = 'o', env = "OWHUB_OUTPUT", global = true)]
    pub output: Option<OutputFormat>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Shared Enums ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table / coloured lines (default, interactive)
    Table,
    /// JSON (one object per line when streaming)
    Json,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChannelArg {
    Controller,
    Security,
    Firmware,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Log,
    DeviceConnection,
    DeviceDisconnection,
    DeviceStatistics,
    DeviceConnectionsStatistics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Json,
    Csv,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stream live events
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Wait for a device to go offline and come back after a command
    Confirm(ConfirmArgs),

    /// Show per-channel connection state
    Status(StatusArgs),

    /// Collect events for a while and write a log file
    #[command(alias = "x")]
    Export(ExportArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  WATCH
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Channels to watch (repeatable; default: every configured channel)
    #[arg(long, short = 'c', value_enum)]
    pub channel: Vec<ChannelArg>,

    /// Event kinds to show (repeatable; default: all recognized kinds)
    #[arg(long, short = 'k', value_enum)]
    pub kind: Vec<KindArg>,

    /// Only events for this device serial number
    #[arg(long, short = 's')]
    pub serial: Option<String>,

    /// Exit after this many events
    #[arg(long, short = 'n')]
    pub count: Option<usize>,

    /// Exit after this long (e.g. "30s", "5m")
    #[arg(long, short = 'd', value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIRM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfirmArgs {
    /// Device serial number (separators and case are ignored)
    pub serial: String,

    /// What the command was (reboot, upgrade, blink, ...)
    #[arg(long, default_value = "command")]
    pub purpose: String,

    /// Channel carrying the device's connection events
    #[arg(long, short = 'c', value_enum, default_value = "controller")]
    pub channel: ChannelArg,

    /// Give up after this long
    #[arg(long, short = 't', default_value = "5m", value_parser = humantime::parse_duration)]
    pub timeout: Duration,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  STATUS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// How long to wait for every channel to settle
    #[arg(long, short = 'w', default_value = "5s", value_parser = humantime::parse_duration)]
    pub wait: Duration,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  EXPORT
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Channels to collect (repeatable; default: every configured channel)
    #[arg(long, short = 'c', value_enum)]
    pub channel: Vec<ChannelArg>,

    /// Stop automatically after this long (default: wait for Ctrl-C)
    #[arg(long, short = 'd', value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// File format
    #[arg(long, short = 'f', value_enum, default_value = "json")]
    pub format: FormatArg,

    /// Output directory (default: `defaults.export_dir`, else the current directory)
    #[arg(long)]
    pub out: Option<PathBuf>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create or update a profile and make it the default
    Init {
        /// Profile name
        #[arg(long, default_value = "default")]
        name: String,

        /// Controller service base URL
        #[arg(long)]
        controller: String,

        /// Security service base URL
        #[arg(long)]
        security: Option<String>,

        /// Firmware service base URL
        #[arg(long)]
        firmware: Option<String>,

        /// Read the token from this environment variable instead of storing it
        #[arg(long, conflicts_with = "plaintext")]
        token_env: Option<String>,

        /// Store the prompted token in the config file instead of the keyring
        #[arg(long)]
        plaintext: bool,
    },

    /// Display current configuration (tokens masked)
    Show,

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },

    /// Store an access token in the system keyring
    SetToken {
        /// Profile name
        #[arg(long)]
        profile: Option<String>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
