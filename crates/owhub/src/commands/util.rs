//! Shared helpers for command handlers.

use owhub_core::{Channel, EventKind, ExportFormat, Hub};

use crate::cli::{ChannelArg, FormatArg, KindArg};
use crate::error::CliError;

pub fn channel(arg: ChannelArg) -> Channel {
    match arg {
        ChannelArg::Controller => Channel::Controller,
        ChannelArg::Security => Channel::Security,
        ChannelArg::Firmware => Channel::Firmware,
    }
}

pub fn kind(arg: KindArg) -> EventKind {
    match arg {
        KindArg::Log => EventKind::Log,
        KindArg::DeviceConnection => EventKind::DeviceConnection,
        KindArg::DeviceDisconnection => EventKind::DeviceDisconnection,
        KindArg::DeviceStatistics => EventKind::DeviceStatistics,
        KindArg::DeviceConnectionsStatistics => EventKind::DeviceConnectionsStatistics,
    }
}

pub fn format(arg: FormatArg) -> ExportFormat {
    match arg {
        FormatArg::Json => ExportFormat::Json,
        FormatArg::Csv => ExportFormat::Csv,
    }
}

/// The requested channels, or every configured one when none were named.
/// Naming an unconfigured channel is an error.
pub fn selected_channels(hub: &Hub, requested: &[ChannelArg]) -> Result<Vec<Channel>, CliError> {
    if requested.is_empty() {
        return Ok(hub.config().endpoints.keys().copied().collect());
    }

    let mut channels = Vec::with_capacity(requested.len());
    for &arg in requested {
        let channel = channel(arg);
        if hub.config().endpoint(channel).is_none() {
            return Err(CliError::ChannelNotConfigured {
                channel: channel.to_string(),
            });
        }
        if !channels.contains(&channel) {
            channels.push(channel);
        }
    }
    Ok(channels)
}

/// Resolves once every channel in `channels` has given up reconnecting,
/// with an error describing why. Never resolves while any is still trying.
pub async fn all_gave_up(hub: &Hub, channels: &[Channel], profile: &str) -> CliError {
    let mut last = None;
    for &channel in channels {
        let mut state = hub.connection_state(channel);
        let Ok(settled) = state
            .wait_for(|s| !s.is_open && s.last_error.is_some())
            .await
            .map(|s| s.last_error.clone().unwrap_or_default())
        else {
            return std::future::pending().await;
        };
        last = Some((channel, settled));
    }

    match last {
        Some((_, reason)) if is_auth_failure(&reason) => CliError::AuthFailed {
            profile: profile.into(),
        },
        Some((channel, reason)) => CliError::ConnectionFailed {
            channel: channel.to_string(),
            reason,
        },
        None => std::future::pending().await,
    }
}

/// Whether a channel's terminal error means the token was refused.
pub fn is_auth_failure(last_error: &str) -> bool {
    last_error.starts_with("Authentication rejected") || last_error == "No access token available"
}
