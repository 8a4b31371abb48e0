//! `owhub status`: connect every configured channel and report its state.

use serde::Serialize;
use tabled::Tabled;

use owhub_core::Channel;

use crate::cli::{GlobalOpts, StatusArgs};
use crate::config::HubContext;
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChannelStatus {
    channel: Channel,
    endpoint: String,
    is_open: bool,
    last_error: Option<String>,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Channel")]
    channel: String,
    #[tabled(rename = "Endpoint")]
    endpoint: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Last Error")]
    last_error: String,
}

impl From<&ChannelStatus> for StatusRow {
    fn from(s: &ChannelStatus) -> Self {
        Self {
            channel: s.channel.to_string(),
            endpoint: s.endpoint.clone(),
            state: if s.is_open { "open" } else { "closed" }.into(),
            last_error: s.last_error.clone().unwrap_or_default(),
        }
    }
}

pub async fn handle(ctx: &HubContext, args: StatusArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let hub = &ctx.hub;
    let channels = util::selected_channels(hub, &[])?;
    hub.connect().await?;

    // Every channel either opens or records a terminal error, unless
    // it is still retrying when the wait runs out.
    let settle = async {
        for &channel in &channels {
            let mut state = hub.connection_state(channel);
            let _ = state.wait_for(|s| s.is_open || s.last_error.is_some()).await;
        }
    };
    if tokio::time::timeout(args.wait, settle).await.is_err() {
        tracing::debug!("some channels still connecting after {:?}", args.wait);
    }

    let statuses: Vec<ChannelStatus> = channels
        .iter()
        .map(|&channel| {
            let state = hub.connection_state(channel).borrow().clone();
            ChannelStatus {
                channel,
                endpoint: hub
                    .config()
                    .endpoint(channel)
                    .map(ToString::to_string)
                    .unwrap_or_default(),
                is_open: state.is_open,
                last_error: state.last_error,
            }
        })
        .collect();
    hub.disconnect().await;

    let out = output::render_list(ctx.output, &statuses, |s| StatusRow::from(s), |s| {
        format!("{} {}", s.channel, if s.is_open { "open" } else { "closed" })
    })?;
    output::print_output(&out, global.quiet);

    if statuses.iter().any(|s| s.is_open) {
        return Ok(());
    }
    match statuses.into_iter().find_map(|s| s.last_error.map(|e| (s.channel, e))) {
        Some((_, reason)) if util::is_auth_failure(&reason) => Err(CliError::AuthFailed {
            profile: ctx.profile.clone(),
        }),
        Some((channel, reason)) => Err(CliError::ConnectionFailed {
            channel: channel.to_string(),
            reason,
        }),
        None => Err(CliError::ConnectionFailed {
            channel: "every".into(),
            reason: format!(
                "no channel opened within {}",
                humantime::format_duration(args.wait)
            ),
        }),
    }
}
