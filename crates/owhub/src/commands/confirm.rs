//! `owhub confirm`: wait for a device to drop off and come back after a
//! reboot, upgrade or similar command.

use std::time::Duration;

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::sync::mpsc;

use owhub_core::{BufferedEvent, EventKind, SerialNumber};

use crate::cli::{ConfirmArgs, GlobalOpts, OutputFormat};
use crate::config::HubContext;
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Confirmation {
    serial_number: SerialNumber,
    purpose: String,
    disconnected_at: Option<DateTime<Utc>>,
    reconnected_at: DateTime<Utc>,
}

fn detail(c: &Confirmation) -> String {
    let offline = c
        .disconnected_at
        .map_or_else(|| "not observed".to_owned(), |t| t.to_rfc3339());
    format!(
        "✓ {} is back online after {}\n  went offline: {offline}\n  back online:  {}",
        c.serial_number,
        c.purpose,
        c.reconnected_at.to_rfc3339()
    )
}

fn spinner(quiet: bool, message: String) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

pub async fn handle(
    ctx: &HubContext,
    args: ConfirmArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let hub = &ctx.hub;
    let channel = util::channel(args.channel);
    util::selected_channels(hub, &[args.channel])?;
    let serial = SerialNumber::new(&args.serial);
    if serial.is_empty() {
        return Err(CliError::Validation {
            field: "serial".into(),
            reason: "must contain at least one character besides separators".into(),
        });
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<BufferedEvent>();
    let confirmation =
        hub.confirm_device_command(channel, serial.clone(), &args.purpose, move |event| {
            let _ = tx.send(event.clone());
        });
    tracing::debug!(created = confirmation.created(), "confirmation registered");

    hub.connect().await?;

    let bar = spinner(
        global.quiet || ctx.output != OutputFormat::Table,
        format!("waiting for {serial} to go offline and come back"),
    );

    let wait = async {
        let mut disconnected_at = None;
        while let Some(event) = rx.recv().await {
            match event.kind() {
                EventKind::DeviceDisconnection => {
                    bar.set_message(format!("{serial} went offline, waiting for it to return"));
                    disconnected_at = Some(event.timestamp);
                }
                EventKind::DeviceConnection => return Some((disconnected_at, event.timestamp)),
                _ => {}
            }
        }
        None
    };

    let gave_up_channels = [channel];
    let outcome = tokio::select! {
        res = tokio::time::timeout(args.timeout, wait) => res,
        err = util::all_gave_up(hub, &gave_up_channels, &ctx.profile) => {
            bar.finish_and_clear();
            drop(confirmation);
            hub.disconnect().await;
            return Err(err);
        }
    };
    bar.finish_and_clear();
    drop(confirmation);
    hub.disconnect().await;

    let Ok(Some((disconnected_at, reconnected_at))) = outcome else {
        return Err(CliError::Timeout {
            waiting_for: format!("{serial} to reconnect"),
            after: humantime::format_duration(args.timeout).to_string(),
        });
    };

    let result = Confirmation {
        serial_number: serial,
        purpose: args.purpose,
        disconnected_at,
        reconnected_at,
    };
    let out = output::render_single(ctx.output, &result, detail, |c| {
        c.reconnected_at.to_rfc3339()
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}
