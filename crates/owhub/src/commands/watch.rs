//! `owhub watch`: stream matching events until Ctrl-C, a count, or a deadline.

use std::io::Write;

use tokio::sync::mpsc;

use owhub_core::{BufferedEvent, EventKind, Interest, LogEntry, Mode, SerialNumber};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::config::HubContext;
use crate::error::CliError;
use crate::output;

use super::util;

const RECOGNIZED: [EventKind; 5] = [
    EventKind::Log,
    EventKind::DeviceConnection,
    EventKind::DeviceDisconnection,
    EventKind::DeviceStatistics,
    EventKind::DeviceConnectionsStatistics,
];

pub async fn handle(ctx: &HubContext, args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let hub = &ctx.hub;
    let channels = util::selected_channels(hub, &args.channel)?;
    let kinds: Vec<EventKind> = if args.kind.is_empty() {
        RECOGNIZED.to_vec()
    } else {
        args.kind.iter().copied().map(util::kind).collect()
    };
    let serial = args.serial.as_deref().map(SerialNumber::new);

    // Subscribe before connecting so nothing sent right after the
    // handshake is missed.
    let (tx, mut rx) = mpsc::unbounded_channel::<BufferedEvent>();
    let mut guards = Vec::new();
    for &channel in &channels {
        for &kind in &kinds {
            let interest = match serial {
                Some(ref s) if kind.carries_serial() => Interest::device(kind, s.clone()),
                Some(_) => continue,
                None => Interest::kind(kind),
            };
            let tx = tx.clone();
            guards.push(hub.subscribe(
                channel,
                interest,
                move |event| {
                    let _ = tx.send(event.clone());
                },
                Mode::Persistent,
            ));
        }
    }
    drop(tx);

    if guards.is_empty() {
        return Err(CliError::Validation {
            field: "serial".into(),
            reason: "--serial only applies to device connection/disconnection/statistics events"
                .into(),
        });
    }
    tracing::debug!(subscriptions = guards.len(), "watch subscriptions registered");

    hub.connect().await?;

    let color = output::should_color();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let deadline = async {
        match args.duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let gave_up = util::all_gave_up(hub, &channels, &ctx.profile);
    tokio::pin!(gave_up);

    let mut seen = 0usize;
    let result = loop {
        tokio::select! {
            _ = &mut ctrl_c => break Ok(()),
            () = &mut deadline => break Ok(()),
            err = &mut gave_up => break Err(err),
            event = rx.recv() => {
                let Some(event) = event else { break Ok(()) };
                if !global.quiet {
                    let line = output::event_line(ctx.output, &LogEntry::from(&event), color)?;
                    let mut stdout = std::io::stdout().lock();
                    writeln!(stdout, "{line}")?;
                    stdout.flush()?;
                }
                seen += 1;
                if args.count.is_some_and(|n| seen >= n) {
                    break Ok(());
                }
            }
        }
    };

    drop(guards);
    hub.disconnect().await;
    tracing::info!(events = seen, "watch finished");
    result
}
