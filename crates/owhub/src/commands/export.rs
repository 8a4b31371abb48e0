//! `owhub export`: run a collection session and write the log file.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use owhub_core::{CollectionSession, ExportOutcome, StopReason};

use crate::cli::{ExportArgs, GlobalOpts, OutputFormat};
use crate::config::HubContext;
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportSummary {
    path: Option<PathBuf>,
    rows: usize,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    stopped_by: &'static str,
}

fn detail(s: &ExportSummary) -> String {
    let window = format!("{} .. {}", s.start.to_rfc3339(), s.end.to_rfc3339());
    match s.path {
        Some(ref path) => format!(
            "✓ {} entries written to {}\n  window: {window} ({})",
            s.rows,
            path.display(),
            s.stopped_by
        ),
        None => format!("No log entries in {window} ({}); nothing written", s.stopped_by),
    }
}

pub async fn handle(ctx: &HubContext, args: ExportArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let hub = &ctx.hub;
    let channels = util::selected_channels(hub, &args.channel)?;
    let out_dir = args
        .out
        .or_else(|| ctx.export_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));

    // The window opens now; frames arriving once connected fall inside it.
    let session =
        CollectionSession::start(hub, channels, util::format(args.format), args.duration);
    hub.connect().await?;

    let bar = if global.quiet || ctx.output != OutputFormat::Table {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} collecting events [{elapsed}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(match args.duration {
            Some(d) => format!("for {}", humantime::format_duration(d)),
            None => "until Ctrl-C".into(),
        });
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    };

    let report = tokio::select! {
        report = session.finished() => report,
        _ = tokio::signal::ctrl_c() => {
            session.stop();
            session.finished().await
        }
    };
    bar.finish_and_clear();
    hub.disconnect().await;

    let stopped_by = match report.stopped_by {
        StopReason::Manual => "stopped manually",
        StopReason::AutoStop => "stopped automatically",
    };
    let mut summary = ExportSummary {
        path: None,
        rows: report.outcome.len(),
        start: report.request.start,
        end: report.request.end,
        stopped_by,
    };

    match report.outcome {
        ExportOutcome::Ready(export) => {
            std::fs::create_dir_all(&out_dir)?;
            let path = export.save(&out_dir, hub.now())?;
            tracing::info!(path = %path.display(), rows = export.len(), "export saved");
            summary.path = Some(path);
        }
        ExportOutcome::Empty => {
            tracing::info!("collection window held no entries");
        }
    }

    let out = output::render_single(ctx.output, &summary, detail, |s| {
        s.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}
