// ── Log collection session ──
//
// A start/stop bounded export run. The start boundary is fixed when the
// session begins. It ends either on `stop()` or when the auto-stop timer
// fires; whichever gets there first takes the final synchronized
// snapshot and exports, the other does nothing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::export::{ExportFormat, ExportOutcome, ExportRequest};
use crate::hub::Hub;
use crate::model::Channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Manual,
    AutoStop,
}

/// What a finished session produced.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub stopped_by: StopReason,
    /// The exact window that was exported.
    pub request: ExportRequest,
    pub outcome: ExportOutcome,
}

#[derive(Clone)]
pub struct CollectionSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    hub: Hub,
    channels: IndexSet<Channel>,
    format: ExportFormat,
    started_at: DateTime<Utc>,
    finished: AtomicBool,
    timer: CancellationToken,
    report: watch::Sender<Option<SessionReport>>,
}

impl std::fmt::Debug for CollectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionSession")
            .field("channels", &self.inner.channels)
            .field("format", &self.inner.format)
            .field("started_at", &self.inner.started_at)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

impl CollectionSession {
    /// Begin collecting. With `auto_stop`, a timer ends the session after
    /// that long unless `stop()` gets there first. Must be called inside
    /// a Tokio runtime when `auto_stop` is set.
    pub fn start(
        hub: &Hub,
        channels: impl IntoIterator<Item = Channel>,
        format: ExportFormat,
        auto_stop: Option<Duration>,
    ) -> Self {
        let (report, _) = watch::channel(None);
        let inner = Arc::new(SessionInner {
            hub: hub.clone(),
            channels: channels.into_iter().collect(),
            format,
            started_at: hub.now(),
            finished: AtomicBool::new(false),
            timer: CancellationToken::new(),
            report,
        });
        info!(
            started_at = %inner.started_at,
            channels = inner.channels.len(),
            ?auto_stop,
            "collection session started"
        );

        if let Some(after) = auto_stop {
            let timed = Arc::clone(&inner);
            tokio::spawn(async move {
                tokio::select! {
                    () = timed.timer.cancelled() => {}
                    () = tokio::time::sleep(after) => {
                        timed.finish(StopReason::AutoStop);
                    }
                }
            });
        }

        Self { inner }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::SeqCst)
    }

    /// End the session now. Returns `false` if it had already ended,
    /// in which case nothing is exported again.
    pub fn stop(&self) -> bool {
        self.inner.finish(StopReason::Manual)
    }

    /// The report, once either stop path has run.
    pub fn report(&self) -> Option<SessionReport> {
        self.inner.report.borrow().clone()
    }

    /// Wait for whichever stop path runs first.
    pub async fn finished(&self) -> SessionReport {
        let mut rx = self.inner.report.subscribe();
        loop {
            if let Some(report) = rx.borrow_and_update().clone() {
                return report;
            }
            // The sender is owned by `self`, so the channel stays open.
            let _ = rx.changed().await;
        }
    }
}

impl SessionInner {
    fn finish(&self, reason: StopReason) -> bool {
        if self.finished.swap(true, Ordering::SeqCst) {
            debug!(?reason, "collection session already finished");
            return false;
        }
        self.timer.cancel();

        let snapshot = self.hub.synchronized_snapshot(&self.channels);
        let request = ExportRequest {
            start: self.started_at,
            end: snapshot.window_end(),
            channels: self.channels.clone(),
            format: self.format,
            include_unrecognized: true,
        };
        let outcome = ExportOutcome::from_snapshots(&snapshot.buffers, &request);
        info!(?reason, rows = outcome.len(), "collection session finished");

        self.report.send_replace(Some(SessionReport {
            stopped_by: reason,
            request,
            outcome,
        }));
        true
    }
}
