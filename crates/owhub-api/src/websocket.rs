//! Channel connection: one persistent WebSocket per backend channel.
//!
//! Connects to a service's `/api/v1/ws` endpoint, authenticates with a
//! `token:<bearer>` frame, and forwards every text frame through an
//! [`mpsc`] channel. Reconnects with exponential backoff + jitter on
//! drops; authentication rejection is terminal.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use owhub_api::{ChannelConnection, ReconnectConfig, StaticToken};
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//!
//! let endpoint = Url::parse("wss://gw.example.com:16002/api/v1/ws")?;
//! let mut conn = ChannelConnection::open(
//!     endpoint,
//!     "controller",
//!     Arc::new(StaticToken::new("access-token")),
//!     ReconnectConfig::default(),
//!     &CancellationToken::new(),
//! );
//! let mut frames = conn.take_frames().expect("first take");
//!
//! while let Some(text) = frames.recv().await {
//!     println!("{text}");
//! }
//!
//! conn.close();
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::{TokenProvider, auth_frame};
use crate::error::Error;

// ── Frame channel capacity ──────────────────────────────────────────

const FRAME_CHANNEL_CAPACITY: usize = 1024;

// ── ConnectionState ─────────────────────────────────────────────────

/// Observable state of one channel connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    /// `true` only while an authenticated session is established.
    pub is_open: bool,

    /// Terminal failure (auth rejection, reconnect exhaustion).
    /// Transient drops never set this.
    pub last_error: Option<String>,
}

impl ConnectionState {
    fn open() -> Self {
        Self {
            is_open: true,
            last_error: None,
        }
    }
}

// ── ReconnectConfig ─────────────────────────────────────────────────

/// Exponential backoff configuration for channel reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum consecutive failed attempts before giving up.
    /// `None` means retry forever. Default: 10.
    pub max_retries: Option<u32>,

    /// Extra attempts allowed after an authentication rejection
    /// (the provider may hand out a fresh token). Default: 1.
    pub auth_retries: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: Some(10),
            auth_retries: 1,
        }
    }
}

// ── ChannelConnection ───────────────────────────────────────────────

/// Handle to a running channel connection.
///
/// The background task lives until [`close`](Self::close) is called, the
/// handle is dropped, the parent cancellation token fires, or a terminal
/// error occurs.
pub struct ChannelConnection {
    label: String,
    state_rx: watch::Receiver<ConnectionState>,
    frames_rx: Option<mpsc::Receiver<String>>,
    cancel: CancellationToken,
}

impl ChannelConnection {
    /// Spawn the connection task. Must be called inside a Tokio runtime.
    ///
    /// Returns immediately; the first connection attempt happens in the
    /// background. `label` only tags log lines.
    pub fn open(
        endpoint: Url,
        label: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
        reconnect: ReconnectConfig,
        parent: &CancellationToken,
    ) -> Self {
        let label = label.into();
        let (frame_tx, frames_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());
        let cancel = parent.child_token();

        let task = WsTask {
            endpoint,
            label: label.clone(),
            tokens,
            frame_tx,
            state_tx,
            reconnect,
            cancel: cancel.clone(),
        };
        tokio::spawn(task.run());

        Self {
            label,
            state_rx,
            frames_rx: Some(frames_rx),
            cancel,
        }
    }

    /// The label this connection was opened with.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Take the inbound frame receiver. Only the first call returns `Some`.
    pub fn take_frames(&mut self) -> Option<mpsc::Receiver<String>> {
        self.frames_rx.take()
    }

    /// Watch the connection state.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Current `is_open` flag.
    pub fn is_open(&self) -> bool {
        self.state_rx.borrow().is_open
    }

    /// Stop the connection. No reconnect happens afterwards.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ChannelConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ────────────────────────────────────

/// How a single session ended without an error.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    Closed,
    ConsumerGone,
}

struct WsTask {
    endpoint: Url,
    label: String,
    tokens: Arc<dyn TokenProvider>,
    frame_tx: mpsc::Sender<String>,
    state_tx: watch::Sender<ConnectionState>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
}

impl WsTask {
    /// Main loop: connect → read → on drop, backoff → reconnect.
    async fn run(self) {
        let mut attempt: u32 = 0;
        let mut auth_failures: u32 = 0;
        let channel = self.label.as_str();

        loop {
            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                result = self.connect_and_read() => result,
            };

            // A session that reached open ends the run of consecutive failures,
            // unless the service rejected the token on it.
            let established = self.state_tx.borrow().is_open;
            self.state_tx.send_modify(|s| s.is_open = false);
            if established && !matches!(&result, Err(e) if e.is_auth_rejection()) {
                attempt = 0;
                auth_failures = 0;
            }

            match result {
                Ok(SessionEnd::Cancelled | SessionEnd::ConsumerGone) => break,
                Ok(SessionEnd::Closed) => {
                    tracing::info!(channel, "channel disconnected cleanly, reconnecting");
                    attempt = 0;
                }
                Err(e) if e.is_auth_rejection() => {
                    auth_failures += 1;
                    if auth_failures > self.reconnect.auth_retries {
                        tracing::error!(channel, error = %e, "authentication rejected, giving up");
                        self.fail(&e);
                        break;
                    }
                    tracing::warn!(channel, error = %e, auth_failures, "authentication rejected, retrying");
                }
                Err(e) => {
                    tracing::warn!(channel, error = %e, attempt, "channel error");

                    if let Some(max) = self.reconnect.max_retries {
                        if attempt >= max {
                            tracing::error!(
                                channel,
                                max_retries = max,
                                "reconnection limit reached, giving up"
                            );
                            self.fail(&Error::ReconnectExhausted { attempts: attempt });
                            break;
                        }
                    }
                    attempt += 1;
                }
            }

            let delay = calculate_backoff(attempt.saturating_sub(1), &self.reconnect);
            tracing::info!(
                channel,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                attempt,
                "waiting before reconnect"
            );

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.state_tx.send_modify(|s| s.is_open = false);
        tracing::debug!(channel, "channel loop exiting");
    }

    fn fail(&self, err: &Error) {
        self.state_tx.send_replace(ConnectionState {
            is_open: false,
            last_error: Some(err.to_string()),
        });
    }

    // ── Single connection lifecycle ─────────────────────────────────

    /// Establish one authenticated session and read until it drops.
    async fn connect_and_read(&self) -> Result<SessionEnd, Error> {
        let channel = self.label.as_str();
        let token = self.tokens.token().ok_or(Error::MissingToken)?;

        tracing::info!(channel, url = %self.endpoint, "connecting");

        let uri: tungstenite::http::Uri = self
            .endpoint
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

        let (ws_stream, _response) =
            tokio_tungstenite::connect_async(ClientRequestBuilder::new(uri))
                .await
                .map_err(classify_handshake_error)?;

        let (mut write, mut read) = ws_stream.split();

        write
            .send(tungstenite::Message::text(auth_frame(&token)))
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        self.state_tx.send_replace(ConnectionState::open());
        tracing::info!(channel, "channel connected");

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    let _ = write.send(tungstenite::Message::Close(None)).await;
                    return Ok(SessionEnd::Cancelled);
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(tungstenite::Message::Text(text))) => {
                            if self.frame_tx.send(text.as_str().to_owned()).await.is_err() {
                                tracing::debug!(channel, "frame consumer dropped");
                                return Ok(SessionEnd::ConsumerGone);
                            }
                        }
                        Some(Ok(tungstenite::Message::Close(frame))) => {
                            return close_outcome(channel, frame);
                        }
                        Some(Err(e)) => {
                            return Err(Error::WebSocketConnect(e.to_string()));
                        }
                        None => {
                            tracing::info!(channel, "stream ended");
                            return Ok(SessionEnd::Closed);
                        }
                        Some(Ok(_)) => {
                            // Binary, Ping, Pong, Frame -- tungstenite answers pings itself
                        }
                    }
                }
            }
        }
    }
}

/// Map a close frame to a session outcome. A policy-violation close is
/// how the services reject a bad token after the upgrade.
fn close_outcome(
    channel: &str,
    frame: Option<tungstenite::protocol::CloseFrame>,
) -> Result<SessionEnd, Error> {
    let Some(cf) = frame else {
        tracing::info!(channel, "close frame received (no payload)");
        return Ok(SessionEnd::Closed);
    };

    tracing::info!(channel, code = %cf.code, reason = %cf.reason, "close frame received");
    match cf.code {
        CloseCode::Policy => Err(Error::AuthRejected {
            reason: cf.reason.as_str().to_owned(),
        }),
        CloseCode::Normal | CloseCode::Away => Ok(SessionEnd::Closed),
        other => Err(Error::WebSocketClosed {
            code: u16::from(other),
            reason: cf.reason.as_str().to_owned(),
        }),
    }
}

fn classify_handshake_error(err: tungstenite::Error) -> Error {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            if status == 401 || status == 403 {
                Error::AuthRejected {
                    reason: format!("HTTP {status}"),
                }
            } else {
                Error::WebSocketConnect(format!("upgrade refused with HTTP {status}"))
            }
        }
        other => Error::WebSocketConnect(other.to_string()),
    }
}

// ── Backoff calculation ─────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25% to spread out reconnection storms from multiple clients.
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt.min(30)).unwrap_or(30);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ───────────────────────────────────────────────────────────
