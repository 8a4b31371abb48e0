use thiserror::Error;

/// Top-level error type for the `owhub-api` crate.
///
/// Covers every failure mode of a streaming channel: bad endpoints,
/// authentication rejection, socket failures and reconnect exhaustion.
/// `owhub-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The server refused the bearer token (HTTP 401/403 on upgrade,
    /// or a policy-violation close right after the token frame).
    #[error("Authentication rejected: {reason}")]
    AuthRejected { reason: String },

    /// The token provider had nothing to present.
    #[error("No access token available")]
    MissingToken,

    // ── Transport ───────────────────────────────────────────────────
    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed unexpectedly.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// Too many consecutive reconnect failures.
    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

impl Error {
    /// Returns `true` if this error means the credentials were refused
    /// and retrying with the same token is pointless.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::AuthRejected { .. } | Self::MissingToken)
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::WebSocketConnect(_) | Self::WebSocketClosed { .. }
        )
    }
}
