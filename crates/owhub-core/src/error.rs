// ── Core error types ──
//
// What hub consumers see. Transport errors are folded into
// connection/auth/config variants by the `From<owhub_api::Error>` impl.
// Decode failures never surface here: malformed frames are dropped or
// buffered as `Generic`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Channel '{channel}' has no configured endpoint")]
    ChannelNotConfigured { channel: String },

    // ── Input errors ─────────────────────────────────────────────────
    #[error("Unknown channel: {name} (expected controller, security or firmware)")]
    UnknownChannel { name: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Export errors ────────────────────────────────────────────────
    #[error(transparent)]
    Export(#[from] ExportError),
}

/// Serialization or write failure. An empty window is not an error.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to serialize export: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to write export: {0}")]
    Io(#[from] std::io::Error),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<owhub_api::Error> for CoreError {
    fn from(err: owhub_api::Error) -> Self {
        match err {
            owhub_api::Error::AuthRejected { reason } => {
                CoreError::AuthenticationFailed { message: reason }
            }
            owhub_api::Error::MissingToken => CoreError::AuthenticationFailed {
                message: "No access token available".into(),
            },
            owhub_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            owhub_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                reason: format!("WebSocket connection failed: {reason}"),
            },
            owhub_api::Error::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                reason: format!("WebSocket closed (code {code}): {reason}"),
            },
            owhub_api::Error::ReconnectExhausted { attempts } => CoreError::ConnectionFailed {
                reason: format!("gave up after {attempts} reconnect attempts"),
            },
        }
    }
}
