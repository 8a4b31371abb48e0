//! Real-time event hub between `owhub-api` channel connections and
//! consumers (CLI, dashboards, automation).
//!
//! - **[`Hub`]**: explicit context object. [`connect()`](Hub::connect)
//!   opens every configured channel and bridges its frames through the
//!   decoder into per-channel buffers and subscription registries.
//!   Cheaply cloneable; hand a clone to whatever needs it.
//!
//! - **Decoding** ([`decode()`]): raw frame → typed [`Event`], with a
//!   `Generic` arm for anything unrecognized.
//!
//! - **[`EventBuffer`]**: bounded per-channel sliding window, stamped
//!   from an injected [`Clock`].
//!
//! - **Subscriptions** ([`registry`]): persistent or one-shot, optionally
//!   scoped to a device serial, released by dropping the
//!   [`SubscriptionGuard`]. Keyed registrations and
//!   [`Hub::confirm_device_command`] deduplicate command confirmations;
//!   [`Hub::wait_for`] is the async form.
//!
//! - **Export** ([`export`]): time-windowed, multi-channel merge into
//!   JSON or CSV. [`CollectionSession`] drives start/stop bounded runs.

pub mod buffer;
pub mod clock;
pub mod config;
pub mod decode;
pub mod error;
pub mod export;
pub mod hub;
pub mod model;
pub mod registry;
pub mod session;
mod sync;

// ── Primary re-exports ──────────────────────────────────────────────
pub use buffer::{DEFAULT_BUFFER_CAPACITY, EventBuffer};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{HubConfig, websocket_endpoint};
pub use decode::decode;
pub use error::{CoreError, ExportError};
pub use export::{
    ChannelSnapshots, ExportFormat, ExportOutcome, ExportRequest, LogEntry, LogExport,
    export_file_name, export_logs,
};
pub use hub::{CommandConfirmation, Hub, Snapshot, Waiter};
pub use model::{BufferedEvent, Channel, Event, EventKind, SerialNumber};
pub use registry::{
    Callback, Interest, KeyedRegistration, Mode, SubscriptionGuard, SubscriptionId,
    SubscriptionKey,
};
pub use session::{CollectionSession, SessionReport, StopReason};

// Transport types consumers need alongside the hub.
pub use owhub_api::{ConnectionState, ReconnectConfig, StaticToken, TokenProvider};
