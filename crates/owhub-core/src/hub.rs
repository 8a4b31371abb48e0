// ── Hub ──
//
// The explicit context object. Owns one slot per channel (buffer,
// registry, connection state, live tail) and, while connected, one
// `ChannelConnection` plus one bridge task per configured channel.
// Consumers receive a `Hub` clone; nothing here is global.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexSet;
use owhub_api::{ChannelConnection, ConnectionState, TokenProvider};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::buffer::EventBuffer;
use crate::clock::{Clock, SystemClock};
use crate::config::HubConfig;
use crate::decode::decode;
use crate::error::CoreError;
use crate::export::{ChannelSnapshots, ExportOutcome, ExportRequest};
use crate::model::{BufferedEvent, Channel, Event, EventKind, SerialNumber};
use crate::registry::{
    Callback, Interest, KeyedRegistration, Mode, Registry, SubscriptionGuard, SubscriptionId,
    SubscriptionKey,
};
use crate::sync::lock;

const LIVE_CHANNEL_SIZE: usize = 1024;

// ── Channel slot ─────────────────────────────────────────────────

struct ChannelSlot {
    channel: Channel,
    buffer: Mutex<EventBuffer>,
    registry: Arc<Registry>,
    /// Serializes append + dispatch so callbacks see append order.
    turn: Mutex<()>,
    state: watch::Sender<ConnectionState>,
    live: broadcast::Sender<BufferedEvent>,
}

impl ChannelSlot {
    fn new(channel: Channel, capacity: usize) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        let (live, _) = broadcast::channel(LIVE_CHANNEL_SIZE);
        Self {
            channel,
            buffer: Mutex::new(EventBuffer::new(channel, capacity)),
            registry: Registry::new(channel),
            turn: Mutex::new(()),
            state,
            live,
        }
    }

    /// Append, then notify subscribers, in one turn.
    fn publish(&self, event: Event, clock: &dyn Clock) -> BufferedEvent {
        let _turn = lock(&self.turn);
        let entry = lock(&self.buffer).append(Arc::new(event), clock.now());

        trace!(channel = %self.channel, seq = entry.seq, kind = %entry.kind(), "dispatching");
        if entry.kind() != EventKind::Generic {
            self.registry.dispatch(&entry);
        }
        // No live receivers is fine.
        let _ = self.live.send(entry.clone());
        entry
    }

    fn ingest(&self, raw: &str, clock: &dyn Clock) -> Option<BufferedEvent> {
        let event = decode(raw)?;
        Some(self.publish(event, clock))
    }
}

// ── Hub ──────────────────────────────────────────────────────────

/// Cheaply cloneable handle to the event hub.
///
/// ```rust,ignore
/// let hub = Hub::new(config, Arc::new(StaticToken::new(token)));
/// hub.connect().await?;
///
/// let _guard = hub.subscribe(
///     Channel::Controller,
///     Interest::kind(EventKind::Log),
///     |e| println!("{:?}", e.event),
///     Mode::Persistent,
/// );
/// ```
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    config: HubConfig,
    tokens: Arc<dyn TokenProvider>,
    clock: Arc<dyn Clock>,
    slots: [Arc<ChannelSlot>; 3],
    cancel: CancellationToken,
    session: tokio::sync::Mutex<Option<LiveSession>>,
}

/// Everything `connect` started; torn down by `disconnect`.
struct LiveSession {
    cancel: CancellationToken,
    connections: Vec<ChannelConnection>,
    bridges: Vec<JoinHandle<()>>,
}

impl Drop for HubInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Hub {
    /// Build a hub stamped by the wall clock. Does NOT connect.
    pub fn new(config: HubConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        Self::with_clock(config, tokens, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: HubConfig,
        tokens: Arc<dyn TokenProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let capacity = config.buffer_capacity;
        let slots = Channel::ALL.map(|channel| Arc::new(ChannelSlot::new(channel, capacity)));
        Self {
            inner: Arc::new(HubInner {
                config,
                tokens,
                clock,
                slots,
                cancel: CancellationToken::new(),
                session: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Current time from the hub's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    fn slot(&self, channel: Channel) -> &ChannelSlot {
        &self.inner.slots[channel.index()]
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Open every configured channel and start bridging its frames into
    /// the hub. Calling it again replaces the running connections;
    /// subscriptions and buffers are untouched.
    pub async fn connect(&self) -> Result<(), CoreError> {
        if self.inner.config.endpoints.is_empty() {
            return Err(CoreError::Config {
                message: "no channel endpoints configured".into(),
            });
        }

        let mut session = self.inner.session.lock().await;
        if let Some(previous) = session.take() {
            shutdown(previous, &self.inner.slots).await;
        }

        let cancel = self.inner.cancel.child_token();
        let mut connections = Vec::new();
        let mut bridges = Vec::new();

        for (&channel, endpoint) in &self.inner.config.endpoints {
            let mut conn = ChannelConnection::open(
                endpoint.clone(),
                channel.to_string(),
                Arc::clone(&self.inner.tokens),
                self.inner.config.reconnect.clone(),
                &cancel,
            );
            let Some(frames) = conn.take_frames() else {
                continue;
            };

            let slot = Arc::clone(&self.inner.slots[channel.index()]);
            let bridge = tokio::spawn(bridge_task(
                Arc::clone(&slot),
                Arc::clone(&self.inner.clock),
                frames,
                conn.state(),
                cancel.clone(),
            ));
            bridges.push(tokio::spawn(supervise_bridge(slot, bridge)));
            connections.push(conn);
            info!(%channel, url = %endpoint, "channel opened");
        }

        *session = Some(LiveSession {
            cancel,
            connections,
            bridges,
        });
        Ok(())
    }

    /// Close every channel. No reconnects happen afterwards.
    pub async fn disconnect(&self) {
        if let Some(session) = self.inner.session.lock().await.take() {
            shutdown(session, &self.inner.slots).await;
            info!("hub disconnected");
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.session.lock().await.is_some()
    }

    /// Watch one channel's connection state. Valid across reconnects.
    pub fn connection_state(&self, channel: Channel) -> watch::Receiver<ConnectionState> {
        self.slot(channel).state.subscribe()
    }

    // ── Event intake ─────────────────────────────────────────────

    /// Decode one raw frame and dispatch it. `None` if the frame was
    /// rejected by the decoder.
    ///
    /// Must not be called from a subscription callback for the same
    /// channel: the channel's dispatch turn is held while callbacks run.
    pub fn ingest(&self, channel: Channel, raw: &str) -> Option<BufferedEvent> {
        self.slot(channel).ingest(raw, self.inner.clock.as_ref())
    }

    /// Dispatch an already-typed event.
    pub fn publish(&self, channel: Channel, event: Event) -> BufferedEvent {
        self.slot(channel).publish(event, self.inner.clock.as_ref())
    }

    /// Live tail of every buffered event on `channel`, `Generic` included.
    pub fn events(&self, channel: Channel) -> broadcast::Receiver<BufferedEvent> {
        self.slot(channel).live.subscribe()
    }

    // ── Subscriptions ────────────────────────────────────────────

    pub fn subscribe<F>(
        &self,
        channel: Channel,
        interest: Interest,
        callback: F,
        mode: Mode,
    ) -> SubscriptionGuard
    where
        F: Fn(&BufferedEvent) + Send + Sync + 'static,
    {
        self.slot(channel)
            .registry
            .subscribe(interest, Arc::new(callback), mode)
    }

    pub fn subscribe_keyed<F>(
        &self,
        channel: Channel,
        key: SubscriptionKey,
        callback: F,
        mode: Mode,
    ) -> KeyedRegistration
    where
        F: Fn(&BufferedEvent) + Send + Sync + 'static,
    {
        self.slot(channel)
            .registry
            .subscribe_keyed(key, Arc::new(callback), mode)
    }

    /// Idempotent.
    pub fn unsubscribe(&self, channel: Channel, id: SubscriptionId) -> bool {
        self.slot(channel).registry.unsubscribe(id)
    }

    /// Live subscriptions on `channel`.
    pub fn subscription_count(&self, channel: Channel) -> usize {
        self.slot(channel).registry.len()
    }

    /// Resolve with the first matching event after this call. Dropping
    /// the waiter removes its registration; wrap it in
    /// `tokio::time::timeout` to bound the wait.
    pub fn wait_for(&self, channel: Channel, interest: Interest) -> Waiter {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let guard = self.subscribe(
            channel,
            interest,
            move |event: &BufferedEvent| {
                if let Some(tx) = lock(&tx).take() {
                    let _ = tx.send(event.clone());
                }
            },
            Mode::OneShot,
        );
        Waiter { rx, guard }
    }

    /// Watch for the asynchronous effect of a device command (reboot,
    /// upgrade, blink): one keyed one-shot for the device going away and
    /// one for it coming back. Re-registering the same purpose for the
    /// same device while the first pair is pending is a no-op, so
    /// `callback` fires at most once per effect.
    pub fn confirm_device_command<F>(
        &self,
        channel: Channel,
        serial_number: impl Into<SerialNumber>,
        purpose: &str,
        callback: F,
    ) -> CommandConfirmation
    where
        F: Fn(&BufferedEvent) + Send + Sync + 'static,
    {
        let serial_number = serial_number.into();
        let callback: Callback = Arc::new(callback);
        let registry = &self.slot(channel).registry;

        let disconnected = registry.subscribe_keyed(
            SubscriptionKey::new(
                EventKind::DeviceDisconnection,
                Some(serial_number.clone()),
                purpose,
            ),
            Arc::clone(&callback),
            Mode::OneShot,
        );
        let connected = registry.subscribe_keyed(
            SubscriptionKey::new(EventKind::DeviceConnection, Some(serial_number.clone()), purpose),
            callback,
            Mode::OneShot,
        );
        debug!(
            %channel,
            serial = %serial_number,
            purpose,
            created = disconnected.created() || connected.created(),
            "command confirmation registered"
        );

        CommandConfirmation {
            disconnected,
            connected,
        }
    }

    // ── Buffer reads ─────────────────────────────────────────────

    /// Matching events, copied out at call time.
    pub fn query<P>(&self, channel: Channel, predicate: P) -> std::vec::IntoIter<BufferedEvent>
    where
        P: FnMut(&BufferedEvent) -> bool,
    {
        lock(&self.slot(channel).buffer).query(predicate)
    }

    pub fn buffered_len(&self, channel: Channel) -> usize {
        lock(&self.slot(channel).buffer).len()
    }

    /// Copy the buffers of `channels` while holding all of their locks
    /// (taken in channel index order), so no append lands in one buffer
    /// but not another. The result keeps the order of `channels`.
    pub fn synchronized_snapshot(&self, channels: &IndexSet<Channel>) -> Snapshot {
        let mut ordered: Vec<Channel> = channels.iter().copied().collect();
        ordered.sort_by_key(|c| c.index());

        let guards: Vec<_> = ordered
            .iter()
            .map(|&c| (c, lock(&self.slot(c).buffer)))
            .collect();
        let taken_at = self.inner.clock.now();

        let mut buffers = ChannelSnapshots::with_capacity(channels.len());
        for &channel in channels {
            if let Some((_, guard)) = guards.iter().find(|(c, _)| *c == channel) {
                buffers.insert(channel, guard.snapshot());
            }
        }
        drop(guards);

        Snapshot { taken_at, buffers }
    }

    /// Export `request` from a fresh synchronized snapshot.
    pub fn export_logs(&self, request: &ExportRequest) -> ExportOutcome {
        let snapshot = self.synchronized_snapshot(&request.channels);
        ExportOutcome::from_snapshots(&snapshot.buffers, request)
    }
}

// ── Snapshot ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Clock reading while every buffer lock was held.
    pub taken_at: DateTime<Utc>,
    pub buffers: ChannelSnapshots,
}

impl Snapshot {
    /// Smallest exclusive bound that still covers every captured entry.
    pub fn window_end(&self) -> DateTime<Utc> {
        let latest = self
            .buffers
            .values()
            .filter_map(|events| events.last())
            .map(|e| e.timestamp)
            .max()
            .map_or(self.taken_at, |ts| ts.max(self.taken_at));
        latest + TimeDelta::nanoseconds(1)
    }
}

// ── Waiter ───────────────────────────────────────────────────────

/// Future returned by [`Hub::wait_for`]. Resolves to `None` only if the
/// hub goes away first.
#[must_use = "a waiter does nothing unless awaited"]
pub struct Waiter {
    rx: oneshot::Receiver<BufferedEvent>,
    guard: SubscriptionGuard,
}

impl Waiter {
    pub fn id(&self) -> SubscriptionId {
        self.guard.id()
    }
}

impl Future for Waiter {
    type Output = Option<BufferedEvent>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(Result::ok)
    }
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter").field("id", &self.guard.id()).finish()
    }
}

// ── Command confirmation ─────────────────────────────────────────

/// The keyed pair registered by [`Hub::confirm_device_command`].
#[derive(Debug)]
#[must_use = "dropping the confirmation cancels the waiters it created"]
pub struct CommandConfirmation {
    pub disconnected: KeyedRegistration,
    pub connected: KeyedRegistration,
}

impl CommandConfirmation {
    /// `false` when both keys were already pending from an earlier call.
    pub fn created(&self) -> bool {
        self.disconnected.created() || self.connected.created()
    }

    /// Keep the waiters registered until they fire.
    pub fn detach(self) -> (SubscriptionId, SubscriptionId) {
        (self.disconnected.detach(), self.connected.detach())
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Frames → decode → dispatch for one channel, mirroring the
/// connection's state into the hub's watch as it changes.
async fn bridge_task(
    slot: Arc<ChannelSlot>,
    clock: Arc<dyn Clock>,
    mut frames: mpsc::Receiver<String>,
    mut state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
) {
    let channel = slot.channel;
    let mut state_live = true;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = state.changed(), if state_live => {
                if changed.is_ok() {
                    let current = state.borrow_and_update().clone();
                    slot.state.send_replace(current);
                } else {
                    state_live = false;
                }
            }
            frame = frames.recv() => match frame {
                Some(raw) => {
                    if slot.ingest(&raw, clock.as_ref()).is_none() {
                        trace!(%channel, "frame rejected");
                    }
                }
                None => break,
            },
        }
    }

    let last = state.borrow().clone();
    slot.state.send_replace(ConnectionState {
        is_open: false,
        ..last
    });
    debug!(%channel, "bridge task exiting");
}

/// A bridge that panicked (a subscriber callback panicked) stops feeding
/// its channel, so the slot is marked closed with an error.
async fn supervise_bridge(slot: Arc<ChannelSlot>, bridge: JoinHandle<()>) {
    let Err(err) = bridge.await else {
        return;
    };
    if !err.is_panic() {
        return;
    }
    let channel = slot.channel;
    error!(%channel, "bridge task panicked, channel stopped");
    slot.state.send_replace(ConnectionState {
        is_open: false,
        last_error: Some(format!("Event dispatch on {channel} stopped: a subscriber panicked")),
    });
}

async fn shutdown(session: LiveSession, slots: &[Arc<ChannelSlot>; 3]) {
    session.cancel.cancel();
    for conn in &session.connections {
        conn.close();
    }
    for handle in session.bridges {
        let _ = handle.await;
    }
    for slot in slots {
        slot.state.send_modify(|s| s.is_open = false);
    }
}
