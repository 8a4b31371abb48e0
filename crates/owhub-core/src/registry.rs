//! Subscription registry for one channel.
//!
//! Maps event interest (kind, optionally narrowed to one device serial)
//! to callbacks. Registration hands back a [`SubscriptionGuard`]: the
//! subscription lives exactly as long as the guard unless the guard is
//! explicitly [detached](SubscriptionGuard::detach).
//!
//! Dispatch selects matching entries under the registry lock, removes
//! one-shot entries in that same critical section, then invokes
//! callbacks with the lock released. Callbacks may therefore subscribe
//! or unsubscribe freely. A subscription removed before its turn in the
//! current dispatch is skipped.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

use crate::model::{BufferedEvent, Channel, Event, EventKind, SerialNumber};
use crate::sync::lock;

// ── Identifiers and filters ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Fires on every match until removed.
    Persistent,
    /// Fires on the first match, then removes itself.
    OneShot,
}

/// What a subscription listens for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Interest {
    pub kind: EventKind,
    pub serial_number: Option<SerialNumber>,
}

impl Interest {
    /// Every event of `kind`.
    pub fn kind(kind: EventKind) -> Self {
        Self {
            kind,
            serial_number: None,
        }
    }

    /// Events of `kind` reported for one device.
    pub fn device(kind: EventKind, serial_number: impl Into<SerialNumber>) -> Self {
        Self {
            kind,
            serial_number: Some(serial_number.into()),
        }
    }

    /// Kind must match; a serial filter must equal the event's serial.
    /// Serial-less events only match serial-less interests, and
    /// `Generic` never matches.
    pub fn matches(&self, event: &Event) -> bool {
        let kind = event.kind();
        if kind == EventKind::Generic || kind != self.kind {
            return false;
        }
        match &self.serial_number {
            None => true,
            Some(wanted) => event.serial_number() == Some(wanted),
        }
    }
}

/// Deterministic correlation key. At most one live subscription per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionKey {
    pub kind: EventKind,
    pub serial_number: Option<SerialNumber>,
    pub purpose: String,
}

impl SubscriptionKey {
    pub fn new(
        kind: EventKind,
        serial_number: Option<SerialNumber>,
        purpose: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            serial_number,
            purpose: purpose.into(),
        }
    }

    pub fn interest(&self) -> Interest {
        Interest {
            kind: self.kind,
            serial_number: self.serial_number.clone(),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(ref sn) = self.serial_number {
            write!(f, ":{sn}")?;
        }
        write!(f, ":{}", self.purpose)
    }
}

pub type Callback = Arc<dyn Fn(&BufferedEvent) + Send + Sync>;

// ── Registry ────────────────────────────────────────────────────────

struct Entry {
    interest: Interest,
    mode: Mode,
    key: Option<SubscriptionKey>,
    callback: Callback,
    active: Arc<AtomicBool>,
}

#[derive(Default)]
struct State {
    /// Insertion order is invocation order.
    entries: IndexMap<SubscriptionId, Entry>,
    keys: HashMap<SubscriptionKey, SubscriptionId>,
    /// One-shots selected by a dispatch whose callback hasn't run yet.
    in_flight: HashMap<SubscriptionId, Arc<AtomicBool>>,
}

impl State {
    fn forget_key(&mut self, key: Option<&SubscriptionKey>, id: SubscriptionId) {
        if let Some(key) = key {
            if self.keys.get(key) == Some(&id) {
                self.keys.remove(key);
            }
        }
    }
}

struct Selected {
    id: SubscriptionId,
    mode: Mode,
    callback: Callback,
    active: Arc<AtomicBool>,
}

pub struct Registry {
    channel: Channel,
    state: Mutex<State>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("channel", &self.channel)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl Registry {
    pub fn new(channel: Channel) -> Arc<Self> {
        Arc::new(Self {
            channel,
            state: Mutex::new(State::default()),
        })
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Live subscriptions (in-flight one-shots excluded).
    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        lock(&self.state).entries.contains_key(&id)
    }

    pub fn subscribe(
        self: &Arc<Self>,
        interest: Interest,
        callback: Callback,
        mode: Mode,
    ) -> SubscriptionGuard {
        let id = SubscriptionId::new();
        lock(&self.state).entries.insert(
            id,
            Entry {
                interest,
                mode,
                key: None,
                callback,
                active: Arc::new(AtomicBool::new(true)),
            },
        );
        trace!(channel = %self.channel, %id, ?mode, "subscribed");
        SubscriptionGuard::new(id, self)
    }

    /// Register under `key` unless a live subscription already holds it.
    /// A duplicate returns the existing id and no guard, so the pending
    /// subscription is neither doubled nor cancelled.
    pub fn subscribe_keyed(
        self: &Arc<Self>,
        key: SubscriptionKey,
        callback: Callback,
        mode: Mode,
    ) -> KeyedRegistration {
        let mut state = lock(&self.state);
        if let Some(&existing) = state.keys.get(&key) {
            trace!(channel = %self.channel, %key, id = %existing, "keyed subscription already pending");
            return KeyedRegistration {
                id: existing,
                guard: None,
            };
        }

        let id = SubscriptionId::new();
        state.keys.insert(key.clone(), id);
        state.entries.insert(
            id,
            Entry {
                interest: key.interest(),
                mode,
                key: Some(key),
                callback,
                active: Arc::new(AtomicBool::new(true)),
            },
        );
        drop(state);

        trace!(channel = %self.channel, %id, ?mode, "keyed subscription registered");
        KeyedRegistration {
            id,
            guard: Some(SubscriptionGuard::new(id, self)),
        }
    }

    /// Idempotent: unknown or already-removed ids return `false`.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = lock(&self.state);
        if let Some(entry) = state.entries.shift_remove(&id) {
            entry.active.store(false, Ordering::SeqCst);
            state.forget_key(entry.key.as_ref(), id);
            trace!(channel = %self.channel, %id, "unsubscribed");
            return true;
        }
        match state.in_flight.remove(&id) {
            Some(active) => active.swap(false, Ordering::SeqCst),
            None => false,
        }
    }

    /// Notify every matching subscription of `event`, in registration
    /// order. Must not be called concurrently for the same channel.
    pub fn dispatch(&self, event: &BufferedEvent) {
        let selected = self.select(&event.event);
        if selected.is_empty() {
            return;
        }

        for hit in selected {
            let fire = match hit.mode {
                Mode::Persistent => hit.active.load(Ordering::SeqCst),
                Mode::OneShot => {
                    let claimed = hit.active.swap(false, Ordering::SeqCst);
                    lock(&self.state).in_flight.remove(&hit.id);
                    claimed
                }
            };
            if fire {
                (hit.callback)(event);
            } else {
                trace!(channel = %self.channel, id = %hit.id, "skipping removed subscription");
            }
        }
    }

    fn select(&self, event: &Event) -> Vec<Selected> {
        let mut state = lock(&self.state);
        let hits: Vec<Selected> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.interest.matches(event))
            .map(|(&id, entry)| Selected {
                id,
                mode: entry.mode,
                callback: Arc::clone(&entry.callback),
                active: Arc::clone(&entry.active),
            })
            .collect();

        for hit in hits.iter().filter(|h| h.mode == Mode::OneShot) {
            if let Some(entry) = state.entries.shift_remove(&hit.id) {
                state.forget_key(entry.key.as_ref(), hit.id);
            }
            state.in_flight.insert(hit.id, Arc::clone(&hit.active));
        }
        hits
    }
}

// ── Scoped handles ──────────────────────────────────────────────────

/// Owns one subscription. Dropping it unsubscribes.
#[must_use = "dropping the guard unsubscribes immediately"]
pub struct SubscriptionGuard {
    id: SubscriptionId,
    registry: Weak<Registry>,
    detached: bool,
}

impl SubscriptionGuard {
    fn new(id: SubscriptionId, registry: &Arc<Registry>) -> Self {
        Self {
            id,
            registry: Arc::downgrade(registry),
            detached: false,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// `false` once fired (one-shot), unsubscribed, or the hub is gone.
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.contains(self.id))
    }

    /// Leave the subscription registered past this guard's scope.
    pub fn detach(mut self) -> SubscriptionId {
        self.detached = true;
        self.id
    }

    pub fn unsubscribe(self) -> bool {
        let removed = self
            .registry
            .upgrade()
            .is_some_and(|registry| registry.unsubscribe(self.id));
        self.detach();
        removed
    }
}

impl fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("id", &self.id)
            .field("detached", &self.detached)
            .finish()
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
    }
}

/// Result of a keyed registration.
#[derive(Debug)]
#[must_use = "dropping a created registration unsubscribes it"]
pub struct KeyedRegistration {
    id: SubscriptionId,
    guard: Option<SubscriptionGuard>,
}

impl KeyedRegistration {
    /// The id now holding the key: new, or the one already pending.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// `true` if this call registered the callback.
    pub fn created(&self) -> bool {
        self.guard.is_some()
    }

    /// The guard, only when this call created the subscription.
    pub fn into_guard(self) -> Option<SubscriptionGuard> {
        self.guard
    }

    pub fn detach(self) -> SubscriptionId {
        if let Some(guard) = self.guard {
            guard.detach();
        }
        self.id
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use chrono::{DateTime, Utc};

    fn at(seq: u64, event: Event) -> BufferedEvent {
        BufferedEvent {
            channel: Channel::Controller,
            seq,
            timestamp: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
            event: Arc::new(event),
        }
    }

    fn connected(sn: &str) -> Event {
        Event::DeviceConnection {
            serial_number: SerialNumber::new(sn),
        }
    }

    fn log() -> Event {
        Event::Log {
            level: "info".into(),
            thread_id: None,
            thread_name: None,
            message: "m".into(),
        }
    }

    fn counter() -> (Arc<AtomicUsize>, Callback) {
        let n = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&n);
        (
            n,
            Arc::new(move |_: &BufferedEvent| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn matching_rule() {
        let any = Interest::kind(EventKind::DeviceConnection);
        let one = Interest::device(EventKind::DeviceConnection, "AA:BB");
        let logs = Interest::kind(EventKind::Log);
        let log_for_device = Interest::device(EventKind::Log, "aabb");

        assert!(any.matches(&connected("aabb")));
        assert!(one.matches(&connected("aabb")));
        assert!(!one.matches(&connected("ccdd")));
        assert!(!any.matches(&log()));
        assert!(logs.matches(&log()));
        assert!(!log_for_device.matches(&log()));
        assert!(!Interest::kind(EventKind::Generic).matches(&Event::Generic { raw: "{}".into() }));
    }

    #[test]
    fn one_shot_fires_once_per_burst() {
        let reg = Registry::new(Channel::Controller);
        let (n, cb) = counter();
        let guard = reg.subscribe(Interest::device(EventKind::DeviceConnection, "x1"), cb, Mode::OneShot);

        for seq in 0..10 {
            reg.dispatch(&at(seq, connected("x1")));
        }
        assert_eq!(n.load(Ordering::SeqCst), 1);
        assert!(!guard.is_active());
        assert!(reg.is_empty());
    }

    #[test]
    fn persistent_fires_every_time_until_removed() {
        let reg = Registry::new(Channel::Controller);
        let (n, cb) = counter();
        let guard = reg.subscribe(Interest::kind(EventKind::Log), cb, Mode::Persistent);

        for seq in 0..7 {
            reg.dispatch(&at(seq, log()));
        }
        assert_eq!(n.load(Ordering::SeqCst), 7);

        assert!(guard.unsubscribe());
        reg.dispatch(&at(7, log()));
        assert_eq!(n.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn unsubscribe_is_idempotent_and_isolated() {
        let reg = Registry::new(Channel::Controller);
        let (gone, cb1) = counter();
        let (kept, cb2) = counter();
        let id = reg
            .subscribe(Interest::kind(EventKind::Log), cb1, Mode::OneShot)
            .detach();
        let _other = reg.subscribe(Interest::kind(EventKind::Log), cb2, Mode::Persistent);

        reg.dispatch(&at(0, log()));
        assert!(!reg.unsubscribe(id), "one-shot already removed itself");
        assert!(!reg.unsubscribe(id));
        assert!(!reg.unsubscribe(SubscriptionId::new()));

        reg.dispatch(&at(1, log()));
        assert_eq!(gone.load(Ordering::SeqCst), 1);
        assert_eq!(kept.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropping_guard_unsubscribes() {
        let reg = Registry::new(Channel::Security);
        let (n, cb) = counter();
        {
            let _guard = reg.subscribe(Interest::kind(EventKind::Log), cb, Mode::Persistent);
            assert_eq!(reg.len(), 1);
        }
        assert!(reg.is_empty());
        reg.dispatch(&at(0, log()));
        assert_eq!(n.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn callback_removing_a_later_entry_skips_it() {
        let reg = Registry::new(Channel::Controller);
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let weak = Arc::downgrade(&reg);
        let target = Arc::clone(&slot);
        let first: Callback = Arc::new(move |_: &BufferedEvent| {
            if let (Some(reg), Some(id)) = (weak.upgrade(), *target.lock().unwrap()) {
                assert!(reg.unsubscribe(id));
            }
        });
        let _first = reg.subscribe(Interest::kind(EventKind::Log), first, Mode::Persistent);

        let (later_calls, later_cb) = counter();
        let later = reg
            .subscribe(Interest::kind(EventKind::Log), later_cb, Mode::OneShot)
            .detach();
        *slot.lock().unwrap() = Some(later);

        reg.dispatch(&at(0, log()));
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
        assert!(!reg.unsubscribe(later));
    }

    #[test]
    fn callback_may_subscribe_during_dispatch() {
        let reg = Registry::new(Channel::Firmware);
        let (n, cb) = counter();
        let weak = Arc::downgrade(&reg);
        let spawner: Callback = Arc::new(move |_: &BufferedEvent| {
            if let Some(reg) = weak.upgrade() {
                reg.subscribe(Interest::kind(EventKind::Log), Arc::clone(&cb), Mode::Persistent)
                    .detach();
            }
        });
        let _g = reg.subscribe(Interest::kind(EventKind::Log), spawner, Mode::OneShot);

        reg.dispatch(&at(0, log()));
        assert_eq!(n.load(Ordering::SeqCst), 0, "new entry joins from the next event");
        reg.dispatch(&at(1, log()));
        assert_eq!(n.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn keyed_registration_coalesces() {
        let reg = Registry::new(Channel::Controller);
        let key = SubscriptionKey::new(
            EventKind::DeviceConnection,
            Some(SerialNumber::new("x1")),
            "reboot",
        );
        let (first_calls, first_cb) = counter();
        let (second_calls, second_cb) = counter();

        let first = reg.subscribe_keyed(key.clone(), first_cb, Mode::OneShot);
        assert!(first.created());
        let second = reg.subscribe_keyed(key.clone(), second_cb, Mode::OneShot);
        assert!(!second.created());
        assert_eq!(first.id(), second.id());

        // Dropping the duplicate leaves the pending one alone.
        drop(second);
        assert_eq!(reg.len(), 1);

        reg.dispatch(&at(0, connected("x1")));
        reg.dispatch(&at(1, connected("x1")));
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);

        // Key is free again once the one-shot fired.
        let (third_calls, third_cb) = counter();
        let third = reg.subscribe_keyed(key, third_cb, Mode::OneShot);
        assert!(third.created());
        reg.dispatch(&at(2, connected("x1")));
        assert_eq!(third_calls.load(Ordering::SeqCst), 1);
        drop(first);
    }

    #[test]
    fn guard_outliving_registry_is_inert() {
        let reg = Registry::new(Channel::Controller);
        let (_, cb) = counter();
        let guard = reg.subscribe(Interest::kind(EventKind::Log), cb, Mode::Persistent);
        drop(reg);
        assert!(!guard.is_active());
        assert!(!guard.unsubscribe());
    }

    #[test]
    fn key_display() {
        let key = SubscriptionKey::new(
            EventKind::DeviceDisconnection,
            Some(SerialNumber::new("AA:01")),
            "reboot",
        );
        assert_eq!(key.to_string(), "DEVICE_DISCONNECTION:aa01:reboot");
    }
}
