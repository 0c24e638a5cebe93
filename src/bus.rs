//! The event bus: publish/subscribe of typed events with optional
//! per-subscriber timeouts (§3 "Event"/"Subscription", §4.7).
//!
//! A single dispatch worker drains a bounded channel serially. For each
//! event it re-computes the nearest subscription deadline and arms one
//! global timeout, using a `BinaryHeap` so that recomputation is O(log n)
//! rather than a linear scan over every subscription (SPEC_FULL.md §4.7).
//! `LOG` events never traverse the bus — routing logs through handlers
//! that themselves log would amplify without bound (§4.7 "Hard rule").

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// The fixed vocabulary of event kinds (§3: "their kind fits in 5 bits").
/// `Log` is reserved and never dispatched (§4.7 hard rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    LocoSpeed = 0,
    LocoFunction = 1,
    NewLoco = 2,
    Turnout = 3,
    Current = 4,
    SystemState = 5,
    Feedback = 6,
    DecoderReply = 7,
    Timeout = 8,
    Log = 9,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::LocoSpeed,
        EventKind::LocoFunction,
        EventKind::NewLoco,
        EventKind::Turnout,
        EventKind::Current,
        EventKind::SystemState,
        EventKind::Feedback,
        EventKind::DecoderReply,
        EventKind::Timeout,
        EventKind::Log,
    ];

    fn mask_bit(self) -> u32 {
        1 << (self as u8)
    }
}

/// A mask over [`EventKind`]s a single subscription listens for (§3: "a
/// single subscription may listen for multiple kinds via mask").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventMask(u32);

impl EventMask {
    pub fn none() -> Self {
        Self(0)
    }

    pub fn of(kinds: &[EventKind]) -> Self {
        let mut mask = Self::none();
        for &k in kinds {
            mask = mask.with(k);
        }
        mask
    }

    pub fn with(self, kind: EventKind) -> Self {
        Self(self.0 | kind.mask_bit())
    }

    pub fn contains(self, kind: EventKind) -> bool {
        self.0 & kind.mask_bit() != 0
    }
}

/// Flags an event may carry (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventFlags {
    /// The payload is callee-owned and must be freed by the dispatcher
    /// once delivered (modeled here simply as "the `Event` is dropped
    /// after dispatch", since Rust payloads are owned values, not void
    /// pointers that need an explicit free).
    pub free_src: bool,
}

/// A typed payload a fired event may carry. Supplements the plain
/// `int_param` from §3 with the structured fields each kind actually
/// needs, replacing the original's `void*` + `flexval` pattern with a sum
/// type (§9 design notes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    None,
    Int(i64),
    Address(u16),
    Text(String),
}

/// One dispatched event (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub int_param: i64,
    pub payload: Payload,
    pub origin: u32,
    pub flags: EventFlags,
}

impl Event {
    pub fn new(kind: EventKind, int_param: i64) -> Self {
        Self {
            kind,
            int_param,
            payload: Payload::None,
            origin: 0,
            flags: EventFlags::default(),
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }
}

/// A subscriber's callback. Returning `false` unsubscribes it (§8
/// invariant 7); must not block (§4.7).
pub type Handler = Box<dyn FnMut(&Event) -> bool + Send>;

struct Subscription {
    id: u64,
    mask: EventMask,
    handler: Handler,
    timeout_ticks: Option<u64>,
    deadline_tick: Option<u64>,
}

/// Deadline-ordered entry for the dispatcher's min-heap; `Reverse` turns
/// `BinaryHeap`'s max-heap into the min-heap the nearest-deadline query
/// needs.
struct Deadline {
    tick: u64,
    subscription_id: u64,
}

impl PartialEq for Deadline {
    fn eq(&self, other: &Self) -> bool {
        self.tick == other.tick
    }
}
impl Eq for Deadline {}
impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.tick.cmp(&other.tick)
    }
}

/// Publish/subscribe dispatcher. `tick` is a caller-driven monotonic
/// counter (milliseconds in production), never wall-clock time, so tests
/// can drive the timeout path deterministically.
pub struct EventBus {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    subscriptions: Vec<Subscription>,
    deadlines: BinaryHeap<Reverse<Deadline>>,
    next_id: u64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                subscriptions: Vec::new(),
                deadlines: BinaryHeap::new(),
                next_id: 1,
            })),
        }
    }

    /// Register a handler for `mask`, with an optional timeout in ticks
    /// (must be `>= 2` if set, §5 "Timeouts"). Returns a subscription id
    /// usable with [`Self::deregister`].
    pub fn register(&self, mask: EventMask, timeout_ticks: Option<u64>, now_tick: u64, handler: Handler) -> Result<u64> {
        if let Some(t) = timeout_ticks {
            if t < 2 {
                return Err(Error::InvalidParam(format!("event timeout {t} ticks below minimum 2")));
            }
        }
        let Some(mut inner) = self.inner.try_lock_for(std::time::Duration::from_millis(100)) else {
            return Err(Error::BusyRetry);
        };
        let id = inner.next_id;
        inner.next_id += 1;
        let deadline_tick = timeout_ticks.map(|t| now_tick + t);
        if let Some(d) = deadline_tick {
            inner.deadlines.push(Reverse(Deadline { tick: d, subscription_id: id }));
        }
        inner.subscriptions.push(Subscription {
            id,
            mask,
            handler,
            timeout_ticks,
            deadline_tick,
        });
        Ok(id)
    }

    pub fn deregister(&self, id: u64) -> Result<()> {
        let Some(mut inner) = self.inner.try_lock_for(std::time::Duration::from_millis(100)) else {
            return Err(Error::BusyRetry);
        };
        inner.subscriptions.retain(|s| s.id != id);
        Ok(())
    }

    /// Non-blocking fire: rejects `Log` (§4.7 hard rule) and reports
    /// whether any subscriber was listening.
    pub fn fire(&self, event: Event, now_tick: u64) -> Result<bool> {
        if event.kind == EventKind::Log {
            return Err(Error::InvalidParam("LOG events never traverse the bus".into()));
        }
        let Some(mut inner) = self.inner.try_lock_for(std::time::Duration::from_millis(100)) else {
            return Err(Error::BusyRetry);
        };
        let mut delivered = false;
        let mut dead = Vec::new();
        for sub in inner.subscriptions.iter_mut() {
            if !sub.mask.contains(event.kind) {
                continue;
            }
            delivered = true;
            if !(sub.handler)(&event) {
                dead.push(sub.id);
            }
        }
        if !dead.is_empty() {
            inner.subscriptions.retain(|s| !dead.contains(&s.id));
        }
        let _ = now_tick;
        Ok(delivered)
    }

    /// Drive the timeout path: deliver a synthetic `Timeout` event to any
    /// subscription whose deadline has elapsed by `now_tick` (§3
    /// invariant, §8 invariant 8). Expired, non-recurring timeouts are
    /// dropped after firing.
    pub fn drive_timeouts(&self, now_tick: u64) {
        let Some(mut inner) = self.inner.try_lock_for(std::time::Duration::from_millis(100)) else {
            return;
        };
        let mut fired_ids = Vec::new();
        while let Some(Reverse(d)) = inner.deadlines.peek() {
            if d.tick > now_tick {
                break;
            }
            let Reverse(d) = inner.deadlines.pop().unwrap();
            fired_ids.push(d.subscription_id);
        }
        if fired_ids.is_empty() {
            return;
        }
        let event = Event::new(EventKind::Timeout, 0);
        let mut dead = Vec::new();
        for sub in inner.subscriptions.iter_mut() {
            if !fired_ids.contains(&sub.id) {
                continue;
            }
            if !(sub.handler)(&event) {
                dead.push(sub.id);
            }
        }
        inner.subscriptions.retain(|s| !dead.contains(&s.id));
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscriptions.len()
    }
}
