//! Session-routed delivery core of the progress bus.
//!
//! The hub keeps a registry of subscriber queues keyed by session id,
//! plus a firehose list for subscribers that want every session. An
//! emitted event is routed at publish time: it lands only in the queues
//! registered for its session (and the firehose), so a subscriber never
//! pays for other sessions' traffic.
//!
//! Queues are bounded. A subscriber that stops draining loses events
//! (counted and warned, never back-pressuring the controller), and a
//! dropped receiver is pruned on the next publish. A session's
//! `Complete` event is terminal for its subscribers: it is delivered,
//! then their streams end.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::time::timeout;

use super::emitter::{EmitterError, ProgressEmitter};
use super::event::{ProgressEvent, ProgressPayload};

/// Snapshot of hub health for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressHubMetrics {
    /// Events buffered per subscriber queue before drops begin.
    pub capacity: usize,
    /// Events dropped across all slow subscribers so far.
    pub dropped: usize,
    /// Sessions with at least one live dedicated subscriber.
    pub live_sessions: usize,
}

struct Registry {
    by_session: FxHashMap<String, Vec<flume::Sender<ProgressEvent>>>,
    firehose: Vec<flume::Sender<ProgressEvent>>,
}

#[derive(Debug)]
pub struct ProgressHub {
    /// `None` once the hub is closed; publishing then fails and new
    /// subscriptions start already ended.
    registry: Mutex<Option<Registry>>,
    dropped_events: AtomicUsize,
    capacity: usize,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("sessions", &self.by_session.len())
            .field("firehose", &self.firehose.len())
            .finish()
    }
}

impl ProgressHub {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(Some(Registry {
                by_session: FxHashMap::default(),
                firehose: Vec::new(),
            })),
            dropped_events: AtomicUsize::new(0),
            capacity: capacity.max(1),
        })
    }

    /// Route an event to its session's subscribers and the firehose.
    ///
    /// Returns [`EmitterError::Closed`] once the hub has shut down.
    pub fn publish(&self, event: ProgressEvent) -> Result<(), EmitterError> {
        let mut guard = self.registry.lock();
        let registry = guard.as_mut().ok_or(EmitterError::Closed)?;

        let dropped = &self.dropped_events;
        deliver(&mut registry.firehose, &event, dropped);

        // A completed session ends its dedicated streams; dropping the
        // senders lets receivers drain and then see the end.
        let mut ended = matches!(event.payload, ProgressPayload::Complete);
        if let Some(subscribers) = registry.by_session.get_mut(&event.session_id) {
            deliver(subscribers, &event, dropped);
            ended = ended || subscribers.is_empty();
        }
        if ended {
            registry.by_session.remove(&event.session_id);
        }
        Ok(())
    }

    /// Subscribe to every session's events.
    pub fn subscribe(self: &Arc<Self>) -> EventStream {
        let (tx, rx) = flume::bounded(self.capacity);
        match self.registry.lock().as_mut() {
            Some(registry) => registry.firehose.push(tx),
            // Closed hub: the sender drops here and the stream starts
            // ended, so callers need no special case.
            None => drop(tx),
        }
        EventStream { rx }
    }

    /// Subscribe to one session's events. The stream ends when the
    /// session publishes `Complete` or the hub closes.
    pub fn subscribe_session(self: &Arc<Self>, session_id: impl Into<String>) -> SessionStream {
        let session_id = session_id.into();
        let (tx, rx) = flume::bounded(self.capacity);
        match self.registry.lock().as_mut() {
            Some(registry) => registry
                .by_session
                .entry(session_id.clone())
                .or_default()
                .push(tx),
            None => drop(tx),
        }
        SessionStream { rx, session_id }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped(&self) -> usize {
        self.dropped_events.load(Ordering::Relaxed)
    }

    pub fn metrics(&self) -> ProgressHubMetrics {
        let live_sessions = self
            .registry
            .lock()
            .as_ref()
            .map_or(0, |r| r.by_session.len());
        ProgressHubMetrics {
            capacity: self.capacity,
            dropped: self.dropped(),
            live_sessions,
        }
    }

    pub fn emitter(self: &Arc<Self>) -> HubEmitter {
        HubEmitter {
            hub: Arc::clone(self),
        }
    }

    /// Close the hub. Every subscriber stream ends after draining what
    /// it already buffered.
    pub fn close(&self) {
        let _ = self.registry.lock().take();
    }
}

/// Push an event into each queue, pruning disconnected subscribers and
/// counting drops for the full ones.
fn deliver(
    subscribers: &mut Vec<flume::Sender<ProgressEvent>>,
    event: &ProgressEvent,
    dropped: &AtomicUsize,
) {
    subscribers.retain(|tx| match tx.try_send(event.clone()) {
        Ok(()) => true,
        Err(flume::TrySendError::Full(_)) => {
            let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(
                target: "styleforge::progress",
                session = %event.session_id,
                total_dropped = total,
                "slow progress subscriber; event dropped"
            );
            true
        }
        Err(flume::TrySendError::Disconnected(_)) => false,
    });
}

#[derive(Clone, Debug)]
pub struct HubEmitter {
    hub: Arc<ProgressHub>,
}

impl ProgressEmitter for HubEmitter {
    fn emit(&self, event: ProgressEvent) -> Result<(), EmitterError> {
        self.hub.publish(event)
    }
}

/// A live subscription covering every session.
#[derive(Debug)]
pub struct EventStream {
    rx: flume::Receiver<ProgressEvent>,
}

impl EventStream {
    /// Next event, or `None` once the hub has closed and the buffer is
    /// drained.
    pub async fn recv(&self) -> Option<ProgressEvent> {
        self.rx.recv_async().await.ok()
    }

    /// Next already-buffered event, without waiting.
    pub fn try_next(&self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }

    /// Next event within `duration`, or `None` on timeout or closure.
    pub async fn next_timeout(&self, duration: Duration) -> Option<ProgressEvent> {
        timeout(duration, self.recv()).await.ok().flatten()
    }
}

/// A subscription scoped to a single session; only that session's events
/// ever arrive. Ends at the session's `Complete` event.
#[derive(Debug)]
pub struct SessionStream {
    rx: flume::Receiver<ProgressEvent>,
    session_id: String,
}

impl SessionStream {
    pub async fn recv(&self) -> Option<ProgressEvent> {
        self.rx.recv_async().await.ok()
    }

    pub async fn next_timeout(&self, duration: Duration) -> Option<ProgressEvent> {
        timeout(duration, self.recv()).await.ok().flatten()
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}
