//! Per-session progress streaming.
//!
//! The engine emits a structured [`ProgressEvent`] at every phase
//! boundary of an iteration. The [`ProgressBus`] fans those events out to
//! any number of sinks (stdout, memory, JSONL files, channels) and to
//! live subscribers.
//!
//! Events are routed by session id at publish time: a subscriber
//! registered for one session never receives (or pays for) another
//! session's traffic, and a session's `Complete` event ends its streams.
//! Delivery is best-effort over bounded queues: a subscriber that stops
//! draining loses events rather than back-pressuring the iteration
//! controller. Events for one session reach each subscriber in emission
//! order; nothing is guaranteed across sessions.

pub mod bus;
pub mod emitter;
pub mod event;
pub mod hub;
pub mod sink;

pub use bus::ProgressBus;
pub use emitter::{EmitterError, ProgressEmitter};
pub use event::{LogLevel, Phase, ProgressEvent, ProgressPayload};
pub use hub::{EventStream, ProgressHub, ProgressHubMetrics, SessionStream};
pub use sink::{ChannelSink, EventSink, JsonLinesSink, MemorySink, StdOutSink};
