//! The progress bus: the session-routed hub plus one sink dispatcher.
//!
//! Owned by the engine and shared by every session. Sinks (stdout,
//! JSONL, channels, memory) are served by a single dispatcher task that
//! drains a firehose subscription and writes each event to every
//! registered sink in order. The dispatcher sits behind the same bounded
//! queue as any other subscriber, so wedged sinks lose events instead of
//! stalling the iteration controller; live subscribers are unaffected
//! either way.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::emitter::ProgressEmitter;
use super::hub::{EventStream, ProgressHub, SessionStream};
use super::sink::EventSink;

const DEFAULT_BUFFER_CAPACITY: usize = 1024;

type SinkList = Arc<Mutex<Vec<Box<dyn EventSink>>>>;

pub struct ProgressBus {
    hub: Arc<ProgressHub>,
    sinks: SinkList,
    dispatcher: Mutex<Option<Dispatcher>>,
}

struct Dispatcher {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::with_sinks(Vec::new())
    }
}

impl ProgressBus {
    pub fn with_sink<T>(sink: T) -> Self
    where
        T: EventSink + 'static,
    {
        Self::with_sinks(vec![Box::new(sink)])
    }

    pub fn with_sinks(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self::with_capacity(sinks, DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_capacity(sinks: Vec<Box<dyn EventSink>>, buffer_capacity: usize) -> Self {
        Self {
            hub: ProgressHub::new(buffer_capacity),
            sinks: Arc::new(Mutex::new(sinks)),
            dispatcher: Mutex::new(None),
        }
    }

    /// Register another sink. The running dispatcher picks it up from
    /// the next event on; no restart needed.
    pub fn add_sink<T: EventSink + 'static>(&self, sink: T) {
        self.add_boxed_sink(Box::new(sink));
    }

    pub fn add_boxed_sink(&self, sink: Box<dyn EventSink>) {
        self.sinks.lock().push(sink);
    }

    pub fn get_emitter(&self) -> Arc<dyn ProgressEmitter> {
        Arc::new(self.hub.emitter())
    }

    /// Subscribe to all sessions' events.
    pub fn subscribe(&self) -> EventStream {
        self.hub.subscribe()
    }

    /// Subscribe to one session's events.
    pub fn subscribe_session(&self, session_id: impl Into<String>) -> SessionStream {
        self.hub.subscribe_session(session_id)
    }

    /// Start the sink dispatcher. Idempotent.
    pub fn listen(&self) {
        let mut dispatcher = self.dispatcher.lock();
        if dispatcher.is_some() {
            return;
        }

        let stream = self.hub.subscribe();
        let sinks = Arc::clone(&self.sinks);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        // Flush whatever is already buffered, then exit.
                        while let Some(event) = stream.try_next() {
                            dispatch(&sinks, &event);
                        }
                        break;
                    }
                    event = stream.recv() => match event {
                        Some(event) => dispatch(&sinks, &event),
                        None => break,
                    }
                }
            }
        });
        *dispatcher = Some(Dispatcher {
            shutdown: shutdown_tx,
            handle,
        });
    }

    /// Stop the dispatcher, flushing events it had already buffered.
    pub async fn stop(&self) {
        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            let _ = dispatcher.shutdown.send(());
            let _ = dispatcher.handle.await;
        }
    }

    pub fn hub(&self) -> &Arc<ProgressHub> {
        &self.hub
    }
}

impl Drop for ProgressBus {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            let _ = dispatcher.shutdown.send(());
            dispatcher.handle.abort();
        }
    }
}

/// Hand one event to every sink. A failing sink is logged and skipped;
/// it neither stops the dispatcher nor affects the other sinks.
fn dispatch(sinks: &SinkList, event: &super::event::ProgressEvent) {
    for sink in sinks.lock().iter_mut() {
        if let Err(err) = sink.handle(event) {
            tracing::warn!(
                target: "styleforge::progress",
                sink = %sink.name(),
                error = %err,
                "progress sink error"
            );
        }
    }
}
