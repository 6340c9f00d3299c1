//! Buffering and backpressure for streaming requests.
//!
//! A single request/response cannot carry an unbounded event sequence, so
//! streaming operations are two-phase: the handler starts the producer
//! out-of-band keyed by request id, and the consumer drains events through
//! [`StreamingRequestManager::iterate`]. Producers push events into a
//! per-request buffer; an empty-buffer consumer parks on a stashed wakeup
//! channel and is woken by the next push. No polling.
//!
//! Only one concurrent consumer per request id is supported: parking a second
//! consumer replaces the first one's wakeup slot. Fan-out, if ever needed,
//! belongs in a separate broadcast abstraction, not here.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{HostError, HostResult};

/// One unit of a multi-part asynchronous response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// A data chunk.
    Data { payload: Value },
    /// End of stream, delivered in-band.
    Done,
    /// Stream failure, delivered in-band.
    Error { message: String },
}

/// Per-request buffer state.
struct StreamState {
    events: VecDeque<StreamEvent>,
    done: bool,
    error: Option<String>,
    /// Wakeup slot for a parked consumer.
    waiter: Option<oneshot::Sender<()>>,
}

impl StreamState {
    fn new() -> Self {
        Self {
            events: VecDeque::new(),
            done: false,
            error: None,
            waiter: None,
        }
    }

    fn wake(&mut self) {
        if let Some(tx) = self.waiter.take() {
            let _ = tx.send(());
        }
    }
}

/// Event-buffer registry for in-flight streaming requests.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone, Default)]
pub struct StreamingRequestManager {
    inner: Arc<Mutex<HashMap<String, StreamState>>>,
}

impl StreamingRequestManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the buffer for a new streaming request.
    ///
    /// Starting an id that already exists replaces the old record; any parked
    /// consumer of the old record is woken and will find the stream gone.
    pub fn start(&self, request_id: &str) {
        let mut streams = self.inner.lock().unwrap();
        if let Some(old) = streams.insert(request_id.to_string(), StreamState::new()) {
            debug!(request_id, "replacing existing streaming request");
            let mut old = old;
            old.wake();
        }
    }

    /// Append an event to a stream's buffer, waking a parked consumer.
    ///
    /// Returns false when no stream with this id exists (already consumed,
    /// abandoned, or never started).
    pub fn add_event(&self, request_id: &str, event: StreamEvent) -> bool {
        let mut streams = self.inner.lock().unwrap();
        match streams.get_mut(request_id) {
            Some(state) => {
                state.events.push_back(event);
                state.wake();
                true
            }
            None => false,
        }
    }

    /// Mark a stream complete, waking a parked consumer.
    pub fn complete(&self, request_id: &str) -> bool {
        let mut streams = self.inner.lock().unwrap();
        match streams.get_mut(request_id) {
            Some(state) => {
                state.done = true;
                state.wake();
                true
            }
            None => false,
        }
    }

    /// Mark a stream failed; the consumer observes the error on its next poll.
    pub fn fail(&self, request_id: &str, error: impl Into<String>) -> bool {
        let mut streams = self.inner.lock().unwrap();
        match streams.get_mut(request_id) {
            Some(state) => {
                state.done = true;
                state.error = Some(error.into());
                state.wake();
                true
            }
            None => false,
        }
    }

    /// Whether a stream record currently exists for this id.
    pub fn is_active(&self, request_id: &str) -> bool {
        self.inner.lock().unwrap().contains_key(request_id)
    }

    /// Consume a stream as an async sequence of data payloads.
    ///
    /// Events buffered before the consumer attaches are delivered in order.
    /// A buffered [`StreamEvent::Done`] (or a `complete()` call) terminates
    /// iteration cleanly; a buffered [`StreamEvent::Error`] (or `fail()`)
    /// surfaces as an `Err` item and terminates. The stream record is
    /// removed unconditionally when the returned stream is dropped, so a
    /// stream cannot leak past a single consumption even on early
    /// abandonment.
    pub fn iterate(&self, request_id: &str) -> impl Stream<Item = HostResult<Value>> {
        let inner = Arc::clone(&self.inner);
        let request_id = request_id.to_string();
        // Built outside the generator so dropping a never-polled stream
        // still removes the record.
        let cleanup = RemoveOnDrop {
            inner: Arc::clone(&inner),
            request_id: request_id.clone(),
        };

        async_stream::stream! {
            let _cleanup = cleanup;

            loop {
                // Drain under the lock, yield outside it.
                let (drained, done, error) = {
                    let mut streams = inner.lock().unwrap();
                    let Some(state) = streams.get_mut(&request_id) else {
                        yield Err(HostError::StreamNotFound(request_id.clone()));
                        return;
                    };
                    let drained: Vec<StreamEvent> = state.events.drain(..).collect();
                    (drained, state.done, state.error.clone())
                };

                for event in drained {
                    match event {
                        StreamEvent::Data { payload } => yield Ok(payload),
                        StreamEvent::Done => return,
                        StreamEvent::Error { message } => {
                            yield Err(HostError::Stream(message));
                            return;
                        }
                    }
                }

                if done {
                    if let Some(message) = error {
                        yield Err(HostError::Stream(message));
                    }
                    return;
                }

                // Park until the producer pushes, completes, or fails.
                let rx = {
                    let mut streams = inner.lock().unwrap();
                    let Some(state) = streams.get_mut(&request_id) else {
                        yield Err(HostError::StreamNotFound(request_id.clone()));
                        return;
                    };
                    if !state.events.is_empty() || state.done {
                        continue;
                    }
                    let (tx, rx) = oneshot::channel();
                    state.waiter = Some(tx);
                    rx
                };

                // A dropped sender also counts as a wakeup; the next loop
                // iteration re-reads the record state.
                let _ = rx.await;
            }
        }
    }
}

/// Removes the stream record when the consuming generator is dropped.
struct RemoveOnDrop {
    inner: Arc<Mutex<HashMap<String, StreamState>>>,
    request_id: String,
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        self.inner.lock().unwrap().remove(&self.request_id);
    }
}
