//! Event hub
//!
//! Per-stream signalling between the code that changes a stream's state and
//! the tasks waiting on it: readers, writers, pipes and the engine workers.
//!
//! # 1) Waiting for an event
//!
//! 10. Waiter: check the stream state
//! 20. Waiter: call `wait_async`
//! 30. Hub: add the waiter to the waiting list
//!
//! 40. Emitter: change the stream state
//! 50. Emitter: call `emit`
//! 60. Hub: take the waiters off the list and wake them
//!
//! Step 60 can happen between steps 10 and 30, and the waiter then sleeps
//! forever. The waiter therefore holds the hub lock over steps 10-30:
//!
//! ```ignore
//! let lock = hub.get_lock();
//! if should_wait() {
//!     hub.wait_async(Event::Readable, "reader", lock).await;
//!     // the lock is consumed by wait_async and released before awaiting
//! }
//! ```
//!
//! The emitter must release its state lock before calling `emit`.
//!
//! # 2) Closing
//!
//! After `close` every wait resolves at once. Waiters loop and re-check the
//! state, which by then reports the stream as ended or destroyed.
//!
//! # 3) Subscribing
//!
//! `subscribe` hands out a broadcast receiver of the public events. Drop the
//! receiver to unsubscribe.

use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};

const SUBSCRIBER_CAPACITY: usize = 64;

/// Something that happened to a stream side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// An item (or end of sequence) became available to consumers
    Readable,
    /// The write queue emptied after `write` returned false
    Drain,
    /// The last item has been consumed from a readable side
    End,
    /// All writes were consumed and the final hook ran
    Finish,
    /// The stream failed; see `error()`
    Error,
    /// The stream was closed, normally or not
    Close,
    Pause,
    Resume,
    /// A consumer wants more items (engine internal)
    Demand,
    /// An item or end of input is waiting for the sink (engine internal)
    Queued,
}

impl Event {
    /// Terminal events wake every waiter, whatever it waits for
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::End | Self::Finish | Self::Error | Self::Close)
    }

    /// Engine wakeups, not broadcast to subscribers
    #[must_use]
    pub fn is_internal(self) -> bool {
        matches!(self, Self::Demand | Self::Queued)
    }
}

struct Waiter {
    sender: oneshot::Sender<Event>,
    debug_hint: &'static str,
}

pub struct HubState {
    open: bool,
    waiting: HashMap<Event, Vec<Waiter>>,
    subscribers: Option<broadcast::Sender<Event>>,
}

impl HubState {
    fn new() -> Self {
        Self {
            open: true,
            waiting: HashMap::new(),
            subscribers: None,
        }
    }
}

/// Thread-safe event hub of one stream side
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<Mutex<HubState>>,
    name: Arc<str>,
}

impl EventHub {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubState::new())),
            name: Arc::from(name),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the lock for atomic condition-check + register operations
    pub fn get_lock(&self) -> MutexGuard<'_, HubState> {
        self.inner.lock()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    /// Wait for the event
    ///
    /// Precondition: the caller acquired the lock with `get_lock`.
    /// Post-condition: the lock is released when this method returns.
    pub fn wait_async(
        &self,
        event: Event,
        debug_hint: &'static str,
        mut lock: MutexGuard<'_, HubState>,
    ) -> impl Future<Output = ()> + Send {
        let (tx, rx) = oneshot::channel();

        if lock.open {
            let waiters = lock.waiting.entry(event).or_default();
            // Waits abandoned by their callers (for example a lost `select!` branch)
            waiters.retain(|waiter| !waiter.sender.is_closed());
            waiters.push(Waiter {
                sender: tx,
                debug_hint,
            });
        } else {
            let _ = tx.send(Event::Close);
        }
        drop(lock);

        // A dropped sender means the hub went away together with the stream
        async move {
            let _ = rx.await;
        }
    }

    /// Wake the waiters of the event and tell the subscribers
    pub fn emit(&self, event: Event) {
        let mut state = self.inner.lock();
        let waiters: Vec<Waiter> = if event.is_terminal() {
            state.waiting.drain().flat_map(|(_, waiters)| waiters).collect()
        } else {
            state.waiting.remove(&event).unwrap_or_default()
        };
        let subscribers = if event.is_internal() {
            None
        } else {
            state.subscribers.clone()
        };
        drop(state);

        log::trace!(
            "hub.emit: {}, event={:?}, waiters: {}",
            self.name,
            event,
            waiters.len()
        );

        for waiter in waiters {
            if waiter.sender.send(event).is_err() {
                log::debug!(
                    "hub.emit: waiter dropped on {} (hint: {})",
                    self.name,
                    waiter.debug_hint
                );
            }
        }
        if let Some(subscribers) = subscribers {
            // No receivers is not an error
            let _ = subscribers.send(event);
        }
    }

    /// Subscribe to the public events
    ///
    /// A receiver obtained after close only reports the channel as closed.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        let mut state = self.inner.lock();
        if !state.open {
            let (_, rx) = broadcast::channel(1);
            return rx;
        }
        state
            .subscribers
            .get_or_insert_with(|| broadcast::channel(SUBSCRIBER_CAPACITY).0)
            .subscribe()
    }

    /// Emit `Close`, wake everyone and make later waits return at once
    pub fn close(&self) {
        {
            let mut state = self.inner.lock();
            if !state.open {
                log::debug!("hub.close: {} already closed", self.name);
                return;
            }
            state.open = false;
        }
        self.emit(Event::Close);
        self.inner.lock().subscribers = None;
    }
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("EventHub")
            .field("name", &self.name)
            .field("open", &state.open)
            .field("waiting", &state.waiting.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}
