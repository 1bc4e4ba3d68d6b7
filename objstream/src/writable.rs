//! Writable side: consumes an ordered sequence of items
//!
//! Writes are queued and handed one at a time to a [`Consume`] implementation
//! by a worker task, so the consumer never sees two calls in flight. When the
//! consumer implements `writev`, everything queued at that moment (for example
//! while the stream was corked) is handed over as one batch.

use futures::future::{self, BoxFuture};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};

use crate::buffer::ObjectBuffer;
use crate::error::{StreamError, StreamResult};
use crate::events::{Event, EventHub};
use crate::options::StreamOptions;

/// Completion callback of a single write
pub type WriteCallback = Box<dyn FnOnce(StreamResult<()>) + Send>;

/// Consumer extension point
pub trait Consume<T>: Send
where
    T: Send + 'static,
{
    /// Consume one item
    fn write(&mut self, item: T) -> BoxFuture<'_, StreamResult<()>>;

    /// Whether `writev` should receive batches
    fn supports_writev(&self) -> bool {
        false
    }

    /// Consume several queued items at once
    fn writev(&mut self, items: Vec<T>) -> BoxFuture<'_, StreamResult<()>> {
        Box::pin(async move {
            for item in items {
                self.write(item).await?;
            }
            Ok::<(), StreamError>(())
        })
    }

    /// Runs once after `end()`, when every queued item has been consumed
    fn finalize(&mut self) -> BoxFuture<'_, StreamResult<()>> {
        Box::pin(future::ready(Ok(())))
    }

    /// Called once when the stream is torn down before finishing
    fn destroy(&mut self, _error: Option<&StreamError>) {}
}

struct FnConsumer<F>(F);

impl<T, F, Fut> Consume<T> for FnConsumer<F>
where
    T: Send + 'static,
    F: FnMut(T) -> Fut + Send,
    Fut: Future<Output = StreamResult<()>> + Send + 'static,
{
    fn write(&mut self, item: T) -> BoxFuture<'_, StreamResult<()>> {
        Box::pin((self.0)(item))
    }
}

struct Pending<T> {
    item: T,
    callback: Option<WriteCallback>,
}

enum Step<T> {
    Write(Vec<Pending<T>>),
    Final,
    Stop,
}

pub(crate) struct WriteState<T> {
    queue: ObjectBuffer<Pending<T>>,
    in_flight: usize,
    corked: usize,
    ending: bool,
    finished: bool,
    need_drain: bool,
    error: Option<StreamError>,
    destroyed: bool,
}

impl<T> WriteState<T> {
    fn new(high_water_mark: usize) -> Self {
        Self {
            queue: ObjectBuffer::new(high_water_mark),
            in_flight: 0,
            corked: 0,
            ending: false,
            finished: false,
            need_drain: false,
            error: None,
            destroyed: false,
        }
    }

    /// Queued plus in-flight items
    fn len(&self) -> usize {
        self.queue.len() + self.in_flight
    }

    fn can_take(&self) -> bool {
        (self.corked == 0 || self.ending) && !self.queue.is_empty()
    }

    fn has_step(&self) -> bool {
        self.destroyed || self.finished || self.can_take() || (self.ending && self.queue.is_empty())
    }
}

pub(crate) struct WriteCore<T> {
    state: Mutex<WriteState<T>>,
    hub: EventHub,
    auto_destroy: bool,
}

impl<T> WriteCore<T> {
    fn new(options: &StreamOptions) -> Self {
        Self {
            state: Mutex::new(WriteState::new(options.high_water_mark())),
            hub: EventHub::new(options.name()),
            auto_destroy: options.auto_destroy(),
        }
    }

    /// Check-lock-check wait: sleep on `event` while `blocked` holds
    async fn wait_while(
        &self,
        event: Event,
        debug_hint: &'static str,
        blocked: impl Fn(&WriteState<T>) -> bool + Send,
    ) {
        let lock = self.hub.get_lock();
        let should_wait = blocked(&*self.state.lock());
        if should_wait {
            self.hub.wait_async(event, debug_hint, lock).await;
        } else {
            drop(lock);
        }
    }

    pub(crate) fn write(&self, item: T, callback: Option<WriteCallback>) -> bool {
        let (pending, error) = match self.enqueue(Pending { item, callback }) {
            Ok(below) => return self.after_enqueue(below),
            Err(rejected) => rejected,
        };

        tracing::debug!(stream = %self.hub.name(), %error, "write rejected");
        if let Some(callback) = pending.callback {
            callback(Err(error.clone()));
        }
        if error == StreamError::WriteAfterEnd {
            self.destroy(Some(error));
        }
        false
    }

    /// Queue an item if the side still accepts writes, else hand it back untouched
    pub(crate) fn offer(&self, item: T) -> Result<bool, T> {
        match self.enqueue(Pending { item, callback: None }) {
            Ok(below) => Ok(self.after_enqueue(below)),
            Err((pending, _)) => Err(pending.item),
        }
    }

    /// Queue under the lock; true while below the high-water mark
    fn enqueue(&self, pending: Pending<T>) -> Result<bool, (Pending<T>, StreamError)> {
        let mut state = self.state.lock();
        if state.ending {
            return Err((pending, StreamError::WriteAfterEnd));
        }
        if state.destroyed {
            return Err((pending, StreamError::Destroyed));
        }
        state.queue.push_back(pending);
        let below = state.len() < state.queue.high_water_mark();
        if !below {
            state.need_drain = true;
        }
        Ok(below)
    }

    fn after_enqueue(&self, below: bool) -> bool {
        self.hub.emit(Event::Queued);
        below
    }

    pub(crate) async fn send(&self, item: T) -> StreamResult<()> {
        let (tx, rx) = oneshot::channel::<StreamResult<()>>();
        self.write(
            item,
            Some(Box::new(move |result: StreamResult<()>| {
                let _ = tx.send(result);
            })),
        );
        rx.await.unwrap_or(Err(StreamError::Destroyed))
    }

    pub(crate) fn end(&self) {
        {
            let mut state = self.state.lock();
            if state.ending || state.destroyed {
                return;
            }
            state.ending = true;
        }
        tracing::trace!(stream = %self.hub.name(), "end of input");
        self.hub.emit(Event::Queued);
    }

    pub(crate) fn cork(&self) {
        self.state.lock().corked += 1;
    }

    pub(crate) fn uncork(&self) {
        let released = {
            let mut state = self.state.lock();
            if state.corked == 0 {
                return;
            }
            state.corked -= 1;
            state.corked == 0
        };
        if released {
            self.hub.emit(Event::Queued);
        }
    }

    async fn next_step(&self, batching: bool) -> Step<T> {
        loop {
            {
                let mut state = self.state.lock();
                if state.destroyed || state.finished {
                    return Step::Stop;
                }
                if state.can_take() {
                    let count = if batching { state.queue.len() } else { 1 };
                    let batch = state.queue.drain_front(count);
                    state.in_flight = batch.len();
                    return Step::Write(batch);
                }
                if state.ending && state.queue.is_empty() {
                    return Step::Final;
                }
            }
            self.wait_while(Event::Queued, "consumer", |s| !s.has_step())
                .await;
        }
    }

    /// Account for consumed items; true when `Drain` is due
    fn complete(&self, count: usize) -> bool {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(count);
        if state.need_drain && state.len() == 0 && !state.destroyed {
            state.need_drain = false;
            true
        } else {
            false
        }
    }

    fn finish(&self) {
        {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            state.finished = true;
        }
        tracing::debug!(stream = %self.hub.name(), "writable finished");
        self.hub.emit(Event::Finish);
        if self.auto_destroy {
            self.destroy(None);
        }
    }

    pub(crate) async fn drained(&self) {
        loop {
            let waiting = {
                let state = self.state.lock();
                state.need_drain && !state.destroyed
            };
            if !waiting {
                return;
            }
            self.wait_while(Event::Drain, "drain", |s| s.need_drain && !s.destroyed)
                .await;
        }
    }

    /// Wait until the side is destroyed
    pub(crate) async fn closed(&self) {
        while !self.is_destroyed() {
            self.wait_while(Event::Close, "closed", |s| !s.destroyed)
                .await;
        }
    }

    /// Last user handle dropped: discard unfinished input unless `end` was called
    fn abandon(&self) {
        let discard = {
            let state = self.state.lock();
            !state.ending && !state.destroyed
        };
        if discard {
            tracing::debug!(stream = %self.hub.name(), "last handle dropped before end");
            self.destroy(None);
        }
    }

    pub(crate) async fn finished(&self) -> StreamResult<()> {
        loop {
            {
                let state = self.state.lock();
                if let Some(error) = &state.error {
                    return Err(error.clone());
                }
                if state.finished {
                    return Ok(());
                }
                if state.destroyed {
                    return Err(StreamError::PrematureClose);
                }
            }
            self.wait_while(Event::Finish, "finished", |s| !s.finished && !s.destroyed)
                .await;
        }
    }

    pub(crate) fn destroy(&self, error: Option<StreamError>) {
        let pending = {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            if let Some(error) = &error {
                state.error.get_or_insert_with(|| error.clone());
            }
            state.queue.drain_all()
        };

        let failure = error.clone().unwrap_or(StreamError::Destroyed);
        for callback in pending.into_iter().filter_map(|pending| pending.callback) {
            callback(Err(failure.clone()));
        }

        if let Some(error) = &error {
            tracing::debug!(stream = %self.hub.name(), %error, "writable failed");
            self.hub.emit(Event::Error);
        }
        self.hub.close();
    }

    pub(crate) fn is_ending(&self) -> bool {
        self.state.lock().ending
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    pub(crate) fn needs_drain(&self) -> bool {
        self.state.lock().need_drain
    }

    pub(crate) fn error(&self) -> Option<StreamError> {
        self.state.lock().error.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub(crate) fn high_water_mark(&self) -> usize {
        self.state.lock().queue.high_water_mark()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.hub.subscribe()
    }

    pub(crate) fn name(&self) -> &str {
        self.hub.name()
    }
}

/// Engine worker driving a [`Consume`] implementation
async fn run_consumer<T: Send + 'static>(core: Arc<WriteCore<T>>, mut consumer: Box<dyn Consume<T>>) {
    let batching = consumer.supports_writev();
    tracing::trace!(stream = %core.name(), batching, "consumer started");

    loop {
        match core.next_step(batching).await {
            Step::Write(batch) => {
                let count = batch.len();
                let (items, callbacks): (Vec<T>, Vec<Option<WriteCallback>>) = batch
                    .into_iter()
                    .map(|pending| (pending.item, pending.callback))
                    .unzip();

                let result = match <[T; 1]>::try_from(items) {
                    Ok([item]) => consumer.write(item).await,
                    Err(items) => consumer.writev(items).await,
                };

                let drain = core.complete(count);
                for callback in callbacks.into_iter().flatten() {
                    callback(result.clone());
                }
                match result {
                    Ok(()) if drain => core.hub.emit(Event::Drain),
                    Ok(()) => {}
                    Err(error) => core.destroy(Some(error)),
                }
            }
            Step::Final => match consumer.finalize().await {
                Ok(()) => core.finish(),
                Err(error) => core.destroy(Some(error)),
            },
            Step::Stop => break,
        }
    }

    if !core.is_finished() {
        let error = core.error();
        consumer.destroy(error.as_ref());
    }
    tracing::trace!(stream = %core.name(), "consumer stopped");
}

/// Typed writable stream
///
/// Clones are handles to the same stream. The write-side operations
/// (`write`, `end`, `finished`, ...) come from [`crate::pipe::Sink`].
///
/// Dropping the last handle before `end` destroys the stream. After `end`
/// the queued items are still consumed.
pub struct Writable<T> {
    pub(crate) core: Arc<WriteCore<T>>,
    owner: Arc<WriteOwner<T>>,
}

/// Abandons the side once the last user handle is gone
struct WriteOwner<T>(Arc<WriteCore<T>>);

impl<T> Drop for WriteOwner<T> {
    fn drop(&mut self) {
        self.0.abandon();
    }
}

impl<T: Send + 'static> Writable<T> {
    /// A writable consuming through `consumer`
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new(consumer: impl Consume<T> + 'static, options: StreamOptions) -> Self {
        let core = Arc::new(WriteCore::new(&options));
        let writable = Self {
            owner: Arc::new(WriteOwner(Arc::clone(&core))),
            core,
        };
        tokio::spawn(run_consumer(
            Arc::clone(&writable.core),
            Box::new(consumer),
        ));
        writable
    }

    /// A writable consuming each item with an async closure
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn from_fn<F, Fut>(write: F, options: StreamOptions) -> Self
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = StreamResult<()>> + Send + 'static,
    {
        Self::new(FnConsumer(write), options)
    }

    /// Tear the stream down, optionally with an error
    ///
    /// Queued items are dropped and their callbacks fail.
    pub fn destroy(&self, error: Option<StreamError>) {
        self.core.destroy(error);
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.core.is_destroyed()
    }

    #[must_use]
    pub fn error(&self) -> Option<StreamError> {
        self.core.error()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.core.name()
    }

    /// Always true: items travel whole, one per operation
    #[must_use]
    pub const fn is_object_mode(&self) -> bool {
        true
    }
}

impl<T> Clone for Writable<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            owner: Arc::clone(&self.owner),
        }
    }
}

impl<T> fmt::Debug for Writable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.core.state.lock();
        write!(
            f,
            "Writable(name={}, queued={}, ending={}, finished={}, destroyed={})",
            self.core.hub.name(),
            state.len(),
            state.ending,
            state.finished,
            state.destroyed
        )
    }
}
