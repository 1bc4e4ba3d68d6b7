//! Readable side: a lazy, ordered, single-consumer sequence of items
//!
//! Items enter through [`Pusher::push`] (or [`crate::pipe::Source::push`]) and
//! leave through `read`/`next_item`. End of sequence is a pushed `None`.
//!
//! A readable built with a [`Produce`] implementation gets a worker task that
//! calls `Produce::read` whenever a consumer has asked for items and the
//! buffer is below its high-water mark. Nothing is produced before the first
//! consumer request.

use futures::future::{self, BoxFuture};
use futures::Stream;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::buffer::ObjectBuffer;
use crate::error::{StreamError, StreamResult};
use crate::events::{Event, EventHub};
use crate::options::StreamOptions;

/// Producer extension point
///
/// `read` is invoked by the engine whenever more items are wanted. It pushes
/// zero or more items (or `None` to end the sequence) through the pusher.
/// If it returns without pushing, the engine waits for a later push before
/// asking again, so a producer may hand the pusher to another task.
///
/// Returning an error destroys the stream with that error.
pub trait Produce<T>: Send
where
    T: Send + 'static,
{
    fn read<'a>(&'a mut self, out: &'a Pusher<T>) -> BoxFuture<'a, StreamResult<()>>;

    /// Called once when the stream is torn down before reaching end of sequence
    fn destroy(&mut self, _error: Option<&StreamError>) {}
}

struct FnProducer<F>(F);

impl<T, F> Produce<T> for FnProducer<F>
where
    T: Send + 'static,
    F: FnMut(&Pusher<T>) -> StreamResult<()> + Send,
{
    fn read<'a>(&'a mut self, out: &'a Pusher<T>) -> BoxFuture<'a, StreamResult<()>> {
        Box::pin(future::ready((self.0)(out)))
    }
}

struct ItemsProducer<I>(I);

impl<T, I> Produce<T> for ItemsProducer<I>
where
    T: Send + 'static,
    I: Iterator<Item = T> + Send,
{
    fn read<'a>(&'a mut self, out: &'a Pusher<T>) -> BoxFuture<'a, StreamResult<()>> {
        out.push(self.0.next());
        Box::pin(future::ready(Ok(())))
    }
}

/// Result of [`ReadCore::pull`]
pub(crate) enum Pull<T> {
    Item(T),
    End,
    Held,
}

pub(crate) struct ReadState<T> {
    buffer: ObjectBuffer<T>,
    /// End of sequence was pushed
    ended: bool,
    end_emitted: bool,
    paused: bool,
    /// A consumer has asked for items at least once
    wanted: bool,
    pushes: u64,
    error: Option<StreamError>,
    destroyed: bool,
}

impl<T> ReadState<T> {
    fn new(high_water_mark: usize) -> Self {
        Self {
            buffer: ObjectBuffer::new(high_water_mark),
            ended: false,
            end_emitted: false,
            paused: false,
            wanted: false,
            pushes: 0,
            error: None,
            destroyed: false,
        }
    }

    fn is_done(&self) -> bool {
        self.ended || self.destroyed
    }

    fn producer_may_run(&self) -> bool {
        self.is_done() || (self.wanted && self.buffer.has_room())
    }
}

pub(crate) struct ReadCore<T> {
    state: Mutex<ReadState<T>>,
    hub: EventHub,
    auto_destroy: bool,
}

impl<T> ReadCore<T> {
    fn new(options: &StreamOptions) -> Self {
        Self {
            state: Mutex::new(ReadState::new(options.high_water_mark())),
            hub: EventHub::new(options.name()),
            auto_destroy: options.auto_destroy(),
        }
    }

    /// Check-lock-check wait: sleep on `event` while `blocked` holds
    async fn wait_while(
        &self,
        event: Event,
        debug_hint: &'static str,
        blocked: impl Fn(&ReadState<T>) -> bool + Send,
    ) {
        let lock = self.hub.get_lock();
        let should_wait = blocked(&*self.state.lock());
        if should_wait {
            self.hub.wait_async(event, debug_hint, lock).await;
        } else {
            drop(lock);
        }
    }

    pub(crate) fn push(&self, item: Option<T>) -> bool {
        let mut state = self.state.lock();
        if state.destroyed {
            return false;
        }

        let Some(item) = item else {
            if state.ended {
                return false;
            }
            state.ended = true;
            state.pushes += 1;
            drop(state);

            tracing::trace!(stream = %self.hub.name(), "end of sequence pushed");
            self.hub.emit(Event::Readable);
            self.maybe_emit_end();
            return false;
        };

        if state.ended {
            drop(state);
            self.destroy(Some(StreamError::PushAfterEof));
            return false;
        }

        let below = state.buffer.push_back(item);
        state.pushes += 1;
        drop(state);

        self.hub.emit(Event::Readable);
        below
    }

    pub(crate) fn unshift(&self, item: T) {
        let mut state = self.state.lock();
        if state.destroyed {
            return;
        }
        state.buffer.push_front(item);
        drop(state);
        self.hub.emit(Event::Readable);
    }

    pub(crate) fn read(&self) -> Option<T> {
        let item = {
            let mut state = self.state.lock();
            state.wanted = true;
            state.buffer.pop_front()
        };
        self.after_read();
        item
    }

    pub(crate) async fn next_item(&self) -> StreamResult<Option<T>> {
        match self.pull(false, || false).await? {
            Pull::Item(item) => Ok(Some(item)),
            Pull::End | Pull::Held => Ok(None),
        }
    }

    /// Wait for the next item unless `hold` reports true first
    ///
    /// With `respect_pause`, a paused side also holds. Nothing leaves the
    /// buffer when the result is [`Pull::Held`].
    pub(crate) async fn pull(&self, respect_pause: bool, hold: impl Fn() -> bool + Send) -> StreamResult<Pull<T>> {
        loop {
            if hold() {
                return Ok(Pull::Held);
            }
            {
                let mut state = self.state.lock();
                if let Some(error) = &state.error {
                    return Err(error.clone());
                }
                if respect_pause && state.paused && !state.destroyed {
                    return Ok(Pull::Held);
                }
                state.wanted = true;
                if let Some(item) = state.buffer.pop_front() {
                    drop(state);
                    self.after_read();
                    return Ok(Pull::Item(item));
                }
                if state.ended {
                    drop(state);
                    self.maybe_emit_end();
                    return Ok(Pull::End);
                }
                if state.destroyed {
                    return Err(StreamError::PrematureClose);
                }
            }

            self.hub.emit(Event::Demand);
            self.wait_while(Event::Readable, "reader", |s| {
                s.buffer.is_empty() && !s.is_done()
            })
            .await;
        }
    }

    pub(crate) async fn collect_items(&self) -> StreamResult<Vec<T>> {
        let mut items = Vec::new();
        while let Some(item) = self.next_item().await? {
            items.push(item);
        }
        Ok(items)
    }

    pub(crate) async fn ended(&self) -> StreamResult<()> {
        loop {
            {
                let state = self.state.lock();
                if let Some(error) = &state.error {
                    return Err(error.clone());
                }
                if state.end_emitted {
                    return Ok(());
                }
                if state.destroyed {
                    return Err(StreamError::PrematureClose);
                }
            }
            self.wait_while(Event::End, "ended", |s| !s.end_emitted && !s.destroyed)
                .await;
        }
    }

    /// Wait until the consumer side has room, or the side is gone
    pub(crate) async fn wait_for_room(&self) {
        loop {
            let blocked = {
                let state = self.state.lock();
                !state.buffer.has_room() && !state.destroyed
            };
            if !blocked {
                return;
            }
            self.wait_while(Event::Demand, "room", |s| {
                !s.buffer.has_room() && !s.destroyed
            })
            .await;
        }
    }

    pub(crate) async fn wait_resumed(&self) {
        loop {
            let paused = {
                let state = self.state.lock();
                state.paused && !state.destroyed
            };
            if !paused {
                return;
            }
            self.wait_while(Event::Resume, "paused", |s| s.paused && !s.destroyed)
                .await;
        }
    }

    /// Wait until the side gets paused, or is gone
    pub(crate) async fn paused(&self) {
        loop {
            let running = {
                let state = self.state.lock();
                !state.paused && !state.destroyed
            };
            if !running {
                return;
            }
            self.wait_while(Event::Pause, "pause", |s| !s.paused && !s.destroyed)
                .await;
        }
    }

    async fn wait_for_demand(&self) {
        loop {
            let ready = self.state.lock().producer_may_run();
            if ready {
                return;
            }
            self.wait_while(Event::Demand, "producer", |s| !s.producer_may_run())
                .await;
        }
    }

    async fn wait_for_push(&self, seen: u64) {
        loop {
            let pushed = {
                let state = self.state.lock();
                state.pushes != seen || state.is_done()
            };
            if pushed {
                return;
            }
            self.wait_while(Event::Readable, "producer", |s| {
                s.pushes == seen && !s.is_done()
            })
            .await;
        }
    }

    fn after_read(&self) {
        self.hub.emit(Event::Demand);
        self.maybe_emit_end();
    }

    /// End fires once the sequence is over and a consumer has asked past it
    fn maybe_emit_end(&self) {
        let emit = {
            let mut state = self.state.lock();
            let drained = state.ended && state.buffer.is_empty() && state.wanted;
            if drained && !state.end_emitted && !state.destroyed {
                state.end_emitted = true;
                true
            } else {
                false
            }
        };
        if emit {
            tracing::debug!(stream = %self.hub.name(), "readable ended");
            self.hub.emit(Event::End);
            if self.auto_destroy {
                self.destroy(None);
            }
        }
    }

    pub(crate) fn pause(&self) {
        let changed = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.paused, true)
        };
        if changed {
            self.hub.emit(Event::Pause);
        }
    }

    pub(crate) fn resume(&self) {
        let changed = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.paused, false)
        };
        if changed {
            self.hub.emit(Event::Resume);
        }
    }

    pub(crate) fn destroy(&self, error: Option<StreamError>) {
        {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            if let Some(error) = &error {
                state.error.get_or_insert_with(|| error.clone());
            }
            // Buffered items are dropped
            state.buffer.drain_all();
        }

        if let Some(error) = &error {
            tracing::debug!(stream = %self.hub.name(), %error, "readable failed");
            self.hub.emit(Event::Error);
        }
        self.hub.close();
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub(crate) fn is_ended(&self) -> bool {
        self.state.lock().end_emitted
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    pub(crate) fn error(&self) -> Option<StreamError> {
        self.state.lock().error.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    pub(crate) fn high_water_mark(&self) -> usize {
        self.state.lock().buffer.high_water_mark()
    }

    fn push_count(&self) -> u64 {
        self.state.lock().pushes
    }

    fn is_done(&self) -> bool {
        self.state.lock().is_done()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.hub.subscribe()
    }

    pub(crate) fn name(&self) -> &str {
        self.hub.name()
    }
}

/// Engine worker driving a [`Produce`] implementation
async fn run_producer<T: Send + 'static>(core: Arc<ReadCore<T>>, mut producer: Box<dyn Produce<T>>) {
    let pusher = Pusher {
        core: Arc::clone(&core),
    };
    tracing::trace!(stream = %core.name(), "producer started");

    loop {
        core.wait_for_demand().await;
        if core.is_done() {
            break;
        }

        let seen = core.push_count();
        if let Err(error) = producer.read(&pusher).await {
            core.destroy(Some(error));
            break;
        }
        if core.push_count() == seen {
            core.wait_for_push(seen).await;
        }
    }

    if !core.state.lock().ended {
        let error = core.error();
        producer.destroy(error.as_ref());
    }
    tracing::trace!(stream = %core.name(), "producer stopped");
}

/// Push-only handle to a readable side
///
/// Given to producers and transformers; cheap to clone and to move to other tasks.
pub struct Pusher<T> {
    core: Arc<ReadCore<T>>,
}

impl<T: Send + 'static> Pusher<T> {
    /// Enqueue an item, or end the sequence with `None`
    ///
    /// Returns whether the buffer is still below its high-water mark.
    pub fn push(&self, item: Option<T>) -> bool {
        self.core.push(item)
    }

    /// Fail the readable side
    pub fn destroy(&self, error: Option<StreamError>) {
        self.core.destroy(error);
    }

    #[must_use]
    pub fn readable_length(&self) -> usize {
        self.core.len()
    }
}

impl<T> Clone for Pusher<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> fmt::Debug for Pusher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pusher({})", self.core.hub.name())
    }
}

/// Typed readable stream
///
/// Clones are handles to the same stream. The read-side operations
/// (`push`, `read`, `next_item`, `pipe`, ...) come from [`crate::pipe::Source`].
///
/// Dropping the last handle destroys the stream and stops its producer. A
/// running pipe holds a handle of its own.
pub struct Readable<T> {
    pub(crate) core: Arc<ReadCore<T>>,
    owner: Arc<ReadOwner<T>>,
}

/// Destroys the side once the last user handle is gone
///
/// Engine tasks and pushers hold the core only, so they do not keep it alive.
struct ReadOwner<T>(Arc<ReadCore<T>>);

impl<T> Drop for ReadOwner<T> {
    fn drop(&mut self) {
        if !self.0.is_destroyed() {
            tracing::debug!(stream = %self.0.name(), "last handle dropped");
            self.0.destroy(None);
        }
    }
}

impl<T: Send + 'static> Readable<T> {
    /// A readable fed only by explicit pushes
    #[must_use]
    pub fn new(options: StreamOptions) -> Self {
        let core = Arc::new(ReadCore::new(&options));
        Self {
            owner: Arc::new(ReadOwner(Arc::clone(&core))),
            core,
        }
    }

    /// A readable fed by a producer worker
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn with_producer(producer: impl Produce<T> + 'static, options: StreamOptions) -> Self {
        let readable = Self::new(options);
        tokio::spawn(run_producer(
            Arc::clone(&readable.core),
            Box::new(producer),
        ));
        readable
    }

    /// A readable whose producer is a closure called once per request
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn from_fn<F>(read: F, options: StreamOptions) -> Self
    where
        F: FnMut(&Pusher<T>) -> StreamResult<()> + Send + 'static,
    {
        Self::with_producer(FnProducer(read), options)
    }

    /// A readable over the items of an iterator, ending when it is exhausted
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn from_items<I>(items: I, options: StreamOptions) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::with_producer(ItemsProducer(items.into_iter()), options)
    }

    /// Handle for pushing into this readable from elsewhere
    #[must_use]
    pub fn pusher(&self) -> Pusher<T> {
        Pusher {
            core: Arc::clone(&self.core),
        }
    }

    /// Tear the stream down, optionally with an error
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

    /// Adapt into a `futures` stream
    ///
    /// Yields each item, then stops at end of sequence. A failure is yielded
    /// once as `Err` and ends the stream.
    pub fn into_stream(self) -> impl Stream<Item = StreamResult<T>> + Send {
        futures::stream::unfold(Some(self), |readable| async move {
            let readable = readable?;
            match readable.core.next_item().await {
                Ok(Some(item)) => Some((Ok(item), Some(readable))),
                Ok(None) => None,
                Err(error) => Some((Err(error), None)),
            }
        })
    }
}

impl<T> Clone for Readable<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            owner: Arc::clone(&self.owner),
        }
    }
}

impl<T> fmt::Debug for Readable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.core.state.lock();
        write!(
            f,
            "Readable(name={}, buffered={}, ended={}, destroyed={})",
            self.core.hub.name(),
            state.buffer.len(),
            state.ended,
            state.destroyed
        )
    }
}
