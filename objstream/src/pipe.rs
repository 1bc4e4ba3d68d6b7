//! Source and sink capabilities, and piping between them
//!
//! Every stream kind is either a [`Source`] (has a readable side), a [`Sink`]
//! (has a writable side) or both. All read-side and write-side operations
//! live on these two traits, so `Readable`, `Writable`, `Duplex`,
//! `Transform` and `PassThrough` share one set of signatures.
//!
//! ```ignore
//! source.pipe(parity).pipe(sink.clone());
//! sink.finished().await?;
//! ```

use std::future::Future;
use tokio::sync::broadcast;

use crate::error::StreamResult;
use crate::events::Event;
use crate::options::PipeOptions;
use crate::readable::{Pull, Readable};
use crate::writable::{WriteCallback, Writable};

/// Anything with a typed readable side
pub trait Source {
    type Item: Send + 'static;

    fn as_readable(&self) -> &Readable<Self::Item>;

    /// Enqueue an item, or end the sequence with `None`
    ///
    /// Returns whether the buffer is still below its high-water mark. The
    /// value is advisory: the item is accepted either way.
    fn push(&self, item: Option<Self::Item>) -> bool {
        self.as_readable().core.push(item)
    }

    /// Take the next buffered item without waiting
    ///
    /// `None` means nothing is buffered right now, not necessarily the end of
    /// the sequence; see [`Source::is_readable_ended`].
    fn read(&self) -> Option<Self::Item> {
        self.as_readable().core.read()
    }

    /// Wait for the next item; `Ok(None)` at end of sequence
    fn next_item(&self) -> impl Future<Output = StreamResult<Option<Self::Item>>> + Send + '_ {
        self.as_readable().core.next_item()
    }

    /// Put an item back at the head of the buffer
    fn unshift(&self, item: Self::Item) {
        self.as_readable().core.unshift(item);
    }

    /// Read everything up to end of sequence
    fn collect_items(&self) -> impl Future<Output = StreamResult<Vec<Self::Item>>> + Send + '_ {
        self.as_readable().core.collect_items()
    }

    /// Wait until the last item has been consumed
    fn ended(&self) -> impl Future<Output = StreamResult<()>> + Send + '_ {
        self.as_readable().core.ended()
    }

    /// Stop pipes out of this source until `resume`
    fn pause(&self) {
        self.as_readable().core.pause();
    }

    fn resume(&self) {
        self.as_readable().core.resume();
    }

    fn is_paused(&self) -> bool {
        self.as_readable().core.is_paused()
    }

    fn is_readable_ended(&self) -> bool {
        self.as_readable().core.is_ended()
    }

    fn readable_length(&self) -> usize {
        self.as_readable().core.len()
    }

    fn readable_high_water_mark(&self) -> usize {
        self.as_readable().core.high_water_mark()
    }

    fn readable_events(&self) -> broadcast::Receiver<Event> {
        self.as_readable().core.subscribe()
    }

    /// Connect this source to `destination` and return the destination
    ///
    /// The returned value allows chaining: `a.pipe(b).pipe(c)`.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    fn pipe<D>(&self, destination: D) -> D
    where
        D: Sink<Item = Self::Item>,
    {
        self.pipe_with(destination, PipeOptions::default())
    }

    /// Like [`Source::pipe`], with options
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    fn pipe_with<D>(&self, destination: D, options: PipeOptions) -> D
    where
        D: Sink<Item = Self::Item>,
    {
        spawn_pipe(
            self.as_readable().clone(),
            destination.as_writable().clone(),
            options,
        );
        destination
    }
}

/// Anything with a typed writable side
pub trait Sink {
    type Item: Send + 'static;

    fn as_writable(&self) -> &Writable<Self::Item>;

    /// Queue an item for the consumer
    ///
    /// Returns false once the queue reaches its high-water mark; the caller
    /// should then wait for [`Sink::drained`] before writing more.
    fn write(&self, item: Self::Item) -> bool {
        self.as_writable().core.write(item, None)
    }

    /// Like [`Sink::write`], calling `callback` once the item was consumed or failed
    fn write_with<F>(&self, item: Self::Item, callback: F) -> bool
    where
        F: FnOnce(StreamResult<()>) + Send + 'static,
    {
        let callback: WriteCallback = Box::new(callback);
        self.as_writable().core.write(item, Some(callback))
    }

    /// Write and wait until the item has been consumed
    fn send(&self, item: Self::Item) -> impl Future<Output = StreamResult<()>> + Send + '_ {
        self.as_writable().core.send(item)
    }

    /// Declare end of input
    fn end(&self) {
        self.as_writable().core.end();
    }

    /// Write a last item, then declare end of input
    fn end_with(&self, item: Self::Item) {
        self.as_writable().core.write(item, None);
        self.as_writable().core.end();
    }

    /// Hold items back until the matching `uncork`
    fn cork(&self) {
        self.as_writable().core.cork();
    }

    fn uncork(&self) {
        self.as_writable().core.uncork();
    }

    /// Wait for the queue to empty after `write` returned false
    fn drained(&self) -> impl Future<Output = ()> + Send + '_ {
        self.as_writable().core.drained()
    }

    /// Wait until every item was consumed and the final hook ran
    fn finished(&self) -> impl Future<Output = StreamResult<()>> + Send + '_ {
        self.as_writable().core.finished()
    }

    fn is_writable_ending(&self) -> bool {
        self.as_writable().core.is_ending()
    }

    fn is_writable_finished(&self) -> bool {
        self.as_writable().core.is_finished()
    }

    fn writable_needs_drain(&self) -> bool {
        self.as_writable().core.needs_drain()
    }

    fn writable_length(&self) -> usize {
        self.as_writable().core.len()
    }

    fn writable_high_water_mark(&self) -> usize {
        self.as_writable().core.high_water_mark()
    }

    fn writable_events(&self) -> broadcast::Receiver<Event> {
        self.as_writable().core.subscribe()
    }
}

impl<T: Send + 'static> Source for Readable<T> {
    type Item = T;

    fn as_readable(&self) -> &Readable<T> {
        self
    }
}

impl<T: Send + 'static> Sink for Writable<T> {
    type Item = T;

    fn as_writable(&self) -> &Writable<T> {
        self
    }
}

/// Move items from `source` to `destination` until the source ends
///
/// Honors the destination's backpressure and the source's pause state. An
/// item only leaves the source once the destination accepts it, so pausing
/// the source or destroying the destination never strands one in between.
/// The pipe stops without ending the destination when the source fails or
/// the destination goes away.
fn spawn_pipe<T: Send + 'static>(source: Readable<T>, destination: Writable<T>, options: PipeOptions) {
    tokio::spawn(async move {
        tracing::debug!(
            source = %source.name(),
            destination = %destination.name(),
            "pipe started"
        );
        let mut moved = 0_u64;

        loop {
            source.core.wait_resumed().await;

            let pulled = tokio::select! {
                biased;
                pulled = source.core.pull(true, || destination.is_destroyed()) => pulled,
                () = destination.core.closed() => Ok(Pull::Held),
                () = source.core.paused() => Ok(Pull::Held),
            };

            match pulled {
                Ok(Pull::Item(item)) => match destination.core.offer(item) {
                    Ok(true) => moved += 1,
                    Ok(false) => {
                        moved += 1;
                        destination.core.drained().await;
                    }
                    Err(item) => {
                        source.core.unshift(item);
                        tracing::debug!(destination = %destination.name(), "destination refused item, unpiping");
                        break;
                    }
                },
                Ok(Pull::Held) => {
                    if destination.is_destroyed() {
                        tracing::debug!(destination = %destination.name(), "destination closed, unpiping");
                        break;
                    }
                }
                Ok(Pull::End) => {
                    if options.end() {
                        destination.core.end();
                    }
                    break;
                }
                Err(error) => {
                    tracing::debug!(source = %source.name(), %error, "source failed, unpiping");
                    break;
                }
            }
        }

        tracing::debug!(
            source = %source.name(),
            destination = %destination.name(),
            moved,
            "pipe stopped"
        );
    });
}
