//! Transform and PassThrough
//!
//! A transform is a duplex whose output is produced only by consuming input.
//! Its write side hands each item to a [`Transformer`]; whatever the
//! transformer returns or pushes lands on the read side, in order.

use futures::future::{self, BoxFuture};
use std::fmt;
use std::sync::Arc;

use crate::duplex::Duplex;
use crate::error::{StreamError, StreamResult};
use crate::options::DuplexOptions;
use crate::pipe::{Sink, Source};
use crate::readable::{Pusher, ReadCore, Readable};
use crate::writable::{Consume, Writable};

/// Transform extension point
pub trait Transformer<TWrite, TRead>: Send
where
    TWrite: Send + 'static,
    TRead: Send + 'static,
{
    /// Turn one input item into output
    ///
    /// A returned `Some` is pushed as the item's result. Additional outputs
    /// are pushed through `out` before returning; `None` produces nothing.
    fn transform<'a>(
        &'a mut self,
        item: TWrite,
        out: &'a Pusher<TRead>,
    ) -> BoxFuture<'a, StreamResult<Option<TRead>>>;

    /// Runs once after all input was transformed, before end of sequence
    fn flush<'a>(&'a mut self, _out: &'a Pusher<TRead>) -> BoxFuture<'a, StreamResult<()>> {
        Box::pin(future::ready(Ok(())))
    }
}

struct FnTransformer<F>(F);

impl<TWrite, TRead, F> Transformer<TWrite, TRead> for FnTransformer<F>
where
    TWrite: Send + 'static,
    TRead: Send + 'static,
    F: FnMut(TWrite, &Pusher<TRead>) -> StreamResult<Option<TRead>> + Send,
{
    fn transform<'a>(
        &'a mut self,
        item: TWrite,
        out: &'a Pusher<TRead>,
    ) -> BoxFuture<'a, StreamResult<Option<TRead>>> {
        Box::pin(future::ready((self.0)(item, out)))
    }
}

struct Identity;

impl<T: Send + 'static> Transformer<T, T> for Identity {
    fn transform<'a>(&'a mut self, item: T, _out: &'a Pusher<T>) -> BoxFuture<'a, StreamResult<Option<T>>> {
        Box::pin(future::ready(Ok(Some(item))))
    }
}

/// Write side of a transform: feeds the transformer, pushes into the read side
struct TransformConsumer<TWrite, TRead> {
    transformer: Box<dyn Transformer<TWrite, TRead>>,
    out: Pusher<TRead>,
    read_side: Arc<ReadCore<TRead>>,
}

impl<TWrite, TRead> Consume<TWrite> for TransformConsumer<TWrite, TRead>
where
    TWrite: Send + 'static,
    TRead: Send + 'static,
{
    fn write(&mut self, item: TWrite) -> BoxFuture<'_, StreamResult<()>> {
        Box::pin(async move {
            if let Some(output) = self.transformer.transform(item, &self.out).await? {
                self.out.push(Some(output));
            }
            // Hold the next input back until the read side has room
            self.read_side.wait_for_room().await;
            Ok::<(), StreamError>(())
        })
    }

    fn finalize(&mut self) -> BoxFuture<'_, StreamResult<()>> {
        Box::pin(async move {
            self.transformer.flush(&self.out).await?;
            self.out.push(None);
            Ok::<(), StreamError>(())
        })
    }

    fn destroy(&mut self, error: Option<&StreamError>) {
        self.out.destroy(error.cloned());
    }
}

/// Typed transform from `TWrite` input to `TRead` output
pub struct Transform<TWrite, TRead> {
    duplex: Duplex<TWrite, TRead>,
}

impl<TWrite, TRead> Transform<TWrite, TRead>
where
    TWrite: Send + 'static,
    TRead: Send + 'static,
{
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new(transformer: impl Transformer<TWrite, TRead> + 'static, options: DuplexOptions) -> Self {
        let readable = Readable::new(options.readable().clone());
        let consumer = TransformConsumer {
            transformer: Box::new(transformer),
            out: readable.pusher(),
            read_side: Arc::clone(&readable.core),
        };
        let writable = Writable::new(consumer, options.writable().clone());
        Self {
            duplex: Duplex::from_parts(readable, writable, options.allow_half_open()),
        }
    }

    /// Transform with a closure that may also push extra outputs
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn from_fn<F>(transform: F, options: DuplexOptions) -> Self
    where
        F: FnMut(TWrite, &Pusher<TRead>) -> StreamResult<Option<TRead>> + Send + 'static,
    {
        Self::new(FnTransformer(transform), options)
    }

    /// One output per input
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn map<F>(mut map: F, options: DuplexOptions) -> Self
    where
        F: FnMut(TWrite) -> TRead + Send + 'static,
    {
        Self::from_fn(move |item, _: &Pusher<TRead>| Ok(Some(map(item))), options)
    }

    /// At most one output per input
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn filter_map<F>(mut filter_map: F, options: DuplexOptions) -> Self
    where
        F: FnMut(TWrite) -> Option<TRead> + Send + 'static,
    {
        Self::from_fn(move |item, _: &Pusher<TRead>| Ok(filter_map(item)), options)
    }

    #[must_use]
    pub fn as_duplex(&self) -> &Duplex<TWrite, TRead> {
        &self.duplex
    }

    pub fn destroy(&self, error: Option<StreamError>) {
        self.duplex.destroy(error);
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.duplex.is_destroyed()
    }

    #[must_use]
    pub fn error(&self) -> Option<StreamError> {
        self.duplex.error()
    }
}

impl<TWrite, TRead> Clone for Transform<TWrite, TRead> {
    fn clone(&self) -> Self {
        Self {
            duplex: self.duplex.clone(),
        }
    }
}

impl<TWrite, TRead> fmt::Debug for Transform<TWrite, TRead> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transform({:?})", self.duplex)
    }
}

impl<TWrite: Send + 'static, TRead: Send + 'static> Source for Transform<TWrite, TRead> {
    type Item = TRead;

    fn as_readable(&self) -> &Readable<TRead> {
        self.duplex.readable()
    }
}

impl<TWrite: Send + 'static, TRead: Send + 'static> Sink for Transform<TWrite, TRead> {
    type Item = TWrite;

    fn as_writable(&self) -> &Writable<TWrite> {
        self.duplex.writable()
    }
}

/// Transform that forwards every item unchanged
pub struct PassThrough<T> {
    transform: Transform<T, T>,
}

impl<T: Send + 'static> PassThrough<T> {
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    #[must_use]
    pub fn new(options: DuplexOptions) -> Self {
        Self {
            transform: Transform::new(Identity, options),
        }
    }

    #[must_use]
    pub fn as_transform(&self) -> &Transform<T, T> {
        &self.transform
    }

    pub fn destroy(&self, error: Option<StreamError>) {
        self.transform.destroy(error);
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.transform.is_destroyed()
    }

    #[must_use]
    pub fn error(&self) -> Option<StreamError> {
        self.transform.error()
    }
}

impl<T> Clone for PassThrough<T> {
    fn clone(&self) -> Self {
        Self {
            transform: self.transform.clone(),
        }
    }
}

impl<T> fmt::Debug for PassThrough<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PassThrough({:?})", self.transform.duplex)
    }
}

impl<T: Send + 'static> Source for PassThrough<T> {
    type Item = T;

    fn as_readable(&self) -> &Readable<T> {
        self.transform.as_readable()
    }
}

impl<T: Send + 'static> Sink for PassThrough<T> {
    type Item = T;

    fn as_writable(&self) -> &Writable<T> {
        self.transform.as_writable()
    }
}
