//! Duplex: an independent readable side and writable side in one value
//!
//! The two sides carry unrelated payload types and are not coupled by the
//! engine. The only link is `allow_half_open = false`, which ends the write
//! side once the read side has ended.

use std::fmt;
use std::sync::Arc;

use crate::error::StreamError;
use crate::options::DuplexOptions;
use crate::pipe::{Sink, Source};
use crate::readable::{Produce, Pusher, Readable};
use crate::writable::{Consume, Writable};

pub struct Duplex<TWrite, TRead> {
    readable: Readable<TRead>,
    writable: Writable<TWrite>,
}

impl<TWrite, TRead> Duplex<TWrite, TRead>
where
    TWrite: Send + 'static,
    TRead: Send + 'static,
{
    /// Build both sides from their extension points
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new(
        producer: impl Produce<TRead> + 'static,
        consumer: impl Consume<TWrite> + 'static,
        options: DuplexOptions,
    ) -> Self {
        let readable = Readable::with_producer(producer, options.readable().clone());
        let writable = Writable::new(consumer, options.writable().clone());
        Self::from_parts(readable, writable, options.allow_half_open())
    }

    /// Combine existing sides
    ///
    /// # Panics
    ///
    /// Panics if `allow_half_open` is false and this is called outside of a
    /// Tokio runtime.
    pub fn from_parts(readable: Readable<TRead>, writable: Writable<TWrite>, allow_half_open: bool) -> Self {
        if !allow_half_open {
            let read_core = Arc::clone(&readable.core);
            let write_core = Arc::clone(&writable.core);
            tokio::spawn(async move {
                if read_core.ended().await.is_ok() {
                    tracing::debug!(stream = %write_core.name(), "read side ended, ending write side");
                    write_core.end();
                }
            });
        }
        Self { readable, writable }
    }

    #[must_use]
    pub fn readable(&self) -> &Readable<TRead> {
        &self.readable
    }

    #[must_use]
    pub fn writable(&self) -> &Writable<TWrite> {
        &self.writable
    }

    /// Handle for pushing into the read side from elsewhere
    #[must_use]
    pub fn pusher(&self) -> Pusher<TRead> {
        self.readable.pusher()
    }

    /// Tear down both sides
    pub fn destroy(&self, error: Option<StreamError>) {
        self.writable.destroy(error.clone());
        self.readable.destroy(error);
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.readable.is_destroyed() && self.writable.is_destroyed()
    }

    /// The first failure seen by either side
    #[must_use]
    pub fn error(&self) -> Option<StreamError> {
        self.readable.error().or_else(|| self.writable.error())
    }
}

impl<TWrite, TRead> Clone for Duplex<TWrite, TRead> {
    fn clone(&self) -> Self {
        Self {
            readable: self.readable.clone(),
            writable: self.writable.clone(),
        }
    }
}

impl<TWrite, TRead> fmt::Debug for Duplex<TWrite, TRead> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Duplex({:?}, {:?})", self.readable, self.writable)
    }
}

impl<TWrite: Send + 'static, TRead: Send + 'static> Source for Duplex<TWrite, TRead> {
    type Item = TRead;

    fn as_readable(&self) -> &Readable<TRead> {
        &self.readable
    }
}

impl<TWrite: Send + 'static, TRead: Send + 'static> Sink for Duplex<TWrite, TRead> {
    type Item = TWrite;

    fn as_writable(&self) -> &Writable<TWrite> {
        &self.writable
    }
}
