//! Typed object-mode streams
//!
//! Readable, writable, duplex, transform and pass-through streams whose
//! items are whole application values of a fixed type. There is no byte
//! mode and no encoding: a pushed or written value reaches the other end
//! as the same single value.
//!
//! ```text
//!  Readable<T> ──pipe──▶ Transform<T, U> ──pipe──▶ Writable<U>
//!      │                   │           │               │
//!   Produce<T>          Sink<T>     Source<U>       Consume<U>
//! ```
//!
//! Each side owns an [`ObjectBuffer`] bounded by a high-water mark and an
//! [`EventHub`] that wakes waiting tasks. User code plugs in through the
//! [`Produce`], [`Consume`] and [`Transformer`] extension points, which the
//! engine drives from Tokio tasks.

pub mod buffer;
pub mod duplex;
pub mod error;
pub mod events;
pub mod options;
pub mod pipe;
pub mod readable;
pub mod transform;
pub mod writable;


// Re-export stream types for convenience
pub use duplex::Duplex;
pub use readable::{Produce, Pusher, Readable};
pub use transform::{PassThrough, Transform, Transformer};
pub use writable::{Consume, WriteCallback, Writable};

// Re-export capability traits for convenience
pub use pipe::{Sink, Source};

// Re-export supporting types
pub use buffer::ObjectBuffer;
pub use error::{StreamError, StreamResult};
pub use events::{Event, EventHub};
pub use options::{DuplexOptions, PipeOptions, StreamOptions, DEFAULT_HIGH_WATER_MARK};
