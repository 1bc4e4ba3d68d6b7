//! Construction-time options
//!
//! Options are read once when a stream is built. There is deliberately no
//! object-mode switch and no encoding: every stream carries whole values.

/// Default buffer limit, counted in items
pub const DEFAULT_HIGH_WATER_MARK: usize = 16;

/// Options of a single stream side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOptions {
    high_water_mark: usize,
    name: String,
    auto_destroy: bool,
}

impl StreamOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered items at which `push`/`write` start returning false
    #[must_use]
    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = high_water_mark;
        self
    }

    /// Debug hint shown in log records
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Close the stream on its own once it has ended (readable) or finished (writable)
    #[must_use]
    pub fn with_auto_destroy(mut self, auto_destroy: bool) -> Self {
        self.auto_destroy = auto_destroy;
        self
    }

    #[must_use]
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn auto_destroy(&self) -> bool {
        self.auto_destroy
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            name: "stream".to_string(),
            auto_destroy: true,
        }
    }
}

/// Options of a two-sided stream (duplex, transform, pass-through)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplexOptions {
    readable: StreamOptions,
    writable: StreamOptions,
    allow_half_open: bool,
}

impl DuplexOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_readable(mut self, readable: StreamOptions) -> Self {
        self.readable = readable;
        self
    }

    #[must_use]
    pub fn with_writable(mut self, writable: StreamOptions) -> Self {
        self.writable = writable;
        self
    }

    /// When false, the write side is ended as soon as the read side ends
    #[must_use]
    pub fn with_allow_half_open(mut self, allow_half_open: bool) -> Self {
        self.allow_half_open = allow_half_open;
        self
    }

    #[must_use]
    pub fn readable(&self) -> &StreamOptions {
        &self.readable
    }

    #[must_use]
    pub fn writable(&self) -> &StreamOptions {
        &self.writable
    }

    #[must_use]
    pub fn allow_half_open(&self) -> bool {
        self.allow_half_open
    }
}

impl Default for DuplexOptions {
    fn default() -> Self {
        Self::from(StreamOptions::default().with_name("duplex"))
    }
}

impl From<StreamOptions> for DuplexOptions {
    /// Use the same settings for both sides, suffixing the side to the name
    fn from(options: StreamOptions) -> Self {
        let readable_name = format!("{}.readable", options.name());
        let writable_name = format!("{}.writable", options.name());
        Self {
            readable: options.clone().with_name(readable_name),
            writable: options.with_name(writable_name),
            allow_half_open: true,
        }
    }
}

/// Options of [`crate::pipe::Source::pipe_with`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeOptions {
    end: bool,
}

impl PipeOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// End the destination when the source reaches end of sequence
    #[must_use]
    pub fn with_end(mut self, end: bool) -> Self {
        self.end = end;
        self
    }

    #[must_use]
    pub fn end(&self) -> bool {
        self.end
    }
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self { end: true }
    }
}
