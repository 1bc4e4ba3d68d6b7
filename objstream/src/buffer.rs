//! Object queue with a high-water mark
//!
//! Storage for the items of one stream side. The queue itself never blocks
//! or refuses an item: the watermark only drives the advisory value returned
//! to producers and writers.

use std::collections::VecDeque;

/// FIFO queue of whole items
///
/// # Example
///
/// ```
/// use objstream::buffer::ObjectBuffer;
///
/// let mut buffer = ObjectBuffer::new(2);
/// assert!(buffer.push_back("a"));
/// assert!(!buffer.push_back("b"));
///
/// assert_eq!(buffer.pop_front(), Some("a"));
/// assert!(!buffer.is_full());
/// ```
#[derive(Debug)]
pub struct ObjectBuffer<T> {
    items: VecDeque<T>,
    high_water_mark: usize,
}

impl<T> ObjectBuffer<T> {
    #[must_use]
    pub fn new(high_water_mark: usize) -> Self {
        Self {
            items: VecDeque::new(),
            high_water_mark,
        }
    }

    /// Append an item
    ///
    /// Returns whether the buffer is still below its high-water mark.
    pub fn push_back(&mut self, item: T) -> bool {
        self.items.push_back(item);
        !self.is_full()
    }

    /// Put an item back at the head of the queue
    pub fn push_front(&mut self, item: T) {
        self.items.push_front(item);
    }

    pub fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Take up to `count` items from the head, in order
    pub fn drain_front(&mut self, count: usize) -> Vec<T> {
        let count = count.min(self.items.len());
        self.items.drain(..count).collect()
    }

    /// Take everything
    pub fn drain_all(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    /// Whether the high-water mark has been reached
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.high_water_mark
    }

    /// Whether a producer should be asked for more
    ///
    /// An empty buffer always has room, so a zero watermark still lets
    /// items through one at a time.
    #[must_use]
    pub fn has_room(&self) -> bool {
        self.is_empty() || !self.is_full()
    }
}
