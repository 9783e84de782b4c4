//! Bounded history of the most recent microphone samples.
//!
//! The barge-in monitor only ever asks "how loud were the last N samples?",
//! so the history keeps a sliding window of at most `capacity` samples and
//! hands out copies of its tail.  Old samples fall off the front as new
//! frames arrive.
//!
//! ```rust
//! use voice_bridge::audio::RingBuffer;
//!
//! let mut history = RingBuffer::new(4);
//! history.push_slice(&[1.0, 2.0, 3.0, 4.0, 5.0]);
//! assert_eq!(history.latest(2), vec![4.0, 5.0]);
//! assert_eq!(history.latest(10), vec![2.0, 3.0, 4.0, 5.0]);
//! ```

use std::collections::VecDeque;

pub struct RingBuffer<T> {
    window: VecDeque<T>,
    capacity: usize,
}

impl<T: Copy> RingBuffer<T> {
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingBuffer capacity must be > 0");
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame.  Only the newest `capacity` samples survive.
    pub fn push_slice(&mut self, frame: &[T]) {
        let keep = &frame[frame.len().saturating_sub(self.capacity)..];
        let overflow = (self.window.len() + keep.len()).saturating_sub(self.capacity);
        self.window.drain(..overflow);
        self.window.extend(keep.iter().copied());
    }

    /// The newest `n` samples, oldest first.  Fewer if fewer are held.
    pub fn latest(&self, n: usize) -> Vec<T> {
        let skip = self.window.len().saturating_sub(n);
        self.window.iter().skip(skip).copied().collect()
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
