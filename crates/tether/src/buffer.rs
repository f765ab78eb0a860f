//! Fixed-capacity retention of outbound messages.
//!
//! A [`BoundedBuffer`] holds at most `capacity` items in arrival order and
//! decides what happens at capacity according to its [`EvictionPolicy`]:
//!
//! - [`EvictionPolicy::DropNewest`] ("fixed queue") keeps the first items and
//!   rejects everything after them until the buffer is cleared or rebuilt.
//! - [`EvictionPolicy::EvictOldest`] ("ring buffer") always accepts, evicting
//!   the oldest retained item for each new one.
//!
//! Storage is a preallocated slot array addressed through a head index and a
//! length, so `clear` is O(1) and wraparound is explicit.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TetherError;

/// What a full buffer does with a new item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EvictionPolicy {
    /// Reject new items once full; retained items are never evicted.
    #[serde(rename = "fixed_queue", alias = "drop_newest")]
    DropNewest,
    /// Accept every item, evicting the oldest retained one to make room.
    #[default]
    #[serde(rename = "ring_buffer", alias = "evict_oldest")]
    EvictOldest,
}

impl EvictionPolicy {
    /// Canonical configuration name of the policy.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DropNewest => "fixed_queue",
            Self::EvictOldest => "ring_buffer",
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionPolicy {
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed_queue" | "drop_newest" => Ok(Self::DropNewest),
            "ring_buffer" | "evict_oldest" => Ok(Self::EvictOldest),
            other => Err(TetherError::Config(format!(
                "unknown eviction policy '{other}' (expected 'fixed_queue' or 'ring_buffer')"
            ))),
        }
    }
}

/// A fixed-capacity, insertion-ordered container.
///
/// Slots retired by [`clear`](Self::clear) keep their old value until they
/// are written again or the buffer is dropped.
#[derive(Debug, Clone)]
pub struct BoundedBuffer<T> {
    slots: Box<[Option<T>]>,
    /// Slot index of the oldest retained item.
    head: usize,
    len: usize,
    policy: EvictionPolicy,
}

impl<T> BoundedBuffer<T> {
    /// Create an empty buffer.
    #[must_use]
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
            head: 0,
            len: 0,
            policy,
        }
    }

    /// Maximum number of retained items.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Eviction policy applied at capacity.
    #[must_use]
    pub const fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Number of retained items.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether no items are retained.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the buffer holds `capacity` items.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Append one item, returning whether it was retained.
    pub fn push(&mut self, item: T) -> bool {
        let capacity = self.capacity();
        if capacity == 0 {
            return false;
        }

        if self.len < capacity {
            let tail = (self.head + self.len) % capacity;
            self.slots[tail] = Some(item);
            self.len += 1;
            return true;
        }

        match self.policy {
            EvictionPolicy::DropNewest => false,
            EvictionPolicy::EvictOldest => {
                // When full, the oldest slot is also the next write position.
                self.slots[self.head] = Some(item);
                self.head = (self.head + 1) % capacity;
                true
            }
        }
    }

    /// Append items in order, returning how many were retained.
    ///
    /// Under [`EvictionPolicy::EvictOldest`] every item counts as retained
    /// even if a later item in the same call evicts it.
    pub fn add<I>(&mut self, items: I) -> usize
    where
        I: IntoIterator<Item = T>,
    {
        let mut accepted = 0;
        for item in items {
            // A rejection means nothing after it can be retained either.
            if !self.push(item) {
                break;
            }
            accepted += 1;
        }
        accepted
    }

    /// Forget every retained item. Capacity and policy are unchanged.
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// Iterate over retained items, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let capacity = self.capacity();
        (0..self.len).filter_map(move |offset| self.slots[(self.head + offset) % capacity].as_ref())
    }

    /// Visit retained items, oldest first.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&T),
    {
        for item in self.iter() {
            visit(item);
        }
    }

    /// Copy retained items into a vector, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.iter().cloned().collect()
    }

    /// Move every retained item out, oldest first, leaving the buffer empty.
    ///
    /// Items not consumed before the iterator is dropped are discarded.
    pub fn drain(&mut self) -> Drain<'_, T> {
        Drain { buffer: self }
    }

    /// Replace this buffer with one of a new shape, replaying the current
    /// contents oldest-first under the new policy.
    ///
    /// Returns how many items did not survive the move.
    pub fn rebuild(&mut self, capacity: usize, policy: EvictionPolicy) -> usize {
        let carried = self.len;
        let mut next = Self::new(capacity, policy);
        next.add(self.drain());
        *self = next;
        carried - self.len
    }
}

/// Draining iterator returned by [`BoundedBuffer::drain`].
#[derive(Debug)]
pub struct Drain<'a, T> {
    buffer: &'a mut BoundedBuffer<T>,
}

impl<T> Iterator for Drain<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let buffer = &mut *self.buffer;
        if buffer.len == 0 {
            return None;
        }
        let item = buffer.slots[buffer.head].take();
        buffer.head = (buffer.head + 1) % buffer.slots.len();
        buffer.len -= 1;
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.buffer.len, Some(self.buffer.len))
    }
}

impl<T> Drop for Drain<'_, T> {
    fn drop(&mut self) {
        for _ in &mut *self {}
        self.buffer.clear();
    }
}
