//! # Ring Buffer
//!
//! Fixed-capacity, overwrite-on-full circular queue used to hand work from
//! any number of producer threads to a single consumer loop.
//!
//! ## Load shedding
//!
//! `write` never blocks. When the buffer is full the logically oldest unread
//! item is evicted and handed back to the writer, so callers can count it or
//! fail whatever completion it carried. Under sustained overload the buffer
//! therefore keeps only the newest `capacity` items.
//!
//! ```text
//!   write ──►  [ 3 | 4 | 5 | 1 | 2 ]  ──► read (oldest first)
//!                         ▲
//!                 write_index, full: slot 1 is evicted next
//! ```

use parking_lot::{Condvar, Mutex};

struct Slots<T> {
    slots: Vec<Option<T>>,
    /// Next slot to write.
    write_index: usize,
    /// Number of unread items.
    len: usize,
    /// Once closed, blocking reads return `None`.
    closed: bool,
}

impl<T> Slots<T> {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn read_index(&self) -> usize {
        (self.write_index + self.capacity() - self.len) % self.capacity()
    }

    fn latest_index(&self) -> usize {
        (self.write_index + self.capacity() - 1) % self.capacity()
    }

    fn pop_oldest(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let index = self.read_index();
        self.len -= 1;
        self.slots[index].take()
    }

    fn drain_in_order(&mut self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.len);
        while let Some(item) = self.pop_oldest() {
            items.push(item);
        }
        self.write_index = 0;
        items
    }
}

/// Multi-producer, single-consumer ring buffer with drop-oldest overflow.
pub struct RingBuffer<T> {
    inner: Mutex<Slots<T>>,
    not_empty: Condvar,
}

impl<T> RingBuffer<T> {
    /// Create a buffer holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be greater than 0");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            inner: Mutex::new(Slots {
                slots,
                write_index: 0,
                len: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Append an item without blocking.
    ///
    /// Returns the evicted oldest item when the buffer was already full.
    pub fn write(&self, item: T) -> Option<T> {
        let mut inner = self.inner.lock();
        let capacity = inner.capacity();
        let index = inner.write_index;

        // When full, the write slot is the oldest unread item.
        let evicted = if inner.len == capacity {
            inner.slots[index].take()
        } else {
            inner.len += 1;
            None
        };

        inner.slots[index] = Some(item);
        inner.write_index = (index + 1) % capacity;
        drop(inner);

        self.not_empty.notify_one();
        evicted
    }

    /// Block until an item is available and return the oldest one.
    ///
    /// Returns `None` once the buffer has been closed; remaining items can
    /// still be drained with [`RingBuffer::try_read`].
    pub fn read_blocking(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return None;
            }
            if let Some(item) = inner.pop_oldest() {
                return Some(item);
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Take the oldest item if there is one.
    pub fn try_read(&self) -> Option<T> {
        self.inner.lock().pop_oldest()
    }

    /// Block until an item is available, return the newest one and discard
    /// everything older.
    pub fn read_latest_and_clear(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return None;
            }
            if inner.len > 0 {
                let latest_index = inner.latest_index();
                let latest = inner.slots[latest_index].take();
                inner.slots.iter_mut().for_each(|slot| *slot = None);
                inner.len = 0;
                inner.write_index = 0;
                return latest;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Block until an item is available, return the newest one and remove
    /// every queued item that `supersedes(latest, item)` marks as stale.
    ///
    /// Items that are not superseded stay queued in their original order.
    pub fn read_latest_and_clear_matching<F>(&self, supersedes: F) -> Option<T>
    where
        F: Fn(&T, &T) -> bool,
    {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return None;
            }
            if inner.len > 0 {
                let mut items = inner.drain_in_order();
                let latest = items.pop()?;
                items.retain(|item| !supersedes(&latest, item));

                let capacity = inner.capacity();
                inner.len = items.len();
                inner.write_index = items.len() % capacity;
                for (slot, item) in inner.slots.iter_mut().zip(items) {
                    *slot = Some(item);
                }
                return Some(latest);
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Wake the consumer and make every subsequent blocking read return `None`.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Advisory snapshot; may be stale as soon as it returns.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().len == 0
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity()
    }
}

impl<T> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RingBuffer")
            .field("capacity", &inner.capacity())
            .field("len", &inner.len)
            .field("closed", &inner.closed)
            .finish()
    }
}
