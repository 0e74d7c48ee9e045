//! # Circular Sample Buffer
//!
//! Fixed-capacity FIFO of 16-bit samples shared between one producer and one
//! consumer thread. All operations take the same mutex, so every call sees a
//! consistent `head`/`tail`/`count` triple.
//!
//! ## Write Policies:
//! - **write**: all-or-nothing, fails when the samples do not fit
//! - **write_force**: always succeeds, overwriting the oldest samples
//!
//! Reads are destructive and exact: `read(n)` either returns `n` samples in
//! arrival order or fails without touching the buffer.

use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RingBufferError {
    #[error("buffer full: {requested} samples requested, {free} free")]
    Full { requested: usize, free: usize },

    #[error("buffer empty: {requested} samples requested, {available} available")]
    Empty { requested: usize, available: usize },
}

struct Slots {
    data: Vec<i16>,
    /// Next index to read
    head: usize,
    /// Next index to write
    tail: usize,
    count: usize,
}

impl Slots {
    fn push_overwrite(&mut self, sample: i16) {
        let capacity = self.data.len();
        self.data[self.tail] = sample;
        self.tail = (self.tail + 1) % capacity;
        if self.count == capacity {
            // the oldest sample was just overwritten
            self.head = (self.head + 1) % capacity;
        } else {
            self.count += 1;
        }
    }

    fn pop_into(&mut self, out: &mut Vec<i16>, n: usize) {
        let capacity = self.data.len();
        for _ in 0..n {
            out.push(self.data[self.head]);
            self.head = (self.head + 1) % capacity;
        }
        self.count -= n;
    }
}

/// Thread-safe circular buffer of audio samples.
pub struct RingBuffer {
    slots: Mutex<Slots>,
    capacity: usize,
}

impl RingBuffer {
    /// Create an empty buffer holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Slots {
                data: vec![0; capacity],
                head: 0,
                tail: 0,
                count: 0,
            }),
            capacity,
        }
    }

    /// Samples are plain data, so a panic on another thread while holding the
    /// lock cannot leave them in an unsafe state. Keep going with what is there.
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append all of `samples`, or nothing if they do not fit.
    pub fn write(&self, samples: &[i16]) -> Result<(), RingBufferError> {
        let mut slots = self.lock();
        let free = self.capacity - slots.count;
        if samples.len() > free {
            return Err(RingBufferError::Full {
                requested: samples.len(),
                free,
            });
        }
        for &sample in samples {
            slots.push_overwrite(sample);
        }
        Ok(())
    }

    /// Append `samples`, dropping the oldest content when space runs out.
    ///
    /// If `samples` alone is longer than the buffer, only its trailing
    /// `capacity` samples are kept.
    pub fn write_force(&self, samples: &[i16]) {
        if self.capacity == 0 {
            return;
        }

        let mut slots = self.lock();
        if samples.len() >= self.capacity {
            let keep = &samples[samples.len() - self.capacity..];
            slots.data.copy_from_slice(keep);
            slots.head = 0;
            slots.tail = 0;
            slots.count = self.capacity;
            return;
        }
        for &sample in samples {
            slots.push_overwrite(sample);
        }
    }

    /// Remove and return exactly `n` of the oldest samples.
    pub fn read(&self, n: usize) -> Result<Vec<i16>, RingBufferError> {
        let mut slots = self.lock();
        if slots.count < n {
            return Err(RingBufferError::Empty {
                requested: n,
                available: slots.count,
            });
        }
        let mut out = Vec::with_capacity(n);
        slots.pop_into(&mut out, n);
        Ok(out)
    }

    /// Remove and return everything currently buffered.
    pub fn drain(&self) -> Vec<i16> {
        let mut slots = self.lock();
        let n = slots.count;
        let mut out = Vec::with_capacity(n);
        slots.pop_into(&mut out, n);
        out
    }

    /// Drop up to `n` of the oldest samples. Returns how many were dropped.
    pub fn discard(&self, n: usize) -> usize {
        let mut slots = self.lock();
        let n = n.min(slots.count);
        if n > 0 {
            slots.head = (slots.head + n) % self.capacity;
            slots.count -= n;
        }
        n
    }

    pub fn available(&self) -> usize {
        self.lock().count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discard all content. Capacity is unchanged.
    pub fn reset(&self) {
        let mut slots = self.lock();
        slots.head = 0;
        slots.tail = 0;
        slots.count = 0;
    }
}
