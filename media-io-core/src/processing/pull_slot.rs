//! Single-slot hand-off between a playback worker and a device callback.
//!
//! The worker (producer) publishes one chunk at a time; the callback
//! (consumer) pulls from it in whatever block size the device asks for and
//! pads with silence when the slot runs dry. The consumer side never
//! blocks and never allocates.
//!
//! Ownership of the buffer alternates, keyed on `remaining`:
//!
//! ```text
//! remaining == 0  → producer may write buffer + len, then store remaining (Release)
//! remaining  > 0  → consumer may read buffer[len - remaining ..], then store remaining
//! ```

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Slot {
    buffer: UnsafeCell<Vec<u8>>,
    len: AtomicUsize,
    remaining: AtomicUsize,
    last_pull: AtomicUsize,
}

// SAFETY: `buffer` is only touched by the side that currently owns it, as
// decided by `remaining`. The producer writes only after observing 0 with
// Acquire and publishes with a Release store; the consumer reads only after
// observing a non-zero value with Acquire and hands back with Release. Each
// half is unique (not Clone), so there is exactly one reader and one writer.
unsafe impl Sync for Slot {}

/// Create a slot able to hold chunks of up to `capacity` bytes.
pub fn pull_slot(capacity: usize) -> (SlotProducer, SlotConsumer) {
    let slot = Arc::new(Slot {
        buffer: UnsafeCell::new(vec![0u8; capacity]),
        len: AtomicUsize::new(0),
        remaining: AtomicUsize::new(0),
        last_pull: AtomicUsize::new(0),
    });
    (SlotProducer { slot: slot.clone() }, SlotConsumer { slot })
}

/// Writing half, held by the playback worker.
pub struct SlotProducer {
    slot: Arc<Slot>,
}

impl SlotProducer {
    /// Whether the consumer still has unread bytes.
    pub fn is_pending(&self) -> bool {
        self.slot.remaining.load(Ordering::Acquire) > 0
    }

    pub fn capacity(&self) -> usize {
        // SAFETY: the Vec's length never changes after construction, and
        // reading it does not race with the consumer's byte copies.
        unsafe { (*self.slot.buffer.get()).len() }
    }

    /// Publish `chunk` if the slot is free.
    ///
    /// Returns the number of bytes published, or `None` while the consumer
    /// still holds the previous chunk. Chunks longer than the capacity are
    /// truncated.
    pub fn try_publish(&mut self, chunk: &[u8]) -> Option<usize> {
        if self.slot.remaining.load(Ordering::Acquire) != 0 {
            return None;
        }
        if chunk.is_empty() {
            return Some(0);
        }

        // SAFETY: remaining == 0, so the consumer will not read the buffer
        // until the Release store below.
        let buffer = unsafe { &mut *self.slot.buffer.get() };
        let n = chunk.len().min(buffer.len());
        buffer[..n].copy_from_slice(&chunk[..n]);
        self.slot.len.store(n, Ordering::Relaxed);
        self.slot.remaining.store(n, Ordering::Release);
        Some(n)
    }

    /// Size of the most recent pull from the consumer, in bytes.
    pub fn last_pull(&self) -> usize {
        self.slot.last_pull.load(Ordering::Relaxed)
    }
}

/// Reading half, moved into the device callback.
pub struct SlotConsumer {
    slot: Arc<Slot>,
}

impl SlotConsumer {
    /// Fill `out` from the published chunk and pad the rest with zeroes.
    ///
    /// Returns the number of real bytes copied.
    pub fn fill(&mut self, out: &mut [u8]) -> usize {
        self.fill_with(out, 0)
    }

    /// As [`fill`](Self::fill), padding with `silence` (0x80 for unsigned
    /// 8-bit samples).
    pub fn fill_with(&mut self, out: &mut [u8], silence: u8) -> usize {
        self.slot.last_pull.store(out.len(), Ordering::Relaxed);

        let remaining = self.slot.remaining.load(Ordering::Acquire);
        let mut copied = 0;
        if remaining > 0 {
            let len = self.slot.len.load(Ordering::Relaxed);
            let start = len - remaining;
            copied = remaining.min(out.len());

            // SAFETY: remaining > 0, so the producer will not write the
            // buffer until we store 0 below.
            let buffer = unsafe { &*self.slot.buffer.get() };
            out[..copied].copy_from_slice(&buffer[start..start + copied]);
            self.slot.remaining.store(remaining - copied, Ordering::Release);
        }

        out[copied..].fill(silence);
        copied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn chunk_is_pulled_across_several_callbacks() {
        let (mut producer, mut consumer) = pull_slot(8);
        assert_eq!(producer.try_publish(&[1, 2, 3, 4, 5]), Some(5));
        assert!(producer.is_pending());
        assert_eq!(producer.try_publish(&[9]), None);

        let mut out = [0xffu8; 3];
        assert_eq!(consumer.fill(&mut out), 3);
        assert_eq!(out, [1, 2, 3]);

        assert_eq!(consumer.fill(&mut out), 2);
        assert_eq!(out, [4, 5, 0]);
        assert!(!producer.is_pending());
        assert_eq!(producer.last_pull(), 3);
    }

    #[test]
    fn empty_slot_yields_silence() {
        let (_producer, mut consumer) = pull_slot(4);
        let mut out = [7u8; 4];
        assert_eq!(consumer.fill_with(&mut out, 0x80), 0);
        assert_eq!(out, [0x80; 4]);
    }

    #[test]
    fn oversized_chunk_is_truncated() {
        let (mut producer, mut consumer) = pull_slot(2);
        assert_eq!(producer.capacity(), 2);
        assert_eq!(producer.try_publish(&[1, 2, 3]), Some(2));
        let mut out = [0u8; 4];
        assert_eq!(consumer.fill(&mut out), 2);
        assert_eq!(out, [1, 2, 0, 0]);
    }

    #[test]
    fn bytes_arrive_in_order_across_threads() {
        let (mut producer, mut consumer) = pull_slot(64);
        let total: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();

        let expected = total.clone();
        let reader = thread::spawn(move || {
            let mut received = Vec::new();
            let mut block = [0u8; 48];
            while received.len() < expected.len() {
                let n = consumer.fill(&mut block);
                received.extend_from_slice(&block[..n]);
                if n == 0 {
                    thread::yield_now();
                }
            }
            received
        });

        for chunk in total.chunks(64) {
            while producer.try_publish(chunk).is_none() {
                std::hint::spin_loop();
            }
        }

        assert_eq!(reader.join().unwrap(), total);
    }
}
