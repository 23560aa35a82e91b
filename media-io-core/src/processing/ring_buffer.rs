/// Circular buffer between a device callback and a reader thread.
///
/// Element type is generic so the same buffer carries raw interleaved
/// bytes (`RingBuffer<u8>`) or decoded samples. Wrap in
/// `Arc<parking_lot::Mutex<RingBuffer<T>>>` for cross-thread access.
///
/// Overflow drops the oldest elements: a stalled reader loses history,
/// the device callback never blocks.
#[derive(Debug)]
pub struct RingBuffer<T> {
    buffer: Vec<T>,
    write_index: usize,
    read_index: usize,
    available: usize,
    capacity: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![T::default(); capacity],
            write_index: 0,
            read_index: 0,
            available: 0,
            capacity,
        }
    }

    /// Append `samples`, dropping the oldest on overflow.
    ///
    /// Returns how many previously buffered or incoming elements were
    /// dropped. Only the last `capacity` elements of an oversized write are
    /// kept.
    pub fn write(&mut self, samples: &[T]) -> usize {
        if samples.is_empty() || self.capacity == 0 {
            return samples.len();
        }

        let truncated = samples.len().saturating_sub(self.capacity);
        let samples = if samples.len() > self.capacity {
            &samples[samples.len() - self.capacity..]
        } else {
            samples
        };

        let overflow = (self.available + samples.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.read_index = (self.read_index + overflow) % self.capacity;
            self.available -= overflow;
        }

        // Copy in at most two contiguous runs.
        let first = samples.len().min(self.capacity - self.write_index);
        self.buffer[self.write_index..self.write_index + first].copy_from_slice(&samples[..first]);
        self.buffer[..samples.len() - first].copy_from_slice(&samples[first..]);
        self.write_index = (self.write_index + samples.len()) % self.capacity;
        self.available += samples.len();
        truncated + overflow
    }

    /// Read and remove up to `count` elements.
    ///
    /// Returns fewer if fewer are available.
    pub fn read(&mut self, count: usize) -> Vec<T> {
        let to_read = count.min(self.available);
        let mut result = vec![T::default(); to_read];
        self.read_into(&mut result);
        result
    }

    /// Read and remove up to `out.len()` elements into `out`.
    pub fn read_into(&mut self, out: &mut [T]) -> usize {
        let to_read = out.len().min(self.available);
        if to_read == 0 {
            return 0;
        }

        let first = to_read.min(self.capacity - self.read_index);
        out[..first].copy_from_slice(&self.buffer[self.read_index..self.read_index + first]);
        out[first..to_read].copy_from_slice(&self.buffer[..to_read - first]);
        self.read_index = (self.read_index + to_read) % self.capacity;
        self.available -= to_read;
        to_read
    }

    /// Elements buffered and not yet read.
    pub fn count(&self) -> usize {
        self.available
    }

    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    /// Drop everything buffered.
    pub fn reset(&mut self) {
        self.write_index = 0;
        self.read_index = 0;
        self.available = 0;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packets_come_out_in_order() {
        let mut ring = RingBuffer::<u8>::new(16);
        assert_eq!(ring.write(&[10, 11, 12, 13, 14]), 0);
        assert_eq!(ring.count(), 5);

        assert_eq!(ring.read(2), vec![10, 11]);
        // Asking for more than is buffered returns what there is.
        assert_eq!(ring.read(64), vec![12, 13, 14]);
        assert!(ring.is_empty());
        assert!(ring.read(1).is_empty());
    }

    #[test]
    fn full_ring_sheds_oldest_bytes() {
        let mut ring = RingBuffer::<u8>::new(4);
        ring.write(&[1, 2, 3]);
        assert_eq!(ring.write(&[4, 5, 6]), 2);
        assert_eq!(ring.count(), ring.capacity());
        assert_eq!(ring.read(4), vec![3, 4, 5, 6]);
    }

    #[test]
    fn oversized_write_keeps_newest_tail() {
        let mut ring = RingBuffer::<i16>::new(3);
        ring.write(&[-1]);
        // One buffered sample plus four incoming ones over capacity.
        assert_eq!(ring.write(&[100, 200, 300, 400, 500, 600]), 4);
        assert_eq!(ring.read(3), vec![400, 500, 600]);
    }

    #[test]
    fn writes_and_reads_straddle_the_end() {
        let mut ring = RingBuffer::<u8>::new(6);
        ring.write(&[1, 2, 3, 4]);
        assert_eq!(ring.read(3), vec![1, 2, 3]);
        ring.write(&[5, 6, 7, 8]);

        let mut out = [0u8; 8];
        assert_eq!(ring.read_into(&mut out), 5);
        assert_eq!(&out[..5], &[4, 5, 6, 7, 8]);
        assert_eq!(ring.read_into(&mut out), 0);
    }

    #[test]
    fn float_samples_survive_wrap() {
        let mut ring = RingBuffer::<f32>::new(4);
        ring.write(&[0.1, 0.2, 0.3]);
        ring.read(2);
        ring.write(&[0.4, 0.5, 0.6]);
        assert_eq!(ring.read(4), vec![0.3, 0.4, 0.5, 0.6]);
    }

    #[test]
    fn reset_discards_pending_bytes() {
        let mut ring = RingBuffer::<u8>::new(8);
        ring.write(&[9; 5]);
        ring.reset();
        assert_eq!(ring.count(), 0);
        ring.write(&[]);
        assert!(ring.is_empty());
    }

    #[test]
    fn zero_capacity_drops_everything() {
        let mut ring = RingBuffer::<u8>::new(0);
        assert_eq!(ring.write(&[1, 2]), 2);
        assert!(ring.is_empty());
        assert_eq!(ring.read_into(&mut [0u8; 2]), 0);
    }
}
