use std::sync::{Arc, Mutex, MutexGuard};

/// Fixed-size circular window over the most recent `capacity` samples.
///
/// The window is zero-filled at construction, so it always holds exactly
/// `capacity` samples. `write_pos` points at the oldest sample, which is the
/// slot the next push overwrites.
#[derive(Debug)]
pub struct SampleRing {
    data: Vec<f32>,
    write_pos: usize,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0.0; capacity],
            write_pos: 0,
        }
    }

    #[inline]
    pub fn push(&mut self, sample: f32) {
        self.data[self.write_pos] = sample;
        self.write_pos += 1;
        if self.write_pos == self.data.len() {
            self.write_pos = 0;
        }
    }

    /// Copy the window into `out`, oldest sample first.
    pub fn copy_into(&self, out: &mut [f32]) {
        assert_eq!(out.len(), self.data.len(), "snapshot target has wrong length");
        let tail = self.data.len() - self.write_pos;
        out[..tail].copy_from_slice(&self.data[self.write_pos..]);
        out[tail..].copy_from_slice(&self.data[..self.write_pos]);
    }

    pub fn clear(&mut self) {
        self.data.fill(0.0);
        self.write_pos = 0;
    }
}

/// Cloneable handle to a [`SampleRing`] shared by one audio producer (the
/// device callback or the export cursor) and one analyzer consumer.
#[derive(Clone, Debug)]
pub struct SampleBuffer {
    ring: Arc<Mutex<SampleRing>>,
    capacity: usize,
}

impl SampleBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Arc::new(Mutex::new(SampleRing::new(capacity))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append one sample, evicting the oldest.
    pub fn push(&self, sample: f32) {
        self.lock().push(sample);
    }

    /// Copy the current window into `out`, oldest first. `out` must hold
    /// exactly `capacity()` samples.
    pub fn snapshot(&self, out: &mut [f32]) {
        self.lock().copy_into(out);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, SampleRing> {
        // The ring only holds plain floats, so a panic on the other side
        // cannot leave it in a state worth refusing to read.
        self.ring.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn window(buffer: &SampleBuffer) -> Vec<f32> {
        let mut out = vec![0.0; buffer.capacity()];
        buffer.snapshot(&mut out);
        out
    }

    #[test]
    fn starts_zero_padded() {
        let buffer = SampleBuffer::new(8);
        assert_eq!(window(&buffer), vec![0.0; 8]);
    }

    #[test]
    fn newest_sample_lands_at_tail() {
        let buffer = SampleBuffer::new(4);
        buffer.push(1.0);
        buffer.push(2.0);
        assert_eq!(window(&buffer), vec![0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn wraps_around_oldest_first() {
        let buffer = SampleBuffer::new(4);
        for i in 0..6 {
            buffer.push(i as f32);
        }
        assert_eq!(window(&buffer), vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    #[should_panic(expected = "snapshot target has wrong length")]
    fn snapshot_rejects_short_target() {
        let buffer = SampleBuffer::new(4);
        buffer.snapshot(&mut [0.0; 3]);
    }

    #[test]
    fn clear_zeroes_window() {
        let buffer = SampleBuffer::new(4);
        for s in [1.0, 2.0, 3.0] {
            buffer.push(s);
        }
        buffer.clear();
        assert_eq!(window(&buffer), vec![0.0; 4]);
        buffer.push(7.0);
        assert_eq!(window(&buffer), vec![0.0, 0.0, 0.0, 7.0]);
    }

    #[test]
    fn concurrent_producer_and_consumer() {
        let buffer = SampleBuffer::new(256);
        let producer = buffer.clone();

        let handle = thread::spawn(move || {
            for i in 0..20_000 {
                producer.push(i as f32);
            }
        });

        let mut seen = vec![0.0; 256];
        for _ in 0..200 {
            buffer.snapshot(&mut seen);
            // Whatever the interleaving, a snapshot is a contiguous run of
            // consecutive samples (or the zero padding before them).
            for pair in seen.windows(2) {
                assert!(pair[1] == pair[0] + 1.0 || pair[0] == 0.0);
            }
        }
        handle.join().unwrap();

        let last = window(&buffer);
        assert_eq!(last.len(), 256);
        assert_eq!(last[255], 19_999.0);
        assert_eq!(last[0], 19_744.0);
    }
}
