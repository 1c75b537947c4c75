//! Fixed-capacity circular sample buffer
//!
//! Backs the wake spotter's rolling window. Writes wrap and overwrite the
//! oldest samples once the buffer is full; analysis always reads the most
//! recent `k` samples.

use crate::{Error, Result};

/// Index-checked circular buffer of i16 samples
#[derive(Debug)]
pub struct CircularBuffer {
    buf: Vec<i16>,
    write_pos: usize,
    collected: usize,
}

impl CircularBuffer {
    /// Create a buffer holding `capacity` samples
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resource`] if `capacity` is zero
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Resource(
                "circular buffer capacity must be > 0".to_string(),
            ));
        }
        Ok(Self {
            buf: vec![0; capacity],
            write_pos: 0,
            collected: 0,
        })
    }

    /// Append samples, overwriting the oldest once full
    pub fn push_slice(&mut self, samples: &[i16]) {
        for &sample in samples {
            self.buf[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % self.buf.len();
            if self.collected < self.buf.len() {
                self.collected += 1;
            }
        }
    }

    /// Samples collected so far, saturating at capacity
    #[must_use]
    pub fn len(&self) -> usize {
        self.collected
    }

    /// Whether no samples have been written yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.collected == 0
    }

    /// Total capacity in samples
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Whether the buffer has wrapped at least once
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.collected == self.buf.len()
    }

    /// Copy out the most recent `k` samples in capture order
    ///
    /// `k` is clamped to the number of samples collected.
    #[must_use]
    pub fn latest(&self, k: usize) -> Vec<i16> {
        let k = k.min(self.collected);
        let capacity = self.buf.len();
        let start = (self.write_pos + capacity - k) % capacity;
        (0..k).map(|i| self.buf[(start + i) % capacity]).collect()
    }

    /// Discard all samples and rewind the write position
    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.collected = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_capacity() {
        assert!(CircularBuffer::new(0).is_err());
    }

    #[test]
    fn fills_then_wraps() {
        let mut ring = CircularBuffer::new(4).unwrap();
        ring.push_slice(&[1, 2, 3]);
        assert_eq!(ring.len(), 3);
        assert!(!ring.is_full());

        ring.push_slice(&[4, 5]);
        assert_eq!(ring.len(), 4);
        assert!(ring.is_full());

        // Oldest sample (1) was overwritten
        assert_eq!(ring.latest(4), vec![2, 3, 4, 5]);
    }

    #[test]
    fn latest_clamps_to_collected() {
        let mut ring = CircularBuffer::new(8).unwrap();
        ring.push_slice(&[7, 8]);
        assert_eq!(ring.latest(8), vec![7, 8]);
    }

    #[test]
    fn latest_spans_wrap_point() {
        let mut ring = CircularBuffer::new(4).unwrap();
        ring.push_slice(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(ring.latest(3), vec![4, 5, 6]);
    }

    #[test]
    fn clear_resets_state() {
        let mut ring = CircularBuffer::new(4).unwrap();
        ring.push_slice(&[1, 2, 3, 4, 5]);
        ring.clear();
        assert!(ring.is_empty());
        assert!(ring.latest(4).is_empty());
    }
}
