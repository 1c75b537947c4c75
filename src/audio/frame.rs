//! Captured audio frames

/// One microphone frame: signed 16-bit mono samples at the capture rate.
///
/// Immutable once captured; consumed by the VAD and, conditionally, by the
/// wake spotter or the uplink streamer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
}

impl AudioFrame {
    /// Wrap captured samples in a frame
    #[must_use]
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    /// The samples in capture order
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Number of samples in the frame
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Raw little-endian PCM bytes, as sent on the uplink wire
    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn le_bytes_round_trip() {
        let frame = AudioFrame::new(vec![0, 1, -1, i16::MAX, i16::MIN]);
        let bytes = frame.to_le_bytes();
        assert_eq!(bytes.len(), 10);

        let decoded: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        assert_eq!(decoded, frame.samples());
    }
}
