//! Noise-adaptive voice activity detection
//!
//! Learns the ambient noise floor over a fixed warm-up period, then flags
//! frames whose energy clears an adaptive threshold. The peak-amplitude OR
//! path deliberately trades false positives for recall; tune the margin and
//! ratio constants, not the combinator.

use crate::audio::AudioFrame;
use crate::config::VadConfig;

/// How often the evaluation summary is logged at debug level
const LOG_EVERY: u32 = 15;

/// Classifies frames as voice or silence against a learned noise floor
#[derive(Debug)]
pub struct VoiceDetector {
    config: VadConfig,
    noise_sum: i64,
    noise_floor: i32,
    frames_seen: u32,
    log_counter: u32,
}

impl VoiceDetector {
    /// Create a detector in learning mode
    #[must_use]
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            noise_sum: 0,
            noise_floor: 0,
            frames_seen: 0,
            log_counter: 0,
        }
    }

    /// Classify one frame, updating the noise floor during warm-up
    ///
    /// Always reports silence while learning, regardless of amplitude.
    /// An empty frame is silence by definition.
    pub fn evaluate(&mut self, frame: &AudioFrame) -> bool {
        if frame.is_empty() {
            return false;
        }

        let (avg_energy, max_amplitude) = frame_levels(frame.samples());

        if self.frames_seen < self.config.warmup_frames {
            self.noise_sum += i64::from(avg_energy);
            self.frames_seen += 1;
            if self.frames_seen == self.config.warmup_frames {
                #[allow(clippy::cast_possible_truncation)]
                let floor = (self.noise_sum / i64::from(self.config.warmup_frames)) as i32;
                self.noise_floor = floor;
                tracing::info!(noise_floor = floor, "noise floor learned");
            }
            return false;
        }

        let adaptive_threshold = self.noise_floor + self.config.base_margin;
        let max_threshold = adaptive_threshold / 2;

        let energy_check = avg_energy > adaptive_threshold;
        let amplitude_check = max_amplitude > max_threshold;

        #[allow(clippy::cast_precision_loss)]
        let peak_dominates =
            max_amplitude as f32 > avg_energy as f32 * self.config.peak_ratio;

        let voice = energy_check || (amplitude_check && peak_dominates);

        self.log_counter += 1;
        if self.log_counter % LOG_EVERY == 0 {
            tracing::debug!(
                avg = avg_energy,
                max = max_amplitude,
                noise = self.noise_floor,
                threshold = adaptive_threshold,
                voice,
                "vad evaluation"
            );
        }

        voice
    }

    /// The frozen noise floor, or `None` while still learning
    #[must_use]
    pub fn noise_floor(&self) -> Option<i32> {
        (self.frames_seen >= self.config.warmup_frames).then_some(self.noise_floor)
    }

    /// Whether the detector is still consuming warm-up frames
    #[must_use]
    pub fn is_learning(&self) -> bool {
        self.frames_seen < self.config.warmup_frames
    }

    /// Forget the learned floor and re-enter warm-up
    pub fn reset(&mut self) {
        self.noise_sum = 0;
        self.noise_floor = 0;
        self.frames_seen = 0;
        self.log_counter = 0;
    }
}

/// Mean absolute amplitude and peak absolute amplitude of a frame
fn frame_levels(samples: &[i16]) -> (i32, i32) {
    let mut energy: i64 = 0;
    let mut max_amplitude: i32 = 0;

    for &sample in samples {
        let magnitude = i32::from(sample).abs();
        energy += i64::from(magnitude);
        if magnitude > max_amplitude {
            max_amplitude = magnitude;
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    let avg = (energy / samples.len() as i64) as i32;
    (avg, max_amplitude)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> VoiceDetector {
        VoiceDetector::new(VadConfig::default())
    }

    fn flat_frame(amplitude: i16, len: usize) -> AudioFrame {
        AudioFrame::new(vec![amplitude; len])
    }

    #[test]
    fn silent_during_warmup_even_when_loud() {
        let mut vad = detector();
        for _ in 0..50 {
            assert!(!vad.evaluate(&flat_frame(20_000, 256)));
        }
        assert!(!vad.is_learning());
    }

    #[test]
    fn noise_floor_is_mean_of_warmup_energies() {
        let mut vad = detector();
        // 25 frames at |400| and 25 at |600| -> floor 500
        for _ in 0..25 {
            vad.evaluate(&flat_frame(400, 128));
        }
        for _ in 0..25 {
            vad.evaluate(&flat_frame(600, 128));
        }
        assert_eq!(vad.noise_floor(), Some(500));
    }

    #[test]
    fn zero_floor_with_margin_600_detects_avg_700() {
        let mut vad = detector();
        for _ in 0..50 {
            vad.evaluate(&flat_frame(0, 128));
        }
        assert_eq!(vad.noise_floor(), Some(0));

        // avg_energy 700 > 0 + 600
        assert!(vad.evaluate(&flat_frame(700, 128)));
        // avg_energy 500 fails the energy check; flat frames also fail the
        // peak-dominance ratio, so no voice
        assert!(!vad.evaluate(&flat_frame(500, 128)));
    }

    #[test]
    fn threshold_monotonic_above_margin() {
        let mut vad = detector();
        for _ in 0..50 {
            vad.evaluate(&flat_frame(100, 128));
        }
        let floor = vad.noise_floor().unwrap();
        for amplitude in [floor + 601, floor + 700, floor + 5000] {
            #[allow(clippy::cast_possible_truncation)]
            let frame = flat_frame(amplitude as i16, 128);
            assert!(vad.evaluate(&frame), "amplitude {amplitude} should be voice");
        }
    }

    #[test]
    fn peak_path_detects_spiky_frame() {
        let mut vad = detector();
        for _ in 0..50 {
            vad.evaluate(&flat_frame(0, 128));
        }

        // Mostly quiet frame with one strong transient: average energy stays
        // under the threshold but the peak clears threshold/2 and dominates
        let mut samples = vec![0i16; 128];
        samples[64] = 8000;
        assert!(vad.evaluate(&AudioFrame::new(samples)));
    }

    #[test]
    fn empty_frame_is_silence() {
        let mut vad = detector();
        assert!(!vad.evaluate(&AudioFrame::new(Vec::new())));
    }

    #[test]
    fn reset_reenters_learning() {
        let mut vad = detector();
        for _ in 0..50 {
            vad.evaluate(&flat_frame(0, 64));
        }
        assert!(vad.noise_floor().is_some());

        vad.reset();
        assert!(vad.is_learning());
        assert!(!vad.evaluate(&flat_frame(20_000, 64)));
    }
}
