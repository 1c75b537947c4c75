//! Wake phrase spotting
//!
//! Watches a rolling window of recent audio for the energy signature of a
//! short spoken phrase. A tentative match must re-verify within a short
//! window before the spotter confirms; the caller gates `process` on the
//! VAD so silence never reaches the pattern evaluator.

use std::time::Instant;

use crate::audio::CircularBuffer;
use crate::config::WakeConfig;
use crate::Result;

/// How often pattern evaluations are logged at debug level
const LOG_EVERY: u32 = 50;

/// State of the wake spotter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpotterState {
    /// Waiting for a candidate pattern
    Listening,
    /// Candidate seen, awaiting re-verification
    Detecting,
    /// Wake phrase confirmed; terminal until [`WakeSpotter::reset`]
    Confirmed,
    /// Re-verification window expired; returns to listening on next frame
    TimedOut,
}

/// Energy statistics for one pattern evaluation
#[derive(Debug, Clone, Copy)]
struct PatternMetrics {
    active_segments: usize,
    avg_energy: f32,
    energy_variation: f32,
    window_fill: f32,
}

/// Detects the wake phrase from sustained-energy patterns
pub struct WakeSpotter {
    config: WakeConfig,
    sample_rate: u32,
    window: CircularBuffer,
    state: SpotterState,
    detection_start: Option<Instant>,
    confidence: f32,
    log_counter: u32,
}

impl WakeSpotter {
    /// Create a spotter with an empty rolling window
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Resource`] if the window cannot be allocated
    pub fn new(config: WakeConfig, sample_rate: u32) -> Result<Self> {
        let window = CircularBuffer::new(config.window_samples)?;
        Ok(Self {
            config,
            sample_rate,
            window,
            state: SpotterState::Listening,
            detection_start: None,
            confidence: 0.0,
            log_counter: 0,
        })
    }

    /// Feed voiced samples and report whether the wake phrase is confirmed
    ///
    /// Call only for frames the VAD classified as voice.
    pub fn process(&mut self, samples: &[i16]) -> bool {
        self.window.push_slice(samples);

        match self.state {
            SpotterState::Listening => {
                if self.evaluate_pattern() {
                    self.state = SpotterState::Detecting;
                    self.detection_start = Some(Instant::now());
                    tracing::debug!(confidence = self.confidence, "candidate wake pattern");
                }
            }
            SpotterState::Detecting => {
                if self.evaluate_pattern() {
                    self.state = SpotterState::Confirmed;
                    tracing::info!(confidence = self.confidence, "wake phrase confirmed");
                    return true;
                }

                let expired = self
                    .detection_start
                    .is_some_and(|t| t.elapsed() > self.config.verify_window());
                if expired {
                    self.state = SpotterState::TimedOut;
                    tracing::debug!("wake verification window expired");
                }
            }
            SpotterState::Confirmed => {
                // Terminal until reset
            }
            SpotterState::TimedOut => {
                self.state = SpotterState::Listening;
            }
        }

        false
    }

    /// Return to listening with an empty window
    pub fn reset(&mut self) {
        self.state = SpotterState::Listening;
        self.detection_start = None;
        self.confidence = 0.0;
        self.window.clear();
        tracing::debug!("wake spotter reset");
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SpotterState {
        self.state
    }

    /// Average segment energy from the most recent evaluation
    #[must_use]
    pub const fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Samples currently buffered in the rolling window
    #[must_use]
    pub fn buffered_samples(&self) -> usize {
        self.window.len()
    }

    /// Evaluate the rolling window against both detection criteria
    fn evaluate_pattern(&mut self) -> bool {
        #[allow(clippy::cast_possible_truncation)]
        let min_samples =
            (u64::from(self.sample_rate) * self.config.min_audio_ms / 1000) as usize;
        if self.window.len() < min_samples {
            return false;
        }

        #[allow(clippy::cast_possible_truncation)]
        let analysis_samples =
            (u64::from(self.sample_rate) * self.config.analysis_ms / 1000) as usize;
        let recent = self.window.latest(analysis_samples.min(self.window.len()));

        let Some(metrics) = self.measure(&recent) else {
            return false;
        };

        let full = self.full_criteria(metrics);
        let fallback = self.fallback_criteria(metrics);
        let detected = full || fallback;

        self.confidence = metrics.avg_energy;

        self.log_counter += 1;
        if self.log_counter % LOG_EVERY == 0 || detected {
            tracing::debug!(
                active = metrics.active_segments,
                avg_energy = metrics.avg_energy,
                variation = metrics.energy_variation,
                fill = metrics.window_fill,
                full,
                fallback,
                "wake pattern evaluation"
            );
        }
        if fallback && !full {
            tracing::debug!("wake detection via fallback criteria");
        }

        detected
    }

    /// Segment the analysis slice and compute normalized energy statistics
    fn measure(&self, samples: &[i16]) -> Option<PatternMetrics> {
        let samples_per_segment = samples.len() / self.config.segments;
        if samples_per_segment == 0 {
            return None;
        }

        let mut energies = Vec::with_capacity(self.config.segments);
        let mut active_segments = 0;
        let mut total_energy = 0.0f32;

        for seg in 0..self.config.segments {
            let start = seg * samples_per_segment;
            let end = start + samples_per_segment;

            let sum: f32 = samples[start..end]
                .iter()
                .map(|&s| {
                    let normalized = f32::from(s).abs() / 32768.0;
                    normalized * normalized
                })
                .sum();

            #[allow(clippy::cast_precision_loss)]
            let energy = sum / samples_per_segment as f32;
            if energy > self.config.segment_floor {
                active_segments += 1;
            }
            total_energy += energy;
            energies.push(energy);
        }

        #[allow(clippy::cast_precision_loss)]
        let avg_energy = total_energy / self.config.segments as f32;

        let energy_variation = if active_segments > 0 {
            #[allow(clippy::cast_precision_loss)]
            let variation = energies
                .iter()
                .map(|e| (e - avg_energy).abs())
                .sum::<f32>()
                / self.config.segments as f32;
            variation
        } else {
            0.0
        };

        #[allow(clippy::cast_precision_loss)]
        let window_fill = self.window.len() as f32 / self.window.capacity() as f32;

        Some(PatternMetrics {
            active_segments,
            avg_energy,
            energy_variation,
            window_fill,
        })
    }

    /// Primary criteria: sustained, varied speech energy over enough audio
    fn full_criteria(&self, m: PatternMetrics) -> bool {
        m.active_segments >= self.config.min_active_segments
            && m.avg_energy > self.config.min_avg_energy
            && m.energy_variation > self.config.min_energy_variation
            && m.window_fill >= self.config.min_fill
    }

    /// Recall-biased fallback: any significant voice over a shorter fill.
    ///
    /// Kept as a separate, independently tunable predicate; do not merge
    /// into the primary rule.
    fn fallback_criteria(&self, m: PatternMetrics) -> bool {
        m.active_segments >= self.config.fallback_min_active_segments
            && m.avg_energy > self.config.fallback_min_avg_energy
            && m.window_fill >= self.config.fallback_min_fill
    }
}
