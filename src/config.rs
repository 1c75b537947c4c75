//! Configuration for the speech I/O core
//!
//! Everything here is a boot-time constant: values are read once from a TOML
//! file (or defaulted) and never mutated at runtime.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level voxcore configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Audio format constants
    pub audio: AudioConfig,

    /// Voice activity detection tuning
    pub vad: VadConfig,

    /// Wake phrase spotting tuning
    pub wake: WakeConfig,

    /// Uplink streaming parameters
    pub uplink: UplinkConfig,

    /// Downlink playback parameters
    pub downlink: DownlinkConfig,

    /// Session-level timeouts
    pub session: SessionConfig,
}

/// Audio format for capture and uplink
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Samples per microphone frame
    pub frame_samples: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_samples: 1024,
        }
    }
}

/// Voice activity detection tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Margin added to the learned noise floor to form the energy threshold
    pub base_margin: i32,

    /// Frames consumed to learn the noise floor before any detection
    pub warmup_frames: u32,

    /// Peak amplitude must exceed average energy by this ratio for the
    /// peak-based detection path
    pub peak_ratio: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            base_margin: 600,
            warmup_frames: 50,
            peak_ratio: 1.1,
        }
    }
}

/// Wake phrase spotting tuning
///
/// The numeric thresholds below were tuned empirically on the target device
/// and are deliberately permissive; treat them as configuration, not ground
/// truth.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    /// Rolling window capacity in samples (2 s at 16 kHz)
    pub window_samples: usize,

    /// Minimum buffered audio before pattern evaluation runs
    pub min_audio_ms: u64,

    /// Length of the analysis slice taken from the window
    pub analysis_ms: u64,

    /// Number of equal segments the analysis slice is split into
    pub segments: usize,

    /// Normalized energy above which a segment counts as active
    pub segment_floor: f32,

    /// Full criteria: minimum active segments
    pub min_active_segments: usize,

    /// Full criteria: minimum average segment energy
    pub min_avg_energy: f32,

    /// Full criteria: minimum mean absolute deviation of segment energy
    pub min_energy_variation: f32,

    /// Full criteria: minimum window fill fraction
    pub min_fill: f32,

    /// Fallback criteria: minimum active segments
    pub fallback_min_active_segments: usize,

    /// Fallback criteria: minimum average segment energy
    pub fallback_min_avg_energy: f32,

    /// Fallback criteria: minimum window fill fraction
    pub fallback_min_fill: f32,

    /// How long a tentative detection has to re-verify before falling back
    /// to listening
    pub verify_window_ms: u64,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            window_samples: 32_000,
            min_audio_ms: 800,
            analysis_ms: 1000,
            segments: 10,
            segment_floor: 0.001,
            min_active_segments: 2,
            min_avg_energy: 0.0005,
            min_energy_variation: 0.000_05,
            min_fill: 0.10,
            fallback_min_active_segments: 1,
            fallback_min_avg_energy: 0.0003,
            fallback_min_fill: 0.05,
            verify_window_ms: 1000,
        }
    }
}

impl WakeConfig {
    /// Re-verification window as a [`Duration`]
    #[must_use]
    pub const fn verify_window(&self) -> Duration {
        Duration::from_millis(self.verify_window_ms)
    }
}

/// Uplink streaming parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UplinkConfig {
    /// Endpoint receiving PCM chunks
    pub endpoint: String,

    /// Upload unit size in bytes
    pub chunk_bytes: usize,

    /// Consecutive voice-positive frames required before recording starts
    pub min_consecutive_voice: u32,

    /// Silence after the last voiced frame that ends the cycle
    pub silence_timeout_ms: u64,

    /// Hard cap on one capture cycle
    pub max_duration_ms: u64,

    /// Per-request timeout for chunk uploads
    pub request_timeout_ms: u64,
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8787/audio".to_string(),
            chunk_bytes: 4096,
            min_consecutive_voice: 2,
            silence_timeout_ms: 2000,
            max_duration_ms: 10_000,
            request_timeout_ms: 5000,
        }
    }
}

impl UplinkConfig {
    /// Silence timeout as a [`Duration`]
    #[must_use]
    pub const fn silence_timeout(&self) -> Duration {
        Duration::from_millis(self.silence_timeout_ms)
    }

    /// Maximum recording duration as a [`Duration`]
    #[must_use]
    pub const fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }
}

/// Downlink playback parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownlinkConfig {
    /// Byte capacity of the network-to-playback queue
    pub queue_capacity_bytes: usize,

    /// Chunks buffered before the sink is first touched
    pub prebuffer_chunks: usize,

    /// How long pre-buffering may take before the engine aborts
    pub prebuffer_timeout_ms: u64,

    /// Maximum wait between chunks while not draining (stalled stream)
    pub fetch_timeout_ms: u64,

    /// Poll interval while waiting for sink queue room
    pub sink_poll_interval_ms: u64,

    /// Maximum total wait for sink queue room per chunk
    pub sink_wait_timeout_ms: u64,

    /// Grace period for the playback thread to exit after a stop signal
    pub stop_grace_ms: u64,
}

impl Default for DownlinkConfig {
    fn default() -> Self {
        Self {
            queue_capacity_bytes: 128 * 1024,
            prebuffer_chunks: 2,
            prebuffer_timeout_ms: 3000,
            fetch_timeout_ms: 2000,
            sink_poll_interval_ms: 10,
            sink_wait_timeout_ms: 1000,
            stop_grace_ms: 500,
        }
    }
}

impl DownlinkConfig {
    /// Pre-buffer timeout as a [`Duration`]
    #[must_use]
    pub const fn prebuffer_timeout(&self) -> Duration {
        Duration::from_millis(self.prebuffer_timeout_ms)
    }

    /// Per-fetch timeout as a [`Duration`]
    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Sink wait timeout as a [`Duration`]
    #[must_use]
    pub const fn sink_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_wait_timeout_ms)
    }

    /// Stop grace period as a [`Duration`]
    #[must_use]
    pub const fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Session-level timeouts
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long to wait in Processing before giving up
    pub processing_timeout_ms: u64,

    /// How long a recording cycle may run before being forced to end
    pub recording_timeout_ms: u64,

    /// Control loop poll interval
    pub poll_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            processing_timeout_ms: 30_000,
            recording_timeout_ms: 5000,
            poll_interval_ms: 100,
        }
    }
}

impl SessionConfig {
    /// Processing timeout as a [`Duration`]
    #[must_use]
    pub const fn processing_timeout(&self) -> Duration {
        Duration::from_millis(self.processing_timeout_ms)
    }

    /// Recording timeout as a [`Duration`]
    #[must_use]
    pub const fn recording_timeout(&self) -> Duration {
        Duration::from_millis(self.recording_timeout_ms)
    }

    /// Poll interval as a [`Duration`]
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default location, falling back to defaults if absent
    ///
    /// # Errors
    ///
    /// Returns error only if a config file exists but is invalid
    pub fn load_or_default() -> Result<Self> {
        let path = default_config_path();
        if path.exists() {
            tracing::debug!(path = %path.display(), "loading config file");
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Sanity-check values that would otherwise fail deep inside a component
    fn validate(&self) -> Result<()> {
        if self.audio.frame_samples == 0 {
            return Err(Error::Config("audio.frame_samples must be > 0".into()));
        }
        if self.wake.window_samples == 0 || self.wake.segments == 0 {
            return Err(Error::Config(
                "wake.window_samples and wake.segments must be > 0".into(),
            ));
        }
        if self.uplink.chunk_bytes == 0 {
            return Err(Error::Config("uplink.chunk_bytes must be > 0".into()));
        }
        if self.downlink.queue_capacity_bytes == 0 {
            return Err(Error::Config(
                "downlink.queue_capacity_bytes must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Default config path: `~/.config/voxcore/voxcore.toml`
#[must_use]
pub fn default_config_path() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".config/voxcore/voxcore.toml"),
        |dirs| dirs.config_dir().join("voxcore").join("voxcore.toml"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_device_tuning() {
        let config = Config::default();
        assert_eq!(config.audio.sample_rate, 16_000);
        assert_eq!(config.vad.base_margin, 600);
        assert_eq!(config.vad.warmup_frames, 50);
        assert_eq!(config.wake.window_samples, 32_000);
        assert_eq!(config.uplink.chunk_bytes, 4096);
        assert_eq!(config.downlink.prebuffer_chunks, 2);
        assert_eq!(config.downlink.queue_capacity_bytes, 128 * 1024);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [uplink]
            endpoint = "https://worker.example.dev/audio"
            [vad]
            base_margin = 450
            "#,
        )
        .unwrap();

        assert_eq!(config.uplink.endpoint, "https://worker.example.dev/audio");
        assert_eq!(config.uplink.chunk_bytes, 4096);
        assert_eq!(config.vad.base_margin, 450);
        assert_eq!(config.vad.warmup_frames, 50);
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let config: Config = toml::from_str("[uplink]\nchunk_bytes = 0\n").unwrap();
        assert!(config.validate().is_err());
    }
}
