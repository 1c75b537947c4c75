//! Audio playback sink

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use crate::{Error, Result};

/// Outcome of a bounded wait for sink queue room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkWait {
    /// The sink can accept another chunk
    Ready,
    /// The wait timed out with the sink queue still full
    QueueFull,
    /// The sink stopped playing; treat as fatal for the cycle
    Stopped,
}

/// Hardware audio output consumed by the playback engine
///
/// Implementations must report their own queue occupancy honestly: the
/// engine never hands over a chunk the sink cannot yet accept.
pub trait AudioSink {
    /// Queue one PCM chunk (little-endian i16 mono) for playback
    ///
    /// # Errors
    ///
    /// Returns [`Error::Hardware`] if the device rejected the data
    fn queue_chunk(&mut self, pcm: &[u8]) -> Result<()>;

    /// Whether the sink's internal queue can accept another chunk now
    fn has_room(&self) -> bool;

    /// Whether the output stream is still running
    fn is_active(&self) -> bool;

    /// Samples currently queued but not yet played
    fn queued_samples(&self) -> usize;
}

/// Upper bound on samples held in the cpal sink's own queue (~1 s at 16 kHz)
const SINK_QUEUE_SAMPLES: usize = 16_384;

/// Plays PCM chunks on the default output device
pub struct CpalSink {
    #[allow(dead_code)]
    device: Device,
    queue: Arc<Mutex<VecDeque<i16>>>,
    stream: Option<Stream>,
}

impl CpalSink {
    /// Open the default output device at the given rate and start its stream
    ///
    /// # Errors
    ///
    /// Returns [`Error::Hardware`] if no suitable device or config exists
    pub fn new(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Hardware("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Hardware(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(sample_rate)
                        && c.max_sample_rate() >= SampleRate(sample_rate)
                })
            })
            .ok_or_else(|| Error::Hardware("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(sample_rate))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels = config.channels,
            "audio sink initialized"
        );

        let queue: Arc<Mutex<VecDeque<i16>>> = Arc::new(Mutex::new(VecDeque::new()));
        let stream = Self::build_stream(&device, &config, Arc::clone(&queue))?;

        Ok(Self {
            device,
            queue,
            stream: Some(stream),
        })
    }

    fn build_stream(
        device: &Device,
        config: &StreamConfig,
        queue: Arc<Mutex<VecDeque<i16>>>,
    ) -> Result<Stream> {
        let channels = usize::from(config.channels);

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut queue = match queue.lock() {
                        Ok(q) => q,
                        Err(_) => {
                            data.fill(0.0);
                            return;
                        }
                    };
                    for frame in data.chunks_mut(channels) {
                        let sample = queue
                            .pop_front()
                            .map_or(0.0, |s| f32::from(s) / 32768.0);
                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio sink error");
                },
                None,
            )
            .map_err(|e| Error::Hardware(e.to_string()))?;

        stream.play().map_err(|e| Error::Hardware(e.to_string()))?;
        Ok(stream)
    }
}

impl AudioSink for CpalSink {
    fn queue_chunk(&mut self, pcm: &[u8]) -> Result<()> {
        if self.stream.is_none() {
            return Err(Error::Hardware("sink stream not running".to_string()));
        }

        let mut queue = self
            .queue
            .lock()
            .map_err(|_| Error::Hardware("sink queue poisoned".to_string()))?;
        queue.extend(
            pcm.chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
        );
        Ok(())
    }

    fn has_room(&self) -> bool {
        self.queue
            .lock()
            .map(|q| q.len() < SINK_QUEUE_SAMPLES)
            .unwrap_or(false)
    }

    fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    fn queued_samples(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio sink stopped");
        }
    }
}
