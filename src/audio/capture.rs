//! Audio capture from microphone

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use super::AudioFrame;
use crate::{Error, Result};

/// Source of fixed-length microphone frames
///
/// The control loop polls [`Microphone::take_frames`] on its tick; it must
/// never block beyond the underlying hardware read.
pub trait Microphone {
    /// Begin capturing
    ///
    /// # Errors
    ///
    /// Returns [`Error::Hardware`] if the capture stream cannot be started
    fn start(&mut self) -> Result<()>;

    /// Stop capturing
    fn stop(&mut self);

    /// Drain all complete frames captured since the last call
    fn take_frames(&mut self) -> Vec<AudioFrame>;
}

/// Captures i16 mono frames from the default input device
pub struct CpalMicrophone {
    #[allow(dead_code)]
    device: Device,
    config: StreamConfig,
    frame_samples: usize,
    buffer: Arc<Mutex<Vec<i16>>>,
    stream: Option<Stream>,
}

impl CpalMicrophone {
    /// Open the default input device at the given rate
    ///
    /// # Errors
    ///
    /// Returns [`Error::Hardware`] if no suitable device or config exists
    pub fn new(sample_rate: u32, frame_samples: usize) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Hardware("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Hardware(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .ok_or_else(|| Error::Hardware("no suitable input config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(sample_rate))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels = config.channels,
            "microphone initialized"
        );

        Ok(Self {
            device,
            config,
            frame_samples,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }
}

impl Microphone for CpalMicrophone {
    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Hardware("no input device".to_string()))?;

        let config = self.config.clone();

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend(data.iter().map(|&sample| {
                            #[allow(clippy::cast_possible_truncation)]
                            let quantized =
                                (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                            quantized
                        }));
                    }
                },
                |err| {
                    tracing::error!(error = %err, "microphone capture error");
                },
                None,
            )
            .map_err(|e| Error::Hardware(e.to_string()))?;

        stream.play().map_err(|e| Error::Hardware(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("microphone capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("microphone capture stopped");
        }
    }

    fn take_frames(&mut self) -> Vec<AudioFrame> {
        let Ok(mut buf) = self.buffer.lock() else {
            return Vec::new();
        };

        let mut frames = Vec::new();
        while buf.len() >= self.frame_samples {
            let samples: Vec<i16> = buf.drain(..self.frame_samples).collect();
            frames.push(AudioFrame::new(samples));
        }
        // Remainder stays buffered for the next poll
        frames
    }
}
