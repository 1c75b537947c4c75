//! Uplink audio streaming
//!
//! Runs one capture-and-send cycle: waits for sustained voice, records
//! microphone frames, and ships them to the speech service in fixed-size
//! chunks with first/last markers. The receiver reconstructs a framed
//! stream from the markers alone, so every cycle must end with exactly one
//! `is_last` call even when nothing was captured.

use std::time::Instant;

use async_trait::async_trait;

use crate::audio::Microphone;
use crate::config::UplinkConfig;
use crate::vad::VoiceDetector;
use crate::{Error, Result};

/// Why a capture cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEnd {
    /// Silence persisted past the timeout after the last voiced frame
    Silence,
    /// The maximum recording duration was reached
    MaxDuration,
    /// Recording never started before the cycle expired
    Empty,
    /// The caller's deadline passed mid-cycle
    Deadline,
}

/// Result of one completed capture cycle
#[derive(Debug, Clone, Copy)]
pub struct CycleOutcome {
    /// Non-empty chunks delivered to the uploader
    pub chunks_sent: usize,
    /// What ended the cycle
    pub reason: CycleEnd,
}

/// Delivers one PCM chunk to the remote speech service
#[async_trait]
pub trait ChunkUploader: Send + Sync {
    /// Upload a chunk, tagged with its position in the stream
    ///
    /// An empty `pcm` with `is_last` set closes out a stream in which
    /// nothing was captured.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] or [`Error::Http`] on delivery failure
    async fn upload(&self, pcm: &[u8], is_first: bool, is_last: bool) -> Result<()>;
}

/// Uploads chunks over HTTP POST, one request per chunk
pub struct HttpChunkUploader {
    client: reqwest::Client,
    endpoint: String,
    sample_rate: u32,
}

impl HttpChunkUploader {
    /// Build an uploader with the configured per-request timeout
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be constructed
    pub fn new(config: &UplinkConfig, sample_rate: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
            .user_agent(concat!("voxcore/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            sample_rate,
        })
    }
}

#[async_trait]
impl ChunkUploader for HttpChunkUploader {
    async fn upload(&self, pcm: &[u8], is_first: bool, is_last: bool) -> Result<()> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "audio/pcm")
            .header("X-Audio-Sample-Rate", self.sample_rate.to_string())
            .header("X-Audio-Channels", "1")
            .header("X-Audio-Bits-Per-Sample", "16");

        if is_first {
            request = request.header("X-Stream-Start", "true");
        }
        if is_last {
            request = request.header("X-Stream-End", "true");
        }

        let response = request.body(pcm.to_vec()).send().await?;

        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "chunk upload rejected: {}",
                response.status()
            )));
        }

        tracing::debug!(
            bytes = pcm.len(),
            is_first,
            is_last,
            "uplink chunk delivered"
        );
        Ok(())
    }
}

/// Gates, chunks, and streams one recording to the uploader
pub struct UplinkStreamer {
    config: UplinkConfig,
    poll_interval: std::time::Duration,
}

impl UplinkStreamer {
    /// Create a streamer polling the microphone at `poll_interval`
    #[must_use]
    pub fn new(config: UplinkConfig, poll_interval: std::time::Duration) -> Self {
        Self {
            config,
            poll_interval,
        }
    }

    /// Run one capture-and-send cycle to completion
    ///
    /// The microphone must already be capturing; frames preceding the
    /// debounce trigger are discarded, the triggering frame is included.
    /// A `deadline` caps the whole cycle from the caller's side; the cycle
    /// ends cooperatively when it passes, so the terminal marker is still
    /// sent. Never cancel the returned future mid-stream: an opened stream
    /// would be left without its closing `is_last` call.
    ///
    /// # Errors
    ///
    /// Returns the uploader's error if any chunk fails to deliver; the
    /// cycle ends immediately in that case
    pub async fn run(
        &self,
        microphone: &mut dyn Microphone,
        vad: &mut VoiceDetector,
        uploader: &dyn ChunkUploader,
        deadline: Option<Instant>,
    ) -> Result<CycleOutcome> {
        let cycle_start = Instant::now();
        let mut recording = false;
        let mut consecutive_voice: u32 = 0;
        let mut record_start = cycle_start;
        let mut last_voice = cycle_start;

        let mut chunk_buf: Vec<u8> = Vec::with_capacity(self.config.chunk_bytes);
        let mut chunks_sent = 0usize;
        let mut first_pending = true;

        tracing::debug!("capture cycle started");

        let reason = loop {
            for frame in microphone.take_frames() {
                let voice = vad.evaluate(&frame);

                if !recording {
                    if voice {
                        consecutive_voice += 1;
                        if consecutive_voice >= self.config.min_consecutive_voice {
                            recording = true;
                            record_start = Instant::now();
                            last_voice = record_start;
                            // The triggering frame is kept; earlier frames
                            // are already gone
                            chunk_buf.extend_from_slice(&frame.to_le_bytes());
                            tracing::debug!("recording started");
                        }
                    } else {
                        consecutive_voice = 0;
                    }
                    continue;
                }

                chunk_buf.extend_from_slice(&frame.to_le_bytes());
                if voice {
                    last_voice = Instant::now();
                }

                while chunk_buf.len() >= self.config.chunk_bytes {
                    let chunk: Vec<u8> =
                        chunk_buf.drain(..self.config.chunk_bytes).collect();
                    uploader.upload(&chunk, first_pending, false).await?;
                    first_pending = false;
                    chunks_sent += 1;
                }
            }

            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                break CycleEnd::Deadline;
            }
            if recording {
                if now.duration_since(last_voice) > self.config.silence_timeout() {
                    break CycleEnd::Silence;
                }
                if now.duration_since(record_start) > self.config.max_duration() {
                    break CycleEnd::MaxDuration;
                }
            } else if now.duration_since(cycle_start) > self.config.silence_timeout() {
                break CycleEnd::Empty;
            }

            tokio::time::sleep(self.poll_interval).await;
        };

        // Terminal call: flush the remainder, or close an empty stream
        if chunk_buf.is_empty() {
            uploader.upload(&[], first_pending, true).await?;
        } else {
            uploader.upload(&chunk_buf, first_pending, true).await?;
            chunks_sent += 1;
        }

        tracing::info!(chunks_sent, reason = ?reason, "capture cycle ended");
        Ok(CycleOutcome {
            chunks_sent,
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::audio::AudioFrame;
    use crate::config::VadConfig;

    /// Records every upload call for later inspection
    #[derive(Default)]
    struct RecordingUploader {
        calls: Arc<Mutex<Vec<(Vec<u8>, bool, bool)>>>,
    }

    #[async_trait]
    impl ChunkUploader for RecordingUploader {
        async fn upload(&self, pcm: &[u8], is_first: bool, is_last: bool) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((pcm.to_vec(), is_first, is_last));
            Ok(())
        }
    }

    /// Yields one scripted batch of frames per poll, then nothing
    struct ScriptedMicrophone {
        batches: VecDeque<Vec<AudioFrame>>,
    }

    impl ScriptedMicrophone {
        fn new(batches: Vec<Vec<AudioFrame>>) -> Self {
            Self {
                batches: batches.into(),
            }
        }
    }

    impl Microphone for ScriptedMicrophone {
        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn stop(&mut self) {}

        fn take_frames(&mut self) -> Vec<AudioFrame> {
            self.batches.pop_front().unwrap_or_default()
        }
    }

    /// VAD with a frozen zero noise floor, so amplitude 700 is voice
    fn warmed_vad() -> VoiceDetector {
        let mut vad = VoiceDetector::new(VadConfig::default());
        for _ in 0..50 {
            vad.evaluate(&AudioFrame::new(vec![0; 64]));
        }
        vad
    }

    fn fast_config() -> UplinkConfig {
        UplinkConfig {
            silence_timeout_ms: 40,
            max_duration_ms: 10_000,
            ..UplinkConfig::default()
        }
    }

    fn streamer(config: UplinkConfig) -> UplinkStreamer {
        UplinkStreamer::new(config, Duration::from_millis(5))
    }

    fn voiced(samples: usize) -> AudioFrame {
        AudioFrame::new(vec![700; samples])
    }

    fn quiet(samples: usize) -> AudioFrame {
        AudioFrame::new(vec![0; samples])
    }

    #[tokio::test]
    async fn empty_cycle_sends_single_terminal_marker() {
        let uploader = RecordingUploader::default();
        let calls = Arc::clone(&uploader.calls);
        let mut mic = ScriptedMicrophone::new(vec![]);
        let mut vad = warmed_vad();

        let outcome = streamer(fast_config())
            .run(&mut mic, &mut vad, &uploader, None)
            .await
            .unwrap();

        assert_eq!(outcome.reason, CycleEnd::Empty);
        assert_eq!(outcome.chunks_sent, 0);

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (body, is_first, is_last) = &calls[0];
        assert!(body.is_empty());
        assert!(is_first);
        assert!(is_last);
    }

    #[tokio::test]
    async fn single_voiced_frame_does_not_start_recording() {
        let uploader = RecordingUploader::default();
        let calls = Arc::clone(&uploader.calls);
        // One voiced frame, then silence: debounce needs two in a row
        let mut mic = ScriptedMicrophone::new(vec![
            vec![voiced(64), quiet(64)],
            vec![quiet(64)],
        ]);
        let mut vad = warmed_vad();

        let outcome = streamer(fast_config())
            .run(&mut mic, &mut vad, &uploader, None)
            .await
            .unwrap();

        assert_eq!(outcome.reason, CycleEnd::Empty);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn chunks_carry_markers_in_capture_order() {
        let uploader = RecordingUploader::default();
        let calls = Arc::clone(&uploader.calls);

        // Two debounce frames, then three more voiced frames: 5 frames of
        // 1024 samples = 10240 bytes, recorded from the triggering frame on
        let mut mic = ScriptedMicrophone::new(vec![
            vec![voiced(1024), voiced(1024)],
            vec![voiced(1024), voiced(1024), voiced(1024)],
        ]);
        let mut vad = warmed_vad();

        let outcome = streamer(fast_config())
            .run(&mut mic, &mut vad, &uploader, None)
            .await
            .unwrap();

        assert_eq!(outcome.reason, CycleEnd::Silence);

        let calls = calls.lock().unwrap();
        // The trigger frame plus three more = 8192 bytes = two full chunks,
        // then an empty terminal marker
        assert_eq!(calls.len(), 3);

        let (first, is_first, is_last) = &calls[0];
        assert_eq!(first.len(), 4096);
        assert!(is_first);
        assert!(!is_last);

        let (second, is_first, is_last) = &calls[1];
        assert_eq!(second.len(), 4096);
        assert!(!is_first);
        assert!(!is_last);

        let (tail, is_first, is_last) = &calls[2];
        assert!(tail.is_empty());
        assert!(!is_first);
        assert!(is_last);

        assert_eq!(outcome.chunks_sent, 2);
    }

    #[tokio::test]
    async fn partial_chunk_flushed_as_terminal() {
        let uploader = RecordingUploader::default();
        let calls = Arc::clone(&uploader.calls);

        // Recorded data starts at the trigger (second) frame: 1024 + 1024 +
        // 512 samples fills one 4096-byte chunk with 1024 bytes left over
        let mut mic = ScriptedMicrophone::new(vec![vec![
            voiced(1024),
            voiced(1024),
            voiced(1024),
            voiced(512),
        ]]);
        let mut vad = warmed_vad();

        streamer(fast_config())
            .run(&mut mic, &mut vad, &uploader, None)
            .await
            .unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0.len(), 4096);
        // Remainder: (1024 + 1024 + 512) * 2 - 4096 = 1024 bytes
        let (tail, _, is_last) = &calls[1];
        assert_eq!(tail.len(), 1024);
        assert!(is_last);
    }

    #[tokio::test]
    async fn max_duration_ends_sustained_voice() {
        let uploader = RecordingUploader::default();

        // Every poll produces voice, forever
        struct EndlessVoice;
        impl Microphone for EndlessVoice {
            fn start(&mut self) -> Result<()> {
                Ok(())
            }
            fn stop(&mut self) {}
            fn take_frames(&mut self) -> Vec<AudioFrame> {
                vec![AudioFrame::new(vec![700; 64])]
            }
        }

        let config = UplinkConfig {
            silence_timeout_ms: 1000,
            max_duration_ms: 30,
            ..UplinkConfig::default()
        };
        let mut mic = EndlessVoice;
        let mut vad = warmed_vad();

        let outcome = streamer(config)
            .run(&mut mic, &mut vad, &uploader, None)
            .await
            .unwrap();
        assert_eq!(outcome.reason, CycleEnd::MaxDuration);
    }

    #[tokio::test]
    async fn deadline_mid_stream_still_sends_terminal_marker() {
        let uploader = RecordingUploader::default();
        let calls = Arc::clone(&uploader.calls);

        // Voice never stops and neither timeout is close; only the
        // caller's deadline can end this cycle
        struct EndlessVoice;
        impl Microphone for EndlessVoice {
            fn start(&mut self) -> Result<()> {
                Ok(())
            }
            fn stop(&mut self) {}
            fn take_frames(&mut self) -> Vec<AudioFrame> {
                vec![AudioFrame::new(vec![700; 1024])]
            }
        }

        let config = UplinkConfig {
            silence_timeout_ms: 10_000,
            max_duration_ms: 60_000,
            ..UplinkConfig::default()
        };
        let mut mic = EndlessVoice;
        let mut vad = warmed_vad();

        let deadline = Instant::now() + Duration::from_millis(40);
        let outcome = streamer(config)
            .run(&mut mic, &mut vad, &uploader, Some(deadline))
            .await
            .unwrap();

        assert_eq!(outcome.reason, CycleEnd::Deadline);

        // The stream that was opened is also closed: exactly one is_last
        // call, and it is the final one
        let calls = calls.lock().unwrap();
        assert!(calls.len() >= 2, "expected chunks before the deadline");
        let terminal = calls.iter().filter(|(_, _, is_last)| *is_last).count();
        assert_eq!(terminal, 1);
        assert!(calls.last().unwrap().2);
    }

    #[tokio::test]
    async fn uploader_failure_ends_cycle() {
        struct FailingUploader;

        #[async_trait]
        impl ChunkUploader for FailingUploader {
            async fn upload(&self, _: &[u8], _: bool, _: bool) -> Result<()> {
                Err(Error::Transport("connection reset".to_string()))
            }
        }

        let mut mic = ScriptedMicrophone::new(vec![vec![
            voiced(1024),
            voiced(1024),
            voiced(1024),
        ]]);
        let mut vad = warmed_vad();

        let result = streamer(fast_config())
            .run(&mut mic, &mut vad, &FailingUploader, None)
            .await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
