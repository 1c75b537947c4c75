//! Session state machine and control loop
//!
//! Single source of truth for the user-visible session state. The pure
//! transition table lives in [`transition`]; the [`Session`] loop sequences
//! the capture pipeline, the uplink streamer, and the playback engine
//! around it, and drives the display. All audio state is owned here; only
//! the playback engine's chunk queue crosses threads.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::audio::{AudioSink, Microphone};
use crate::config::Config;
use crate::display::Display;
use crate::downlink::{PlaybackEngine, PlaybackState};
use crate::transport::{ControlMessage, EventReceiver, TransportEvent};
use crate::uplink::{ChunkUploader, CycleEnd, UplinkStreamer};
use crate::vad::VoiceDetector;
use crate::wake::WakeSpotter;
use crate::Result;

/// User-visible session mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Starting up
    Boot,
    /// Waiting for network association (external collaborator)
    ConnectingNetwork,
    /// Waiting for the speech service connection
    ConnectingService,
    /// Connected and idle
    Ready,
    /// Watching for the wake phrase
    Listening,
    /// Capturing and streaming a command
    Recording,
    /// Waiting for the service to respond
    Processing,
    /// Showing the transcription before playback
    Transcribing,
    /// Playing the synthesized reply
    Speaking,
    /// Fault state; a tap retries
    Error,
}

impl SessionState {
    /// Short status label for the display
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Boot => "starting",
            Self::ConnectingNetwork => "connecting",
            Self::ConnectingService => "reconnecting",
            Self::Ready => "ready",
            Self::Listening => "listening",
            Self::Recording => "recording",
            Self::Processing => "thinking",
            Self::Transcribing => "heard you",
            Self::Speaking => "speaking",
            Self::Error => "error",
        }
    }
}

/// Everything that can drive a session transition
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Service connection established
    Connected,
    /// Service connection lost
    Disconnected,
    /// Transport-level failure
    TransportError(String),
    /// User tapped the screen
    Tap,
    /// Wake phrase confirmed by the spotter
    WakeConfirmed,
    /// Idle listening began
    ListeningStarted,
    /// The uplink capture cycle completed
    RecordingFinished,
    /// The capture cycle overran its session-level timeout
    RecordingTimedOut,
    /// Transcription control message arrived
    Transcription { text: String, response: String },
    /// The transcription has been shown
    DisplaySettled,
    /// Remote error control message arrived
    RemoteError { message: String },
    /// Downlink playback is about to begin
    AudioStart,
    /// Playback reached its terminal state cleanly
    PlaybackFinished,
    /// Playback reached its terminal state with a failure
    PlaybackFailed,
    /// No response arrived within the processing timeout
    ProcessingTimedOut,
}

/// The pure transition table; `None` means the event is ignored
#[must_use]
#[allow(clippy::match_same_arms)]
pub fn transition(state: SessionState, event: &SessionEvent) -> Option<SessionState> {
    use SessionEvent as E;
    use SessionState as S;

    let next = match (state, event) {
        (s, E::TransportError(_) | E::Disconnected) if s != S::Error => S::Error,
        (S::ConnectingNetwork | S::ConnectingService, E::Connected) => S::Ready,
        (S::Ready, E::ListeningStarted) => S::Listening,
        (S::Ready | S::Listening, E::Tap | E::WakeConfirmed) => S::Recording,
        (S::Recording, E::RecordingFinished | E::Tap) => S::Processing,
        (S::Recording, E::RecordingTimedOut) => S::Ready,
        (S::Processing, E::Transcription { .. }) => S::Transcribing,
        (S::Transcribing, E::DisplaySettled) => S::Speaking,
        (S::Processing | S::Transcribing, E::AudioStart) => S::Speaking,
        (S::Processing | S::Transcribing | S::Speaking, E::ProcessingTimedOut) => S::Ready,
        (S::Processing | S::Transcribing | S::Speaking, E::RemoteError { .. }) => S::Ready,
        (S::Speaking, E::PlaybackFinished | E::PlaybackFailed) => S::Ready,
        (S::Error, E::Tap) => S::ConnectingService,
        _ => return None,
    };
    Some(next)
}

/// Builds the audio sink on the playback thread; hardware output streams
/// are not `Send`, so only this builder crosses threads
pub type SinkBuilder = Arc<dyn Fn() -> Result<Box<dyn AudioSink>> + Send + Sync>;

/// The session control loop
///
/// Runs on a single task; the only concurrent context is the playback
/// engine's dedicated thread. Not `Send`: the microphone owns a hardware
/// stream, so the session must stay on the thread that created it.
pub struct Session {
    config: Config,
    state: SessionState,
    display: Box<dyn Display>,
    microphone: Box<dyn Microphone>,
    vad: VoiceDetector,
    spotter: WakeSpotter,
    streamer: UplinkStreamer,
    uploader: Box<dyn ChunkUploader>,
    engine: PlaybackEngine,
    sink_builder: SinkBuilder,
    events: EventReceiver,
    shutdown: mpsc::Receiver<()>,
    processing_deadline: Option<Instant>,
}

impl Session {
    /// Assemble a session from its collaborators
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Resource`] if the wake window cannot be
    /// allocated
    pub fn new(
        config: Config,
        microphone: Box<dyn Microphone>,
        uploader: Box<dyn ChunkUploader>,
        sink_builder: SinkBuilder,
        display: Box<dyn Display>,
        events: EventReceiver,
        shutdown: mpsc::Receiver<()>,
    ) -> Result<Self> {
        let vad = VoiceDetector::new(config.vad.clone());
        let spotter = WakeSpotter::new(config.wake.clone(), config.audio.sample_rate)?;
        let streamer = UplinkStreamer::new(
            config.uplink.clone(),
            config.session.poll_interval(),
        );
        let engine = PlaybackEngine::new(config.downlink.clone());

        Ok(Self {
            config,
            state: SessionState::Boot,
            display,
            microphone,
            vad,
            spotter,
            streamer,
            uploader,
            engine,
            sink_builder,
            events,
            shutdown,
            processing_deadline: None,
        })
    }

    /// Current session state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Run until shutdown is signalled or the event channel closes
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Hardware`] if the microphone cannot start
    pub async fn run(&mut self) -> Result<()> {
        self.start()?;

        let mut tick = tokio::time::interval(self.config.session.poll_interval());

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("shutdown requested");
                    break;
                }
                event = self.events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            tracing::warn!("transport event channel closed");
                            self.apply(SessionEvent::Disconnected);
                            break;
                        }
                    }
                }
                _ = tick.tick() => {
                    self.poll().await;
                }
            }
        }

        self.microphone.stop();
        self.engine.stop();
        Ok(())
    }

    /// Start capturing and await the service connection
    ///
    /// Called by [`Session::run`]; public so a caller driving the session
    /// manually can bring it up the same way.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Hardware`] if the microphone cannot start
    pub fn start(&mut self) -> Result<()> {
        self.enter(SessionState::ConnectingNetwork);
        self.microphone.start()
    }

    /// Process one transport event
    ///
    /// Public so a caller can drive the session without the full loop.
    pub async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.apply(SessionEvent::Connected),
            TransportEvent::Disconnected => self.apply(SessionEvent::Disconnected),
            TransportEvent::Error(message) => {
                self.display.show_status_with_detail("error", &message);
                self.apply(SessionEvent::TransportError(message));
            }
            TransportEvent::Text(raw) => match ControlMessage::parse(&raw) {
                Ok(message) => self.handle_control(message),
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed control message");
                    if self.state == SessionState::Speaking {
                        // Protocol fault mid-playback aborts the stream
                        self.engine.stop();
                        self.apply(SessionEvent::PlaybackFailed);
                    }
                }
            },
            TransportEvent::Binary(chunk) => {
                if !self.engine.offer(&chunk) {
                    tracing::debug!(bytes = chunk.len(), "audio chunk not accepted");
                }
            }
        }
    }

    fn handle_control(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::Transcription { text, response } => {
                self.apply(SessionEvent::Transcription {
                    text: text.clone(),
                    response: response.clone(),
                });
                if self.state == SessionState::Transcribing {
                    self.display.show_status_with_detail(&text, &response);
                    self.apply(SessionEvent::DisplaySettled);
                }
            }
            ControlMessage::Error { message } => {
                self.display.show_status_with_detail("error", &message);
                self.apply(SessionEvent::RemoteError { message });
            }
            ControlMessage::AudioStart => {
                self.apply(SessionEvent::AudioStart);
                if self.state == SessionState::Speaking {
                    let builder = Arc::clone(&self.sink_builder);
                    if let Err(e) = self.engine.start(Box::new(move || builder())) {
                        tracing::error!(error = %e, "cannot start playback");
                        self.engine.stop();
                        self.apply(SessionEvent::PlaybackFailed);
                    }
                }
            }
            ControlMessage::AudioComplete => {
                self.engine.signal_complete();
            }
            ControlMessage::Connection { message } => {
                tracing::info!(message, "service handshake");
            }
        }
    }

    /// One poll-cycle of work for the current state
    ///
    /// Public so a caller can drive the session without the full loop.
    pub async fn poll(&mut self) {
        match self.state {
            SessionState::Ready => {
                self.apply(SessionEvent::ListeningStarted);
            }
            SessionState::Listening => {
                let frames = self.microphone.take_frames();
                for frame in frames {
                    let voice = self.vad.evaluate(&frame);
                    if voice && self.spotter.process(frame.samples()) {
                        self.apply(SessionEvent::WakeConfirmed);
                        break;
                    }
                }
            }
            SessionState::Recording => self.run_capture_cycle().await,
            SessionState::Processing | SessionState::Transcribing => {
                let expired = self
                    .processing_deadline
                    .is_some_and(|deadline| Instant::now() >= deadline);
                if expired {
                    self.display.show_status_with_detail("ready", "no response, try again");
                    self.apply(SessionEvent::ProcessingTimedOut);
                }
            }
            SessionState::Speaking => {
                if self.engine.state() == PlaybackState::Idle {
                    // Reply text arrived but audio never did
                    let expired = self
                        .processing_deadline
                        .is_some_and(|deadline| Instant::now() >= deadline);
                    if expired {
                        self.display.show_status_with_detail("ready", "no audio received");
                        self.apply(SessionEvent::ProcessingTimedOut);
                    }
                } else if self.engine.is_complete() {
                    let failed = self.engine.failed();
                    self.engine.stop();
                    self.apply(if failed {
                        SessionEvent::PlaybackFailed
                    } else {
                        SessionEvent::PlaybackFinished
                    });
                }
            }
            _ => {}
        }
    }

    /// Request a transition into recording, as a tap on the screen would
    pub fn tap(&mut self) {
        self.apply(SessionEvent::Tap);
    }

    async fn run_capture_cycle(&mut self) {
        let cycle_id = uuid::Uuid::new_v4();
        tracing::info!(%cycle_id, "capture cycle starting");

        // The recording timeout is a cooperative deadline inside the
        // streamer, never a cancellation: a cancelled cycle would drop
        // buffered audio and leave the stream without its terminal marker
        let deadline = Instant::now() + self.config.session.recording_timeout();
        let cycle = self.streamer.run(
            self.microphone.as_mut(),
            &mut self.vad,
            self.uploader.as_ref(),
            Some(deadline),
        );

        match cycle.await {
            Ok(outcome) if outcome.reason == CycleEnd::Deadline => {
                tracing::warn!(%cycle_id, chunks = outcome.chunks_sent, "capture cycle timed out");
                self.display.show_status_with_detail("ready", "recording timed out");
                self.apply(SessionEvent::RecordingTimedOut);
            }
            Ok(outcome) => {
                tracing::debug!(%cycle_id, chunks = outcome.chunks_sent, "capture cycle complete");
                self.apply(SessionEvent::RecordingFinished);
            }
            Err(e) => {
                tracing::error!(error = %e, "capture cycle failed");
                self.display.show_status_with_detail("error", "could not send audio");
                self.apply(SessionEvent::TransportError(e.to_string()));
            }
        }
    }

    fn apply(&mut self, event: SessionEvent) {
        let Some(next) = transition(self.state, &event) else {
            tracing::debug!(state = ?self.state, event = ?event, "event ignored");
            return;
        };
        tracing::info!(from = ?self.state, to = ?next, "session transition");
        self.state = next;
        self.enter(next);
    }

    fn enter(&mut self, state: SessionState) {
        self.state = state;
        match state {
            SessionState::Recording => {
                self.spotter.reset();
                self.display.show_status(state.label());
            }
            SessionState::Processing => {
                self.processing_deadline =
                    Some(Instant::now() + self.config.session.processing_timeout());
                self.display.show_status(state.label());
            }
            SessionState::Ready => {
                self.processing_deadline = None;
                self.display.show_status(state.label());
            }
            SessionState::Error => {
                self.engine.stop();
                self.display.show_status_with_detail(state.label(), "tap to retry");
            }
            SessionState::Transcribing => {
                // The transcription text itself is shown by the caller
            }
            _ => {
                self.display.show_status(state.label());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionEvent as E;
    use SessionState as S;

    #[test]
    fn happy_path_through_the_table() {
        let mut state = S::ConnectingNetwork;
        let script = [
            (E::Connected, S::Ready),
            (E::ListeningStarted, S::Listening),
            (E::WakeConfirmed, S::Recording),
            (E::RecordingFinished, S::Processing),
            (
                E::Transcription {
                    text: "hello".into(),
                    response: "hi".into(),
                },
                S::Transcribing,
            ),
            (E::DisplaySettled, S::Speaking),
            (E::PlaybackFinished, S::Ready),
        ];

        for (event, expected) in script {
            state = transition(state, &event).expect("transition should apply");
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn audio_start_skips_transcribing() {
        assert_eq!(
            transition(S::Processing, &E::AudioStart),
            Some(S::Speaking)
        );
        assert_eq!(
            transition(S::Transcribing, &E::AudioStart),
            Some(S::Speaking)
        );
    }

    #[test]
    fn tap_starts_and_ends_recording() {
        assert_eq!(transition(S::Ready, &E::Tap), Some(S::Recording));
        assert_eq!(transition(S::Listening, &E::Tap), Some(S::Recording));
        assert_eq!(transition(S::Recording, &E::Tap), Some(S::Processing));
    }

    #[test]
    fn transport_faults_reach_error_from_anywhere() {
        for state in [
            S::Ready,
            S::Listening,
            S::Recording,
            S::Processing,
            S::Speaking,
        ] {
            assert_eq!(
                transition(state, &E::TransportError("reset".into())),
                Some(S::Error)
            );
            assert_eq!(transition(state, &E::Disconnected), Some(S::Error));
        }
        // Already in Error: no self-loop
        assert_eq!(transition(S::Error, &E::Disconnected), None);
    }

    #[test]
    fn error_recovers_via_tap() {
        assert_eq!(transition(S::Error, &E::Tap), Some(S::ConnectingService));
        assert_eq!(
            transition(S::ConnectingService, &E::Connected),
            Some(S::Ready)
        );
    }

    #[test]
    fn timeouts_return_to_ready() {
        assert_eq!(
            transition(S::Processing, &E::ProcessingTimedOut),
            Some(S::Ready)
        );
        assert_eq!(
            transition(S::Transcribing, &E::ProcessingTimedOut),
            Some(S::Ready)
        );
        assert_eq!(
            transition(S::Recording, &E::RecordingTimedOut),
            Some(S::Ready)
        );
    }

    #[test]
    fn irrelevant_events_are_ignored() {
        assert_eq!(transition(S::Ready, &E::PlaybackFinished), None);
        assert_eq!(transition(S::Listening, &E::AudioStart), None);
        assert_eq!(
            transition(S::Ready, &E::Transcription {
                text: String::new(),
                response: String::new(),
            }),
            None
        );
    }
}
