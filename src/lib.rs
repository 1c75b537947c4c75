//! voxcore: real-time speech I/O core for a networked voice appliance
//!
//! Captures microphone audio, decides when speech is present, spots a wake
//! phrase on a rolling window, streams recorded speech to a remote service
//! in chunks, and paces playback of network-delivered audio into the
//! speaker without starving or overflowing it.
//!
//! The crate is organized around five pieces:
//!
//! - [`vad::VoiceDetector`]: noise-adaptive voice activity detection
//! - [`wake::WakeSpotter`]: energy-pattern wake phrase spotting
//! - [`uplink::UplinkStreamer`]: gated, chunked upload of captured speech
//! - [`downlink::PlaybackEngine`]: bounded-queue playback with pre-buffer
//!   gating and sink backpressure
//! - [`session::Session`]: the state machine sequencing all of the above
//!
//! Hardware, network, and display integration happen through the
//! [`audio::Microphone`], [`audio::AudioSink`], [`transport::Transport`],
//! and [`display::Display`] seams.

pub mod audio;
pub mod config;
pub mod display;
pub mod downlink;
mod error;
pub mod session;
pub mod transport;
pub mod uplink;
pub mod vad;
pub mod wake;

pub use error::{Error, Result};
