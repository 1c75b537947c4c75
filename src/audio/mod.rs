//! Audio primitives and hardware seams
//!
//! Frames, the wake-window ring buffer, and the microphone/speaker traits
//! with their cpal-backed implementations.

mod capture;
mod frame;
mod ring;
mod sink;

pub use capture::{CpalMicrophone, Microphone};
pub use frame::AudioFrame;
pub use ring::CircularBuffer;
pub use sink::{AudioSink, CpalSink, SinkWait};
