//! Transport seam and control protocol
//!
//! The network client itself lives outside this core; it implements
//! [`Transport`] for outbound sends and feeds [`TransportEvent`]s into a
//! channel the session loop consumes. Text frames carry the JSON control
//! protocol, binary frames carry opaque PCM chunks for the playback engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::Result;

/// Default depth of the transport event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Events delivered by the network client, in arrival order
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
    /// Transport-level failure
    Error(String),
    /// Inbound JSON text frame
    Text(String),
    /// Inbound binary frame (PCM audio chunk)
    Binary(Vec<u8>),
}

/// Sending half of the transport event channel, held by the network client
pub type EventSender = mpsc::Sender<TransportEvent>;

/// Receiving half, held by the session loop
pub type EventReceiver = mpsc::Receiver<TransportEvent>;

/// Create the transport event channel at the default depth
#[must_use]
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// Outbound side of the persistent duplex connection
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Transport`] if the frame cannot be delivered
    async fn send_text(&self, payload: &str) -> Result<()>;

    /// Send a binary frame
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Transport`] if the frame cannot be delivered
    async fn send_binary(&self, payload: &[u8]) -> Result<()>;
}

/// Control protocol messages carried in text frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Recognized speech plus the reply text
    Transcription { text: String, response: String },
    /// Remote error, shown to the user before returning to ready
    Error { message: String },
    /// Downlink playback begins; binary frames follow
    AudioStart,
    /// No more audio chunks will arrive
    AudioComplete,
    /// Informational handshake message
    Connection { message: String },
}

impl ControlMessage {
    /// Parse a control message from a raw text frame
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Serialization`] on malformed or unknown
    /// messages; callers log and drop these per the protocol-fault policy
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_variants() {
        assert_eq!(
            ControlMessage::parse(r#"{"type":"audio_start"}"#).unwrap(),
            ControlMessage::AudioStart
        );
        assert_eq!(
            ControlMessage::parse(r#"{"type":"audio_complete"}"#).unwrap(),
            ControlMessage::AudioComplete
        );
        assert_eq!(
            ControlMessage::parse(
                r#"{"type":"transcription","text":"turn it off","response":"done"}"#
            )
            .unwrap(),
            ControlMessage::Transcription {
                text: "turn it off".to_string(),
                response: "done".to_string(),
            }
        );
        assert_eq!(
            ControlMessage::parse(r#"{"type":"error","message":"overloaded"}"#).unwrap(),
            ControlMessage::Error {
                message: "overloaded".to_string(),
            }
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(ControlMessage::parse(r#"{"type":"reboot"}"#).is_err());
        assert!(ControlMessage::parse("not json").is_err());
    }
}
