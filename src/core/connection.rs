//! Collaborator contracts for protocol adapters
//!
//! RTSP, WebRTC and vendor-cloud adapters live outside this crate. They hand
//! the engine [`Receiver`]s (producers) and accept them back as tracks
//! (consumers); the engine itself never drives these traits.

use std::fmt;

use super::codec::{Codec, Media};
use crate::error::Result;
use crate::graph::Receiver;

/// Something that produces media, typically a source client
pub trait Producer: Send + Sync {
    /// Medias with local direction: recvonly for video/audio, sendonly for
    /// backchannel
    fn get_medias(&self) -> Vec<Media>;

    /// Receiver that will produce packets for the codec
    fn get_track(&self, media: &Media, codec: &Codec) -> Result<Receiver>;

    fn start(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;
}

/// Something that consumes media, typically a viewer session
pub trait Consumer: Send + Sync {
    /// Medias with local direction: sendonly for video/audio, recvonly for
    /// backchannel
    fn get_medias(&self) -> Vec<Media>;

    /// Bind a sender of this consumer to the producer's receiver
    fn add_track(&self, media: &Media, codec: &Codec, track: &Receiver) -> Result<()>;

    fn stop(&self) -> Result<()>;
}

/// Connection role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Typical source (client)
    ActiveProducer,
    PassiveConsumer,
    PassiveProducer,
    ActiveConsumer,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::ActiveProducer => "active producer",
            Mode::PassiveConsumer => "passive consumer",
            Mode::PassiveProducer => "passive producer",
            Mode::ActiveConsumer => "active consumer",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_display() {
        assert_eq!(Mode::ActiveProducer.to_string(), "active producer");
        assert_eq!(Mode::PassiveConsumer.to_string(), "passive consumer");
    }
}
