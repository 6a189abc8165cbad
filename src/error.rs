//! Error types for the relay engine
//!
//! Only structural failures surface as errors. Packet loss on a full sender
//! buffer is counted on the sender and never reported here.

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to allocate port: {0}")]
    PortAllocation(std::io::Error),

    #[error("failed to generate SDP: {0}")]
    Sdp(String),

    #[error("failed to start mixing engine: {0}")]
    EngineSpawn(String),

    #[error("no parents")]
    NoParents,

    #[error("no handler registered for codec {0}")]
    UnknownCodec(String),

    #[error("can't get track")]
    TrackUnavailable,

    #[error("unsupported codec")]
    UnsupportedCodec,

    #[error("wrong media direction")]
    WrongMediaDirection,

    #[error("invalid RTP packet: {0}")]
    Packet(&'static str),

    #[error("RTP codec error: {0}")]
    Rtp(#[from] webrtc_util::Error),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
