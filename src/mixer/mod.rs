//! Live audio mixing
//!
//! An [`RtpMixer`] is a graph node with any number of parent tracks. One
//! parent is passed through; two or more are mixed by an external engine
//! (ffmpeg) that is fed over loopback UDP and supervised by the mixer.
//!
//! ```text
//!   Receiver A ──forward hook──┐                     ┌──► Sender
//!   Receiver B ──forward hook──┼──► RtpMixer ──...───┼──► Sender
//!   Receiver C ──forward hook──┘      │  ▲           └──► ...
//!                        per-parent   │  │ mixed RTP
//!                        RTP streams  ▼  │
//!                                  ffmpeg amix
//! ```

pub mod config;
pub mod engine;
pub mod rtp_mixer;
pub mod sdp;
pub mod supervisor;

pub use config::MixerConfig;
pub use engine::{EngineControl, EngineExit, EngineHandle, EngineJob, EngineLauncher, FfmpegLauncher};
pub use rtp_mixer::RtpMixer;
pub use supervisor::EngineState;
