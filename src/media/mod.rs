//! Media handling for produced tracks
//!
//! This module provides:
//! - GOP caching for late-joiner support
//! - H.264/H.265 keyframe detection on AVCC frames
//! - The per-codec ingest pipeline and catch-up replay

pub mod gop;
pub mod h264;
pub mod handler;

pub use gop::GopCache;
pub use h264::{is_keyframe_h264, is_keyframe_h265, NaluType};
pub use handler::{CatchUp, CodecHandler, CodecHandlerBuilder, KeyframeFn, Payloader, PipelineFactory};
