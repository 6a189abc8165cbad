//! Codec handler registry
//!
//! Maps codec names to factories that build a [`CodecHandler`] for a
//! produced track. Registries are plain values: build one at startup, share
//! it behind an `Arc`, and look codecs up as tracks appear.
//!
//! ```text
//!   CodecRegistry
//!   ┌──────────────────────────────┐
//!   │ "H264" ──► factory(codec)    │──► CodecHandler ──bind()──► Receiver
//!   │ "H265" ──► factory(codec)    │
//!   │ ...                          │
//!   └──────────────────────────────┘
//! ```
//!
//! [`CodecHandler`]: crate::media::CodecHandler

pub mod store;

pub use store::{CodecHandlerFactory, CodecRegistry};
