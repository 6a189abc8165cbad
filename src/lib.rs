//! In-process RTP media routing
//!
//! Protocol adapters hand produced tracks to this crate as [`Receiver`]s and
//! attach consumers as [`Sender`]s. In between:
//!
//! - the graph fans every packet out to all consumers without ever letting
//!   a slow consumer stall the producer,
//! - a [`CodecHandler`] keeps the last GOPs so a late joiner starts decoding
//!   immediately, then hands it over to the live stream without gaps or
//!   duplicates,
//! - an [`RtpMixer`] merges several audio tracks into one, through an
//!   external ffmpeg process it supervises.
//!
//! ```text
//!   Producer ──► Receiver ──┬──► Sender ──► Consumer
//!                           ├──► CodecHandler (GOP cache) ─ catch-up ─► Sender
//!                           └──► RtpMixer ──► Sender
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use rtp_relay::core::codec::{DIRECTION_SENDONLY, KIND_VIDEO};
//! use rtp_relay::core::{handler, Codec, Media, PAYLOAD_TYPE_RAW};
//! use rtp_relay::graph::{Graph, Receiver, Sender};
//! use rtp_relay::registry::CodecRegistry;
//!
//! #[tokio::main]
//! async fn main() -> rtp_relay::Result<()> {
//!     let graph = Graph::new();
//!     let registry = CodecRegistry::with_defaults();
//!
//!     let codec = Codec::new("H264", 90_000, PAYLOAD_TYPE_RAW);
//!     let media = Media::new(KIND_VIDEO, DIRECTION_SENDONLY, vec![codec.clone()]);
//!     let receiver = Receiver::new(&graph, media.clone(), codec.clone());
//!
//!     let cache = Arc::new(registry.create(&codec)?);
//!     cache.bind(&receiver);
//!
//!     // ... the producer feeds `receiver.input(&packet)` ...
//!
//!     let sender = Sender::new(&graph, media, codec);
//!     sender.set_output(handler(|packet| println!("{} bytes", packet.len())));
//!     sender.bind(&receiver);
//!     cache.catch_up(&sender, 30).await;
//!
//!     Ok(())
//! }
//! ```
//!
//! [`Receiver`]: graph::Receiver
//! [`Sender`]: graph::Sender
//! [`CodecHandler`]: media::CodecHandler
//! [`RtpMixer`]: mixer::RtpMixer

pub mod core;
pub mod error;
pub mod graph;
pub mod media;
pub mod mixer;
pub mod registry;
pub mod stats;
pub mod sync;

pub use error::{Error, Result};
