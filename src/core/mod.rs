//! Core media types
//!
//! This module provides:
//! - RTP packets and the handler/filter composition contract
//! - Codec and media descriptors
//! - Producer/consumer contracts for protocol adapters

pub mod codec;
pub mod connection;
pub mod packet;

pub use codec::{Codec, Media, PAYLOAD_TYPE_RAW};
pub use connection::{Consumer, Mode, Producer};
pub use packet::{chain, handler, seq_le, Filter, HandlerFunc, Header, Packet};
