//! Producer/consumer routing graph
//!
//! ```text
//!   [Producer] ──► Receiver ──┬──► Sender ──► drain task ──► network write
//!                             ├──► Sender ──► ...
//!                             ├──► CodecHandler tap (GOP cache)
//!                             └──► RtpMixer (via forward hook)
//! ```
//!
//! Receivers fan out synchronously; senders absorb backpressure by dropping.
//! Closing a node detaches it from its neighbours and closes every child it
//! leaves without a parent.

pub mod config;
pub mod node;
pub mod receiver;
pub mod sender;

pub use config::SenderConfig;
pub use node::{move_node, Graph, Node, NodeId, WeakNode};
pub use receiver::Receiver;
pub use sender::{Sender, SenderState};
