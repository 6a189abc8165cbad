//! Bounded, drop-on-full absorption point in front of a consumer
//!
//! A sender never blocks its producer. Input packets go into a fixed-size
//! queue; when the queue is full the packet is dropped and counted. A single
//! worker task drains the queue in FIFO order into the node's output once
//! [`Sender::start`] is called.
//!
//! Lifecycle:
//! ```text
//!   new ──start()──► connected ──close()──► closed
//!    └─────────────close()─────────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::core::{handler, Codec, HandlerFunc, Media, Packet};
use crate::stats::{Counters, NodeInfo, NodeStats};

use super::config::SenderConfig;
use super::node::{Graph, Node};
use super::receiver::Receiver;

/// Sender lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    /// Buffer allocated, no drain worker
    New,
    /// Drain worker running
    Connected,
    /// Buffer closed
    Closed,
}

impl SenderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderState::New => "new",
            SenderState::Connected => "connected",
            SenderState::Closed => "closed",
        }
    }
}

impl fmt::Display for SenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Shared {
    /// `None` once closed
    buf: Mutex<Option<mpsc::Sender<Packet>>>,
    /// Read side, until the drain worker takes it
    queue: Mutex<Option<mpsc::Receiver<Packet>>>,
    /// Drain worker, once started
    done: Mutex<Option<JoinHandle<()>>>,
    counters: Counters,
    capacity: usize,
}

impl Shared {
    fn push(&self, packet: &Packet) {
        let buf = self.buf.lock();
        let Some(tx) = buf.as_ref() else {
            return;
        };
        match tx.try_send(packet.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.counters.record_drop(),
            Err(TrySendError::Closed(_)) => {}
        }
    }

    fn close_buffer(&self) {
        self.buf.lock().take();
    }
}

/// Consumer-side node with its own packet queue
#[derive(Clone)]
pub struct Sender {
    node: Node,
    media: Media,
    shared: Arc<Shared>,
}

impl Sender {
    /// Create a sender sized by the default [`SenderConfig`]
    pub fn new(graph: &Arc<Graph>, media: Media, codec: Codec) -> Self {
        Self::with_config(graph, media, codec, &SenderConfig::default())
    }

    pub fn with_config(graph: &Arc<Graph>, media: Media, codec: Codec, config: &SenderConfig) -> Self {
        let capacity = config.buffer_size(&codec);
        let (tx, rx) = mpsc::channel(capacity);
        let node = graph.create_node(codec);

        let shared = Arc::new(Shared {
            buf: Mutex::new(Some(tx)),
            queue: Mutex::new(Some(rx)),
            done: Mutex::new(None),
            counters: Counters::new(),
            capacity,
        });

        let input = Arc::clone(&shared);
        node.set_input(handler(move |packet| input.push(packet)));

        let on_close = Arc::clone(&shared);
        node.on_close(move || on_close.close_buffer());

        Self {
            node,
            media,
            shared,
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn media(&self) -> &Media {
        &self.media
    }

    pub fn codec(&self) -> &Codec {
        self.node.codec()
    }

    /// Set the consumer's write function
    pub fn set_output(&self, output: HandlerFunc) {
        self.node.set_output(output);
    }

    /// Queue a packet, dropping it when the buffer is full
    pub fn input(&self, packet: &Packet) {
        self.node.input(packet);
    }

    /// Deliver a packet straight to the output, bypassing the queue
    ///
    /// Used to replay cached packets before the live queue is drained.
    pub fn send_direct(&self, packet: &Packet) {
        self.shared.counters.record(packet.len());
        self.node.output(packet);
    }

    /// Take one queued packet without blocking
    ///
    /// Returns `None` when the queue is empty or the drain worker already
    /// owns it.
    pub fn try_recv_queued(&self) -> Option<Packet> {
        self.shared.queue.lock().as_mut()?.try_recv().ok()
    }

    /// Subscribe to a receiver's packets
    pub fn bind(&self, receiver: &Receiver) {
        receiver.append_child(&self.node);
    }

    /// Launch the drain worker
    ///
    /// Must be called from within a tokio runtime. A second call, or a call
    /// after close, does nothing.
    pub fn start(&self) {
        let mut done = self.shared.done.lock();
        if done.is_some() || self.shared.buf.lock().is_none() {
            return;
        }
        let Some(mut rx) = self.shared.queue.lock().take() else {
            return;
        };

        let node = self.node.clone();
        let shared = Arc::clone(&self.shared);
        *done = Some(tokio::spawn(async move {
            while let Some(packet) = rx.recv().await {
                shared.counters.record(packet.len());
                node.output(&packet);
            }
            tracing::trace!(node = %node.id(), "Sender drained");
        }));

        tracing::debug!(node = %self.node.id(), codec = %self.codec(), "Sender started");
    }

    /// Wait for the drain worker to finish after close
    pub async fn join(&self) {
        let handle = self.shared.done.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn state(&self) -> SenderState {
        if self.shared.buf.lock().is_none() {
            SenderState::Closed
        } else if self.shared.done.lock().is_none() {
            SenderState::New
        } else {
            SenderState::Connected
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Packets dropped on a full buffer
    pub fn drops(&self) -> u64 {
        self.shared.counters.drops()
    }

    pub fn stats(&self) -> NodeStats {
        self.shared.counters.snapshot()
    }

    pub fn info(&self) -> NodeInfo {
        let stats = self.stats();
        NodeInfo {
            id: self.node.id(),
            codec: self.codec().clone(),
            parents: self.node.parents(),
            childs: self.node.childs(),
            bytes: stats.bytes,
            packets: stats.packets,
            drops: stats.drops,
        }
    }

    /// Close the buffer and detach from the graph
    pub fn close(&self) {
        self.shared.close_buffer();
        self.node.close();
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, bytes={}, receivers={}",
            self.codec(),
            self.shared.counters.bytes(),
            self.node.parents().len()
        )?;
        let drops = self.drops();
        if drops > 0 {
            write!(f, ", overflow={}", drops)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::{DIRECTION_SENDONLY, KIND_AUDIO};
    use bytes::Bytes;
    use std::time::Duration;

    fn sender(graph: &Arc<Graph>, capacity: usize) -> Sender {
        let codec = Codec::new("PCMU", 8000, 0);
        let media = Media::new(KIND_AUDIO, DIRECTION_SENDONLY, vec![codec.clone()]);
        Sender::with_config(graph, media, codec, &SenderConfig::uniform(capacity))
    }

    fn packet(byte: u8) -> Packet {
        Packet::rtp(byte as u16, 0, true, Bytes::from(vec![byte]))
    }

    #[test]
    fn test_never_blocks_and_counts_drops() {
        let graph = Graph::new();
        let s = sender(&graph, 4);

        for i in 0..5 {
            s.input(&packet(i));
        }

        assert_eq!(s.drops(), 1);
        assert_eq!(s.state(), SenderState::New);
        assert_eq!(s.to_string(), "PCMU/8000, bytes=0, receivers=0, overflow=1");
    }

    #[tokio::test]
    async fn test_fifo_output() {
        let graph = Graph::new();
        let s = sender(&graph, 16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        s.set_output(handler(move |p| sink.lock().push(p.payload[0])));

        for i in 1..=3 {
            s.input(&packet(i));
        }
        s.start();
        assert_eq!(s.state(), SenderState::Connected);

        s.close();
        assert_eq!(s.state(), SenderState::Closed);
        s.join().await;

        assert_eq!(*seen.lock(), vec![1, 2, 3]);
        assert_eq!(s.stats().packets, 3);
    }

    #[tokio::test]
    async fn test_start_only_once() {
        let graph = Graph::new();
        let s = sender(&graph, 16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        s.set_output(handler(move |p| sink.lock().push(p.payload[0])));

        s.start();
        s.start();
        s.input(&packet(7));

        tokio::time::timeout(Duration::from_secs(1), async {
            while seen.lock().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        s.close();
        s.join().await;
        assert_eq!(*seen.lock(), vec![7]);
    }

    #[test]
    fn test_close_idempotent_and_input_ignored() {
        let graph = Graph::new();
        let s = sender(&graph, 2);

        s.close();
        s.close();
        s.input(&packet(1));

        assert_eq!(s.state(), SenderState::Closed);
        assert_eq!(s.drops(), 0);
        assert!(s.try_recv_queued().is_none());
    }

    #[test]
    fn test_start_after_close_is_noop() {
        let graph = Graph::new();
        let s = sender(&graph, 2);
        s.close();

        tokio_test::block_on(async { s.start() });
        assert_eq!(s.state(), SenderState::Closed);
    }

    #[test]
    fn test_bound_sender_closed_by_receiver() {
        let graph = Graph::new();
        let codec = Codec::new("PCMU", 8000, 0);
        let media = Media::new(KIND_AUDIO, DIRECTION_SENDONLY, vec![codec.clone()]);
        let recv = Receiver::new(&graph, media, codec);
        let s = sender(&graph, 8);

        s.bind(&recv);
        recv.input(&packet(1));
        assert_eq!(s.try_recv_queued().map(|p| p.payload[0]), Some(1));

        recv.close();
        assert_eq!(s.state(), SenderState::Closed);
    }

    #[test]
    fn test_send_direct_bypasses_queue() {
        let graph = Graph::new();
        let s = sender(&graph, 1);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        s.set_output(handler(move |p| sink.lock().push(p.payload[0])));

        s.send_direct(&packet(5));
        assert_eq!(*seen.lock(), vec![5]);
        assert!(s.try_recv_queued().is_none());
    }
}
