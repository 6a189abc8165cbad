//! Codec pipeline with catch-up replay
//!
//! A [`CodecHandler`] sits on a produced track. Every packet goes two ways:
//! into the GOP cache as an in-flight RTP fragment, and through the codec's
//! ingest chain (RTP depayloader or AVCC repair) which ends in the cache as
//! a completed access unit.
//!
//! When a consumer joins late:
//! 1. [`CodecHandler::send_cache_to`] replays the cache at a fixed virtual
//!    frame rate with synthetic, evenly spaced timestamps that end where the
//!    live stream resumes.
//! 2. [`CodecHandler::send_queue_to`] flushes whatever queued on the sender
//!    during the replay, dropping duplicates and continuing the timestamps.
//! 3. The sender is started and runs live from there.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::core::packet::VERSION_RTP;
use crate::core::{chain, handler, seq_le, Codec, Filter, HandlerFunc, Header, Packet};
use crate::graph::{Node, Receiver, Sender};

use super::gop::GopCache;

/// Default MTU used when re-payloading cached frames
pub const DEFAULT_MTU: u16 = 1460;

/// Clock rate assumed when a codec does not state one
const DEFAULT_CLOCK_RATE: u32 = 90_000;

/// Decides whether a completed access unit is a keyframe
pub type KeyframeFn = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// Builds an ingest stage in front of `next` (RTP depay, AVCC repair)
pub type PipelineFactory = Arc<dyn Fn(&Codec, HandlerFunc) -> HandlerFunc + Send + Sync>;

/// Splits a reassembled frame into RTP payloads no larger than `mtu`
pub trait Payloader: Send + Sync {
    fn payload(&self, mtu: u16, payload: &[u8]) -> Vec<Bytes>;
}

/// Hand-off point between cache replay and live delivery
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatchUp {
    /// Timestamp the first live frame should carry
    pub next_timestamp: u32,
    /// Sequence number of the last replayed packet
    pub last_sequence: u16,
    /// Number of replayed packets
    pub sent: usize,
}

/// Builder for [`CodecHandler`]
pub struct CodecHandlerBuilder {
    codec: Codec,
    is_keyframe: KeyframeFn,
    rtp_depay: Option<PipelineFactory>,
    avcc_repair: Option<PipelineFactory>,
    payloader: Option<Arc<dyn Payloader>>,
    mtu: u16,
}

impl CodecHandlerBuilder {
    /// Depayloader applied when the codec is RTP framed
    pub fn rtp_depay(mut self, factory: PipelineFactory) -> Self {
        self.rtp_depay = Some(factory);
        self
    }

    /// Bitstream repair applied when the codec delivers raw frames
    pub fn avcc_repair(mut self, factory: PipelineFactory) -> Self {
        self.avcc_repair = Some(factory);
        self
    }

    /// Payloader used to turn cached frames back into RTP on replay
    pub fn payloader(mut self, payloader: Arc<dyn Payloader>) -> Self {
        self.payloader = Some(payloader);
        self
    }

    pub fn mtu(mut self, mtu: u16) -> Self {
        self.mtu = mtu.max(1);
        self
    }

    pub fn build(self) -> CodecHandler {
        let cache = Arc::new(GopCache::new());

        let gop_cache = Arc::clone(&cache);
        let is_keyframe = Arc::clone(&self.is_keyframe);
        let gop_handler = handler(move |packet: &Packet| {
            let keyframe = is_keyframe(&packet.payload);
            gop_cache.add(packet, keyframe);
        });

        let factory = if self.codec.is_rtp() {
            self.rtp_depay
        } else {
            self.avcc_repair
        };
        let mut filters: Vec<Filter> = Vec::new();
        if let Some(factory) = factory {
            let codec = self.codec.clone();
            filters.push(Arc::new(move |next: HandlerFunc| factory(&codec, next)));
        }
        let input = chain(&filters, gop_handler);

        CodecHandler {
            codec: self.codec,
            cache,
            input,
            payloader: self.payloader,
            mtu: self.mtu,
        }
    }
}

/// Ingest pipeline, GOP cache and catch-up logic for one produced track
pub struct CodecHandler {
    codec: Codec,
    cache: Arc<GopCache>,
    input: HandlerFunc,
    payloader: Option<Arc<dyn Payloader>>,
    mtu: u16,
}

impl CodecHandler {
    pub fn builder(codec: Codec, is_keyframe: KeyframeFn) -> CodecHandlerBuilder {
        CodecHandlerBuilder {
            codec,
            is_keyframe,
            rtp_depay: None,
            avcc_repair: None,
            payloader: None,
            mtu: DEFAULT_MTU,
        }
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn cache(&self) -> &GopCache {
        &self.cache
    }

    /// Feed one packet from the producer
    pub fn process_packet(&self, packet: &Packet) {
        self.cache.add_rtp_fragment(packet);
        (self.input)(packet);
    }

    /// Tap a producer's receiver so every packet reaches this handler
    ///
    /// The returned node is a child of `receiver`; closing either detaches
    /// the handler.
    pub fn bind(self: &Arc<Self>, receiver: &Receiver) -> Node {
        let node = receiver.node().graph().create_node(self.codec.clone());
        let weak = Arc::downgrade(self);
        node.set_input(handler(move |packet| {
            if let Some(this) = weak.upgrade() {
                this.process_packet(packet);
            }
        }));
        receiver.append_child(&node);
        node
    }

    fn ticks_per_frame(&self, playback_fps: u32) -> u32 {
        let clock_rate = match self.codec.clock_rate {
            0 => DEFAULT_CLOCK_RATE,
            rate => rate,
        };
        (clock_rate / playback_fps).max(1)
    }

    /// Split a cached frame into the packets that will be replayed
    fn replay_packets(&self, frame: Packet) -> Vec<Packet> {
        let Some(payloader) = self.payloader.as_ref().filter(|_| self.codec.is_rtp()) else {
            return vec![frame];
        };

        let payloads = payloader.payload(self.mtu, &frame.payload);
        let last = payloads.len().saturating_sub(1);
        payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| Packet {
                header: Header {
                    version: VERSION_RTP,
                    marker: i == last,
                    payload_type: self.codec.payload_type,
                    ssrc: frame.header.ssrc,
                    ..Default::default()
                },
                payload,
            })
            .collect()
    }

    /// Replay the cache to a newly attached sender
    ///
    /// Cached frames are emitted one per `1 / playback_fps`, with timestamps
    /// spaced `clock_rate / playback_fps` apart and ending at the last cached
    /// timestamp. Sequence numbers are renumbered to be contiguous and to end
    /// at the last cached sequence number. In-flight RTP fragments, if any,
    /// are spread over one extra frame interval.
    pub async fn send_cache_to(&self, sender: &Sender, playback_fps: u32) -> CatchUp {
        let Some(cached) = self.cache.get() else {
            tracing::debug!(sender = %sender.node().id(), codec = %self.codec, "No cached content");
            return CatchUp::default();
        };
        let Some(last) = cached.last() else {
            return CatchUp::default();
        };

        let playback_fps = playback_fps.max(1);
        let frame_duration = Duration::from_secs(1) / playback_fps;
        let ticks = self.ticks_per_frame(playback_fps);
        let last_original_timestamp = last.header.timestamp;
        let cache_end_sequence = last.header.sequence_number;

        let (avcc_frames, rtp_fragments): (Vec<Packet>, Vec<Packet>) =
            cached.into_iter().partition(Packet::is_avcc);
        let frame_count = avcc_frames.len();

        let mut groups: Vec<Vec<Packet>> = avcc_frames
            .into_iter()
            .map(|frame| self.replay_packets(frame))
            .collect();
        if !rtp_fragments.is_empty() {
            groups.push(rtp_fragments);
        }

        let total: usize = groups.iter().map(Vec::len).sum();
        let mut sequence = cache_end_sequence.wrapping_sub((total as u16).wrapping_sub(1));
        let mut timestamp =
            last_original_timestamp.wrapping_sub((frame_count as u32).wrapping_mul(ticks));

        for group in groups {
            if group.is_empty() {
                continue;
            }
            let per_packet = frame_duration / group.len() as u32;
            for mut packet in group {
                packet.header.sequence_number = sequence;
                packet.header.timestamp = timestamp;
                sender.send_direct(&packet);
                tokio::time::sleep(per_packet).await;
                sequence = sequence.wrapping_add(1);
            }
            timestamp = timestamp.wrapping_add(ticks);
        }

        let catch_up = CatchUp {
            next_timestamp: timestamp,
            last_sequence: sequence.wrapping_sub(1),
            sent: total,
        };

        tracing::info!(
            sender = %sender.node().id(),
            codec = %self.codec,
            frames = frame_count,
            packets = total,
            next_timestamp = catch_up.next_timestamp,
            last_sequence = catch_up.last_sequence,
            "Cache replayed"
        );

        catch_up
    }

    /// Flush packets queued on the sender while the cache was replayed
    ///
    /// Packets at or before `catch_up.last_sequence` were already replayed
    /// and are dropped. Timestamps continue from `catch_up.next_timestamp`
    /// (or the first live timestamp when that is zero), advancing one frame
    /// interval on each marker bit. Returns once the queue is empty.
    pub fn send_queue_to(&self, sender: &Sender, playback_fps: u32, catch_up: &CatchUp) -> usize {
        let ticks = self.ticks_per_frame(playback_fps.max(1));
        let mut current_timestamp = catch_up.next_timestamp;
        let mut delivered = 0;
        let mut skipped = 0;

        while let Some(mut packet) = sender.try_recv_queued() {
            if catch_up.sent > 0 && seq_le(packet.header.sequence_number, catch_up.last_sequence) {
                skipped += 1;
                continue;
            }

            if current_timestamp == 0 {
                current_timestamp = packet.header.timestamp;
            }
            packet.header.timestamp = current_timestamp;
            sender.send_direct(&packet);
            delivered += 1;

            if packet.header.marker {
                current_timestamp = current_timestamp.wrapping_add(ticks);
            }
        }

        tracing::debug!(
            sender = %sender.node().id(),
            delivered,
            skipped,
            "Live queue flushed, switching to live"
        );

        delivered
    }

    /// Replay the cache, flush the queue, then start live delivery
    pub async fn catch_up(&self, sender: &Sender, playback_fps: u32) -> CatchUp {
        let catch_up = self.send_cache_to(sender, playback_fps).await;
        self.send_queue_to(sender, playback_fps, &catch_up);
        sender.start();
        catch_up
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::{DIRECTION_SENDONLY, KIND_VIDEO};
    use crate::core::{Media, PAYLOAD_TYPE_RAW};
    use crate::graph::{Graph, SenderConfig};
    use parking_lot::Mutex;

    const FPS: u32 = 1000;

    fn keyframe_flag() -> KeyframeFn {
        Arc::new(|payload: &[u8]| payload.first() == Some(&1))
    }

    /// Every RTP packet is a whole frame; emits it as AVCC
    fn passthrough_depay() -> PipelineFactory {
        Arc::new(|_codec: &Codec, next: HandlerFunc| {
            handler(move |packet: &Packet| {
                let mut frame = packet.clone();
                frame.header.version = 0;
                next(&frame)
            })
        })
    }

    struct Chunker;

    impl Payloader for Chunker {
        fn payload(&self, mtu: u16, payload: &[u8]) -> Vec<Bytes> {
            payload
                .chunks(mtu as usize)
                .map(Bytes::copy_from_slice)
                .collect()
        }
    }

    fn sender(graph: &Arc<Graph>, codec: &Codec) -> (Sender, Arc<Mutex<Vec<Packet>>>) {
        let media = Media::new(KIND_VIDEO, DIRECTION_SENDONLY, vec![codec.clone()]);
        let sender = Sender::with_config(graph, media, codec.clone(), &SenderConfig::uniform(64));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        sender.set_output(handler(move |p| sink.lock().push(p.clone())));
        (sender, seen)
    }

    fn rtp(seq: u16, key: bool) -> Packet {
        let byte = if key { 1 } else { 0 };
        Packet::rtp(seq, seq as u32 * 3000, true, Bytes::from(vec![byte, 0xAA, 0xBB]))
    }

    #[tokio::test]
    async fn test_empty_cache_returns_default() {
        let graph = Graph::new();
        let codec = Codec::new("H264", 90_000, 96);
        let h = CodecHandler::builder(codec.clone(), keyframe_flag()).build();
        let (s, seen) = sender(&graph, &codec);

        let catch_up = h.send_cache_to(&s, FPS).await;
        assert_eq!(catch_up, CatchUp::default());
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_raw_codec_replay_timestamps() {
        let graph = Graph::new();
        let codec = Codec::new("H264", 90_000, PAYLOAD_TYPE_RAW);
        let h = CodecHandler::builder(codec.clone(), keyframe_flag()).build();

        for seq in 1..=4u16 {
            let mut frame = rtp(seq, seq == 1);
            frame.header.version = 0;
            h.process_packet(&frame);
        }

        let (s, seen) = sender(&graph, &codec);
        let catch_up = h.send_cache_to(&s, FPS).await;

        let seen = seen.lock();
        let timestamps: Vec<u32> = seen.iter().map(|p| p.header.timestamp).collect();
        // last cached ts is 12000; 4 frames of 90 ticks end there
        assert_eq!(timestamps, vec![11640, 11730, 11820, 11910]);
        assert_eq!(catch_up.next_timestamp, 12000);
        assert_eq!(catch_up.last_sequence, 4);
        assert_eq!(catch_up.sent, 4);
    }

    #[tokio::test]
    async fn test_rtp_depay_populates_cache() {
        let codec = Codec::new("H264", 90_000, 96);
        let h = CodecHandler::builder(codec, keyframe_flag())
            .rtp_depay(passthrough_depay())
            .build();

        h.process_packet(&rtp(1, false));
        assert!(!h.cache().has_content());

        h.process_packet(&rtp(2, true));
        h.process_packet(&rtp(3, false));

        let cached = h.cache().get().unwrap();
        assert_eq!(cached.len(), 2);
        assert!(cached.iter().all(Packet::is_avcc));
    }

    #[tokio::test]
    async fn test_pending_fragments_spread_over_one_frame() {
        let graph = Graph::new();
        let codec = Codec::new("H264", 90_000, 96);
        // no depay: completed frames never arrive, only fragments
        let h = CodecHandler::builder(codec.clone(), keyframe_flag()).build();

        h.cache().add(&Packet::avcc(10, 30_000, Bytes::from_static(&[1])), true);
        h.cache().add_rtp_fragment(&Packet::rtp(20, 33_000, false, Bytes::from_static(&[5])));
        h.cache().add_rtp_fragment(&Packet::rtp(21, 33_000, true, Bytes::from_static(&[6])));

        let (s, seen) = sender(&graph, &codec);
        let catch_up = h.send_cache_to(&s, FPS).await;

        let seen = seen.lock();
        let headers: Vec<(u16, u32)> = seen
            .iter()
            .map(|p| (p.header.sequence_number, p.header.timestamp))
            .collect();
        // one AVCC frame then both fragments on the following frame slot
        assert_eq!(headers, vec![(19, 32_910), (20, 33_000), (21, 33_000)]);
        assert_eq!(catch_up.next_timestamp, 33_090);
        assert_eq!(catch_up.last_sequence, 21);
    }

    #[tokio::test]
    async fn test_payloader_splits_frames() {
        let graph = Graph::new();
        let codec = Codec::new("H264", 90_000, 96);
        let h = CodecHandler::builder(codec.clone(), keyframe_flag())
            .payloader(Arc::new(Chunker))
            .mtu(2)
            .build();

        h.cache().add(&Packet::avcc(7, 9000, Bytes::from_static(&[1, 2, 3])), true);

        let (s, seen) = sender(&graph, &codec);
        let catch_up = h.send_cache_to(&s, FPS).await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(&seen[0].payload[..], &[1, 2]);
        assert!(!seen[0].header.marker);
        assert!(seen[1].header.marker);
        assert_eq!(seen[1].header.version, VERSION_RTP);
        assert_eq!(seen[1].header.payload_type, 96);
        assert_eq!(
            (seen[0].header.sequence_number, seen[1].header.sequence_number),
            (6, 7)
        );
        assert_eq!(seen[0].header.timestamp, seen[1].header.timestamp);
        assert_eq!(catch_up.last_sequence, 7);
    }

    #[tokio::test]
    async fn test_send_queue_skips_duplicates_and_advances_on_marker() {
        let graph = Graph::new();
        let codec = Codec::new("H264", 90_000, 96);
        let h = CodecHandler::builder(codec.clone(), keyframe_flag()).build();
        let (s, seen) = sender(&graph, &codec);

        s.input(&Packet::rtp(4, 100, true, Bytes::new()));
        s.input(&Packet::rtp(5, 100, true, Bytes::new()));
        s.input(&Packet::rtp(6, 200, false, Bytes::new()));
        s.input(&Packet::rtp(7, 200, true, Bytes::new()));
        s.input(&Packet::rtp(8, 300, true, Bytes::new()));

        let catch_up = CatchUp {
            next_timestamp: 5000,
            last_sequence: 5,
            sent: 5,
        };
        let delivered = h.send_queue_to(&s, FPS, &catch_up);

        assert_eq!(delivered, 3);
        let seen = seen.lock();
        let headers: Vec<(u16, u32)> = seen
            .iter()
            .map(|p| (p.header.sequence_number, p.header.timestamp))
            .collect();
        assert_eq!(headers, vec![(6, 5000), (7, 5000), (8, 5090)]);
    }

    #[tokio::test]
    async fn test_send_queue_seeds_from_live_when_zero() {
        let graph = Graph::new();
        let codec = Codec::new("H264", 90_000, 96);
        let h = CodecHandler::builder(codec.clone(), keyframe_flag()).build();
        let (s, seen) = sender(&graph, &codec);

        s.input(&Packet::rtp(1, 777, true, Bytes::new()));
        s.input(&Packet::rtp(2, 999, true, Bytes::new()));

        let delivered = h.send_queue_to(&s, FPS, &CatchUp::default());
        assert_eq!(delivered, 2);

        let timestamps: Vec<u32> = seen.lock().iter().map(|p| p.header.timestamp).collect();
        assert_eq!(timestamps, vec![777, 867]);
    }

    #[tokio::test]
    async fn test_bind_and_clear_cache() {
        let graph = Graph::new();
        let codec = Codec::new("H264", 90_000, 96);
        let media = Media::new(KIND_VIDEO, DIRECTION_SENDONLY, vec![codec.clone()]);
        let receiver = Receiver::new(&graph, media, codec.clone());
        let h = Arc::new(
            CodecHandler::builder(codec, keyframe_flag())
                .rtp_depay(passthrough_depay())
                .build(),
        );

        let tap = h.bind(&receiver);
        receiver.input(&rtp(1, true));
        assert!(h.cache().has_content());

        h.clear_cache();
        assert!(!h.cache().has_content());

        receiver.close();
        assert!(!tap.is_alive());
    }
}
