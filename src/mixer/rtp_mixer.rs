//! Audio mixer node
//!
//! Parent count drives the topology:
//!
//! | old parents | new parents | action                                  |
//! |-------------|-------------|-----------------------------------------|
//! | any         | 0           | close the mixer                         |
//! | <2          | ≥2          | start the engine                        |
//! | ≥2          | <2          | stop the engine, pass through directly  |
//! | ≥2          | ≥2          | restart the engine for the new set      |
//!
//! With one parent its packets are re-sequenced and forwarded straight to
//! the mixer's children. With two or more, each parent becomes an
//! independent RTP stream towards the engine, and the engine's mixed output
//! is forwarded instead.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use rtp::sequence::{new_random_sequencer, Sequencer};
use tokio::time::{Instant, MissedTickBehavior};

use crate::core::codec::{CODEC_AAC, CODEC_ELD, CODEC_OPUS};
use crate::core::packet::VERSION_RTP;
use crate::core::{handler, Codec, Header, Media, Packet};
use crate::error::{Error, Result};
use crate::graph::{Graph, Node, NodeId};
use crate::stats::{Counters, NodeInfo, NodeStats};

use super::config::MixerConfig;
use super::engine::{EngineJob, EngineLauncher, FfmpegLauncher};
use super::sdp;
use super::supervisor::{spawn_monitor, EngineRun, EngineState};

/// Samples per 20 ms frame when the codec has no clock rate
const DEFAULT_FRAME_SIZE: u32 = 160;

/// Upper bound on waiting for a killed engine to exit
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

type RtpSequencer = Box<dyn Sequencer + Send + Sync>;

fn random_sequencer() -> RtpSequencer {
    Box::new(new_random_sequencer())
}

/// Where a parent packet goes
enum Route {
    /// Single parent: straight to the children
    Direct,
    /// Engine running: into the parent's engine input
    Engine,
    /// Several parents but no engine: unmixed audio is dropped
    Drop,
}

#[derive(Default)]
struct MixerState {
    parents: Vec<Node>,
    parent_ports: HashMap<NodeId, u16>,
    parent_sequencers: HashMap<NodeId, RtpSequencer>,
    parent_timestamps: HashMap<NodeId, u32>,
    last_packet: HashMap<NodeId, Instant>,
    run: Option<EngineRun>,
    engine_state: EngineState,
    /// Bumped on every engine start
    generation: u64,
    closing: bool,
}

/// Mixes N parent audio tracks into one output track
pub struct RtpMixer {
    node: Node,
    media: Media,
    codec: Codec,
    pub(super) config: MixerConfig,
    launcher: Arc<dyn EngineLauncher>,
    state: Mutex<MixerState>,
    /// Serializes topology changes, engine starts and stops
    pub(super) topology: tokio::sync::Mutex<()>,
    /// Output stream numbering
    sequencer: RtpSequencer,
    timestamp: AtomicU32,
    epoch: Instant,
    /// Nanoseconds since `epoch`, negative until the first real packet
    last_real_packet: AtomicI64,
    counters: Counters,
}

impl RtpMixer {
    /// Create a mixer that launches `config.engine_binary` as ffmpeg
    pub fn new(graph: &Arc<Graph>, config: MixerConfig, media: Media, codec: Codec) -> Arc<Self> {
        let launcher = Arc::new(FfmpegLauncher::new(config.engine_binary.clone()));
        Self::with_launcher(graph, config, launcher, media, codec)
    }

    pub fn with_launcher(
        graph: &Arc<Graph>,
        config: MixerConfig,
        launcher: Arc<dyn EngineLauncher>,
        media: Media,
        codec: Codec,
    ) -> Arc<Self> {
        let node = graph.create_node(codec.clone());

        let mixer = Arc::new(Self {
            node,
            media,
            codec,
            config,
            launcher,
            state: Mutex::new(MixerState::default()),
            topology: tokio::sync::Mutex::new(()),
            sequencer: random_sequencer(),
            timestamp: AtomicU32::new(0),
            epoch: Instant::now(),
            last_real_packet: AtomicI64::new(-1),
            counters: Counters::new(),
        });

        // Graph teardown (last parent closed) tears the mixer down too
        let weak = Arc::downgrade(&mixer);
        mixer.node.on_close(move || {
            if let Some(mixer) = weak.upgrade() {
                spawn_detached(async move { mixer.close().await });
            }
        });

        mixer
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn media(&self) -> &Media {
        &self.media
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn engine_state(&self) -> EngineState {
        self.state.lock().engine_state
    }

    pub fn parent_count(&self) -> usize {
        self.state.lock().parents.len()
    }

    /// Engine input port per parent, while the engine runs
    pub fn parent_ports(&self) -> HashMap<NodeId, u16> {
        self.state.lock().parent_ports.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closing
    }

    /// Samples in one 20 ms frame of the mixer's codec
    pub fn frame_size(&self) -> u32 {
        match self.codec.name.as_str() {
            CODEC_OPUS => 960,
            CODEC_AAC | CODEC_ELD => 1024,
            _ if self.codec.clock_rate > 0 => self.codec.clock_rate / 50,
            _ => DEFAULT_FRAME_SIZE,
        }
    }

    /// Start mixing `parent`'s packets
    ///
    /// The mixer becomes a child of `parent`, and `parent` delivers to it
    /// through a forward hook tagged with its id. Errors come from starting
    /// the engine when this is the second (or later) parent.
    pub async fn add_parent(self: &Arc<Self>, parent: &Node) -> Result<()> {
        let _topology = self.topology.lock().await;

        let (old_count, new_count) = {
            let mut state = self.state.lock();
            if state.closing || state.parents.iter().any(|p| p.id() == parent.id()) {
                return Ok(());
            }
            let old_count = state.parents.len();
            state.parents.push(parent.clone());
            (old_count, state.parents.len())
        };

        parent.append_child(&self.node);

        let parent_id = parent.id();
        let weak = Arc::downgrade(self);
        parent.set_forward(
            self.node.id(),
            handler(move |packet| {
                if let Some(mixer) = weak.upgrade() {
                    mixer.handle_packet_from_parent(packet, parent_id);
                }
            }),
        );

        let weak = Arc::downgrade(self);
        parent.on_close_for(self.node.id(), move || {
            if let Some(mixer) = weak.upgrade() {
                spawn_detached(async move {
                    let _ = mixer.detach_parent(parent_id).await;
                });
            }
        });

        tracing::debug!(mixer = %self.node.id(), parent = %parent_id, parents = new_count, "Parent added");

        self.handle_topology_change(old_count, new_count).await
    }

    /// Stop mixing `parent`; removing the last parent closes the mixer
    pub async fn remove_parent(self: &Arc<Self>, parent: &Node) -> Result<()> {
        self.detach_parent(parent.id()).await
    }

    async fn detach_parent(self: &Arc<Self>, parent_id: NodeId) -> Result<()> {
        let _topology = self.topology.lock().await;

        let (parent, old_count, new_count) = {
            let mut state = self.state.lock();
            if state.closing {
                return Ok(());
            }
            let Some(index) = state.parents.iter().position(|p| p.id() == parent_id) else {
                return Ok(());
            };
            let old_count = state.parents.len();
            let parent = state.parents.remove(index);
            state.parent_ports.remove(&parent_id);
            state.parent_sequencers.remove(&parent_id);
            state.parent_timestamps.remove(&parent_id);
            state.last_packet.remove(&parent_id);
            (parent, old_count, state.parents.len())
        };

        parent.clear_forward(self.node.id());
        parent.clear_close_hook(self.node.id());
        parent.remove_child(&self.node);

        tracing::debug!(mixer = %self.node.id(), parent = %parent_id, parents = new_count, "Parent removed");

        self.handle_topology_change(old_count, new_count).await
    }

    /// Caller holds the topology lock
    async fn handle_topology_change(self: &Arc<Self>, old_count: usize, new_count: usize) -> Result<()> {
        if new_count == 0 {
            self.close_locked().await;
            return Ok(());
        }

        if new_count >= 2 {
            let result = self.restart_engine().await;
            if let Err(e) = &result {
                tracing::error!(mixer = %self.node.id(), parents = new_count, error = %e, "Failed to start engine");
            }
            return result;
        }

        if old_count >= 2 {
            self.stop_engine().await;
        }
        Ok(())
    }

    /// Stop the engine and detach from the graph; closing twice is a no-op
    pub async fn close(&self) {
        let _topology = self.topology.lock().await;
        self.close_locked().await;
    }

    async fn close_locked(&self) {
        let parents = {
            let mut state = self.state.lock();
            if state.closing {
                return;
            }
            state.closing = true;
            std::mem::take(&mut state.parents)
        };

        self.stop_engine().await;

        for parent in &parents {
            parent.clear_forward(self.node.id());
            parent.clear_close_hook(self.node.id());
        }
        self.node.close();

        tracing::info!(mixer = %self.node.id(), codec = %self.codec, "Mixer closed");
    }

    /// Parents whose edge to the mixer still exists in the graph
    pub(super) fn active_parents(&self) -> Vec<Node> {
        let parents = self.state.lock().parents.clone();
        parents
            .into_iter()
            .filter(|p| p.has_child(self.node.id()))
            .collect()
    }

    pub(super) fn set_engine_state(&self, engine_state: EngineState) {
        self.state.lock().engine_state = engine_state;
    }

    /// Take the current run if it is `generation`, entering backoff
    pub(super) fn take_run_if_current(&self, generation: u64) -> Option<EngineRun> {
        let mut state = self.state.lock();
        let current = state.run.as_ref().map(|run| run.generation);
        if state.closing || current != Some(generation) {
            return None;
        }
        state.engine_state = EngineState::Restarting;
        state.parent_ports.clear();
        state.parent_sequencers.clear();
        state.run.take()
    }

    /// Whether a backoff for `generation` should still restart the engine
    pub(super) fn backoff_still_pending(&self, generation: u64) -> bool {
        let state = self.state.lock();
        !state.closing
            && state.engine_state == EngineState::Restarting
            && state.generation == generation
    }

    /// Caller holds the topology lock
    async fn restart_engine(self: &Arc<Self>) -> Result<()> {
        self.stop_engine().await;

        if self.active_parents().len() < 2 {
            return Ok(());
        }
        self.start_engine().await
    }

    /// Caller holds the topology lock
    pub(super) async fn start_engine(self: &Arc<Self>) -> Result<()> {
        self.set_engine_state(EngineState::Starting);

        match self.launch().await {
            Ok(generation) => {
                tracing::info!(mixer = %self.node.id(), generation, codec = %self.codec, "Engine started");
                Ok(())
            }
            Err(e) => {
                self.set_engine_state(EngineState::Idle);
                Err(e)
            }
        }
    }

    async fn launch(self: &Arc<Self>) -> Result<u64> {
        let host = self.config.host;
        let parents = self.active_parents();

        let mut ports = Vec::with_capacity(parents.len());
        for parent in &parents {
            ports.push((parent.id(), allocate_port(host)?));
        }
        let port_list: Vec<u16> = ports.iter().map(|(_, port)| *port).collect();
        let sdp = sdp::generate(&self.codec, host, &port_list)?;

        let socket = UdpSocket::bind(SocketAddr::new(host, 0))
            .await
            .map_err(Error::PortAllocation)?;
        let output_port = socket.local_addr().map_err(Error::PortAllocation)?.port();

        let job = EngineJob::new(&self.codec, sdp, ports.len(), host, output_port);
        let handle = self.launcher.launch(&job)?;
        let socket = Arc::new(socket);

        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.generation
        };

        let weak = Arc::downgrade(self);
        let tasks = vec![
            tokio::spawn(read_engine_output(
                weak.clone(),
                Arc::clone(&socket),
                self.config.mtu,
                self.config.real_packet_window,
            )),
            tokio::spawn(run_keepalive(weak.clone(), self.config.keepalive_interval)),
            spawn_monitor(weak, generation, handle.subscribe()),
        ];

        let mut state = self.state.lock();
        state.parent_ports = ports.into_iter().collect();
        state.run = Some(EngineRun {
            generation,
            handle,
            socket,
            tasks,
        });
        state.engine_state = EngineState::Running;

        Ok(generation)
    }

    /// Caller holds the topology lock
    async fn stop_engine(&self) {
        let run = {
            let mut state = self.state.lock();
            state.parent_ports.clear();
            state.parent_sequencers.clear();
            let run = state.run.take();
            if run.is_some() {
                state.engine_state = EngineState::Stopping;
            }
            run
        };

        if let Some(mut run) = run {
            run.abort_tasks();
            run.handle.kill();
            match tokio::time::timeout(STOP_TIMEOUT, run.handle.wait()).await {
                Ok(exit) => {
                    tracing::info!(mixer = %self.node.id(), generation = run.generation, exit = ?exit, "Engine stopped")
                }
                Err(_) => {
                    tracing::warn!(mixer = %self.node.id(), generation = run.generation, "Engine did not exit after kill")
                }
            }
        }

        self.set_engine_state(EngineState::Idle);
    }

    /// Route one packet from `parent_id`, as installed by the forward hook
    pub fn handle_packet_from_parent(&self, packet: &Packet, parent_id: NodeId) {
        let now = Instant::now();
        self.last_real_packet
            .store(self.nanos_since_epoch(now), Ordering::Relaxed);

        let route = {
            let mut state = self.state.lock();
            state.last_packet.insert(parent_id, now);
            if state.parents.len() < 2 {
                Route::Direct
            } else if state.run.is_some() {
                Route::Engine
            } else {
                Route::Drop
            }
        };

        match route {
            Route::Direct => self.forward_direct(packet),
            Route::Engine => self.send_to_engine(packet, parent_id),
            Route::Drop => {
                tracing::trace!(mixer = %self.node.id(), parent = %parent_id, "No engine, dropping parent packet");
                self.counters.record_drop();
            }
        }

        self.counters.record(packet.len());
    }

    /// Re-sequence a packet into the output stream and hand it to children
    pub fn forward_direct(&self, packet: &Packet) {
        let frame_size = self.frame_size();
        let mut packet = packet.clone();
        packet.header.sequence_number = self.sequencer.next_sequence_number();
        packet.header.timestamp = self
            .timestamp
            .fetch_add(frame_size, Ordering::Relaxed)
            .wrapping_add(frame_size);
        packet.header.marker = true;

        for child in self.node.child_nodes() {
            child.input(&packet);
        }
    }

    /// Send a packet into `parent_id`'s own stream towards the engine
    fn send_to_engine(&self, packet: &Packet, parent_id: NodeId) {
        let frame_size = self.frame_size();

        let (socket, port, sequence_number, timestamp) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(run) = state.run.as_ref() else {
                return;
            };
            let sequence_number = state
                .parent_sequencers
                .entry(parent_id)
                .or_insert_with(random_sequencer)
                .next_sequence_number();
            let slot = state.parent_timestamps.entry(parent_id).or_insert(0);
            let timestamp = *slot;
            *slot = timestamp.wrapping_add(frame_size);
            (
                Arc::clone(&run.socket),
                state.parent_ports.get(&parent_id).copied(),
                sequence_number,
                timestamp,
            )
        };

        let Some(port) = port else {
            tracing::trace!(mixer = %self.node.id(), parent = %parent_id, "No engine port for parent");
            return;
        };

        let mut packet = packet.clone();
        packet.header.sequence_number = sequence_number;
        packet.header.timestamp = timestamp;

        let target = SocketAddr::new(self.config.host, port);
        let wire = match packet.marshal() {
            Ok(wire) => wire,
            Err(e) => {
                tracing::trace!(mixer = %self.node.id(), parent = %parent_id, error = %e, "Engine input marshal failed");
                return;
            }
        };
        if let Err(e) = socket.try_send_to(&wire, target) {
            tracing::trace!(mixer = %self.node.id(), parent = %parent_id, error = %e, "Engine input send failed");
        }
    }

    /// Silence for every parent quiet for longer than the inactive threshold
    fn send_keepalive(&self) {
        let now = Instant::now();
        let threshold = self.config.inactive_threshold;

        let silent: Vec<NodeId> = {
            let state = self.state.lock();
            state
                .parents
                .iter()
                .map(Node::id)
                .filter(|id| match state.last_packet.get(id) {
                    Some(last) => now.duration_since(*last) > threshold,
                    None => true,
                })
                .collect()
        };

        for parent_id in silent {
            self.send_silence(parent_id);
        }
    }

    fn send_silence(&self, parent_id: NodeId) {
        let packet = Packet {
            header: Header {
                version: VERSION_RTP,
                payload_type: self.codec.payload_type,
                ssrc: 0,
                ..Default::default()
            },
            payload: Bytes::from(vec![0u8; self.frame_size() as usize]),
        };
        self.send_to_engine(&packet, parent_id);
    }

    fn nanos_since_epoch(&self, now: Instant) -> i64 {
        now.duration_since(self.epoch).as_nanos() as i64
    }

    /// Whether a real parent packet arrived within `window`
    fn received_real_packet_within(&self, window: Duration) -> bool {
        let last = self.last_real_packet.load(Ordering::Relaxed);
        if last < 0 {
            return false;
        }
        let now = self.nanos_since_epoch(Instant::now());
        now.saturating_sub(last) <= window.as_nanos() as i64
    }

    pub fn stats(&self) -> NodeStats {
        self.counters.snapshot()
    }

    /// Graph view; only parents still linked to the mixer are listed
    pub fn info(&self) -> NodeInfo {
        let stats = self.stats();
        NodeInfo {
            id: self.node.id(),
            codec: self.codec.clone(),
            parents: self.active_parents().iter().map(Node::id).collect(),
            childs: self.node.childs(),
            bytes: stats.bytes,
            packets: stats.packets,
            drops: stats.drops,
        }
    }
}

impl fmt::Display for RtpMixer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, bytes={}, parents={}, engine={}",
            self.codec,
            self.counters.bytes(),
            self.parent_count(),
            self.engine_state()
        )
    }
}

/// Reserve an ephemeral UDP port for one engine input
fn allocate_port(host: IpAddr) -> Result<u16> {
    let socket = std::net::UdpSocket::bind(SocketAddr::new(host, 0)).map_err(Error::PortAllocation)?;
    let port = socket.local_addr().map_err(Error::PortAllocation)?.port();
    Ok(port)
}

fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(future);
        }
        Err(_) => tracing::warn!("No tokio runtime, mixer teardown skipped"),
    }
}

/// Forward the engine's mixed output while parents are actually talking
async fn read_engine_output(mixer: Weak<RtpMixer>, socket: Arc<UdpSocket>, mtu: usize, window: Duration) {
    let mut buf = vec![0u8; mtu];

    loop {
        let len = match socket.recv_from(&mut buf).await {
            Ok((len, _)) => len,
            Err(e) if matches!(e.kind(), ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset) => {
                continue;
            }
            Err(e) => {
                tracing::debug!(error = %e, "Engine output socket closed");
                return;
            }
        };

        let Some(mixer) = mixer.upgrade() else {
            return;
        };

        let packet = match Packet::unmarshal(&buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::trace!(mixer = %mixer.node.id(), error = %e, "Dropping engine output");
                continue;
            }
        };

        // Output built only from keepalive silence is not forwarded
        if !mixer.received_real_packet_within(window) {
            continue;
        }

        mixer.forward_direct(&packet);
    }
}

async fn run_keepalive(mixer: Weak<RtpMixer>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let Some(mixer) = mixer.upgrade() else {
            return;
        };
        mixer.send_keepalive();
    }
}
