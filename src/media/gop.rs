//! GOP (Group of Pictures) cache for late-joiner support
//!
//! When a new consumer attaches to a running track it needs:
//! 1. The most recent complete GOP (starting with a keyframe)
//! 2. The GOP in progress
//! 3. The RTP fragments of the access unit still being received
//!
//! in that order, so the decoder can start from the first returned byte
//! without waiting for the next keyframe.
//!
//! Every retained packet is a deep copy: producers reuse their buffers.

use parking_lot::RwLock;

use crate::core::Packet;

#[derive(Debug, Default)]
struct GopState {
    previous_gop: Vec<Packet>,
    current_gop: Vec<Packet>,
    pending_rtp: Vec<Packet>,
    has_keyframe: bool,
}

/// Keyframe-aware retained-frame cache
#[derive(Debug, Default)]
pub struct GopCache {
    state: RwLock<GopState>,
}

impl GopCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a completed access unit
    ///
    /// A keyframe starts a new GOP, rotating the current one into the
    /// previous slot. Non-keyframes before the first keyframe are dropped.
    /// Any pending RTP fragments are superseded by the completed unit.
    pub fn add(&self, packet: &Packet, is_keyframe: bool) {
        let mut state = self.state.write();

        if is_keyframe {
            if state.has_keyframe && !state.current_gop.is_empty() {
                state.previous_gop = std::mem::take(&mut state.current_gop);
                tracing::trace!(frames = state.previous_gop.len(), "GOP rotated");
            }
            state.current_gop.clear();
            state.has_keyframe = true;
        } else if !state.has_keyframe {
            return;
        }

        state.current_gop.push(packet.deep_clone());
        state.pending_rtp.clear();
    }

    /// Track an in-flight RTP fragment; reassembled packets are ignored
    pub fn add_rtp_fragment(&self, packet: &Packet) {
        if packet.is_avcc() {
            return;
        }
        self.state.write().pending_rtp.push(packet.deep_clone());
    }

    /// Previous GOP, then current GOP, then pending fragments
    ///
    /// Returns `None` until a keyframe has been seen.
    pub fn get(&self) -> Option<Vec<Packet>> {
        let state = self.state.read();
        if !state.has_keyframe {
            return None;
        }

        let total = state.previous_gop.len() + state.current_gop.len() + state.pending_rtp.len();
        if total == 0 {
            return None;
        }

        let mut result = Vec::with_capacity(total);
        result.extend(state.previous_gop.iter().cloned());
        result.extend(state.current_gop.iter().cloned());
        result.extend(state.pending_rtp.iter().cloned());
        Some(result)
    }

    pub fn has_content(&self) -> bool {
        let state = self.state.read();
        state.has_keyframe
            && (!state.previous_gop.is_empty()
                || !state.current_gop.is_empty()
                || !state.pending_rtp.is_empty())
    }

    /// Drop everything, including the keyframe flag
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.previous_gop.clear();
        state.current_gop.clear();
        state.pending_rtp.clear();
        state.has_keyframe = false;
    }

    /// Number of cached packets across all three segments
    pub fn len(&self) -> usize {
        let state = self.state.read();
        state.previous_gop.len() + state.current_gop.len() + state.pending_rtp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
