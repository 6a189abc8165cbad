//! Sender buffer configuration

use crate::core::Codec;

/// Buffer capacities for [`Sender`](super::Sender) queues
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Capacity for RTP-fragmented video
    pub rtp_video_buffer: usize,

    /// Capacity for reassembled (raw) video
    pub raw_video_buffer: usize,

    /// Capacity for audio and everything else
    pub default_buffer: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            // H.264 2560x1440 at 4 Mbit/s can have 700+ packets between 25 frames
            rtp_video_buffer: 1000,
            raw_video_buffer: 50,
            default_buffer: 100,
        }
    }
}

impl SenderConfig {
    /// Set the RTP video capacity
    pub fn rtp_video_buffer(mut self, size: usize) -> Self {
        self.rtp_video_buffer = size.max(1);
        self
    }

    /// Set the raw video capacity
    pub fn raw_video_buffer(mut self, size: usize) -> Self {
        self.raw_video_buffer = size.max(1);
        self
    }

    /// Set the capacity for audio and other kinds
    pub fn default_buffer(mut self, size: usize) -> Self {
        self.default_buffer = size.max(1);
        self
    }

    /// Use the same capacity for every kind
    pub fn uniform(size: usize) -> Self {
        Self::default()
            .rtp_video_buffer(size)
            .raw_video_buffer(size)
            .default_buffer(size)
    }

    /// Capacity for a codec's sender
    pub fn buffer_size(&self, codec: &Codec) -> usize {
        if codec.is_video() {
            if codec.is_rtp() {
                self.rtp_video_buffer
            } else {
                self.raw_video_buffer
            }
        } else {
            self.default_buffer
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PAYLOAD_TYPE_RAW;

    #[test]
    fn test_default_config() {
        let config = SenderConfig::default();

        assert_eq!(config.buffer_size(&Codec::new("H264", 90_000, 96)), 1000);
        assert_eq!(
            config.buffer_size(&Codec::new("H264", 90_000, PAYLOAD_TYPE_RAW)),
            50
        );
        assert_eq!(config.buffer_size(&Codec::new("OPUS", 48_000, 111)), 100);
    }

    #[test]
    fn test_builder_chaining() {
        let config = SenderConfig::default()
            .rtp_video_buffer(10)
            .raw_video_buffer(5)
            .default_buffer(3);

        assert_eq!(config.rtp_video_buffer, 10);
        assert_eq!(config.raw_video_buffer, 5);
        assert_eq!(config.default_buffer, 3);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let config = SenderConfig::uniform(0);
        assert_eq!(config.buffer_size(&Codec::new("PCMU", 8000, 0)), 1);
    }
}
