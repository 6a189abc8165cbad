//! Mixer configuration

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Mixer configuration options
#[derive(Debug, Clone)]
pub struct MixerConfig {
    /// Mixing engine executable
    pub engine_binary: String,

    /// Host the engine and the mixer exchange RTP on
    pub host: IpAddr,

    /// How often silent parents get a keepalive frame
    pub keepalive_interval: Duration,

    /// A parent counts as silent after this long without a real packet
    pub inactive_threshold: Duration,

    /// Engine output is forwarded only this long after the last real packet
    pub real_packet_window: Duration,

    /// Delay before respawning a crashed engine
    pub restart_delay: Duration,

    /// Read buffer size for engine output
    pub mtu: usize,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            engine_binary: "ffmpeg".to_string(),
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            keepalive_interval: Duration::from_millis(20),
            inactive_threshold: Duration::from_millis(100),
            real_packet_window: Duration::from_millis(500),
            restart_delay: Duration::from_secs(3),
            mtu: 1472, // 1500 - IP - UDP
        }
    }
}

impl MixerConfig {
    /// Set the engine executable
    pub fn engine_binary(mut self, binary: impl Into<String>) -> Self {
        self.engine_binary = binary.into();
        self
    }

    /// Set the loopback host
    pub fn host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    /// Set keepalive interval
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set inactive threshold
    pub fn inactive_threshold(mut self, threshold: Duration) -> Self {
        self.inactive_threshold = threshold;
        self
    }

    /// Set real packet window
    pub fn real_packet_window(mut self, window: Duration) -> Self {
        self.real_packet_window = window;
        self
    }

    /// Set restart backoff
    pub fn restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Set read buffer size
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu.max(12);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MixerConfig::default();

        assert_eq!(config.engine_binary, "ffmpeg");
        assert_eq!(config.host, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.keepalive_interval, Duration::from_millis(20));
        assert_eq!(config.inactive_threshold, Duration::from_millis(100));
        assert_eq!(config.real_packet_window, Duration::from_millis(500));
        assert_eq!(config.restart_delay, Duration::from_secs(3));
        assert_eq!(config.mtu, 1472);
    }

    #[test]
    fn test_builder_keepalive_floor() {
        let config = MixerConfig::default().keepalive_interval(Duration::ZERO);

        assert_eq!(config.keepalive_interval, Duration::from_millis(1));
    }

    #[test]
    fn test_builder_mtu_holds_header() {
        let config = MixerConfig::default().mtu(0);

        assert_eq!(config.mtu, 12);
    }

    #[test]
    fn test_builder_chaining() {
        let config = MixerConfig::default()
            .engine_binary("/usr/local/bin/ffmpeg")
            .inactive_threshold(Duration::from_millis(50))
            .real_packet_window(Duration::from_secs(1))
            .restart_delay(Duration::from_millis(10));

        assert_eq!(config.engine_binary, "/usr/local/bin/ffmpeg");
        assert_eq!(config.inactive_threshold, Duration::from_millis(50));
        assert_eq!(config.real_packet_window, Duration::from_secs(1));
        assert_eq!(config.restart_delay, Duration::from_millis(10));
    }
}
