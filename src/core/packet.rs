//! Media packets and handler composition
//!
//! A [`Packet`] is an RTP packet whose header `version` doubles as a format tag:
//! version 0 marks a reassembled AVCC frame, anything else is an RTP fragment
//! as it came off the wire.
//!
//! RTP fixed header (RFC 3550 §5.1):
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::sync::Arc;

use bytes::Bytes;
use webrtc_util::marshal::{Marshal, Unmarshal};

use crate::error::{Error, Result};

/// Header version used for reassembled (AVCC) frames
pub const VERSION_AVCC: u8 = 0;

/// Header version used for packets on the wire
pub const VERSION_RTP: u8 = 2;

/// RTP header fields carried through the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

/// A timestamped media unit
///
/// Cloning is cheap: the payload is reference counted. Use
/// [`Packet::deep_clone`] when the payload must outlive the producer's buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Bytes,
}

impl Packet {
    /// Create an RTP (version 2) packet
    pub fn rtp(sequence_number: u16, timestamp: u32, marker: bool, payload: Bytes) -> Self {
        Self {
            header: Header {
                version: VERSION_RTP,
                marker,
                sequence_number,
                timestamp,
                ..Default::default()
            },
            payload,
        }
    }

    /// Create a reassembled AVCC (version 0) frame
    pub fn avcc(sequence_number: u16, timestamp: u32, payload: Bytes) -> Self {
        Self {
            header: Header {
                version: VERSION_AVCC,
                marker: true,
                sequence_number,
                timestamp,
                ..Default::default()
            },
            payload,
        }
    }

    /// Whether this packet is a reassembled frame rather than an RTP fragment
    pub fn is_avcc(&self) -> bool {
        self.header.version == VERSION_AVCC
    }

    /// Copy header and payload into fresh storage
    pub fn deep_clone(&self) -> Self {
        Self {
            header: self.header,
            payload: Bytes::copy_from_slice(&self.payload),
        }
    }

    /// Size of the payload in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Serialize as an RTP packet (always written with version 2)
    pub fn marshal(&self) -> Result<Bytes> {
        Ok(rtp::packet::Packet::from(self).marshal()?)
    }

    /// Parse an RTP packet; CSRCs, extensions and padding are dropped
    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        let packet = rtp::packet::Packet::unmarshal(&mut buf)?;
        if packet.header.version != VERSION_RTP {
            return Err(Error::Packet("unsupported version"));
        }
        Ok(packet.into())
    }
}

impl From<&Packet> for rtp::packet::Packet {
    fn from(packet: &Packet) -> Self {
        Self {
            header: rtp::header::Header {
                version: VERSION_RTP,
                marker: packet.header.marker,
                payload_type: packet.header.payload_type & 0x7F,
                sequence_number: packet.header.sequence_number,
                timestamp: packet.header.timestamp,
                ssrc: packet.header.ssrc,
                ..Default::default()
            },
            payload: packet.payload.clone(),
            ..Default::default()
        }
    }
}

impl From<rtp::packet::Packet> for Packet {
    fn from(packet: rtp::packet::Packet) -> Self {
        Self {
            header: Header {
                version: packet.header.version,
                marker: packet.header.marker,
                payload_type: packet.header.payload_type,
                sequence_number: packet.header.sequence_number,
                timestamp: packet.header.timestamp,
                ssrc: packet.header.ssrc,
            },
            payload: packet.payload,
        }
    }
}

/// Process input packets (just like an HTTP handler function)
pub type HandlerFunc = Arc<dyn Fn(&Packet) + Send + Sync>;

/// A decorator for any [`HandlerFunc`]
pub type Filter = Arc<dyn Fn(HandlerFunc) -> HandlerFunc + Send + Sync>;

/// Wrap a closure as a [`HandlerFunc`]
pub fn handler<F>(f: F) -> HandlerFunc
where
    F: Fn(&Packet) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Apply filters so that the first one in the slice sees packets first
pub fn chain(filters: &[Filter], last: HandlerFunc) -> HandlerFunc {
    filters.iter().rev().fold(last, |next, filter| filter(next))
}

/// RFC 1982 "less than or equal" on 16-bit sequence numbers
pub fn seq_le(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) <= 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_marshal_unmarshal() {
        let mut packet = Packet::rtp(513, 90_000, true, Bytes::from_static(&[1, 2, 3]));
        packet.header.payload_type = 111;
        packet.header.ssrc = 0xDEADBEEF;

        let wire = packet.marshal().unwrap();
        assert_eq!(wire.len(), 15);
        assert_eq!(wire[0], 0x80);
        assert_eq!(wire[1], 0x80 | 111);

        let parsed = Packet::unmarshal(&wire).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_marshal_avcc_as_rtp() {
        let packet = Packet::avcc(7, 100, Bytes::from_static(&[9]));
        let parsed = Packet::unmarshal(&packet.marshal().unwrap()).unwrap();
        assert_eq!(parsed.header.version, VERSION_RTP);
        assert_eq!(parsed.header.sequence_number, 7);
    }

    #[test]
    fn test_unmarshal_short() {
        assert!(matches!(Packet::unmarshal(&[0x80, 0]), Err(Error::Rtp(_))));
    }

    #[test]
    fn test_unmarshal_bad_version() {
        let mut wire = Packet::rtp(1, 1, false, Bytes::from_static(&[1])).marshal().unwrap().to_vec();
        wire[0] = 0x40;
        assert!(Packet::unmarshal(&wire).is_err());
    }

    #[test]
    fn test_unmarshal_csrc_extension_padding() {
        let mut wire = vec![0x80 | 0x20 | 0x10 | 0x01, 96, 0, 5, 0, 0, 0, 10, 0, 0, 0, 1];
        wire.extend_from_slice(&[0, 0, 0, 2]); // CSRC
        wire.extend_from_slice(&[0xAB, 0xAC, 0, 1, 1, 2, 3, 4]); // extension, 1 word
        wire.extend_from_slice(&[0xAA, 0xBB]); // payload
        wire.extend_from_slice(&[0, 0, 3]); // padding

        let parsed = Packet::unmarshal(&wire).unwrap();
        assert_eq!(parsed.header.sequence_number, 5);
        assert_eq!(parsed.header.timestamp, 10);
        assert_eq!(&parsed.payload[..], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_deep_clone_detaches_payload() {
        let original = Packet::rtp(1, 1, false, Bytes::from(vec![1, 2, 3]));
        let copy = original.deep_clone();
        assert_eq!(copy, original);
        assert_ne!(copy.payload.as_ptr(), original.payload.as_ptr());
    }

    #[test]
    fn test_chain_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));

        let tag = |name: &'static str, seen: Arc<Mutex<Vec<&'static str>>>| -> Filter {
            Arc::new(move |next: HandlerFunc| {
                let seen = seen.clone();
                handler(move |p| {
                    seen.lock().push(name);
                    next(p)
                })
            })
        };

        let sink_seen = seen.clone();
        let sink = handler(move |_| sink_seen.lock().push("sink"));
        let h = chain(&[tag("depay", seen.clone()), tag("repair", seen.clone())], sink);
        h(&Packet::default());

        assert_eq!(*seen.lock(), vec!["depay", "repair", "sink"]);
    }

    #[test]
    fn test_seq_le_wraps() {
        assert!(seq_le(5, 5));
        assert!(seq_le(4, 5));
        assert!(!seq_le(6, 5));
        assert!(seq_le(65535, 2));
        assert!(!seq_le(2, 65535));
    }
}
