//! H.264/AVC and H.265/HEVC keyframe detection
//!
//! Reassembled frames travel in AVCC format: a sequence of NAL units, each
//! prefixed by its 4-byte big-endian length.
//!
//! ```text
//! +-------------+----------+-------------+----------+----
//! | length (4)  | NALU     | length (4)  | NALU     | ...
//! +-------------+----------+-------------+----------+----
//! ```
//!
//! A frame is a keyframe when any of its NAL units is an IDR slice (H.264)
//! or an IRAP picture (H.265).

/// H.264 NAL unit type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// Non-IDR slice
    Slice = 1,
    /// IDR slice (keyframe)
    Idr = 5,
    /// Supplemental enhancement information
    Sei = 6,
    /// Sequence parameter set
    Sps = 7,
    /// Picture parameter set
    Pps = 8,
    /// Access unit delimiter
    Aud = 9,
}

impl NaluType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            1 => Some(NaluType::Slice),
            5 => Some(NaluType::Idr),
            6 => Some(NaluType::Sei),
            7 => Some(NaluType::Sps),
            8 => Some(NaluType::Pps),
            9 => Some(NaluType::Aud),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(self, NaluType::Idr)
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, NaluType::Sps | NaluType::Pps)
    }
}

/// H.265 IRAP range: BLA_W_LP (16) through CRA_NUT (21)
const H265_IRAP: std::ops::RangeInclusive<u8> = 16..=21;

fn h265_nal_type(b: u8) -> u8 {
    (b >> 1) & 0x3F
}

/// Iterate the NAL units of an AVCC payload, stopping at the first
/// malformed length
pub fn avcc_nalus(payload: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = payload;
    std::iter::from_fn(move || {
        if rest.len() < 4 {
            return None;
        }
        let size = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        let body = rest.get(4..4 + size)?;
        rest = &rest[4 + size..];
        Some(body)
    })
}

/// Whether an AVCC payload carries an H.264 IDR slice
pub fn is_keyframe_h264(payload: &[u8]) -> bool {
    avcc_nalus(payload)
        .filter_map(|nalu| nalu.first().copied())
        .filter_map(NaluType::from_byte)
        .any(|t| t.is_keyframe())
}

/// Whether an AVCC payload carries an H.265 IRAP picture
pub fn is_keyframe_h265(payload: &[u8]) -> bool {
    avcc_nalus(payload)
        .filter_map(|nalu| nalu.first().copied())
        .any(|b| H265_IRAP.contains(&h265_nal_type(b)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn avcc(nalus: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for nalu in nalus {
            out.extend_from_slice(&(nalu.len() as u32).to_be_bytes());
            out.extend_from_slice(nalu);
        }
        out
    }

    #[test]
    fn test_nalu_type() {
        assert_eq!(NaluType::from_byte(0x65), Some(NaluType::Idr));
        assert_eq!(NaluType::from_byte(0x67), Some(NaluType::Sps));
        assert_eq!(NaluType::from_byte(0x41), Some(NaluType::Slice));
        assert!(NaluType::Sps.is_parameter_set());
        assert!(!NaluType::Slice.is_keyframe());
    }

    #[test]
    fn test_h264_keyframe() {
        let idr = avcc(&[&[0x67, 1, 2], &[0x68, 3], &[0x65, 0xAA, 0xBB]]);
        assert!(is_keyframe_h264(&idr));

        let inter = avcc(&[&[0x41, 0xAA]]);
        assert!(!is_keyframe_h264(&inter));
    }

    #[test]
    fn test_h265_keyframe() {
        // IDR_W_RADL = 19 -> first byte 19 << 1
        let idr = avcc(&[&[0x40, 0x01], &[19 << 1, 0x01, 0xAA]]);
        assert!(is_keyframe_h265(&idr));

        // TRAIL_R = 1
        let trail = avcc(&[&[1 << 1, 0x01, 0xAA]]);
        assert!(!is_keyframe_h265(&trail));
    }

    #[test]
    fn test_malformed_length_stops() {
        let mut data = avcc(&[&[0x41]]);
        data.extend_from_slice(&[0, 0, 0, 99, 0x65]);
        assert!(!is_keyframe_h264(&data));
        assert_eq!(avcc_nalus(&data).count(), 1);
    }

    #[test]
    fn test_empty_payload() {
        assert!(!is_keyframe_h264(&[]));
        assert!(!is_keyframe_h265(&[0, 0]));
    }
}
