//! Codec and media descriptors

use std::fmt;

use serde::Serialize;

pub const DIRECTION_RECVONLY: &str = "recvonly";
pub const DIRECTION_SENDONLY: &str = "sendonly";
pub const DIRECTION_SENDRECV: &str = "sendrecv";

pub const KIND_VIDEO: &str = "video";
pub const KIND_AUDIO: &str = "audio";

pub const CODEC_H264: &str = "H264";
pub const CODEC_H265: &str = "H265";
pub const CODEC_VP8: &str = "VP8";
pub const CODEC_VP9: &str = "VP9";
pub const CODEC_AV1: &str = "AV1";
pub const CODEC_JPEG: &str = "JPEG";

pub const CODEC_PCMU: &str = "PCMU";
pub const CODEC_PCMA: &str = "PCMA";
pub const CODEC_AAC: &str = "MPEG4-GENERIC";
pub const CODEC_OPUS: &str = "OPUS";
pub const CODEC_G722: &str = "G722";
pub const CODEC_MP3: &str = "MPA";
pub const CODEC_PCM: &str = "L16";
pub const CODEC_PCML: &str = "PCML";
pub const CODEC_ELD: &str = "ELD";
pub const CODEC_FLAC: &str = "FLAC";

/// Payload type marking a codec whose packets are never RTP framed
pub const PAYLOAD_TYPE_RAW: u8 = 255;

/// Media kind for a codec name
pub fn kind_of(name: &str) -> &'static str {
    match name {
        CODEC_H264 | CODEC_H265 | CODEC_VP8 | CODEC_VP9 | CODEC_AV1 | CODEC_JPEG => KIND_VIDEO,
        CODEC_PCMU | CODEC_PCMA | CODEC_AAC | CODEC_OPUS | CODEC_G722 | CODEC_MP3 | CODEC_PCM
        | CODEC_PCML | CODEC_ELD | CODEC_FLAC => KIND_AUDIO,
        _ => "",
    }
}

/// FFmpeg codec name for a codec
pub fn ffmpeg_codec_name(name: &str) -> &str {
    match name {
        CODEC_H264 => "h264",
        CODEC_H265 => "hevc",
        CODEC_JPEG => "mjpeg",
        CODEC_PCMA => "pcm_alaw",
        CODEC_PCMU => "pcm_mulaw",
        CODEC_PCM => "pcm_s16be",
        CODEC_PCML => "pcm_s16le",
        CODEC_AAC => "aac",
        CODEC_OPUS => "opus",
        CODEC_VP8 => "vp8",
        CODEC_VP9 => "vp9",
        CODEC_AV1 => "av1",
        CODEC_ELD => "aac/eld",
        CODEC_FLAC => "flac",
        CODEC_MP3 => "mp3",
        other => other,
    }
}

/// Codec descriptor (name, clock rate, payload type)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Codec {
    /// H264, PCMU, PCMA, OPUS...
    pub name: String,
    /// 90000, 8000, 16000...
    pub clock_rate: u32,
    /// 0, 1, 2
    pub channels: u16,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub fmtp_line: String,
    pub payload_type: u8,
}

impl Codec {
    pub fn new(name: impl Into<String>, clock_rate: u32, payload_type: u8) -> Self {
        Self {
            name: name.into(),
            clock_rate,
            channels: 0,
            fmtp_line: String::new(),
            payload_type,
        }
    }

    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_fmtp(mut self, fmtp_line: impl Into<String>) -> Self {
        self.fmtp_line = fmtp_line.into();
        self
    }

    /// Whether packets of this codec arrive RTP framed
    pub fn is_rtp(&self) -> bool {
        self.payload_type != PAYLOAD_TYPE_RAW
    }

    pub fn kind(&self) -> &'static str {
        kind_of(&self.name)
    }

    pub fn is_video(&self) -> bool {
        self.kind() == KIND_VIDEO
    }

    pub fn is_audio(&self) -> bool {
        self.kind() == KIND_AUDIO
    }

    /// Same codec name, and clock rate/channels when both sides state them
    pub fn matches(&self, other: &Codec) -> bool {
        self.name == other.name
            && (self.clock_rate == 0 || other.clock_rate == 0 || self.clock_rate == other.clock_rate)
            && (self.channels == 0 || other.channels == 0 || self.channels == other.channels)
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if self.clock_rate != 0 && self.clock_rate != 90_000 {
            write!(f, "/{}", self.clock_rate)?;
        }
        if self.channels > 0 {
            write!(f, "/{}", self.channels)?;
        }
        Ok(())
    }
}

/// A media section: kind, direction and the codecs it can carry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Media {
    /// video or audio
    pub kind: String,
    /// sendonly, recvonly
    pub direction: String,
    pub codecs: Vec<Codec>,
    /// MID for WebRTC, control for RTSP
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
}

impl Media {
    pub fn new(kind: impl Into<String>, direction: impl Into<String>, codecs: Vec<Codec>) -> Self {
        Self {
            kind: kind.into(),
            direction: direction.into(),
            codecs,
            id: String::new(),
        }
    }

    pub fn match_codec(&self, remote: &Codec) -> Option<&Codec> {
        self.codecs.iter().find(|codec| codec.matches(remote))
    }
}

impl fmt::Display for Media {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = format!("{}, {}", self.kind, self.direction);
        for codec in &self.codecs {
            let name = codec.to_string();
            if s.contains(&name) {
                continue;
            }
            s.push_str(", ");
            s.push_str(&name);
        }
        f.write_str(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_display() {
        assert_eq!(Codec::new(CODEC_H264, 90_000, 96).to_string(), "H264");
        assert_eq!(
            Codec::new(CODEC_OPUS, 48_000, 111).with_channels(2).to_string(),
            "OPUS/48000/2"
        );
        assert_eq!(Codec::new(CODEC_PCMU, 8000, 0).to_string(), "PCMU/8000");
    }

    #[test]
    fn test_codec_kind_and_rtp() {
        let raw = Codec::new(CODEC_H264, 90_000, PAYLOAD_TYPE_RAW);
        assert!(!raw.is_rtp());
        assert!(raw.is_video());

        let opus = Codec::new(CODEC_OPUS, 48_000, 111);
        assert!(opus.is_rtp());
        assert!(opus.is_audio());
        assert_eq!(Codec::new("X-UNKNOWN", 0, 0).kind(), "");
    }

    #[test]
    fn test_ffmpeg_codec_name() {
        assert_eq!(ffmpeg_codec_name(CODEC_H265), "hevc");
        assert_eq!(ffmpeg_codec_name(CODEC_PCMA), "pcm_alaw");
        assert_eq!(ffmpeg_codec_name("speex"), "speex");
    }

    #[test]
    fn test_media_match_codec() {
        let media = Media::new(
            KIND_AUDIO,
            DIRECTION_SENDONLY,
            vec![Codec::new(CODEC_PCMU, 8000, 0), Codec::new(CODEC_OPUS, 48_000, 111)],
        );

        let found = media.match_codec(&Codec::new(CODEC_OPUS, 0, 101)).unwrap();
        assert_eq!(found.payload_type, 111);
        assert!(media.match_codec(&Codec::new(CODEC_PCMU, 16_000, 0)).is_none());
        assert_eq!(media.to_string(), "audio, sendonly, PCMU/8000, OPUS/48000");
    }

    #[test]
    fn test_codec_serialize() {
        let json = serde_json::to_string(&Codec::new(CODEC_PCMA, 8000, 8)).unwrap();
        assert_eq!(
            json,
            r#"{"name":"PCMA","clock_rate":8000,"channels":0,"payload_type":8}"#
        );
    }
}
