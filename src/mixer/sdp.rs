//! Session description handed to the mixing engine
//!
//! One `m=audio` section per parent, each on its own UDP port, all carrying
//! the mixer's codec:
//!
//! ```text
//! v=0
//! o=- 1 1 IN IP4 0.0.0.0
//! s=rtp-relay-mixer
//! c=IN IP4 127.0.0.1
//! t=0 0
//! m=audio 40001 RTP/AVP 0
//! a=rtpmap:0 PCMU/8000
//! a=recvonly
//! m=audio 40002 RTP/AVP 0
//! ...
//! ```

use std::fmt::Write;
use std::net::IpAddr;

use crate::core::codec::{
    CODEC_AAC, CODEC_ELD, CODEC_PCM, CODEC_PCML, DIRECTION_RECVONLY, KIND_AUDIO,
};
use crate::core::Codec;
use crate::error::{Error, Result};

const SESSION_NAME: &str = "rtp-relay-mixer";

/// Name a codec is advertised under in the engine's SDP
pub fn sdp_codec_name(name: &str) -> &str {
    match name {
        CODEC_ELD => CODEC_AAC,
        CODEC_PCML => CODEC_PCM,
        other => other,
    }
}

/// Build the SDP for `ports.len()` parallel inputs of `codec`
pub fn generate(codec: &Codec, host: IpAddr, ports: &[u16]) -> Result<String> {
    if ports.is_empty() {
        return Err(Error::NoParents);
    }

    let family = match host {
        IpAddr::V4(_) => "IP4",
        IpAddr::V6(_) => "IP6",
    };
    let name = sdp_codec_name(&codec.name);
    let pt = codec.payload_type;

    let mut sdp = String::new();
    write_sdp(&mut sdp, |s| {
        write!(s, "v=0\r\n")?;
        write!(s, "o=- 1 1 IN IP4 0.0.0.0\r\n")?;
        write!(s, "s={}\r\n", SESSION_NAME)?;
        write!(s, "c=IN {} {}\r\n", family, host)?;
        write!(s, "t=0 0\r\n")?;

        for port in ports {
            write!(s, "m={} {} RTP/AVP {}\r\n", KIND_AUDIO, port, pt)?;
            write!(s, "a=rtpmap:{} {}/{}", pt, name, codec.clock_rate)?;
            if codec.channels > 0 {
                write!(s, "/{}", codec.channels)?;
            }
            write!(s, "\r\n")?;
            if !codec.fmtp_line.is_empty() {
                write!(s, "a=fmtp:{} {}\r\n", pt, codec.fmtp_line)?;
            }
            write!(s, "a={}\r\n", DIRECTION_RECVONLY)?;
        }
        Ok(())
    })?;

    Ok(sdp)
}

fn write_sdp<F>(out: &mut String, f: F) -> Result<()>
where
    F: FnOnce(&mut String) -> std::fmt::Result,
{
    f(out).map_err(|e| Error::Sdp(e.to_string()))
}
