//! Audio mixer demo
//!
//! Run with: cargo run --example mixer [FFMPEG_BINARY]
//!
//! Two simulated PCMU microphones feed one mixer. The first second runs
//! with a single parent (direct passthrough), then the second microphone
//! joins and ffmpeg mixes both. Without ffmpeg installed the engine fails
//! to start and the mixer keeps running with whatever it can pass through.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use rtp_relay::core::codec::{CODEC_PCMU, DIRECTION_SENDONLY, KIND_AUDIO};
use rtp_relay::core::{handler, Codec, Media, Packet};
use rtp_relay::graph::{Graph, Receiver, Sender};
use rtp_relay::mixer::{MixerConfig, RtpMixer};

/// Feed 20 ms PCMU frames into `receiver` until the task is aborted
fn microphone(receiver: Receiver, level: u8) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(20));
        let mut seq: u16 = 0;
        loop {
            ticker.tick().await;
            let packet = Packet::rtp(seq, seq as u32 * 160, true, Bytes::from(vec![level; 160]));
            receiver.input(&packet);
            seq = seq.wrapping_add(1);
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtp_relay=debug".parse()?)
                .add_directive("mixer=info".parse()?),
        )
        .init();

    let binary = std::env::args().nth(1).unwrap_or_else(|| "ffmpeg".to_string());

    let graph = Graph::new();
    let codec = Codec::new(CODEC_PCMU, 8000, 0);
    let media = Media::new(KIND_AUDIO, DIRECTION_SENDONLY, vec![codec.clone()]);

    let config = MixerConfig::default().engine_binary(binary);
    let mixer = RtpMixer::new(&graph, config, media.clone(), codec.clone());

    let mixed = Arc::new(AtomicU64::new(0));
    let sender = Sender::new(&graph, media.clone(), codec.clone());
    let counter = mixed.clone();
    sender.set_output(handler(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    }));
    mixer.node().append_child(sender.node());
    sender.start();

    let alice = Receiver::new(&graph, media.clone(), codec.clone());
    let bob = Receiver::new(&graph, media, codec);
    let mics = [microphone(alice.clone(), 0x7F), microphone(bob.clone(), 0xFF)];

    mixer.add_parent(alice.node()).await?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    tracing::info!(mixer = %mixer, packets = mixed.load(Ordering::Relaxed), "Passthrough");

    if let Err(e) = mixer.add_parent(bob.node()).await {
        tracing::warn!(error = %e, "Mixing engine unavailable");
    }
    tokio::time::sleep(Duration::from_secs(3)).await;
    tracing::info!(mixer = %mixer, packets = mixed.load(Ordering::Relaxed), "Mixing");

    println!("{}", mixer.info().to_json()?);

    for mic in mics {
        mic.abort();
    }
    mixer.remove_parent(bob.node()).await?;
    mixer.remove_parent(alice.node()).await?;
    sender.join().await;

    tracing::info!(closed = mixer.is_closed(), "Done");
    Ok(())
}
