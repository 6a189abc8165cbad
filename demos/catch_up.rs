//! Late joiner catch-up demo
//!
//! Run with: cargo run --example catch_up [PLAYBACK_FPS]
//!
//! A simulated H.264 camera produces 30 fps with a keyframe every second.
//! A consumer joins 1.5 s in, gets the cached GOPs replayed at
//! PLAYBACK_FPS (default 60), then continues live.
//!
//! Set RUST_LOG=rtp_relay=trace for per-node detail.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use rtp_relay::core::codec::{CODEC_H264, DIRECTION_SENDONLY, KIND_VIDEO};
use rtp_relay::core::{handler, Codec, Media, Packet, PAYLOAD_TYPE_RAW};
use rtp_relay::graph::{Graph, Receiver, Sender};
use rtp_relay::registry::CodecRegistry;

const FPS: u32 = 30;

/// One AVCC access unit: an IDR slice on keyframes, a P slice otherwise
fn frame(index: u32) -> Bytes {
    let nalu: &[u8] = if index % FPS == 0 {
        &[0x65, 0x88, 0x84, 0x00]
    } else {
        &[0x41, 0x9A, 0x02, 0x00]
    };
    let mut buf = BytesMut::with_capacity(4 + nalu.len());
    buf.put_u32(nalu.len() as u32);
    buf.put_slice(nalu);
    buf.freeze()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtp_relay=debug".parse()?)
                .add_directive("catch_up=info".parse()?),
        )
        .init();

    let playback_fps: u32 = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 60,
    };

    let graph = Graph::new();
    let registry = CodecRegistry::with_defaults();

    let codec = Codec::new(CODEC_H264, 90_000, PAYLOAD_TYPE_RAW);
    let media = Media::new(KIND_VIDEO, DIRECTION_SENDONLY, vec![codec.clone()]);
    let receiver = Receiver::new(&graph, media.clone(), codec.clone());

    let cache = Arc::new(registry.create(&codec)?);
    cache.bind(&receiver);

    let producer = {
        let receiver = receiver.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1) / FPS);
            for index in 0..FPS * 4 {
                ticker.tick().await;
                let packet = Packet::avcc(index as u16, index * (90_000 / FPS), frame(index));
                receiver.input(&packet);
            }
        })
    };

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let delivered = Arc::new(AtomicU64::new(0));
    let sender = Sender::new(&graph, media, codec);
    let counter = delivered.clone();
    sender.set_output(handler(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    }));
    sender.bind(&receiver);

    tracing::info!(cached = cache.cache().len(), playback_fps, "Consumer joined");
    let catch_up = cache.catch_up(&sender, playback_fps).await;
    tracing::info!(
        replayed = catch_up.sent,
        next_timestamp = catch_up.next_timestamp,
        "Consumer is live"
    );

    producer.await?;
    receiver.close();
    sender.join().await;

    tracing::info!(delivered = delivered.load(Ordering::Relaxed), "Done");
    println!("receiver: {}", receiver);
    println!("sender:   {}", sender);
    println!("{}", sender.info().to_json()?);

    Ok(())
}
