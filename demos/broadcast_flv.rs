//! Broadcast FLV - a stand-in for the broadcast worker
//!
//! Run with: cargo run --example broadcast_flv -- <store_dir> <file.flv>
//!
//! Replays an H.264/AAC FLV file in real time as if the OS were handing over
//! captured sample buffers, and publishes it to the destination stored with
//! `set_destination`. Ctrl-C ends the broadcast early.
//!
//! ```text
//!   file.flv ──> FlvReader ──> SampleUnit ──> LifecycleController ──> RTMP server
//!                                                 ▲
//!                      <store_dir>/<namespace>.json (destination)
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use screencast_rtmp::media::{AacPacket, AudioSpecificConfig, AvcConfig, AvcPacket, FlvReader, FlvTag};
use screencast_rtmp::{
    ConfigBridge, JsonFileStore, LifecycleController, PublishConfig, PublishState, SampleKind,
    SampleUnit,
};

/// Turn one FLV tag into the unit a capture callback would deliver
fn to_sample(tag: FlvTag) -> Option<SampleUnit> {
    let timestamp = Duration::from_millis(tag.timestamp as u64);

    if tag.is_video() {
        return match AvcPacket::parse(tag.data) {
            Ok(AvcPacket::SequenceHeader(record)) => {
                if let Ok(config) = AvcConfig::parse(&record) {
                    println!(
                        "Video: H.264 {} level {}",
                        config.profile_name(),
                        config.level_string()
                    );
                }
                Some(SampleUnit::video_config(record))
            }
            Ok(AvcPacket::Frame { keyframe, nalus, .. }) => {
                Some(SampleUnit::video_frame(timestamp, nalus, keyframe))
            }
            Ok(AvcPacket::EndOfSequence) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping video tag");
                None
            }
        };
    }

    if tag.is_audio() {
        return match AacPacket::parse(tag.data) {
            Ok(AacPacket::SequenceHeader(config)) => {
                if let Ok(asc) = AudioSpecificConfig::parse(&config) {
                    println!(
                        "Audio: AAC {} Hz, {} channels",
                        asc.sampling_frequency,
                        asc.channels()
                    );
                }
                Some(SampleUnit::audio_config(SampleKind::DeviceAudio, config))
            }
            Ok(AacPacket::Frame(data)) => {
                Some(SampleUnit::audio_frame(SampleKind::DeviceAudio, timestamp, data))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping audio tag");
                None
            }
        };
    }

    None
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("screencast_rtmp=info".parse()?),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(store_dir), Some(input)) = (args.next(), args.next()) else {
        eprintln!("usage: broadcast_flv <store_dir> <file.flv>");
        std::process::exit(2);
    };

    let data = Bytes::from(std::fs::read(PathBuf::from(&input))?);
    let reader = FlvReader::new(data)?;
    println!(
        "Replaying {} (audio: {}, video: {})",
        input,
        reader.has_audio(),
        reader.has_video()
    );

    let bridge = ConfigBridge::new(Arc::new(JsonFileStore::new(store_dir)));
    let mut controller =
        LifecycleController::with_default_transport(bridge, PublishConfig::default())?;

    controller.started(&HashMap::new());
    let mut states = controller.subscribe();
    let state = states
        .wait_for(|s| s.is_publishing() || s.is_terminal())
        .await
        .map(|s| s.clone())
        .unwrap_or(PublishState::Closed);
    if let Some(destination) = controller.destination() {
        println!("Destination: {}", destination);
    }
    if state.is_terminal() {
        println!("Broadcast did not start: {}", state);
        controller.finished().await;
        return Ok(());
    }

    let sink = controller
        .sample_sink()
        .ok_or("session ended before publishing")?;
    let replay = async {
        let start = Instant::now();
        for tag in reader {
            let tag = match tag {
                Ok(tag) => tag,
                Err(e) => {
                    eprintln!("Stopping at damaged tag: {}", e);
                    break;
                }
            };
            let Some(unit) = to_sample(tag) else {
                continue;
            };
            if !unit.is_config() {
                tokio::time::sleep_until(start + unit.timestamp).await;
            }
            sink.deliver(unit);
        }
    };

    tokio::select! {
        _ = replay => println!("End of file"),
        _ = tokio::signal::ctrl_c() => println!("Interrupted"),
        _ = states.wait_for(PublishState::is_terminal) => println!("Session ended early"),
    }

    let state = controller.finished().await;
    println!("Final state: {}", state.unwrap_or_default());
    println!("Counters:    {}", controller.counters());
    Ok(())
}
