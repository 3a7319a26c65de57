//! Publishes through the real RTMP transport to a minimal in-process server

#![cfg(feature = "rtmp")]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use screencast_rtmp::amf::AmfValue;
use screencast_rtmp::media::{AacPacket, AvcPacket};
use screencast_rtmp::protocol::constants::*;
use screencast_rtmp::protocol::{
    ChunkDecoder, ChunkEncoder, Command, ConnectParams, RtmpMessage, StatusInfo,
};
use screencast_rtmp::session::FailureReason;
use screencast_rtmp::{
    ConfigBridge, LifecycleController, MemoryStore, PublishConfig, PublishState, SampleKind,
    SampleUnit,
};

/// What the server saw
#[derive(Debug, Default)]
struct Received {
    app: Option<String>,
    stream_key: Option<String>,
    metadata_width: Option<f64>,
    video: Vec<Bytes>,
    audio: Vec<Bytes>,
    fc_unpublish: bool,
    delete_stream: bool,
}

struct Peer {
    stream: TcpStream,
    decoder: ChunkDecoder,
    encoder: ChunkEncoder,
    buf: BytesMut,
}

impl Peer {
    async fn accept(listener: &TcpListener) -> Self {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut c0c1 = vec![0u8; 1 + HANDSHAKE_SIZE];
        stream.read_exact(&mut c0c1).await.unwrap();
        assert_eq!(c0c1[0], RTMP_VERSION);

        let mut reply = vec![RTMP_VERSION];
        reply.extend_from_slice(&[0u8; HANDSHAKE_SIZE]);
        reply.extend_from_slice(&c0c1[1..]);
        stream.write_all(&reply).await.unwrap();

        let mut c2 = vec![0u8; HANDSHAKE_SIZE];
        stream.read_exact(&mut c2).await.unwrap();

        Self {
            stream,
            decoder: ChunkDecoder::new(),
            encoder: ChunkEncoder::new(),
            buf: BytesMut::with_capacity(64 * 1024),
        }
    }

    /// Next message, `None` once the client hung up
    async fn next(&mut self) -> Option<RtmpMessage> {
        loop {
            if let Some(raw) = self.decoder.decode(&mut self.buf).unwrap() {
                let msg = RtmpMessage::from_raw(raw).unwrap();
                if let RtmpMessage::SetChunkSize(size) = msg {
                    self.decoder.set_chunk_size(size);
                }
                return Some(msg);
            }
            match self.stream.read_buf(&mut self.buf).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    async fn send(&mut self, msg: RtmpMessage) {
        let mut out = BytesMut::new();
        self.encoder.encode(&msg.to_raw(), &mut out);
        self.stream.write_all(&out).await.unwrap();
    }
}

/// Test-side controls of a running server
struct Server {
    task: JoinHandle<Received>,
    /// Values to send as ping requests
    pings: mpsc::UnboundedSender<u32>,
    /// Values of the ping responses seen
    pongs: mpsc::UnboundedReceiver<u32>,
}

/// Accept one publisher. `reject` answers `publish` with an error status.
fn serve(listener: TcpListener, reject: bool) -> Server {
    let (pings, mut ping_rx) = mpsc::unbounded_channel();
    let (pong_tx, pongs) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        let mut received = Received::default();

        loop {
            let msg = tokio::select! {
                msg = peer.next() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
                Some(value) = ping_rx.recv() => {
                    peer.send(RtmpMessage::UserControl {
                        event: UC_PING_REQUEST,
                        value,
                    })
                    .await;
                    continue;
                }
            };

            match msg {
                RtmpMessage::Command(cmd) => match cmd.name.as_str() {
                    CMD_CONNECT => {
                        received.app =
                            ConnectParams::from_amf(&cmd.command_object).map(|p| p.app);
                        peer.send(RtmpMessage::WindowAckSize(2_500_000)).await;
                        peer.send(RtmpMessage::SetPeerBandwidth {
                            size: 2_500_000,
                            limit_type: 2,
                        })
                        .await;
                        peer.send(RtmpMessage::Command(
                            Command::new(CMD_RESULT, cmd.transaction_id)
                                .with_object(AmfValue::object([("fmsVer", "FMS/3,0,1,123")]))
                                .arg(
                                    StatusInfo::new("status", NC_CONNECT_SUCCESS, "Connected.")
                                        .to_amf(),
                                ),
                        ))
                        .await;
                    }
                    CMD_CREATE_STREAM => {
                        peer.send(RtmpMessage::Command(
                            Command::new(CMD_RESULT, cmd.transaction_id).arg(1.0),
                        ))
                        .await;
                    }
                    CMD_PUBLISH => {
                        received.stream_key =
                            cmd.arguments.first().and_then(|v| v.as_str()).map(str::to_string);
                        let info = if reject {
                            StatusInfo::new("error", "NetStream.Publish.BadName", "Stream key in use")
                        } else {
                            StatusInfo::new("status", NS_PUBLISH_START, "Publishing.")
                        };
                        peer.send(RtmpMessage::Command(
                            Command::new(CMD_ON_STATUS, 0.0)
                                .arg(info.to_amf())
                                .on_stream(1),
                        ))
                        .await;
                    }
                    CMD_FC_UNPUBLISH => received.fc_unpublish = true,
                    CMD_DELETE_STREAM => received.delete_stream = true,
                    _ => {}
                },
                RtmpMessage::Data { values, .. } => {
                    if values.first().and_then(|v| v.as_str()) == Some(CMD_SET_DATA_FRAME) {
                        received.metadata_width =
                            values.get(2).and_then(|meta| meta.get_number("width"));
                    }
                }
                RtmpMessage::Video { data, .. } => received.video.push(data),
                RtmpMessage::Audio { data, .. } => received.audio.push(data),
                RtmpMessage::UserControl {
                    event: UC_PING_RESPONSE,
                    value,
                } => {
                    let _ = pong_tx.send(value);
                }
                _ => {}
            }
        }

        received
    });

    Server { task, pings, pongs }
}

async fn start(reject: bool) -> (LifecycleController<screencast_rtmp::DefaultTransport>, Server) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = serve(listener, reject);

    let bridge = ConfigBridge::new(Arc::new(MemoryStore::new()));
    bridge
        .write_destination(&format!("rtmp://127.0.0.1:{}/live/key123", port))
        .unwrap();
    let controller =
        LifecycleController::with_default_transport(bridge, PublishConfig::default()).unwrap();
    (controller, server)
}

fn avc_record() -> Bytes {
    // Baseline 3.1, one SPS, one PPS
    Bytes::from_static(&[
        0x01, 0x42, 0xC0, 0x1F, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x42, 0xC0, 0x1F, 0x01, 0x00,
        0x02, 0x68, 0xCE,
    ])
}

#[tokio::test]
async fn publishes_media_to_loopback_server() {
    let (mut controller, server) = start(false).await;

    controller.started(&HashMap::new());
    let mut states = controller.subscribe();
    let state = tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| s.is_publishing() || s.is_terminal()),
    )
    .await
    .expect("session did not connect")
    .unwrap()
    .clone();
    assert_eq!(state, PublishState::Publishing);
    assert!(controller.is_connected());

    let units = [
        SampleUnit::video_config(avc_record()),
        SampleUnit::audio_config(SampleKind::MicAudio, Bytes::from_static(&[0x12, 0x10])),
        SampleUnit::video_frame(
            Duration::from_millis(1_000),
            Bytes::from_static(&[0, 0, 0, 2, 0x65, 0x88]),
            true,
        ),
        SampleUnit::audio_frame(
            SampleKind::MicAudio,
            Duration::from_millis(1_010),
            Bytes::from_static(&[0x21, 0x00]),
        ),
        SampleUnit::video_frame(
            Duration::from_millis(1_033),
            Bytes::from_static(&[0, 0, 0, 2, 0x41, 0x9A]),
            false,
        ),
    ];
    for unit in units {
        assert!(controller.deliver(unit).is_queued());
    }

    for _ in 0..200 {
        if controller.counters().forwarded == 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(controller.counters().forwarded, 5);

    assert_eq!(controller.finished().await, Some(PublishState::Closed));

    let received = tokio::time::timeout(Duration::from_secs(5), server.task)
        .await
        .expect("server did not see the client hang up")
        .unwrap();
    assert_eq!(received.app.as_deref(), Some("live"));
    assert_eq!(received.stream_key.as_deref(), Some("key123"));
    assert_eq!(received.metadata_width, Some(720.0));
    assert!(received.fc_unpublish);
    assert!(received.delete_stream);

    assert_eq!(received.video.len(), 3);
    assert!(matches!(
        AvcPacket::parse(received.video[0].clone()).unwrap(),
        AvcPacket::SequenceHeader(record) if record == avc_record()
    ));
    assert!(matches!(
        AvcPacket::parse(received.video[1].clone()).unwrap(),
        AvcPacket::Frame { keyframe: true, .. }
    ));

    assert_eq!(received.audio.len(), 2);
    assert!(AacPacket::parse(received.audio[0].clone())
        .unwrap()
        .is_sequence_header());
    assert_eq!(
        AacPacket::parse(received.audio[1].clone()).unwrap(),
        AacPacket::Frame(Bytes::from_static(&[0x21, 0x00]))
    );
}

#[tokio::test]
async fn rejected_publish_fails_session() {
    let (mut controller, server) = start(true).await;

    controller.started(&HashMap::new());
    let mut states = controller.subscribe();
    let state = tokio::time::timeout(Duration::from_secs(5), states.wait_for(|s| s.is_terminal()))
        .await
        .expect("session did not fail")
        .unwrap()
        .clone();

    match state {
        PublishState::Failed(FailureReason::PublishRejected(detail)) => {
            assert!(detail.contains("NetStream.Publish.BadName"), "{}", detail)
        }
        other => panic!("unexpected state {}", other),
    }

    controller.finished().await;
    let received = tokio::time::timeout(Duration::from_secs(5), server.task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.stream_key.as_deref(), Some("key123"));
    assert!(received.video.is_empty());
    assert!(!received.delete_stream);
}

#[tokio::test]
async fn answers_pings_while_paused() {
    let (mut controller, mut server) = start(false).await;

    controller.started(&HashMap::new());
    let mut states = controller.subscribe();
    tokio::time::timeout(Duration::from_secs(5), states.wait_for(|s| s.is_publishing()))
        .await
        .expect("session did not connect")
        .unwrap();

    controller.paused();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == PublishState::Paused),
    )
    .await
    .expect("session did not pause")
    .unwrap();

    // No media flows while paused, the reply must still go out
    server.pings.send(0x1234_5678).unwrap();
    let pong = tokio::time::timeout(Duration::from_secs(5), server.pongs.recv())
        .await
        .expect("ping went unanswered while paused");
    assert_eq!(pong, Some(0x1234_5678));
    assert_eq!(controller.state(), PublishState::Paused);

    assert_eq!(controller.finished().await, Some(PublishState::Closed));
    let received = tokio::time::timeout(Duration::from_secs(5), server.task)
        .await
        .unwrap()
        .unwrap();
    assert!(received.video.is_empty());
    assert!(received.delete_stream);
}
