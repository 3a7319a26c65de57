//! RTMP publishing connection
//!
//! Performs the handshake and command exchange of a publisher:
//!
//! ```text
//! connect(app) -> _result
//! releaseStream(key), FCPublish(key)
//! createStream -> _result(stream id)
//! publish(key, "live") -> onStatus(NetStream.Publish.Start)
//! @setDataFrame(onMetaData)
//! ... audio / video ...
//! FCUnpublish(key), deleteStream(stream id)
//! ```
//!
//! Once publishing, the socket is split: the session task writes media
//! through the connector while a monitor task reads server messages, answers
//! pings and acknowledgement windows on the shared writer, and turns status
//! messages into [`ConnectionEvent`]s. Control replies therefore go out even
//! while no media flows.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::amf::AmfValue;
use crate::client::config::{EncodeSettings, PublishConfig};
use crate::client::destination::RtmpEndpoint;
use crate::error::{HandshakeError, ProtocolError, Result};
use crate::media::{AacPacket, AvcPacket};
use crate::protocol::constants::*;
use crate::protocol::{ChunkDecoder, ChunkEncoder, ClientHandshake, Command, ConnectParams, RtmpMessage};
use crate::session::classifier::EncoderInput;
use crate::session::event::{ConnectionEvent, ErrorCode};
use crate::session::sample::{MediaPayload, SampleUnit};
use crate::stats::TransportStats;

/// Read side of the chunk stream
#[derive(Debug)]
struct MessageReader {
    half: OwnedReadHalf,
    decoder: ChunkDecoder,
    buf: BytesMut,
    read_buffer_size: usize,
    bytes_read: u64,
    /// Acknowledgement window requested by the server (0 = none yet)
    window_ack_size: u32,
    last_ack: u64,
}

impl MessageReader {
    fn new(half: OwnedReadHalf, leftover: BytesMut, read_buffer_size: usize) -> Self {
        Self {
            half,
            decoder: ChunkDecoder::new(),
            buf: leftover,
            read_buffer_size: read_buffer_size.max(1024),
            bytes_read: 0,
            window_ack_size: 0,
            last_ack: 0,
        }
    }

    async fn next(&mut self) -> Result<RtmpMessage> {
        loop {
            if let Some(raw) = self.decoder.decode(&mut self.buf)? {
                return RtmpMessage::from_raw(raw);
            }

            self.buf.reserve(self.read_buffer_size);
            let n = self.half.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(ProtocolError::ConnectionClosed.into());
            }
            self.bytes_read += n as u64;
        }
    }

    /// Apply a protocol control message, returning the reply it calls for
    fn absorb(&mut self, msg: &RtmpMessage) -> Option<RtmpMessage> {
        match msg {
            RtmpMessage::SetChunkSize(size) => {
                tracing::debug!(size = size, "Server chunk size");
                self.decoder.set_chunk_size(*size);
                None
            }
            RtmpMessage::WindowAckSize(size) => {
                self.window_ack_size = *size;
                None
            }
            RtmpMessage::SetPeerBandwidth { size, .. } => Some(RtmpMessage::WindowAckSize(*size)),
            RtmpMessage::UserControl {
                event: UC_PING_REQUEST,
                value,
            } => Some(RtmpMessage::UserControl {
                event: UC_PING_RESPONSE,
                value: *value,
            }),
            RtmpMessage::UserControl {
                event: UC_STREAM_BEGIN,
                value,
            } => {
                tracing::debug!(stream_id = value, "Stream begin");
                None
            }
            _ => None,
        }
    }

    /// Acknowledgement due after the last read, if any
    fn take_ack(&mut self) -> Option<RtmpMessage> {
        if self.window_ack_size > 0
            && self.bytes_read - self.last_ack >= self.window_ack_size as u64
        {
            self.last_ack = self.bytes_read;
            Some(RtmpMessage::Acknowledgement(self.bytes_read as u32))
        } else {
            None
        }
    }
}

fn is_control(msg: &RtmpMessage) -> bool {
    matches!(
        msg,
        RtmpMessage::SetChunkSize(_)
            | RtmpMessage::Abort(_)
            | RtmpMessage::Acknowledgement(_)
            | RtmpMessage::WindowAckSize(_)
            | RtmpMessage::SetPeerBandwidth { .. }
            | RtmpMessage::UserControl { .. }
    )
}

/// Write side of the chunk stream
#[derive(Debug)]
struct MessageWriter {
    half: OwnedWriteHalf,
    encoder: ChunkEncoder,
    buf: BytesMut,
    bytes_sent: u64,
}

impl MessageWriter {
    fn new(half: OwnedWriteHalf) -> Self {
        Self {
            half,
            encoder: ChunkEncoder::new(),
            buf: BytesMut::with_capacity(64 * 1024),
            bytes_sent: 0,
        }
    }

    async fn send(&mut self, msg: &RtmpMessage) -> Result<()> {
        // Left over if a previous write was abandoned
        self.buf.clear();
        self.encoder.encode(&msg.to_raw(), &mut self.buf);
        // Our own SetChunkSize still goes out in the old size
        if let RtmpMessage::SetChunkSize(size) = msg {
            self.encoder.set_chunk_size(*size);
        }

        let result = self.half.write_all(&self.buf).await;
        self.bytes_sent += self.buf.len() as u64;
        self.buf.clear();
        result?;
        Ok(())
    }
}

/// Media timestamps in ms, relative to the first frame
#[derive(Debug, Default)]
struct Timeline {
    base: Option<Duration>,
    last_video: u32,
    last_audio: u32,
}

impl Timeline {
    fn stamp(&mut self, input: EncoderInput, unit: &SampleUnit) -> u32 {
        let last = match input {
            EncoderInput::Video => &mut self.last_video,
            EncoderInput::Audio => &mut self.last_audio,
        };
        // Decoder configs carry no capture time of their own
        if unit.is_config() {
            return *last;
        }

        let base = *self.base.get_or_insert(unit.timestamp);
        let ts = unit.timestamp.saturating_sub(base).as_millis() as u32;
        *last = ts;
        ts
    }
}

async fn handshake(stream: &mut TcpStream) -> Result<BytesMut> {
    let mut hs = ClientHandshake::new();
    stream.write_all(&hs.c0c1()?).await?;

    let needed = hs.bytes_needed();
    let mut buf = BytesMut::with_capacity(needed * 2);
    while buf.len() < needed {
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(ProtocolError::ConnectionClosed.into());
        }
    }

    let mut reply = buf.split_to(needed).freeze();
    let c2 = hs
        .process_server(&mut reply)?
        .ok_or(HandshakeError::InvalidState)?;
    stream.write_all(&c2).await?;

    // Anything past S2 already belongs to the chunk stream
    Ok(buf)
}

/// Next server message, with any control reply it calls for already written
async fn monitor_step(
    reader: &mut MessageReader,
    writer: &Mutex<MessageWriter>,
) -> Result<RtmpMessage> {
    let msg = reader.next().await?;
    let reply = reader.absorb(&msg);
    for reply in reply.into_iter().chain(reader.take_ack()) {
        tracing::trace!(reply = ?reply, "Answering control message");
        writer.lock().await.send(&reply).await?;
    }
    Ok(msg)
}

/// Reads server messages while publishing
async fn monitor(
    mut reader: MessageReader,
    writer: Arc<Mutex<MessageWriter>>,
    events: mpsc::Sender<ConnectionEvent>,
) {
    loop {
        let msg = match monitor_step(&mut reader, &writer).await {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(error = %e, "Monitor stopped");
                let _ = events
                    .send(ConnectionEvent::error(ErrorCode::TransportError, e.to_string()))
                    .await;
                return;
            }
        };

        let event = match msg {
            RtmpMessage::Command(cmd) if cmd.name == CMD_ON_STATUS => match cmd.status_info() {
                Some(info) if info.is_error() => {
                    let code = if info.code.starts_with("NetStream.Publish") {
                        ErrorCode::PublishRejected
                    } else {
                        ErrorCode::TransportError
                    };
                    ConnectionEvent::error(code, format!("{}: {}", info.code, info.description))
                }
                Some(info) => ConnectionEvent::status(info.code, info.description),
                None => continue,
            },
            _ => continue,
        };

        if events.send(event).await.is_err() {
            return;
        }
    }
}

/// Publishing RTMP connection
#[derive(Debug)]
pub struct RtmpConnector {
    endpoint: RtmpEndpoint,
    /// Shared with the monitor once publishing
    writer: Arc<Mutex<MessageWriter>>,
    /// Owned here until the monitor takes it
    reader: Option<MessageReader>,
    monitor: Option<JoinHandle<()>>,
    next_transaction_id: f64,
    stream_id: Option<u32>,
    stream_key: Option<String>,
    timeline: Timeline,
    stats: TransportStats,
}

impl RtmpConnector {
    /// TCP connect, handshake and `connect` command
    pub async fn connect(endpoint: &str, config: &PublishConfig) -> Result<Self> {
        let endpoint = RtmpEndpoint::parse(endpoint)?;
        tracing::info!(
            host = %endpoint.host,
            port = endpoint.port,
            app = %endpoint.app,
            "Connecting"
        );

        let mut stream = TcpStream::connect(endpoint.socket_addr()).await?;
        if config.tcp_nodelay {
            stream.set_nodelay(true)?;
        }
        let leftover = handshake(&mut stream).await?;
        tracing::debug!("Handshake complete");

        let (read_half, write_half) = stream.into_split();
        let mut conn = Self {
            endpoint,
            writer: Arc::new(Mutex::new(MessageWriter::new(write_half))),
            reader: Some(MessageReader::new(
                read_half,
                leftover,
                config.read_buffer_size,
            )),
            monitor: None,
            next_transaction_id: 0.0,
            stream_id: None,
            stream_key: None,
            timeline: Timeline::default(),
            stats: TransportStats::new(),
        };

        conn.write(&RtmpMessage::SetChunkSize(config.chunk_size))
            .await?;
        conn.write(&RtmpMessage::WindowAckSize(config.window_ack_size))
            .await?;

        let params = ConnectParams {
            app: conn.endpoint.app.clone(),
            tc_url: conn.endpoint.tc_url.clone(),
            flash_ver: FLASH_VERSION.to_string(),
        };
        let txn = conn.next_transaction();
        conn.send_command(Command::new(CMD_CONNECT, txn).with_object(params.to_amf()))
            .await?;
        let response = conn.await_result(CMD_CONNECT, txn).await?;

        let code = response
            .status_info()
            .map(|s| s.code)
            .unwrap_or_else(|| NC_CONNECT_SUCCESS.to_string());
        tracing::info!(code = %code, "Connected");
        Ok(conn)
    }

    pub fn endpoint(&self) -> &RtmpEndpoint {
        &self.endpoint
    }

    /// Message stream ID once publishing
    pub fn stream_id(&self) -> Option<u32> {
        self.stream_id
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Create a stream, publish `stream_key` on it and send `onMetaData`
    pub async fn publish(&mut self, stream_key: &str, settings: &EncodeSettings) -> Result<()> {
        let txn = self.next_transaction();
        self.send_command(Command::new(CMD_RELEASE_STREAM, txn).arg(stream_key))
            .await?;
        let txn = self.next_transaction();
        self.send_command(Command::new(CMD_FC_PUBLISH, txn).arg(stream_key))
            .await?;

        let txn = self.next_transaction();
        self.send_command(Command::new(CMD_CREATE_STREAM, txn))
            .await?;
        let response = self.await_result(CMD_CREATE_STREAM, txn).await?;
        let stream_id = response
            .arguments
            .iter()
            .find_map(|v| v.as_number())
            .ok_or_else(|| {
                ProtocolError::UnexpectedMessage("createStream result without stream id".into())
            })? as u32;

        let txn = self.next_transaction();
        self.send_command(
            Command::new(CMD_PUBLISH, txn)
                .arg(stream_key)
                .arg("live")
                .on_stream(stream_id),
        )
        .await?;
        self.await_publish_start(txn).await?;

        self.write(&RtmpMessage::Data {
                stream_id,
                values: vec![
                    AmfValue::from(CMD_SET_DATA_FRAME),
                    AmfValue::from(CMD_ON_METADATA),
                    settings.to_metadata(),
                ],
            })
            .await?;

        self.stream_id = Some(stream_id);
        self.stream_key = Some(stream_key.to_string());
        tracing::info!(stream_key = %stream_key, stream_id = stream_id, "Publishing");
        Ok(())
    }

    /// Hand the read side to a background task reporting into `events`
    pub fn spawn_monitor(&mut self, events: mpsc::Sender<ConnectionEvent>) -> Result<()> {
        let reader = self.reader.take().ok_or(ProtocolError::NotConnected)?;
        self.monitor = Some(tokio::spawn(monitor(reader, self.writer.clone(), events)));
        Ok(())
    }

    /// Send one unit as an FLV tag body on the published stream
    pub async fn send_unit(&mut self, input: EncoderInput, unit: SampleUnit) -> Result<()> {
        let stream_id = self.stream_id.ok_or(ProtocolError::NotConnected)?;
        let timestamp = self.timeline.stamp(input, &unit);

        let msg = match (input, unit.payload) {
            (EncoderInput::Video, MediaPayload::Config(record)) => RtmpMessage::Video {
                stream_id,
                timestamp,
                data: AvcPacket::SequenceHeader(record).to_tag_body(),
            },
            (EncoderInput::Video, MediaPayload::Frame { data, keyframe }) => {
                self.stats.video_frames += 1;
                if keyframe {
                    self.stats.keyframes += 1;
                }
                self.stats.last_video_ts = timestamp;
                RtmpMessage::Video {
                    stream_id,
                    timestamp,
                    data: AvcPacket::Frame {
                        keyframe,
                        composition_time: 0,
                        nalus: data,
                    }
                    .to_tag_body(),
                }
            }
            (EncoderInput::Audio, MediaPayload::Config(config)) => RtmpMessage::Audio {
                stream_id,
                timestamp,
                data: AacPacket::SequenceHeader(config).to_tag_body(),
            },
            (EncoderInput::Audio, MediaPayload::Frame { data, .. }) => {
                self.stats.audio_frames += 1;
                self.stats.last_audio_ts = timestamp;
                RtmpMessage::Audio {
                    stream_id,
                    timestamp,
                    data: AacPacket::Frame(data).to_tag_body(),
                }
            }
        };

        let mut writer = self.writer.lock().await;
        writer.send(&msg).await?;
        self.stats.bytes_sent = writer.bytes_sent;
        Ok(())
    }

    /// `FCUnpublish` + `deleteStream`. No-op when not publishing.
    pub async fn close_stream(&mut self) -> Result<()> {
        let (Some(stream_id), Some(stream_key)) = (self.stream_id.take(), self.stream_key.take())
        else {
            return Ok(());
        };

        let txn = self.next_transaction();
        self.send_command(Command::new(CMD_FC_UNPUBLISH, txn).arg(stream_key.as_str()))
            .await?;
        let txn = self.next_transaction();
        self.send_command(Command::new(CMD_DELETE_STREAM, txn).arg(stream_id))
            .await?;

        tracing::info!(stream_key = %stream_key, "Stream closed");
        Ok(())
    }

    /// Stop the monitor and shut the socket down
    pub async fn close(mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
            // Releases the writer if the monitor held it
            let _ = monitor.await;
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.half.shutdown().await {
            tracing::debug!(error = %e, "Socket shutdown failed");
        }
        tracing::info!(
            bytes_sent = writer.bytes_sent,
            video_frames = self.stats.video_frames,
            audio_frames = self.stats.audio_frames,
            "Connection closed"
        );
    }

    fn next_transaction(&mut self) -> f64 {
        self.next_transaction_id += 1.0;
        self.next_transaction_id
    }

    async fn send_command(&mut self, cmd: Command) -> Result<()> {
        tracing::trace!(name = %cmd.name, txn = cmd.transaction_id, "Sending command");
        self.write(&RtmpMessage::Command(cmd)).await
    }

    async fn write(&self, msg: &RtmpMessage) -> Result<()> {
        self.writer.lock().await.send(msg).await
    }

    /// Next non-control message, answering control messages on the way
    async fn read_message(&mut self) -> Result<RtmpMessage> {
        let reader = self.reader.as_mut().ok_or(ProtocolError::NotConnected)?;
        loop {
            let msg = reader.next().await?;
            let reply = reader.absorb(&msg);
            for reply in reply.into_iter().chain(reader.take_ack()) {
                self.writer.lock().await.send(&reply).await?;
            }
            if !is_control(&msg) {
                return Ok(msg);
            }
        }
    }

    /// Wait for `_result`/`_error` of transaction `txn`
    async fn await_result(&mut self, command: &str, txn: f64) -> Result<Command> {
        loop {
            let RtmpMessage::Command(cmd) = self.read_message().await? else {
                continue;
            };
            if cmd.transaction_id == txn {
                match cmd.name.as_str() {
                    CMD_RESULT => return Ok(cmd),
                    CMD_ERROR => {
                        let info = cmd.status_info();
                        return Err(ProtocolError::CommandFailed {
                            command: command.to_string(),
                            code: info.as_ref().map(|i| i.code.clone()).unwrap_or_default(),
                            description: info.map(|i| i.description).unwrap_or_default(),
                        }
                        .into());
                    }
                    _ => {}
                }
            }
            tracing::debug!(name = %cmd.name, txn = cmd.transaction_id, "Ignoring command");
        }
    }

    async fn await_publish_start(&mut self, txn: f64) -> Result<()> {
        loop {
            let RtmpMessage::Command(cmd) = self.read_message().await? else {
                continue;
            };

            let info = match cmd.name.as_str() {
                CMD_ON_STATUS => cmd.status_info(),
                CMD_ERROR if cmd.transaction_id == txn => cmd.status_info(),
                _ => {
                    tracing::debug!(name = %cmd.name, "Ignoring command");
                    continue;
                }
            };
            let Some(info) = info else {
                continue;
            };

            if info.is_error() || cmd.name == CMD_ERROR {
                return Err(ProtocolError::PublishRejected {
                    code: info.code,
                    description: info.description,
                }
                .into());
            }
            if info.code == NS_PUBLISH_START {
                return Ok(());
            }
            tracing::debug!(code = %info.code, "Status while publishing");
        }
    }
}
