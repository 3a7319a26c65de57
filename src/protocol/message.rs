//! RTMP message model
//!
//! Converts between de-chunked [`RawMessage`]s and typed messages: protocol
//! control, user control, AMF0 commands/data and media.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::amf::{amf0, AmfValue};
use crate::error::{ProtocolError, Result};
use crate::protocol::chunk::RawMessage;
use crate::protocol::constants::*;

/// Typed RTMP message
#[derive(Debug, Clone, PartialEq)]
pub enum RtmpMessage {
    SetChunkSize(u32),
    Abort(u32),
    Acknowledgement(u32),
    WindowAckSize(u32),
    SetPeerBandwidth { size: u32, limit_type: u8 },
    UserControl { event: u16, value: u32 },
    Command(Command),
    Data { stream_id: u32, values: Vec<AmfValue> },
    Audio { stream_id: u32, timestamp: u32, data: Bytes },
    Video { stream_id: u32, timestamp: u32, data: Bytes },
    Unknown { type_id: u8 },
}

impl RtmpMessage {
    /// Parse a raw message
    pub fn from_raw(raw: RawMessage) -> Result<Self> {
        let mut p = raw.payload;
        let msg = match raw.type_id {
            MSG_SET_CHUNK_SIZE => RtmpMessage::SetChunkSize(read_u32(&mut p)? & 0x7FFF_FFFF),
            MSG_ABORT => RtmpMessage::Abort(read_u32(&mut p)?),
            MSG_ACKNOWLEDGEMENT => RtmpMessage::Acknowledgement(read_u32(&mut p)?),
            MSG_WINDOW_ACK_SIZE => RtmpMessage::WindowAckSize(read_u32(&mut p)?),
            MSG_SET_PEER_BANDWIDTH => {
                let size = read_u32(&mut p)?;
                let limit_type = if p.has_remaining() { p.get_u8() } else { 2 };
                RtmpMessage::SetPeerBandwidth { size, limit_type }
            }
            MSG_USER_CONTROL => {
                if p.remaining() < 2 {
                    return Err(truncated("user control"));
                }
                let event = p.get_u16();
                let value = if p.remaining() >= 4 { p.get_u32() } else { 0 };
                RtmpMessage::UserControl { event, value }
            }
            MSG_COMMAND_AMF0 => {
                let values = amf0::decode_all(p)?;
                RtmpMessage::Command(Command::from_values(values, raw.stream_id)?)
            }
            MSG_DATA_AMF0 => RtmpMessage::Data {
                stream_id: raw.stream_id,
                values: amf0::decode_all(p)?,
            },
            MSG_AUDIO => RtmpMessage::Audio {
                stream_id: raw.stream_id,
                timestamp: raw.timestamp,
                data: p,
            },
            MSG_VIDEO => RtmpMessage::Video {
                stream_id: raw.stream_id,
                timestamp: raw.timestamp,
                data: p,
            },
            type_id => RtmpMessage::Unknown { type_id },
        };
        Ok(msg)
    }

    /// Build the raw message, choosing the chunk stream by message kind
    pub fn to_raw(&self) -> RawMessage {
        let mut buf = BytesMut::with_capacity(8);
        let (csid, type_id, stream_id, timestamp, payload) = match self {
            RtmpMessage::SetChunkSize(size) => {
                buf.put_u32(*size & 0x7FFF_FFFF);
                (CSID_PROTOCOL_CONTROL, MSG_SET_CHUNK_SIZE, 0, 0, buf.freeze())
            }
            RtmpMessage::Abort(csid) => {
                buf.put_u32(*csid);
                (CSID_PROTOCOL_CONTROL, MSG_ABORT, 0, 0, buf.freeze())
            }
            RtmpMessage::Acknowledgement(seq) => {
                buf.put_u32(*seq);
                (CSID_PROTOCOL_CONTROL, MSG_ACKNOWLEDGEMENT, 0, 0, buf.freeze())
            }
            RtmpMessage::WindowAckSize(size) => {
                buf.put_u32(*size);
                (CSID_PROTOCOL_CONTROL, MSG_WINDOW_ACK_SIZE, 0, 0, buf.freeze())
            }
            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                buf.put_u32(*size);
                buf.put_u8(*limit_type);
                (CSID_PROTOCOL_CONTROL, MSG_SET_PEER_BANDWIDTH, 0, 0, buf.freeze())
            }
            RtmpMessage::UserControl { event, value } => {
                buf.put_u16(*event);
                buf.put_u32(*value);
                (CSID_PROTOCOL_CONTROL, MSG_USER_CONTROL, 0, 0, buf.freeze())
            }
            RtmpMessage::Command(cmd) => (
                CSID_COMMAND,
                MSG_COMMAND_AMF0,
                cmd.stream_id,
                0,
                cmd.encode(),
            ),
            RtmpMessage::Data { stream_id, values } => (
                CSID_DATA,
                MSG_DATA_AMF0,
                *stream_id,
                0,
                amf0::encode_all(values),
            ),
            RtmpMessage::Audio {
                stream_id,
                timestamp,
                data,
            } => (CSID_AUDIO, MSG_AUDIO, *stream_id, *timestamp, data.clone()),
            RtmpMessage::Video {
                stream_id,
                timestamp,
                data,
            } => (CSID_VIDEO, MSG_VIDEO, *stream_id, *timestamp, data.clone()),
            RtmpMessage::Unknown { type_id } => (CSID_COMMAND, *type_id, 0, 0, Bytes::new()),
        };

        RawMessage {
            csid,
            type_id,
            stream_id,
            timestamp,
            payload,
        }
    }
}

fn read_u32(p: &mut Bytes) -> Result<u32> {
    if p.remaining() < 4 {
        return Err(truncated("control message"));
    }
    Ok(p.get_u32())
}

fn truncated(what: &str) -> crate::error::Error {
    ProtocolError::UnexpectedMessage(format!("truncated {}", what)).into()
}

/// AMF0 command: name, transaction ID, command object, arguments
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub transaction_id: f64,
    pub command_object: AmfValue,
    pub arguments: Vec<AmfValue>,
    /// Message stream the command travels on
    pub stream_id: u32,
}

impl Command {
    pub fn new(name: impl Into<String>, transaction_id: f64) -> Self {
        Self {
            name: name.into(),
            transaction_id,
            command_object: AmfValue::Null,
            arguments: Vec::new(),
            stream_id: 0,
        }
    }

    pub fn with_object(mut self, object: AmfValue) -> Self {
        self.command_object = object;
        self
    }

    pub fn arg(mut self, value: impl Into<AmfValue>) -> Self {
        self.arguments.push(value.into());
        self
    }

    pub fn on_stream(mut self, stream_id: u32) -> Self {
        self.stream_id = stream_id;
        self
    }

    fn from_values(values: Vec<AmfValue>, stream_id: u32) -> Result<Self> {
        let mut iter = values.into_iter();
        let name = match iter.next() {
            Some(AmfValue::String(name)) => name,
            other => {
                return Err(ProtocolError::UnexpectedMessage(format!(
                    "command without name: {:?}",
                    other
                ))
                .into())
            }
        };
        let transaction_id = iter.next().and_then(|v| v.as_number()).unwrap_or(0.0);
        let command_object = iter.next().unwrap_or(AmfValue::Null);
        Ok(Self {
            name,
            transaction_id,
            command_object,
            arguments: iter.collect(),
            stream_id,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut enc = amf0::Amf0Encoder::new();
        enc.encode(&AmfValue::String(self.name.clone()));
        enc.encode(&AmfValue::Number(self.transaction_id));
        enc.encode(&self.command_object);
        enc.encode_all(&self.arguments);
        enc.finish()
    }

    /// Info object of an `onStatus`, or of a `_result`/`_error` that carries one
    pub fn status_info(&self) -> Option<StatusInfo> {
        self.arguments
            .iter()
            .chain(std::iter::once(&self.command_object))
            .find_map(StatusInfo::from_amf)
    }
}

/// Level/code/description triple carried by `onStatus` and `_error`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusInfo {
    pub level: String,
    pub code: String,
    pub description: String,
}

impl StatusInfo {
    pub fn new(level: &str, code: &str, description: &str) -> Self {
        Self {
            level: level.to_string(),
            code: code.to_string(),
            description: description.to_string(),
        }
    }

    pub fn from_amf(value: &AmfValue) -> Option<Self> {
        let code = value.get_string("code")?;
        Some(Self {
            level: value.get_string("level").unwrap_or("status").to_string(),
            code: code.to_string(),
            description: value.get_string("description").unwrap_or("").to_string(),
        })
    }

    pub fn is_error(&self) -> bool {
        self.level == "error"
    }

    pub fn to_amf(&self) -> AmfValue {
        AmfValue::object([
            ("level", self.level.as_str()),
            ("code", self.code.as_str()),
            ("description", self.description.as_str()),
        ])
    }
}

/// Parameters of the `connect` command sent by the publisher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub app: String,
    pub tc_url: String,
    pub flash_ver: String,
}

impl ConnectParams {
    pub fn to_amf(&self) -> AmfValue {
        AmfValue::object([
            ("app", AmfValue::from(self.app.as_str())),
            ("type", AmfValue::from("nonprivate")),
            ("flashVer", AmfValue::from(self.flash_ver.as_str())),
            ("tcUrl", AmfValue::from(self.tc_url.as_str())),
        ])
    }

    /// Read back from a received `connect` command object
    pub fn from_amf(value: &AmfValue) -> Option<Self> {
        Some(Self {
            app: value.get_string("app")?.to_string(),
            tc_url: value.get_string("tcUrl").unwrap_or("").to_string(),
            flash_ver: value.get_string("flashVer").unwrap_or("").to_string(),
        })
    }
}
