//! Media payload formats
//!
//! This module provides:
//! - FLV tag types and an in-memory FLV file reader
//! - H.264/AVC video tag bodies
//! - AAC audio tag bodies

pub mod aac;
pub mod flv;
pub mod h264;

pub use aac::{AacPacket, AacPacketType, AudioSpecificConfig};
pub use flv::{FlvReader, FlvTag, FlvTagType};
pub use h264::{AvcConfig, AvcPacket, AvcPacketType, NaluType};
