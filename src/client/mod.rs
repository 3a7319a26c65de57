//! RTMP publishing client
//!
//! Provides the outbound side of a broadcast:
//! - Resolving a configured URL into endpoint and stream key
//! - Publish and encode configuration
//! - The transport the publish session drives

pub mod config;
#[cfg(feature = "rtmp")]
pub mod connector;
pub mod destination;
pub mod transport;

pub use config::{EncodeSettings, PublishConfig};
#[cfg(feature = "rtmp")]
pub use connector::RtmpConnector;
pub use destination::{Destination, RtmpEndpoint, DEFAULT_STREAM_KEY};
#[cfg(feature = "rtmp")]
pub use transport::RtmpTransport;
pub use transport::{DefaultTransport, MediaTransport, NoopTransport};
