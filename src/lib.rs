//! screencast-rtmp: republish a screen broadcast over RTMP
//!
//! This library provides the pipeline behind a screen-broadcast worker:
//! - A config bridge shared between the companion app and the worker
//! - Destination resolution (`rtmp://host/app/key` into endpoint and key)
//! - Sample unit classification with per-kind counters
//! - A publish session task that owns the RTMP connection
//! - A lifecycle controller driven by the OS broadcast callbacks
//!
//! # Example: Broadcast worker
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use bytes::Bytes;
//! use screencast_rtmp::{ConfigBridge, JsonFileStore, LifecycleController, PublishConfig, SampleUnit};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bridge = ConfigBridge::new(Arc::new(JsonFileStore::new("/tmp/screencast")));
//!     let mut controller = LifecycleController::with_default_transport(bridge, PublishConfig::default())?;
//!
//!     controller.started(&HashMap::new());
//!     controller.deliver(SampleUnit::video_frame(Duration::ZERO, Bytes::new(), true));
//!     controller.finished().await;
//!     Ok(())
//! }
//! ```

pub mod amf;
pub mod bridge;
pub mod client;
pub mod error;
pub mod lifecycle;
pub mod media;
pub mod protocol;
pub mod session;
pub mod stats;

// Re-export main types for convenience
pub use bridge::{ConfigBridge, JsonFileStore, MemoryStore, SharedStore};
pub use client::config::{EncodeSettings, PublishConfig};
pub use client::destination::{resolve, Destination};
pub use client::transport::{DefaultTransport, MediaTransport, NoopTransport};
pub use error::{Error, Result};
pub use lifecycle::LifecycleController;
pub use session::{
    BufferClassifier, ConnectionEvent, Delivery, FailureReason, PublishState, SampleKind,
    SampleSink, SampleUnit,
};
pub use stats::CounterSnapshot;
