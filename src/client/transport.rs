//! Media transports driven by the publish session
//!
//! The session task owns exactly one transport and calls it in order:
//! `connect`, `publish`, any number of `send`, then `close_stream` and
//! `close_connection`. Failures after `connect` returns are reported through
//! the [`ConnectionEvent`] sender handed to `connect`.

use std::future::Future;

use tokio::sync::mpsc;

use crate::client::config::{EncodeSettings, PublishConfig};
use crate::error::Result;
use crate::session::classifier::EncoderInput;
use crate::session::event::ConnectionEvent;
use crate::session::sample::SampleUnit;
use crate::stats::TransportStats;

#[cfg(feature = "rtmp")]
use crate::client::connector::RtmpConnector;
#[cfg(feature = "rtmp")]
use crate::error::ProtocolError;

/// Outbound media connection
pub trait MediaTransport: Send + 'static {
    /// Open the connection to `endpoint`
    fn connect(
        &mut self,
        endpoint: &str,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Ask the server to accept `stream_key` and announce the encode parameters
    fn publish(
        &mut self,
        stream_key: &str,
        settings: &EncodeSettings,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Append one unit to the stream
    fn send(
        &mut self,
        input: EncoderInput,
        unit: SampleUnit,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Stop publishing; the connection stays open
    fn close_stream(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Release the connection. Never fails.
    fn close_connection(&mut self) -> impl Future<Output = ()> + Send;
}

/// RTMP publisher over TCP
#[cfg(feature = "rtmp")]
#[derive(Debug)]
pub struct RtmpTransport {
    config: PublishConfig,
    events: Option<mpsc::Sender<ConnectionEvent>>,
    connector: Option<RtmpConnector>,
}

#[cfg(feature = "rtmp")]
impl RtmpTransport {
    pub fn new(config: PublishConfig) -> Self {
        Self {
            config,
            events: None,
            connector: None,
        }
    }

    /// Statistics of the live connection
    pub fn stats(&self) -> Option<&TransportStats> {
        self.connector.as_ref().map(|c| c.stats())
    }

    fn connector(&mut self) -> Result<&mut RtmpConnector> {
        self.connector
            .as_mut()
            .ok_or_else(|| ProtocolError::NotConnected.into())
    }
}

#[cfg(feature = "rtmp")]
impl MediaTransport for RtmpTransport {
    async fn connect(
        &mut self,
        endpoint: &str,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Result<()> {
        let connector = RtmpConnector::connect(endpoint, &self.config).await?;
        self.connector = Some(connector);
        self.events = Some(events);
        Ok(())
    }

    async fn publish(&mut self, stream_key: &str, settings: &EncodeSettings) -> Result<()> {
        let events = self.events.clone();
        let connector = self.connector()?;
        connector.publish(stream_key, settings).await?;
        if let Some(events) = events {
            connector.spawn_monitor(events)?;
        }
        Ok(())
    }

    async fn send(&mut self, input: EncoderInput, unit: SampleUnit) -> Result<()> {
        self.connector()?.send_unit(input, unit).await
    }

    async fn close_stream(&mut self) -> Result<()> {
        match self.connector.as_mut() {
            Some(connector) => connector.close_stream().await,
            None => Ok(()),
        }
    }

    async fn close_connection(&mut self) {
        if let Some(connector) = self.connector.take() {
            connector.close().await;
        }
        self.events = None;
    }
}

/// Accepts everything and sends nothing.
///
/// Used when the crate is built without the `rtmp` feature.
#[derive(Debug)]
pub struct NoopTransport {
    config: PublishConfig,
    stats: TransportStats,
}

impl NoopTransport {
    pub fn new(config: PublishConfig) -> Self {
        Self {
            config,
            stats: TransportStats::new(),
        }
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }
}

impl MediaTransport for NoopTransport {
    async fn connect(
        &mut self,
        endpoint: &str,
        _events: mpsc::Sender<ConnectionEvent>,
    ) -> Result<()> {
        tracing::warn!(endpoint = %endpoint, "No RTMP transport built in, media will be discarded");
        Ok(())
    }

    async fn publish(&mut self, stream_key: &str, settings: &EncodeSettings) -> Result<()> {
        tracing::debug!(
            stream_key = %stream_key,
            width = settings.width,
            height = settings.height,
            chunk_size = self.config.chunk_size,
            "Publish accepted without transport"
        );
        Ok(())
    }

    async fn send(&mut self, input: EncoderInput, unit: SampleUnit) -> Result<()> {
        self.stats.bytes_sent += unit.payload.len() as u64;
        match input {
            EncoderInput::Video => self.stats.video_frames += 1,
            EncoderInput::Audio => self.stats.audio_frames += 1,
        }
        Ok(())
    }

    async fn close_stream(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close_connection(&mut self) {
        tracing::debug!(
            video_frames = self.stats.video_frames,
            audio_frames = self.stats.audio_frames,
            "Discarded media"
        );
    }
}

/// Transport used by [`LifecycleController::with_default_transport`](crate::lifecycle::LifecycleController::with_default_transport)
#[cfg(feature = "rtmp")]
pub type DefaultTransport = RtmpTransport;

/// Transport used by [`LifecycleController::with_default_transport`](crate::lifecycle::LifecycleController::with_default_transport)
#[cfg(not(feature = "rtmp"))]
pub type DefaultTransport = NoopTransport;


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::session::sample::SampleKind;

    #[test]
    fn test_noop_transport_discards_and_counts() {
        let mut transport = NoopTransport::new(PublishConfig::default());
        let (events, _rx) = mpsc::channel(1);

        tokio_test::block_on(async {
            assert_ok!(transport.connect("rtmp://host/app", events).await);
            assert_ok!(transport.publish("key", &EncodeSettings::default()).await);
            assert_ok!(
                transport
                    .send(
                        EncoderInput::Video,
                        SampleUnit::video_frame(Duration::ZERO, Bytes::from_static(&[1, 2, 3]), true),
                    )
                    .await
            );
            assert_ok!(
                transport
                    .send(
                        EncoderInput::Audio,
                        SampleUnit::audio_frame(SampleKind::DeviceAudio, Duration::ZERO, Bytes::from_static(&[4])),
                    )
                    .await
            );
            assert_ok!(transport.close_stream().await);
            transport.close_connection().await;
        });

        assert_eq!(transport.stats().video_frames, 1);
        assert_eq!(transport.stats().audio_frames, 1);
        assert_eq!(transport.stats().bytes_sent, 4);
    }

    #[cfg(feature = "rtmp")]
    #[test]
    fn test_rtmp_transport_requires_connect() {
        let mut transport = RtmpTransport::new(PublishConfig::default());

        tokio_test::block_on(async {
            assert_err!(transport.publish("key", &EncodeSettings::default()).await);
            assert_err!(
                transport
                    .send(EncoderInput::Video, SampleUnit::video_config(Bytes::from_static(&[1])))
                    .await
            );
            // Nothing to close yet
            assert_ok!(transport.close_stream().await);
            transport.close_connection().await;
        });
        assert!(transport.stats().is_none());
    }
}
