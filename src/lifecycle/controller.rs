//! Broadcast lifecycle controller

use std::collections::HashMap;

use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::bridge::ConfigBridge;
use crate::client::config::PublishConfig;
use crate::client::destination::Destination;
use crate::client::transport::{DefaultTransport, MediaTransport};
use crate::error::Result;
use crate::session::publish::{self, Delivery, DropReason, SampleSink, SessionHandle};
use crate::session::{PublishState, SampleUnit};
use crate::stats::CounterSnapshot;

type TransportFactory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Maps the OS broadcast callbacks onto a publish session.
///
/// One controller lives for the whole worker process; each `started` /
/// `finished` pair runs one session with a fresh transport from the factory.
pub struct LifecycleController<T> {
    bridge: ConfigBridge,
    config: PublishConfig,
    factory: TransportFactory<T>,
    runtime: Handle,
    session: Option<SessionHandle>,
    destination: Option<Destination>,
    /// State and counters of the last finished session
    last_state: PublishState,
    last_counters: CounterSnapshot,
}

impl<T: MediaTransport> LifecycleController<T> {
    /// Create a controller spawning sessions on the current tokio runtime
    pub fn new(
        bridge: ConfigBridge,
        config: PublishConfig,
        factory: impl Fn() -> T + Send + Sync + 'static,
    ) -> Result<Self> {
        let runtime = Handle::try_current()?;
        Ok(Self::with_handle(bridge, config, factory, runtime))
    }

    /// Create a controller spawning sessions on `runtime`
    pub fn with_handle(
        bridge: ConfigBridge,
        config: PublishConfig,
        factory: impl Fn() -> T + Send + Sync + 'static,
        runtime: Handle,
    ) -> Self {
        Self {
            bridge,
            config,
            factory: Box::new(factory),
            runtime,
            session: None,
            destination: None,
            last_state: PublishState::Idle,
            last_counters: CounterSnapshot::default(),
        }
    }

    /// Broadcast started: read the destination once and start publishing
    pub fn started(&mut self, setup_info: &HashMap<String, String>) {
        if self.session.is_some() {
            tracing::warn!(state = %self.state(), "Broadcast already started, ignoring");
            return;
        }
        tracing::info!(setup_keys = setup_info.len(), "Broadcast started");

        let raw = match self.bridge.read_destination() {
            Ok(Some(url)) => url,
            Ok(None) => {
                tracing::warn!(namespace = %self.bridge.namespace_name(), "No destination configured");
                String::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read destination");
                String::new()
            }
        };

        let destination = Destination::resolve(&raw);
        tracing::debug!(destination = %destination, "Resolved destination");

        let session = publish::spawn(
            (self.factory)(),
            destination.clone(),
            self.config.clone(),
            &self.runtime,
        );
        self.destination = Some(destination);
        self.session = Some(session);
    }

    pub fn paused(&self) {
        match &self.session {
            Some(session) => {
                tracing::info!("Broadcast paused");
                session.pause();
            }
            None => tracing::debug!("Pause without a session"),
        }
    }

    pub fn resumed(&self) {
        match &self.session {
            Some(session) => {
                tracing::info!("Broadcast resumed");
                session.resume();
            }
            None => tracing::debug!("Resume without a session"),
        }
    }

    /// Broadcast finished: tear the session down and wait for it.
    ///
    /// Returns the final state, or `None` when there was nothing to finish.
    pub async fn finished(&mut self) -> Option<PublishState> {
        let Some(mut session) = self.session.take() else {
            tracing::debug!("Finish without a session");
            return None;
        };

        let state = session.finish().await;
        self.last_counters = session.counters();
        if let Some(state) = &state {
            self.last_state = state.clone();
        }
        tracing::info!(
            state = %self.last_state,
            counters = %self.last_counters,
            "Broadcast finished"
        );
        state
    }

    /// Hand one captured unit to the session. Never blocks.
    pub fn deliver(&self, unit: SampleUnit) -> Delivery {
        match &self.session {
            Some(session) => session.deliver(unit),
            None => {
                tracing::trace!(kind = %unit.kind, "Unit without a session");
                Delivery::Dropped(DropReason::NoSession)
            }
        }
    }

    /// Sink for delivering from another thread
    pub fn sample_sink(&self) -> Option<SampleSink> {
        self.session.as_ref().map(SessionHandle::sink)
    }

    pub fn state(&self) -> PublishState {
        match &self.session {
            Some(session) => session.state(),
            None => self.last_state.clone(),
        }
    }

    /// Coarse flag shown by the companion app
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Watch the state of the current session.
    ///
    /// Without a session the receiver holds the last state and never changes.
    pub fn subscribe(&self) -> watch::Receiver<PublishState> {
        match &self.session {
            Some(session) => session.subscribe(),
            None => watch::channel(self.last_state.clone()).1,
        }
    }

    pub fn counters(&self) -> CounterSnapshot {
        match &self.session {
            Some(session) => session.counters(),
            None => self.last_counters,
        }
    }

    /// Destination resolved by the last `started`
    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }

    pub fn bridge(&self) -> &ConfigBridge {
        &self.bridge
    }

    pub fn config(&self) -> &PublishConfig {
        &self.config
    }
}

impl LifecycleController<DefaultTransport> {
    /// Controller publishing through [`DefaultTransport`]
    pub fn with_default_transport(bridge: ConfigBridge, config: PublishConfig) -> Result<Self> {
        let transport_config = config.clone();
        Self::new(bridge, config, move || {
            DefaultTransport::new(transport_config.clone())
        })
    }
}

impl<T> std::fmt::Debug for LifecycleController<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("bridge", &self.bridge)
            .field("destination", &self.destination)
            .field("session", &self.session)
            .field("last_state", &self.last_state)
            .finish_non_exhaustive()
    }
}
