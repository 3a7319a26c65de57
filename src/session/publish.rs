//! Publish session task
//!
//! A session is a tokio task that exclusively owns one [`MediaTransport`] and
//! the session's [`PublishState`]. It multiplexes three inputs, in priority
//! order:
//!
//! 1. lifecycle control (pause, resume, finish)
//! 2. connection events raised by the transport
//! 3. media units from the capture path
//!
//! The capture path never talks to the task directly. It goes through a
//! [`SampleSink`], which counts the unit, checks an atomic forwarding gate and
//! `try_send`s into a bounded queue. When the queue is full the newest unit
//! is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::client::config::PublishConfig;
use crate::client::destination::Destination;
use crate::client::transport::MediaTransport;
use crate::error::{Error, ProtocolError};
use crate::stats::{CounterSnapshot, SessionCounters};

use super::classifier::{BufferClassifier, EncoderInput};
use super::event::ConnectionEvent;
use super::sample::SampleUnit;
use super::state::{FailureReason, PublishState};

/// Capacity of the connection event channel
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Lifecycle signal for the session task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Pause,
    Resume,
    Finish,
}

/// Why a unit was not queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No broadcast is running
    NoSession,
    /// Session is connecting, paused or closed
    NotPublishing,
    /// Media queue is full
    QueueFull,
    /// Session task has exited
    SessionClosed,
}

/// Outcome of handing a unit to a [`SampleSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    Dropped(DropReason),
}

impl Delivery {
    pub fn is_queued(&self) -> bool {
        matches!(self, Delivery::Queued)
    }
}

type MediaItem = (EncoderInput, SampleUnit);

/// Forwarding gate shared by the capture path and the session task
#[derive(Debug)]
struct Gate {
    /// Session is publishing
    open: AtomicBool,
    /// Stream not negotiated yet, decoder configs may queue ahead of it
    connecting: AtomicBool,
}

impl Gate {
    fn new() -> Self {
        Self {
            open: AtomicBool::new(false),
            connecting: AtomicBool::new(true),
        }
    }

    fn admits(&self, unit: &SampleUnit) -> bool {
        self.open.load(Ordering::Acquire)
            || (unit.is_config() && self.connecting.load(Ordering::Acquire))
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
        self.connecting.store(false, Ordering::Release);
    }
}

/// Capture-side entry point of a session.
///
/// `deliver` never blocks and never awaits, so it can be called from the
/// capture callback thread. Clones feed the same session.
#[derive(Debug, Clone)]
pub struct SampleSink {
    classifier: BufferClassifier,
    media_tx: mpsc::Sender<MediaItem>,
    gate: Arc<Gate>,
}

impl SampleSink {
    pub fn deliver(&self, unit: SampleUnit) -> Delivery {
        let classified = self.classifier.classify(unit.kind);
        let counters = self.classifier.counters();

        if !self.gate.admits(&unit) {
            counters.record_dropped();
            return Delivery::Dropped(DropReason::NotPublishing);
        }

        match self.media_tx.try_send((classified.input, unit)) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                counters.record_dropped();
                tracing::trace!("Media queue full, dropping unit");
                Delivery::Dropped(DropReason::QueueFull)
            }
            Err(TrySendError::Closed(_)) => {
                counters.record_dropped();
                Delivery::Dropped(DropReason::SessionClosed)
            }
        }
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.classifier.counters().snapshot()
    }
}

/// Handle to a running session.
///
/// Dropping the handle asks the session to finish.
#[derive(Debug)]
pub struct SessionHandle {
    control_tx: mpsc::UnboundedSender<Control>,
    state_rx: watch::Receiver<PublishState>,
    sink: SampleSink,
    task: Option<JoinHandle<PublishState>>,
}

impl SessionHandle {
    /// Stop forwarding media, keep the stream open
    pub fn pause(&self) {
        // Close the gate now so units delivered after this call are never sent
        self.sink.gate.close();
        self.control(Control::Pause);
    }

    pub fn resume(&self) {
        self.control(Control::Resume);
    }

    pub fn state(&self) -> PublishState {
        self.state_rx.borrow().clone()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<PublishState> {
        self.state_rx.clone()
    }

    pub fn sink(&self) -> SampleSink {
        self.sink.clone()
    }

    pub fn deliver(&self, unit: SampleUnit) -> Delivery {
        self.sink.deliver(unit)
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.sink.counters()
    }

    /// Wait until the state satisfies `pred`, returning that state.
    ///
    /// Returns the final state if the session ends without satisfying it.
    pub async fn wait_for(&self, pred: impl FnMut(&PublishState) -> bool) -> PublishState {
        let mut rx = self.state_rx.clone();
        let result = rx.wait_for(pred).await.map(|state| state.clone());
        result.unwrap_or_else(|_| rx.borrow().clone())
    }

    /// Tear the session down and wait for the task to exit.
    ///
    /// Returns the final state, or `None` if already finished.
    pub async fn finish(&mut self) -> Option<PublishState> {
        let task = self.task.take()?;
        self.control(Control::Finish);

        match task.await {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::error!(error = %e, "Session task failed");
                Some(self.state())
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_none()
    }

    fn control(&self, control: Control) {
        if self.control_tx.send(control).is_err() {
            tracing::debug!(control = ?control, "Session already exited");
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.control_tx.send(Control::Finish);
        }
    }
}

/// Start a session publishing to `destination` on `runtime`
pub fn spawn<T: MediaTransport>(
    transport: T,
    destination: Destination,
    config: PublishConfig,
    runtime: &Handle,
) -> SessionHandle {
    let counters = Arc::new(SessionCounters::new());
    let classifier = BufferClassifier::with_counters(counters.clone(), config.log_interval);
    let gate = Arc::new(Gate::new());

    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (media_tx, media_rx) = mpsc::channel(config.media_queue_capacity.max(1));
    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (state_tx, state_rx) = watch::channel(PublishState::Idle);

    let session = PublishSession {
        transport,
        destination,
        config,
        state: SessionState {
            tx: state_tx,
            gate: gate.clone(),
        },
        counters,
        control_rx,
        media_rx,
        events_tx: Some(events_tx),
        events_rx,
        connect_attempted: false,
        stream_open: false,
        torn_down: false,
    };
    let task = runtime.spawn(session.run());

    SessionHandle {
        control_tx,
        state_rx,
        sink: SampleSink {
            classifier,
            media_tx,
            gate,
        },
        task: Some(task),
    }
}

enum Negotiation {
    Ready { paused: bool },
    Abandoned,
    Failed(FailureReason),
}

/// How a dequeued unit was handled
enum Forwarded {
    Sent,
    Dropped,
    /// Finish arrived while the send was in flight
    Finished,
}

/// Published state plus the gate derived from it
struct SessionState {
    tx: watch::Sender<PublishState>,
    gate: Arc<Gate>,
}

impl SessionState {
    fn current(&self) -> PublishState {
        self.tx.borrow().clone()
    }

    fn set(&self, state: PublishState) {
        match &state {
            PublishState::Failed(reason) => {
                tracing::warn!(state = state.name(), reason = %reason, "Session state")
            }
            _ => tracing::info!(state = state.name(), "Session state"),
        }

        let publishing = state.is_publishing();
        if !publishing {
            self.gate.open.store(false, Ordering::Release);
        }
        if state != PublishState::Connecting {
            self.gate.connecting.store(false, Ordering::Release);
        }
        self.tx.send_replace(state);
        if publishing {
            self.gate.open.store(true, Ordering::Release);
        }
    }

    /// Apply a lifecycle signal. Returns `false` once the session must finish.
    fn apply(&self, control: Option<Control>) -> bool {
        let current = self.current();
        match control {
            Some(Control::Pause) if current == PublishState::Publishing => {
                self.set(PublishState::Paused)
            }
            Some(Control::Resume) if current == PublishState::Paused => {
                self.set(PublishState::Publishing)
            }
            Some(Control::Pause | Control::Resume) => {
                tracing::debug!(state = %current, control = ?control, "Control ignored")
            }
            Some(Control::Finish) | None => return false,
        }
        true
    }
}

struct PublishSession<T> {
    transport: T,
    destination: Destination,
    config: PublishConfig,
    state: SessionState,
    counters: Arc<SessionCounters>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    media_rx: mpsc::Receiver<MediaItem>,
    /// Handed to the transport on connect
    events_tx: Option<mpsc::Sender<ConnectionEvent>>,
    events_rx: mpsc::Receiver<ConnectionEvent>,
    connect_attempted: bool,
    stream_open: bool,
    torn_down: bool,
}

impl<T: MediaTransport> PublishSession<T> {
    async fn run(mut self) -> PublishState {
        if !self.destination.is_connectable() {
            tracing::warn!(url = %self.destination.raw_url, "No usable destination");
            self.torn_down = true;
            self.state.set(PublishState::Failed(FailureReason::NoDestination));
            return self.state.current();
        }

        tracing::info!(
            endpoint = %self.destination.connect_endpoint,
            stream_key = %self.destination.stream_key,
            "Starting publish session"
        );
        self.state.set(PublishState::Connecting);

        match self.negotiate().await {
            Negotiation::Ready { paused } => {
                self.stream_open = true;
                if paused {
                    self.state.set(PublishState::Paused);
                } else {
                    self.state.set(PublishState::Publishing);
                }
            }
            Negotiation::Abandoned => {
                tracing::info!("Finished while connecting");
                self.teardown().await;
                return self.state.current();
            }
            Negotiation::Failed(reason) => {
                self.fail(reason).await;
                return self.state.current();
            }
        }

        self.publish_loop().await;
        self.state.current()
    }

    /// Connect and publish, while still honoring control and events
    async fn negotiate(&mut self) -> Negotiation {
        let Some(events_tx) = self.events_tx.take() else {
            return Negotiation::Failed(FailureReason::ConnectFailure("already connected".into()));
        };
        let endpoint = self.destination.connect_endpoint.clone();
        let stream_key = self.destination.stream_key.clone();
        let settings = self.config.encode.clone();
        self.connect_attempted = true;

        let transport = &mut self.transport;
        let negotiation = async move {
            transport
                .connect(&endpoint, events_tx)
                .await
                .map_err(|e| FailureReason::ConnectFailure(e.to_string()))?;
            transport
                .publish(&stream_key, &settings)
                .await
                .map_err(|e| match e {
                    Error::Protocol(ProtocolError::PublishRejected { code, description }) => {
                        FailureReason::PublishRejected(format!("{}: {}", code, description))
                    }
                    other => FailureReason::ConnectFailure(other.to_string()),
                })
        };
        tokio::pin!(negotiation);

        let mut pause_pending = false;
        loop {
            tokio::select! {
                biased;

                control = self.control_rx.recv() => match control {
                    Some(Control::Pause) => pause_pending = true,
                    Some(Control::Resume) => pause_pending = false,
                    Some(Control::Finish) | None => return Negotiation::Abandoned,
                },

                Some(event) = self.events_rx.recv() => {
                    if let Some(reason) = event.failure() {
                        return Negotiation::Failed(reason);
                    }
                    tracing::info!(event = %event, "Connection status");
                }

                result = &mut negotiation => {
                    return match result {
                        Ok(()) => Negotiation::Ready { paused: pause_pending },
                        Err(reason) => Negotiation::Failed(reason),
                    };
                }
            }
        }
    }

    async fn publish_loop(&mut self) {
        loop {
            tokio::select! {
                biased;

                control = self.control_rx.recv() => {
                    if !self.state.apply(control) {
                        self.teardown().await;
                        return;
                    }
                }

                Some(event) = self.events_rx.recv() => {
                    if let Some(reason) = event.failure() {
                        self.fail(reason).await;
                        return;
                    }
                    tracing::info!(event = %event, "Connection status");
                }

                Some((input, unit)) = self.media_rx.recv() => {
                    match self.forward(input, unit).await {
                        Ok(Forwarded::Sent | Forwarded::Dropped) => {}
                        Ok(Forwarded::Finished) => {
                            self.teardown().await;
                            return;
                        }
                        Err(reason) => {
                            self.fail(reason).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Send one dequeued unit, or drop it if no longer publishing.
    ///
    /// Control stays live while the write is pending, so a peer that stopped
    /// reading cannot hold up `Finish`.
    async fn forward(
        &mut self,
        input: EncoderInput,
        unit: SampleUnit,
    ) -> Result<Forwarded, FailureReason> {
        if !self.state.current().is_publishing() {
            self.counters.record_dropped();
            return Ok(Forwarded::Dropped);
        }

        let send = self.transport.send(input, unit);
        tokio::pin!(send);
        loop {
            tokio::select! {
                biased;

                control = self.control_rx.recv() => {
                    if !self.state.apply(control) {
                        tracing::debug!("Finish abandoned a pending send");
                        return Ok(Forwarded::Finished);
                    }
                }

                result = &mut send => {
                    result.map_err(|e| FailureReason::Transport(e.to_string()))?;
                    self.counters.record_forwarded();
                    return Ok(Forwarded::Sent);
                }
            }
        }
    }

    async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.state.set(PublishState::Closing);
        self.release().await;
        self.state.set(PublishState::Closed);
    }

    async fn fail(&mut self, reason: FailureReason) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.state.set(PublishState::Failed(reason));
        self.release().await;
    }

    /// Close the stream, then the connection
    async fn release(&mut self) {
        if self.stream_open {
            self.stream_open = false;
            match timeout(self.config.close_timeout, self.transport.close_stream()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Stream close failed"),
                Err(_) => tracing::warn!(
                    timeout_ms = self.config.close_timeout.as_millis() as u64,
                    "Stream close timed out"
                ),
            }
        }

        if self.connect_attempted {
            self.connect_attempted = false;
            self.transport.close_connection().await;
        }

        tracing::info!(counters = %self.counters.snapshot(), "Session released");
    }
}
