//! The session state machine, which takes a peripheral from an address to a decoded series of
//! readings and back to disconnected.
//!
//! The order of operations is fixed: notifications on the data characteristic are enabled before
//! the optional activation command is written, so nothing the peripheral sends in response to the
//! command can be missed.

use crate::decode::{decode, readings_to_csv, DecodeWarning, Reading};
use crate::resolver::{CharacteristicResolver, Requirement, ResolveError};
use crate::sink::{AccumulatorSink, Chunk};
use crate::transport::{Transport, TransportError};
use bluez_async::MacAddress;
use futures::pin_mut;
use std::fmt::{self, Display, Formatter};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep_until, Instant};
use uuid::Uuid;

/// Which kind of fatal error a failed session ended with.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureKind {
    Connect,
    UnsupportedCharacteristic,
    Subscribe,
    ConnectionLost,
}

impl FailureKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect error",
            Self::UnsupportedCharacteristic => "unsupported characteristic",
            Self::Subscribe => "subscribe error",
            Self::ConnectionLost => "connection lost",
        }
    }
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The state of a session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Subscribing,
    Subscribed,
    Activating,
    Streaming,
    Draining,
    Closed,
    Failed(FailureKind),
}

impl SessionState {
    /// Whether the state machine allows moving from this state to `next`.
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Closed, _) | (Failed(_), _) => false,
            (_, Failed(_)) => true,
            (Idle, Connecting)
            | (Connecting, Connected)
            | (Connected, Subscribing)
            | (Subscribing, Subscribed)
            | (Subscribed, Activating)
            | (Subscribed, Streaming)
            | (Activating, Streaming)
            | (Streaming, Draining)
            | (Draining, Closed) => true,
            // An interrupt unwinds through Draining from any suspension point.
            (Connecting, Draining)
            | (Connected, Draining)
            | (Subscribing, Draining)
            | (Subscribed, Draining)
            | (Activating, Draining) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed(_))
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("Idle"),
            Self::Connecting => f.write_str("Connecting"),
            Self::Connected => f.write_str("Connected"),
            Self::Subscribing => f.write_str("Subscribing"),
            Self::Subscribed => f.write_str("Subscribed"),
            Self::Activating => f.write_str("Activating"),
            Self::Streaming => f.write_str("Streaming"),
            Self::Draining => f.write_str("Draining"),
            Self::Closed => f.write_str("Closed"),
            Self::Failed(kind) => write!(f, "Failed ({kind})"),
        }
    }
}

/// The cause of a fatal session error.
#[derive(Debug, Error)]
pub enum FailureReason {
    /// Couldn't connect to the peripheral or discover its services.
    #[error("Error connecting: {0}")]
    Connect(#[source] TransportError),
    /// The data characteristic doesn't exist or doesn't support notifications or indications.
    #[error("Unsupported characteristic: {0}")]
    UnsupportedCharacteristic(#[source] ResolveError),
    /// The peripheral refused to enable notifications.
    #[error("Error subscribing: {0}")]
    Subscribe(#[source] TransportError),
    /// The peripheral dropped the connection.
    #[error("Connection lost.")]
    ConnectionLost,
}

impl FailureReason {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Connect(_) => FailureKind::Connect,
            Self::UnsupportedCharacteristic(_) => FailureKind::UnsupportedCharacteristic,
            Self::Subscribe(_) => FailureKind::Subscribe,
            Self::ConnectionLost => FailureKind::ConnectionLost,
        }
    }
}

/// A fatal session error, along with the state the session was in when it happened.
#[derive(Debug, Error)]
#[error("{phase} failed: {reason}")]
pub struct SessionFailure {
    pub phase: SessionState,
    #[source]
    pub reason: FailureReason,
}

/// A non-fatal error which the session recovered from.
#[derive(Debug, Error)]
pub enum SessionWarning {
    /// The control characteristic couldn't be used, so the activation command wasn't sent.
    #[error("Control characteristic unusable, activation skipped: {0}")]
    ControlCharacteristic(#[source] ResolveError),
    /// Writing the activation command failed.
    #[error("Error writing activation command: {0}")]
    ActivationWrite(#[source] TransportError),
    #[error("Error disabling notifications: {0}")]
    Unsubscribe(#[source] TransportError),
    #[error("Error disconnecting: {0}")]
    Disconnect(#[source] TransportError),
}

/// A command written to a control characteristic to make the peripheral start sending data.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Activation {
    pub characteristic: Uuid,
    pub payload: Vec<u8>,
    /// Whether to use a write request (acknowledged) rather than a write command.
    pub ack_required: bool,
}

/// Everything needed to run a session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionConfig {
    pub address: MacAddress,
    /// The data characteristic to subscribe to.
    pub notify: Uuid,
    pub activation: Option<Activation>,
    /// How long to accumulate notifications for.
    pub timeout: Duration,
}

/// What happened during a session, and the data it collected.
#[derive(Debug)]
pub struct SessionReport {
    /// Every state the session passed through, starting with `Idle`.
    pub transitions: Vec<SessionState>,
    pub warnings: Vec<SessionWarning>,
    /// Every chunk received, in arrival order.
    pub raw_stream: Vec<Chunk>,
    /// The accumulated buffer for the data characteristic.
    pub buffer: Vec<u8>,
    pub readings: Vec<Reading>,
    pub decode_warning: Option<DecodeWarning>,
    /// Whether the session was cut short by an interrupt.
    pub interrupted: bool,
    pub outcome: Result<(), SessionFailure>,
}

impl SessionReport {
    pub fn final_state(&self) -> SessionState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(SessionState::Idle)
    }

    /// Whether the session passed through the given state.
    pub fn reached(&self, state: SessionState) -> bool {
        self.transitions.contains(&state)
    }

    /// The readings as comma-separated values.
    pub fn csv(&self) -> String {
        readings_to_csv(&self.readings)
    }
}

/// Drives a single session against a transport.
pub struct SessionController<'t, T: Transport> {
    transport: &'t T,
    config: SessionConfig,
    state: SessionState,
    transitions: Vec<SessionState>,
    warnings: Vec<SessionWarning>,
    resolver: CharacteristicResolver,
    sink: AccumulatorSink,
    subscription: Option<Uuid>,
    interrupted: bool,
}

/// How the streaming wait ended.
enum WaitOutcome {
    TimedOut,
    Interrupted,
    Lost,
}

impl<'t, T: Transport> SessionController<'t, T> {
    pub fn new(transport: &'t T, config: SessionConfig) -> Self {
        let sink = AccumulatorSink::new(config.notify);
        Self {
            transport,
            config,
            state: SessionState::Idle,
            transitions: vec![SessionState::Idle],
            warnings: vec![],
            resolver: CharacteristicResolver::new(),
            sink,
            subscription: None,
            interrupted: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session to completion.
    ///
    /// If `interrupt` completes before the session does, streaming stops early but notifications
    /// are still disabled and the connection is still closed before this returns. An interrupt
    /// while connecting takes effect once the connection attempt has finished. Whatever data
    /// was received is decoded, even if the session failed.
    pub async fn run(mut self, interrupt: impl Future<Output = ()>) -> SessionReport {
        pin_mut!(interrupt);
        let transport = self.transport;
        let address = self.config.address;

        log::info!("Connecting to {}", address);
        self.transition(SessionState::Connecting);
        // A half-made connection can't be released, so connecting always runs to completion.
        let mut connect = transport.connect(&address);
        let mut interrupted = false;
        let connected = loop {
            tokio::select! {
                result = &mut connect => break result,
                _ = &mut interrupt, if !interrupted => {
                    log::info!("Interrupted, waiting for the connection attempt to finish");
                    interrupted = true;
                }
            }
        };
        let connection = match connected {
            Ok(connection) => connection,
            Err(e) => {
                let failure = self.fail(FailureReason::Connect(e));
                return self.finish(Err(failure));
            }
        };

        let outcome = if interrupted {
            self.interrupt();
            Ok(())
        } else {
            self.drive(&connection, &mut interrupt).await
        };
        self.teardown(&connection).await;
        self.finish(outcome)
    }

    /// Everything between connecting and tearing down.
    async fn drive(
        &mut self,
        connection: &T::Connection,
        interrupt: &mut (impl Future<Output = ()> + Unpin),
    ) -> Result<(), SessionFailure> {
        let transport = self.transport;
        let mut lost = transport.disconnected(connection);

        let services = tokio::select! {
            result = transport.list_services(connection) => result,
            _ = &mut lost => return Err(self.fail(FailureReason::ConnectionLost)),
            _ = &mut *interrupt => {
                self.interrupt();
                return Ok(());
            }
        };
        match services {
            Ok(table) => self.resolver.load(table),
            Err(e) => return Err(self.fail(FailureReason::Connect(e))),
        }
        self.transition(SessionState::Connected);

        self.transition(SessionState::Subscribing);
        let notify = self
            .resolver
            .resolve(self.config.notify, Requirement::Notifiable)
            .map_err(|e| self.fail(FailureReason::UnsupportedCharacteristic(e)))?;
        log::info!(
            "Enabling notifications on {} ({})",
            notify.uuid,
            notify.capabilities
        );
        self.subscription = Some(notify.uuid);
        let subscribed = tokio::select! {
            result = transport.subscribe(connection, notify.uuid, self.sink.sender()) => result,
            _ = &mut lost => return Err(self.fail(FailureReason::ConnectionLost)),
            _ = &mut *interrupt => {
                self.interrupt();
                return Ok(());
            }
        };
        if let Err(e) = subscribed {
            self.subscription = None;
            return Err(self.fail(FailureReason::Subscribe(e)));
        }
        self.transition(SessionState::Subscribed);

        if let Some(activation) = self.config.activation.clone() {
            self.transition(SessionState::Activating);
            match self
                .resolver
                .resolve(activation.characteristic, Requirement::Writable)
            {
                Ok(control) => {
                    log::info!(
                        "Writing activation command {:02X?} to {}",
                        activation.payload,
                        control.uuid
                    );
                    let written = tokio::select! {
                        result = transport.write_characteristic(
                            connection,
                            control.uuid,
                            &activation.payload,
                            activation.ack_required,
                        ) => result,
                        _ = &mut lost => return Err(self.fail(FailureReason::ConnectionLost)),
                        _ = &mut *interrupt => {
                            self.interrupt();
                            return Ok(());
                        }
                    };
                    if let Err(e) = written {
                        self.warn(SessionWarning::ActivationWrite(e));
                    }
                }
                Err(e) => self.warn(SessionWarning::ControlCharacteristic(e)),
            }
        }

        self.transition(SessionState::Streaming);
        log::info!("Streaming for {:?}", self.config.timeout);
        let deadline = Instant::now() + self.config.timeout;
        let outcome = loop {
            tokio::select! {
                Some(_) = self.sink.receive() => {}
                _ = sleep_until(deadline) => break WaitOutcome::TimedOut,
                _ = &mut lost => break WaitOutcome::Lost,
                _ = &mut *interrupt => break WaitOutcome::Interrupted,
            }
        };

        match outcome {
            WaitOutcome::TimedOut => {
                log::info!("Timeout elapsed");
                self.drain();
                Ok(())
            }
            WaitOutcome::Interrupted => {
                self.interrupt();
                Ok(())
            }
            WaitOutcome::Lost => {
                let failure = self.fail(FailureReason::ConnectionLost);
                self.sink.freeze();
                Err(failure)
            }
        }
    }

    /// Best-effort unsubscribe, then release the connection. Runs exactly once for every
    /// connection which was opened.
    async fn teardown(&mut self, connection: &T::Connection) {
        let transport = self.transport;
        if let Some(uuid) = self.subscription.take() {
            log::info!("Disabling notifications on {}", uuid);
            if let Err(e) = transport.unsubscribe(connection, uuid).await {
                self.warn(SessionWarning::Unsubscribe(e));
            }
        }
        if self.state == SessionState::Draining {
            self.transition(SessionState::Closed);
        }

        log::info!("Disconnecting from {}", self.config.address);
        if let Err(e) = transport.disconnect(connection).await {
            self.warn(SessionWarning::Disconnect(e));
        }
        self.resolver.clear();
    }

    fn finish(self, outcome: Result<(), SessionFailure>) -> SessionReport {
        if let Err(failure) = &outcome {
            log::error!("{}", failure);
        }
        let (raw_stream, buffer) = self.sink.into_parts();
        let decoded = decode(&buffer);
        log::info!(
            "Decoded {} readings from {} bytes",
            decoded.readings.len(),
            buffer.len()
        );
        SessionReport {
            transitions: self.transitions,
            warnings: self.warnings,
            raw_stream,
            buffer,
            readings: decoded.readings,
            decode_warning: decoded.warning,
            interrupted: self.interrupted,
            outcome,
        }
    }

    /// Move to Draining and freeze the accumulated buffer.
    fn drain(&mut self) {
        self.transition(SessionState::Draining);
        self.sink.freeze();
    }

    fn interrupt(&mut self) {
        log::info!("Interrupted while {}", self.state);
        self.interrupted = true;
        self.drain();
    }

    fn fail(&mut self, reason: FailureReason) -> SessionFailure {
        let phase = self.state;
        self.transition(SessionState::Failed(reason.kind()));
        SessionFailure { phase, reason }
    }

    fn warn(&mut self, warning: SessionWarning) {
        log::warn!("{}", warning);
        self.warnings.push(warning);
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(&next),
            "Invalid session transition {} -> {}",
            self.state,
            next
        );
        log::debug!("Session state {} -> {}", self.state, next);
        self.state = next;
        self.transitions.push(next);
    }
}
