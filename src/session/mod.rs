//! Command session: arming, discrete commands and the movement broadcast
//!
//! A session owns the connected command endpoint and runs three tasks:
//!
//! - **responses**: a receive loop that turns the drone's `ok` into the
//!   `Arming -> Armed` transition and logs everything else
//! - **arming**: resends `command` on a fixed interval until acknowledged,
//!   then issues `streamon` once after a short delay
//! - **queue**: the single writer of the command socket; it sends discrete
//!   commands in submission order and drives the movement broadcast ticks, so
//!   no two commands are ever sent concurrently
//!
//! State moves `Disarmed -> Arming -> Armed` and only returns to `Disarmed`
//! when the session is torn down. A lost acknowledgement is never treated as
//! a disconnection.

use bytes::Bytes;
use futures::Stream;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::CommandConfig;
use crate::driver::{DatagramHandler, Driver, Flow};
use crate::transport::DatagramTransport;
use crate::types::{Command, FlipDirection, MovementVector, Response};
use crate::{DroneError, Result};

mod broadcast;

pub use broadcast::{BroadcastMode, MovementBroadcaster, TickAction};

/// Arming state of a command session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session, or the session was torn down.
    Disarmed,
    /// `command` sent, waiting for `ok`.
    Arming,
    /// The drone accepts motion commands.
    Armed,
}

/// Handle to a running command session.
///
/// Dropping the handle tears the session down.
pub struct CommandSession {
    queue: mpsc::UnboundedSender<Command>,
    movement: watch::Sender<MovementVector>,
    state: watch::Receiver<SessionState>,
    streaming: watch::Receiver<bool>,
    last_sent: watch::Receiver<Option<Instant>>,
    rearm: Arc<Notify>,
    cancel: CancellationToken,
}

impl CommandSession {
    /// Start a session on an endpoint connected to the drone's command port.
    ///
    /// Must be called from within a tokio runtime. Arming starts immediately.
    pub fn start(
        transport: Arc<dyn DatagramTransport>,
        config: CommandConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (movement_tx, movement_rx) = watch::channel(MovementVector::ZERO);
        let (state_tx, state_rx) = watch::channel(SessionState::Disarmed);
        let (streaming_tx, streaming_rx) = watch::channel(false);
        let (last_sent_tx, last_sent_rx) = watch::channel(None);
        let state_tx = Arc::new(state_tx);
        let rearm = Arc::new(Notify::new());

        Driver::spawn(
            "command-responses",
            Arc::clone(&transport),
            ResponseHandler { state: Arc::clone(&state_tx) },
            cancel.child_token(),
        );

        let queue = CommandQueue {
            transport,
            commands: queue_rx,
            movement: movement_rx,
            state: state_rx.clone(),
            streaming: streaming_tx,
            last_sent: last_sent_tx,
            broadcaster: MovementBroadcaster::new(config.idle_after_ticks, config.duplicate_sends),
            config: config.clone(),
        };
        tokio::spawn(queue.run(cancel.clone()));

        let arming = Arming {
            queue: queue_tx.clone(),
            state: state_tx,
            rearm: Arc::clone(&rearm),
            config,
        };
        tokio::spawn(arming.run(cancel.clone()));

        Self {
            queue: queue_tx,
            movement: movement_tx,
            state: state_rx,
            streaming: streaming_rx,
            last_sent: last_sent_rx,
            rearm,
            cancel,
        }
    }

    /// Queue a command for sending.
    pub fn send(&self, command: Command) -> Result<()> {
        self.queue.send(command).map_err(|_| DroneError::Cancelled)
    }

    pub fn takeoff(&self) -> Result<()> {
        self.send(Command::Takeoff)
    }

    /// May be ignored by the drone during the first seconds of flight.
    pub fn land(&self) -> Result<()> {
        self.send(Command::Land)
    }

    pub fn hover(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    /// Cut the motors immediately.
    pub fn emergency(&self) -> Result<()> {
        self.send(Command::Emergency)
    }

    pub fn flip(&self, direction: FlipDirection) -> Result<()> {
        self.send(Command::Flip(direction))
    }

    pub fn stream_on(&self) -> Result<()> {
        self.send(Command::StreamOn)
    }

    pub fn stream_off(&self) -> Result<()> {
        self.send(Command::StreamOff)
    }

    /// Update the movement intent. Axes are clamped to the drone's range.
    pub fn set_movement(&self, vector: MovementVector) {
        let vector = vector.clamped();
        self.movement.send_if_modified(|current| {
            if *current == vector {
                false
            } else {
                *current = vector;
                true
            }
        });
    }

    /// Current movement intent.
    pub fn movement(&self) -> MovementVector {
        *self.movement.borrow()
    }

    /// Resend `command` now. Arming retries restart immediately when not yet
    /// armed; an armed session stays armed.
    pub fn rearm(&self) {
        self.rearm.notify_one();
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_armed(&self) -> bool {
        self.state() == SessionState::Armed
    }

    pub fn is_streaming(&self) -> bool {
        *self.streaming.borrow()
    }

    /// When the last datagram went out on the command socket.
    pub fn last_sent_at(&self) -> Option<Instant> {
        *self.last_sent.borrow()
    }

    /// Stream of state changes, starting with the current state.
    pub fn state_updates(&self) -> impl Stream<Item = SessionState> + 'static {
        WatchStream::new(self.state.clone())
    }

    /// Stream of streaming-flag changes, starting with the current value.
    pub fn streaming_updates(&self) -> impl Stream<Item = bool> + 'static {
        WatchStream::new(self.streaming.clone())
    }

    /// Wait until the drone acknowledges arming.
    pub async fn wait_armed(&self, timeout: Duration) -> Result<()> {
        let mut state = self.state.clone();
        tokio::time::timeout(timeout, state.wait_for(|s| *s == SessionState::Armed))
            .await
            .map_err(|_| DroneError::Timeout { duration: timeout })?
            .map_err(|_| DroneError::Cancelled)?;
        Ok(())
    }

    /// Tear the session down and release the command socket.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for CommandSession {
    fn drop(&mut self) {
        debug!("Dropping command session");
        self.cancel.cancel();
    }
}

/// Turns acknowledgements into the armed transition.
struct ResponseHandler {
    state: Arc<watch::Sender<SessionState>>,
}

#[async_trait::async_trait]
impl DatagramHandler for ResponseHandler {
    async fn on_datagram(&mut self, datagram: Bytes) -> Flow {
        match Response::parse(&datagram) {
            Response::Ok => {
                let armed = self.state.send_if_modified(|state| {
                    if *state == SessionState::Arming {
                        *state = SessionState::Armed;
                        true
                    } else {
                        false
                    }
                });
                if armed {
                    info!("Drone acknowledged, session armed");
                } else {
                    debug!("Command acknowledged");
                }
            }
            Response::Error(text) => warn!(response = %text, "Drone rejected command"),
            Response::Other(text) => debug!(response = %text, "Drone response"),
        }
        Flow::Continue
    }
}

/// Retries `command` until acknowledged.
struct Arming {
    queue: mpsc::UnboundedSender<Command>,
    state: Arc<watch::Sender<SessionState>>,
    rearm: Arc<Notify>,
    config: CommandConfig,
}

impl Arming {
    async fn run(self, cancel: CancellationToken) {
        let mut state = self.state.subscribe();
        self.state.send_replace(SessionState::Arming);
        info!(
            interval = ?self.config.arm_retry_interval(),
            "Arming: sending '{}' until acknowledged",
            Command::Enter
        );

        let mut attempts = 0u32;
        let mut stream_requested = false;

        loop {
            let armed = *state.borrow_and_update() == SessionState::Armed;

            if !armed {
                attempts += 1;
                debug!(attempt = attempts, "Sending arm command");
                if self.queue.send(Command::Enter).is_err() {
                    break;
                }
            } else if self.config.auto_stream && !stream_requested {
                stream_requested = true;
                // Give the drone a moment after it starts listening
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.stream_on_delay()) => {}
                }
                if self.queue.send(Command::StreamOn).is_err() {
                    break;
                }
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.arm_retry_interval()), if !armed => {}
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.rearm.notified() => {
                    if armed {
                        // Idempotent: the drone answers `ok` and the state stays Armed
                        debug!("Re-asserting command mode");
                        if self.queue.send(Command::Enter).is_err() {
                            break;
                        }
                    } else {
                        info!("Manual re-arm requested");
                    }
                }
            }
        }

        self.state.send_replace(SessionState::Disarmed);
        info!(attempts, "Arming task ended, session disarmed");
    }
}

/// Serial writer of the command socket.
struct CommandQueue {
    transport: Arc<dyn DatagramTransport>,
    commands: mpsc::UnboundedReceiver<Command>,
    movement: watch::Receiver<MovementVector>,
    state: watch::Receiver<SessionState>,
    streaming: watch::Sender<bool>,
    last_sent: watch::Sender<Option<Instant>>,
    broadcaster: MovementBroadcaster,
    config: CommandConfig,
}

impl CommandQueue {
    async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = self.ticker_for(self.broadcaster.mode(), false);
        let mut sent = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    self.send(command).await;
                    sent += 1;
                }
                changed = self.movement.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let vector = *self.movement.borrow_and_update();
                    if let Some(mode) = self.broadcaster.on_movement(vector) {
                        debug!(?mode, "Movement broadcast upshift");
                        ticker = self.ticker_for(mode, true);
                    }
                }
                _ = ticker.tick() => {
                    if *self.state.borrow() != SessionState::Armed {
                        continue;
                    }
                    let vector = *self.movement.borrow();
                    let action = self.broadcaster.on_tick(vector);
                    if let Some(command) = action.command {
                        for _ in 0..action.copies {
                            self.send(command).await;
                            sent += 1;
                        }
                    }
                    if let Some(mode) = action.switch_to {
                        debug!(?mode, "Movement broadcast cadence change");
                        ticker = self.ticker_for(mode, mode == BroadcastMode::Active);
                    }
                }
            }
        }

        debug!(sent, "Command queue ended");
    }

    fn ticker_for(&self, mode: BroadcastMode, immediate: bool) -> Interval {
        let period = match mode {
            BroadcastMode::Active => self.config.movement_interval(),
            BroadcastMode::Idle => self.config.idle_interval(),
        };
        let start = if immediate { Instant::now() } else { Instant::now() + period };
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    async fn send(&self, command: Command) {
        if command.is_movement() {
            trace!(%command, "Sending movement");
        } else {
            info!(%command, "Sending command");
        }

        match self.transport.send(&command.to_bytes()).await {
            Ok(()) => {
                self.last_sent.send_replace(Some(Instant::now()));
                match command {
                    Command::StreamOn => {
                        self.streaming.send_replace(true);
                    }
                    Command::StreamOff => {
                        self.streaming.send_replace(false);
                    }
                    _ => {}
                }
            }
            Err(e) => warn!(%command, "Command send failed: {}", e),
        }
    }
}
