//! # Scan Session Controller
//!
//! Single-writer actor owning the scan session state machine.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Scan Session States                                 │
//! │                                                                         │
//! │                 start(ch, mode)                                         │
//! │   ┌──────┐ ─────────────────────────► ┌───────────────────────┐        │
//! │   │ Idle │                            │ Scanning(mode, ch)    │──┐     │
//! │   └──────┘ ◄──────────┐               └───────────┬───────────┘  │     │
//! │       ▲               │                           │              │     │
//! │       │        release() done       stop() / single-shot done /  │     │
//! │       │               │             fault / start() again        │     │
//! │       │           ┌──────────┐                    │              │     │
//! │       └───────────│ Stopping │◄───────────────────┘              │     │
//! │                   └──────────┘                                   │     │
//! │                                                   hardware event │     │
//! │                                            (current generation) ─┘     │
//! │                                                                         │
//! │  GENERATIONS                                                           │
//! │  ───────────                                                           │
//! │  Every stop bumps the generation BEFORE the hardware is released.      │
//! │  Callbacks still in flight carry the old generation and are dropped,   │
//! │  so a consumer never sees an event from a session that has ended.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Commands are polled ahead of hardware events, so a `stop()` issued while
//! the reader is flooding the queue takes effect immediately.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use depot_core::{
    KeyOutcome, KeystrokeFramer, RoundOutcome, ScanChannel, ScanEvent, ScanMode, TagDeduplicator,
    DEFAULT_FRAME_TIMEOUT_MS,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use crate::device::{HardwareEvent, HardwareSink, ScanDevice};
use crate::error::{ScanError, ScanResult};
use crate::signal::{ScanSignal, ScanStream, StopReason};

// =============================================================================
// Constants
// =============================================================================

/// Default broadcast capacity of the unified scan stream.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Default capacity of the hardware ingress queue.
pub const DEFAULT_HARDWARE_QUEUE: usize = 1024;

const COMMAND_BUFFER: usize = 32;

// =============================================================================
// Configuration
// =============================================================================

/// Scan controller configuration.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Maximum gap between keystrokes of one barcode.
    pub frame_timeout: Duration,
    /// Broadcast capacity of the scan stream.
    pub event_buffer: usize,
    /// Capacity of the hardware callback queue.
    pub hardware_queue: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            frame_timeout: Duration::from_millis(DEFAULT_FRAME_TIMEOUT_MS),
            event_buffer: DEFAULT_EVENT_BUFFER,
            hardware_queue: DEFAULT_HARDWARE_QUEUE,
        }
    }
}

// =============================================================================
// Scan State
// =============================================================================

/// Observable controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// No session.
    Idle,
    /// A session is reading.
    Scanning {
        generation: u64,
        channel: ScanChannel,
        mode: ScanMode,
    },
    /// A session is releasing its hardware.
    Stopping { generation: u64, channel: ScanChannel },
}

impl ScanState {
    /// Returns true while a session is reading.
    pub fn is_scanning(&self) -> bool {
        matches!(self, ScanState::Scanning { .. })
    }
}

impl std::fmt::Display for ScanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanState::Idle => write!(f, "idle"),
            ScanState::Scanning { channel, mode, .. } => write!(f, "scanning ({channel}, {mode})"),
            ScanState::Stopping { channel, .. } => write!(f, "stopping ({channel})"),
        }
    }
}

// =============================================================================
// Commands
// =============================================================================

#[derive(Debug)]
enum ScanCommand {
    Start {
        channel: ScanChannel,
        mode: ScanMode,
        reply: oneshot::Sender<ScanResult<u64>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Clear,
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

// =============================================================================
// Scan Handle
// =============================================================================

/// Cloneable handle to a running scan controller.
#[derive(Clone)]
pub struct ScanHandle {
    cmd_tx: mpsc::Sender<ScanCommand>,
    state_rx: watch::Receiver<ScanState>,
    signals: Arc<broadcast::Receiver<ScanSignal>>,
}

impl ScanHandle {
    /// Starts a session on `channel`, stopping any running session first.
    ///
    /// Returns the generation of the new session.
    pub async fn start(&self, channel: ScanChannel, mode: ScanMode) -> ScanResult<u64> {
        let (reply, rx) = oneshot::channel();
        self.send(ScanCommand::Start {
            channel,
            mode,
            reply,
        })
        .await?;
        rx.await.map_err(|_| ScanError::ShutDown)?
    }

    /// Stops the running session. Idempotent.
    ///
    /// Returns once the hardware has been released.
    pub async fn stop(&self) -> ScanResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(ScanCommand::Stop { reply }).await?;
        rx.await.map_err(|_| ScanError::ShutDown)
    }

    /// Publishes a `ClearRequested` signal without touching the session.
    pub async fn clear(&self) -> ScanResult<()> {
        self.send(ScanCommand::Clear).await
    }

    /// Stops any session, releases hardware and closes the stream.
    ///
    /// Consumers blocked in [`ScanStream::next`] observe end-of-stream.
    /// Calling this on an already disposed controller is a no-op.
    pub async fn dispose(&self) -> ScanResult<()> {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(ScanCommand::Shutdown { reply }).await.is_err() {
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }

    /// Subscribes to the unified scan stream.
    ///
    /// Only signals published after this call are delivered.
    pub fn subscribe(&self) -> ScanStream {
        ScanStream::new(self.signals.resubscribe())
    }

    /// Returns the current state.
    pub fn state(&self) -> ScanState {
        *self.state_rx.borrow()
    }

    /// Subscribes to state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ScanState> {
        self.state_rx.clone()
    }

    /// Returns true while a session is reading.
    pub fn is_scanning(&self) -> bool {
        self.state().is_scanning()
    }

    async fn send(&self, cmd: ScanCommand) -> ScanResult<()> {
        self.cmd_tx.send(cmd).await.map_err(|_| ScanError::ShutDown)
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Registers devices and spawns the controller.
///
/// ## Example
/// ```rust,ignore
/// let scan = ScanController::builder()
///     .rfid(uhf_reader)
///     .barcode(wedge_reader)
///     .spawn();
/// scan.start(ScanChannel::Rfid, ScanMode::Continuous).await?;
/// ```
#[derive(Default)]
pub struct ScanControllerBuilder {
    config: ScanConfig,
    devices: HashMap<ScanChannel, Arc<dyn ScanDevice>>,
}

impl ScanControllerBuilder {
    /// Sets the controller configuration.
    pub fn config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers the RF tag reader.
    pub fn rfid(self, device: Arc<dyn ScanDevice>) -> Self {
        self.device(ScanChannel::Rfid, device)
    }

    /// Registers the keyboard-wedge barcode reader.
    pub fn barcode(self, device: Arc<dyn ScanDevice>) -> Self {
        self.device(ScanChannel::Barcode, device)
    }

    /// Registers a device for an arbitrary channel.
    pub fn device(mut self, channel: ScanChannel, device: Arc<dyn ScanDevice>) -> Self {
        self.devices.insert(channel, device);
        self
    }

    /// Spawns the controller task and returns its handle.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn(self) -> ScanHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (hw_tx, hw_rx) = mpsc::channel(self.config.hardware_queue.max(1));
        let (signal_tx, signal_rx) = broadcast::channel(self.config.event_buffer.max(1));
        let (state_tx, state_rx) = watch::channel(ScanState::Idle);

        let controller = ScanController {
            config: self.config,
            devices: self.devices,
            generation: 0,
            session: None,
            hw_tx,
            signal_tx,
            state_tx,
        };

        tokio::spawn(controller.run(cmd_rx, hw_rx));

        ScanHandle {
            cmd_tx,
            state_rx,
            signals: Arc::new(signal_rx),
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

struct Session {
    generation: u64,
    channel: ScanChannel,
    mode: ScanMode,
    device: Arc<dyn ScanDevice>,
    framer: KeystrokeFramer,
    dedup: TagDeduplicator,
}

/// The controller actor. Created through [`ScanController::builder`].
pub struct ScanController {
    config: ScanConfig,
    devices: HashMap<ScanChannel, Arc<dyn ScanDevice>>,
    generation: u64,
    session: Option<Session>,
    hw_tx: mpsc::Sender<(u64, HardwareEvent)>,
    signal_tx: broadcast::Sender<ScanSignal>,
    state_tx: watch::Sender<ScanState>,
}

impl ScanController {
    /// Returns a builder with no devices and default configuration.
    pub fn builder() -> ScanControllerBuilder {
        ScanControllerBuilder::default()
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<ScanCommand>,
        mut hw_rx: mpsc::Receiver<(u64, HardwareEvent)>,
    ) {
        info!(
            devices = self.devices.len(),
            frame_timeout_ms = self.config.frame_timeout.as_millis() as u64,
            "Scan controller started"
        );

        loop {
            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => {
                    // Reads queued before the command belong to the session it ends.
                    self.flush_hardware(&mut hw_rx).await;
                    match cmd {
                        Some(ScanCommand::Start { channel, mode, reply }) => {
                            let result = self.start_session(channel, mode).await;
                            let _ = reply.send(result);
                        }
                        Some(ScanCommand::Stop { reply }) => {
                            self.stop_session(StopReason::Requested).await;
                            let _ = reply.send(());
                        }
                        Some(ScanCommand::Clear) => {
                            debug!("Clear requested");
                            self.publish(ScanSignal::ClearRequested);
                        }
                        Some(ScanCommand::Shutdown { reply }) => {
                            self.stop_session(StopReason::Shutdown).await;
                            let _ = reply.send(());
                            break;
                        }
                        None => {
                            self.stop_session(StopReason::Shutdown).await;
                            break;
                        }
                    }
                }

                Some((generation, event)) = hw_rx.recv() => {
                    self.handle_hardware(generation, event).await;
                }
            }
        }

        info!("Scan controller stopped");
        // Dropping self closes the broadcast channel; consumers see None.
    }

    /// Handles every hardware event already queued, without waiting.
    async fn flush_hardware(&mut self, hw_rx: &mut mpsc::Receiver<(u64, HardwareEvent)>) {
        while let Ok((generation, event)) = hw_rx.try_recv() {
            self.handle_hardware(generation, event).await;
        }
    }

    async fn start_session(&mut self, channel: ScanChannel, mode: ScanMode) -> ScanResult<u64> {
        let device = self
            .devices
            .get(&channel)
            .cloned()
            .ok_or(ScanError::DeviceNotRegistered(channel))?;

        self.stop_session(StopReason::Superseded).await;

        self.generation += 1;
        let generation = self.generation;
        let sink = HardwareSink::new(generation, self.hw_tx.clone());

        if let Err(err) = device.acquire(mode, sink).await {
            warn!(generation, channel = %channel, error = %err, "Hardware subscription failed");
            self.publish(ScanSignal::Error {
                generation,
                message: err.to_string(),
            });
            self.state_tx.send_replace(ScanState::Idle);
            return Err(err);
        }

        self.session = Some(Session {
            generation,
            channel,
            mode,
            device,
            framer: KeystrokeFramer::new(self.config.frame_timeout),
            dedup: TagDeduplicator::new(mode),
        });

        info!(generation, channel = %channel, mode = %mode, "Scan session started");
        self.state_tx.send_replace(ScanState::Scanning {
            generation,
            channel,
            mode,
        });
        self.publish(ScanSignal::Started {
            generation,
            channel,
            mode,
        });

        Ok(generation)
    }

    async fn stop_session(&mut self, reason: StopReason) {
        let Some(session) = self.session.take() else {
            return;
        };

        // Invalidate in-flight callbacks before the (asynchronous) release.
        self.generation += 1;

        self.state_tx.send_replace(ScanState::Stopping {
            generation: session.generation,
            channel: session.channel,
        });

        if let Err(err) = session.device.release().await {
            warn!(
                generation = session.generation,
                channel = %session.channel,
                error = %err,
                "Hardware release failed"
            );
        }

        info!(
            generation = session.generation,
            channel = %session.channel,
            reason = %reason,
            seen = session.dedup.seen_count(),
            "Scan session stopped"
        );
        self.publish(ScanSignal::Stopped {
            generation: session.generation,
            reason,
        });
        self.state_tx.send_replace(ScanState::Idle);
    }

    async fn handle_hardware(&mut self, generation: u64, event: HardwareEvent) {
        let Some(session) = self.session.as_mut() else {
            trace!(generation, "Hardware event with no session, discarded");
            return;
        };

        if session.generation != generation {
            debug!(
                generation,
                current = session.generation,
                "Stale hardware event discarded"
            );
            return;
        }

        let mut finished = None;
        let mut published = None;

        match (session.channel, event) {
            (ScanChannel::Barcode, HardwareEvent::Key { code, is_key_down, at }) => {
                if let KeyOutcome::Completed(code) = session.framer.handle_key(code, is_key_down, at)
                {
                    trace!(generation, barcode = %code, "Barcode framed");
                    published = Some(ScanSignal::Event {
                        generation,
                        event: ScanEvent::Barcode(code),
                    });
                    if session.mode.is_single_shot() {
                        finished = Some(StopReason::Completed);
                    }
                }
            }
            (ScanChannel::Rfid, HardwareEvent::TagDetected { id, rssi, at }) => {
                if let Some(tag) = session.dedup.on_tag_detected(&id, rssi, at) {
                    trace!(generation, tag = %tag.id, rssi, "Tag accepted");
                    published = Some(ScanSignal::Event {
                        generation,
                        event: ScanEvent::Tag(tag),
                    });
                }
            }
            (ScanChannel::Rfid, HardwareEvent::RoundEnded) => {
                if session.dedup.on_inventory_round_ended() == RoundOutcome::Complete {
                    finished = Some(StopReason::Completed);
                }
            }
            (_, HardwareEvent::Fault(message)) => {
                let err = ScanError::Hardware(message);
                warn!(generation, error = %err, "Hardware fault during scan");
                published = Some(ScanSignal::Error {
                    generation,
                    message: err.to_string(),
                });
                finished = Some(StopReason::Fault);
            }
            (channel, other) => {
                trace!(generation, channel = %channel, ?other, "Event not applicable to channel");
            }
        }

        if let Some(signal) = published {
            self.publish(signal);
        }
        if let Some(reason) = finished {
            self.stop_session(reason).await;
        }
    }

    fn publish(&self, signal: ScanSignal) {
        if self.signal_tx.send(signal).is_err() {
            trace!("No scan subscribers");
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
