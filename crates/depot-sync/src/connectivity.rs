//! # Connectivity Monitor
//!
//! Keeps a persistent socket to the remote service open and reduces its
//! health to one boolean: online or not.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Connectivity State Machine                          │
//! │                                                                         │
//! │            spawn / connect()                                            │
//! │                  │                                                      │
//! │                  ▼                                                      │
//! │           ┌────────────┐  open ok   ┌────────────┐                     │
//! │     ┌────►│ Connecting │ ─────────► │ Connected  │  ping every 30s     │
//! │     │     └─────┬──────┘            └─────┬──────┘  no frame for 60s   │
//! │     │           │ fail / timeout          │         → forced close     │
//! │     │           ▼                         ▼                            │
//! │     │     ┌─────────────────────────────────────┐                      │
//! │     │     │ Error(detail) / Disconnected(reason)│                      │
//! │     │     └─────────────────┬───────────────────┘                      │
//! │     │                       │                                          │
//! │     └──── after 2s ─────────┘                                          │
//! │                                                                         │
//! │  disconnect() from ANY state → Disconnected("disconnected by client")  │
//! │  and no reconnect until connect() is called again.                     │
//! │                                                                         │
//! │  is_online == (state == Connected). Consumers only see the boolean.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::error::{SyncError, SyncResult};
use crate::transport::{Connector, Frame, FrameSink, FrameStream};

const COMMAND_BUFFER: usize = 16;
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Reason reported after `disconnect()`.
pub const DISCONNECTED_BY_CLIENT: &str = "disconnected by client";

// =============================================================================
// Configuration
// =============================================================================

/// Timing of the connectivity monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Upper bound for one connection attempt.
    pub connect_timeout: Duration,
    /// How often a ping is sent while connected.
    pub heartbeat_interval: Duration,
    /// Maximum silence before the connection is declared dead.
    pub heartbeat_timeout: Duration,
    /// Fixed wait between a failure and the next attempt.
    pub reconnect_delay: Duration,
    /// Connect immediately on spawn.
    pub auto_connect: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            reconnect_delay: Duration::from_secs(2),
            auto_connect: true,
        }
    }
}

// =============================================================================
// Connectivity State
// =============================================================================

/// Connection state as seen by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityState {
    Connecting,
    Connected,
    /// The socket closed; carries a human-readable reason.
    Disconnected(String),
    /// An attempt or an open socket failed.
    Error(String),
}

impl ConnectivityState {
    /// True only while connected.
    pub fn is_online(&self) -> bool {
        matches!(self, ConnectivityState::Connected)
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectivityState::Connecting => write!(f, "connecting"),
            ConnectivityState::Connected => write!(f, "connected"),
            ConnectivityState::Disconnected(reason) => write!(f, "disconnected: {}", reason),
            ConnectivityState::Error(detail) => write!(f, "error: {}", detail),
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

type Ack = oneshot::Sender<()>;

#[derive(Debug)]
enum MonitorCommand {
    Connect(Ack),
    Disconnect(Ack),
    Shutdown(Ack),
}

/// Cloneable handle to a running monitor.
#[derive(Debug, Clone)]
pub struct ConnectivityHandle {
    cmd_tx: mpsc::Sender<MonitorCommand>,
    state_rx: watch::Receiver<ConnectivityState>,
    online_rx: watch::Receiver<bool>,
}

impl ConnectivityHandle {
    /// Current connection state.
    pub fn state(&self) -> ConnectivityState {
        self.state_rx.borrow().clone()
    }

    /// True while connected.
    pub fn is_online(&self) -> bool {
        *self.online_rx.borrow()
    }

    /// Subscribes to the online flag. Only true/false edges are published.
    pub fn subscribe_online(&self) -> watch::Receiver<bool> {
        self.online_rx.clone()
    }

    /// Subscribes to raw state changes, for diagnostics.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectivityState> {
        self.state_rx.clone()
    }

    /// Resumes connecting after `disconnect()`.
    ///
    /// While waiting out a reconnect delay this reconnects immediately.
    pub async fn connect(&self) -> SyncResult<()> {
        self.request(MonitorCommand::Connect).await
    }

    /// Closes the socket, cancels heartbeat and reconnect timers, and stays
    /// disconnected until `connect()`.
    pub async fn disconnect(&self) -> SyncResult<()> {
        self.request(MonitorCommand::Disconnect).await
    }

    /// Stops the monitor task. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.request(MonitorCommand::Shutdown).await;
    }

    async fn request(&self, command: fn(Ack) -> MonitorCommand) -> SyncResult<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(command(tx))
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        rx.await.map_err(|_| SyncError::ShuttingDown)
    }
}

// =============================================================================
// Monitor
// =============================================================================

/// How a connection (or an attempt at one) ended.
enum Ended {
    Failed(ConnectivityState),
    Disconnect(Ack),
    Shutdown(Option<Ack>),
}

/// Background task owning the socket.
pub struct ConnectivityMonitor {
    config: MonitorConfig,
    connector: Arc<dyn Connector>,
    cmd_rx: mpsc::Receiver<MonitorCommand>,
    state_tx: watch::Sender<ConnectivityState>,
    online_tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    /// Spawns the monitor on the current runtime.
    pub fn spawn(config: MonitorConfig, connector: Arc<dyn Connector>) -> ConnectivityHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let initial = if config.auto_connect {
            ConnectivityState::Connecting
        } else {
            ConnectivityState::Disconnected("not started".into())
        };
        let (state_tx, state_rx) = watch::channel(initial);
        let (online_tx, online_rx) = watch::channel(false);

        let monitor = ConnectivityMonitor {
            config,
            connector,
            cmd_rx,
            state_tx,
            online_tx,
        };
        tokio::spawn(monitor.run());

        ConnectivityHandle {
            cmd_tx,
            state_rx,
            online_rx,
        }
    }

    async fn run(mut self) {
        let mut backoff = Constant::new(self.config.reconnect_delay);
        let mut active = self.config.auto_connect;

        loop {
            if !active {
                match self.cmd_rx.recv().await {
                    Some(MonitorCommand::Connect(ack)) => {
                        info!("Connect requested");
                        active = true;
                        let _ = ack.send(());
                    }
                    Some(MonitorCommand::Disconnect(ack)) => {
                        let _ = ack.send(());
                    }
                    Some(MonitorCommand::Shutdown(ack)) => return self.finish(Some(ack)),
                    None => return self.finish(None),
                }
                continue;
            }

            match self.run_connection().await {
                Ended::Failed(state) => {
                    self.set_state(state);
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or(self.config.reconnect_delay);
                    debug!(delay_ms = delay.as_millis() as u64, "Reconnect scheduled");

                    tokio::select! {
                        _ = sleep(delay) => {}
                        cmd = self.cmd_rx.recv() => match cmd {
                            Some(MonitorCommand::Connect(ack)) => {
                                debug!("Reconnecting without waiting");
                                let _ = ack.send(());
                            }
                            Some(MonitorCommand::Disconnect(ack)) => {
                                active = false;
                                self.disconnected_by_client(ack);
                            }
                            Some(MonitorCommand::Shutdown(ack)) => return self.finish(Some(ack)),
                            None => return self.finish(None),
                        }
                    }
                }
                Ended::Disconnect(ack) => {
                    active = false;
                    self.disconnected_by_client(ack);
                }
                Ended::Shutdown(ack) => return self.finish(ack),
            }
        }
    }

    /// One attempt plus, if it succeeds, the life of the connection.
    async fn run_connection(&mut self) -> Ended {
        self.set_state(ConnectivityState::Connecting);

        let connector = Arc::clone(&self.connector);
        let attempt = timeout(self.config.connect_timeout, connector.connect());
        tokio::pin!(attempt);

        let result = loop {
            tokio::select! {
                result = &mut attempt => break result,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(MonitorCommand::Connect(ack)) => {
                        let _ = ack.send(());
                    }
                    Some(MonitorCommand::Disconnect(ack)) => return Ended::Disconnect(ack),
                    Some(MonitorCommand::Shutdown(ack)) => return Ended::Shutdown(Some(ack)),
                    None => return Ended::Shutdown(None),
                }
            }
        };

        let (mut sink, mut stream) = match result {
            Ok(Ok(halves)) => halves,
            Ok(Err(e)) => {
                warn!(error = %e, "Connection attempt failed");
                return Ended::Failed(ConnectivityState::Error(e.to_string()));
            }
            Err(_) => {
                let err = SyncError::Timeout(self.config.connect_timeout.as_secs());
                warn!(error = %err, "Connection attempt timed out");
                return Ended::Failed(ConnectivityState::Error(err.to_string()));
            }
        };

        self.set_state(ConnectivityState::Connected);
        self.connection_loop(&mut sink, &mut stream).await
    }

    async fn connection_loop(&mut self, sink: &mut FrameSink, stream: &mut FrameStream) -> Ended {
        let heartbeat = self.config.heartbeat_interval;
        let mut ping = interval_at(Instant::now() + heartbeat, heartbeat);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_activity = Instant::now();

        loop {
            let deadline = last_activity + self.config.heartbeat_timeout;

            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(frame)) => {
                        last_activity = Instant::now();
                        match frame {
                            Frame::Ping => {
                                if let Err(e) = sink.send(Frame::Pong).await {
                                    warn!(error = %e, "Failed to answer ping");
                                    return Ended::Failed(ConnectivityState::Error(e.to_string()));
                                }
                            }
                            Frame::Close(reason) => {
                                let reason = reason
                                    .filter(|r| !r.is_empty())
                                    .unwrap_or_else(|| "closed by remote".into());
                                info!(%reason, "Remote closed the connection");
                                return Ended::Failed(ConnectivityState::Disconnected(reason));
                            }
                            other => trace!(frame = ?other, "Inbound frame"),
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Socket error");
                        return Ended::Failed(ConnectivityState::Error(e.to_string()));
                    }
                    None => {
                        return Ended::Failed(ConnectivityState::Disconnected(
                            "connection lost".into(),
                        ));
                    }
                },

                _ = ping.tick() => {
                    trace!("Sending heartbeat ping");
                    if let Err(e) = sink.send(Frame::Ping).await {
                        warn!(error = %e, "Failed to send heartbeat");
                        return Ended::Failed(ConnectivityState::Error(e.to_string()));
                    }
                }

                _ = sleep_until(deadline) => {
                    let err = SyncError::HeartbeatTimeout(self.config.heartbeat_timeout.as_secs());
                    warn!(error = %err, "No activity from remote, closing connection");
                    return Ended::Failed(ConnectivityState::Disconnected(err.to_string()));
                }

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(MonitorCommand::Connect(ack)) => {
                        let _ = ack.send(());
                    }
                    Some(MonitorCommand::Disconnect(ack)) => {
                        close_gracefully(sink).await;
                        return Ended::Disconnect(ack);
                    }
                    Some(MonitorCommand::Shutdown(ack)) => {
                        close_gracefully(sink).await;
                        return Ended::Shutdown(Some(ack));
                    }
                    None => {
                        close_gracefully(sink).await;
                        return Ended::Shutdown(None);
                    }
                }
            }
        }
    }

    fn disconnected_by_client(&self, ack: Ack) {
        info!("Disconnected by client, reconnect suspended");
        self.set_state(ConnectivityState::Disconnected(DISCONNECTED_BY_CLIENT.into()));
        let _ = ack.send(());
    }

    fn finish(&self, ack: Option<Ack>) {
        self.set_state(ConnectivityState::Disconnected("shut down".into()));
        info!("Connectivity monitor stopped");
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    fn set_state(&self, state: ConnectivityState) {
        let online = state.is_online();
        let previous = self.state_tx.send_replace(state.clone());
        if previous != state {
            info!(from = %previous, to = %state, "Connectivity state changed");
        }
        self.online_tx.send_if_modified(|current| {
            if *current != online {
                *current = online;
                true
            } else {
                false
            }
        });
    }
}

async fn close_gracefully(sink: &mut FrameSink) {
    let closing = async {
        sink.send(Frame::Close(None)).await?;
        sink.close().await
    };
    if let Err(e) = timeout(CLOSE_GRACE, closing).await.unwrap_or(Ok(())) {
        debug!(error = %e, "Close handshake failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackConnector;
    use async_trait::async_trait;

    fn config() -> MonitorConfig {
        MonitorConfig::default()
    }

    async fn wait_for(
        handle: &ConnectivityHandle,
        mut pred: impl FnMut(&ConnectivityState) -> bool,
    ) -> ConnectivityState {
        let mut rx = handle.subscribe_state();
        let state = timeout(Duration::from_secs(600), rx.wait_for(|s| pred(s)))
            .await
            .expect("state not reached")
            .expect("monitor gone")
            .clone();
        state
    }

    struct HangingConnector;

    #[async_trait]
    impl Connector for HangingConnector {
        async fn connect(&self) -> SyncResult<(FrameSink, FrameStream)> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_on_spawn() {
        let connector = Arc::new(LoopbackConnector::new());
        let handle = ConnectivityMonitor::spawn(config(), connector.clone());

        wait_for(&handle, ConnectivityState::is_online).await;
        assert!(handle.is_online());
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timeout_schedules_one_reconnect() {
        let connector = Arc::new(LoopbackConnector::new());
        let handle = ConnectivityMonitor::spawn(config(), connector.clone());
        let mut online = handle.subscribe_online();

        wait_for(&handle, ConnectivityState::is_online).await;
        assert!(*online.borrow_and_update());

        // The loopback remote never answers.
        let state = wait_for(&handle, |s| matches!(s, ConnectivityState::Disconnected(_))).await;
        assert_eq!(
            state,
            ConnectivityState::Disconnected(SyncError::HeartbeatTimeout(60).to_string())
        );
        assert!(online.has_changed().unwrap());
        assert!(!*online.borrow_and_update());
        assert_eq!(connector.attempts(), 1);

        sleep(Duration::from_millis(1900)).await;
        assert_eq!(connector.attempts(), 1);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(connector.attempts(), 2);
        assert_eq!(handle.state(), ConnectivityState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_during_delay_cancels_reconnect() {
        let connector = Arc::new(LoopbackConnector::new());
        let handle = ConnectivityMonitor::spawn(config(), connector.clone());

        wait_for(&handle, |s| matches!(s, ConnectivityState::Disconnected(_))).await;
        handle.disconnect().await.unwrap();
        assert_eq!(
            handle.state(),
            ConnectivityState::Disconnected(DISCONNECTED_BY_CLIENT.into())
        );

        sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 1);
        assert!(!handle.is_online());

        handle.connect().await.unwrap();
        wait_for(&handle, ConnectivityState::is_online).await;
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_connected_sends_close() {
        let connector = Arc::new(LoopbackConnector::new());
        let handle = ConnectivityMonitor::spawn(config(), connector.clone());
        wait_for(&handle, ConnectivityState::is_online).await;

        handle.disconnect().await.unwrap();
        assert!(!handle.is_online());
        assert!(connector.sent_frames().contains(&Frame::Close(None)));

        sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_activity_keeps_connection_alive() {
        let connector = Arc::new(LoopbackConnector::new());
        let handle = ConnectivityMonitor::spawn(config(), connector.clone());
        wait_for(&handle, ConnectivityState::is_online).await;

        for _ in 0..4 {
            sleep(Duration::from_secs(25)).await;
            assert!(connector.send_to_client(Frame::Text("inventory-changed".into())));
        }
        assert!(connector.send_to_client(Frame::Ping));
        sleep(Duration::from_millis(10)).await;

        assert_eq!(handle.state(), ConnectivityState::Connected);
        assert_eq!(connector.attempts(), 1);

        let sent = connector.sent_frames();
        assert!(sent.contains(&Frame::Pong));
        assert_eq!(sent.iter().filter(|f| **f == Frame::Ping).count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connection_retries_with_constant_delay() {
        let connector = Arc::new(LoopbackConnector::refusing());
        let handle = ConnectivityMonitor::spawn(config(), connector.clone());

        let state = wait_for(&handle, |s| matches!(s, ConnectivityState::Error(_))).await;
        assert!(state.to_string().contains("refused"));
        assert_eq!(connector.attempts(), 1);

        sleep(Duration::from_millis(2100)).await;
        assert_eq!(connector.attempts(), 2);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(connector.attempts(), 3);

        connector.set_refuse(false);
        wait_for(&handle, ConnectivityState::is_online).await;
        assert_eq!(connector.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_close_reports_reason() {
        let connector = Arc::new(LoopbackConnector::new());
        let handle = ConnectivityMonitor::spawn(config(), connector.clone());
        wait_for(&handle, ConnectivityState::is_online).await;

        connector.send_to_client(Frame::Close(Some("server restart".into())));
        let state = wait_for(&handle, |s| !s.is_online()).await;
        assert_eq!(state, ConnectivityState::Disconnected("server restart".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_socket_is_disconnected() {
        let connector = Arc::new(LoopbackConnector::new());
        let handle = ConnectivityMonitor::spawn(config(), connector.clone());
        wait_for(&handle, ConnectivityState::is_online).await;

        connector.drop_connection();
        let state = wait_for(&handle, |s| !s.is_online()).await;
        assert_eq!(state, ConnectivityState::Disconnected("connection lost".into()));

        wait_for(&handle, ConnectivityState::is_online).await;
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_attempt_is_bounded() {
        let handle = ConnectivityMonitor::spawn(config(), Arc::new(HangingConnector));

        let state = wait_for(&handle, |s| matches!(s, ConnectivityState::Error(_))).await;
        assert!(state.to_string().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_connecting() {
        let handle = ConnectivityMonitor::spawn(config(), Arc::new(HangingConnector));
        sleep(Duration::from_secs(1)).await;

        handle.disconnect().await.unwrap();
        assert_eq!(
            handle.state(),
            ConnectivityState::Disconnected(DISCONNECTED_BY_CLIENT.into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_start() {
        let connector = Arc::new(LoopbackConnector::new());
        let config = MonitorConfig {
            auto_connect: false,
            ..MonitorConfig::default()
        };
        let handle = ConnectivityMonitor::spawn(config, connector.clone());

        sleep(Duration::from_secs(5)).await;
        assert_eq!(connector.attempts(), 0);

        handle.connect().await.unwrap();
        wait_for(&handle, ConnectivityState::is_online).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_terminal() {
        let connector = Arc::new(LoopbackConnector::new());
        let handle = ConnectivityMonitor::spawn(config(), connector.clone());
        wait_for(&handle, ConnectivityState::is_online).await;

        handle.shutdown().await;
        assert_eq!(handle.state(), ConnectivityState::Disconnected("shut down".into()));
        assert!(!handle.is_online());
        assert!(matches!(handle.connect().await, Err(SyncError::ShuttingDown)));
        handle.shutdown().await;
    }
}
