//! # Socket Transport
//!
//! The connectivity monitor talks to the remote service through a
//! [`Connector`], which opens one framed connection per call.
//!
//! ## Frame Mapping
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Frame ◄──► WebSocket Message                         │
//! │                                                                         │
//! │  Frame::Ping          ◄──►  Message::Ping(empty)                       │
//! │  Frame::Pong          ◄──►  Message::Pong(_)                           │
//! │  Frame::Text(s)       ◄──►  Message::Text(s)                           │
//! │  Frame::Binary(b)     ◄──►  Message::Binary(b)                         │
//! │  Frame::Close(reason) ◄──►  Message::Close(frame)                      │
//! │                       ◄───  Message::Frame(_)   (raw, skipped)         │
//! │                                                                         │
//! │  Payloads of pings/pongs are not interpreted: ANY inbound frame is     │
//! │  heartbeat activity for the monitor.                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`WsConnector`] is the production implementation. [`LoopbackConnector`]
//! keeps the remote end in-process, for demo builds and tests.

use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Frames
// =============================================================================

/// One message on the connection, independent of the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Ping,
    Pong,
    Text(String),
    Binary(Vec<u8>),
    /// Close handshake with an optional reason.
    Close(Option<String>),
}

impl Frame {
    fn into_message(self) -> WsMessage {
        match self {
            Frame::Ping => WsMessage::Ping(vec![].into()),
            Frame::Pong => WsMessage::Pong(vec![].into()),
            Frame::Text(text) => WsMessage::Text(text.into()),
            Frame::Binary(data) => WsMessage::Binary(data.into()),
            Frame::Close(reason) => WsMessage::Close(reason.map(|reason| CloseFrame {
                code: CloseCode::Normal,
                reason: reason.into(),
            })),
        }
    }

    fn from_message(message: WsMessage) -> Option<Self> {
        match message {
            WsMessage::Ping(_) => Some(Frame::Ping),
            WsMessage::Pong(_) => Some(Frame::Pong),
            WsMessage::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
            WsMessage::Binary(data) => Some(Frame::Binary(data.to_vec())),
            WsMessage::Close(frame) => {
                Some(Frame::Close(frame.map(|f| f.reason.as_str().to_owned())))
            }
            WsMessage::Frame(_) => None,
        }
    }
}

/// Outbound half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = SyncError> + Send>>;

/// Inbound half of a connection. Ends when the socket closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = SyncResult<Frame>> + Send>>;

// =============================================================================
// Connector
// =============================================================================

/// Opens connections to the remote service.
///
/// Called once per attempt; the monitor bounds each call with its connect
/// timeout and drops both halves when the connection ends.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> SyncResult<(FrameSink, FrameStream)>;
}

// =============================================================================
// WebSocket Connector
// =============================================================================

/// Connects to a `ws://` or `wss://` endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// Creates a connector for `url`, rejecting non-WebSocket schemes.
    pub fn new(url: impl Into<String>) -> SyncResult<Self> {
        let url = url.into();
        let parsed = url::Url::parse(&url)?;
        match parsed.scheme() {
            "ws" | "wss" => Ok(WsConnector { url }),
            other => Err(SyncError::InvalidUrl(format!(
                "expected ws:// or wss://, got {}://",
                other
            ))),
        }
    }

    /// Returns the endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> SyncResult<(FrameSink, FrameStream)> {
        debug!(url = %self.url, "Opening WebSocket");
        let (ws_stream, response) = connect_async(self.url.as_str()).await?;
        info!(url = %self.url, status = %response.status(), "WebSocket handshake complete");

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(SyncError::from)
            .with(|frame: Frame| future::ready(Ok::<_, SyncError>(frame.into_message())));

        let stream = read.filter_map(|message| {
            future::ready(match message {
                Ok(message) => Frame::from_message(message).map(Ok),
                Err(e) => Some(Err(SyncError::from(e))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

// =============================================================================
// Loopback Connector
// =============================================================================

#[derive(Debug, Default)]
struct LoopbackState {
    attempts: usize,
    refuse: bool,
    /// Sender feeding the client's inbound stream of the latest connection.
    inbound: Option<mpsc::UnboundedSender<SyncResult<Frame>>>,
    /// Frames the client sent on the latest connection.
    outbound: Vec<Frame>,
    outbound_rx: Option<mpsc::UnboundedReceiver<Frame>>,
}

/// An in-process remote end.
///
/// Each `connect()` replaces the previous connection. The remote stays
/// silent unless driven through [`send_to_client`](Self::send_to_client).
#[derive(Debug, Default)]
pub struct LoopbackConnector {
    state: Mutex<LoopbackState>,
}

impl LoopbackConnector {
    /// Creates a connector that accepts connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connector that refuses connections until
    /// [`set_refuse(false)`](Self::set_refuse).
    pub fn refusing() -> Self {
        let connector = Self::default();
        connector.set_refuse(true);
        connector
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of `connect()` calls so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    /// Makes subsequent connection attempts fail (simulates no network).
    pub fn set_refuse(&self, refuse: bool) {
        self.lock().refuse = refuse;
    }

    /// Delivers a frame to the client on the latest connection.
    ///
    /// Returns false if there is no live connection.
    pub fn send_to_client(&self, frame: Frame) -> bool {
        self.lock()
            .inbound
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(frame)).is_ok())
    }

    /// Ends the client's inbound stream, as if the socket dropped.
    pub fn drop_connection(&self) {
        self.lock().inbound = None;
    }

    /// Frames the client has sent on the latest connection.
    pub fn sent_frames(&self) -> Vec<Frame> {
        let mut state = self.lock();
        let mut received = Vec::new();
        if let Some(rx) = state.outbound_rx.as_mut() {
            while let Ok(frame) = rx.try_recv() {
                received.push(frame);
            }
        }
        state.outbound.extend(received);
        state.outbound.clone()
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self) -> SyncResult<(FrameSink, FrameStream)> {
        let mut state = self.lock();
        state.attempts += 1;
        if state.refuse {
            return Err(SyncError::ConnectionFailed("connection refused".into()));
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        state.inbound = Some(inbound_tx);
        state.outbound.clear();
        state.outbound_rx = Some(outbound_rx);

        let sink = futures_util::sink::unfold(outbound_tx, |tx, frame: Frame| async move {
            tx.send(frame).map_err(|_| SyncError::Disconnected)?;
            Ok::<_, SyncError>(tx)
        });
        let stream = UnboundedReceiverStream::new(inbound_rx);

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}
