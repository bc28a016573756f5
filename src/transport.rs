//! # Duplex Transport Channel
//!
//! Owns the one persistent WebSocket connection a voice session lives on.
//! Handles the handshake, heartbeat, reconnection and message framing so the
//! rest of the client only sees a stream of [`TransportEvent`]s and a
//! [`TransportHandle`] to write through.
//!
//! ## Protocol Framing:
//! Two message classes travel on the channel:
//! - **Text control messages**: JSON objects with a `type` discriminator
//!   (`status`, `error`, `ping`/`pong`, `request_resynthesis`)
//! - **Binary frames**: each one is a complete synthesized-audio segment
//!
//! ## Ownership:
//! A single spawned run task owns the socket, the heartbeat timer, the
//! reconnect loop and the [`ConnectionState`]. State transitions only ever
//! happen on that task, which serializes them by construction. All timers
//! live inside the task, so tearing it down tears the timers down with it.

use crate::config::RealtimeConfig;
use crate::error::{AppError, AppResult};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, tungstenite::Message>;

/// Text control messages exchanged with the backend.
///
/// Binary audio payloads are NOT represented here; they travel as raw binary
/// WebSocket frames (one frame = one playable segment).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Server status notification (e.g. connected confirmation)
    Status { message: String },

    /// Fatal-to-session error from the server
    Error { message: String },

    /// Heartbeat probe (client → server every 30 seconds while open)
    Ping,

    /// Heartbeat reply
    Pong,

    /// Ask the server to regenerate and resend the last audio reply
    /// because what arrived was unusable
    RequestResynthesis { reason: String },
}

/// Declared content kind of a received segment.
///
/// The wire protocol carries no per-frame content type, so all binary frames
/// are declared as audio; the playback queue decides playability by probing,
/// not by trusting the declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Audio,
}

/// One decodable unit of synthesized audio received from the backend.
///
/// Produced on receipt of a binary frame; consumed and discarded by the
/// playback queue after a single playback attempt (no caching, no replay).
#[derive(Debug, Clone)]
pub struct AudioSegment {
    /// Opaque encoded audio bytes
    pub data: Vec<u8>,

    /// Declared content kind
    pub kind: SegmentKind,
}

impl AudioSegment {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            kind: SegmentKind::Audio,
        }
    }

    /// Byte length of the payload.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Connection lifecycle of the channel.
///
/// Transitions are serialized on the transport run task; the state never
/// jumps from `Closed` to `Open` without passing through `Connecting` or
/// `Reconnecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        }
    }
}

/// Notifications the transport pushes up to the session controller.
#[derive(Debug)]
pub enum TransportEvent {
    /// Initial open succeeded
    Connected,

    /// An open after an outage succeeded (distinct from `Connected`)
    Reconnected,

    /// One binary frame arrived
    Segment(AudioSegment),

    /// The server declared the session dead; no reconnect will follow
    ServerError(String),

    /// Unrecoverable transport failure (reconnects exhausted)
    Fatal(AppError),

    /// The channel shut down cleanly and will not reconnect
    Closed,
}

/// What to do after the underlying connection went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Expected shutdown: clear state silently, no reconnect
    Silent,

    /// Network-class failure: schedule a reconnect attempt
    Reconnect,

    /// Server-error close: surface a fatal error, no reconnect
    Fatal,
}

/// Classify a close into the action the reconnect machine takes.
///
/// ## Close-code table:
/// | code        | class              | action    |
/// |-------------|--------------------|-----------|
/// | 1000, 1001  | expected/normal    | silent    |
/// | 1005        | normal (no status) | silent    |
/// | 1006        | network/abnormal   | reconnect |
/// | 1011        | server error       | fatal     |
/// | manual flag | client-initiated   | silent    |
/// | other       | unexpected         | reconnect |
///
/// `None` means the stream ended or errored without delivering a close frame,
/// which is indistinguishable from an abnormal (1006-class) close.
pub fn classify_close(code: Option<u16>, manually_closed: bool) -> CloseAction {
    if manually_closed {
        return CloseAction::Silent;
    }

    match code {
        Some(1000) | Some(1001) | Some(1005) => CloseAction::Silent,
        Some(1011) => CloseAction::Fatal,
        Some(1006) | None => CloseAction::Reconnect,
        Some(_) => CloseAction::Reconnect,
    }
}

/// Backoff delay before reconnect attempt `attempt` (0-based).
///
/// Pure function of the attempt count: `min(base * 2^attempt, max)`.
/// With the default config this yields 1s, 2s, 4s, 8s, 16s, then caps
/// at 32s.
pub fn reconnect_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let factor = 1u64 << attempt.min(16);
    Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
}

/// Build the channel URI carrying the session id and bearer credential as
/// query parameters.
pub fn session_channel_url(base: &str, session_id: &str, token: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}session_id={}&token={}", base, separator, session_id, token)
}

/// State shared between the run task and the handles.
struct TransportShared {
    state: Mutex<ConnectionState>,
    manual_close: AtomicBool,
    /// When the last heartbeat pong arrived. Liveness is inferred from the
    /// socket's own close/error callbacks, not from missed pongs; this
    /// timestamp exists so a pong-timeout policy could be layered on later.
    last_pong: Mutex<Option<Instant>>,
}

impl TransportShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            manual_close: AtomicBool::new(false),
            last_pong: Mutex::new(None),
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, new_state: ConnectionState) {
        let mut state = self.state.lock().unwrap();
        // The channel must pass through a connecting state before opening.
        debug_assert!(
            new_state != ConnectionState::Open
                || matches!(
                    *state,
                    ConnectionState::Connecting | ConnectionState::Reconnecting
                ),
            "illegal transition {:?} -> Open",
            *state
        );
        if *state != new_state {
            debug!("Channel state: {} -> {}", state.as_str(), new_state.as_str());
            *state = new_state;
        }
    }
}

/// Frames queued for the run task to write out.
#[derive(Debug)]
enum OutboundFrame {
    Binary(Vec<u8>),
    Control(ControlMessage),
}

/// Cloneable writer onto the channel.
///
/// Sends are accepted only while the connection is open; otherwise the frame
/// is dropped with a warning rather than queued against a dead socket.
#[derive(Clone)]
pub struct TransportHandle {
    shared: Arc<TransportShared>,
    outbound: mpsc::Sender<OutboundFrame>,
}

impl TransportHandle {
    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Queue one binary audio frame. Returns whether it was accepted.
    pub fn send_binary(&self, data: Vec<u8>) -> bool {
        self.send_frame(OutboundFrame::Binary(data))
    }

    /// Queue one control message. Returns whether it was accepted.
    pub fn send_control(&self, message: ControlMessage) -> bool {
        self.send_frame(OutboundFrame::Control(message))
    }

    fn send_frame(&self, frame: OutboundFrame) -> bool {
        if self.shared.state() != ConnectionState::Open {
            warn!(
                "Dropping outbound frame while channel is {}",
                self.shared.state().as_str()
            );
            return false;
        }

        if self.outbound.try_send(frame).is_err() {
            warn!("Outbound queue full or closed; frame dropped");
            return false;
        }

        true
    }
}

/// The channel itself: one per session.
///
/// `connect()` spawns the run task; `close()` performs a deliberate,
/// non-reconnecting shutdown, cancelling any pending reconnect backoff before
/// the socket is discarded.
pub struct TransportChannel {
    shared: Arc<TransportShared>,
    config: RealtimeConfig,
    url: String,
    outbound_tx: mpsc::Sender<OutboundFrame>,
    outbound_rx: Option<mpsc::Receiver<OutboundFrame>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TransportChannel {
    /// Create a channel for the given (fully credentialed) URI.
    ///
    /// The handle is usable immediately, but drops frames until the
    /// connection is open.
    pub fn new(config: RealtimeConfig, url: String) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            shared: Arc::new(TransportShared::new()),
            config,
            url,
            outbound_tx,
            outbound_rx: Some(outbound_rx),
            shutdown_tx,
            shutdown_rx,
            task: None,
        }
    }

    /// Get a cloneable writer onto the channel.
    pub fn handle(&self) -> TransportHandle {
        TransportHandle {
            shared: self.shared.clone(),
            outbound: self.outbound_tx.clone(),
        }
    }

    /// Open the duplex connection and start the run task.
    ///
    /// Lifecycle notifications and received segments flow out on `events`.
    pub fn connect(&mut self, events: mpsc::Sender<TransportEvent>) -> AppResult<()> {
        let outbound_rx = self
            .outbound_rx
            .take()
            .ok_or_else(|| AppError::Session("Channel already connected".to_string()))?;

        let shared = self.shared.clone();
        let config = self.config.clone();
        let url = self.url.clone();
        let shutdown_rx = self.shutdown_rx.clone();

        self.task = Some(tokio::spawn(run_loop(
            shared,
            config,
            url,
            outbound_rx,
            shutdown_rx,
            events,
        )));

        Ok(())
    }

    /// Deliberate, non-reconnecting shutdown.
    ///
    /// Sets the manual-close flag first so a concurrent close callback cannot
    /// schedule a reconnect, wakes any pending backoff sleep, then waits for
    /// the run task to finish sending the close frame.
    pub async fn close(&mut self) {
        self.shared.manual_close.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }

        self.shared.set_state(ConnectionState::Closed);
    }
}

/// Result of one connection's lifetime within the run loop.
enum ConnectionOutcome {
    /// Connection ended; close code if the peer sent one
    Ended(Option<u16>),

    /// Server sent a fatal error control message
    ServerError(String),

    /// Local shutdown requested
    Shutdown,
}

/// The reconnect state machine.
///
/// One iteration per connection attempt. A successful open resets the failed
/// attempt counter to zero; exceeding the configured maximum is terminal and
/// reports a single fatal error.
async fn run_loop(
    shared: Arc<TransportShared>,
    config: RealtimeConfig,
    url: String,
    mut outbound_rx: mpsc::Receiver<OutboundFrame>,
    mut shutdown_rx: watch::Receiver<bool>,
    events: mpsc::Sender<TransportEvent>,
) {
    let mut failed_attempts: u32 = 0;
    let mut ever_connected = false;

    loop {
        if shared.manual_close.load(Ordering::SeqCst) {
            break;
        }

        shared.set_state(if ever_connected {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        });

        let connect_result = tokio::select! {
            result = connect_async(url.as_str()) => result,
            _ = shutdown_rx.changed() => break,
        };

        match connect_result {
            Ok((ws, _response)) => {
                shared.set_state(ConnectionState::Open);
                failed_attempts = 0;

                if ever_connected {
                    info!("Channel reconnected");
                    let _ = events.send(TransportEvent::Reconnected).await;
                } else {
                    info!("Channel connected");
                    ever_connected = true;
                    let _ = events.send(TransportEvent::Connected).await;
                }

                let outcome = run_connection(
                    ws,
                    &shared,
                    &config,
                    &mut outbound_rx,
                    &mut shutdown_rx,
                    &events,
                )
                .await;

                match outcome {
                    ConnectionOutcome::Shutdown => break,
                    ConnectionOutcome::ServerError(message) => {
                        shared.set_state(ConnectionState::Closed);
                        let _ = events.send(TransportEvent::ServerError(message)).await;
                        return;
                    }
                    ConnectionOutcome::Ended(code) => {
                        let manual = shared.manual_close.load(Ordering::SeqCst);
                        match classify_close(code, manual) {
                            CloseAction::Silent => break,
                            CloseAction::Fatal => {
                                shared.set_state(ConnectionState::Closed);
                                let _ = events
                                    .send(TransportEvent::ServerError(format!(
                                        "Server closed the channel with code {}",
                                        code.unwrap_or(1011)
                                    )))
                                    .await;
                                return;
                            }
                            CloseAction::Reconnect => {
                                // fall through to the backoff below
                            }
                        }
                    }
                }
            }
            Err(err) => {
                if shared.manual_close.load(Ordering::SeqCst) {
                    break;
                }
                warn!("Connection attempt failed: {}", err);
            }
        }

        // Reconnect path: bounded exponential backoff.
        if failed_attempts >= config.max_reconnect_attempts {
            error!(
                "Giving up after {} reconnect attempts",
                config.max_reconnect_attempts
            );
            shared.set_state(ConnectionState::Closed);
            let _ = events
                .send(TransportEvent::Fatal(AppError::ConnectionExhausted {
                    attempts: failed_attempts,
                }))
                .await;
            return;
        }

        let delay = reconnect_delay(
            failed_attempts,
            config.reconnect_base_delay_ms,
            config.reconnect_max_delay_ms,
        );
        failed_attempts += 1;
        info!(
            "Scheduling reconnect attempt {}/{} in {:?}",
            failed_attempts, config.max_reconnect_attempts, delay
        );
        shared.set_state(ConnectionState::Reconnecting);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => break,
        }
    }

    shared.set_state(ConnectionState::Closed);
    let _ = events.send(TransportEvent::Closed).await;
}

/// Drive one live connection until it ends.
///
/// Multiplexes four sources: inbound frames, queued outbound frames, the
/// heartbeat interval, and the shutdown signal.
async fn run_connection(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    shared: &TransportShared,
    config: &RealtimeConfig,
    outbound_rx: &mut mpsc::Receiver<OutboundFrame>,
    shutdown_rx: &mut watch::Receiver<bool>,
    events: &mpsc::Sender<TransportEvent>,
) -> ConnectionOutcome {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let mut heartbeat =
        tokio::time::interval(Duration::from_secs(config.heartbeat_interval_secs));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick of a tokio interval fires immediately; consume it so the
    // first ping goes out one full interval after open.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            message = ws_rx.next() => {
                match message {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        match serde_json::from_str::<ControlMessage>(&text) {
                            Ok(ControlMessage::Status { message }) => {
                                debug!("Channel status: {}", message);
                            }
                            Ok(ControlMessage::Error { message }) => {
                                error!("Server reported session error: {}", message);
                                return ConnectionOutcome::ServerError(message);
                            }
                            Ok(ControlMessage::Pong) => {
                                // Resets the liveness expectation only; no
                                // state change, and absence of pong is not
                                // separately timed in this design.
                                *shared.last_pong.lock().unwrap() = Some(Instant::now());
                            }
                            Ok(ControlMessage::Ping) => {
                                let _ = send_control(&mut ws_tx, &ControlMessage::Pong).await;
                            }
                            Ok(other) => {
                                warn!("Unexpected control message from server: {:?}", other);
                            }
                            Err(err) => {
                                warn!("Undecodable control message: {}", err);
                            }
                        }
                    }
                    Some(Ok(tungstenite::Message::Binary(data))) => {
                        debug!("Received audio segment ({} bytes)", data.len());
                        let segment = AudioSegment::new(data);
                        if events.send(TransportEvent::Segment(segment)).await.is_err() {
                            // Controller is gone; nobody left to play audio.
                            return ConnectionOutcome::Shutdown;
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(payload))) => {
                        let _ = ws_tx.send(tungstenite::Message::Pong(payload)).await;
                    }
                    Some(Ok(tungstenite::Message::Pong(_))) => {}
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        let code = frame.as_ref().map(|f| u16::from(f.code));
                        info!("Channel closed by peer (code: {:?})", code);
                        return ConnectionOutcome::Ended(code);
                    }
                    Some(Ok(_)) => {
                        // Raw continuation frames are handled by tungstenite.
                    }
                    Some(Err(err)) => {
                        warn!("Channel stream error: {}", err);
                        return ConnectionOutcome::Ended(None);
                    }
                    None => {
                        warn!("Channel ended without a close frame");
                        return ConnectionOutcome::Ended(None);
                    }
                }
            }
            frame = outbound_rx.recv() => {
                let frame = match frame {
                    Some(frame) => frame,
                    None => return ConnectionOutcome::Shutdown,
                };

                let result = match frame {
                    OutboundFrame::Binary(data) => {
                        debug!("Sending audio frame ({} bytes)", data.len());
                        ws_tx.send(tungstenite::Message::Binary(data)).await
                    }
                    OutboundFrame::Control(message) => {
                        send_control(&mut ws_tx, &message).await
                    }
                };

                if let Err(err) = result {
                    warn!("Failed to send frame: {}", err);
                    return ConnectionOutcome::Ended(None);
                }
            }
            _ = heartbeat.tick() => {
                debug!("Heartbeat ping");
                if let Err(err) = send_control(&mut ws_tx, &ControlMessage::Ping).await {
                    warn!("Heartbeat send failed: {}", err);
                    return ConnectionOutcome::Ended(None);
                }
            }
            _ = shutdown_rx.changed() => {
                let close_frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "client closing".into(),
                };
                let _ = ws_tx.send(tungstenite::Message::Close(Some(close_frame))).await;
                let _ = ws_tx.close().await;
                return ConnectionOutcome::Shutdown;
            }
        }
    }
}

async fn send_control(
    ws_tx: &mut WsSink,
    message: &ControlMessage,
) -> Result<(), tungstenite::Error> {
    match serde_json::to_string(message) {
        Ok(json) => ws_tx.send(tungstenite::Message::Text(json)).await,
        Err(err) => {
            warn!("Failed to serialize control message: {}", err);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delay_progression() {
        // 1s, 2s, 4s, 8s, 16s for the five allowed attempts.
        assert_eq!(reconnect_delay(0, 1000, 32_000), Duration::from_secs(1));
        assert_eq!(reconnect_delay(1, 1000, 32_000), Duration::from_secs(2));
        assert_eq!(reconnect_delay(2, 1000, 32_000), Duration::from_secs(4));
        assert_eq!(reconnect_delay(3, 1000, 32_000), Duration::from_secs(8));
        assert_eq!(reconnect_delay(4, 1000, 32_000), Duration::from_secs(16));
    }

    #[test]
    fn test_reconnect_delay_caps() {
        assert_eq!(reconnect_delay(5, 1000, 32_000), Duration::from_secs(32));
        assert_eq!(reconnect_delay(40, 1000, 32_000), Duration::from_secs(32));
    }

    #[test]
    fn test_close_code_classification() {
        assert_eq!(classify_close(Some(1000), false), CloseAction::Silent);
        assert_eq!(classify_close(Some(1001), false), CloseAction::Silent);
        assert_eq!(classify_close(Some(1005), false), CloseAction::Silent);
        assert_eq!(classify_close(Some(1006), false), CloseAction::Reconnect);
        assert_eq!(classify_close(Some(1011), false), CloseAction::Fatal);
        // Unknown codes are treated as unexpected and retried.
        assert_eq!(classify_close(Some(4000), false), CloseAction::Reconnect);
        // No close frame at all reads as a network-class failure.
        assert_eq!(classify_close(None, false), CloseAction::Reconnect);
    }

    #[test]
    fn test_manual_close_is_always_silent() {
        assert_eq!(classify_close(Some(1006), true), CloseAction::Silent);
        assert_eq!(classify_close(Some(1011), true), CloseAction::Silent);
        assert_eq!(classify_close(None, true), CloseAction::Silent);
    }

    #[test]
    fn test_control_message_wire_format() {
        assert_eq!(
            serde_json::to_string(&ControlMessage::Ping).unwrap(),
            r#"{"type":"ping"}"#
        );

        let resynth = ControlMessage::RequestResynthesis {
            reason: "empty segment".to_string(),
        };
        let json = serde_json::to_string(&resynth).unwrap();
        assert!(json.contains(r#""type":"request_resynthesis""#));
        assert!(json.contains("empty segment"));

        // Inbound formats from the server.
        let status: ControlMessage =
            serde_json::from_str(r#"{"type":"status","message":"connected"}"#).unwrap();
        assert_eq!(
            status,
            ControlMessage::Status {
                message: "connected".to_string()
            }
        );

        let pong: ControlMessage = serde_json::from_str(r#"{"type":"pong"}"#).unwrap();
        assert_eq!(pong, ControlMessage::Pong);
    }

    #[test]
    fn test_channel_url_carries_credentials() {
        let url = session_channel_url("wss://api.example.com/realtime", "s-1", "tok");
        assert_eq!(url, "wss://api.example.com/realtime?session_id=s-1&token=tok");

        let url = session_channel_url("wss://api.example.com/realtime?v=2", "s-1", "tok");
        assert_eq!(url, "wss://api.example.com/realtime?v=2&session_id=s-1&token=tok");
    }

    #[tokio::test]
    async fn test_handle_drops_frames_unless_open() {
        let config = crate::config::AppConfig::default().realtime;
        let mut channel = TransportChannel::new(config, "ws://unused".to_string());
        let handle = channel.handle();

        // Channel never connected: sends are dropped with a warning.
        assert!(!handle.send_binary(vec![1, 2, 3]));
        assert!(!handle.send_control(ControlMessage::Ping));

        // Once the run task would mark the state open, sends are queued.
        channel.shared.set_state(ConnectionState::Connecting);
        channel.shared.set_state(ConnectionState::Open);
        assert!(handle.send_binary(vec![1, 2, 3]));

        let mut rx = channel.outbound_rx.take().unwrap();
        match rx.recv().await {
            Some(OutboundFrame::Binary(data)) => assert_eq!(data, vec![1, 2, 3]),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reconnect_exhaustion_emits_one_fatal_event() {
        let mut config = crate::config::AppConfig::default().realtime;
        config.max_reconnect_attempts = 3;
        config.reconnect_base_delay_ms = 1;
        config.reconnect_max_delay_ms = 4;

        // Nothing listens on the discard port; every attempt is refused.
        let mut channel = TransportChannel::new(config, "ws://127.0.0.1:9".to_string());
        let handle = channel.handle();
        let (events_tx, mut events_rx) = mpsc::channel(16);
        channel.connect(events_tx).unwrap();

        match tokio::time::timeout(Duration::from_secs(10), events_rx.recv()).await {
            Ok(Some(TransportEvent::Fatal(AppError::ConnectionExhausted { attempts }))) => {
                assert_eq!(attempts, 3);
            }
            other => panic!("expected connection exhaustion, got {:?}", other),
        }

        // The run task has stopped retrying: state is closed and the event
        // stream ends with no further attempts.
        assert_eq!(handle.state(), ConnectionState::Closed);
        assert!(events_rx.recv().await.is_none());
    }

    #[test]
    fn test_segment_is_declared_audio() {
        let segment = AudioSegment::new(vec![0u8; 4]);
        assert_eq!(segment.kind, SegmentKind::Audio);
        assert_eq!(segment.len(), 4);
        assert!(!segment.is_empty());
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(ConnectionState::Open.as_str(), "open");
        assert_eq!(ConnectionState::Reconnecting.as_str(), "reconnecting");
    }
}
