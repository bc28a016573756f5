//! # voice-session-client
//!
//! Client for realtime voice sessions against a conversational-audio
//! backend: one persistent duplex WebSocket per session carries microphone
//! audio out and synthesized speech back, kept ordered and alive across
//! flaky networks.
//!
//! ## Architecture:
//! - **config**: layered configuration (config.toml + APP_ env vars)
//! - **error**: crate error type and taxonomy
//! - **api**: the two REST calls a session needs (create, best-effort end)
//! - **transport**: the duplex channel (framing, heartbeat, reconnection)
//! - **audio**: utterance capture and strictly-serial segment playback
//! - **session**: the controller that wires it all to a session lifecycle
//!
//! ## Ownership model:
//! Each shared resource has exactly one owner: the transport owns the
//! socket and its timers, the recorder owns the capture device, the
//! playback queue owns the output context, and the controller owns all
//! three plus the session record.

pub mod api;
pub mod audio;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;

pub use api::{ApiClient, Session, SessionParams};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use session::{SessionController, SessionPhase};
pub use transport::{
    AudioSegment, ConnectionState, ControlMessage, TransportChannel, TransportEvent,
    TransportHandle,
};
