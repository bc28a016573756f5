//! # Session Controller
//!
//! Orchestrates one voice session end to end: creates the backend session
//! record, opens the transport channel, routes its events, and owns the
//! recorder and playback queue for the session's lifetime. The controller is
//! the single point where an escalated failure becomes a user-visible state;
//! everything below it either recovers internally or stays silent.
//!
//! ## Lifecycle:
//! `Idle → Creating → Connected → Ended`, with `Error` reachable from any
//! non-idle phase. `stop_session` is idempotent and tears down in a fixed
//! order: recording, playback queue, channel, then the best-effort end
//! notification (whose failure never blocks local teardown).

use crate::api::{ApiClient, Session, SessionParams};
use crate::audio::capture::AudioCaptureRecorder;
use crate::audio::device::CaptureDevice;
use crate::audio::playback::AudioPlaybackQueue;
use crate::audio::sink::PlaybackSink;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::transport::{
    session_channel_url, ControlMessage, TransportChannel, TransportEvent, TransportHandle,
};
use chrono::Utc;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// User-visible phase of the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionPhase {
    /// No session yet
    Idle,
    /// Backend session record being created / channel opening
    Creating,
    /// Channel open; conversation can happen
    Connected,
    /// Session ended by the user; resources released
    Ended,
    /// Unrecoverable failure; the user must start a new session
    Error(String),
}

impl SessionPhase {
    pub fn as_str(&self) -> &str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Creating => "creating",
            SessionPhase::Connected => "connected",
            SessionPhase::Ended => "ended",
            SessionPhase::Error(_) => "error",
        }
    }
}

/// Orchestrates transport, capture and playback for one session.
pub struct SessionController {
    config: AppConfig,
    api: ApiClient,
    phase: Arc<RwLock<SessionPhase>>,
    session: Arc<Mutex<Option<Session>>>,
    recorder: AudioCaptureRecorder,
    playback: AudioPlaybackQueue,
    transport: Option<TransportChannel>,
    transport_handle: Option<TransportHandle>,
    resynth_rx: Option<mpsc::Receiver<String>>,
    event_task: Option<tokio::task::JoinHandle<()>>,
    resynth_task: Option<tokio::task::JoinHandle<()>>,
}

impl SessionController {
    /// Assemble a controller around a capture device and an output sink.
    pub fn new(
        config: AppConfig,
        device: Box<dyn CaptureDevice>,
        sink: Arc<dyn PlaybackSink>,
    ) -> AppResult<Self> {
        let api = ApiClient::new(&config.api)?;
        let recorder = AudioCaptureRecorder::new(device, &config.audio);
        let (playback, resynth_rx) = AudioPlaybackQueue::new(sink, &config.audio);

        Ok(Self {
            config,
            api,
            phase: Arc::new(RwLock::new(SessionPhase::Idle)),
            session: Arc::new(Mutex::new(None)),
            recorder,
            playback,
            transport: None,
            transport_handle: None,
            resynth_rx: Some(resynth_rx),
            event_task: None,
            resynth_task: None,
        })
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase.read().unwrap().clone()
    }

    /// Whether synthesized speech is currently playing.
    pub fn is_speaking(&self) -> bool {
        self.playback.is_speaking()
    }

    /// Whether a user utterance is being recorded.
    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    fn set_phase(phase: &Arc<RwLock<SessionPhase>>, new_phase: SessionPhase) {
        let mut guard = phase.write().unwrap();
        if *guard != new_phase {
            debug!("Session phase: {} -> {}", guard.as_str(), new_phase.as_str());
            *guard = new_phase;
        }
    }

    /// Create the backend session record and open the channel.
    pub async fn start_session(&mut self, params: SessionParams) -> AppResult<()> {
        if self.phase() != SessionPhase::Idle {
            return Err(AppError::Session(format!(
                "Cannot start a session from phase '{}'",
                self.phase().as_str()
            )));
        }

        Self::set_phase(&self.phase, SessionPhase::Creating);

        let session = match self.api.create_session(&params).await {
            Ok(session) => session,
            Err(err) => {
                Self::set_phase(&self.phase, SessionPhase::Error(err.to_string()));
                return Err(err);
            }
        };

        let url = session_channel_url(
            &self.config.realtime.url,
            &session.id,
            &self.config.api.auth_token,
        );
        *self.session.lock().unwrap() = Some(session);

        let mut transport = TransportChannel::new(self.config.realtime.clone(), url);
        let handle = transport.handle();

        let (events_tx, events_rx) = mpsc::channel(64);
        transport.connect(events_tx)?;

        // Bridge the playback queue's resynthesis requests onto the channel.
        if let Some(mut resynth_rx) = self.resynth_rx.take() {
            let resynth_handle = handle.clone();
            self.resynth_task = Some(tokio::spawn(async move {
                while let Some(reason) = resynth_rx.recv().await {
                    resynth_handle.send_control(ControlMessage::RequestResynthesis { reason });
                }
            }));
        }

        self.event_task = Some(tokio::spawn(run_event_loop(
            self.phase.clone(),
            self.session.clone(),
            self.playback.clone(),
            events_rx,
        )));

        self.transport = Some(transport);
        self.transport_handle = Some(handle);
        Ok(())
    }

    /// Begin recording one user utterance.
    pub async fn start_recording(&mut self) -> AppResult<()> {
        if self.phase() != SessionPhase::Connected {
            return Err(AppError::Session(format!(
                "Cannot record in phase '{}'",
                self.phase().as_str()
            )));
        }

        match self.recorder.start().await {
            Ok(()) => Ok(()),
            Err(err) => {
                if err.is_fatal() {
                    // Microphone denial ends the session; there is no retry.
                    Self::set_phase(&self.phase, SessionPhase::Error(err.to_string()));
                }
                Err(err)
            }
        }
    }

    /// Finalize the current utterance and send it as one binary frame.
    pub async fn stop_recording(&mut self) -> AppResult<()> {
        let utterance = self.recorder.finalize().await?;

        let utterance = match utterance {
            Some(utterance) => utterance,
            None => return Ok(()), // nothing captured; a no-op by design
        };

        if utterance.likely_unrecognizable {
            info!(
                "Sending likely-unrecognizable utterance ({} bytes)",
                utterance.data.len()
            );
        }

        match &self.transport_handle {
            Some(handle) => {
                if !handle.send_binary(utterance.data) {
                    warn!("Utterance dropped; channel not open");
                }
                Ok(())
            }
            None => Err(AppError::Session("No open channel".to_string())),
        }
    }

    /// End the session and release every owned resource. Idempotent.
    ///
    /// Order matters: stop recording, flush playback, close the channel with
    /// the manual flag set (so no reconnect fires), then best-effort notify
    /// the backend. A failed notification is logged and never blocks
    /// teardown.
    pub async fn stop_session(&mut self) {
        match self.phase() {
            SessionPhase::Idle | SessionPhase::Ended => {
                debug!("stop_session: nothing to do");
                return;
            }
            _ => {}
        }

        self.recorder.abort().await;
        self.playback.clear();

        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.transport_handle = None;

        if let Some(task) = self.event_task.take() {
            task.abort();
        }
        if let Some(task) = self.resynth_task.take() {
            task.abort();
        }

        let session_id = {
            let mut session = self.session.lock().unwrap();
            if let Some(session) = session.as_mut() {
                session.ended_at = Some(Utc::now());
            }
            session.as_ref().map(|s| s.id.clone())
        };

        if let Some(id) = &session_id {
            self.api.end_session(id).await;
        }

        // The record is cleared from memory once the session is over.
        *self.session.lock().unwrap() = None;
        Self::set_phase(&self.phase, SessionPhase::Ended);
        info!("Session ended");
    }

    /// Host signal: the app moved to the background.
    ///
    /// An active recording is paused, not discarded.
    pub fn handle_suspend(&mut self) {
        debug!("Environment suspend");
        self.recorder.pause();
        self.playback.suspend();
    }

    /// Host signal: the app returned to the foreground.
    pub fn handle_resume(&mut self) {
        debug!("Environment resume");
        self.recorder.resume();
        self.playback.resume();
    }
}

/// Map transport events onto session state and the playback queue.
async fn run_event_loop(
    phase: Arc<RwLock<SessionPhase>>,
    session: Arc<Mutex<Option<Session>>>,
    playback: AudioPlaybackQueue,
    mut events_rx: mpsc::Receiver<TransportEvent>,
) {
    while let Some(event) = events_rx.recv().await {
        match event {
            TransportEvent::Connected => {
                if let Some(session) = session.lock().unwrap().as_mut() {
                    if session.started_at.is_none() {
                        session.started_at = Some(Utc::now());
                    }
                }
                SessionController::set_phase(&phase, SessionPhase::Connected);
            }
            TransportEvent::Reconnected => {
                info!("Channel recovered after an outage");
                SessionController::set_phase(&phase, SessionPhase::Connected);
            }
            TransportEvent::Segment(segment) => {
                playback.enqueue(segment);
            }
            TransportEvent::ServerError(message) => {
                error!("Session failed: {}", message);
                SessionController::set_phase(&phase, SessionPhase::Error(message));
            }
            TransportEvent::Fatal(err) => {
                error!("Session failed: {}", err);
                SessionController::set_phase(&phase, SessionPhase::Error(err.to_string()));
            }
            TransportEvent::Closed => {
                debug!("Channel closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::CaptureConfig;
    use crate::transport::AudioSegment;
    use async_trait::async_trait;

    struct NullDevice;

    #[async_trait]
    impl CaptureDevice for NullDevice {
        async fn start(&mut self, _config: &CaptureConfig) -> AppResult<mpsc::Receiver<Vec<u8>>> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
        async fn stop(&mut self) {}
        fn pause(&mut self) {}
        fn resume(&mut self) {}
    }

    struct NullSink;

    #[async_trait]
    impl PlaybackSink for NullSink {
        fn probe(&self, data: &[u8]) -> AppResult<f64> {
            Ok(data.len() as f64 / 1000.0)
        }
        async fn play(&self, _data: Vec<u8>) -> AppResult<()> {
            Ok(())
        }
        fn stop(&self) {}
        fn pause(&self) {}
        fn resume(&self) {}
    }

    fn controller() -> SessionController {
        SessionController::new(
            AppConfig::default(),
            Box::new(NullDevice),
            Arc::new(NullSink),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_recording_requires_connected_phase() {
        let mut controller = controller();
        assert_eq!(controller.phase(), SessionPhase::Idle);
        assert!(controller.start_recording().await.is_err());
    }

    #[tokio::test]
    async fn test_stop_session_is_idempotent() {
        let mut controller = controller();

        // Simulate an established session without touching the network.
        *controller.session.lock().unwrap() = Some(Session {
            id: "s-1".to_string(),
            scenario: "restaurant".to_string(),
            category: "daily_life".to_string(),
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            ended_at: None,
        });
        SessionController::set_phase(&controller.phase, SessionPhase::Connected);

        controller.stop_session().await;
        assert_eq!(controller.phase(), SessionPhase::Ended);
        assert!(controller.session.lock().unwrap().is_none());

        // Second call performs no further side effects and does not panic.
        controller.stop_session().await;
        assert_eq!(controller.phase(), SessionPhase::Ended);
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_a_noop() {
        let mut controller = controller();
        controller.stop_session().await;
        assert_eq!(controller.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_event_loop_routes_transport_events() {
        let phase = Arc::new(RwLock::new(SessionPhase::Creating));
        let session = Arc::new(Mutex::new(Some(Session {
            id: "s-2".to_string(),
            scenario: "travel".to_string(),
            category: "daily_life".to_string(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        })));
        let audio = AppConfig::default().audio;
        let (playback, _resynth_rx) = AudioPlaybackQueue::new(Arc::new(NullSink), &audio);

        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(run_event_loop(
            phase.clone(),
            session.clone(),
            playback.clone(),
            rx,
        ));

        tx.send(TransportEvent::Connected).await.unwrap();
        tx.send(TransportEvent::Segment(AudioSegment::new(vec![0u8; 2000])))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(*phase.read().unwrap(), SessionPhase::Connected);
        assert!(session.lock().unwrap().as_ref().unwrap().started_at.is_some());

        tx.send(TransportEvent::ServerError("model crashed".to_string()))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(
            *phase.read().unwrap(),
            SessionPhase::Error("model crashed".to_string())
        );

        drop(tx);
        let _ = task.await;
    }

    #[test]
    fn test_phase_labels() {
        assert_eq!(SessionPhase::Idle.as_str(), "idle");
        assert_eq!(SessionPhase::Error("x".to_string()).as_str(), "error");
    }
}
