//! # Utterance Capture
//!
//! [`AudioCaptureRecorder`] owns the microphone-side of a session: it starts
//! the capture device around each user utterance, accumulates the delivered
//! chunks in arrival order, and finalizes them into a single payload for the
//! transport.
//!
//! ## Concurrency rule:
//! At most one capture buffer is ever active. A second `start()` while a
//! recording is in flight is rejected, and the buffer is atomically swapped
//! to empty exactly once at finalize.

use crate::audio::device::{CaptureConfig, CaptureDevice};
use crate::config::AudioConfig;
use crate::error::{AppError, AppResult};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One finalized utterance, ready to send as a single binary frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedUtterance {
    /// All captured chunks concatenated in arrival order
    pub data: Vec<u8>,

    /// Set when the payload is below the minimum meaningful size; it is
    /// still sent, but recognition is unlikely to succeed
    pub likely_unrecognizable: bool,
}

/// Accumulates microphone chunks into one utterance at a time.
pub struct AudioCaptureRecorder {
    device: Box<dyn CaptureDevice>,
    config: CaptureConfig,
    finalize_grace: Duration,
    min_utterance_bytes: usize,

    /// The capture buffer for the current utterance. Chunks are appended in
    /// arrival order by the collector task and never reordered.
    buffer: Arc<Mutex<Vec<Vec<u8>>>>,

    collector: Option<tokio::task::JoinHandle<()>>,
    active: bool,
    paused: bool,
}

impl AudioCaptureRecorder {
    pub fn new(device: Box<dyn CaptureDevice>, audio: &AudioConfig) -> Self {
        Self {
            device,
            config: CaptureConfig::from_audio_config(audio),
            finalize_grace: Duration::from_millis(audio.finalize_grace_ms),
            min_utterance_bytes: audio.min_utterance_bytes,
            buffer: Arc::new(Mutex::new(Vec::new())),
            collector: None,
            active: false,
            paused: false,
        }
    }

    /// Whether a recording is currently in flight.
    pub fn is_recording(&self) -> bool {
        self.active
    }

    /// Acquire the microphone and begin accumulating chunks.
    ///
    /// Rejected while a previous recording is still active. The buffer is
    /// reset to empty before any chunk can arrive.
    pub async fn start(&mut self) -> AppResult<()> {
        if self.active {
            return Err(AppError::Session(
                "A recording is already active".to_string(),
            ));
        }

        self.buffer.lock().unwrap().clear();

        let mut chunks = self.device.start(&self.config).await?;
        debug!(
            "Capture started ({} Hz, {} ch, {}ms timeslice)",
            self.config.sample_rate, self.config.channels, self.config.chunk_interval_ms
        );

        let buffer = self.buffer.clone();
        self.collector = Some(tokio::spawn(async move {
            while let Some(chunk) = chunks.recv().await {
                buffer.lock().unwrap().push(chunk);
            }
        }));

        self.active = true;
        self.paused = false;
        Ok(())
    }

    /// Finalize the current utterance.
    ///
    /// Stops the device, allows a short grace window for in-flight chunk
    /// delivery, then concatenates all accumulated chunks preserving their
    /// original ordering. Returns `None` if nothing was captured (a no-op,
    /// not an error).
    pub async fn finalize(&mut self) -> AppResult<Option<FinalizedUtterance>> {
        if !self.active {
            return Err(AppError::Session("No active recording".to_string()));
        }

        self.device.stop().await;

        // Grace window: the device may deliver one last chunk after stop.
        if let Some(mut collector) = self.collector.take() {
            if tokio::time::timeout(self.finalize_grace, &mut collector)
                .await
                .is_err()
            {
                collector.abort();
            }
        }

        self.active = false;
        self.paused = false;

        // The one atomic swap-to-empty per utterance.
        let chunks = std::mem::take(&mut *self.buffer.lock().unwrap());
        let total_bytes: usize = chunks.iter().map(|c| c.len()).sum();

        if total_bytes == 0 {
            info!("Finalize with empty capture buffer; nothing to send");
            return Ok(None);
        }

        let mut data = Vec::with_capacity(total_bytes);
        for chunk in chunks {
            data.extend_from_slice(&chunk);
        }

        let likely_unrecognizable = data.len() < self.min_utterance_bytes;
        if likely_unrecognizable {
            warn!(
                "Utterance is only {} bytes (< {}); sending but flagging as likely unrecognizable",
                data.len(),
                self.min_utterance_bytes
            );
        } else {
            debug!("Utterance finalized: {} bytes", data.len());
        }

        Ok(Some(FinalizedUtterance {
            data,
            likely_unrecognizable,
        }))
    }

    /// Abandon the current recording without sending anything.
    ///
    /// Used by session teardown; discards the buffer.
    pub async fn abort(&mut self) {
        if !self.active {
            return;
        }

        self.device.stop().await;
        if let Some(collector) = self.collector.take() {
            collector.abort();
        }
        self.buffer.lock().unwrap().clear();
        self.active = false;
        self.paused = false;
        debug!("Recording aborted");
    }

    /// Suspend an active recording without discarding captured chunks
    /// (app backgrounded).
    pub fn pause(&mut self) {
        if self.active && !self.paused {
            self.device.pause();
            self.paused = true;
            debug!("Recording paused");
        }
    }

    /// Resume a paused recording (app foregrounded).
    pub fn resume(&mut self) {
        if self.active && self.paused {
            self.device.resume();
            self.paused = false;
            debug!("Recording resumed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// Delivers a fixed chunk script immediately, then closes the channel.
    struct ScriptedDevice {
        chunks: Vec<Vec<u8>>,
    }

    #[async_trait]
    impl CaptureDevice for ScriptedDevice {
        async fn start(&mut self, _config: &CaptureConfig) -> AppResult<mpsc::Receiver<Vec<u8>>> {
            let (tx, rx) = mpsc::channel(16);
            let chunks = self.chunks.clone();
            tokio::spawn(async move {
                for chunk in chunks {
                    if tx.send(chunk).await.is_err() {
                        break;
                    }
                }
            });
            Ok(rx)
        }

        async fn stop(&mut self) {}
        fn pause(&mut self) {}
        fn resume(&mut self) {}
    }

    /// Simulates the host refusing microphone access.
    struct DeniedDevice;

    #[async_trait]
    impl CaptureDevice for DeniedDevice {
        async fn start(&mut self, _config: &CaptureConfig) -> AppResult<mpsc::Receiver<Vec<u8>>> {
            Err(AppError::PermissionDenied("user declined".to_string()))
        }

        async fn stop(&mut self) {}
        fn pause(&mut self) {}
        fn resume(&mut self) {}
    }

    fn recorder_with(chunks: Vec<Vec<u8>>) -> AudioCaptureRecorder {
        let mut audio = crate::config::AppConfig::default().audio;
        audio.finalize_grace_ms = 50;
        AudioCaptureRecorder::new(Box::new(ScriptedDevice { chunks }), &audio)
    }

    #[tokio::test]
    async fn test_finalize_concatenates_in_arrival_order() {
        let a = vec![1u8; 600];
        let b = vec![2u8; 500];
        let c = vec![3u8; 400];
        let mut recorder = recorder_with(vec![a.clone(), b.clone(), c.clone()]);

        recorder.start().await.unwrap();
        let utterance = recorder.finalize().await.unwrap().unwrap();

        let mut expected = a;
        expected.extend(b);
        expected.extend(c);
        assert_eq!(utterance.data, expected);
        // 1500 bytes total: above the minimum, so no flag.
        assert!(!utterance.likely_unrecognizable);

        // Buffer is empty immediately after finalize.
        assert!(recorder.buffer.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_finalize_with_no_chunks_is_noop() {
        let mut recorder = recorder_with(vec![]);
        recorder.start().await.unwrap();
        assert!(recorder.finalize().await.unwrap().is_none());
        assert!(!recorder.is_recording());
    }

    #[tokio::test]
    async fn test_short_utterance_is_flagged_but_sent() {
        let mut recorder = recorder_with(vec![vec![7u8; 400]]);
        recorder.start().await.unwrap();
        let utterance = recorder.finalize().await.unwrap().unwrap();
        assert_eq!(utterance.data.len(), 400);
        assert!(utterance.likely_unrecognizable);
    }

    #[tokio::test]
    async fn test_concurrent_start_rejected() {
        let mut recorder = recorder_with(vec![vec![0u8; 10]]);
        recorder.start().await.unwrap();
        assert!(recorder.start().await.is_err());

        // After finalize, a fresh recording may begin.
        let _ = recorder.finalize().await.unwrap();
        assert!(recorder.start().await.is_ok());
    }

    #[tokio::test]
    async fn test_permission_denied_surfaces_immediately() {
        let audio = crate::config::AppConfig::default().audio;
        let mut recorder = AudioCaptureRecorder::new(Box::new(DeniedDevice), &audio);
        match recorder.start().await {
            Err(AppError::PermissionDenied(_)) => {}
            other => panic!("expected permission denial, got {:?}", other.map(|_| ())),
        }
        assert!(!recorder.is_recording());
    }

    #[tokio::test]
    async fn test_abort_discards_buffer() {
        let mut recorder = recorder_with(vec![vec![1u8; 100]]);
        recorder.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        recorder.abort().await;
        assert!(recorder.buffer.lock().unwrap().is_empty());
        assert!(!recorder.is_recording());
    }
}
