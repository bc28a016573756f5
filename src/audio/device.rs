//! # Capture Device Abstraction
//!
//! The recorder never touches a platform microphone API directly; it talks to
//! a [`CaptureDevice`], which produces raw PCM chunks on a fixed timeslice
//! over a channel. Implementations:
//!
//! - Platform microphone backends (host-supplied)
//! - [`WavFileDevice`]: streams a WAV file as timed chunks, used by the demo
//!   binary and by tests
//!
//! Exactly one component (the recorder) owns the device at a time; no other
//! code path reaches it.

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use byteorder::{LittleEndian, WriteBytesExt};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Fixed capture parameters requested from the device.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Target sample rate in Hz (16 kHz)
    pub sample_rate: u32,

    /// Channel count (mono)
    pub channels: u16,

    /// Timeslice between chunk deliveries, in milliseconds (100-250ms)
    pub chunk_interval_ms: u64,

    /// Request acoustic echo cancellation from the device
    pub echo_cancellation: bool,

    /// Request noise suppression from the device
    pub noise_suppression: bool,
}

impl CaptureConfig {
    pub fn from_audio_config(audio: &crate::config::AudioConfig) -> Self {
        Self {
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            chunk_interval_ms: audio.chunk_interval_ms,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }

    /// Bytes of 16-bit PCM covering one chunk timeslice.
    pub fn chunk_bytes(&self) -> usize {
        let bytes_per_second = self.sample_rate as usize * self.channels as usize * 2;
        (bytes_per_second * self.chunk_interval_ms as usize) / 1000
    }
}

/// A source of microphone-style PCM chunks.
///
/// `start` acquires the underlying device and returns the chunk stream;
/// chunks arrive in capture order and are never reordered. `stop` releases
/// the device; any in-flight chunk may still be delivered before the channel
/// closes, which is why the recorder waits a short grace window after
/// stopping. Implementations map an access-denied condition to
/// [`AppError::PermissionDenied`].
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn start(&mut self, config: &CaptureConfig) -> AppResult<mpsc::Receiver<Vec<u8>>>;

    async fn stop(&mut self);

    /// Suspend chunk production without releasing the device or losing
    /// position (app backgrounded).
    fn pause(&mut self);

    /// Resume chunk production after a pause (app foregrounded).
    fn resume(&mut self);
}

/// Streams a WAV file as timed PCM chunks.
///
/// Stands in for a live microphone in the demo binary: the file is read once
/// at `start`, converted to little-endian 16-bit PCM bytes, and delivered one
/// chunk per timeslice until exhausted or stopped.
pub struct WavFileDevice {
    path: PathBuf,
    cancel: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
}

impl WavFileDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cancel: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    fn read_pcm_bytes(&self) -> AppResult<Vec<u8>> {
        let mut reader = hound::WavReader::open(&self.path)
            .map_err(|e| AppError::Capture(format!("Failed to open {:?}: {}", self.path, e)))?;

        let spec = reader.spec();
        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(AppError::Capture(format!(
                "{:?}: expected 16-bit integer PCM, got {}-bit {:?}",
                self.path, spec.bits_per_sample, spec.sample_format
            )));
        }

        let mut bytes = Vec::new();
        for sample in reader.samples::<i16>() {
            let sample =
                sample.map_err(|e| AppError::Capture(format!("WAV read error: {}", e)))?;
            bytes
                .write_i16::<LittleEndian>(sample)
                .map_err(|e| AppError::Capture(format!("PCM encode error: {}", e)))?;
        }

        Ok(bytes)
    }
}

#[async_trait]
impl CaptureDevice for WavFileDevice {
    async fn start(&mut self, config: &CaptureConfig) -> AppResult<mpsc::Receiver<Vec<u8>>> {
        let pcm = self.read_pcm_bytes()?;
        debug!(
            "WAV device streaming {:?} ({} bytes) in {}ms chunks",
            self.path,
            pcm.len(),
            config.chunk_interval_ms
        );

        self.cancel.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(16);
        let chunk_bytes = config.chunk_bytes().max(2);
        let interval = Duration::from_millis(config.chunk_interval_ms);
        let cancel = self.cancel.clone();
        let paused = self.paused.clone();

        tokio::spawn(async move {
            let mut offset = 0;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            while offset < pcm.len() {
                ticker.tick().await;

                if cancel.load(Ordering::SeqCst) {
                    break;
                }
                if paused.load(Ordering::SeqCst) {
                    continue;
                }

                let end = (offset + chunk_bytes).min(pcm.len());
                if tx.send(pcm[offset..end].to_vec()).await.is_err() {
                    warn!("WAV device chunk receiver dropped");
                    break;
                }
                offset = end;
            }
        });

        Ok(rx)
    }

    async fn stop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    fn pause(&mut self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&mut self) {
        self.paused.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_bytes_matches_timeslice() {
        let config = CaptureConfig {
            sample_rate: 16_000,
            channels: 1,
            chunk_interval_ms: 200,
            echo_cancellation: true,
            noise_suppression: true,
        };
        // 16000 samples/s * 2 bytes * 0.2s = 6400 bytes per chunk.
        assert_eq!(config.chunk_bytes(), 6400);
    }

    #[tokio::test]
    async fn test_wav_device_streams_file_in_order() {
        let dir = std::env::temp_dir().join(format!("vsc-wav-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tone.wav");

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..1600i16 {
            writer.write_sample(i).unwrap();
        }
        writer.finalize().unwrap();

        let mut device = WavFileDevice::new(&path);
        let config = CaptureConfig {
            sample_rate: 16_000,
            channels: 1,
            chunk_interval_ms: 100,
            echo_cancellation: true,
            noise_suppression: true,
        };

        let mut rx = device.start(&config).await.unwrap();
        let mut received = Vec::new();
        while let Some(chunk) = rx.recv().await {
            received.extend_from_slice(&chunk);
        }

        // 1600 samples * 2 bytes, delivered in order.
        assert_eq!(received.len(), 3200);
        assert_eq!(&received[0..2], &0i16.to_le_bytes());
        assert_eq!(&received[2..4], &1i16.to_le_bytes());

        std::fs::remove_dir_all(&dir).ok();
    }
}
