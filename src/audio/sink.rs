//! # Playback Output
//!
//! [`PlaybackSink`] is the seam between the playback queue and the host's
//! audio output. The queue probes a segment first (cheap decode to learn its
//! duration) and only then commits to playing it, so malformed or silent
//! segments never reach the output device.
//!
//! [`RodioSink`] is the real implementation: a dedicated thread owns the
//! rodio output stream (which is not `Send`), while the shared `Sink` handle
//! is controlled from async code.

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use rodio::Source;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Audio output abstraction for the playback queue.
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Decode the segment far enough to learn its duration in seconds.
    ///
    /// Errors mean the payload is not decodable audio. A non-finite or zero
    /// return is possible for degenerate streams and is treated as
    /// unplayable by the queue.
    fn probe(&self, data: &[u8]) -> AppResult<f64>;

    /// Play one segment to completion. Returns when playback finishes or is
    /// stopped.
    async fn play(&self, data: Vec<u8>) -> AppResult<()>;

    /// Forcibly stop the current playback. Must be synchronous and must not
    /// wait for natural completion.
    fn stop(&self);

    /// Suspend the output context (app backgrounded).
    fn pause(&self);

    /// Resume a suspended output context (app foregrounded).
    fn resume(&self);
}

/// Rodio-backed output device.
pub struct RodioSink {
    sink: Arc<rodio::Sink>,
}

impl RodioSink {
    /// Open the default output device.
    ///
    /// `rodio::OutputStream` is `!Send`, so a dedicated thread owns it for
    /// the sink's lifetime and hands back the controllable `Sink`.
    pub fn new() -> AppResult<Self> {
        let (tx, rx) = std::sync::mpsc::channel::<Result<Arc<rodio::Sink>, String>>();

        std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let (stream, handle) = match rodio::OutputStream::try_default() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = tx.send(Err(format!("No audio output device: {}", e)));
                        return;
                    }
                };

                let sink = match rodio::Sink::try_new(&handle) {
                    Ok(sink) => Arc::new(sink),
                    Err(e) => {
                        let _ = tx.send(Err(format!("Failed to open audio sink: {}", e)));
                        return;
                    }
                };

                if tx.send(Ok(sink)).is_err() {
                    return;
                }

                // The stream must stay alive as long as playback is possible.
                let _stream = stream;
                loop {
                    std::thread::park();
                }
            })
            .map_err(|e| AppError::Playback(format!("Failed to spawn audio thread: {}", e)))?;

        let sink = rx
            .recv()
            .map_err(|_| AppError::Playback("Audio thread exited unexpectedly".to_string()))?
            .map_err(AppError::Playback)?;

        Ok(Self { sink })
    }
}

#[async_trait]
impl PlaybackSink for RodioSink {
    fn probe(&self, data: &[u8]) -> AppResult<f64> {
        let decoder = rodio::Decoder::new(Cursor::new(data.to_vec()))
            .map_err(|e| AppError::Playback(format!("Undecodable segment: {}", e)))?;

        let sample_rate = decoder.sample_rate();
        let channels = decoder.channels();
        let sample_count = decoder.count();

        // A degenerate stream (zero rate or channels) divides to a non-finite
        // duration, which the queue treats as unplayable.
        let duration = sample_count as f64 / (sample_rate as u64 * channels as u64) as f64;
        debug!(
            "Probed segment: {} samples @ {} Hz -> {:.3}s",
            sample_count, sample_rate, duration
        );
        Ok(duration)
    }

    async fn play(&self, data: Vec<u8>) -> AppResult<()> {
        let decoder = rodio::Decoder::new(Cursor::new(data))
            .map_err(|e| AppError::Playback(format!("Undecodable segment: {}", e)))?;

        self.sink.append(decoder);

        // Poll for completion instead of sleep_until_end() so stop() can cut
        // playback short without blocking a runtime thread.
        while !self.sink.empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        Ok(())
    }

    fn stop(&self) {
        self.sink.stop();
    }

    fn pause(&self) {
        self.sink.pause();
    }

    fn resume(&self) {
        self.sink.play();
    }
}
