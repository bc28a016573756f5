//! # Playback Queue
//!
//! [`AudioPlaybackQueue`] owns the ordered queue of incoming audio segments
//! and drains it autonomously: callers only ever `enqueue`, never pull.
//! Playback is strictly FIFO and strictly serial: one segment is fully
//! resolved (played or skipped) before the next starts.
//!
//! ## Serial-playback guard:
//! The original single-threaded design used a bare "in-flight" boolean as a
//! lock. On a multithreaded runtime that is not enough, so the invariant is
//! enforced by an atomic drain guard plus a single-consumer drain task: at
//! most one drain task exists, and it is the only code that pops the queue.
//!
//! ## Bad segments:
//! An empty, undecodable, zero-duration or suspiciously-short segment is
//! never surfaced as an error. It is skipped without marking "speaking" and
//! a (throttled) `request_resynthesis` control message asks the backend to
//! resend the reply.

use crate::audio::sink::PlaybackSink;
use crate::config::AudioConfig;
use crate::transport::AudioSegment;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// What to do with a segment at the head of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentDisposition {
    /// Decodes to real audio; play it
    Play,

    /// Unusable; skip it and request resynthesis
    Skip(&'static str),
}

/// Decide whether a segment is playable.
///
/// `probed_duration` is `None` when the payload failed to decode at all.
/// A segment is skipped when it is empty, undecodable, decodes to a zero or
/// non-finite duration, or is suspiciously short (below `min_duration_secs`)
/// while also being small (below `min_bytes`).
pub fn segment_disposition(
    byte_len: usize,
    probed_duration: Option<f64>,
    min_duration_secs: f64,
    min_bytes: usize,
) -> SegmentDisposition {
    if byte_len == 0 {
        return SegmentDisposition::Skip("empty segment");
    }

    let duration = match probed_duration {
        Some(duration) => duration,
        None => return SegmentDisposition::Skip("undecodable segment"),
    };

    if !duration.is_finite() || duration <= 0.0 {
        return SegmentDisposition::Skip("zero-length audio");
    }

    if duration < min_duration_secs && byte_len < min_bytes {
        return SegmentDisposition::Skip("suspiciously short segment");
    }

    SegmentDisposition::Play
}

/// Coalesces resynthesis requests.
///
/// A burst of bad segments must not flood the backend: a request within the
/// cooldown window of the previous one is suppressed.
#[derive(Debug)]
pub struct ResynthesisThrottle {
    cooldown: Duration,
    last_request: Option<Instant>,
}

impl ResynthesisThrottle {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_request: None,
        }
    }

    /// Whether a request at `now` may go out; records it if so.
    pub fn allow(&mut self, now: Instant) -> bool {
        match self.last_request {
            Some(last) if now.duration_since(last) < self.cooldown => false,
            _ => {
                self.last_request = Some(now);
                true
            }
        }
    }
}

struct QueueShared {
    queue: Mutex<VecDeque<AudioSegment>>,

    /// True while a decode/playback cycle is in flight.
    speaking: AtomicBool,

    /// Drain guard: at most one drain task at a time.
    drain_active: AtomicBool,

    /// Bumped by `clear()`; a drain task that observes a stale generation
    /// abandons instead of touching segments enqueued after the clear.
    generation: AtomicU64,

    throttle: Mutex<ResynthesisThrottle>,
    resynth_tx: mpsc::Sender<String>,
    sink: Arc<dyn PlaybackSink>,
    min_duration_secs: f64,
    min_bytes: usize,
}

impl QueueShared {
    fn request_resynthesis(&self, reason: &str) {
        let allowed = self.throttle.lock().unwrap().allow(Instant::now());
        if allowed {
            debug!("Requesting resynthesis: {}", reason);
            if self.resynth_tx.try_send(reason.to_string()).is_err() {
                warn!("Resynthesis channel full or closed; request dropped");
            }
        } else {
            debug!("Resynthesis request suppressed by throttle: {}", reason);
        }
    }
}

/// Ordered, self-draining queue of received audio segments.
#[derive(Clone)]
pub struct AudioPlaybackQueue {
    shared: Arc<QueueShared>,
}

impl AudioPlaybackQueue {
    /// Build the queue around an output sink.
    ///
    /// Returns the queue and the receiver of resynthesis request reasons;
    /// the session controller bridges those onto the transport.
    pub fn new(sink: Arc<dyn PlaybackSink>, audio: &AudioConfig) -> (Self, mpsc::Receiver<String>) {
        let (resynth_tx, resynth_rx) = mpsc::channel(8);

        let shared = Arc::new(QueueShared {
            queue: Mutex::new(VecDeque::new()),
            speaking: AtomicBool::new(false),
            drain_active: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            throttle: Mutex::new(ResynthesisThrottle::new(Duration::from_millis(
                audio.resynthesis_cooldown_ms,
            ))),
            resynth_tx,
            sink,
            min_duration_secs: audio.min_segment_duration_ms as f64 / 1000.0,
            min_bytes: audio.min_segment_bytes,
        });

        (Self { shared }, resynth_rx)
    }

    /// Append a segment to the tail and make sure a drain is running.
    pub fn enqueue(&self, segment: AudioSegment) {
        self.shared.queue.lock().unwrap().push_back(segment);
        self.kick();
    }

    /// Whether a decode/playback cycle is currently in flight.
    pub fn is_speaking(&self) -> bool {
        self.shared.speaking.load(Ordering::SeqCst)
    }

    /// Number of segments waiting (not counting one mid-playback).
    pub fn len(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.lock().unwrap().is_empty()
    }

    /// Stop the current segment, drop everything queued, clear "speaking".
    ///
    /// Synchronous: does not wait for natural playback completion. The
    /// in-flight drain task observes the generation bump and abandons.
    pub fn clear(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.queue.lock().unwrap().clear();
        self.shared.sink.stop();
        self.shared.speaking.store(false, Ordering::SeqCst);
        debug!("Playback queue cleared");
    }

    /// Suspend the output context (app backgrounded).
    pub fn suspend(&self) {
        self.shared.sink.pause();
    }

    /// Resume the output context (app foregrounded).
    pub fn resume(&self) {
        self.shared.sink.resume();
    }

    fn kick(&self) {
        if self
            .shared
            .drain_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let shared = self.shared.clone();
            tokio::spawn(drain(shared));
        }
    }
}

/// The single consumer: pops and resolves segments one at a time.
async fn drain(shared: Arc<QueueShared>) {
    let mut generation = shared.generation.load(Ordering::SeqCst);

    loop {
        let segment = shared.queue.lock().unwrap().pop_front();

        let segment = match segment {
            Some(segment) => segment,
            None => {
                // Idle: release the guard, then re-check for an enqueue that
                // raced the release.
                shared.drain_active.store(false, Ordering::SeqCst);
                let raced = !shared.queue.lock().unwrap().is_empty()
                    && shared
                        .drain_active
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok();
                if raced {
                    generation = shared.generation.load(Ordering::SeqCst);
                    continue;
                }
                return;
            }
        };

        let current = shared.generation.load(Ordering::SeqCst);
        if current != generation {
            // Cleared while we held this segment; drop it and keep draining
            // whatever was enqueued after the clear.
            generation = current;
            continue;
        }

        let probed = if segment.is_empty() {
            None
        } else {
            shared.sink.probe(&segment.data).ok()
        };

        match segment_disposition(
            segment.len(),
            probed,
            shared.min_duration_secs,
            shared.min_bytes,
        ) {
            SegmentDisposition::Skip(reason) => {
                warn!(
                    "Skipping unplayable segment ({} bytes): {}",
                    segment.len(),
                    reason
                );
                shared.request_resynthesis(reason);
                // Straight on to the next segment, never marking "speaking".
                continue;
            }
            SegmentDisposition::Play => {
                shared.speaking.store(true, Ordering::SeqCst);
                if let Err(err) = shared.sink.play(segment.data).await {
                    warn!("Playback failed: {}", err);
                }
                let current = shared.generation.load(Ordering::SeqCst);
                if current == generation {
                    shared.speaking.store(false, Ordering::SeqCst);
                } else {
                    // clear() already reset "speaking"; don't fight it, but
                    // keep draining anything enqueued after the clear.
                    generation = current;
                }
            }
        }
    }
}
