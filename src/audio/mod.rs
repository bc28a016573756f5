//! # Audio Subsystem
//!
//! Capture and playback halves of the voice session:
//!
//! - [`device`]: the capture-device seam and the WAV-file device
//! - [`capture`]: utterance accumulation and finalize
//! - [`sink`]: the playback-output seam and the rodio device
//! - [`playback`]: the serial, self-draining segment queue
//!
//! The microphone is owned exclusively by the recorder and the output
//! context exclusively by the playback queue; nothing else touches either.

pub mod capture;
pub mod device;
pub mod playback;
pub mod sink;

pub use capture::{AudioCaptureRecorder, FinalizedUtterance};
pub use device::{CaptureConfig, CaptureDevice, WavFileDevice};
pub use playback::AudioPlaybackQueue;
pub use sink::{PlaybackSink, RodioSink};
