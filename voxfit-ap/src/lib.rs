//! # voxfit audio playback validation (voxfit-ap)
//!
//! Matches a speech engine's output format to what an audio device accepts,
//! and checks end to end that a streaming synthesis service delivers audio
//! without device sample-format failures.
//!
//! **Architecture:** cpal device probing, rate-only format negotiation, rubato
//! resampling, ringbuf-fed output sessions, and a tokio harness that launches
//! the service and reads one streamed response.

pub mod audio;
pub mod error;
pub mod harness;
pub mod playback;

pub use error::{Error, Result};
pub use harness::{ChunkSink, Harness, HarnessOutcome, HarnessTimings};
pub use playback::{PlaybackController, PlaybackMode};
