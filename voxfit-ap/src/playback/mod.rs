//! Playback sessions and the engine-to-device pipeline

pub mod controller;
pub mod pipeline;
pub mod sink;

pub use controller::{PlaybackController, PlaybackMode, SessionState, SessionStats, StreamSession};
pub use pipeline::{run_pipeline, PipelineStats, PlaybackPipeline};
pub use sink::PlaybackSink;
