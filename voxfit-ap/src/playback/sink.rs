//! Playback validation sink for streamed audio
//!
//! Decodes the response body chunk by chunk and pushes the audio through a
//! [`PlaybackPipeline`]. The pipeline opens on the first decoded buffer, so a
//! WAVE header can settle the engine format first.

use crate::audio::decode::PcmChunkDecoder;
use crate::audio::output::OutputDevice;
use crate::audio::probe::CapabilityRecord;
use crate::audio::types::AudioFormat;
use crate::error::{Error, Result};
use crate::harness::ChunkSink;
use crate::playback::controller::{PlaybackController, PlaybackMode};
use crate::playback::pipeline::{PipelineStats, PlaybackPipeline};
use tracing::{debug, warn};

/// [`ChunkSink`] that plays (or silently validates) streamed PCM
pub struct PlaybackSink<'a, D: OutputDevice> {
    /// Consumed when the pipeline opens
    controller: Option<&'a mut PlaybackController<D>>,
    capability: CapabilityRecord,
    mode: PlaybackMode,
    decoder: PcmChunkDecoder,
    pipeline: Option<PlaybackPipeline<'a, D::Stream>>,
    stats: Option<PipelineStats>,
}

impl<'a, D: OutputDevice> PlaybackSink<'a, D> {
    /// `engine` is the format assumed for a body without a WAVE header
    pub fn new(
        controller: &'a mut PlaybackController<D>,
        capability: CapabilityRecord,
        engine: AudioFormat,
        mode: PlaybackMode,
    ) -> Self {
        Self {
            controller: Some(controller),
            capability,
            mode,
            decoder: PcmChunkDecoder::new(engine),
            pipeline: None,
            stats: None,
        }
    }

    /// Pipeline report, available after [`ChunkSink::finish`]
    pub fn stats(&self) -> Option<PipelineStats> {
        self.stats
    }

    pub fn frames_decoded(&self) -> u64 {
        self.decoder.frames_decoded()
    }

    fn pipeline(&mut self, engine: AudioFormat) -> Result<&mut PlaybackPipeline<'a, D::Stream>> {
        if self.pipeline.is_none() {
            let controller = self.controller.take().ok_or_else(|| {
                Error::InvalidState("Playback sink already used".to_string())
            })?;
            let pipeline = PlaybackPipeline::open(controller, engine, &self.capability, self.mode)?;
            self.pipeline = Some(pipeline);
        }
        self.pipeline
            .as_mut()
            .ok_or_else(|| Error::InvalidState("Playback pipeline not open".to_string()))
    }
}

impl<'a, D: OutputDevice> ChunkSink for PlaybackSink<'a, D> {
    fn on_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let Some(buffer) = self.decoder.push(chunk)? else {
            return Ok(());
        };

        let pipeline = self.pipeline(buffer.format())?;
        match pipeline.push(buffer) {
            Err(Error::Resample(reason)) => {
                warn!("Skipping streamed buffer: {}", reason);
                Ok(())
            }
            other => other,
        }
    }

    fn finish(&mut self) -> Result<()> {
        if self.decoder.pending_bytes() > 0 {
            debug!(
                bytes = self.decoder.pending_bytes(),
                "Dropping trailing partial frame"
            );
        }

        match self.pipeline.take() {
            Some(pipeline) => {
                self.stats = Some(pipeline.finish()?);
            }
            None => debug!("Stream carried no decodable audio"),
        }
        Ok(())
    }
}
