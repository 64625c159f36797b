//! Engine-to-device playback pipeline
//!
//! Negotiates once per session, then feeds engine buffers through an optional
//! streaming resampler into a [`StreamSession`]. The resampler belongs to the
//! pipeline and is dropped with it.

use crate::audio::negotiate::{negotiate, NegotiationResult};
use crate::audio::output::{OutputDevice, OutputStream};
use crate::audio::probe::CapabilityRecord;
use crate::audio::resampler::{StatefulResampler, CHUNK_FRAMES};
use crate::audio::types::{AudioBuffer, AudioFormat};
use crate::error::{Error, Result};
use crate::playback::controller::{PlaybackController, PlaybackMode, SessionStats, StreamSession};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Summary of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub negotiation: NegotiationResult,
    /// Engine buffers accepted
    pub buffers_in: u64,
    /// Engine buffers dropped after a resample failure
    pub buffers_skipped: u64,
    /// Engine frames accepted
    pub frames_in: u64,
    pub session: SessionStats,
    pub cancelled: bool,
}

/// Open playback path from engine format to one device
pub struct PlaybackPipeline<'a, S: OutputStream> {
    session: StreamSession<'a, S>,
    engine: AudioFormat,
    negotiation: NegotiationResult,
    resampler: Option<StatefulResampler>,
    buffers_in: u64,
    buffers_skipped: u64,
    frames_in: u64,
}

impl<'a, S: OutputStream> PlaybackPipeline<'a, S> {
    /// Negotiate `engine` against `capability` and open a session on the result
    pub fn open<D>(
        controller: &'a mut PlaybackController<D>,
        engine: AudioFormat,
        capability: &CapabilityRecord,
        mode: PlaybackMode,
    ) -> Result<Self>
    where
        D: OutputDevice<Stream = S>,
    {
        engine.validate()?;
        let negotiation = negotiate(&engine, capability)?;

        let resampler = if negotiation.needs_resample() {
            Some(StatefulResampler::new(
                engine.sample_rate,
                negotiation.format.sample_rate,
                engine.channels,
                CHUNK_FRAMES,
            )?)
        } else {
            None
        };

        let session = controller.start(negotiation.format, mode)?;
        info!(%negotiation, ?mode, "Playback pipeline opened");

        Ok(Self {
            session,
            engine,
            negotiation,
            resampler,
            buffers_in: 0,
            buffers_skipped: 0,
            frames_in: 0,
        })
    }

    pub fn negotiation(&self) -> NegotiationResult {
        self.negotiation
    }

    pub fn engine_format(&self) -> AudioFormat {
        self.engine
    }

    /// Push one engine buffer.
    ///
    /// A resample failure is fatal to that buffer only: it is counted as
    /// skipped and the error returned, and the pipeline stays usable.
    pub fn push(&mut self, buffer: AudioBuffer) -> Result<()> {
        if buffer.format() != self.engine {
            return Err(Error::FormatMismatch {
                expected: self.engine,
                actual: buffer.format(),
            });
        }
        if buffer.is_empty() {
            return Ok(());
        }

        let frames = buffer.frames() as u64;
        let out = match self.resampler.as_mut() {
            None => buffer,
            Some(resampler) => match resampler.process_chunk(buffer.samples()) {
                Ok(samples) => self.to_device(samples),
                Err(e) => {
                    self.buffers_skipped += 1;
                    return Err(e);
                }
            },
        };

        self.buffers_in += 1;
        self.frames_in += frames;

        if out.is_empty() {
            // Resampler is still filling its first chunk
            return Ok(());
        }
        self.session.write(out)
    }

    /// Flush the resampler tail, close the session and report
    pub fn finish(mut self) -> Result<PipelineStats> {
        let tail = match self.resampler.as_mut() {
            Some(resampler) => resampler.flush()?,
            None => Vec::new(),
        };
        if !tail.is_empty() {
            let buffer = self.to_device(tail);
            self.session.write(buffer)?;
        }

        self.session.stop()?;
        let stats = self.stats(false);
        debug!(?stats, "Playback pipeline finished");
        Ok(stats)
    }

    /// Close the session without flushing
    pub fn cancel(mut self) -> PipelineStats {
        if let Err(e) = self.session.stop() {
            warn!("Error closing cancelled playback session: {}", e);
        }
        self.stats(true)
    }

    fn to_device(&self, samples: Vec<f32>) -> AudioBuffer {
        let format = self.negotiation.format;
        let samples = samples.into_iter().map(|s| format.repr.quantize(s)).collect();
        AudioBuffer::new(samples, format)
    }

    fn stats(&self, cancelled: bool) -> PipelineStats {
        PipelineStats {
            negotiation: self.negotiation,
            buffers_in: self.buffers_in,
            buffers_skipped: self.buffers_skipped,
            frames_in: self.frames_in,
            session: self.session.stats(),
            cancelled,
        }
    }
}

/// Play a sequence of engine buffers through `controller`.
///
/// `cancel` is checked between buffers. Buffers rejected by the resampler are
/// skipped; any other error stops the run. The session is closed on every
/// path.
pub fn run_pipeline<D, I>(
    controller: &mut PlaybackController<D>,
    engine: AudioFormat,
    capability: &CapabilityRecord,
    mode: PlaybackMode,
    buffers: I,
    cancel: &AtomicBool,
) -> Result<PipelineStats>
where
    D: OutputDevice,
    I: IntoIterator<Item = AudioBuffer>,
{
    let mut pipeline = PlaybackPipeline::open(controller, engine, capability, mode)?;

    for buffer in buffers {
        if cancel.load(Ordering::SeqCst) {
            info!("Playback cancelled");
            return Ok(pipeline.cancel());
        }
        match pipeline.push(buffer) {
            Ok(()) => {}
            Err(Error::Resample(reason)) => {
                warn!("Skipping buffer: {}", reason);
            }
            Err(e) => return Err(e),
        }
    }

    pipeline.finish()
}
