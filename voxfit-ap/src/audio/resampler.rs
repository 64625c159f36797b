//! Audio resampling using rubato
//!
//! Converts engine audio to the rate chosen by negotiation.
//!
//! Two modes:
//! - [`resample`] / [`resample_with`]: stateless, one buffer in, one buffer out,
//!   output length exactly `round(frames * to_rate / from_rate)`.
//! - [`StatefulResampler`]: filter state carried across chunks of a live
//!   stream. Owned by a single playback session and dropped with it.
//!
//! Both use a band-limited sinc interpolator and compensate the filter delay,
//! so output sample `n` lines up with input time `n / to_rate`.

use crate::audio::types::{AudioBuffer, SampleRepr};
use crate::error::{Error, Result};
use rubato::{
    Resampler as RubatoResampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};
use tracing::{debug, trace};

/// Input frames handed to rubato per call
pub const CHUNK_FRAMES: usize = 1024;

/// Options for [`resample_with`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ResampleOptions {
    /// Convert to this representation; None keeps the input's
    pub target_repr: Option<SampleRepr>,
}

/// Resample `buffer` to `to_rate`, keeping channel count and representation.
///
/// Precondition: `buffer.format().sample_rate != to_rate`.
pub fn resample(buffer: AudioBuffer, to_rate: u32) -> Result<AudioBuffer> {
    resample_with(buffer, to_rate, ResampleOptions::default())
}

/// Resample `buffer` to `to_rate`, converting representation only if asked.
pub fn resample_with(
    buffer: AudioBuffer,
    to_rate: u32,
    options: ResampleOptions,
) -> Result<AudioBuffer> {
    let format = buffer.format();
    let from_rate = format.sample_rate;

    if from_rate == to_rate {
        return Err(Error::Resample(format!(
            "Buffer already at {}Hz, nothing to resample",
            to_rate
        )));
    }
    if from_rate == 0 || to_rate == 0 {
        return Err(Error::Resample(format!(
            "Invalid rate pair {}Hz -> {}Hz",
            from_rate, to_rate
        )));
    }
    validate_samples(buffer.samples(), format.channels)?;

    let channels = format.channels as usize;
    let input_frames = buffer.frames();
    let expected_frames = expected_output_frames(input_frames, from_rate, to_rate);

    debug!(
        "Resampling {} frames from {}Hz to {}Hz ({} channels)",
        input_frames, from_rate, to_rate, channels
    );

    let planar_input = deinterleave(buffer.samples(), format.channels);
    let mut resampler = create_resampler(from_rate, to_rate, channels)?;
    let delay = resampler.output_delay();
    let needed = delay + expected_frames;

    let mut planar_output: Vec<Vec<f32>> = vec![Vec::with_capacity(needed); channels];
    let mut pos = 0;

    while input_frames - pos >= resampler.input_frames_next() {
        let n = resampler.input_frames_next();
        let slices: Vec<&[f32]> = planar_input.iter().map(|ch| &ch[pos..pos + n]).collect();
        let chunk = resampler
            .process(&slices, None)
            .map_err(|e| Error::Resample(format!("Resampling failed: {}", e)))?;
        append_planar(&mut planar_output, chunk);
        pos += n;
    }

    if pos < input_frames {
        let slices: Vec<&[f32]> = planar_input.iter().map(|ch| &ch[pos..]).collect();
        let chunk = resampler
            .process_partial(Some(slices.as_slice()), None)
            .map_err(|e| Error::Resample(format!("Resampling failed: {}", e)))?;
        append_planar(&mut planar_output, chunk);
    }

    // Drain the filter until the delayed tail is out
    while planar_output[0].len() < needed {
        let none: Option<&[Vec<f32>]> = None;
        let chunk = resampler
            .process_partial(none, None)
            .map_err(|e| Error::Resample(format!("Resampling flush failed: {}", e)))?;
        if chunk.first().map_or(true, |ch| ch.is_empty()) {
            break;
        }
        append_planar(&mut planar_output, chunk);
    }

    for channel in planar_output.iter_mut() {
        channel.drain(..delay.min(channel.len()));
        channel.resize(expected_frames, 0.0);
    }

    let repr = options.target_repr.unwrap_or(format.repr);
    let samples = finish_samples(interleave(planar_output), repr);

    debug!(
        "Resampled {} input frames to {} output frames",
        input_frames, expected_frames
    );

    Ok(AudioBuffer::new(
        samples,
        format.with_rate(to_rate).with_repr(repr),
    ))
}

/// Output frame count for `input_frames` resampled from `from_rate` to `to_rate`
pub fn expected_output_frames(input_frames: usize, from_rate: u32, to_rate: u32) -> usize {
    (input_frames as f64 * to_rate as f64 / from_rate as f64).round() as usize
}

/// Resampler for a live stream of chunks.
///
/// Keeps rubato's filter state between calls so chunk boundaries do not
/// produce discontinuities. Input that does not fill a whole rubato chunk is
/// held until the next call or [`flush`](Self::flush).
pub struct StatefulResampler {
    /// None in pass-through mode (equal rates)
    inner: Option<SincFixedIn<f32>>,
    from_rate: u32,
    to_rate: u32,
    channels: usize,
    /// Planar input not yet handed to rubato
    pending: Vec<Vec<f32>>,
    /// Leading filter-delay frames still to discard
    delay_remaining: usize,
    frames_in: u64,
    frames_out: u64,
    finished: bool,
}

impl StatefulResampler {
    /// Create a streaming resampler.
    ///
    /// Equal rates select pass-through mode.
    pub fn new(from_rate: u32, to_rate: u32, channels: u16, chunk_size: usize) -> Result<Self> {
        if from_rate == 0 || to_rate == 0 || channels == 0 || chunk_size == 0 {
            return Err(Error::Resample(format!(
                "Invalid streaming resampler parameters: {}Hz -> {}Hz, {} channels, chunk {}",
                from_rate, to_rate, channels, chunk_size
            )));
        }

        let inner = if from_rate == to_rate {
            None
        } else {
            Some(create_resampler_with_chunk(
                from_rate,
                to_rate,
                channels as usize,
                chunk_size,
            )?)
        };
        let delay_remaining = inner.as_ref().map_or(0, |r| r.output_delay());

        Ok(Self {
            inner,
            from_rate,
            to_rate,
            channels: channels as usize,
            pending: vec![Vec::new(); channels as usize],
            delay_remaining,
            frames_in: 0,
            frames_out: 0,
            finished: false,
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Feed interleaved samples, get back whatever output is ready
    pub fn process_chunk(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        if self.finished {
            return Err(Error::InvalidState(
                "Streaming resampler already flushed".to_string(),
            ));
        }
        validate_samples(input, self.channels as u16)?;

        let Some(resampler) = self.inner.as_mut() else {
            self.frames_in += (input.len() / self.channels) as u64;
            self.frames_out = self.frames_in;
            return Ok(input.to_vec());
        };

        for (ch, samples) in deinterleave(input, self.channels as u16).into_iter().enumerate() {
            self.pending[ch].extend(samples);
        }
        self.frames_in += (input.len() / self.channels) as u64;

        let mut output: Vec<Vec<f32>> = vec![Vec::new(); self.channels];
        while self.pending[0].len() >= resampler.input_frames_next() {
            let n = resampler.input_frames_next();
            let chunk = {
                let slices: Vec<&[f32]> = self.pending.iter().map(|ch| &ch[..n]).collect();
                resampler
                    .process(&slices, None)
                    .map_err(|e| Error::Resample(format!("Resampling failed: {}", e)))?
            };
            for ch in self.pending.iter_mut() {
                ch.drain(..n);
            }
            append_planar(&mut output, chunk);
        }

        Ok(self.emit(output, None))
    }

    /// Process held input and drain the filter.
    ///
    /// After flushing, the total output across all calls is
    /// `round(total_input_frames * to_rate / from_rate)` frames.
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        if self.finished {
            return Ok(Vec::new());
        }
        self.finished = true;

        let Some(resampler) = self.inner.as_mut() else {
            return Ok(Vec::new());
        };

        let total_expected =
            expected_output_frames(self.frames_in as usize, self.from_rate, self.to_rate) as u64;
        let mut output: Vec<Vec<f32>> = vec![Vec::new(); self.channels];

        if !self.pending[0].is_empty() {
            let chunk = {
                let slices: Vec<&[f32]> = self.pending.iter().map(|ch| ch.as_slice()).collect();
                resampler
                    .process_partial(Some(slices.as_slice()), None)
                    .map_err(|e| Error::Resample(format!("Resampling flush failed: {}", e)))?
            };
            for ch in self.pending.iter_mut() {
                ch.clear();
            }
            append_planar(&mut output, chunk);
        }

        loop {
            let available = output[0].len().saturating_sub(self.delay_remaining) as u64;
            if self.frames_out + available >= total_expected {
                break;
            }
            let none: Option<&[Vec<f32>]> = None;
            let chunk = resampler
                .process_partial(none, None)
                .map_err(|e| Error::Resample(format!("Resampling flush failed: {}", e)))?;
            if chunk.first().map_or(true, |ch| ch.is_empty()) {
                break;
            }
            append_planar(&mut output, chunk);
        }

        let remaining = total_expected.saturating_sub(self.frames_out) as usize;
        trace!(remaining, "Flushing streaming resampler");
        Ok(self.emit(output, Some(remaining)))
    }

    /// Drop leading delay, optionally cap length, interleave and clip
    fn emit(&mut self, mut planar: Vec<Vec<f32>>, limit: Option<usize>) -> Vec<f32> {
        let skip = self.delay_remaining.min(planar[0].len());
        for channel in planar.iter_mut() {
            channel.drain(..skip);
            if let Some(limit) = limit {
                channel.truncate(limit);
            }
        }
        self.delay_remaining -= skip;
        self.frames_out += planar[0].len() as u64;

        interleave(planar)
            .into_iter()
            .map(|s| s.clamp(-1.0, 1.0))
            .collect()
    }
}

/// Create the band-limited sinc resampler used by both modes
fn create_resampler(from_rate: u32, to_rate: u32, channels: usize) -> Result<SincFixedIn<f32>> {
    create_resampler_with_chunk(from_rate, to_rate, channels, CHUNK_FRAMES)
}

fn create_resampler_with_chunk(
    from_rate: u32,
    to_rate: u32,
    channels: usize,
    chunk_size: usize,
) -> Result<SincFixedIn<f32>> {
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    SincFixedIn::<f32>::new(
        to_rate as f64 / from_rate as f64,
        1.0,
        params,
        chunk_size,
        channels,
    )
    .map_err(|e| Error::Resample(format!("Failed to create resampler: {}", e)))
}

/// Reject empty, ragged or non-finite input
fn validate_samples(samples: &[f32], channels: u16) -> Result<()> {
    if channels == 0 {
        return Err(Error::Resample("Buffer has zero channels".to_string()));
    }
    if samples.is_empty() {
        return Err(Error::Resample("Empty input buffer".to_string()));
    }
    if samples.len() % channels as usize != 0 {
        return Err(Error::Resample(format!(
            "{} samples is not a whole number of {}-channel frames",
            samples.len(),
            channels
        )));
    }
    if let Some(pos) = samples.iter().position(|s| !s.is_finite()) {
        return Err(Error::Resample(format!(
            "Non-finite sample at index {}",
            pos
        )));
    }
    Ok(())
}

/// Clip, then snap to the representation's grid
fn finish_samples(samples: Vec<f32>, repr: SampleRepr) -> Vec<f32> {
    samples.into_iter().map(|s| repr.quantize(s)).collect()
}

fn append_planar(dst: &mut [Vec<f32>], src: Vec<Vec<f32>>) {
    for (d, s) in dst.iter_mut().zip(src) {
        d.extend(s);
    }
}

/// Convert interleaved samples to planar format.
///
/// Input:  [L, R, L, R, L, R, ...]
/// Output: [[L, L, L, ...], [R, R, R, ...]]
fn deinterleave(samples: &[f32], channels: u16) -> Vec<Vec<f32>> {
    let num_channels = channels as usize;
    let num_frames = samples.len() / num_channels;

    let mut planar = vec![Vec::with_capacity(num_frames); num_channels];

    for frame in samples.chunks_exact(num_channels) {
        for (ch_idx, &sample) in frame.iter().enumerate() {
            planar[ch_idx].push(sample);
        }
    }

    planar
}

/// Convert planar samples to interleaved format.
///
/// Input:  [[L, L, L, ...], [R, R, R, ...]]
/// Output: [L, R, L, R, L, R, ...]
fn interleave(planar: Vec<Vec<f32>>) -> Vec<f32> {
    if planar.is_empty() {
        return Vec::new();
    }

    let num_channels = planar.len();
    let num_frames = planar[0].len();
    let mut interleaved = Vec::with_capacity(num_frames * num_channels);

    for frame_idx in 0..num_frames {
        for channel in &planar {
            interleaved.push(channel[frame_idx]);
        }
    }

    interleaved
}
