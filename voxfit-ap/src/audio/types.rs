//! Core audio data types
//!
//! Defines the format descriptor and the buffer type passed between the
//! negotiator, resampler and playback controller.
//!
//! **Sample storage:** every buffer holds interleaved `f32` samples normalized
//! to [-1.0, 1.0], whatever the declared [`SampleRepr`]. The representation
//! describes what the producer emitted and what the device stream converts to.

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use voxfit_common::config::EngineConfig;

/// Sample representation: fixed-point or floating-point, with bit width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SampleRepr {
    /// Signed fixed-point PCM
    Int { bits: u16 },
    /// IEEE floating-point
    Float { bits: u16 },
}

impl SampleRepr {
    pub const F32: SampleRepr = SampleRepr::Float { bits: 32 };
    pub const I16: SampleRepr = SampleRepr::Int { bits: 16 };
    pub const I24: SampleRepr = SampleRepr::Int { bits: 24 };

    pub fn bits(&self) -> u16 {
        match self {
            SampleRepr::Int { bits } | SampleRepr::Float { bits } => *bits,
        }
    }

    /// Clip a sample symmetrically to the representation's numeric limits
    pub fn clip(&self, sample: f32) -> f32 {
        sample.clamp(-1.0, 1.0)
    }

    /// Snap a normalized sample onto this representation's value grid
    ///
    /// Fixed-point formats round to the nearest step of `1 / (2^(bits-1) - 1)`.
    /// Float formats only clip.
    pub fn quantize(&self, sample: f32) -> f32 {
        let clipped = self.clip(sample);
        match self {
            SampleRepr::Int { bits } => {
                let max = ((1i64 << (bits - 1)) - 1) as f64;
                ((clipped as f64 * max).round() / max) as f32
            }
            SampleRepr::Float { .. } => clipped,
        }
    }
}

impl fmt::Display for SampleRepr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleRepr::Int { bits } => write!(f, "i{}", bits),
            SampleRepr::Float { bits } => write!(f, "f{}", bits),
        }
    }
}

impl FromStr for SampleRepr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "f32" | "float32" => Ok(SampleRepr::Float { bits: 32 }),
            "f64" | "float64" => Ok(SampleRepr::Float { bits: 64 }),
            "i16" | "int16" | "s16" => Ok(SampleRepr::Int { bits: 16 }),
            "i24" | "int24" | "s24" => Ok(SampleRepr::Int { bits: 24 }),
            "i32" | "int32" | "s32" => Ok(SampleRepr::Int { bits: 32 }),
            other => Err(Error::Config(voxfit_common::Error::InvalidInput(format!(
                "Unknown sample format: {}",
                other
            )))),
        }
    }
}

/// Sample rate, channel count and sample representation.
///
/// Two formats are compatible only when all three fields match exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Channel count
    pub channels: u16,

    /// Sample representation
    pub repr: SampleRepr,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16, repr: SampleRepr) -> Self {
        Self {
            sample_rate,
            channels,
            repr,
        }
    }

    /// Mono 32-bit float, the configuration used for capability probing
    pub fn mono_f32(sample_rate: u32) -> Self {
        Self::new(sample_rate, 1, SampleRepr::F32)
    }

    /// Same format at a different rate
    pub fn with_rate(&self, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            ..*self
        }
    }

    /// Same format with a different sample representation
    pub fn with_repr(&self, repr: SampleRepr) -> Self {
        Self { repr, ..*self }
    }

    /// Reject zero rates and zero channel counts
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::InvalidState("sample rate must be positive".to_string()));
        }
        if self.channels == 0 {
            return Err(Error::InvalidState("channel count must be positive".to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz/{}ch/{}", self.sample_rate, self.channels, self.repr)
    }
}

impl TryFrom<&EngineConfig> for AudioFormat {
    type Error = Error;

    fn try_from(config: &EngineConfig) -> Result<Self> {
        let format = AudioFormat::new(
            config.sample_rate,
            config.channels,
            config.sample_format.parse()?,
        );
        format.validate()?;
        Ok(format)
    }
}

/// Interleaved PCM samples tagged with the format they were produced in.
///
/// Pipeline stages take a buffer by value and hand back a new one; a buffer
/// is never modified after it has been passed downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    format: AudioFormat,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, format: AudioFormat) -> Self {
        Self { samples, format }
    }

    /// All-zero buffer of `frames` frames
    pub fn silence(format: AudioFormat, frames: usize) -> Self {
        Self::new(vec![0.0; frames * format.channels as usize], format)
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.format.channels.max(1) as usize
    }

    /// Get duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        (self.frames() as u64 * 1000) / self.format.sample_rate.max(1) as u64
    }
}
