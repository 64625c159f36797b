//! Chunked PCM decoding of a streamed response body
//!
//! Chunk boundaries fall anywhere: inside the WAV header, or between the two
//! bytes of a sample. Bytes that cannot be decoded yet are carried to the next
//! [`push`](PcmChunkDecoder::push).
//!
//! A body starting with `RIFF` is parsed as WAVE and its `fmt ` chunk sets
//! rate, channels and encoding. Anything else is raw 16-bit little-endian PCM
//! in the engine format.

use crate::audio::types::{AudioBuffer, AudioFormat};
use crate::error::{Error, Result};
use tracing::debug;

const WAVE_FORMAT_PCM: u16 = 1;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 3;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Byte encoding of the sample data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmEncoding {
    /// Signed 16-bit little-endian
    Int16,
    /// IEEE float 32-bit little-endian
    Float32,
}

impl PcmEncoding {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            PcmEncoding::Int16 => 2,
            PcmEncoding::Float32 => 4,
        }
    }

    fn decode(&self, bytes: &[u8]) -> f32 {
        match self {
            PcmEncoding::Int16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32768.0,
            PcmEncoding::Float32 => {
                f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]).clamp(-1.0, 1.0)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Fewer than four bytes seen
    Detect,
    /// Inside RIFF chunks, before `data`
    Header,
    /// Sample data
    Data,
}

/// Incremental decoder for PCM arriving in arbitrary byte chunks
#[derive(Debug)]
pub struct PcmChunkDecoder {
    format: AudioFormat,
    encoding: PcmEncoding,
    stage: Stage,
    /// Undecoded bytes
    pending: Vec<u8>,
    /// RIFF container header (`RIFF`, size, `WAVE`) consumed
    riff_consumed: bool,
    saw_fmt: bool,
    frames_decoded: u64,
}

impl PcmChunkDecoder {
    /// Decoder for a stream whose raw samples are in `engine` format
    pub fn new(engine: AudioFormat) -> Self {
        Self {
            format: engine,
            encoding: PcmEncoding::Int16,
            stage: Stage::Detect,
            pending: Vec::new(),
            riff_consumed: false,
            saw_fmt: false,
            frames_decoded: 0,
        }
    }

    /// Format of decoded buffers. Settles once the header is parsed.
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn encoding(&self) -> PcmEncoding {
        self.encoding
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Bytes held back waiting for more input
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    /// Feed one chunk. Returns a buffer when whole frames became available.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<AudioBuffer>> {
        self.pending.extend_from_slice(chunk);

        if self.stage == Stage::Detect {
            if self.pending.len() < 4 {
                return Ok(None);
            }
            self.stage = if &self.pending[..4] == b"RIFF" {
                Stage::Header
            } else {
                Stage::Data
            };
        }

        if self.stage == Stage::Header && !self.parse_header()? {
            return Ok(None);
        }

        Ok(self.decode_frames())
    }

    /// Consume RIFF chunks up to `data`. False when more bytes are needed.
    fn parse_header(&mut self) -> Result<bool> {
        let mut pos = 0;

        if !self.riff_consumed {
            if self.pending.len() < 12 {
                return Ok(false);
            }
            if &self.pending[8..12] != b"WAVE" {
                return Err(Error::AudioOutput(
                    "RIFF stream is not WAVE".to_string(),
                ));
            }
            self.riff_consumed = true;
            pos = 12;
        }

        loop {
            let rest = &self.pending[pos..];
            if rest.len() < 8 {
                self.pending.drain(..pos);
                return Ok(false);
            }
            let id = [rest[0], rest[1], rest[2], rest[3]];
            let size = u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;

            if &id == b"data" {
                if !self.saw_fmt {
                    return Err(Error::AudioOutput(
                        "WAVE data chunk before fmt chunk".to_string(),
                    ));
                }
                // Streamed WAVs carry a placeholder data size; read to the end
                self.pending.drain(..pos + 8);
                self.stage = Stage::Data;
                debug!(format = %self.format, encoding = ?self.encoding, "WAVE header parsed");
                return Ok(true);
            }

            // Chunks are padded to even length
            let padded = size + (size & 1);
            if rest.len() < 8 + padded {
                self.pending.drain(..pos);
                return Ok(false);
            }

            if &id == b"fmt " {
                let body = rest[8..8 + size].to_vec();
                self.apply_fmt(&body)?;
            }
            pos += 8 + padded;
        }
    }

    fn apply_fmt(&mut self, body: &[u8]) -> Result<()> {
        if body.len() < 16 {
            return Err(Error::AudioOutput(format!(
                "WAVE fmt chunk too short: {} bytes",
                body.len()
            )));
        }
        let mut tag = u16::from_le_bytes([body[0], body[1]]);
        let channels = u16::from_le_bytes([body[2], body[3]]);
        let sample_rate = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
        let bits = u16::from_le_bytes([body[14], body[15]]);

        // WAVEFORMATEXTENSIBLE keeps the real tag at the start of the sub-format GUID
        if tag == WAVE_FORMAT_EXTENSIBLE && body.len() >= 26 {
            tag = u16::from_le_bytes([body[24], body[25]]);
        }

        self.encoding = match (tag, bits) {
            (WAVE_FORMAT_PCM, 16) => PcmEncoding::Int16,
            (WAVE_FORMAT_IEEE_FLOAT, 32) => PcmEncoding::Float32,
            _ => {
                return Err(Error::AudioOutput(format!(
                    "Unsupported WAVE encoding: format tag {}, {} bits",
                    tag, bits
                )))
            }
        };

        let format = AudioFormat::new(sample_rate, channels, self.format.repr);
        format.validate()?;
        self.format = format;
        self.saw_fmt = true;
        Ok(())
    }

    fn decode_frames(&mut self) -> Option<AudioBuffer> {
        let frame_bytes = self.encoding.bytes_per_sample() * self.format.channels as usize;
        let whole = self.pending.len() / frame_bytes * frame_bytes;
        if whole == 0 {
            return None;
        }

        let width = self.encoding.bytes_per_sample();
        let samples: Vec<f32> = self.pending[..whole]
            .chunks_exact(width)
            .map(|bytes| self.encoding.decode(bytes))
            .collect();
        self.pending.drain(..whole);

        let buffer = AudioBuffer::new(samples, self.format);
        self.frames_decoded += buffer.frames() as u64;
        Some(buffer)
    }
}
