//! Audio formats, device probing, negotiation, resampling and output

pub mod decode;
pub mod negotiate;
pub mod output;
pub mod probe;
pub mod resampler;
pub mod types;

pub use decode::PcmChunkDecoder;
pub use negotiate::{negotiate, Conversion, NegotiationResult};
pub use output::{CpalOutput, OutputDevice, OutputStream};
pub use probe::{CapabilityRecord, CpalHost, OutputHost, ProbeReport, RateSupport};
pub use resampler::{resample, StatefulResampler};
pub use types::{AudioBuffer, AudioFormat, SampleRepr};
