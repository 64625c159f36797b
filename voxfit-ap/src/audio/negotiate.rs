//! Format negotiation between engine output and a device
//!
//! Only the sample rate is adaptable. A channel count or sample
//! representation that differs from what the device was probed at is a hard
//! failure: no channel mixing or bit-depth conversion happens here.

use crate::audio::probe::CapabilityRecord;
use crate::audio::types::AudioFormat;
use crate::error::{Error, Result};
use std::fmt;
use tracing::{debug, info};

/// How engine audio reaches the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Engine format accepted as-is
    Direct,
    /// Engine audio must be resampled
    Resample { from_rate: u32, to_rate: u32 },
}

/// Output format chosen for a device and the conversion needed to reach it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiationResult {
    pub format: AudioFormat,
    pub conversion: Conversion,
}

impl NegotiationResult {
    pub fn needs_resample(&self) -> bool {
        matches!(self.conversion, Conversion::Resample { .. })
    }
}

impl fmt::Display for NegotiationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.conversion {
            Conversion::Direct => write!(f, "direct {}", self.format),
            Conversion::Resample { from_rate, to_rate } => {
                write!(f, "resample {}Hz -> {}Hz ({})", from_rate, to_rate, self.format)
            }
        }
    }
}

/// Decide between direct playback and resampling.
///
/// Resample target, in order of preference:
/// 1. the device default rate, when it is confirmed supported or the record
///    holds no supported entry at all
/// 2. the lowest supported rate at or above the engine rate
/// 3. the highest supported rate
pub fn negotiate(engine: &AudioFormat, capability: &CapabilityRecord) -> Result<NegotiationResult> {
    let device_index = capability.device_index;

    if engine.channels != capability.probe_channels {
        return Err(Error::Negotiation {
            device_index,
            reason: format!(
                "engine has {} channels, device confirmed {} channels",
                engine.channels, capability.probe_channels
            ),
        });
    }
    if engine.repr != capability.probe_repr {
        return Err(Error::Negotiation {
            device_index,
            reason: format!(
                "engine emits {}, device confirmed {}",
                engine.repr, capability.probe_repr
            ),
        });
    }

    if capability.is_supported(engine.sample_rate) {
        debug!(device_index, rate = engine.sample_rate, "Engine rate supported");
        return Ok(NegotiationResult {
            format: *engine,
            conversion: Conversion::Direct,
        });
    }

    let target = select_target_rate(engine.sample_rate, capability).ok_or_else(|| {
        Error::Negotiation {
            device_index,
            reason: format!(
                "no supported rate and no default rate to resample {}Hz to",
                engine.sample_rate
            ),
        }
    })?;

    // Only reachable through an unprobed default equal to the engine rate
    if target == engine.sample_rate {
        info!(
            device_index,
            rate = target,
            "No probe data, engine rate equals device default"
        );
        return Ok(NegotiationResult {
            format: *engine,
            conversion: Conversion::Direct,
        });
    }

    info!(
        device_index,
        from = engine.sample_rate,
        to = target,
        "Engine rate unsupported, resampling"
    );
    Ok(NegotiationResult {
        format: engine.with_rate(target),
        conversion: Conversion::Resample {
            from_rate: engine.sample_rate,
            to_rate: target,
        },
    })
}

fn select_target_rate(native_rate: u32, capability: &CapabilityRecord) -> Option<u32> {
    if let Some(default) = capability.default_sample_rate {
        if capability.is_supported(default) || !capability.has_probe_data() {
            return Some(default);
        }
    }

    let supported = capability.supported_rates();
    supported
        .iter()
        .copied()
        .find(|&rate| rate >= native_rate)
        .or_else(|| supported.last().copied())
}
