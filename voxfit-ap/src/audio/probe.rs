//! Device capability probing
//!
//! Enumerates host audio devices and asks each output-capable device whether
//! it accepts a fixed set of candidate sample rates at mono / f32.
//!
//! A rejected rate is recorded as [`RateSupport::Unsupported`]; a query that
//! could not be answered is [`RateSupport::Unknown`]. Neither stops the probe
//! loop, so [`probe_device`] always covers every candidate rate.

use crate::audio::types::{AudioFormat, SampleRepr};
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// Candidate sample rates tested on every output device (Hz)
pub const CANDIDATE_RATES: [u32; 8] = [8000, 11025, 16000, 22050, 24000, 32000, 44100, 48000];

/// Channel count used for probing
pub const PROBE_CHANNELS: u16 = 1;

/// Sample representation used for probing
pub const PROBE_REPR: SampleRepr = SampleRepr::F32;

/// Snapshot of one device taken at enumeration time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    /// Position in the enumeration snapshot, stable within a session
    pub index: usize,
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub default_sample_rate: Option<u32>,
}

impl DeviceDescriptor {
    pub fn is_output(&self) -> bool {
        self.max_output_channels > 0
    }
}

/// Why a single format query did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    /// The device answered and refused the configuration
    Rejected(String),
    /// The query itself could not be performed
    Unavailable(String),
}

/// Per-rate probe result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RateSupport {
    Supported,
    Unsupported,
    Unknown,
}

/// One probed rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateProbe {
    pub rate: u32,
    pub support: RateSupport,
}

/// Probe results for one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityRecord {
    pub device_index: usize,

    /// Device default rate, reported separately from the probe loop
    pub default_sample_rate: Option<u32>,

    /// Channel count the rates were probed at
    pub probe_channels: u16,

    /// Sample representation the rates were probed at
    pub probe_repr: SampleRepr,

    /// Results in candidate order
    pub rates: Vec<RateProbe>,
}

impl CapabilityRecord {
    pub fn new(
        device_index: usize,
        default_sample_rate: Option<u32>,
        probe_channels: u16,
        probe_repr: SampleRepr,
        rates: Vec<RateProbe>,
    ) -> Self {
        Self {
            device_index,
            default_sample_rate,
            probe_channels,
            probe_repr,
            rates,
        }
    }

    /// Record for the standard probe configuration where exactly `supported`
    /// rates were accepted and every other candidate was refused
    pub fn from_supported(
        device_index: usize,
        default_sample_rate: Option<u32>,
        supported: &[u32],
    ) -> Self {
        let rates = CANDIDATE_RATES
            .iter()
            .map(|&rate| RateProbe {
                rate,
                support: if supported.contains(&rate) {
                    RateSupport::Supported
                } else {
                    RateSupport::Unsupported
                },
            })
            .collect();
        Self::new(device_index, default_sample_rate, PROBE_CHANNELS, PROBE_REPR, rates)
    }

    /// Result for `rate`; a rate that was never probed is `Unknown`
    pub fn support(&self, rate: u32) -> RateSupport {
        self.rates
            .iter()
            .find(|probe| probe.rate == rate)
            .map(|probe| probe.support)
            .unwrap_or(RateSupport::Unknown)
    }

    pub fn is_supported(&self, rate: u32) -> bool {
        self.support(rate) == RateSupport::Supported
    }

    /// Supported rates in ascending order
    pub fn supported_rates(&self) -> Vec<u32> {
        let mut rates: Vec<u32> = self
            .rates
            .iter()
            .filter(|probe| probe.support == RateSupport::Supported)
            .map(|probe| probe.rate)
            .collect();
        rates.sort_unstable();
        rates
    }

    /// True if at least one rate was confirmed supported
    pub fn has_probe_data(&self) -> bool {
        self.rates.iter().any(|probe| probe.support == RateSupport::Supported)
    }
}

/// Host audio subsystem as seen by the prober and the playback controller
pub trait OutputHost {
    /// All devices in the session snapshot
    fn devices(&self) -> Result<Vec<DeviceDescriptor>>;

    /// The host's default output device, if it is part of the snapshot
    fn default_output(&self) -> Option<DeviceDescriptor>;

    /// Ask whether `device_index` accepts `format` for output
    fn query_format(
        &self,
        device_index: usize,
        format: &AudioFormat,
    ) -> std::result::Result<(), ProbeFailure>;
}

/// Enumerate every device the host exposes
pub fn enumerate_devices(host: &dyn OutputHost) -> Result<Vec<DeviceDescriptor>> {
    let devices = host.devices()?;
    debug!("Found {} devices", devices.len());
    Ok(devices)
}

/// Default output device, retrieved outside the probe loop
pub fn default_output_device(host: &dyn OutputHost) -> Option<DeviceDescriptor> {
    host.default_output()
}

/// Probe `candidate_rates` on one device at mono / f32 / output.
///
/// Never fails. The default sample rate is looked up from the device
/// snapshot; if enumeration itself fails it is left unknown.
pub fn probe_device(
    host: &dyn OutputHost,
    device_index: usize,
    candidate_rates: &[u32],
) -> CapabilityRecord {
    let default_sample_rate = host
        .devices()
        .ok()
        .and_then(|devices| devices.into_iter().find(|d| d.index == device_index))
        .and_then(|d| d.default_sample_rate);

    let rates = candidate_rates
        .iter()
        .map(|&rate| {
            let format = AudioFormat::new(rate, PROBE_CHANNELS, PROBE_REPR);
            let support = match host.query_format(device_index, &format) {
                Ok(()) => RateSupport::Supported,
                Err(ProbeFailure::Rejected(reason)) => {
                    debug!(device_index, rate, %reason, "Rate rejected");
                    RateSupport::Unsupported
                }
                Err(ProbeFailure::Unavailable(reason)) => {
                    debug!(device_index, rate, %reason, "Rate query failed");
                    RateSupport::Unknown
                }
            };
            RateProbe { rate, support }
        })
        .collect();

    CapabilityRecord::new(
        device_index,
        default_sample_rate,
        PROBE_CHANNELS,
        PROBE_REPR,
        rates,
    )
}

/// One device in the probe report
#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    pub descriptor: DeviceDescriptor,

    /// Present for output-capable devices only
    pub capability: Option<CapabilityRecord>,
}

/// Full device capability report
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub devices: Vec<DeviceReport>,
    pub default_output: Option<DeviceDescriptor>,
}

impl ProbeReport {
    /// Capability record for `device_index`, if it was probed
    pub fn capability(&self, device_index: usize) -> Option<&CapabilityRecord> {
        self.devices
            .iter()
            .find(|d| d.descriptor.index == device_index)
            .and_then(|d| d.capability.as_ref())
    }
}

/// Enumerate all devices and probe each output-capable one
pub fn probe_all(host: &dyn OutputHost) -> Result<ProbeReport> {
    let devices = enumerate_devices(host)?
        .into_iter()
        .map(|descriptor| {
            let capability = descriptor
                .is_output()
                .then(|| probe_device(host, descriptor.index, &CANDIDATE_RATES));
            DeviceReport {
                descriptor,
                capability,
            }
        })
        .collect();

    Ok(ProbeReport {
        devices,
        default_output: default_output_device(host),
    })
}

fn fmt_rate(rate: Option<u32>) -> String {
    rate.map(|r| r.to_string()).unwrap_or_else(|| "unknown".to_string())
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(80);
        writeln!(f, "Available Audio Devices:")?;
        writeln!(f, "{}", rule)?;

        for device in &self.devices {
            let d = &device.descriptor;
            writeln!(f)?;
            writeln!(f, "Device {}: {}", d.index, d.name)?;
            writeln!(f, "  Max Input Channels: {}", d.max_input_channels)?;
            writeln!(f, "  Max Output Channels: {}", d.max_output_channels)?;
            writeln!(f, "  Default Sample Rate: {}", fmt_rate(d.default_sample_rate))?;

            if let Some(capability) = &device.capability {
                writeln!(f, "  Supported sample rates for output:")?;
                let supported = capability.supported_rates();
                if supported.is_empty() {
                    writeln!(f, "    Unable to determine (device may not support querying)")?;
                } else {
                    let list: Vec<String> = supported.iter().map(u32::to_string).collect();
                    writeln!(f, "    {} Hz", list.join(", "))?;
                }
            }
        }

        writeln!(f)?;
        writeln!(f, "{}", rule)?;
        match &self.default_output {
            Some(d) => {
                writeln!(f, "Default Output Device: {}", d.name)?;
                write!(f, "Default Sample Rate: {}", fmt_rate(d.default_sample_rate))
            }
            None => write!(f, "Default Output Device: none"),
        }
    }
}

/// [`OutputHost`] backed by cpal's default host.
///
/// Devices are snapshotted once at construction so indices stay stable for
/// the life of this value.
pub struct CpalHost {
    host: cpal::Host,
    devices: Vec<cpal::Device>,
}

impl CpalHost {
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let devices: Vec<cpal::Device> = host
            .devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .collect();

        debug!("cpal host {:?}: {} devices", host.id(), devices.len());
        Ok(Self { host, devices })
    }

    /// Device handle by snapshot index
    pub fn device(&self, index: usize) -> Option<&cpal::Device> {
        self.devices.get(index)
    }

    fn describe(index: usize, device: &cpal::Device) -> DeviceDescriptor {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let max_output_channels = device
            .supported_output_configs()
            .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
            .unwrap_or(0);
        let max_input_channels = device
            .supported_input_configs()
            .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
            .unwrap_or(0);

        let default_sample_rate = device
            .default_output_config()
            .or_else(|_| device.default_input_config())
            .ok()
            .map(|c| c.sample_rate().0);

        DeviceDescriptor {
            index,
            name,
            max_input_channels,
            max_output_channels,
            default_sample_rate,
        }
    }
}

/// cpal sample format matching a representation, if cpal has one
pub fn cpal_sample_format(repr: SampleRepr) -> Option<cpal::SampleFormat> {
    match repr {
        SampleRepr::Float { bits: 32 } => Some(cpal::SampleFormat::F32),
        SampleRepr::Float { bits: 64 } => Some(cpal::SampleFormat::F64),
        SampleRepr::Int { bits: 16 } => Some(cpal::SampleFormat::I16),
        SampleRepr::Int { bits: 32 } => Some(cpal::SampleFormat::I32),
        _ => None,
    }
}

impl OutputHost for CpalHost {
    fn devices(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(self
            .devices
            .iter()
            .enumerate()
            .map(|(index, device)| Self::describe(index, device))
            .collect())
    }

    fn default_output(&self) -> Option<DeviceDescriptor> {
        let default = self.host.default_output_device()?;
        let default_name = default.name().ok()?;

        let found = self
            .devices
            .iter()
            .enumerate()
            .find(|(_, d)| d.name().ok().as_deref() == Some(default_name.as_str()))
            .map(|(index, device)| Self::describe(index, device));

        if found.is_none() {
            warn!("Default output device '{}' is not in the device snapshot", default_name);
        }
        found
    }

    fn query_format(
        &self,
        device_index: usize,
        format: &AudioFormat,
    ) -> std::result::Result<(), ProbeFailure> {
        let device = self
            .devices
            .get(device_index)
            .ok_or_else(|| ProbeFailure::Unavailable(format!("no device {}", device_index)))?;

        let sample_format = cpal_sample_format(format.repr).ok_or_else(|| {
            ProbeFailure::Rejected(format!("{} has no cpal equivalent", format.repr))
        })?;

        let mut configs = device
            .supported_output_configs()
            .map_err(|e| ProbeFailure::Unavailable(e.to_string()))?;

        let accepted = configs.any(|c| {
            c.channels() == format.channels
                && c.sample_format() == sample_format
                && c.min_sample_rate().0 <= format.sample_rate
                && c.max_sample_rate().0 >= format.sample_rate
        });

        if accepted {
            Ok(())
        } else {
            Err(ProbeFailure::Rejected(format!("Invalid sample rate {}", format.sample_rate)))
        }
    }
}
