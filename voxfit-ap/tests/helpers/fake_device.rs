//! In-memory audio host and output device
//!
//! Stand-ins for the cpal-backed implementations so probing, negotiation and
//! playback can be exercised without sound hardware.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use voxfit_ap::audio::output::{OutputDevice, OutputStream};
use voxfit_ap::audio::probe::{DeviceDescriptor, OutputHost, ProbeFailure, PROBE_CHANNELS, PROBE_REPR};
use voxfit_ap::audio::types::AudioFormat;
use voxfit_ap::error::{Error, Result};

/// Host with scripted devices and per-device accepted rates
#[derive(Default)]
pub struct FakeHost {
    devices: Vec<DeviceDescriptor>,
    accepted: HashMap<usize, Vec<u32>>,
    unavailable: HashSet<usize>,
    default_output: Option<usize>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an output device accepting `rates` at mono f32
    pub fn with_output(mut self, name: &str, default_rate: Option<u32>, rates: &[u32]) -> Self {
        let index = self.devices.len();
        self.devices.push(DeviceDescriptor {
            index,
            name: name.to_string(),
            max_input_channels: 0,
            max_output_channels: 2,
            default_sample_rate: default_rate,
        });
        self.accepted.insert(index, rates.to_vec());
        self
    }

    /// Add an input-only device
    pub fn with_input(mut self, name: &str, default_rate: Option<u32>) -> Self {
        let index = self.devices.len();
        self.devices.push(DeviceDescriptor {
            index,
            name: name.to_string(),
            max_input_channels: 2,
            max_output_channels: 0,
            default_sample_rate: default_rate,
        });
        self
    }

    /// Add an output device whose format queries cannot be answered
    pub fn with_unqueryable_output(mut self, name: &str, default_rate: Option<u32>) -> Self {
        let index = self.devices.len();
        self = self.with_output(name, default_rate, &[]);
        self.unavailable.insert(index);
        self
    }

    pub fn with_default_output(mut self, index: usize) -> Self {
        self.default_output = Some(index);
        self
    }
}

impl OutputHost for FakeHost {
    fn devices(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(self.devices.clone())
    }

    fn default_output(&self) -> Option<DeviceDescriptor> {
        self.default_output.and_then(|i| self.devices.get(i).cloned())
    }

    fn query_format(
        &self,
        device_index: usize,
        format: &AudioFormat,
    ) -> std::result::Result<(), ProbeFailure> {
        if self.unavailable.contains(&device_index) {
            return Err(ProbeFailure::Unavailable("query not supported".to_string()));
        }
        let rates = self
            .accepted
            .get(&device_index)
            .ok_or_else(|| ProbeFailure::Unavailable(format!("no device {}", device_index)))?;

        if format.channels == PROBE_CHANNELS
            && format.repr == PROBE_REPR
            && rates.contains(&format.sample_rate)
        {
            Ok(())
        } else {
            Err(ProbeFailure::Rejected(format!(
                "Invalid sample rate {}",
                format.sample_rate
            )))
        }
    }
}

/// Everything a [`FakeDevice`] observed
#[derive(Debug, Default)]
pub struct DeviceLog {
    pub opened: Vec<AudioFormat>,
    pub closed: usize,
    pub open_streams: usize,
    pub writes: usize,
    pub samples: Vec<f32>,
}

/// Output device that records writes instead of playing them
pub struct FakeDevice {
    index: usize,
    /// None accepts any format
    accepted_rates: Option<Vec<u32>>,
    log: Arc<Mutex<DeviceLog>>,
}

impl FakeDevice {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            accepted_rates: None,
            log: Arc::new(Mutex::new(DeviceLog::default())),
        }
    }

    pub fn accepting(index: usize, rates: &[u32]) -> Self {
        Self {
            accepted_rates: Some(rates.to_vec()),
            ..Self::new(index)
        }
    }

    /// Shared handle to the log, valid after the device is moved
    pub fn log(&self) -> Arc<Mutex<DeviceLog>> {
        Arc::clone(&self.log)
    }
}

impl OutputDevice for FakeDevice {
    type Stream = FakeStream;

    fn device_index(&self) -> usize {
        self.index
    }

    fn open(&mut self, format: &AudioFormat) -> Result<FakeStream> {
        if let Some(rates) = &self.accepted_rates {
            if !rates.contains(&format.sample_rate) {
                return Err(Error::StreamOpen {
                    device_index: self.index,
                    format: *format,
                    message: "Invalid sample rate [PaErrorCode -9997]".to_string(),
                });
            }
        }

        let mut log = self.log.lock().unwrap();
        log.opened.push(*format);
        log.open_streams += 1;
        Ok(FakeStream {
            log: Arc::clone(&self.log),
            closed: false,
        })
    }
}

pub struct FakeStream {
    log: Arc<Mutex<DeviceLog>>,
    closed: bool,
}

impl OutputStream for FakeStream {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidState("stream closed".to_string()));
        }
        let mut log = self.log.lock().unwrap();
        log.writes += 1;
        log.samples.extend_from_slice(samples);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            let mut log = self.log.lock().unwrap();
            log.closed += 1;
            log.open_streams -= 1;
        }
        Ok(())
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
