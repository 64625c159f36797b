//! Audio output using cpal
//!
//! Opens device output streams for the playback controller. Samples written
//! by the controller go into a ring buffer that the cpal callback drains on
//! the audio thread.

use crate::audio::probe::{cpal_sample_format, CpalHost};
use crate::audio::types::AudioFormat;
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Seconds of audio the ring buffer holds
const RING_BUFFER_SECONDS: usize = 2;

/// Give up on a write when the device has not consumed anything for this long
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Poll interval while waiting for ring buffer space or drain
const BACKPRESSURE_SLEEP: Duration = Duration::from_millis(5);

/// A device that can open output streams
pub trait OutputDevice {
    type Stream: OutputStream;

    /// Index of the device in the probe snapshot
    fn device_index(&self) -> usize;

    /// Open an output stream bound to `format`
    fn open(&mut self, format: &AudioFormat) -> Result<Self::Stream>;
}

/// An open output stream
pub trait OutputStream {
    /// Queue interleaved samples for playback, in order
    fn write(&mut self, samples: &[f32]) -> Result<()>;

    /// Release the device. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;
}

/// cpal-backed output device
pub struct CpalOutput {
    device: Device,
    device_index: usize,
}

impl CpalOutput {
    /// Output device by probe snapshot index
    pub fn new(host: &CpalHost, device_index: usize) -> Result<Self> {
        let device = host
            .device(device_index)
            .cloned()
            .ok_or_else(|| Error::AudioOutput(format!("No device with index {}", device_index)))?;

        info!(
            "Using audio device {}: {}",
            device_index,
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );
        Ok(Self {
            device,
            device_index,
        })
    }

    pub fn device_name(&self) -> String {
        self.device
            .name()
            .unwrap_or_else(|_| "Unknown".to_string())
    }

    fn open_error(&self, format: &AudioFormat, message: String) -> Error {
        Error::StreamOpen {
            device_index: self.device_index,
            format: *format,
            message,
        }
    }

    fn build_stream<T>(
        &self,
        config: &StreamConfig,
        mut consumer: HeapCons<f32>,
        error_flag: Arc<AtomicBool>,
        last_error: Arc<Mutex<Option<String>>>,
    ) -> std::result::Result<Stream, cpal::BuildStreamError>
    where
        T: SizedSample + FromSample<f32>,
    {
        self.device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for sample in data.iter_mut() {
                    // Underrun plays silence
                    let value = consumer.try_pop().unwrap_or(0.0).clamp(-1.0, 1.0);
                    *sample = T::from_sample(value);
                }
            },
            move |err| {
                error!("Audio stream error: {}", err);
                if let Ok(mut slot) = last_error.lock() {
                    *slot = Some(err.to_string());
                }
                error_flag.store(true, Ordering::SeqCst);
            },
            None,
        )
    }
}

impl OutputDevice for CpalOutput {
    type Stream = CpalStream;

    fn device_index(&self) -> usize {
        self.device_index
    }

    fn open(&mut self, format: &AudioFormat) -> Result<CpalStream> {
        format.validate()?;

        let sample_format = cpal_sample_format(format.repr).ok_or_else(|| {
            self.open_error(format, format!("{} has no device sample format", format.repr))
        })?;

        let config = StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let capacity = format.sample_rate as usize * format.channels as usize * RING_BUFFER_SECONDS;
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
        let error_flag = Arc::new(AtomicBool::new(false));
        let last_error = Arc::new(Mutex::new(None));

        let flag = Arc::clone(&error_flag);
        let slot = Arc::clone(&last_error);
        let stream = match sample_format {
            SampleFormat::F32 => self.build_stream::<f32>(&config, consumer, flag, slot),
            SampleFormat::F64 => self.build_stream::<f64>(&config, consumer, flag, slot),
            SampleFormat::I16 => self.build_stream::<i16>(&config, consumer, flag, slot),
            SampleFormat::I32 => self.build_stream::<i32>(&config, consumer, flag, slot),
            other => {
                return Err(self.open_error(format, format!("Unsupported sample format: {:?}", other)))
            }
        }
        .map_err(|e| self.open_error(format, e.to_string()))?;

        stream
            .play()
            .map_err(|e| self.open_error(format, format!("Failed to start stream: {}", e)))?;

        debug!(
            "Opened output stream: sample_rate={}, channels={}, format={:?}",
            config.sample_rate.0, config.channels, sample_format
        );

        Ok(CpalStream {
            stream: Some(stream),
            producer,
            error_flag,
            last_error,
            sample_rate: format.sample_rate,
            channels: format.channels,
        })
    }
}

/// Open cpal output stream fed through a ring buffer
pub struct CpalStream {
    stream: Option<Stream>,
    producer: HeapProd<f32>,
    /// Set by the cpal error callback
    error_flag: Arc<AtomicBool>,
    last_error: Arc<Mutex<Option<String>>>,
    sample_rate: u32,
    channels: u16,
}

impl CpalStream {
    fn check_error(&self) -> Result<()> {
        if self.error_flag.load(Ordering::SeqCst) {
            let message = self
                .last_error
                .lock()
                .ok()
                .and_then(|slot| slot.clone())
                .unwrap_or_else(|| "unknown stream error".to_string());
            return Err(Error::AudioOutput(message));
        }
        Ok(())
    }

    /// Wait for queued audio to play out, bounded by the queued duration
    fn drain(&self) {
        let queued_frames = self.producer.occupied_len() / self.channels.max(1) as usize;
        let queued = Duration::from_secs_f64(queued_frames as f64 / self.sample_rate.max(1) as f64);
        let deadline = Instant::now() + queued + Duration::from_millis(200);

        while !self.producer.is_empty() && Instant::now() < deadline {
            if self.error_flag.load(Ordering::SeqCst) {
                break;
            }
            std::thread::sleep(BACKPRESSURE_SLEEP);
        }
    }
}

impl OutputStream for CpalStream {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        if self.stream.is_none() {
            return Err(Error::InvalidState("Write to a closed output stream".to_string()));
        }

        let mut rest = samples;
        let mut last_progress = Instant::now();

        while !rest.is_empty() {
            self.check_error()?;

            let pushed = self.producer.push_slice(rest);
            if pushed > 0 {
                rest = &rest[pushed..];
                last_progress = Instant::now();
                continue;
            }

            if last_progress.elapsed() > STALL_TIMEOUT {
                return Err(Error::AudioOutput(
                    "Output device stopped consuming samples".to_string(),
                ));
            }
            std::thread::sleep(BACKPRESSURE_SLEEP);
        }

        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };

        self.drain();
        let result = stream
            .pause()
            .map_err(|e| Error::AudioOutput(format!("Failed to pause stream: {}", e)));
        drop(stream);

        if let Err(e) = &result {
            warn!("{}", e);
        }
        debug!("Output stream closed");
        result
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        // Ensure stream is stopped on drop
        let _ = self.close();
    }
}
