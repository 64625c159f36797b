//! Streaming playback controller
//!
//! Session lifecycle: `Closed -> Open(Playing | Muted) -> Closed`.
//!
//! A [`StreamSession`] mutably borrows its [`PlaybackController`], so a session
//! cannot outlive the controller and a second session cannot be opened on the
//! same device while one is live. Dropping a session closes it.

use crate::audio::output::{OutputDevice, OutputStream};
use crate::audio::types::{AudioBuffer, AudioFormat};
use crate::error::{Error, Result};
use std::marker::PhantomData;
use tracing::{debug, info, warn};

/// How an open session treats written buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    /// Buffers go to the device
    Playing,
    /// Buffers are validated, counted and discarded
    Muted,
}

/// Observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Playing,
    Muted,
    Closed,
}

/// Counters for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub buffers_written: u64,
    pub frames_written: u64,
    pub frames_discarded: u64,
}

/// Owns an output device and opens one session at a time on it
pub struct PlaybackController<D: OutputDevice> {
    device: D,
}

impl<D: OutputDevice> PlaybackController<D> {
    pub fn new(device: D) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_index(&self) -> usize {
        self.device.device_index()
    }

    /// Open a session bound to `format`.
    ///
    /// The device is opened in both modes, so a muted session still proves
    /// the device accepts the format.
    pub fn start(
        &mut self,
        format: AudioFormat,
        mode: PlaybackMode,
    ) -> Result<StreamSession<'_, D::Stream>> {
        let stream = self.device.open(&format)?;

        let state = match mode {
            PlaybackMode::Playing => SessionState::Playing,
            PlaybackMode::Muted => SessionState::Muted,
        };
        info!(
            device_index = self.device.device_index(),
            %format,
            ?mode,
            "Playback session opened"
        );

        Ok(StreamSession {
            stream: Some(stream),
            format,
            state,
            stats: SessionStats::default(),
            _controller: PhantomData,
        })
    }

    /// Confirm the device opens `format`, then release it immediately
    pub fn check_format_openable(&mut self, format: AudioFormat) -> Result<()> {
        let mut session = self.start(format, PlaybackMode::Muted)?;
        session.stop()
    }
}

/// Open device stream bound to one format
pub struct StreamSession<'a, S: OutputStream> {
    stream: Option<S>,
    format: AudioFormat,
    state: SessionState,
    stats: SessionStats,
    _controller: PhantomData<&'a mut ()>,
}

impl<'a, S: OutputStream> StreamSession<'a, S> {
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn is_open(&self) -> bool {
        self.state != SessionState::Closed
    }

    /// Write one buffer.
    ///
    /// The buffer format must equal the session format exactly; conversion
    /// is the negotiator's and resampler's job.
    pub fn write(&mut self, buffer: AudioBuffer) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(Error::InvalidState("Write to a closed session".to_string()));
        }
        if buffer.format() != self.format {
            return Err(Error::FormatMismatch {
                expected: self.format,
                actual: buffer.format(),
            });
        }

        let frames = buffer.frames() as u64;
        match self.state {
            SessionState::Muted => {
                self.stats.frames_discarded += frames;
            }
            SessionState::Playing => {
                if let Some(stream) = self.stream.as_mut() {
                    stream.write(buffer.samples())?;
                }
                self.stats.frames_written += frames;
            }
            SessionState::Closed => unreachable!("checked above"),
        }
        self.stats.buffers_written += 1;
        Ok(())
    }

    /// Close the session and release the device.
    ///
    /// Idempotent: stopping a closed session does nothing. The session is
    /// closed afterwards even if releasing the device reported an error.
    pub fn stop(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;

        let result = match self.stream.take() {
            Some(mut stream) => stream.close(),
            None => Ok(()),
        };

        debug!(
            buffers = self.stats.buffers_written,
            frames_written = self.stats.frames_written,
            frames_discarded = self.stats.frames_discarded,
            "Playback session closed"
        );
        result
    }
}

impl<'a, S: OutputStream> Drop for StreamSession<'a, S> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Error closing playback session on drop: {}", e);
        }
    }
}
