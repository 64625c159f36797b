//! Integration harness for the streaming synthesis service
//!
//! One run walks an explicit state machine:
//!
//! ```text
//! Starting --ready--> Requesting --2xx--> Streaming --done--> Success
//!    |                    |                   |
//!    +- signature ------> FormatError         +- sink signature -> FormatError
//!    +- deadline -------> ReadyTimeout        +- no chunk -------> RequestError
//!                         +- non-2xx -------> RequestError
//! ```
//!
//! Service diagnostics are scanned in every state, so a signature printed
//! while the stream is being served still ends in `FormatError`. The service
//! process is terminated on every path out of the machine.

pub mod service;
pub mod signature;

pub use service::{LineSource, ServiceLine, ServiceProcess};
pub use signature::{is_sample_warning, matches_format_error, FORMAT_ERROR_SIGNATURES};

use crate::error::{Error, Result};
use reqwest::{Client, Response};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};
use voxfit_common::config::{RequestConfig, ServiceConfig};
use voxfit_common::VoxfitConfig;

/// Receives streamed body chunks in arrival order
pub trait ChunkSink {
    fn on_chunk(&mut self, chunk: &[u8]) -> Result<()>;

    /// Called once after the last chunk of a successful stream
    fn finish(&mut self) -> Result<()>;
}

/// Result of one harness run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HarnessOutcome {
    ReadyTimeout { waited_secs: f64 },
    FormatError { detail: String },
    RequestError { status: Option<u16>, body: String },
    Success { chunks: usize, bytes: u64 },
}

impl HarnessOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, HarnessOutcome::Success { .. })
    }

    /// Process exit code: 0 for success, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

impl From<Error> for HarnessOutcome {
    fn from(err: Error) -> Self {
        match err {
            Error::ServiceUnready { waited_secs } => HarnessOutcome::ReadyTimeout { waited_secs },
            Error::FormatErrorDetected(detail) => HarnessOutcome::FormatError { detail },
            Error::Request {
                status, message, ..
            } => HarnessOutcome::RequestError {
                status,
                body: message,
            },
            other => HarnessOutcome::RequestError {
                status: None,
                body: other.to_string(),
            },
        }
    }
}

impl fmt::Display for HarnessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarnessOutcome::ReadyTimeout { waited_secs } => {
                write!(f, "Service failed to become ready within {:.1}s", waited_secs)
            }
            HarnessOutcome::FormatError { detail } => {
                write!(f, "Sample rate error detected: {}", detail)
            }
            HarnessOutcome::RequestError {
                status: Some(status),
                body,
            } => write!(f, "Request failed with status {}: {}", status, body),
            HarnessOutcome::RequestError { status: None, body } => {
                write!(f, "Request failed: {}", body)
            }
            HarnessOutcome::Success { chunks, bytes } => {
                write!(f, "Received {} audio chunks ({} bytes)", chunks, bytes)
            }
        }
    }
}

/// Intervals and bounds for one run
#[derive(Debug, Clone, Copy)]
pub struct HarnessTimings {
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
    /// Bound on each readiness GET
    pub readiness_probe_timeout: Duration,
    /// Wait before the first readiness poll
    pub startup_delay: Duration,
    /// Bound on reaping the service after kill
    pub terminate_grace: Duration,
    /// Bound on the request and on each chunk read
    pub read_timeout: Duration,
}

impl From<&VoxfitConfig> for HarnessTimings {
    fn from(config: &VoxfitConfig) -> Self {
        Self {
            ready_timeout: config.timing.ready_timeout(),
            poll_interval: config.timing.poll_interval(),
            readiness_probe_timeout: config.timing.readiness_probe_timeout(),
            startup_delay: config.timing.startup_delay(),
            terminate_grace: config.timing.terminate_grace(),
            read_timeout: Duration::from_secs(config.request.read_timeout_secs),
        }
    }
}

/// Drives the service through startup, one streaming request and shutdown
pub struct Harness {
    service: ServiceConfig,
    request: RequestConfig,
    timings: HarnessTimings,
    client: Client,
}

impl Harness {
    pub fn new(service: ServiceConfig, request: RequestConfig, timings: HarnessTimings) -> Self {
        Self {
            service,
            request,
            timings,
            client: Client::new(),
        }
    }

    pub fn from_config(config: &VoxfitConfig) -> Self {
        Self::new(
            config.service.clone(),
            config.request.clone(),
            HarnessTimings::from(config),
        )
    }

    pub fn timings(&self) -> &HarnessTimings {
        &self.timings
    }

    /// Run the whole sequence once. Never panics, never leaves the service running.
    pub async fn run(&self, sink: Option<&mut dyn ChunkSink>) -> HarnessOutcome {
        let mut service = match ServiceProcess::spawn(&self.service) {
            Ok(service) => service,
            Err(e) => {
                error!("Service failed to start: {}", e);
                return HarnessOutcome::ReadyTimeout { waited_secs: 0.0 };
            }
        };

        let outcome = match self.drive(&mut service, sink).await {
            Ok(outcome) => outcome,
            Err(e) => HarnessOutcome::from(e),
        };

        service.terminate(self.timings.terminate_grace).await;

        if outcome.is_success() {
            info!("{}", outcome);
        } else {
            error!("{}", outcome);
        }
        outcome
    }

    async fn drive(
        &self,
        service: &mut ServiceProcess,
        sink: Option<&mut dyn ChunkSink>,
    ) -> Result<HarnessOutcome> {
        self.wait_ready(service).await?;
        let response = self.send_request(service).await?;
        self.stream(service, response, sink).await
    }

    /// Starting: poll readiness while scanning service diagnostics
    async fn wait_ready(&self, service: &mut ServiceProcess) -> Result<()> {
        let started = Instant::now();
        let deadline = started + self.timings.ready_timeout;
        let mut next_poll = started + self.timings.startup_delay;

        info!(
            url = %self.service.readiness_url,
            timeout_secs = self.timings.ready_timeout.as_secs_f64(),
            "Waiting for service readiness"
        );

        // Deadline and poll come first: a service flooding its output must
        // not starve them
        loop {
            tokio::select! {
                biased;

                _ = sleep_until(deadline) => {
                    return Err(Error::ServiceUnready {
                        waited_secs: started.elapsed().as_secs_f64(),
                    });
                }

                _ = sleep_until(next_poll) => {
                    if self.probe_ready().await {
                        info!(
                            elapsed_secs = started.elapsed().as_secs_f64(),
                            "Service is ready"
                        );
                        return Ok(());
                    }
                    next_poll = Instant::now() + self.timings.poll_interval;
                }

                line = service.next_line() => {
                    if let Some(line) = line {
                        scan_line(&line)?;
                    }
                }
            }
        }
    }

    async fn probe_ready(&self) -> bool {
        match self
            .client
            .get(&self.service.readiness_url)
            .timeout(self.timings.readiness_probe_timeout)
            .send()
            .await
        {
            Ok(response) => {
                debug!(status = response.status().as_u16(), "Readiness probe");
                response.status().is_success()
            }
            Err(e) => {
                debug!("Readiness probe failed: {}", e);
                false
            }
        }
    }

    /// Requesting: one streaming GET
    async fn send_request(&self, service: &mut ServiceProcess) -> Result<Response> {
        info!(url = %self.request.stream_url, "Requesting synthesis stream");

        let request = self.client.get(&self.request.stream_url).query(&[
            ("text", self.request.text.as_str()),
            ("speaker_wav", self.request.speaker_wav.as_str()),
            ("language", self.request.language.as_str()),
        ]);

        let sent = watch(service, timeout(self.timings.read_timeout, request.send())).await?;
        let response = match sent {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(classify_failure(None, 0, e.to_string())),
            Err(_) => return Err(request_error(None, 0, "Request timed out".to_string())),
        };

        let status = response.status();
        if !status.is_success() {
            let text = watch(service, timeout(self.timings.read_timeout, response.text())).await?;
            let body = match text {
                Ok(Ok(body)) => body,
                Ok(Err(e)) => format!("<unreadable body: {}>", e),
                Err(_) => "<body read timed out>".to_string(),
            };
            return Err(request_error(Some(status.as_u16()), 0, body));
        }

        info!(status = status.as_u16(), "Request accepted");
        Ok(response)
    }

    /// Streaming: read up to `max_chunks` non-empty chunks
    async fn stream(
        &self,
        service: &mut ServiceProcess,
        mut response: Response,
        mut sink: Option<&mut dyn ChunkSink>,
    ) -> Result<HarnessOutcome> {
        let status = Some(response.status().as_u16());
        let max_chunks = self.request.max_chunks;
        let mut chunks = 0usize;
        let mut bytes = 0u64;

        while chunks < max_chunks {
            let read = watch(service, timeout(self.timings.read_timeout, response.chunk())).await?;
            let failure = match read {
                Ok(Ok(Some(chunk))) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    chunks += 1;
                    bytes += chunk.len() as u64;
                    debug!(chunk = chunks, len = chunk.len(), "Received chunk");

                    if let Some(sink) = sink.as_deref_mut() {
                        run_blocking(|| sink.on_chunk(&chunk))
                            .map_err(|e| sink_error(e, status, chunks))?;
                    }
                    continue;
                }
                Ok(Ok(None)) => break,
                Ok(Err(e)) => e.to_string(),
                Err(_) => "Chunk read timed out".to_string(),
            };

            let err = classify_failure(status, chunks, failure);
            if chunks == 0 || matches!(err, Error::FormatErrorDetected(_)) {
                return Err(err);
            }
            warn!("Stream ended after {} chunks, which is OK: {}", chunks, err);
            break;
        }

        // Lines that arrived alongside the last chunk
        for line in service.pending_lines() {
            scan_line(&line)?;
        }

        if chunks == 0 {
            return Err(request_error(
                status,
                0,
                "Stream ended before any audio chunk".to_string(),
            ));
        }

        if let Some(sink) = sink.as_deref_mut() {
            run_blocking(|| sink.finish()).map_err(|e| sink_error(e, status, chunks))?;
        }

        Ok(HarnessOutcome::Success { chunks, bytes })
    }
}

/// Await `work` while scanning service diagnostics. A signature line
/// abandons the work.
async fn watch<F: Future>(service: &mut ServiceProcess, work: F) -> Result<F::Output> {
    tokio::pin!(work);
    loop {
        tokio::select! {
            output = &mut work => return Ok(output),
            line = service.next_line() => {
                if let Some(line) = line {
                    scan_line(&line)?;
                }
            }
        }
    }
}

/// Sink calls may block on device output. Off the reactor when the runtime
/// has other workers to hand tasks to.
fn run_blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}

fn scan_line(line: &ServiceLine) -> Result<()> {
    if matches_format_error(&line.text) {
        error!(source = %line.source, "Sample rate error detected: {}", line.text);
        return Err(Error::FormatErrorDetected(line.text.clone()));
    }
    if is_sample_warning(&line.text) {
        warn!(source = %line.source, "Server output: {}", line.text);
    } else {
        debug!(source = %line.source, "{}", line.text);
    }
    Ok(())
}

fn request_error(status: Option<u16>, chunks: usize, message: String) -> Error {
    Error::Request {
        status,
        chunks,
        message,
    }
}

/// Transport failure text is checked for signatures too
fn classify_failure(status: Option<u16>, chunks: usize, message: String) -> Error {
    if matches_format_error(&message) {
        error!("Sample rate error detected: {}", message);
        Error::FormatErrorDetected(message)
    } else {
        request_error(status, chunks, message)
    }
}

/// A sink error naming a format-error signature is a format error, anything
/// else fails the request
fn sink_error(err: Error, status: Option<u16>, chunks: usize) -> Error {
    let text = err.to_string();
    if matches_format_error(&text) {
        Error::FormatErrorDetected(text)
    } else {
        request_error(status, chunks, format!("Playback validation failed: {}", text))
    }
}
