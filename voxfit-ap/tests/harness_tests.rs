//! Integration harness scenarios
//!
//! Each test runs a real child process (`sh -c`) against a fake HTTP service.
//!
//! **Test Coverage:**
//! - A: ready service streams audio → Success after `max_chunks`
//! - B: format-error signature in diagnostics → FormatError, process gone
//! - C: readiness never 2xx → ReadyTimeout
//! - D: non-2xx synthesis response → RequestError with body
//! - Stream failures before and after the first chunk
//! - A service flooding its output still hits the readiness deadline
//! - Signatures printed while the stream is served end the run
//! - Sink errors, blocking sinks, and muted playback validation

#![cfg(unix)]

mod helpers;

use std::time::Duration;

use helpers::{fast_timings, start_fake_service, FakeDevice, StreamBehavior};
use voxfit_ap::audio::probe::CapabilityRecord;
use voxfit_ap::audio::types::AudioFormat;
use voxfit_ap::error::{Error, Result};
use voxfit_ap::playback::{PlaybackController, PlaybackMode, PlaybackSink};
use voxfit_ap::{ChunkSink, Harness, HarnessOutcome};

const IDLE_SERVICE: &str = "exec sleep 30";

/// Sink that counts what it is handed
#[derive(Default)]
struct CountingSink {
    chunks: usize,
    bytes: usize,
    finished: bool,
}

impl ChunkSink for CountingSink {
    fn on_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.chunks += 1;
        self.bytes += chunk.len();
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

/// Sink that blocks the calling thread on every chunk, like audible output
#[derive(Default)]
struct BlockingSink {
    chunks: usize,
}

impl ChunkSink for BlockingSink {
    fn on_chunk(&mut self, _chunk: &[u8]) -> Result<()> {
        std::thread::sleep(Duration::from_millis(20));
        self.chunks += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sink that fails on the first chunk with a fixed message
struct FailingSink(&'static str);

impl ChunkSink for FailingSink {
    fn on_chunk(&mut self, _chunk: &[u8]) -> Result<()> {
        Err(Error::AudioOutput(self.0.to_string()))
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// **Scenario A:** ready service, healthy stream
#[tokio::test]
async fn test_success_after_max_chunks() {
    let service = start_fake_service(true, StreamBehavior::Chunks { count: 25, size: 1024 }).await;
    let harness = Harness::new(
        service.service_config(IDLE_SERVICE),
        service.request_config(10),
        fast_timings(Duration::from_secs(10)),
    );

    let mut sink = CountingSink::default();
    let outcome = harness.run(Some(&mut sink)).await;

    assert_eq!(outcome, HarnessOutcome::Success { chunks: 10, bytes: 10 * 1024 });
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(sink.chunks, 10);
    assert_eq!(sink.bytes, 10 * 1024);
    assert!(sink.finished);

    let query = service.last_query().expect("stream endpoint was called");
    assert_eq!(query.get("speaker_wav").map(String::as_str), Some("lisa.wav"));
    assert_eq!(query.get("language").map(String::as_str), Some("en"));
    assert!(query.get("text").is_some_and(|t| t.contains("streaming mode")));
}

/// **Scenario B:** the service reports an invalid sample rate on stderr
#[tokio::test]
async fn test_format_error_signature_terminates_service() {
    let service = start_fake_service(false, StreamBehavior::Chunks { count: 1, size: 16 }).await;
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("service.pid");

    let script = format!(
        "echo $$ > '{}'; echo 'PortAudioError: Invalid sample rate [PaErrorCode -9997]' >&2; exec sleep 30",
        pid_file.display()
    );
    let harness = Harness::new(
        service.service_config(&script),
        service.request_config(10),
        fast_timings(Duration::from_secs(10)),
    );

    let outcome = harness.run(None).await;

    match &outcome {
        HarnessOutcome::FormatError { detail } => assert!(detail.contains("Invalid sample rate")),
        other => panic!("Expected FormatError, got {:?}", other),
    }
    assert_eq!(outcome.exit_code(), 1);
    assert!(service.last_query().is_none(), "no request after a format error");

    #[cfg(target_os = "linux")]
    {
        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let proc_path = std::path::PathBuf::from(format!("/proc/{}", pid.trim()));
        assert!(!proc_path.exists(), "service process {} still running", pid.trim());
    }
}

/// Numeric backend code alone is also a signature
#[tokio::test]
async fn test_numeric_error_code_signature() {
    let service = start_fake_service(false, StreamBehavior::Chunks { count: 1, size: 16 }).await;
    let harness = Harness::new(
        service.service_config("echo 'stream open failed: -9997'; exec sleep 30"),
        service.request_config(10),
        fast_timings(Duration::from_secs(10)),
    );

    let outcome = harness.run(None).await;
    assert!(matches!(outcome, HarnessOutcome::FormatError { .. }));
}

/// **Scenario C:** readiness endpoint keeps answering 503
#[tokio::test]
async fn test_ready_timeout() {
    let service = start_fake_service(false, StreamBehavior::Chunks { count: 1, size: 16 }).await;
    let harness = Harness::new(
        service.service_config("echo 'loading model'; echo 'sample cache error' >&2; exec sleep 30"),
        service.request_config(10),
        fast_timings(Duration::from_secs(1)),
    );

    let outcome = harness.run(None).await;

    match outcome {
        HarnessOutcome::ReadyTimeout { waited_secs } => assert!(waited_secs >= 0.9),
        other => panic!("Expected ReadyTimeout, got {:?}", other),
    }
    assert!(service.last_query().is_none());
}

/// Readiness deadline holds while the service writes output nonstop
#[tokio::test]
async fn test_flooding_service_still_times_out() {
    let service = start_fake_service(false, StreamBehavior::Chunks { count: 1, size: 16 }).await;
    let harness = Harness::new(
        service.service_config("exec yes loading-model-shard"),
        service.request_config(10),
        fast_timings(Duration::from_secs(2)),
    );

    let outcome = tokio::time::timeout(Duration::from_secs(20), harness.run(None))
        .await
        .expect("harness returned within its own bounds");

    match outcome {
        HarnessOutcome::ReadyTimeout { waited_secs } => {
            assert!(waited_secs >= 1.9 && waited_secs < 10.0, "waited {}", waited_secs)
        }
        other => panic!("Expected ReadyTimeout, got {:?}", other),
    }
}

/// Signature printed after readiness, while audio is streaming
#[tokio::test]
async fn test_format_error_while_streaming() {
    let service = start_fake_service(true, StreamBehavior::Chunks { count: 400, size: 16 }).await;
    let harness = Harness::new(
        service.service_config(
            "sleep 0.3; echo 'PortAudioError: Invalid sample rate [PaErrorCode -9997]' >&2; exec sleep 30",
        ),
        service.request_config(1000),
        fast_timings(Duration::from_secs(10)),
    );

    let outcome = harness.run(None).await;

    match &outcome {
        HarnessOutcome::FormatError { detail } => assert!(detail.contains("-9997")),
        other => panic!("Expected FormatError, got {:?}", other),
    }
    assert!(service.last_query().is_some(), "request was sent before the error");
}

/// **Scenario D:** synthesis request fails with 500
#[tokio::test]
async fn test_request_error_carries_status_and_body() {
    let service = start_fake_service(
        true,
        StreamBehavior::Status { code: 500, body: "speaker not found" },
    )
    .await;
    let harness = Harness::new(
        service.service_config(IDLE_SERVICE),
        service.request_config(10),
        fast_timings(Duration::from_secs(10)),
    );

    let outcome = harness.run(None).await;

    assert_eq!(
        outcome,
        HarnessOutcome::RequestError {
            status: Some(500),
            body: "speaker not found".to_string(),
        }
    );
    assert_eq!(outcome.exit_code(), 1);
}

/// A stream that breaks after some chunks still counts as delivered
#[tokio::test]
async fn test_stream_error_after_chunks_is_success() {
    let service = start_fake_service(
        true,
        StreamBehavior::ChunksThenAbort { count: 3, size: 512 },
    )
    .await;
    let harness = Harness::new(
        service.service_config(IDLE_SERVICE),
        service.request_config(10),
        fast_timings(Duration::from_secs(10)),
    );

    let outcome = harness.run(None).await;
    assert_eq!(outcome, HarnessOutcome::Success { chunks: 3, bytes: 3 * 512 });
}

/// A stream that breaks before any chunk is a request failure
#[tokio::test]
async fn test_stream_error_before_first_chunk() {
    let service = start_fake_service(
        true,
        StreamBehavior::ChunksThenAbort { count: 0, size: 512 },
    )
    .await;
    let harness = Harness::new(
        service.service_config(IDLE_SERVICE),
        service.request_config(10),
        fast_timings(Duration::from_secs(10)),
    );

    let outcome = harness.run(None).await;
    assert!(
        matches!(outcome, HarnessOutcome::RequestError { .. }),
        "got {:?}",
        outcome
    );
}

/// A service binary that cannot be launched never becomes ready
#[tokio::test]
async fn test_spawn_failure_is_ready_timeout() {
    let service = start_fake_service(true, StreamBehavior::Chunks { count: 1, size: 16 }).await;
    let mut config = service.service_config(IDLE_SERVICE);
    config.program = "/nonexistent/voxfit-service".to_string();

    let harness = Harness::new(config, service.request_config(10), fast_timings(Duration::from_secs(1)));
    let outcome = harness.run(None).await;

    assert_eq!(outcome, HarnessOutcome::ReadyTimeout { waited_secs: 0.0 });
}

/// Sink failures are classified by their text
#[tokio::test]
async fn test_sink_errors() {
    let service = start_fake_service(true, StreamBehavior::Chunks { count: 5, size: 64 }).await;
    let harness = Harness::new(
        service.service_config(IDLE_SERVICE),
        service.request_config(10),
        fast_timings(Duration::from_secs(10)),
    );

    let mut sink = FailingSink("Invalid sample rate [PaErrorCode -9997]");
    let outcome = harness.run(Some(&mut sink)).await;
    assert!(matches!(outcome, HarnessOutcome::FormatError { .. }), "got {:?}", outcome);

    let mut sink = FailingSink("device unplugged");
    let outcome = harness.run(Some(&mut sink)).await;
    match outcome {
        HarnessOutcome::RequestError { status, body } => {
            assert_eq!(status, Some(200));
            assert!(body.contains("device unplugged"));
        }
        other => panic!("Expected RequestError, got {:?}", other),
    }
}

/// A sink that blocks its thread does not stall the runtime
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_sink_on_multi_thread_runtime() {
    let service = start_fake_service(true, StreamBehavior::Chunks { count: 20, size: 64 }).await;
    let harness = Harness::new(
        service.service_config(IDLE_SERVICE),
        service.request_config(10),
        fast_timings(Duration::from_secs(10)),
    );

    let mut sink = BlockingSink::default();
    let outcome = harness.run(Some(&mut sink)).await;

    assert_eq!(outcome, HarnessOutcome::Success { chunks: 10, bytes: 10 * 64 });
    assert_eq!(sink.chunks, 10);
}

/// Streamed PCM runs through negotiation, resampling and a muted session
#[tokio::test]
async fn test_muted_playback_validation() {
    // 0.5 s of 24 kHz 16-bit mono tone
    let pcm: Vec<u8> = (0..12_000)
        .map(|i| ((i as f32 * 0.05).sin() * 8000.0) as i16)
        .flat_map(|s| s.to_le_bytes())
        .collect();
    let total_bytes = pcm.len() as u64;

    let service = start_fake_service(
        true,
        StreamBehavior::Bytes { data: pcm, chunk_size: 1023 },
    )
    .await;
    let harness = Harness::new(
        service.service_config(IDLE_SERVICE),
        service.request_config(1000),
        fast_timings(Duration::from_secs(10)),
    );

    let device = FakeDevice::accepting(0, &[44100, 48000]);
    let log = device.log();
    let mut controller = PlaybackController::new(device);
    let capability = CapabilityRecord::from_supported(0, Some(48000), &[44100, 48000]);
    let engine = AudioFormat::mono_f32(24000);

    let outcome = {
        let mut sink = PlaybackSink::new(&mut controller, capability, engine, PlaybackMode::Muted);
        let outcome = harness.run(Some(&mut sink)).await;

        let stats = sink.stats().expect("pipeline ran");
        assert_eq!(stats.frames_in, 12_000);
        assert_eq!(stats.negotiation.format.sample_rate, 48000);
        // Muted: everything discarded, nothing written to the device
        assert_eq!(stats.session.frames_written, 0);
        assert!((stats.session.frames_discarded as i64 - 24_000).abs() <= 1);
        outcome
    };

    match outcome {
        HarnessOutcome::Success { bytes, .. } => assert_eq!(bytes, total_bytes),
        other => panic!("Expected Success, got {:?}", other),
    }

    let log = log.lock().unwrap();
    assert_eq!(log.opened, vec![engine.with_rate(48000)]);
    assert_eq!(log.open_streams, 0);
    assert!(log.samples.is_empty());
}
