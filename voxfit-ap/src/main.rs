//! voxfit-check - streaming synthesis validation
//!
//! Probes the output device, negotiates the engine format against it, then
//! launches the synthesis service and checks that a streamed request delivers
//! audio without device sample-format errors.
//!
//! Exit code 0 on success, 1 on any failure.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use voxfit_ap::audio::negotiate::negotiate;
use voxfit_ap::audio::output::CpalOutput;
use voxfit_ap::audio::probe::{probe_all, CpalHost};
use voxfit_ap::audio::types::AudioFormat;
use voxfit_ap::playback::{PlaybackController, PlaybackMode, PlaybackSink};
use voxfit_ap::{ChunkSink, Harness, HarnessOutcome};
use voxfit_common::config::{resolve_config_path, CONFIG_ENV_VAR};
use voxfit_common::VoxfitConfig;

/// Command-line arguments for voxfit-check
#[derive(Parser, Debug)]
#[command(name = "voxfit-check")]
#[command(about = "Validate streaming speech synthesis against the local audio device")]
#[command(version)]
struct Args {
    /// Path to config file
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Output device index from the probe report
    #[arg(short, long)]
    device: Option<usize>,

    /// Play streamed audio instead of discarding it
    #[arg(long)]
    audible: bool,

    /// Skip decoding and playback validation of the streamed body
    #[arg(long)]
    no_playback: bool,

    /// Chunks to read before declaring success
    #[arg(long)]
    max_chunks: Option<usize>,

    /// Text to synthesize
    #[arg(long)]
    text: Option<String>,

    /// Seconds to wait for the service to become ready
    #[arg(long)]
    ready_timeout: Option<u64>,

    /// Skip the device probe and negotiation (implies --no-playback)
    #[arg(long)]
    skip_probe: bool,
}

impl Args {
    fn apply(&self, config: &mut VoxfitConfig) {
        if let Some(index) = self.device {
            config.device.index = Some(index);
        }
        if self.audible {
            config.device.muted = false;
        }
        if self.no_playback || self.skip_probe {
            config.device.validate_playback = false;
        }
        if let Some(max_chunks) = self.max_chunks {
            config.request.max_chunks = max_chunks;
        }
        if let Some(text) = &self.text {
            config.request.text = text.clone();
        }
        if let Some(secs) = self.ready_timeout {
            config.timing.ready_timeout_secs = secs;
        }
    }
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<i32> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR);
    let mut config = VoxfitConfig::load_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: built-in defaults"),
    }

    let engine = AudioFormat::try_from(&config.engine).context("Invalid engine format")?;
    info!(%engine, "Engine format");

    let harness = Harness::from_config(&config);

    if args.skip_probe {
        let outcome = harness.run(None).await;
        return Ok(report(&outcome));
    }

    let host = CpalHost::new().context("Failed to open audio host")?;
    let probe = probe_all(&host).context("Device probe failed")?;
    println!("{}", probe);
    println!();

    let device_index = match config.device.index.or(probe.default_output.as_ref().map(|d| d.index)) {
        Some(index) => index,
        None => {
            error!("No output device selected and no default output device");
            return Ok(1);
        }
    };
    let Some(capability) = probe.capability(device_index).cloned() else {
        error!("Device {} is not an output device", device_index);
        return Ok(1);
    };

    let negotiation = match negotiate(&engine, &capability) {
        Ok(negotiation) => negotiation,
        Err(e) => {
            error!("{}", e);
            return Ok(1);
        }
    };
    info!(device_index, %negotiation, "Negotiated output format");

    let output = CpalOutput::new(&host, device_index).context("Failed to open output device")?;
    let mut controller = PlaybackController::new(output);

    if let Err(e) = controller.check_format_openable(negotiation.format) {
        error!("{}", e);
        return Ok(1);
    }
    info!(format = %negotiation.format, "Output stream opens");

    let outcome = if config.device.validate_playback {
        let mode = if config.device.muted {
            PlaybackMode::Muted
        } else {
            PlaybackMode::Playing
        };
        let mut sink = PlaybackSink::new(&mut controller, capability, engine, mode);
        let outcome = harness.run(Some(&mut sink as &mut dyn ChunkSink)).await;
        match sink.stats() {
            Some(stats) => info!(
                buffers = stats.buffers_in,
                frames = stats.frames_in,
                skipped = stats.buffers_skipped,
                "Playback validation"
            ),
            None if outcome.is_success() => warn!("Stream carried no decodable audio"),
            None => {}
        }
        outcome
    } else {
        harness.run(None).await
    };

    Ok(report(&outcome))
}

fn report(outcome: &HarnessOutcome) -> i32 {
    let rule = "=".repeat(80);
    println!("{}", rule);
    if outcome.is_success() {
        println!("SUCCESS: {}", outcome);
    } else {
        println!("FAILED: {}", outcome);
    }
    println!("{}", rule);
    outcome.exit_code()
}
