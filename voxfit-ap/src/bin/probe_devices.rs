//! Audio device probe
//!
//! Lists every device with its channel counts and default rate, and for
//! output devices the candidate rates accepted at mono f32.
//!
//! **Usage:**
//! ```bash
//! probe-devices [--json]
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use voxfit_ap::audio::probe::{probe_all, CpalHost};

/// Audio device capability probe
#[derive(Parser, Debug)]
#[command(name = "probe-devices")]
#[command(about = "List audio devices and the output sample rates they accept")]
struct Args {
    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let host = CpalHost::new().context("Failed to open audio host")?;
    let report = probe_all(&host).context("Device probe failed")?;

    if args.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        println!("{}", json);
    } else {
        println!("{}", report);
    }
    Ok(())
}
