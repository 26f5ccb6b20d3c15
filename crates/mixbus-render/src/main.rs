//! Mixbus Render - offline mixdown through the mixbus engine
//!
//! Reads a render job (a session snapshot plus source WAV files), runs it
//! through the same processor a live host would drive, and writes the
//! master output to a WAV file.
//!
//! ## Usage
//!
//! ```text
//! mixbus-render <job.yaml> <out.wav> [--config <engine.yaml>] [--block <frames>]
//! ```
//!
//! Set RUST_LOG=debug for per-file details.

mod job;
mod render;
mod wav;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use mixbus_core::config::{load_config, EngineConfig};

use job::RenderJob;
use render::render;

/// Default processing block, a typical device buffer
const DEFAULT_BLOCK_FRAMES: usize = 512;

#[derive(Debug, Clone, PartialEq)]
struct Args {
    job: PathBuf,
    output: PathBuf,
    config: Option<PathBuf>,
    block_frames: usize,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut positional = Vec::new();
    let mut config = None;
    let mut block_frames = DEFAULT_BLOCK_FRAMES;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().context("--config needs a path")?;
                config = Some(PathBuf::from(path));
            }
            "--block" => {
                let frames = iter.next().context("--block needs a frame count")?;
                block_frames = frames
                    .parse()
                    .with_context(|| format!("Invalid block size '{}'", frames))?;
            }
            flag if flag.starts_with("--") => bail!("Unknown option '{}'", flag),
            _ => positional.push(PathBuf::from(arg)),
        }
    }

    let [job, output]: [PathBuf; 2] = positional
        .try_into()
        .map_err(|_| anyhow::anyhow!("usage: mixbus-render <job.yaml> <out.wav> [--config <engine.yaml>] [--block <frames>]"))?;
    Ok(Args {
        job,
        output,
        config,
        block_frames,
    })
}

fn main() -> Result<()> {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&args)?;

    let config: EngineConfig = match &args.config {
        Some(path) => load_config(path),
        None => EngineConfig::default(),
    };
    let job = RenderJob::load(&args.job)?;
    log::info!(
        "Job {:?}: {} channel(s), {} source(s) -> {:?}",
        args.job,
        job.session.channels.len(),
        job.sources.len(),
        args.output
    );

    let summary = render(&job, config, args.block_frames, &args.output)?;

    log::info!(
        "Wrote {:?}: {} frames ({:.2}s @ {} Hz), latency {} frames",
        args.output,
        summary.frames,
        summary.duration_secs(),
        summary.sample_rate,
        summary.latency_frames
    );
    let meters = &summary.meters;
    for ch in 0..meters.peak.len() {
        log::info!(
            "  ch{}: peak {:.1} dBFS, last-block RMS {:.1} dBFS",
            ch,
            meters.peak_db(ch),
            meters.rms_db(ch)
        );
    }
    if meters.clipping {
        log::warn!("Output clipped (peak {:.3})", meters.max_peak());
    }
    if meters.fault {
        log::warn!("Non-finite samples were replaced with silence during the render");
    }
    Ok(())
}
