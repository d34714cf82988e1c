use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use flate2::write::GzEncoder;
use flate2::Compression;

use indoor_tracker_rs::simulation::SyntheticWalk;
use indoor_tracker_rs::{DeltaPolicy, ImuBatch, IndoorTracker, PdrConfig, TrackerConfig};

#[derive(Parser, Debug)]
#[command(name = "simulate")]
#[command(about = "Generate a synthetic walk and optionally run it through the tracker", long_about = None)]
struct Args {
    /// Number of steps
    #[arg(long, default_value = "10")]
    steps: usize,

    /// Target stride length in meters
    #[arg(long, default_value = "0.7")]
    stride: f64,

    /// Walking direction, degrees counter-clockwise from east
    #[arg(long, default_value = "0.0", allow_negative_numbers = true)]
    heading_deg: f64,

    /// Sample rate in Hz
    #[arg(long, default_value = "50.0")]
    rate: f64,

    /// Seconds per step
    #[arg(long, default_value = "1.0")]
    step_period: f64,

    /// Samples per batch (0 = one batch)
    #[arg(long, default_value = "0")]
    batch_samples: usize,

    /// Write the batches as JSON (.gz compresses)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Run the batches through a tracker and print the final position
    #[arg(long, default_value_t = false)]
    run: bool,
}

fn write_batches(path: &Path, batches: &[ImuBatch]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer(&mut encoder, batches)?;
        encoder.finish()?.flush()?;
    } else {
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, batches)?;
        writer.flush()?;
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let walk = SyntheticWalk {
        rate_hz: args.rate,
        steps: args.steps,
        step_period_secs: args.step_period,
        heading_rad: args.heading_deg.to_radians(),
        ..Default::default()
    };
    let batches = if args.batch_samples == 0 {
        vec![walk.generate()]
    } else {
        walk.generate_batches(args.batch_samples)
    };
    log::info!("Generated {} samples in {} batches", walk.sample_count(), batches.len());

    if let Some(path) = &args.output {
        write_batches(path, &batches)?;
        log::info!("Wrote {}", path.display());
    }

    if args.run {
        let config = TrackerConfig {
            pdr: PdrConfig {
                weinberg_k: walk.weinberg_k_for(args.stride),
                delta_policy: DeltaPolicy::BatchNet,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut tracker = IndoorTracker::new(config)?;
        let mut steps = 0;
        for batch in &batches {
            steps += tracker.process_batch(batch)?.pdr.step_count();
        }
        log::info!("Detected {} of {} steps", steps, args.steps);
        println!("{}", serde_json::to_string_pretty(&tracker.position())?);
    }
    Ok(())
}
