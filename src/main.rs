use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use flate2::read::GzDecoder;
use serde::Serialize;

use indoor_tracker_rs::markers::{load_qr_events, MarkerRegistry};
use indoor_tracker_rs::{FusionEvent, ImuBatch, IndoorTracker, MarkerScan, PositionReport, TrackerConfig};

#[derive(Parser, Debug)]
#[command(name = "indoor_tracker")]
#[command(about = "Replay IMU batches and marker scans through an indoor tracking session", long_about = None)]
struct Args {
    /// IMU batches, a JSON array of {accel, gyro, gyro_unit} (.json or .json.gz)
    #[arg(long)]
    batches: PathBuf,

    /// Tracker configuration (JSON, partial files keep defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Marker registry: [{"room", "longitude", "latitude"}]
    #[arg(long)]
    markers: Option<PathBuf>,

    /// QR scan log: [{"room", "timestamp", "position", "type"}]
    #[arg(long)]
    qr_events: Option<PathBuf>,

    /// Override the origin longitude
    #[arg(long, requires = "origin_lat")]
    origin_lon: Option<f64>,

    /// Override the origin latitude
    #[arg(long, requires = "origin_lon")]
    origin_lat: Option<f64>,

    /// Live status output file
    #[arg(long, default_value = "live_status.json")]
    status: PathBuf,

    /// Write the position after every tick to this file
    #[arg(long)]
    trace: Option<PathBuf>,
}

#[derive(Serialize)]
struct TraceRow {
    tick: usize,
    steps: usize,
    reset: bool,
    position: PositionReport,
}

fn open_maybe_gz(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

fn load_batches(path: &Path) -> Result<Vec<ImuBatch>> {
    let reader = BufReader::new(open_maybe_gz(path)?);
    let mut batches: Vec<ImuBatch> =
        serde_json::from_reader(reader).with_context(|| format!("Failed to parse {}", path.display()))?;
    batches.sort_by(|a, b| {
        let ta = a.first_timestamp().unwrap_or(f64::NEG_INFINITY);
        let tb = b.first_timestamp().unwrap_or(f64::NEG_INFINITY);
        ta.total_cmp(&tb)
    });
    Ok(batches)
}

fn load_scans(path: &Path) -> Result<Vec<MarkerScan>> {
    let events = load_qr_events(path)?;
    let mut scans: Vec<MarkerScan> = events.iter().filter(|e| e.is_qr()).filter_map(|e| e.to_scan()).collect();
    scans.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    log::info!("Loaded {} QR scans ({} events)", scans.len(), events.len());
    Ok(scans)
}

fn log_events(events: &[FusionEvent]) {
    for event in events {
        match event {
            FusionEvent::Predicted { .. } => {}
            other => log::debug!("{:?}", other),
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TrackerConfig::from_json_file(path)?,
        None => TrackerConfig::default(),
    };
    if let (Some(lon), Some(lat)) = (args.origin_lon, args.origin_lat) {
        config.origin.longitude = lon;
        config.origin.latitude = lat;
    }

    let mut tracker = IndoorTracker::new(config)?;
    if let Some(path) = &args.markers {
        tracker.set_registry(MarkerRegistry::from_json_file(path)?);
    }

    let batches = load_batches(&args.batches)?;
    let scans = match &args.qr_events {
        Some(path) => load_scans(path)?,
        None => Vec::new(),
    };
    log::info!("Replaying {} batches", batches.len());

    let mut trace = Vec::new();
    let mut next_scan = 0;
    for (tick, batch) in batches.iter().enumerate() {
        // Scans taken up to the end of this batch take effect on this tick.
        let batch_end = batch.last_timestamp().unwrap_or(f64::NEG_INFINITY);
        while next_scan < scans.len() && scans[next_scan].timestamp <= batch_end {
            tracker.queue_marker_scan(scans[next_scan].clone())?;
            next_scan += 1;
        }

        let outcome = tracker.process_batch(batch)?;
        log_events(&outcome.events);
        trace.push(TraceRow {
            tick,
            steps: outcome.pdr.step_count(),
            reset: outcome.reset_applied,
            position: tracker.position(),
        });
    }

    for scan in &scans[next_scan..] {
        tracker.queue_marker_scan(scan.clone())?;
        if let Some(event) = tracker.tick_without_imu()? {
            log::debug!("{:?}", event);
        }
    }

    let status = tracker.live_status();
    status
        .save(&args.status)
        .with_context(|| format!("Failed to write {}", args.status.display()))?;
    if let Some(path) = &args.trace {
        std::fs::write(path, serde_json::to_string_pretty(&trace)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    let stats = tracker.stats();
    log::info!(
        "Done: {} batches ({} rejected), {} steps, {:.1} m walked, {} marker resets",
        stats.batches_processed,
        stats.batches_rejected,
        stats.steps_total,
        stats.distance_total_m,
        stats.marker_resets
    );
    println!("{}", serde_json::to_string_pretty(&status.position)?);
    Ok(())
}
