use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time::{interval, Duration};

use fleet_tracker_rs::feeds;
use fleet_tracker_rs::pipeline::{
    process_parallel, process_with_report, FleetTracker, ProcessOutput,
};
use fleet_tracker_rs::status::RefreshStatus;
use fleet_tracker_rs::KalmanConfig;

#[derive(Parser, Debug)]
#[command(name = "fleet_tracker")]
#[command(about = "Smooth vehicle GPS tracks with a per-axis Kalman filter", long_about = None)]
struct Args {
    /// Vehicle feed: JSON array or {"data": [...]} envelope, optionally .gz
    #[arg(long, value_name = "FILE")]
    vehicles: PathBuf,

    /// Coordinate feed, same formats as the vehicle feed
    #[arg(long, value_name = "FILE")]
    coords: PathBuf,

    /// Write trajectories to this file instead of stdout
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Write a refresh status snapshot to this file
    #[arg(long, value_name = "FILE")]
    status: Option<PathBuf>,

    /// Process noise Q
    #[arg(long, default_value = "0.01")]
    process_noise: f64,

    /// Measurement noise R
    #[arg(long, default_value = "4.0")]
    measurement_noise: f64,

    /// Velocity clamp per axis (degrees/second)
    #[arg(long, default_value = "1.0")]
    velocity_limit: f64,

    /// Floor for the time step between fixes (seconds)
    #[arg(long, default_value = "0.1")]
    min_dt: f64,

    /// Worker threads for smoothing (1 = sequential)
    #[arg(long, default_value_t = 1)]
    parallel: usize,

    /// Re-read both feeds and recompute every N seconds (0 = run once)
    #[arg(long, value_name = "SECONDS", default_value_t = 0)]
    watch: u64,

    /// Keep filter state between refreshes and only filter new fixes
    #[arg(long, default_value_t = false)]
    incremental: bool,

    /// Pretty-print trajectory JSON
    #[arg(long, default_value_t = false)]
    pretty: bool,

    /// Verbose logging (DEBUG level)
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

impl Args {
    fn kalman_config(&self) -> KalmanConfig {
        KalmanConfig {
            process_noise: self.process_noise,
            measurement_noise: self.measurement_noise,
            velocity_limit: self.velocity_limit,
            min_dt: self.min_dt,
            ..KalmanConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = args.kalman_config();
    config.validate().context("invalid filter tuning")?;
    let mut tracker = args
        .incremental
        .then(|| FleetTracker::new(config.clone()));

    if args.watch == 0 {
        return refresh(&args, &config, tracker.as_mut(), 1);
    }

    log::info!(
        "watching {} and {} every {}s",
        args.vehicles.display(),
        args.coords.display(),
        args.watch
    );
    let mut ticker = interval(Duration::from_secs(args.watch));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut refresh_count = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                refresh_count += 1;
                // Keep serving the last good output when a feed is briefly broken
                if let Err(e) = refresh(&args, &config, tracker.as_mut(), refresh_count) {
                    log::error!("refresh #{refresh_count} failed: {e:#}");
                }
            }
            _ = &mut shutdown => {
                log::info!("stopping after {refresh_count} refreshes");
                break;
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

fn refresh(
    args: &Args,
    config: &KalmanConfig,
    tracker: Option<&mut FleetTracker>,
    refresh_count: u64,
) -> Result<()> {
    let started = Instant::now();
    let vehicles = feeds::load_vehicles(&args.vehicles)?;
    let fixes = feeds::load_fixes(&args.coords)?;

    let (output, stats) = match tracker {
        Some(tracker) => {
            let (output, stats) = tracker.refresh(&vehicles, &fixes);
            (output, Some(stats))
        }
        None if args.parallel > 1 => (
            process_parallel(&vehicles, &fixes, config, args.parallel),
            None,
        ),
        None => (process_with_report(&vehicles, &fixes, config), None),
    };

    let mut status = RefreshStatus::new(refresh_count, &output);
    if let Some(stats) = stats.as_ref() {
        status = status.with_refresh_stats(stats);
    }
    status.elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    write_trajectories(args, &output)?;
    if let Some(path) = &args.status {
        status
            .save(path)
            .with_context(|| format!("writing status to {}", path.display()))?;
    }
    log::info!("{}", status.one_line());
    Ok(())
}

fn write_trajectories(args: &Args, output: &ProcessOutput) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(&output.trajectories)?
    } else {
        serde_json::to_string(&output.trajectories)?
    };

    match &args.output {
        Some(path) => {
            // Atomic replace for readers polling the file
            let tmp = path.with_extension("tmp");
            fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
            fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{json}")?;
        }
    }
    Ok(())
}
