//! Desktop simulator for the Air-Sentinel particulate monitor.
//!
//! Runs the complete sentinel-core task table (sampler, calibration,
//! automation, telemetry, display and input) against a synthetic dust
//! sensor on a virtual clock. Calibration state persists in a data
//! directory using the same records the device writes to its SD card.
//!
//! # Options
//!
//! | Flag                 | Meaning                                              |
//! |----------------------|------------------------------------------------------|
//! | `--seconds N`        | Simulated run length (default 120)                   |
//! | `--calibrate-at S`   | Trigger a zero-air calibration S seconds in          |
//! | `--abort-at S`       | Abort the capture S seconds in                       |
//! | `--offset V`         | Enter a manual offset of V µg/m³ one second in       |
//! | `--dropout N`        | Every N-th sensor cycle times out                    |
//! | `--data-dir PATH`    | Where the offset and history files live              |
//! | `--realtime`         | Pace the virtual clock against the wall clock        |
//! | `--write-config`     | Store the effective configuration in the data dir    |
//!
//! Set `RUST_LOG=debug` for per-task detail.

mod console;
mod file_store;
mod sensor;

use std::path::PathBuf;

use anyhow::{Context, anyhow, bail};
use embassy_time::{Duration, Instant};
use log::{info, warn};

use sentinel_core::app_state::{AppScheduler, AppState, register_tasks};
use sentinel_core::automation::BAND_COUNT;
use sentinel_core::clock::{Clock, ManualClock};
use sentinel_core::config::MonitorConfig;
use sentinel_core::interface::Command;

use console::{ConsoleInterface, LoggingActuators};
use file_store::FileStore;
use sensor::{Episode, SyntheticSensor};

/// How long the sensor sits in zero air after a calibration trigger.
/// Covers the 500-sample capture at the default 10 ms tick.
const ZERO_AIR_WINDOW: Duration = Duration::from_secs(8);

struct Options {
    seconds: u64,
    calibrate_at: Option<u64>,
    abort_at: Option<u64>,
    offset: Option<f32>,
    dropout: u32,
    data_dir: PathBuf,
    realtime: bool,
    write_config: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            seconds: 120,
            calibrate_at: None,
            abort_at: None,
            offset: None,
            dropout: 0,
            data_dir: PathBuf::from("sim-data"),
            realtime: false,
            write_config: false,
        }
    }
}

fn parse_args() -> anyhow::Result<Options> {
    let mut options = Options::default();
    let mut args = std::env::args().skip(1);

    while let Some(flag) = args.next() {
        let mut value = || {
            args.next()
                .with_context(|| format!("{} needs a value", flag))
        };
        match flag.as_str() {
            "--seconds" => options.seconds = value()?.parse().context("--seconds")?,
            "--calibrate-at" => {
                options.calibrate_at = Some(value()?.parse().context("--calibrate-at")?)
            }
            "--abort-at" => options.abort_at = Some(value()?.parse().context("--abort-at")?),
            "--offset" => options.offset = Some(value()?.parse().context("--offset")?),
            "--dropout" => options.dropout = value()?.parse().context("--dropout")?,
            "--data-dir" => options.data_dir = PathBuf::from(value()?),
            "--realtime" => options.realtime = true,
            "--write-config" => options.write_config = true,
            other => bail!("unknown option {}", other),
        }
    }

    if options.seconds == 0 {
        bail!("--seconds must be positive");
    }
    Ok(options)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let options = parse_args()?;
    info!("Starting Air-Sentinel simulator for {} s", options.seconds);

    let store = FileStore::open(&options.data_dir)
        .with_context(|| format!("opening {}", options.data_dir.display()))?;
    let (config, config_error) = MonitorConfig::or_default(store.load_config());
    if options.write_config {
        store
            .save_config(&config)
            .map_err(|e| anyhow!("saving configuration: {}", e))?;
        info!("Configuration written to {}", store.dir().display());
    }

    let clock = ManualClock::default();

    let mut sensor = SyntheticSensor::new(&clock, config.scaling)
        .with_episode(Episode {
            start_s: 30.0,
            rise_s: 20.0,
            hold_s: 30.0,
            peak: 90.0,
        })
        .with_dropouts(options.dropout);

    let mut interface = ConsoleInterface::new();
    if let Some(offset) = options.offset {
        interface.schedule(Duration::from_secs(1), Command::SetOffset(offset));
    }
    if let Some(at) = options.calibrate_at {
        let from = Instant::from_secs(at);
        sensor = sensor.zero_air(from, from + ZERO_AIR_WINDOW);
        interface.schedule(Duration::from_secs(at), Command::TriggerCalibration);
    }
    if let Some(at) = options.abort_at {
        interface.schedule(Duration::from_secs(at), Command::AbortCalibration);
    }

    let mut app = AppState::new(
        config,
        sensor,
        LoggingActuators::<BAND_COUNT>::new(),
        store,
        interface,
        clock.now(),
    )
    .map_err(|e| anyhow!("assembling the monitor: {}", e))?;
    if let Some(e) = config_error {
        app.record_config_failure(&e);
    }

    let mut scheduler = AppScheduler::new();
    register_tasks(&config, &mut scheduler, clock.now())
        .map_err(|e| anyhow!("registering tasks: {}", e))?;

    let end = Instant::from_secs(options.seconds);
    let wall_start = std::time::Instant::now();
    loop {
        scheduler.run_pending(&mut app, &clock);

        let Some(wake) = scheduler.next_wake() else {
            warn!("No enabled tasks left");
            break;
        };
        if wake > end {
            break;
        }
        if options.realtime {
            let target = wall_start + std::time::Duration::from_millis(wake.as_millis());
            if let Some(wait) = target.checked_duration_since(std::time::Instant::now()) {
                std::thread::sleep(wait);
            }
        }
        clock.advance_to(wake);
    }

    let stats = scheduler.stats();
    let snapshot = app.snapshot(clock.now());
    info!(
        "Simulated {} s: {} task runs, {} overruns, {} skipped slots, {} disabled tasks",
        options.seconds, stats.runs, stats.overruns, stats.skipped_slots, stats.disabled_tasks
    );
    info!(
        "Offset {:.4} ({:?}), sensor failures {}, storage failures {}",
        snapshot.offset.value,
        snapshot.offset.source,
        snapshot.diagnostics.sensor_failures,
        snapshot.diagnostics.storage_failures
    );

    let recent: Vec<f32> = app.history().map(|r| r.value).collect();
    if let (Some(min), Some(max)) = (
        recent.iter().copied().reduce(f32::min),
        recent.iter().copied().reduce(f32::max),
    ) {
        info!(
            "Last {} raw readings span {:.2} to {:.2} ug/m3",
            recent.len(),
            min,
            max
        );
    }

    let history = app
        .audit_log()
        .map_err(|e| anyhow!("reading calibration history: {}", e))?;
    info!("Calibration history ({} entries)", history.len());
    for entry in history {
        info!(
            "  #{} at {} ms: {:.4} -> {:.4} (delta {:+.4}, {:?})",
            entry.sequence, entry.timestamp_ms, entry.prior, entry.new, entry.delta, entry.source
        );
    }

    Ok(())
}
