//! Console stand-ins for the display, telemetry link, input and relays.

use std::collections::VecDeque;

use embassy_time::{Duration, Instant};
use log::{debug, info};

use sentinel_core::app_state::Snapshot;
use sentinel_core::automation::{ActuatorBank, ActuatorError, AqiCategory};
use sentinel_core::calibration::CalibrationState;
use sentinel_core::interface::{Command, Interface};
use sentinel_core::telemetry::TelemetryFrame;

/// First GPIO used for the band outputs on the device.
const FIRST_BAND_GPIO: usize = 2;

/// Prints what the relays would do.
#[derive(Default)]
pub struct LoggingActuators<const N: usize> {
    active: Option<usize>,
}

impl<const N: usize> LoggingActuators<N> {
    pub fn new() -> Self {
        Self { active: None }
    }
}

impl<const N: usize> ActuatorBank for LoggingActuators<N> {
    fn outputs(&self) -> usize {
        N
    }

    fn set_band_output(&mut self, index: Option<usize>) -> Result<(), ActuatorError> {
        if let Some(index) = index
            && index >= N
        {
            return Err(ActuatorError::IndexOutOfRange { index, outputs: N });
        }
        if let Some(previous) = self.active {
            info!("GP{} off", FIRST_BAND_GPIO + previous);
        }
        if let Some(index) = index {
            info!("GP{} on", FIRST_BAND_GPIO + index);
        }
        self.active = index;
        Ok(())
    }
}

/// Logs telemetry frames, prints a status line when something visible
/// changes, and replays commands given on the command line.
#[derive(Default)]
pub struct ConsoleInterface {
    commands: VecDeque<(Instant, Command)>,
    last_status: Option<(Option<AqiCategory>, CalibrationState, Option<&'static str>, bool)>,
    last_progress_report: u16,
}

impl ConsoleInterface {
    pub fn new() -> Self {
        Self {
            commands: VecDeque::new(),
            last_status: None,
            last_progress_report: 0,
        }
    }

    /// Queue `command` for `at` seconds into the run. Commands must be
    /// queued in time order.
    pub fn schedule(&mut self, at: Duration, command: Command) {
        self.commands
            .push_back((Instant::from_ticks(0) + at, command));
    }
}

impl Interface for ConsoleInterface {
    fn publish(&mut self, frame: &TelemetryFrame) {
        info!(target: "telemetry", "{}", frame);
    }

    fn render(&mut self, snapshot: &Snapshot) {
        let status = (
            snapshot.band.map(|b| b.category),
            snapshot.calibration,
            snapshot.banner.map(|b| b.label()),
            snapshot.warning,
        );

        if snapshot.calibration == CalibrationState::Capturing {
            let step = snapshot.calibration_progress / 100;
            if step != self.last_progress_report {
                self.last_progress_report = step;
                info!("Calibrating... {} samples", snapshot.calibration_progress);
            }
        } else {
            self.last_progress_report = 0;
        }

        if self.last_status == Some(status) {
            return;
        }
        self.last_status = Some(status);

        let pm25 = snapshot
            .estimate
            .map(|e| e.value)
            .unwrap_or(f32::NAN);
        info!(
            "[{:>6.1}s] PM2.5 {:>6.2} | {:<12} | {:<10} | {}{}",
            snapshot.uptime.as_millis() as f32 / 1000.0,
            pm25,
            status.0.map_or("--", |c| c.label()),
            snapshot.calibration.label(),
            status.2.unwrap_or(""),
            if snapshot.warning { " WARNING" } else { "" },
        );
    }

    fn poll_command(&mut self, now: Instant) -> Option<Command> {
        match self.commands.front() {
            Some((at, _)) if *at <= now => {
                let (_, command) = self.commands.pop_front()?;
                debug!("Input: {:?}", command);
                Some(command)
            }
            _ => None,
        }
    }
}
