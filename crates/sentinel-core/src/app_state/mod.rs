//! Application-wide state and error types for Air-Sentinel
//!
//! [`AppState`] owns every component and implements the scheduler's
//! [`TaskSet`], so each task body is a plain method with exclusive access
//! to the state it needs. Nothing here blocks: a task does one bounded
//! step and returns.

mod snapshot;

pub use snapshot::*;

use alloc::vec::Vec;

use embassy_time::{Duration, Instant};
use log::{debug, error, info, warn};
use thiserror_no_std::Error;

use crate::automation::{
    ActuatorBank, ActuatorError, AutomationController, BandStatus, BandTable, BandTableError,
};
use crate::calibration::{
    AuditLogEntry, CalibrationEngine, CalibrationError, CalibrationEvent, CalibrationOffset,
    CalibrationState,
};
use crate::config::{ConfigError, MonitorConfig};
use crate::interface::{Command, Interface};
use crate::sampling::{ConcentrationEstimate, RawReading, Sampler};
use crate::scheduler::{
    Priority, Scheduler, SchedulerError, TaskContext, TaskFault, TaskSet, TaskSpec,
};
use crate::sensors::{DustSensor, SensorError};
use crate::storage::{CalibrationStore, StorageError};
use crate::telemetry::TelemetryFrame;

/// Number of entries in the task table.
pub const TASK_COUNT: usize = 6;

/// How often the input collaborator is polled.
pub const INPUT_PERIOD: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskId {
    Sampler,
    Calibration,
    Automation,
    Telemetry,
    Display,
    Input,
}

impl TaskId {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sampler => "sampler",
            Self::Calibration => "calibration",
            Self::Automation => "automation",
            Self::Telemetry => "telemetry",
            Self::Display => "display",
            Self::Input => "input",
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Actuator error: {0}")]
    Actuator(#[from] ActuatorError),
    #[error("Band table error: {0}")]
    BandTable(#[from] BandTableError),
}

/// Register the full task table, all first due at `start`.
pub fn register_tasks<const N: usize>(
    config: &MonitorConfig,
    scheduler: &mut Scheduler<TaskId, N>,
    start: Instant,
) -> Result<(), SchedulerError> {
    let table = [
        (TaskId::Sampler, config.sampler_period(), 2, Priority::Sensor),
        (TaskId::Calibration, config.calibration_period(), 2, Priority::Sensor),
        (TaskId::Automation, config.automation_period(), 1, Priority::Control),
        (TaskId::Telemetry, config.telemetry_period(), 10, Priority::Interface),
        (TaskId::Display, config.display_period(), 20, Priority::Interface),
        (TaskId::Input, INPUT_PERIOD, 1, Priority::Interface),
    ];

    for (id, period, budget_ms, priority) in table {
        scheduler.add(
            TaskSpec {
                id,
                period,
                budget: Duration::from_millis(budget_ms),
                priority,
            },
            start,
        )?;
    }
    Ok(())
}

/// Main application state container
pub struct AppState<S, A, St, I> {
    config: MonitorConfig,
    sampler: Sampler<S>,
    calibration: CalibrationEngine,
    automation: AutomationController<A>,
    store: St,
    interface: I,
    diagnostics: Diagnostics,
    banner: Option<TimedBanner>,
    boot: Instant,
}

impl<S, A, St, I> AppState<S, A, St, I>
where
    S: DustSensor,
    A: ActuatorBank,
    St: CalibrationStore,
    I: Interface,
{
    /// Assemble the application and restore the committed offset from `store`.
    ///
    /// Fails when the band table is malformed or drives an output the
    /// actuator bank does not have.
    pub fn new(
        config: MonitorConfig,
        sensor: S,
        actuators: A,
        mut store: St,
        interface: I,
        boot: Instant,
    ) -> Result<Self, AppError> {
        let table = BandTable::new(*BandTable::standard().bands())?;
        table.check_outputs(actuators.outputs())?;

        let calibration = CalibrationEngine::restore(&mut store, config.factory_offset());
        let sampler = Sampler::new(sensor, config.scaling, config.smoothing_window as usize);
        let automation = AutomationController::new(
            actuators,
            table,
            config.hysteresis_margin,
            config.dwell(),
        );

        Ok(Self {
            config,
            sampler,
            calibration,
            automation,
            store,
            interface,
            diagnostics: Diagnostics::default(),
            banner: None,
            boot,
        })
    }

    /// Note that `config` came from defaults because the stored one failed.
    pub fn record_config_failure(&mut self, error: &ConfigError) {
        warn!("Running on default configuration: {}", error);
        self.diagnostics.config_defaulted = true;
    }

    pub fn current_estimate(&self) -> Option<&ConcentrationEstimate> {
        self.sampler.latest()
    }

    pub fn current_band(&self) -> Option<BandStatus> {
        self.automation.status()
    }

    pub fn calibration_state(&self) -> CalibrationState {
        self.calibration.state()
    }

    pub fn calibration_progress(&self) -> u16 {
        self.calibration.progress()
    }

    pub fn current_offset(&self) -> &CalibrationOffset {
        self.calibration.offset()
    }

    /// Raw readings for the trend view, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &RawReading> {
        self.sampler.history()
    }

    /// Stored calibration history, oldest first.
    pub fn audit_log(&mut self) -> Result<Vec<AuditLogEntry>, StorageError> {
        self.store.audit_log()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn snapshot(&self, now: Instant) -> Snapshot {
        let estimate = self.sampler.latest().copied();
        let mut diagnostics = self.diagnostics;
        diagnostics.sensor_failures = self.sampler.total_failures();
        diagnostics.consecutive_sensor_failures = self.sampler.consecutive_failures();

        Snapshot {
            uptime: now.saturating_duration_since(self.boot),
            estimate,
            band: self.automation.status(),
            calibration: self.calibration.state(),
            calibration_progress: self.calibration.progress(),
            offset: *self.calibration.offset(),
            banner: self
                .banner
                .filter(|b| now < b.until)
                .map(|b| b.banner),
            warning: estimate.is_some_and(|e| e.value > self.config.warning_threshold),
            diagnostics,
        }
    }

    pub fn trigger_calibration(&mut self, now: Instant) -> Result<(), CalibrationError> {
        if let Err(e) = self.calibration.trigger(now) {
            self.diagnostics.invalid_triggers = self.diagnostics.invalid_triggers.wrapping_add(1);
            return Err(e);
        }
        self.sampler.mark_stale();
        self.banner = None;
        Ok(())
    }

    /// Returns the number of discarded samples.
    pub fn abort_calibration(&mut self) -> Result<u16, CalibrationError> {
        self.calibration.abort()
    }

    pub fn set_offset_manual(
        &mut self,
        value: f32,
        now: Instant,
    ) -> Result<AuditLogEntry, CalibrationError> {
        let result = self.calibration.commit_manual(value, &mut self.store, now);
        match &result {
            Ok(_) => self.show_banner(Banner::Logged, now),
            Err(CalibrationError::InvalidTrigger { .. }) => {
                self.diagnostics.invalid_triggers =
                    self.diagnostics.invalid_triggers.wrapping_add(1);
            }
            Err(CalibrationError::InvalidOffset { value }) => {
                warn!("Manual offset {} rejected", value);
            }
            Err(_) => {
                self.diagnostics.storage_failures =
                    self.diagnostics.storage_failures.wrapping_add(1);
                self.show_banner(Banner::Failed, now);
            }
        }
        result
    }

    pub fn handle_command(&mut self, command: Command, now: Instant) -> Result<(), CalibrationError> {
        debug!("Command {:?}", command);
        match command {
            Command::TriggerCalibration => self.trigger_calibration(now),
            Command::AbortCalibration => self.abort_calibration().map(|_| ()),
            Command::SetOffset(value) => self.set_offset_manual(value, now).map(|_| ()),
        }
    }

    fn show_banner(&mut self, banner: Banner, now: Instant) {
        self.banner = Some(TimedBanner {
            banner,
            until: now + BANNER_DURATION,
        });
    }

    fn run_sampler(&mut self, now: Instant) {
        if self.calibration.is_active() {
            self.sampler.mark_stale();
            return;
        }

        if let Err(e) = self.sampler.update(self.calibration.offset().value, now) {
            let failures = self.sampler.consecutive_failures();
            if failures == 1 || failures % 100 == 0 {
                warn!("Dust sensor unavailable ({} consecutive): {}", failures, e);
            }
        }
    }

    fn run_calibration(&mut self, now: Instant) {
        match self.calibration.tick(&mut self.sampler, &mut self.store, now) {
            CalibrationEvent::Idle | CalibrationEvent::Computed { .. } => {}
            CalibrationEvent::Captured { samples } => {
                if samples % 100 == 0 {
                    debug!("Calibration captured {} samples", samples);
                }
            }
            CalibrationEvent::SampleMissed(e) => {
                debug!("Calibration sample missed: {}", e);
            }
            CalibrationEvent::Committed(_) => self.show_banner(Banner::Logged, now),
            CalibrationEvent::CommitFailed(e) => {
                error!("Calibration commit failed: {}", e);
                self.diagnostics.storage_failures =
                    self.diagnostics.storage_failures.wrapping_add(1);
                self.show_banner(Banner::Failed, now);
            }
        }
    }

    fn run_automation(&mut self, now: Instant) -> Result<(), TaskFault> {
        let calibrating = self.calibration.is_active();
        match self.automation.update(self.sampler.latest(), calibrating, now) {
            Ok(_) => Ok(()),
            Err(e @ ActuatorError::IndexOutOfRange { .. }) => {
                error!("Band table and actuator bank disagree: {}", e);
                Err(TaskFault::ProgrammingFault {
                    task: TaskId::Automation.name(),
                    details: "band actuator outside the actuator bank",
                })
            }
            Err(e) => {
                warn!("Actuator update failed: {}", e);
                self.diagnostics.actuator_failures =
                    self.diagnostics.actuator_failures.wrapping_add(1);
                Ok(())
            }
        }
    }

    fn run_telemetry(&mut self, now: Instant) {
        let frame = TelemetryFrame::from_snapshot(&self.snapshot(now));
        self.interface.publish(&frame);
    }

    fn run_display(&mut self, now: Instant) {
        let snapshot = self.snapshot(now);
        self.interface.render(&snapshot);
    }

    fn run_input(&mut self, now: Instant) {
        if let Some(command) = self.interface.poll_command(now)
            && let Err(e) = self.handle_command(command, now)
        {
            info!("{:?} not applied: {}", command, e);
        }
    }
}

impl<S, A, St, I> TaskSet for AppState<S, A, St, I>
where
    S: DustSensor,
    A: ActuatorBank,
    St: CalibrationStore,
    I: Interface,
{
    type Id = TaskId;

    fn run(&mut self, id: TaskId, ctx: TaskContext) -> Result<(), TaskFault> {
        self.diagnostics.absorb(ctx.stats);
        match id {
            TaskId::Sampler => self.run_sampler(ctx.now),
            TaskId::Calibration => self.run_calibration(ctx.now),
            TaskId::Automation => return self.run_automation(ctx.now),
            TaskId::Telemetry => self.run_telemetry(ctx.now),
            TaskId::Display => self.run_display(ctx.now),
            TaskId::Input => self.run_input(ctx.now),
        }
        Ok(())
    }
}

/// Scheduler sized for the full task table.
pub type AppScheduler = Scheduler<TaskId, TASK_COUNT>;
