use core::fmt;

use embassy_time::{Duration, Instant};
use serde::Serialize;

use crate::automation::BandStatus;
use crate::calibration::{CalibrationOffset, CalibrationState};
use crate::sampling::ConcentrationEstimate;
use crate::scheduler::SchedulerStats;

/// How long a calibration result stays on screen.
pub const BANNER_DURATION: Duration = Duration::from_secs(2);

/// Transient result message after a calibration commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Banner {
    Logged,
    Failed,
}

impl Banner {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Logged => "CAL & LOGGED!",
            Self::Failed => "CAL FAILED",
        }
    }
}

impl fmt::Display for Banner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy)]
pub(super) struct TimedBanner {
    pub banner: Banner,
    pub until: Instant,
}

/// Locally recovered faults, surfaced as counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    /// Sensor cycles that timed out or failed to trigger.
    pub sensor_failures: u32,
    pub consecutive_sensor_failures: u32,
    pub storage_failures: u32,
    pub invalid_triggers: u32,
    pub actuator_failures: u32,
    pub overruns: u32,
    pub skipped_slots: u32,
    pub disabled_tasks: u8,
    /// The stored configuration was unusable and defaults are in effect.
    pub config_defaulted: bool,
}

impl Diagnostics {
    pub(super) fn absorb(&mut self, stats: SchedulerStats) {
        self.overruns = stats.overruns;
        self.skipped_slots = stats.skipped_slots;
        self.disabled_tasks = stats.disabled_tasks;
    }
}

/// Everything the display and telemetry need, copied out in one go.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub uptime: Duration,
    pub estimate: Option<ConcentrationEstimate>,
    pub band: Option<BandStatus>,
    pub calibration: CalibrationState,
    /// Samples captured by the run in flight.
    pub calibration_progress: u16,
    pub offset: CalibrationOffset,
    pub banner: Option<Banner>,
    /// The estimate is above the configured warning threshold.
    pub warning: bool,
    pub diagnostics: Diagnostics,
}
