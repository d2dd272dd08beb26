//! Telemetry frame
//!
//! A flat, serializable view of one [`Snapshot`]. The transport decides the
//! wire format; `Display` renders the frame as a single `key=value` line
//! for serial consoles and logs.

use core::fmt;

use serde::Serialize;

use crate::app_state::Snapshot;
use crate::calibration::CALIBRATION_SAMPLES;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetryFrame {
    pub uptime_ms: u64,
    /// Calibrated PM2.5 estimate in µg/m³.
    pub pm25: Option<f32>,
    pub category: Option<&'static str>,
    pub band: Option<usize>,
    pub offset: f32,
    pub calibration: &'static str,
    pub calibration_progress: u16,
    pub warming_up: bool,
    pub stale: bool,
    pub warning: bool,
    pub sensor_failures: u32,
    pub storage_failures: u32,
    pub overruns: u32,
    pub disabled_tasks: u8,
}

impl TelemetryFrame {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let estimate = snapshot.estimate.as_ref();
        Self {
            uptime_ms: snapshot.uptime.as_millis(),
            pm25: estimate.map(|e| e.value),
            category: snapshot.band.map(|b| b.category.label()),
            band: snapshot.band.map(|b| b.index),
            offset: snapshot.offset.value,
            calibration: snapshot.calibration.label(),
            calibration_progress: snapshot.calibration_progress,
            warming_up: estimate.is_some_and(|e| e.warming_up),
            stale: estimate.is_none_or(|e| e.stale),
            warning: snapshot.warning,
            sensor_failures: snapshot.diagnostics.sensor_failures,
            storage_failures: snapshot.diagnostics.storage_failures,
            overruns: snapshot.diagnostics.overruns,
            disabled_tasks: snapshot.diagnostics.disabled_tasks,
        }
    }
}

impl fmt::Display for TelemetryFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uptime_ms={}", self.uptime_ms)?;
        match self.pm25 {
            Some(pm25) => write!(f, " pm25={:.2}", pm25)?,
            None => f.write_str(" pm25=-")?,
        }
        match (self.category, self.band) {
            (Some(category), Some(band)) => write!(f, " band={}({})", category, band)?,
            _ => f.write_str(" band=-")?,
        }
        write!(
            f,
            " offset={:.4} cal={} progress={}/{} warming={} stale={} warning={} sensor_failures={} storage_failures={} overruns={} disabled_tasks={}",
            self.offset,
            self.calibration,
            self.calibration_progress,
            CALIBRATION_SAMPLES,
            self.warming_up as u8,
            self.stale as u8,
            self.warning as u8,
            self.sensor_failures,
            self.storage_failures,
            self.overruns,
            self.disabled_tasks,
        )
    }
}
