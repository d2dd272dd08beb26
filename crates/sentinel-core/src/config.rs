//! Monitor configuration
//!
//! Every tunable of the core in one serde struct. Firmware loads it from
//! [`CONFIG_FILE`](crate::storage::CONFIG_FILE) at boot and falls back to
//! [`MonitorConfig::default`] when the file is missing or invalid.

use embassy_time::Duration;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::automation::BandTable;
use crate::calibration::CalibrationOffset;
use crate::sampling::{HISTORY_LEN, SensorScaling};
use crate::storage::StorageError;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ConfigError {
    #[error("configuration unreadable: {0}")]
    Unreadable(StorageError),
    #[error("{field} {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct MonitorConfig {
    pub sampler_period_ms: u32,
    /// Readings averaged per estimate.
    pub smoothing_window: u8,
    pub calibration_period_ms: u32,
    pub automation_period_ms: u32,
    pub telemetry_period_ms: u32,
    pub display_period_ms: u32,
    /// µg/m³ an estimate must clear a band boundary by before switching.
    pub hysteresis_margin: f32,
    /// How long the new band must persist before switching.
    pub dwell_ms: u32,
    /// Estimates above this raise the warning flag.
    pub warning_threshold: f32,
    pub scaling: SensorScaling,
    /// Offset used until a calibration has been committed.
    pub default_offset: f32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sampler_period_ms: 50,
            smoothing_window: 15,
            calibration_period_ms: 10,
            automation_period_ms: 200,
            telemetry_period_ms: 1_000,
            display_period_ms: 250,
            hysteresis_margin: 1.0,
            dwell_ms: 3_000,
            warning_threshold: 35.0,
            scaling: SensorScaling::default(),
            // 0.6 V clean-air output at 170 µg/m³ per volt
            default_offset: 102.0,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let periods = [
            ("sampler_period_ms", self.sampler_period_ms),
            ("calibration_period_ms", self.calibration_period_ms),
            ("automation_period_ms", self.automation_period_ms),
            ("telemetry_period_ms", self.telemetry_period_ms),
            ("display_period_ms", self.display_period_ms),
        ];
        for (field, period) in periods {
            if period == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be non-zero",
                });
            }
        }

        if self.smoothing_window == 0 || self.smoothing_window as usize > HISTORY_LEN {
            return Err(ConfigError::Invalid {
                field: "smoothing_window",
                reason: "must be between 1 and the history length",
            });
        }

        let non_negative = [
            ("hysteresis_margin", self.hysteresis_margin),
            ("warning_threshold", self.warning_threshold),
            ("default_offset", self.default_offset),
        ];
        for (field, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be a finite, non-negative number",
                });
            }
        }

        // A margin this wide makes the band below unreachable on the way down.
        if self.hysteresis_margin >= BandTable::standard().narrowest_width() / 2.0 {
            return Err(ConfigError::Invalid {
                field: "hysteresis_margin",
                reason: "must be less than half the narrowest band",
            });
        }

        if self.scaling.adc_full_scale == 0 {
            return Err(ConfigError::Invalid {
                field: "scaling.adc_full_scale",
                reason: "must be non-zero",
            });
        }
        if !(self.scaling.reference_volts.is_finite() && self.scaling.reference_volts > 0.0) {
            return Err(ConfigError::Invalid {
                field: "scaling.reference_volts",
                reason: "must be positive",
            });
        }
        if !(self.scaling.ug_per_volt.is_finite() && self.scaling.ug_per_volt > 0.0) {
            return Err(ConfigError::Invalid {
                field: "scaling.ug_per_volt",
                reason: "must be positive",
            });
        }

        Ok(())
    }

    /// Resolve a load attempt. A missing record quietly means defaults;
    /// anything else is logged and handed back for the diagnostics.
    pub fn or_default(loaded: Result<Self, ConfigError>) -> (Self, Option<ConfigError>) {
        match loaded {
            Ok(config) => (config, None),
            Err(ConfigError::Unreadable(StorageError::NotFound { .. })) => {
                info!("No stored configuration, using defaults");
                (Self::default(), None)
            }
            Err(e) => {
                warn!("Stored configuration rejected ({}), using defaults", e);
                (Self::default(), Some(e))
            }
        }
    }

    pub fn sampler_period(&self) -> Duration {
        Duration::from_millis(self.sampler_period_ms as u64)
    }

    pub fn calibration_period(&self) -> Duration {
        Duration::from_millis(self.calibration_period_ms as u64)
    }

    pub fn automation_period(&self) -> Duration {
        Duration::from_millis(self.automation_period_ms as u64)
    }

    pub fn telemetry_period(&self) -> Duration {
        Duration::from_millis(self.telemetry_period_ms as u64)
    }

    pub fn display_period(&self) -> Duration {
        Duration::from_millis(self.display_period_ms as u64)
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms as u64)
    }

    pub fn factory_offset(&self) -> CalibrationOffset {
        CalibrationOffset::factory(self.default_offset)
    }
}
