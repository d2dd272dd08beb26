//! AQI band automation
//!
//! Maps the smoothed estimate onto one of six ordered bands and keeps
//! exactly one actuator output active. A band change needs the estimate
//! to clear the crossed boundary by the hysteresis margin and to stay
//! there for the dwell time, in either direction.

mod actuators;
mod bands;

pub use actuators::{ActuatorBank, ActuatorError, GpioActuators};
pub use bands::{AqiBand, AqiCategory, BAND_COUNT, BandTable, BandTableError};

use embassy_time::{Duration, Instant};
use log::{debug, info};
use serde::Serialize;

use crate::sampling::ConcentrationEstimate;

/// What the controller did on one update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AutomationOutcome {
    /// No settled, fresh estimate to act on.
    Waiting,
    /// Calibration owns the sensor; outputs are held.
    Frozen,
    Held { band: usize },
    /// The estimate is past the margin but the dwell has not elapsed.
    Pending { band: usize, target: usize },
    Switched { from: Option<usize>, to: usize },
}

/// Band currently driven, as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BandStatus {
    pub index: usize,
    pub category: AqiCategory,
    pub actuator: usize,
    /// The band is not tracking live readings (calibrating or sensor lost).
    pub stale: bool,
}

#[derive(Debug, Clone, Copy)]
struct PendingSwitch {
    target: usize,
    since: Instant,
}

pub struct AutomationController<A> {
    actuators: A,
    table: BandTable,
    margin: f32,
    dwell: Duration,
    active: Option<usize>,
    pending: Option<PendingSwitch>,
    frozen: bool,
    stale: bool,
    transitions: u32,
}

impl<A: ActuatorBank> AutomationController<A> {
    pub fn new(actuators: A, table: BandTable, margin: f32, dwell: Duration) -> Self {
        Self {
            actuators,
            table,
            margin,
            dwell,
            active: None,
            pending: None,
            frozen: false,
            stale: false,
            transitions: 0,
        }
    }

    pub fn update(
        &mut self,
        estimate: Option<&ConcentrationEstimate>,
        calibrating: bool,
        now: Instant,
    ) -> Result<AutomationOutcome, ActuatorError> {
        if calibrating {
            if !self.frozen {
                info!("Band outputs frozen while calibrating");
            }
            self.frozen = true;
            self.stale = true;
            self.pending = None;
            return Ok(AutomationOutcome::Frozen);
        }
        if self.frozen {
            info!("Band outputs resumed");
            self.frozen = false;
        }

        self.stale = estimate.is_none_or(|e| e.stale);
        let Some(estimate) = estimate.filter(|e| !e.warming_up && !e.stale) else {
            self.pending = None;
            return Ok(AutomationOutcome::Waiting);
        };

        let candidate = self.table.classify(estimate.value);
        let Some(current) = self.active else {
            self.switch(None, candidate)?;
            return Ok(AutomationOutcome::Switched {
                from: None,
                to: candidate,
            });
        };

        if !self.clears_margin(current, candidate, estimate.value) {
            if self.pending.take().is_some() {
                debug!("Band change to {} abandoned", candidate);
            }
            return Ok(AutomationOutcome::Held { band: current });
        }

        // Keep the dwell running while the estimate stays on the same side
        // of the current band, even if it moves between bands over there.
        let since = match self.pending {
            Some(p) if (p.target > current) == (candidate > current) => p.since,
            _ => now,
        };
        self.pending = Some(PendingSwitch {
            target: candidate,
            since,
        });

        if now.saturating_duration_since(since) >= self.dwell {
            self.switch(Some(current), candidate)?;
            return Ok(AutomationOutcome::Switched {
                from: Some(current),
                to: candidate,
            });
        }

        Ok(AutomationOutcome::Pending {
            band: current,
            target: candidate,
        })
    }

    fn clears_margin(&self, current: usize, candidate: usize, value: f32) -> bool {
        if candidate > current {
            self.table
                .upper_limit(current)
                .is_some_and(|upper| value > upper + self.margin)
        } else if candidate < current {
            value <= self.table.lower_limit(current) - self.margin
        } else {
            false
        }
    }

    fn switch(&mut self, from: Option<usize>, to: usize) -> Result<(), ActuatorError> {
        let band = self.table.bands()[to];
        self.actuators.set_band_output(Some(band.actuator))?;

        self.active = Some(to);
        self.pending = None;
        self.transitions = self.transitions.wrapping_add(1);
        match from {
            Some(from) => info!(
                "Air quality band {} -> {} (output {})",
                self.table.bands()[from].category,
                band.category,
                band.actuator
            ),
            None => info!("Air quality band {} (output {})", band.category, band.actuator),
        }
        Ok(())
    }

    pub fn status(&self) -> Option<BandStatus> {
        let index = self.active?;
        let band = self.table.band(index)?;
        Some(BandStatus {
            index,
            category: band.category,
            actuator: band.actuator,
            stale: self.stale,
        })
    }

    pub fn active_band(&self) -> Option<usize> {
        self.active
    }

    pub fn transitions(&self) -> u32 {
        self.transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingActuators;

    fn controller(outputs: usize) -> (AutomationController<RecordingActuators>, RecordingActuators) {
        let actuators = RecordingActuators::new(outputs);
        let controller = AutomationController::new(
            actuators.clone(),
            BandTable::standard(),
            1.0,
            Duration::from_secs(3),
        );
        (controller, actuators)
    }

    fn settled(value: f32, ms: u64) -> ConcentrationEstimate {
        ConcentrationEstimate {
            value,
            derived_at: Instant::from_millis(ms),
            samples: 15,
            warming_up: false,
            stale: false,
        }
    }

    /// Feed `value` every 200 ms over `[from, to)` and return the last outcome.
    fn hold(
        controller: &mut AutomationController<RecordingActuators>,
        value: f32,
        from: u64,
        to: u64,
    ) -> AutomationOutcome {
        let mut outcome = AutomationOutcome::Waiting;
        let mut ms = from;
        while ms < to {
            outcome = controller
                .update(Some(&settled(value, ms)), false, Instant::from_millis(ms))
                .unwrap();
            ms += 200;
        }
        outcome
    }

    #[test]
    fn test_first_actuation_adopts_classified_band() {
        let (mut controller, actuators) = controller(BAND_COUNT);

        let outcome = controller
            .update(Some(&settled(14.22, 0)), false, Instant::from_millis(0))
            .unwrap();

        assert_eq!(outcome, AutomationOutcome::Switched { from: None, to: 1 });
        assert_eq!(actuators.history(), [Some(1)]);
        assert_eq!(
            controller.status().map(|s| s.category),
            Some(AqiCategory::Moderate)
        );
    }

    #[test]
    fn test_no_actuation_while_warming_up() {
        let (mut controller, actuators) = controller(BAND_COUNT);
        let mut estimate = settled(40.0, 0);
        estimate.warming_up = true;

        let outcome = controller
            .update(Some(&estimate), false, Instant::from_millis(0))
            .unwrap();

        assert_eq!(outcome, AutomationOutcome::Waiting);
        assert!(actuators.history().is_empty());
        assert_eq!(controller.status(), None);
    }

    #[test]
    fn test_noise_near_boundary_does_not_flap() {
        let (mut controller, actuators) = controller(BAND_COUNT);
        hold(&mut controller, 5.0, 0, 200);

        // ±0.5 around 12.0 for a minute never clears the 1.0 margin.
        let mut ms = 200;
        for i in 0..300 {
            let value = if i % 2 == 0 { 11.5 } else { 12.5 };
            controller
                .update(Some(&settled(value, ms)), false, Instant::from_millis(ms))
                .unwrap();
            ms += 200;
        }

        assert_eq!(actuators.history(), [Some(0)]);
        assert_eq!(controller.transitions(), 1);
    }

    #[test]
    fn test_brief_excursion_shorter_than_dwell_is_ignored() {
        let (mut controller, actuators) = controller(BAND_COUNT);
        hold(&mut controller, 5.0, 0, 200);

        let outcome = hold(&mut controller, 20.0, 200, 2_400);
        assert_eq!(outcome, AutomationOutcome::Pending { band: 0, target: 1 });
        hold(&mut controller, 8.0, 2_400, 10_000);

        assert_eq!(actuators.history(), [Some(0)]);
    }

    #[test]
    fn test_upward_switch_after_dwell() {
        let (mut controller, actuators) = controller(BAND_COUNT);
        hold(&mut controller, 5.0, 0, 200);

        // Pending from t=200, dwell elapses at t=3200.
        let before = hold(&mut controller, 20.0, 200, 3_200);
        assert_eq!(before, AutomationOutcome::Pending { band: 0, target: 1 });

        let after = hold(&mut controller, 20.0, 3_200, 3_400);
        assert_eq!(after, AutomationOutcome::Switched { from: Some(0), to: 1 });
        assert_eq!(actuators.history(), [Some(0), Some(1)]);
    }

    #[test]
    fn test_downward_hysteresis() {
        let (mut controller, actuators) = controller(BAND_COUNT);
        hold(&mut controller, 20.0, 0, 200);
        assert_eq!(controller.active_band(), Some(1));

        // Below 12.0 but within the margin: stays Moderate.
        let outcome = hold(&mut controller, 11.5, 200, 20_000);
        assert_eq!(outcome, AutomationOutcome::Held { band: 1 });

        hold(&mut controller, 10.5, 20_000, 23_400);
        assert_eq!(controller.active_band(), Some(0));
        assert_eq!(actuators.active(), Some(0));
    }

    #[test]
    fn test_jump_across_several_bands_lands_on_classified_band() {
        let (mut controller, _) = controller(BAND_COUNT);
        hold(&mut controller, 5.0, 0, 200);
        hold(&mut controller, 300.0, 200, 3_400);
        assert_eq!(controller.active_band(), Some(5));
    }

    #[test]
    fn test_frozen_during_calibration() {
        let (mut controller, actuators) = controller(BAND_COUNT);
        hold(&mut controller, 5.0, 0, 200);

        for ms in (200..10_000).step_by(200) {
            let outcome = controller
                .update(Some(&settled(100.0, ms)), true, Instant::from_millis(ms))
                .unwrap();
            assert_eq!(outcome, AutomationOutcome::Frozen);
        }
        assert!(controller.status().unwrap().stale);
        assert_eq!(actuators.history(), [Some(0)]);

        // Dwell restarts once calibration is over.
        let outcome = hold(&mut controller, 100.0, 10_000, 12_000);
        assert!(matches!(outcome, AutomationOutcome::Pending { .. }));
        assert!(!controller.status().unwrap().stale);
    }

    #[test]
    fn test_stale_estimate_holds_band() {
        let (mut controller, actuators) = controller(BAND_COUNT);
        hold(&mut controller, 5.0, 0, 200);

        let mut estimate = settled(100.0, 200);
        estimate.stale = true;
        for ms in (200..10_000).step_by(200) {
            controller
                .update(Some(&estimate), false, Instant::from_millis(ms))
                .unwrap();
        }

        assert_eq!(actuators.history(), [Some(0)]);
        assert!(controller.status().unwrap().stale);
    }

    #[test]
    fn test_missing_output_is_reported() {
        let (mut controller, _) = controller(3);
        let result = controller.update(Some(&settled(100.0, 0)), false, Instant::from_millis(0));
        assert_eq!(
            result,
            Err(ActuatorError::IndexOutOfRange {
                index: 3,
                outputs: 3
            })
        );
        assert_eq!(controller.active_band(), None);
    }

    #[test]
    fn test_widest_accepted_margin_still_returns_to_good() {
        let actuators = RecordingActuators::new(BAND_COUNT);
        let mut controller = AutomationController::new(
            actuators.clone(),
            BandTable::standard(),
            5.9,
            Duration::from_secs(3),
        );
        hold(&mut controller, 20.0, 0, 200);
        assert_eq!(controller.active_band(), Some(1));

        hold(&mut controller, 0.0, 200, 600_000);

        assert_eq!(controller.active_band(), Some(0));
        assert_eq!(actuators.history(), [Some(1), Some(0)]);
    }
}
