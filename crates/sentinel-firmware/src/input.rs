//! Boot button gestures
//!
//! Holding the button for [`HOLD_TO_CALIBRATE`] and releasing it starts a
//! calibration; a shorter press aborts one. Presses shorter than
//! [`DEBOUNCE`] are contact bounce and ignored.

use embassy_time::{Duration, Instant};
use embedded_hal::digital::InputPin;
use log::{info, warn};

use sentinel_core::interface::Command;

pub const HOLD_TO_CALIBRATE: Duration = Duration::from_secs(5);
pub const DEBOUNCE: Duration = Duration::from_millis(30);

/// Active-low push button decoded into [`Command`]s.
pub struct BootButton<P> {
    pin: P,
    pressed_since: Option<Instant>,
    hold_announced: bool,
}

impl<P: InputPin> BootButton<P> {
    pub fn new(pin: P) -> Self {
        Self {
            pin,
            pressed_since: None,
            hold_announced: false,
        }
    }

    /// Sample the pin once. Returns a command on release.
    pub fn poll(&mut self, now: Instant) -> Option<Command> {
        let pressed = match self.pin.is_low() {
            Ok(pressed) => pressed,
            Err(_) => {
                warn!("Boot button read failed");
                return None;
            }
        };

        match (pressed, self.pressed_since) {
            (true, None) => {
                self.pressed_since = Some(now);
                self.hold_announced = false;
                None
            }
            (true, Some(since)) => {
                if !self.hold_announced && now.saturating_duration_since(since) >= HOLD_TO_CALIBRATE {
                    self.hold_announced = true;
                    info!("Release to start calibration");
                }
                None
            }
            (false, Some(since)) => {
                self.pressed_since = None;
                let held = now.saturating_duration_since(since);
                if held >= HOLD_TO_CALIBRATE {
                    Some(Command::TriggerCalibration)
                } else if held >= DEBOUNCE {
                    Some(Command::AbortCalibration)
                } else {
                    None
                }
            }
            (false, None) => None,
        }
    }
}
