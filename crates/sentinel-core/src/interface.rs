//! Boundary to the user-facing collaborators
//!
//! Display, telemetry transport and input decoding live outside the core.
//! They meet it through [`Interface`]: the core pushes frames and
//! snapshots out and pulls at most one [`Command`] per input tick.

use embassy_time::Instant;

use crate::app_state::Snapshot;
use crate::telemetry::TelemetryFrame;

/// Decoded user intent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    TriggerCalibration,
    AbortCalibration,
    /// Replace the offset with a typed-in value, in µg/m³.
    SetOffset(f32),
}

pub trait Interface {
    /// Ship one telemetry frame. Called at the telemetry rate.
    fn publish(&mut self, frame: &TelemetryFrame);

    /// Redraw from the current snapshot. Called at the display rate.
    fn render(&mut self, snapshot: &Snapshot);

    /// Next pending command, if any. Must not block.
    fn poll_command(&mut self, now: Instant) -> Option<Command>;
}

impl<T: Interface + ?Sized> Interface for &mut T {
    fn publish(&mut self, frame: &TelemetryFrame) {
        (**self).publish(frame)
    }

    fn render(&mut self, snapshot: &Snapshot) {
        (**self).render(snapshot)
    }

    fn poll_command(&mut self, now: Instant) -> Option<Command> {
        (**self).poll_command(now)
    }
}
