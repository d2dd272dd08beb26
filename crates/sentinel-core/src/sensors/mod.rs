mod gp2y1010;

use thiserror_no_std::Error;

pub use gp2y1010::{Gp2y1010, LED_RELEASE_US, LED_SETTLE_US};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor} did not respond during {operation}")]
    Timeout {
        sensor: &'static str,
        operation: &'static str,
    },
    #[error("{sensor} trigger line failed: {details}")]
    TriggerFailed {
        sensor: &'static str,
        details: &'static str,
    },
}

/// A single analog channel that converts on request.
///
/// `try_read` starts or continues a conversion and returns `None` while
/// the converter is still busy. It must never block.
pub trait AnalogInput {
    fn try_read(&mut self) -> Option<u16>;
}

/// Trait for dust sensors that produce one raw reading per trigger.
///
/// Unlike a general async sensor, a dust reading is a short timed pulse
/// (a few hundred microseconds) so it is taken synchronously from inside a
/// scheduler tick.
pub trait DustSensor {
    /// Fire one acquisition cycle and return the raw converter counts.
    fn read_counts(&mut self) -> Result<u16, SensorError>;
}

impl<T: DustSensor + ?Sized> DustSensor for &mut T {
    fn read_counts(&mut self) -> Result<u16, SensorError> {
        (**self).read_counts()
    }
}
