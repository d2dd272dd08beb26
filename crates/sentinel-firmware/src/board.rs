//! Board glue: ESP32-S3 peripherals behind the core's traits.
//!
//! | Function          | Pin            |
//! |-------------------|----------------|
//! | Dust analog out   | GPIO8 (ADC1)   |
//! | Dust IR LED       | GPIO9          |
//! | Band outputs 0..5 | GPIO2..GPIO7   |
//! | Boot button       | GPIO0          |
//! | SD card SPI       | GPIO10..GPIO13 |

use embassy_time::Instant;
use embedded_hal::digital::InputPin;
use esp_hal::Blocking;
use esp_hal::analog::adc::{Adc, AdcPin};
use esp_hal::peripherals::{ADC1, GPIO8};
use log::info;

use sentinel_core::app_state::{Banner, Snapshot};
use sentinel_core::automation::AqiCategory;
use sentinel_core::calibration::CalibrationState;
use sentinel_core::clock::Clock;
use sentinel_core::interface::{Command, Interface};
use sentinel_core::sensors::AnalogInput;
use sentinel_core::telemetry::TelemetryFrame;

use crate::input::BootButton;

pub type DustAdc = Adc<'static, ADC1<'static>, Blocking>;
pub type DustAdcPin = AdcPin<GPIO8<'static>, ADC1<'static>>;

/// One ADC1 channel polled without blocking.
pub struct EspAdcChannel {
    adc: DustAdc,
    pin: DustAdcPin,
}

impl EspAdcChannel {
    pub fn new(adc: DustAdc, pin: DustAdcPin) -> Self {
        Self { adc, pin }
    }
}

impl AnalogInput for EspAdcChannel {
    fn try_read(&mut self) -> Option<u16> {
        self.adc.read_oneshot(&mut self.pin).ok()
    }
}

/// `embassy_time` monotonic clock.
#[derive(Clone, Copy, Default)]
pub struct EmbassyClock;

impl Clock for EmbassyClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

type Status = (Option<AqiCategory>, CalibrationState, Option<Banner>, bool);

/// Telemetry and status over RTT; commands from the boot button.
pub struct BoardInterface<P> {
    button: BootButton<P>,
    last_status: Option<Status>,
}

impl<P: InputPin> BoardInterface<P> {
    pub fn new(button: BootButton<P>) -> Self {
        Self {
            button,
            last_status: None,
        }
    }
}

impl<P: InputPin> Interface for BoardInterface<P> {
    fn publish(&mut self, frame: &TelemetryFrame) {
        info!(target: "telemetry", "{}", frame);
    }

    fn render(&mut self, snapshot: &Snapshot) {
        let status = (
            snapshot.band.map(|b| b.category),
            snapshot.calibration,
            snapshot.banner,
            snapshot.warning,
        );
        if self.last_status == Some(status) {
            return;
        }
        self.last_status = Some(status);

        match snapshot.banner {
            Some(banner) => info!("{}", banner),
            None => info!(
                "Status: {} | {}{}",
                status.0.map_or("--", |c| c.label()),
                snapshot.calibration,
                if snapshot.warning { " | WARNING" } else { "" }
            ),
        }
    }

    fn poll_command(&mut self, now: Instant) -> Option<Command> {
        self.button.poll(now)
    }
}
