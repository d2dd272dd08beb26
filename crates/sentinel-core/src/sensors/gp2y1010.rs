use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{Error as _, OutputPin};
use log::error;

use super::{AnalogInput, DustSensor, SensorError};

/// Time between pulling the IR LED low and sampling the output.
pub const LED_SETTLE_US: u32 = 280;

/// Time the LED stays on after the sample before it is released.
pub const LED_RELEASE_US: u32 = 40;

/// Converter polls before a cycle is reported as a timeout.
const ADC_READ_ATTEMPTS: u8 = 8;

/// Gap between converter polls.
const ADC_POLL_US: u32 = 5;

/// Sharp GP2Y1010AU0F optical dust sensor.
///
/// The IR LED is pulsed low, the analog output peaks ~280 µs later, and the
/// LED is released ~40 µs after the sample. A whole cycle is bounded by
/// `LED_SETTLE_US + ADC_READ_ATTEMPTS * ADC_POLL_US + LED_RELEASE_US`.
pub struct Gp2y1010<L, A, D> {
    led: L,
    adc: A,
    delay: D,
}

impl<L, A, D> Gp2y1010<L, A, D>
where
    L: OutputPin,
    A: AnalogInput,
    D: DelayNs,
{
    pub fn new(led: L, adc: A, delay: D) -> Self {
        Self { led, adc, delay }
    }

    /// Release the LED so the sensor idles between cycles.
    pub fn idle(&mut self) -> Result<(), SensorError> {
        self.led.set_high().map_err(|e| {
            error!("GP2Y1010 LED release failed: {:?}", e.kind());
            SensorError::TriggerFailed {
                sensor: "GP2Y1010",
                details: "could not release LED",
            }
        })
    }

    fn sample(&mut self) -> Option<u16> {
        for _ in 0..ADC_READ_ATTEMPTS {
            if let Some(counts) = self.adc.try_read() {
                return Some(counts);
            }
            self.delay.delay_us(ADC_POLL_US);
        }
        None
    }
}

impl<L, A, D> DustSensor for Gp2y1010<L, A, D>
where
    L: OutputPin,
    A: AnalogInput,
    D: DelayNs,
{
    fn read_counts(&mut self) -> Result<u16, SensorError> {
        self.led.set_low().map_err(|e| {
            error!("GP2Y1010 LED pulse failed: {:?}", e.kind());
            SensorError::TriggerFailed {
                sensor: "GP2Y1010",
                details: "could not pulse LED",
            }
        })?;
        self.delay.delay_us(LED_SETTLE_US);

        let counts = self.sample();

        self.delay.delay_us(LED_RELEASE_US);
        self.idle()?;

        counts.ok_or(SensorError::Timeout {
            sensor: "GP2Y1010",
            operation: "analog conversion",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Low,
        High,
        Delay(u32),
        Read,
    }

    type Trace = Rc<RefCell<std::vec::Vec<Event>>>;

    struct Led(Trace);

    impl embedded_hal::digital::ErrorType for Led {
        type Error = Infallible;
    }

    impl OutputPin for Led {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0.borrow_mut().push(Event::Low);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0.borrow_mut().push(Event::High);
            Ok(())
        }
    }

    struct Adc {
        trace: Trace,
        busy_polls: u8,
        counts: u16,
    }

    impl AnalogInput for Adc {
        fn try_read(&mut self) -> Option<u16> {
            self.trace.borrow_mut().push(Event::Read);
            if self.busy_polls > 0 {
                self.busy_polls -= 1;
                None
            } else {
                Some(self.counts)
            }
        }
    }

    struct Delay(Trace);

    impl DelayNs for Delay {
        fn delay_ns(&mut self, ns: u32) {
            self.0.borrow_mut().push(Event::Delay(ns / 1_000));
        }
    }

    fn sensor(busy_polls: u8) -> (Gp2y1010<Led, Adc, Delay>, Trace) {
        let trace: Trace = Rc::new(RefCell::new(std::vec::Vec::new()));
        let sensor = Gp2y1010::new(
            Led(trace.clone()),
            Adc {
                trace: trace.clone(),
                busy_polls,
                counts: 1234,
            },
            Delay(trace.clone()),
        );
        (sensor, trace)
    }

    #[test]
    fn test_pulse_timing_sequence() {
        let (mut sensor, trace) = sensor(0);

        assert_eq!(sensor.read_counts(), Ok(1234));
        assert_eq!(
            *trace.borrow(),
            [
                Event::Low,
                Event::Delay(LED_SETTLE_US),
                Event::Read,
                Event::Delay(LED_RELEASE_US),
                Event::High,
            ]
        );
    }

    #[test]
    fn test_busy_converter_is_polled() {
        let (mut sensor, trace) = sensor(2);

        assert_eq!(sensor.read_counts(), Ok(1234));
        let reads = trace.borrow().iter().filter(|e| **e == Event::Read).count();
        assert_eq!(reads, 3);
    }

    #[test]
    fn test_timeout_still_releases_led() {
        let (mut sensor, trace) = sensor(u8::MAX);

        assert!(matches!(
            sensor.read_counts(),
            Err(SensorError::Timeout { .. })
        ));
        assert_eq!(trace.borrow().last(), Some(&Event::High));
        let reads = trace.borrow().iter().filter(|e| **e == Event::Read).count();
        assert_eq!(reads, ADC_READ_ATTEMPTS as usize);
    }
}
