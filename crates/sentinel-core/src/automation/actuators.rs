use embedded_hal::digital::{Error as _, ErrorKind, OutputPin};
use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    #[error("actuator {index} does not exist, bank has {outputs} outputs")]
    IndexOutOfRange { index: usize, outputs: usize },
    #[error("actuator {index} output failed: {kind}")]
    Pin { index: usize, kind: ErrorKind },
}

/// A set of on/off outputs of which at most one is active.
pub trait ActuatorBank {
    /// Number of outputs in the bank.
    fn outputs(&self) -> usize;

    /// Activate output `index` and deactivate every other one. `None`
    /// deactivates all outputs.
    fn set_band_output(&mut self, index: Option<usize>) -> Result<(), ActuatorError>;
}

impl<T: ActuatorBank + ?Sized> ActuatorBank for &mut T {
    fn outputs(&self) -> usize {
        (**self).outputs()
    }

    fn set_band_output(&mut self, index: Option<usize>) -> Result<(), ActuatorError> {
        (**self).set_band_output(index)
    }
}

/// Active-high GPIO outputs, one per band.
///
/// Switching is break-before-make: the previous output is released before
/// the next one is driven, so two outputs are never active together.
pub struct GpioActuators<P, const N: usize> {
    pins: [P; N],
    active: Option<usize>,
}

impl<P: OutputPin, const N: usize> GpioActuators<P, N> {
    /// Takes ownership of the pins and drives all of them inactive.
    pub fn new(mut pins: [P; N]) -> Result<Self, ActuatorError> {
        for (index, pin) in pins.iter_mut().enumerate() {
            pin.set_low().map_err(|e| ActuatorError::Pin {
                index,
                kind: e.kind(),
            })?;
        }
        Ok(Self { pins, active: None })
    }

    pub fn active(&self) -> Option<usize> {
        self.active
    }
}

impl<P: OutputPin, const N: usize> ActuatorBank for GpioActuators<P, N> {
    fn outputs(&self) -> usize {
        N
    }

    fn set_band_output(&mut self, index: Option<usize>) -> Result<(), ActuatorError> {
        if let Some(index) = index
            && index >= N
        {
            return Err(ActuatorError::IndexOutOfRange { index, outputs: N });
        }

        // A release that fails halfway leaves no output known to be active.
        self.active = None;
        for (i, pin) in self.pins.iter_mut().enumerate() {
            if Some(i) != index {
                pin.set_low()
                    .map_err(|e| ActuatorError::Pin { index: i, kind: e.kind() })?;
            }
        }

        if let Some(index) = index {
            self.pins[index].set_high().map_err(|e| ActuatorError::Pin {
                index,
                kind: e.kind(),
            })?;
            self.active = Some(index);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use core::convert::Infallible;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::vec::Vec;

    /// Pin that logs `(pin, level)` writes into a shared trace.
    struct TracePin {
        id: usize,
        trace: Rc<RefCell<Vec<(usize, bool)>>>,
    }

    impl embedded_hal::digital::ErrorType for TracePin {
        type Error = Infallible;
    }

    impl OutputPin for TracePin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.trace.borrow_mut().push((self.id, false));
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.trace.borrow_mut().push((self.id, true));
            Ok(())
        }
    }

    fn bank() -> (GpioActuators<TracePin, 3>, Rc<RefCell<Vec<(usize, bool)>>>) {
        let trace = Rc::new(RefCell::new(Vec::new()));
        let pins = [0, 1, 2].map(|id| TracePin {
            id,
            trace: trace.clone(),
        });
        let bank = GpioActuators::new(pins).unwrap();
        trace.borrow_mut().clear();
        (bank, trace)
    }

    #[test]
    fn test_previous_output_released_before_next_driven() {
        let (mut bank, trace) = bank();
        bank.set_band_output(Some(0)).unwrap();
        trace.borrow_mut().clear();

        bank.set_band_output(Some(2)).unwrap();

        let trace = trace.borrow();
        assert_eq!(trace.last(), Some(&(2, true)));
        assert!(trace[..trace.len() - 1].iter().all(|(_, high)| !high));
        assert!(trace.contains(&(0, false)));
        assert_eq!(bank.active(), Some(2));
    }

    #[test]
    fn test_none_releases_everything() {
        let (mut bank, trace) = bank();
        bank.set_band_output(Some(1)).unwrap();
        bank.set_band_output(None).unwrap();

        assert_eq!(bank.active(), None);
        assert_eq!(trace.borrow().last(), Some(&(2, false)));
    }

    /// Pin whose writes fail while the shared flag is set.
    struct FlakyPin {
        failing: Rc<Cell<bool>>,
    }

    impl embedded_hal::digital::ErrorType for FlakyPin {
        type Error = ErrorKind;
    }

    impl OutputPin for FlakyPin {
        fn set_low(&mut self) -> Result<(), ErrorKind> {
            if self.failing.get() { Err(ErrorKind::Other) } else { Ok(()) }
        }

        fn set_high(&mut self) -> Result<(), ErrorKind> {
            if self.failing.get() { Err(ErrorKind::Other) } else { Ok(()) }
        }
    }

    #[test]
    fn test_failed_release_forgets_active_output() {
        let failing = Rc::new(Cell::new(false));
        let pins = [(), ()].map(|_| FlakyPin {
            failing: failing.clone(),
        });
        let mut bank = GpioActuators::new(pins).unwrap();
        bank.set_band_output(Some(0)).unwrap();
        assert_eq!(bank.active(), Some(0));

        failing.set(true);
        assert_eq!(
            bank.set_band_output(Some(1)),
            Err(ActuatorError::Pin {
                index: 0,
                kind: ErrorKind::Other
            })
        );
        assert_eq!(bank.active(), None);
    }

    #[test]
    fn test_out_of_range_output_is_rejected() {
        let (mut bank, trace) = bank();
        assert_eq!(
            bank.set_band_output(Some(3)),
            Err(ActuatorError::IndexOutOfRange {
                index: 3,
                outputs: 3
            })
        );
        assert!(trace.borrow().is_empty());
    }
}
