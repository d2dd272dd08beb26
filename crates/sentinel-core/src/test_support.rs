//! Scripted fakes shared by the unit tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use crate::automation::{ActuatorBank, ActuatorError};
use crate::sampling::SensorScaling;
use crate::sensors::{DustSensor, SensorError};

/// Scaling under which counts read directly as hundredths of a µg/m³.
pub fn unit_scaling() -> SensorScaling {
    SensorScaling {
        adc_full_scale: 100,
        reference_volts: 1.0,
        ug_per_volt: 1.0,
    }
}

pub fn timeout() -> SensorError {
    SensorError::Timeout {
        sensor: "scripted",
        operation: "read",
    }
}

#[derive(Default)]
struct Script {
    queue: VecDeque<Result<u16, SensorError>>,
    fallback: Option<u16>,
    reads: usize,
}

/// Dust sensor that replays queued results, then a fallback value.
///
/// Clones share the script so a test can keep a handle after moving the
/// sensor into a sampler.
#[derive(Clone, Default)]
pub struct ScriptedSensor {
    script: Rc<RefCell<Script>>,
}

impl ScriptedSensor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_counts(self, counts: &[u16]) -> Self {
        self.push_counts(counts);
        self
    }

    pub fn then_timeout(self) -> Self {
        self.script.borrow_mut().queue.push_back(Err(timeout()));
        self
    }

    pub fn with_fallback(self, counts: u16) -> Self {
        self.set_fallback(Some(counts));
        self
    }

    pub fn push_counts(&self, counts: &[u16]) {
        let mut script = self.script.borrow_mut();
        script.queue.extend(counts.iter().copied().map(Ok));
    }

    pub fn set_fallback(&self, counts: Option<u16>) {
        self.script.borrow_mut().fallback = counts;
    }

    pub fn reads(&self) -> usize {
        self.script.borrow().reads
    }
}

impl DustSensor for ScriptedSensor {
    fn read_counts(&mut self) -> Result<u16, SensorError> {
        let mut script = self.script.borrow_mut();
        script.reads += 1;
        match script.queue.pop_front() {
            Some(result) => result,
            None => script.fallback.ok_or_else(timeout),
        }
    }
}

/// Actuator bank that records every output it is asked to drive.
#[derive(Clone)]
pub struct RecordingActuators {
    outputs: Rc<Cell<usize>>,
    log: Rc<RefCell<Vec<Option<usize>>>>,
}

impl RecordingActuators {
    pub fn new(outputs: usize) -> Self {
        Self {
            outputs: Rc::new(Cell::new(outputs)),
            log: Rc::default(),
        }
    }

    /// Shrink or grow the bank after it has been handed out, as if
    /// outputs were unplugged.
    pub fn set_outputs(&self, outputs: usize) {
        self.outputs.set(outputs);
    }

    /// Every `set_band_output` call in order; `None` is all-off.
    pub fn history(&self) -> Vec<Option<usize>> {
        self.log.borrow().clone()
    }

    pub fn active(&self) -> Option<usize> {
        self.log.borrow().last().copied().flatten()
    }
}

impl ActuatorBank for RecordingActuators {
    fn outputs(&self) -> usize {
        self.outputs.get()
    }

    fn set_band_output(&mut self, index: Option<usize>) -> Result<(), ActuatorError> {
        let outputs = self.outputs.get();
        if let Some(index) = index
            && index >= outputs
        {
            return Err(ActuatorError::IndexOutOfRange { index, outputs });
        }
        self.log.borrow_mut().push(index);
        Ok(())
    }
}
