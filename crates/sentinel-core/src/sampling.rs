//! Dust sampling pipeline
//!
//! Converts raw converter counts into uncompensated density readings, keeps
//! a rolling history of them and derives the smoothed, offset-corrected
//! [`ConcentrationEstimate`] that the rest of the system consumes.

use embassy_time::{Duration, Instant};
use heapless::Deque;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::sensors::{DustSensor, SensorError};

/// Number of raw readings kept for smoothing and for the trend view.
pub const HISTORY_LEN: usize = 60;

/// One sensor acquisition cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawReading {
    /// When the cycle was triggered. Strictly increasing.
    pub timestamp: Instant,
    /// Raw converter output.
    pub counts: u16,
    /// Uncompensated density in µg/m³.
    pub value: f32,
}

/// Calibrated, smoothed PM2.5-equivalent value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConcentrationEstimate {
    /// µg/m³, never negative.
    pub value: f32,
    pub derived_at: Instant,
    /// Number of raw readings that went into `value`.
    pub samples: usize,
    /// Fewer readings than the smoothing window were available.
    pub warming_up: bool,
    /// The sensor stopped answering (or was lent to calibration) after
    /// this value was derived.
    pub stale: bool,
}

/// Counts → µg/m³ conversion for an analog dust sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorScaling {
    /// Converter reading at `reference_volts`.
    pub adc_full_scale: u16,
    pub reference_volts: f32,
    /// Sensor sensitivity in µg/m³ per volt.
    pub ug_per_volt: f32,
}

impl Default for SensorScaling {
    fn default() -> Self {
        Self {
            adc_full_scale: 4095,
            reference_volts: 3.3,
            ug_per_volt: 170.0,
        }
    }
}

impl SensorScaling {
    pub fn density(&self, counts: u16) -> f32 {
        counts as f32 / self.adc_full_scale as f32 * self.reference_volts * self.ug_per_volt
    }
}

pub struct Sampler<S> {
    sensor: S,
    scaling: SensorScaling,
    window: usize,
    history: Deque<RawReading, HISTORY_LEN>,
    last_timestamp: Option<Instant>,
    latest: Option<ConcentrationEstimate>,
    consecutive_failures: u32,
    total_failures: u32,
}

impl<S: DustSensor> Sampler<S> {
    /// `window` is clamped to `1..=HISTORY_LEN`.
    pub fn new(sensor: S, scaling: SensorScaling, window: usize) -> Self {
        Self {
            sensor,
            scaling,
            window: window.clamp(1, HISTORY_LEN),
            history: Deque::new(),
            last_timestamp: None,
            latest: None,
            consecutive_failures: 0,
            total_failures: 0,
        }
    }

    /// Trigger one sensor cycle and return exactly one reading.
    ///
    /// Bounded by the sensor's settle time; never waits on the scheduler.
    pub fn acquire(&mut self, now: Instant) -> Result<RawReading, SensorError> {
        let counts = match self.sensor.read_counts() {
            Ok(counts) => counts,
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.total_failures = self.total_failures.saturating_add(1);
                return Err(e);
            }
        };
        if self.consecutive_failures > 0 {
            debug!(
                "Dust sensor recovered after {} failed cycles",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;

        let timestamp = match self.last_timestamp {
            Some(last) if now <= last => last + Duration::from_ticks(1),
            _ => now,
        };
        self.last_timestamp = Some(timestamp);

        Ok(RawReading {
            timestamp,
            counts,
            value: self.scaling.density(counts),
        })
    }

    /// Append a reading to the smoothing history, dropping the oldest.
    pub fn record(&mut self, reading: RawReading) {
        if self.history.is_full() {
            self.history.pop_front();
        }
        // Cannot fail: a slot was just freed.
        let _ = self.history.push_back(reading);
    }

    /// Smoothed estimate over the most recent `window` readings with
    /// `offset` removed: `max(0, mean - offset)`.
    pub fn estimate(&self, offset: f32, now: Instant) -> Option<ConcentrationEstimate> {
        let samples = self.history.len().min(self.window);
        if samples == 0 {
            return None;
        }

        let sum: f32 = self
            .history
            .iter()
            .rev()
            .take(samples)
            .map(|r| r.value)
            .sum();
        let smoothed = sum / samples as f32;

        Some(ConcentrationEstimate {
            value: (smoothed - offset).max(0.0),
            derived_at: now,
            samples,
            warming_up: samples < self.window,
            stale: false,
        })
    }

    /// One sampling step: acquire, record and re-estimate.
    ///
    /// On a failed cycle the last-known-good estimate is kept but flagged
    /// stale, and the error is returned for the caller to report.
    pub fn update(&mut self, offset: f32, now: Instant) -> Result<(), SensorError> {
        match self.acquire(now) {
            Ok(reading) => {
                self.record(reading);
                self.refresh(offset, now);
                Ok(())
            }
            Err(e) => {
                warn!("Dust sample failed: {}", e);
                self.mark_stale();
                Err(e)
            }
        }
    }

    /// Re-derive the latest estimate from the current history, e.g. after
    /// the calibration offset changed.
    pub fn refresh(&mut self, offset: f32, now: Instant) {
        if let Some(estimate) = self.estimate(offset, now) {
            self.latest = Some(estimate);
        }
    }

    /// Flag the latest estimate as no longer backed by fresh readings.
    pub fn mark_stale(&mut self) {
        if let Some(latest) = self.latest.as_mut() {
            latest.stale = true;
        }
    }

    pub fn latest(&self) -> Option<&ConcentrationEstimate> {
        self.latest.as_ref()
    }

    /// Raw readings, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &RawReading> {
        self.history.iter()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn total_failures(&self) -> u32 {
        self.total_failures
    }
}
