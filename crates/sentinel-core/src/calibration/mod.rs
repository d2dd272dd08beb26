//! Zero-air calibration
//!
//! A calibration run captures [`CALIBRATION_SAMPLES`] readings in a known
//! clean environment, takes their mean as the new offset, persists it and
//! appends an audit record. The run is a state machine advanced one step
//! per scheduler tick so it never holds the loop for more than one sensor
//! cycle:
//!
//! ```text
//! Idle --trigger--> Capturing --500th sample--> Computing --> Committing --> Idle
//!                      |
//!                      +--abort--> Idle
//! ```
//!
//! Only one run may be in flight. The committed offset is swapped in
//! memory first and then persisted; if persisting fails the swap is undone
//! and no audit record is written.

use alloc::vec::Vec;
use core::fmt;

use embassy_time::Instant;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::sampling::Sampler;
use crate::sensors::{DustSensor, SensorError};
use crate::storage::{CalibrationStore, StorageError};

/// Readings captured per calibration run.
pub const CALIBRATION_SAMPLES: usize = 500;

/// Where a committed offset came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationSource {
    /// Factory value, never calibrated.
    Factory,
    /// Mean of a zero-air capture.
    Captured,
    /// Entered by the user.
    Manual,
}

/// Correction subtracted from smoothed readings, in µg/m³.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOffset {
    pub value: f32,
    /// Clock time of the commit, in milliseconds.
    pub captured_at_ms: u64,
    /// `CALIBRATION_SAMPLES` for captured offsets, 0 otherwise.
    pub sample_count: u16,
    pub source: CalibrationSource,
}

impl CalibrationOffset {
    pub const fn factory(value: f32) -> Self {
        Self {
            value,
            captured_at_ms: 0,
            sample_count: 0,
            source: CalibrationSource::Factory,
        }
    }
}

/// One committed calibration event. Append-only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Increases by one per committed entry, across reboots.
    pub sequence: u32,
    pub timestamp_ms: u64,
    pub prior: f32,
    pub new: f32,
    /// `new - prior`
    pub delta: f32,
    pub source: CalibrationSource,
}

/// Externally visible phase of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CalibrationState {
    Idle,
    Capturing,
    Computing,
    Committing,
}

impl CalibrationState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Capturing => "CAPTURING",
            Self::Computing => "COMPUTING",
            Self::Committing => "COMMITTING",
        }
    }
}

impl fmt::Display for CalibrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum CalibrationError {
    #[error("calibration request rejected while {state}")]
    InvalidTrigger { state: CalibrationState },
    #[error("nothing to abort while {state}")]
    NotCapturing { state: CalibrationState },
    #[error("offset could not be persisted: {0}")]
    StorageWriteFailure(StorageError),
    #[error("offset committed but the audit record was not written: {0}")]
    AuditWriteFailure(StorageError),
    #[error("offset {value} is not a usable correction")]
    InvalidOffset { value: f32 },
}

/// Result of one engine tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationEvent {
    /// Nothing in flight.
    Idle,
    /// A reading was appended to the capture buffer.
    Captured { samples: u16 },
    /// The sensor did not deliver this tick; the sample does not count.
    SampleMissed(SensorError),
    /// The batch was reduced to a candidate offset.
    Computed { offset: f32 },
    Committed(AuditLogEntry),
    CommitFailed(CalibrationError),
}

enum Phase {
    Idle,
    Capturing { buffer: Vec<f32> },
    Computing { buffer: Vec<f32> },
    Committing { candidate: CalibrationOffset },
}

pub struct CalibrationEngine {
    committed: CalibrationOffset,
    phase: Phase,
    next_sequence: u32,
}

impl CalibrationEngine {
    pub fn new(committed: CalibrationOffset, next_sequence: u32) -> Self {
        Self {
            committed,
            phase: Phase::Idle,
            next_sequence,
        }
    }

    /// Rebuild the engine from storage at boot.
    ///
    /// A missing or unreadable offset falls back to `factory`; the audit
    /// sequence continues after the last readable entry.
    pub fn restore<St: CalibrationStore>(store: &mut St, factory: CalibrationOffset) -> Self {
        let committed = match store.load_offset() {
            Ok(offset) => {
                info!(
                    "Restored calibration offset {:.4} ({:?})",
                    offset.value, offset.source
                );
                offset
            }
            Err(StorageError::NotFound { .. }) => {
                info!("No stored calibration offset, using {:.4}", factory.value);
                factory
            }
            Err(e) => {
                warn!("Stored calibration offset unusable ({}), using {:.4}", e, factory.value);
                factory
            }
        };

        let next_sequence = match store.audit_log() {
            Ok(entries) => entries.last().map_or(0, |e| e.sequence.wrapping_add(1)),
            Err(StorageError::NotFound { .. }) => 0,
            Err(e) => {
                warn!("Calibration history unreadable: {}", e);
                0
            }
        };

        Self::new(committed, next_sequence)
    }

    /// The committed offset. Unchanged while a run is in flight.
    pub fn offset(&self) -> &CalibrationOffset {
        &self.committed
    }

    pub fn state(&self) -> CalibrationState {
        match self.phase {
            Phase::Idle => CalibrationState::Idle,
            Phase::Capturing { .. } => CalibrationState::Capturing,
            Phase::Computing { .. } => CalibrationState::Computing,
            Phase::Committing { .. } => CalibrationState::Committing,
        }
    }

    /// A run is in flight and owns the sensor stream.
    pub fn is_active(&self) -> bool {
        !matches!(self.phase, Phase::Idle)
    }

    /// Samples captured so far in the current run.
    pub fn progress(&self) -> u16 {
        match &self.phase {
            Phase::Idle => 0,
            Phase::Capturing { buffer } | Phase::Computing { buffer } => buffer.len() as u16,
            Phase::Committing { .. } => CALIBRATION_SAMPLES as u16,
        }
    }

    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    /// Start a capture. Rejected unless idle.
    pub fn trigger(&mut self, now: Instant) -> Result<(), CalibrationError> {
        if self.is_active() {
            let state = self.state();
            warn!("Calibration trigger ignored while {}", state);
            return Err(CalibrationError::InvalidTrigger { state });
        }

        info!(
            "Calibration started at {} ms, capturing {} samples",
            now.as_millis(),
            CALIBRATION_SAMPLES
        );
        self.phase = Phase::Capturing {
            buffer: Vec::with_capacity(CALIBRATION_SAMPLES),
        };
        Ok(())
    }

    /// Discard a capture in progress. Returns how many samples were dropped.
    pub fn abort(&mut self) -> Result<u16, CalibrationError> {
        match &self.phase {
            Phase::Capturing { buffer } => {
                let discarded = buffer.len() as u16;
                self.phase = Phase::Idle;
                info!("Calibration aborted, {} samples discarded", discarded);
                Ok(discarded)
            }
            _ => Err(CalibrationError::NotCapturing {
                state: self.state(),
            }),
        }
    }

    /// Advance the run by one step.
    pub fn tick<S, St>(
        &mut self,
        sampler: &mut Sampler<S>,
        store: &mut St,
        now: Instant,
    ) -> CalibrationEvent
    where
        S: DustSensor,
        St: CalibrationStore,
    {
        let phase = core::mem::replace(&mut self.phase, Phase::Idle);

        let (next, event) = match phase {
            Phase::Idle => (Phase::Idle, CalibrationEvent::Idle),
            Phase::Capturing { mut buffer } => match sampler.acquire(now) {
                Ok(reading) => {
                    buffer.push(reading.value);
                    let samples = buffer.len() as u16;
                    if buffer.len() >= CALIBRATION_SAMPLES {
                        (
                            Phase::Computing { buffer },
                            CalibrationEvent::Captured { samples },
                        )
                    } else {
                        (
                            Phase::Capturing { buffer },
                            CalibrationEvent::Captured { samples },
                        )
                    }
                }
                Err(e) => (
                    Phase::Capturing { buffer },
                    CalibrationEvent::SampleMissed(e),
                ),
            },
            Phase::Computing { buffer } => {
                let sum: f64 = buffer.iter().map(|v| *v as f64).sum();
                let mean = (sum / buffer.len() as f64) as f32;
                let candidate = CalibrationOffset {
                    value: mean,
                    captured_at_ms: now.as_millis(),
                    sample_count: buffer.len() as u16,
                    source: CalibrationSource::Captured,
                };
                (
                    Phase::Committing { candidate },
                    CalibrationEvent::Computed { offset: mean },
                )
            }
            Phase::Committing { candidate } => {
                let event = match self.commit(candidate, store, now) {
                    Ok(entry) => CalibrationEvent::Committed(entry),
                    Err(e) => CalibrationEvent::CommitFailed(e),
                };
                (Phase::Idle, event)
            }
        };

        self.phase = next;
        event
    }

    /// Replace the offset with a user-entered value through the same
    /// swap, persist and audit path as a captured one.
    pub fn commit_manual<St: CalibrationStore>(
        &mut self,
        value: f32,
        store: &mut St,
        now: Instant,
    ) -> Result<AuditLogEntry, CalibrationError> {
        if self.is_active() {
            return Err(CalibrationError::InvalidTrigger {
                state: self.state(),
            });
        }
        if !value.is_finite() || value < 0.0 {
            return Err(CalibrationError::InvalidOffset { value });
        }

        self.commit(
            CalibrationOffset {
                value,
                captured_at_ms: now.as_millis(),
                sample_count: 0,
                source: CalibrationSource::Manual,
            },
            store,
            now,
        )
    }

    fn commit<St: CalibrationStore>(
        &mut self,
        candidate: CalibrationOffset,
        store: &mut St,
        now: Instant,
    ) -> Result<AuditLogEntry, CalibrationError> {
        let prior = core::mem::replace(&mut self.committed, candidate);

        if let Err(e) = store.save_offset(&self.committed) {
            self.committed = prior;
            error!(
                "Calibration offset {:.4} not persisted, keeping {:.4}: {}",
                candidate.value, prior.value, e
            );
            return Err(CalibrationError::StorageWriteFailure(e));
        }

        let entry = AuditLogEntry {
            sequence: self.next_sequence,
            timestamp_ms: now.as_millis(),
            prior: prior.value,
            new: candidate.value,
            delta: candidate.value - prior.value,
            source: candidate.source,
        };

        // An offset without its audit record is not committed.
        if let Err(e) = store.append_audit(&entry) {
            self.committed = prior;
            error!(
                "Calibration audit record #{} not written, keeping {:.4}: {}",
                entry.sequence, prior.value, e
            );
            if let Err(restore) = store.save_offset(&prior) {
                error!("Stored offset could not be restored to {:.4}: {}", prior.value, restore);
            }
            return Err(CalibrationError::AuditWriteFailure(e));
        }

        self.next_sequence = self.next_sequence.wrapping_add(1);
        info!(
            "Calibration committed: {:.4} -> {:.4} (delta {:+.4})",
            entry.prior, entry.new, entry.delta
        );
        Ok(entry)
    }
}
