//! Durable calibration state
//!
//! The core only sees the [`CalibrationStore`] trait. Firmware backs it
//! with FAT files on the SD card, the simulator with host files, and the
//! tests with [`MemoryStore`]. All of them share the record layout in
//! [`codec`].

pub mod codec;
mod memory;

pub use memory::MemoryStore;

use alloc::vec::Vec;

use thiserror_no_std::Error;

use crate::calibration::{AuditLogEntry, CalibrationOffset};

/// Committed offset record.
pub const OFFSET_FILE: &str = "OFFSET.BIN";
/// Append-only calibration history.
pub const AUDIT_FILE: &str = "CALHIST.BIN";
/// Persisted [`MonitorConfig`](crate::config::MonitorConfig).
pub const CONFIG_FILE: &str = "CONFIG.BIN";

/// Most history entries a store keeps before rotating.
pub const MAX_AUDIT_ENTRIES: usize = 256;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    #[error("{file} does not exist")]
    NotFound { file: &'static str },
    #[error("{file} holds no valid record")]
    Corrupt { file: &'static str },
    #[error("{operation} on {file} failed")]
    Io {
        file: &'static str,
        operation: &'static str,
    },
    #[error("record could not be encoded")]
    Encoding,
}

/// Persistent home of the calibration offset and its audit history.
///
/// `save_offset` must either fully replace the stored offset or leave the
/// previous one in place. `append_audit` never rewrites earlier entries
/// except when rotating past [`MAX_AUDIT_ENTRIES`].
pub trait CalibrationStore {
    fn load_offset(&mut self) -> Result<CalibrationOffset, StorageError>;

    fn save_offset(&mut self, offset: &CalibrationOffset) -> Result<(), StorageError>;

    fn append_audit(&mut self, entry: &AuditLogEntry) -> Result<(), StorageError>;

    /// Decoded history, oldest first.
    fn audit_log(&mut self) -> Result<Vec<AuditLogEntry>, StorageError>;
}

impl<T: CalibrationStore + ?Sized> CalibrationStore for &mut T {
    fn load_offset(&mut self) -> Result<CalibrationOffset, StorageError> {
        (**self).load_offset()
    }

    fn save_offset(&mut self, offset: &CalibrationOffset) -> Result<(), StorageError> {
        (**self).save_offset(offset)
    }

    fn append_audit(&mut self, entry: &AuditLogEntry) -> Result<(), StorageError> {
        (**self).append_audit(entry)
    }

    fn audit_log(&mut self) -> Result<Vec<AuditLogEntry>, StorageError> {
        (**self).audit_log()
    }
}
