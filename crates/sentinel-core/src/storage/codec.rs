//! On-media record layout
//!
//! Every record is postcard. The offset and config files hold a single
//! versioned record each. The audit file is a stream of COBS-framed
//! entries, each terminated by a zero byte, so a torn final write only
//! loses that one entry.

use alloc::vec::Vec;

use log::warn;
use serde::{Deserialize, Serialize};

use super::{AUDIT_FILE, CONFIG_FILE, OFFSET_FILE, StorageError};
use crate::calibration::{AuditLogEntry, CalibrationOffset};
use crate::config::{ConfigError, MonitorConfig};

const OFFSET_RECORD_VERSION: u8 = 1;
const CONFIG_RECORD_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct OffsetRecord {
    version: u8,
    offset: CalibrationOffset,
}

#[derive(Serialize, Deserialize)]
struct ConfigRecord {
    version: u8,
    config: MonitorConfig,
}

pub fn encode_offset(offset: &CalibrationOffset) -> Result<Vec<u8>, StorageError> {
    postcard::to_allocvec(&OffsetRecord {
        version: OFFSET_RECORD_VERSION,
        offset: *offset,
    })
    .map_err(|_| StorageError::Encoding)
}

/// Rejects unknown versions and offsets that could never have been committed.
pub fn decode_offset(bytes: &[u8]) -> Result<CalibrationOffset, StorageError> {
    let corrupt = StorageError::Corrupt { file: OFFSET_FILE };

    let record: OffsetRecord = postcard::from_bytes(bytes).map_err(|_| corrupt)?;
    if record.version != OFFSET_RECORD_VERSION {
        return Err(corrupt);
    }
    let value = record.offset.value;
    if !value.is_finite() || value < 0.0 {
        return Err(corrupt);
    }
    Ok(record.offset)
}

/// One zero-terminated audit frame.
pub fn encode_audit_frame(entry: &AuditLogEntry) -> Result<Vec<u8>, StorageError> {
    postcard::to_allocvec_cobs(entry).map_err(|_| StorageError::Encoding)
}

/// Decode every readable frame in an audit stream, oldest first.
pub fn decode_audit_stream(bytes: &[u8]) -> Vec<AuditLogEntry> {
    let mut entries = Vec::new();
    let mut skipped = 0usize;

    for chunk in bytes.split(|b| *b == 0).filter(|c| !c.is_empty()) {
        let mut frame = Vec::with_capacity(chunk.len() + 1);
        frame.extend_from_slice(chunk);
        frame.push(0);
        match postcard::from_bytes_cobs::<AuditLogEntry>(&mut frame) {
            Ok(entry) => entries.push(entry),
            Err(_) => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!("Skipped {} unreadable frames in {}", skipped, AUDIT_FILE);
    }
    entries
}

/// Re-encode the newest `keep` entries as a fresh audit stream.
pub fn encode_audit_stream(entries: &[AuditLogEntry], keep: usize) -> Result<Vec<u8>, StorageError> {
    let start = entries.len().saturating_sub(keep);
    let mut stream = Vec::new();
    for entry in &entries[start..] {
        stream.extend_from_slice(&encode_audit_frame(entry)?);
    }
    Ok(stream)
}

pub fn encode_config(config: &MonitorConfig) -> Result<Vec<u8>, StorageError> {
    postcard::to_allocvec(&ConfigRecord {
        version: CONFIG_RECORD_VERSION,
        config: *config,
    })
    .map_err(|_| StorageError::Encoding)
}

/// Decode and validate a stored configuration.
pub fn decode_config(bytes: &[u8]) -> Result<MonitorConfig, ConfigError> {
    let corrupt = ConfigError::Unreadable(StorageError::Corrupt { file: CONFIG_FILE });

    let record: ConfigRecord = postcard::from_bytes(bytes).map_err(|_| corrupt)?;
    if record.version != CONFIG_RECORD_VERSION {
        return Err(corrupt);
    }
    record.config.validate()?;
    Ok(record.config)
}
