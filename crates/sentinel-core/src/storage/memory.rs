use alloc::collections::VecDeque;
use alloc::vec::Vec;

use super::{AUDIT_FILE, CalibrationStore, MAX_AUDIT_ENTRIES, OFFSET_FILE, StorageError, codec};
use crate::calibration::{AuditLogEntry, CalibrationOffset};

/// RAM-backed store holding the same encoded records a file store would.
///
/// Failures can be injected per operation.
#[derive(Default)]
pub struct MemoryStore {
    offset: Option<Vec<u8>>,
    audit: VecDeque<AuditLogEntry>,
    fail_saves: bool,
    fail_appends: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_saves(&mut self, fail: bool) {
        self.fail_saves = fail;
    }

    pub fn fail_appends(&mut self, fail: bool) {
        self.fail_appends = fail;
    }

    /// Replace the stored offset with bytes no decoder accepts.
    pub fn corrupt_offset(&mut self) {
        self.offset = Some(Vec::from([0xFF, 0xFF, 0xFF]));
    }
}

impl CalibrationStore for MemoryStore {
    fn load_offset(&mut self) -> Result<CalibrationOffset, StorageError> {
        match &self.offset {
            Some(bytes) => codec::decode_offset(bytes),
            None => Err(StorageError::NotFound { file: OFFSET_FILE }),
        }
    }

    fn save_offset(&mut self, offset: &CalibrationOffset) -> Result<(), StorageError> {
        if self.fail_saves {
            return Err(StorageError::Io {
                file: OFFSET_FILE,
                operation: "write",
            });
        }
        self.offset = Some(codec::encode_offset(offset)?);
        Ok(())
    }

    fn append_audit(&mut self, entry: &AuditLogEntry) -> Result<(), StorageError> {
        if self.fail_appends {
            return Err(StorageError::Io {
                file: AUDIT_FILE,
                operation: "append",
            });
        }
        if self.audit.len() >= MAX_AUDIT_ENTRIES {
            self.audit.pop_front();
        }
        self.audit.push_back(*entry);
        Ok(())
    }

    fn audit_log(&mut self) -> Result<Vec<AuditLogEntry>, StorageError> {
        Ok(self.audit.iter().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationSource;

    #[test]
    fn test_missing_offset_is_not_found() {
        let mut store = MemoryStore::new();
        assert_eq!(
            store.load_offset(),
            Err(StorageError::NotFound { file: OFFSET_FILE })
        );
    }

    #[test]
    fn test_history_is_capped() {
        let mut store = MemoryStore::new();
        for sequence in 0..(MAX_AUDIT_ENTRIES as u32 + 5) {
            store
                .append_audit(&AuditLogEntry {
                    sequence,
                    timestamp_ms: 0,
                    prior: 0.0,
                    new: 0.0,
                    delta: 0.0,
                    source: CalibrationSource::Manual,
                })
                .unwrap();
        }

        let log = store.audit_log().unwrap();
        assert_eq!(log.len(), MAX_AUDIT_ENTRIES);
        assert_eq!(log[0].sequence, 5);
    }
}
