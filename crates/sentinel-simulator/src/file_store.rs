//! Calibration store backed by host files.
//!
//! Uses the same file names and record layout as the SD card on the
//! device, so a data directory can be inspected or copied between the two.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};

use sentinel_core::calibration::{AuditLogEntry, CalibrationOffset};
use sentinel_core::config::{ConfigError, MonitorConfig};
use sentinel_core::storage::{
    AUDIT_FILE, CONFIG_FILE, CalibrationStore, MAX_AUDIT_ENTRIES, OFFSET_FILE, StorageError, codec,
};

pub struct FileStore {
    dir: PathBuf,
    /// Entries in the audit file, counted on first use.
    audit_entries: Option<usize>,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        info!("Calibration data in {}", dir.display());
        Ok(Self {
            dir,
            audit_entries: None,
        })
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    fn read(&self, file: &'static str) -> Result<Vec<u8>, StorageError> {
        fs::read(self.path(file)).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound { file },
            _ => StorageError::Io {
                file,
                operation: "read",
            },
        })
    }

    /// Replace `file` by writing a sibling and renaming it over the old one.
    fn replace(&self, file: &'static str, bytes: &[u8]) -> Result<(), StorageError> {
        let target = self.path(file);
        let staging = target.with_extension("TMP");
        let io = |operation| StorageError::Io { file, operation };

        let mut out = File::create(&staging).map_err(|_| io("create"))?;
        out.write_all(bytes).map_err(|_| io("write"))?;
        out.sync_all().map_err(|_| io("sync"))?;
        fs::rename(&staging, &target).map_err(|_| io("rename"))
    }

    pub fn load_config(&self) -> Result<MonitorConfig, ConfigError> {
        let bytes = self.read(CONFIG_FILE).map_err(ConfigError::Unreadable)?;
        codec::decode_config(&bytes)
    }

    pub fn save_config(&self, config: &MonitorConfig) -> Result<(), StorageError> {
        self.replace(CONFIG_FILE, &codec::encode_config(config)?)
    }

    fn rotate_audit(&mut self) -> Result<(), StorageError> {
        let entries = self.audit_log()?;
        let keep = MAX_AUDIT_ENTRIES / 2;
        warn!(
            "{} reached {} entries, keeping the newest {}",
            AUDIT_FILE,
            entries.len(),
            keep
        );
        self.replace(AUDIT_FILE, &codec::encode_audit_stream(&entries, keep)?)?;
        self.audit_entries = Some(entries.len().min(keep));
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl CalibrationStore for FileStore {
    fn load_offset(&mut self) -> Result<CalibrationOffset, StorageError> {
        codec::decode_offset(&self.read(OFFSET_FILE)?)
    }

    fn save_offset(&mut self, offset: &CalibrationOffset) -> Result<(), StorageError> {
        self.replace(OFFSET_FILE, &codec::encode_offset(offset)?)
    }

    fn append_audit(&mut self, entry: &AuditLogEntry) -> Result<(), StorageError> {
        let count = match self.audit_entries {
            Some(count) => count,
            None => self.audit_log()?.len(),
        };
        if count >= MAX_AUDIT_ENTRIES {
            self.rotate_audit()?;
        }

        let frame = codec::encode_audit_frame(entry)?;
        let io = |operation| StorageError::Io {
            file: AUDIT_FILE,
            operation,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(AUDIT_FILE))
            .map_err(|_| io("open"))?;
        file.write_all(&frame).map_err(|_| io("append"))?;
        file.sync_all().map_err(|_| io("sync"))?;

        self.audit_entries = Some(self.audit_entries.unwrap_or(count) + 1);
        Ok(())
    }

    fn audit_log(&mut self) -> Result<Vec<AuditLogEntry>, StorageError> {
        let entries = match self.read(AUDIT_FILE) {
            Ok(bytes) => codec::decode_audit_stream(&bytes),
            Err(StorageError::NotFound { .. }) => Vec::new(),
            Err(e) => return Err(e),
        };
        self.audit_entries = Some(entries.len());
        Ok(entries)
    }
}
