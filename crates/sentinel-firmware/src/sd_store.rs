use alloc::vec::Vec;

use embedded_sdmmc::{Mode, SdCard, SdCardError, TimeSource, Timestamp, VolumeIdx, VolumeManager};
use log::{error, warn};

use sentinel_core::calibration::{AuditLogEntry, CalibrationOffset};
use sentinel_core::config::{ConfigError, MonitorConfig};
use sentinel_core::storage::{
    AUDIT_FILE, CONFIG_FILE, CalibrationStore, MAX_AUDIT_ENTRIES, OFFSET_FILE, StorageError, codec,
};

type SdError = embedded_sdmmc::Error<SdCardError>;

const READ_CHUNK: usize = 128;

/// The board has no RTC, so every file carries the same timestamp.
pub struct FixedTime;

impl TimeSource for FixedTime {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 56,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

/// Calibration store on the first FAT volume of the SD card.
///
/// SD operations are blocking. A commit rewrites the offset, reads it back
/// and appends one audit frame, which takes several milliseconds even at
/// 20 MHz. The committing tick therefore overruns the calibration budget
/// once per commit and shows up in the overrun counter. The sampler is not
/// acquiring while calibration is active, so no readings are delayed.
pub struct SdStore<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    volume_mgr: VolumeManager<SdCard<S, D>, T, 4, 4, 1>,
    audit_entries: Option<usize>,
}

impl<S, D, T> SdStore<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    pub fn new(sd_card: SdCard<S, D>, ts: T) -> Self {
        Self {
            volume_mgr: VolumeManager::new(sd_card, ts),
            audit_entries: None,
        }
    }

    fn read_file(&self, file_name: &'static str) -> Result<Vec<u8>, StorageError> {
        let io = |e: SdError, operation| map_error(file_name, operation, e);

        let volume0 = self
            .volume_mgr
            .open_volume(VolumeIdx(0))
            .map_err(|e| io(e, "open volume"))?;
        let root_dir = volume0.open_root_dir().map_err(|e| io(e, "open root"))?;
        let file = root_dir
            .open_file_in_dir(file_name, Mode::ReadOnly)
            .map_err(|e| io(e, "open"))?;

        let mut contents = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let read = file.read(&mut chunk).map_err(|e| io(e, "read"))?;
            if read == 0 {
                break;
            }
            contents.extend_from_slice(&chunk[..read]);
        }

        file.close().map_err(|e| io(e, "close"))?;
        root_dir.close().map_err(|e| io(e, "close root"))?;
        volume0.close().map_err(|e| io(e, "close volume"))?;

        Ok(contents)
    }

    fn write_file(&self, file_name: &'static str, mode: Mode, data: &[u8]) -> Result<(), StorageError> {
        let io = |e: SdError, operation| map_error(file_name, operation, e);

        let volume0 = self
            .volume_mgr
            .open_volume(VolumeIdx(0))
            .map_err(|e| io(e, "open volume"))?;
        let root_dir = volume0.open_root_dir().map_err(|e| io(e, "open root"))?;
        let file = root_dir
            .open_file_in_dir(file_name, mode)
            .map_err(|e| io(e, "open"))?;

        file.write(data).map_err(|e| io(e, "write"))?;

        // Closing flushes the directory entry; a failure here means the
        // data may not be on the card.
        file.close().map_err(|e| io(e, "close"))?;
        root_dir.close().map_err(|e| io(e, "close root"))?;
        volume0.close().map_err(|e| io(e, "close volume"))?;

        Ok(())
    }

    pub fn load_config(&self) -> Result<MonitorConfig, ConfigError> {
        let bytes = self.read_file(CONFIG_FILE).map_err(ConfigError::Unreadable)?;
        codec::decode_config(&bytes)
    }

    fn rotate_audit(&mut self) -> Result<(), StorageError> {
        let entries = self.audit_log()?;
        let keep = MAX_AUDIT_ENTRIES / 2;
        warn!("{} full, keeping the newest {} entries", AUDIT_FILE, keep);
        let stream = codec::encode_audit_stream(&entries, keep)?;
        self.write_file(AUDIT_FILE, Mode::ReadWriteCreateOrTruncate, &stream)?;
        self.audit_entries = Some(entries.len().min(keep));
        Ok(())
    }
}

impl<S, D, T> CalibrationStore for SdStore<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    fn load_offset(&mut self) -> Result<CalibrationOffset, StorageError> {
        codec::decode_offset(&self.read_file(OFFSET_FILE)?)
    }

    /// FAT offers no rename here, so the record is rewritten in place and
    /// read back. A torn write decodes as corrupt and boots on the default.
    fn save_offset(&mut self, offset: &CalibrationOffset) -> Result<(), StorageError> {
        let bytes = codec::encode_offset(offset)?;
        self.write_file(OFFSET_FILE, Mode::ReadWriteCreateOrTruncate, &bytes)?;

        if self.read_file(OFFSET_FILE)? != bytes {
            error!("{} read back differs from what was written", OFFSET_FILE);
            return Err(StorageError::Io {
                file: OFFSET_FILE,
                operation: "verify",
            });
        }
        Ok(())
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
        self.write_file(AUDIT_FILE, Mode::ReadWriteCreateOrAppend, &frame)?;
        self.audit_entries = Some(self.audit_entries.unwrap_or(count) + 1);
        Ok(())
    }

    fn audit_log(&mut self) -> Result<Vec<AuditLogEntry>, StorageError> {
        let entries = match self.read_file(AUDIT_FILE) {
            Ok(bytes) => codec::decode_audit_stream(&bytes),
            Err(StorageError::NotFound { .. }) => Vec::new(),
            Err(e) => return Err(e),
        };
        self.audit_entries = Some(entries.len());
        Ok(entries)
    }
}

fn map_error(file: &'static str, operation: &'static str, e: SdError) -> StorageError {
    match e {
        embedded_sdmmc::Error::NotFound => StorageError::NotFound { file },
        e => {
            error!("SD card {} on {} failed: {:?}", operation, file, e);
            StorageError::Io { file, operation }
        }
    }
}
