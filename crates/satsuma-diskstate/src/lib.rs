use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use satsuma_core::QueueItem;

pub const STATE_VERSION: u32 = 1;

pub trait StateFormat: Send + Sync {
    fn serialize<T: Serialize>(&self, value: &T) -> anyhow::Result<Vec<u8>>;
    fn deserialize<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> anyhow::Result<T>;
    fn file_extension(&self) -> &str;
}

#[derive(Debug)]
pub struct JsonFormat;

impl StateFormat for JsonFormat {
    fn serialize<T: Serialize>(&self, value: &T) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> anyhow::Result<T> {
        Ok(serde_json::from_slice(data)?)
    }

    fn file_extension(&self) -> &str {
        "json"
    }
}

/// The durable snapshot: the whole queue plus the sanitized root setting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    pub items: Vec<QueueItem>,
    pub root: String,
}

impl PersistedState {
    pub fn empty() -> Self {
        Self {
            version: STATE_VERSION,
            items: Vec::new(),
            root: String::new(),
        }
    }

    pub fn migrate(self) -> anyhow::Result<Self> {
        match self.version {
            1 => Ok(self),
            version => anyhow::bail!("unsupported state version: {version}"),
        }
    }
}

#[derive(Debug)]
pub struct DiskState<F: StateFormat> {
    state_dir: PathBuf,
    format: F,
}

impl<F: StateFormat> DiskState<F> {
    pub fn new(state_dir: PathBuf, format: F) -> anyhow::Result<Self> {
        fs::create_dir_all(&state_dir)?;
        Ok(Self { state_dir, format })
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn state_path(&self) -> PathBuf {
        self.state_dir
            .join(format!("queue.{}", self.format.file_extension()))
    }

    pub fn save_state(&self, state: &PersistedState) -> anyhow::Result<()> {
        let data = self.format.serialize(state)?;
        atomic_write(&self.state_path(), &data)
    }

    /// Loads the snapshot; `Ok(None)` when no state has been written yet.
    pub fn load_state(&self) -> anyhow::Result<Option<PersistedState>> {
        let data = match fs::read(self.state_path()) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let state: PersistedState = self.format.deserialize(&data)?;
        Ok(Some(state.migrate()?))
    }

    /// Sweeps interrupted atomic writes left behind by a crash.
    pub fn recover(&self) -> anyhow::Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        if let Ok(entries) = fs::read_dir(&self.state_dir) {
            for entry in entries.flatten() {
                if entry.path().extension() == Some("tmp".as_ref()) {
                    fs::remove_file(entry.path())?;
                    report.tmp_files_cleaned += 1;
                }
            }
        }
        Ok(report)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub tmp_files_cleaned: u32,
}

/// Exclusive lock so a state directory is owned by one daemon at a time.
pub struct StateLock {
    _lock_file: fs::File,
}

impl StateLock {
    pub fn acquire(state_dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(state_dir)?;
        let lock_path = state_dir.join("satsuma.lock");
        let lock_file = fs::File::create(&lock_path)?;
        lock_file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!(
                "another satsuma instance is already running (lock held on {})",
                lock_path.display()
            )
        })?;
        Ok(Self {
            _lock_file: lock_file,
        })
    }
}

pub fn atomic_write(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let tmp_path = path.with_extension("tmp");

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;

    fs::rename(&tmp_path, path)?;

    if let Some(parent) = path.parent() {
        let dir = fs::File::open(parent)?;
        dir.sync_all()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use satsuma_core::{FileEntry, FileStatus, ItemStatus, TransferId};
    use tempfile::TempDir;

    fn sample_state() -> PersistedState {
        let mut file = FileEntry::new("https://cdn.example/1", "WK1/01.mp3");
        file.status = FileStatus::Completed;
        file.transfer_id = Some(TransferId(7));
        PersistedState {
            version: STATE_VERSION,
            items: vec![QueueItem {
                id: "WK1".to_string(),
                status: ItemStatus::Downloading,
                files: vec![file, FileEntry::new("https://cdn.example/2", "WK1/02.mp3")],
                total_files: 2,
                completed_files: 1,
                progress: 50,
                added_time: std::time::SystemTime::UNIX_EPOCH,
            }],
            root: "voice".to_string(),
        }
    }

    #[test]
    fn state_roundtrip_preserves_queue() {
        let temp = TempDir::new().expect("temp dir");
        let disk = DiskState::new(temp.path().to_path_buf(), JsonFormat).expect("disk state");

        disk.save_state(&sample_state()).expect("save");
        let loaded = disk.load_state().expect("load").expect("present");
        assert_eq!(loaded.items.len(), 1);
        assert_eq!(loaded.items[0].id, "WK1");
        assert_eq!(loaded.items[0].files[0].transfer_id, Some(TransferId(7)));
        assert_eq!(loaded.root, "voice");
    }

    #[test]
    fn load_state_absent_is_none() {
        let temp = TempDir::new().expect("temp dir");
        let disk = DiskState::new(temp.path().to_path_buf(), JsonFormat).expect("disk state");
        assert!(disk.load_state().expect("load").is_none());
    }

    #[test]
    fn load_state_rejects_unknown_version() {
        let temp = TempDir::new().expect("temp dir");
        let disk = DiskState::new(temp.path().to_path_buf(), JsonFormat).expect("disk state");
        let mut state = sample_state();
        state.version = 99;
        disk.save_state(&state).expect("save");
        assert!(disk.load_state().is_err());
    }

    #[test]
    fn recover_cleans_tmp_files() {
        let temp = TempDir::new().expect("temp dir");
        let disk = DiskState::new(temp.path().to_path_buf(), JsonFormat).expect("disk state");
        fs::write(temp.path().join("queue.tmp"), b"data").expect("tmp write");
        let report = disk.recover().expect("recover");
        assert_eq!(report.tmp_files_cleaned, 1);
        assert!(!temp.path().join("queue.tmp").exists());
    }

    #[test]
    fn state_lock_is_exclusive() {
        let temp = TempDir::new().expect("temp dir");
        let _held = StateLock::acquire(temp.path()).expect("first lock");
        assert!(StateLock::acquire(temp.path()).is_err());
    }
}
