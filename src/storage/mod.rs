//! Record persistence: JSON-lines per-day files.
//!
//! Every category appends one JSON object per line to a file keyed by the
//! day index (`ts_wall / 86400`):
//!
//! ```text
//! <data_dir>/seismic/<day>.json   seismic records
//! <data_dir>/events/<day>.json    legacy flat events
//! <data_dir>/system/<day>.json    system events
//! <data_dir>/data/<day>.json      rolling sample summaries
//! ```
//!
//! All writes happen in the sink domain; the retention sweep runs once at
//! startup. A pid-file process lock prevents two stations from sharing one
//! data directory.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::types::{FlatEvent, SampleSummary, SeismicRecord, SystemEvent};

const SECONDS_PER_DAY: u64 = 86_400;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("another station instance holds the lock at {0}")]
    Locked(String),
}

/// Day index for a wall-clock timestamp.
pub fn day_index(ts_wall_secs: u64) -> u64 {
    ts_wall_secs / SECONDS_PER_DAY
}

/// Append-only JSON-lines store rooted at the station data directory.
pub struct RecordStore {
    root: PathBuf,
}

impl RecordStore {
    /// Open the store, creating the category directories if necessary.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        for category in ["seismic", "events", "system", "data"] {
            fs::create_dir_all(root.join(category))?;
        }
        info!(root = %root.display(), "Record store opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Append a seismic record under its wall-clock day.
    pub fn append_seismic(&self, record: &SeismicRecord) -> Result<(), StorageError> {
        self.append("seismic", day_index(record.detection.ts_wall), record)
    }

    /// Append the legacy flat projection of an event.
    pub fn append_flat_event(&self, event: &FlatEvent) -> Result<(), StorageError> {
        self.append("events", day_index(event.ts_wall_ms / 1_000), event)
    }

    /// Append a system event. Events with an untrusted wall clock land in
    /// day 0, keyed purely by their monotonic timestamp.
    pub fn append_system(&self, event: &SystemEvent) -> Result<(), StorageError> {
        self.append("system", day_index(event.ts_wall), event)
    }

    /// Append a rolling sample summary (rate-limited by the sink).
    pub fn append_summary(
        &self,
        summary: &SampleSummary,
        ts_wall_secs: u64,
    ) -> Result<(), StorageError> {
        self.append("data", day_index(ts_wall_secs), summary)
    }

    fn append<T: serde::Serialize>(
        &self,
        category: &str,
        day: u64,
        value: &T,
    ) -> Result<(), StorageError> {
        let path = self.root.join(category).join(format!("{day}.json"));
        let mut line = serde_json::to_string(value)?;
        line.push('\n');
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Read back all records of one day (test and export tooling).
    pub fn read_seismic_day(&self, day: u64) -> Result<Vec<SeismicRecord>, StorageError> {
        let path = self.root.join("seismic").join(format!("{day}.json"));
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(path)?;
        Ok(contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }

    /// Delete per-day files older than the retention window. Returns the
    /// number of files removed. Runs once at startup.
    pub fn prune_older_than(
        &self,
        retention_days: u64,
        now_wall_secs: u64,
    ) -> Result<usize, StorageError> {
        if retention_days == 0 {
            return Ok(0);
        }
        let cutoff_day = day_index(now_wall_secs).saturating_sub(retention_days);
        let mut removed = 0;

        for category in ["seismic", "events", "system", "data"] {
            let dir = self.root.join(category);
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let name = entry.file_name();
                let Some(day) = name
                    .to_str()
                    .and_then(|n| n.strip_suffix(".json"))
                    .and_then(|n| n.parse::<u64>().ok())
                else {
                    continue;
                };
                if day < cutoff_day {
                    if let Err(e) = fs::remove_file(entry.path()) {
                        warn!(path = %entry.path().display(), error = %e, "Retention sweep failed to remove file");
                    } else {
                        removed += 1;
                    }
                }
            }
        }

        if removed > 0 {
            info!(removed, cutoff_day, "Retention sweep removed old day files");
        }
        Ok(removed)
    }
}

/// Pid-file lock preventing two stations from writing one data directory.
/// Released (file removed) on drop.
pub struct ProcessLock {
    path: PathBuf,
}

impl ProcessLock {
    pub fn acquire<P: AsRef<Path>>(data_dir: P) -> Result<Self, StorageError> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join("station.pid");

        if path.exists() {
            let stale = fs::read_to_string(&path)
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok())
                .map_or(true, |pid| !Self::process_alive(pid));
            if stale {
                warn!(path = %path.display(), "Removing stale process lock");
                fs::remove_file(&path)?;
            } else {
                return Err(StorageError::Locked(path.display().to_string()));
            }
        }

        let mut file = File::create(&path)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { path })
    }

    fn process_alive(pid: u32) -> bool {
        // Signal 0 probes existence without sending anything.
        // SAFETY: kill with signal 0 performs no action on the target.
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
