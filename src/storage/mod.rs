//! On-disk persistence
//!
//! Two directories under the data root: `raw/` keeps each cycle's download
//! verbatim for audit and replay, `series/` keeps one JSON file per trading
//! day. Series files are written via a temp file and rename so a crash never
//! leaves a half-written day behind. Both directories are pruned to bounded
//! retention.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use thiserror::Error;
use tracing::{debug, warn};

use crate::fetcher::RawSnapshotFile;
use crate::snapshot::DailyTimeSeries;

const RAW_PREFIX: &str = "oi_snapshot_";
const SERIES_PREFIX: &str = "series_";

/// Persistence failures. These are treated as fatal by the scheduler:
/// silently losing collected data is worse than stopping.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Serialization error for {path}: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    fn io(path: &Path, source: io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn serde(path: &Path, source: serde_json::Error) -> Self {
        StorageError::Serde {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// File-backed store for raw downloads and daily series.
pub struct DailyStore {
    raw_dir: PathBuf,
    series_dir: PathBuf,
    max_raw_files: usize,
    keep_series_days: u32,
}

impl DailyStore {
    /// Open (and create if needed) the store layout under `root`.
    pub fn open(
        root: impl Into<PathBuf>,
        max_raw_files: usize,
        keep_series_days: u32,
    ) -> Result<Self, StorageError> {
        let root = root.into();
        let raw_dir = root.join("raw");
        let series_dir = root.join("series");
        for dir in [&raw_dir, &series_dir] {
            fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;
        }
        Ok(Self {
            raw_dir,
            series_dir,
            max_raw_files,
            keep_series_days,
        })
    }

    /// Persist a raw download for audit/replay and prune old ones.
    pub fn save_raw(&self, raw: &RawSnapshotFile) -> Result<PathBuf, StorageError> {
        let stamp = raw
            .captured_at
            .with_timezone(&Local)
            .format("%Y%m%d_%H%M%S_%3f");
        let path = self.raw_dir.join(format!("{}{}.csv", RAW_PREFIX, stamp));
        fs::write(&path, &raw.content).map_err(|e| StorageError::io(&path, e))?;

        let removed = self.prune_raw();
        if removed > 0 {
            debug!("Pruned {} old raw snapshot file(s)", removed);
        }
        Ok(path)
    }

    /// Persist the series for its trading day, atomically replacing any
    /// previous file for that day.
    pub fn save_series(&self, series: &DailyTimeSeries) -> Result<PathBuf, StorageError> {
        let path = self.series_path(series.date());
        let tmp = path.with_extension("json.tmp");

        let body = serde_json::to_vec_pretty(series).map_err(|e| StorageError::serde(&path, e))?;
        fs::write(&tmp, &body).map_err(|e| StorageError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| StorageError::io(&path, e))?;

        debug!(
            "Persisted series for {} ({} snapshot(s))",
            series.date(),
            series.len()
        );
        Ok(path)
    }

    /// Load the persisted series for a trading day, if one exists.
    pub fn load_series(&self, date: NaiveDate) -> Result<Option<DailyTimeSeries>, StorageError> {
        let path = self.series_path(date);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(&path, e)),
        };
        let series = serde_json::from_slice(&bytes).map_err(|e| StorageError::serde(&path, e))?;
        Ok(Some(series))
    }

    /// List the trading days with a persisted series, newest first.
    pub fn series_dates(&self) -> Result<Vec<NaiveDate>, StorageError> {
        let mut dates: Vec<NaiveDate> = self
            .series_file_names()?
            .iter()
            .filter_map(|name| parse_series_date(name))
            .collect();
        dates.sort_unstable_by(|a, b| b.cmp(a));
        Ok(dates)
    }

    /// Delete series files older than the retention horizon.
    pub fn prune_series(&self, today: NaiveDate) -> Result<usize, StorageError> {
        let mut removed = 0;
        for name in self.series_file_names()? {
            let Some(date) = parse_series_date(&name) else {
                continue;
            };
            if (today - date).num_days() > i64::from(self.keep_series_days) {
                let path = self.series_dir.join(&name);
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
                }
            }
        }
        Ok(removed)
    }

    /// Keep only the newest `max_raw_files` raw downloads.
    fn prune_raw(&self) -> usize {
        let Ok(entries) = fs::read_dir(&self.raw_dir) else {
            return 0;
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with(RAW_PREFIX) && name.ends_with(".csv"))
            .collect();
        if names.len() <= self.max_raw_files {
            return 0;
        }

        // Timestamps in the file names sort lexically, newest last
        names.sort_unstable();
        let excess = names.len() - self.max_raw_files;
        let mut removed = 0;
        for name in names.into_iter().take(excess) {
            let path = self.raw_dir.join(&name);
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        removed
    }

    fn series_file_names(&self) -> Result<Vec<String>, StorageError> {
        let entries =
            fs::read_dir(&self.series_dir).map_err(|e| StorageError::io(&self.series_dir, e))?;
        Ok(entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with(SERIES_PREFIX) && name.ends_with(".json"))
            .collect())
    }

    fn series_path(&self, date: NaiveDate) -> PathBuf {
        self.series_dir
            .join(format!("{}{}.json", SERIES_PREFIX, date))
    }
}

fn parse_series_date(file_name: &str) -> Option<NaiveDate> {
    let stem = file_name
        .strip_prefix(SERIES_PREFIX)?
        .strip_suffix(".json")?;
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}
