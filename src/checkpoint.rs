//! Durable crawl progress.
//!
//! One JSON document per site, `{checkpoint_dir}/{site}/scraping_progress.json`:
//!
//! ```json
//! {
//!   "completed_units": ["2024-05-01", "2024-05-02"],
//!   "last_unit": "2024-05-02",
//!   "updated_at": "2024-05-03T08:15:00Z"
//! }
//! ```
//!
//! The file is read once when a run starts and rewritten in full after every
//! unit. Writes go to a temporary file in the same directory that is then
//! renamed over the old one, so a crash leaves either the previous or the new
//! state on disk, never a torn file.

use crate::archive::ArchiveUnit;
use crate::error::CheckpointError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

pub const CHECKPOINT_FILE: &str = "scraping_progress.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    #[serde(default)]
    pub completed_units: BTreeSet<String>,
    /// Highest unit marked complete.
    #[serde(default)]
    pub last_unit: Option<ArchiveUnit>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CheckpointState {
    pub fn is_complete(&self, unit: &ArchiveUnit) -> bool {
        self.completed_units.contains(&unit.key())
    }

    pub fn mark_complete(&mut self, unit: &ArchiveUnit) {
        self.completed_units.insert(unit.key());
        if self.last_unit.is_none_or(|last| *unit > last) {
            self.last_unit = Some(*unit);
        }
        self.updated_at = Some(Utc::now());
    }
}

/// Reads and atomically rewrites one checkpoint file.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The checkpoint for `site` under `dir`.
    pub fn for_site(dir: impl AsRef<Path>, site: &str) -> Self {
        Self::new(dir.as_ref().join(site).join(CHECKPOINT_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved state; a missing file is a fresh start.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    pub fn load(&self) -> Result<CheckpointState, CheckpointError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No checkpoint found; starting fresh");
                return Ok(CheckpointState::default());
            }
            Err(source) => return Err(self.io_error(source)),
        };
        let state: CheckpointState =
            serde_json::from_str(&raw).map_err(|source| CheckpointError::Json {
                path: self.path.display().to_string(),
                source,
            })?;
        info!(
            completed = state.completed_units.len(),
            last_unit = ?state.last_unit,
            "Loaded checkpoint"
        );
        Ok(state)
    }

    /// Replace the file with `state`.
    pub fn save(&self, state: &CheckpointState) -> Result<(), CheckpointError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|source| self.io_error(source))?;

        let tmp = NamedTempFile::new_in(dir).map_err(|source| self.io_error(source))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut writer, state).map_err(|source| {
                CheckpointError::Json {
                    path: self.path.display().to_string(),
                    source,
                }
            })?;
            writer.flush().map_err(|source| self.io_error(source))?;
        }
        tmp.as_file().sync_all().map_err(|source| self.io_error(source))?;
        tmp.persist(&self.path).map_err(|source| CheckpointError::Persist {
            path: self.path.display().to_string(),
            source,
        })?;

        debug!(
            path = %self.path.display(),
            completed = state.completed_units.len(),
            "Saved checkpoint"
        );
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_missing_file_is_fresh_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::for_site(dir.path(), "publictv");
        assert_eq!(store.load().unwrap(), CheckpointState::default());
        assert!(store.path().ends_with("publictv/scraping_progress.json"));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::for_site(dir.path(), "indian_express");
        let mut state = CheckpointState::default();
        let d1 = ArchiveUnit::Date(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap());
        let d0 = ArchiveUnit::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        state.mark_complete(&d1);
        state.mark_complete(&d0);
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, state);
        assert!(loaded.is_complete(&d0));
        assert_eq!(loaded.last_unit, Some(d1));

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["completed_units"], serde_json::json!(["2024-05-01", "2024-05-02"]));
        assert_eq!(json["last_unit"], "2024-05-02");
    }

    #[test]
    fn test_page_units_round_trip_as_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::for_site(dir.path(), "publictv");
        let mut state = CheckpointState::default();
        state.mark_complete(&ArchiveUnit::Page(4));
        store.save(&state).unwrap();
        state.mark_complete(&ArchiveUnit::Page(5));
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.last_unit, Some(ArchiveUnit::Page(5)));
        assert_eq!(loaded.completed_units.len(), 2);
        let leftovers = std::fs::read_dir(store.path().parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::for_site(dir.path(), "news18");
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "{ not json").unwrap();
        assert!(matches!(store.load(), Err(CheckpointError::Json { .. })));
    }
}
