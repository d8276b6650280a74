//! Backup Store
//!
//! Keeps `<backup dir>/<filename>.bak` copies of live files taken right
//! before an update overwrites them. Individual failures are logged and
//! skipped; a missing backup never blocks an update.

use super::layout::{list_files, replace_file, DeviceLayout};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

pub const BACKUP_SUFFIX: &str = ".bak";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupEntry {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct BackupStore {
    live_dir: PathBuf,
    backup_dir: PathBuf,
    enabled: bool,
}

impl BackupStore {
    pub fn new(layout: &DeviceLayout, enabled: bool) -> Self {
        Self {
            live_dir: layout.live_dir().to_path_buf(),
            backup_dir: layout.backup_dir().to_path_buf(),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn backup_path(&self, filename: &str) -> PathBuf {
        self.backup_dir.join(format!("{}{}", filename, BACKUP_SUFFIX))
    }

    /// Snapshot the named live files. Returns how many were saved.
    ///
    /// `.bak` files from an earlier cycle are removed first so a later
    /// restore brings back exactly this set.
    pub fn backup<S: AsRef<str>>(&self, filenames: &[S]) -> usize {
        if !self.enabled {
            debug!("Backups disabled");
            return 0;
        }
        if let Err(e) = fs::create_dir_all(&self.backup_dir) {
            warn!(dir = %self.backup_dir.display(), error = %e, "Cannot create backup directory");
            return 0;
        }
        self.clear_stale();

        let mut saved = 0;
        for filename in filenames {
            let filename = filename.as_ref();
            let live = self.live_dir.join(filename);
            if !live.is_file() {
                debug!(file = filename, "No live file to back up");
                continue;
            }
            match fs::copy(&live, self.backup_path(filename)) {
                Ok(_) => saved += 1,
                Err(e) => warn!(file = filename, error = %e, "Backup failed, continuing"),
            }
        }

        info!(saved, "Backed up live files");
        saved
    }

    /// Copy every `.bak` back over its live name. `0` means nothing was restored.
    pub fn restore(&self) -> usize {
        if !self.enabled {
            return 0;
        }

        let mut restored = 0;
        for entry in self.list() {
            let live = self.live_dir.join(&entry.filename);
            match replace_file(&entry.path, &live) {
                Ok(_) => {
                    info!(file = %entry.filename, "Restored from backup");
                    restored += 1;
                }
                Err(e) => warn!(file = %entry.filename, error = %e, "Restore failed"),
            }
        }
        restored
    }

    /// Backup entries currently present
    pub fn list(&self) -> Vec<BackupEntry> {
        let names = match list_files(&self.backup_dir) {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Cannot list backups");
                return vec![];
            }
        };

        names
            .into_iter()
            .filter_map(|name| {
                let filename = name.strip_suffix(BACKUP_SUFFIX)?.to_string();
                if filename.is_empty() {
                    return None;
                }
                let path = self.backup_dir.join(&name);
                let size = path.metadata().map(|m| m.len()).unwrap_or(0);
                Some(BackupEntry {
                    filename,
                    path,
                    size,
                })
            })
            .collect()
    }

    fn clear_stale(&self) {
        for entry in self.list() {
            if let Err(e) = fs::remove_file(&entry.path) {
                warn!(file = %entry.filename, error = %e, "Cannot remove stale backup");
            }
        }
    }
}
