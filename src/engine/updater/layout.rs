//! Device Layout
//!
//! On-device directory layout: live files at the root, a staging directory
//! for downloads and a backup directory for `.bak` copies. Also owns the
//! version marker, the only record of what is installed.

use super::manifest::VERSION_MARKER_FILE;
use crate::engine::config::StorageConfig;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Reported when no version marker is present
pub const UNKNOWN_VERSION: &str = "unknown";

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("could not determine a data directory")]
    NoDataDir,

    #[error("{name} directory {path} must be a subdirectory of the device root distinct from the other storage directory")]
    UnsafeStorage { name: &'static str, path: PathBuf },

    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LayoutError {
    pub fn io(action: &'static str, path: &Path) -> impl FnOnce(io::Error) -> Self {
        let path = path.to_path_buf();
        move |source| Self::Io {
            action,
            path,
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLayout {
    root: PathBuf,
    staging: PathBuf,
    backups: PathBuf,
}

impl DeviceLayout {
    /// Relative storage paths are resolved against the root
    pub fn new(root: PathBuf, storage: &StorageConfig) -> Self {
        let staging = root.join(&storage.staging_dir);
        let backups = root.join(&storage.backup_dir);
        Self {
            root,
            staging,
            backups,
        }
    }

    /// Layout with default storage dirs (for testing)
    pub fn with_root(root: PathBuf) -> Self {
        Self::new(root, &StorageConfig::default())
    }

    /// `<local data dir>/picosense`
    pub fn default_root() -> Result<PathBuf, LayoutError> {
        let data_dir = dirs::data_local_dir().ok_or(LayoutError::NoDataDir)?;
        Ok(data_dir.join("picosense"))
    }

    /// Staging and backups are cleared wholesale, so each must sit strictly
    /// below the root and neither may contain the other.
    pub fn check(&self) -> Result<(), LayoutError> {
        for (name, dir, other) in [
            ("staging", &self.staging, &self.backups),
            ("backup", &self.backups, &self.staging),
        ] {
            let inside = dir
                .strip_prefix(&self.root)
                .map(is_plain_subdir)
                .unwrap_or(false);
            if !inside || dir.starts_with(other) {
                return Err(LayoutError::UnsafeStorage {
                    name,
                    path: dir.clone(),
                });
            }
        }
        Ok(())
    }

    /// Create the directory structure
    pub fn init(&self) -> Result<(), LayoutError> {
        self.check()?;
        for dir in [&self.root, &self.staging, &self.backups] {
            fs::create_dir_all(dir).map_err(LayoutError::io("creating", dir))?;
        }
        Ok(())
    }

    pub fn live_dir(&self) -> &Path {
        &self.root
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backups
    }

    pub fn live_path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    pub fn staged_path(&self, filename: &str) -> PathBuf {
        self.staging.join(filename)
    }

    pub fn marker_path(&self) -> PathBuf {
        self.live_path(VERSION_MARKER_FILE)
    }

    /// Installed version, `unknown` when the marker is missing or empty
    pub fn current_version(&self) -> String {
        match fs::read_to_string(self.marker_path()) {
            Ok(content) => {
                let version = content.trim();
                if version.is_empty() {
                    UNKNOWN_VERSION.to_string()
                } else {
                    version.to_string()
                }
            }
            Err(_) => UNKNOWN_VERSION.to_string(),
        }
    }

    /// Persist the version marker atomically
    pub fn write_version(&self, version: &str) -> Result<(), LayoutError> {
        let marker = self.marker_path();
        write_atomic(&marker, version.trim().as_bytes())
    }

    /// Files currently in staging
    pub fn list_staged(&self) -> Result<Vec<String>, LayoutError> {
        list_files(&self.staging)
    }
}

/// True for a non-empty relative path made only of plain names (no `.`,
/// `..`, root or prefix components)
pub fn is_plain_subdir(path: &Path) -> bool {
    path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Path of the in-flight temporary file for `path`
pub fn temp_path(path: &Path) -> PathBuf {
    sibling_with_suffix(path, ".tmp")
}

/// Write a file through a sibling temp file and rename
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), LayoutError> {
    let temp = temp_path(path);
    fs::write(&temp, content).map_err(LayoutError::io("writing", &temp))?;
    if let Err(e) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(LayoutError::io("replacing", path)(e));
    }
    Ok(())
}

/// Copy `src` over `dst` through a sibling temp file and rename, so `dst` is
/// either the old or the new content, never half of each
pub fn replace_file(src: &Path, dst: &Path) -> io::Result<u64> {
    let temp = sibling_with_suffix(dst, ".new");
    let copied = fs::copy(src, &temp)?;
    if let Err(e) = fs::rename(&temp, dst) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }
    Ok(copied)
}

/// Remove every file in `dir`, creating it when missing. Returns the count removed.
pub fn clear_directory(dir: &Path) -> Result<usize, LayoutError> {
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(LayoutError::io("creating", dir))?;
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(dir).map_err(LayoutError::io("reading", dir))? {
        let path = entry.map_err(LayoutError::io("reading", dir))?.path();
        if path.is_file() {
            fs::remove_file(&path).map_err(LayoutError::io("removing", &path))?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Sorted names of regular files in `dir`; a missing dir is empty
pub fn list_files(dir: &Path) -> Result<Vec<String>, LayoutError> {
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(LayoutError::io("reading", dir))? {
        let path = entry.map_err(LayoutError::io("reading", dir))?.path();
        if path.is_file() {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}
