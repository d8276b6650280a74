//! Update Applier
//!
//! Promotes staged files to live in a fixed order: validate everything,
//! back up, copy, write the version marker, clear staging. The marker is
//! only written once every copy succeeded.

use super::backup::BackupStore;
use super::layout::{clear_directory, replace_file, DeviceLayout, LayoutError};
use super::manifest::{FileKind, FileManifestEntry, Manifest};
use super::rollback::RollbackManager;
use super::verify::{validate_staged_file, ContentError};
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("{file}: validation failed: {reason}")]
    Validation { file: String, reason: ContentError },

    #[error("{file}: not present in staging")]
    MissingStaged { file: String },

    #[error("copying {file} failed: {source} ({})", rollback_note(.rolled_back))]
    Copy {
        file: String,
        #[source]
        source: io::Error,
        rolled_back: bool,
    },

    #[error("writing version marker failed: {source} ({})", rollback_note(.rolled_back))]
    Marker {
        #[source]
        source: LayoutError,
        rolled_back: bool,
    },
}

fn rollback_note(rolled_back: &bool) -> &'static str {
    if *rolled_back {
        "previous files restored"
    } else {
        "nothing to restore"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub copied: usize,
    pub backed_up: usize,
}

pub struct UpdateApplier {
    layout: DeviceLayout,
    backups: BackupStore,
    rollback: RollbackManager,
}

impl UpdateApplier {
    pub fn new(layout: DeviceLayout, backups: BackupStore) -> Self {
        let rollback = RollbackManager::new(backups.clone());
        Self {
            layout,
            backups,
            rollback,
        }
    }

    /// Install the staged manifest files and record `new_version`.
    ///
    /// On failure staging is left as it is.
    pub fn apply(
        &self,
        staged_dir: &Path,
        manifest: &Manifest,
        new_version: &str,
    ) -> Result<ApplyReport, ApplyError> {
        let to_copy = self.validate(staged_dir, manifest)?;

        let names: Vec<&str> = to_copy.iter().map(|e| e.filename.as_str()).collect();
        let backed_up = self.backups.backup(&names);

        let mut copied = 0;
        for entry in &to_copy {
            let staged = staged_dir.join(&entry.filename);
            let live = self.layout.live_path(&entry.filename);
            if let Err(source) = replace_file(&staged, &live) {
                error!(file = %entry.filename, error = %source, "Copy to live failed");
                let rolled_back = self.rollback.rollback();
                return Err(ApplyError::Copy {
                    file: entry.filename.clone(),
                    source,
                    rolled_back,
                });
            }
            copied += 1;
        }

        if let Err(source) = self.layout.write_version(new_version) {
            error!(error = %source, "Version marker write failed");
            let rolled_back = self.rollback.rollback();
            return Err(ApplyError::Marker {
                source,
                rolled_back,
            });
        }
        info!(version = new_version, copied, "Update applied");

        if let Err(e) = clear_directory(staged_dir) {
            warn!(error = %e, "Could not clear staging after apply");
        }

        Ok(ApplyReport { copied, backed_up })
    }

    /// Check every staged file before anything live is touched. Returns the
    /// entries to copy; the version marker entry is never copied since
    /// its live content comes from `new_version`.
    fn validate<'m>(
        &self,
        staged_dir: &Path,
        manifest: &'m Manifest,
    ) -> Result<Vec<&'m FileManifestEntry>, ApplyError> {
        let mut to_copy = Vec::new();
        for entry in manifest.entries() {
            let staged = staged_dir.join(&entry.filename);
            if !staged.exists() {
                if entry.is_optional() {
                    continue;
                }
                return Err(ApplyError::MissingStaged {
                    file: entry.filename.clone(),
                });
            }
            validate_staged_file(&staged, entry.kind).map_err(|reason| ApplyError::Validation {
                file: entry.filename.clone(),
                reason,
            })?;
            if entry.kind != FileKind::VersionMarker {
                to_copy.push(entry);
            }
        }
        Ok(to_copy)
    }
}
