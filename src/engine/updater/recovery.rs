//! Firmware Recovery
//!
//! Reinstalls whatever the firmware branch currently holds, without asking
//! the release API. Used when the installed firmware is broken and the
//! version marker can no longer be trusted for comparison.

use super::apply::{ApplyError, ApplyReport, UpdateApplier};
use super::backup::BackupStore;
use super::layout::{DeviceLayout, LayoutError, UNKNOWN_VERSION};
use super::manifest::{ManifestResolver, VERSION_MARKER_FILE};
use super::source::ReleaseSource;
use super::transfer::{FileTransferEngine, TransferError};
use super::transport::{HttpClient, RetryingTransport};
use crate::engine::config::Config;
use serde::Serialize;
use std::fs;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("download failed: {0}")]
    Download(#[from] TransferError),

    #[error("install failed: {0}")]
    Install(#[from] ApplyError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Version recorded after the reinstall
    pub version: String,
    pub installed: usize,
    pub backed_up: usize,
    /// False when the fallback file list was used
    pub discovered: bool,
}

pub struct FirmwareRecovery<C> {
    resolver: ManifestResolver<C>,
    transfer: FileTransferEngine<C>,
    applier: UpdateApplier,
    layout: DeviceLayout,
}

impl<C: HttpClient + Clone> FirmwareRecovery<C> {
    pub fn new(config: &Config, layout: DeviceLayout, client: C) -> Self {
        let ota = &config.ota;
        let transport = RetryingTransport::new(client, ota.retry_policy());
        let source = ReleaseSource::from_config(ota);
        let backups = BackupStore::new(&layout, ota.backup_enabled);

        Self {
            resolver: ManifestResolver::new(transport.clone(), source.clone()),
            transfer: FileTransferEngine::new(transport, source, ota.chunk_size),
            applier: UpdateApplier::new(layout.clone(), backups),
            layout,
        }
    }
}

impl<C: HttpClient> FirmwareRecovery<C> {
    /// Download the branch's firmware and install it through the normal
    /// validate, backup and copy path. The new marker comes from the
    /// downloaded `version.txt`, or `unknown` when the branch has none.
    pub async fn recover(&self) -> Result<RecoveryReport, RecoveryError> {
        self.layout.check()?;

        let manifest = self.resolver.resolve().await;
        if !manifest.discovered {
            warn!("Recovering from the fallback file list");
        }

        let staging = self.layout.staging_dir();
        let transfer = self
            .transfer
            .download(&manifest, staging, |done, total| {
                info!(done, total, "Recovery download progress");
            })
            .await?;

        let version = fs::read_to_string(staging.join(VERSION_MARKER_FILE))
            .map(|content| content.trim().to_string())
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string());

        let ApplyReport { copied, backed_up } = self.applier.apply(staging, &manifest, &version)?;
        info!(%version, files = transfer.files, copied, "Firmware recovered");

        Ok(RecoveryReport {
            version,
            installed: copied,
            backed_up,
            discovered: manifest.discovered,
        })
    }
}
