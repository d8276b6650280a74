//! Update Scheduler
//!
//! Owns the pending update and drives one cycle through check, delayed
//! download, apply and restart. Polled by the server loop; nothing here
//! spawns tasks or runs in the background.

use super::apply::UpdateApplier;
use super::backup::BackupStore;
use super::layout::DeviceLayout;
use super::manifest::ManifestResolver;
use super::release::{Channel, CheckSource, ReleaseChecker};
use super::restart::RestartHook;
use super::source::ReleaseSource;
use super::state::{PendingUpdate, StatusSnapshot, UpdateState};
use super::transfer::FileTransferEngine;
use super::transport::{HttpClient, RetryingTransport};
use crate::engine::config::Config;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{error, info};

/// Progress band covered by the download phase
const DOWNLOAD_START_PERCENT: usize = 10;
const DOWNLOAD_END_PERCENT: usize = 70;

pub struct UpdateScheduler<C> {
    checker: ReleaseChecker<C>,
    resolver: ManifestResolver<C>,
    transfer: FileTransferEngine<C>,
    applier: UpdateApplier,
    layout: DeviceLayout,
    restart: Box<dyn RestartHook>,
    pending: PendingUpdate,
    enabled: bool,
    channel: Channel,
    delay: Duration,
}

impl<C: HttpClient + Clone> UpdateScheduler<C> {
    pub fn new(config: &Config, layout: DeviceLayout, client: C, restart: Box<dyn RestartHook>) -> Self {
        let ota = &config.ota;
        let transport = RetryingTransport::new(client, ota.retry_policy());
        let source = ReleaseSource::from_config(ota);
        let backups = BackupStore::new(&layout, ota.backup_enabled);

        Self {
            checker: ReleaseChecker::new(
                transport.clone(),
                source.clone(),
                ota.prerelease_tag_prefix.clone(),
            ),
            resolver: ManifestResolver::new(transport.clone(), source.clone()),
            transfer: FileTransferEngine::new(transport, source, ota.chunk_size),
            applier: UpdateApplier::new(layout.clone(), backups),
            pending: PendingUpdate::new(layout.current_version()),
            layout,
            restart,
            enabled: ota.enabled,
            channel: ota.channel,
            delay: ota.update_delay(),
        }
    }
}

impl<C: HttpClient> UpdateScheduler<C> {
    pub fn pending(&self) -> &PendingUpdate {
        &self.pending
    }

    pub fn get_status(&self) -> StatusSnapshot {
        self.get_status_at(Utc::now())
    }

    pub fn get_status_at(&self, now: DateTime<Utc>) -> StatusSnapshot {
        self.pending.snapshot(now)
    }

    pub async fn request_update(&mut self) -> StatusSnapshot {
        self.request_update_at(Utc::now()).await
    }

    /// Check for an update and arm it `delay` after `now`.
    ///
    /// A request while an update is armed or running changes nothing.
    pub async fn request_update_at(&mut self, now: DateTime<Utc>) -> StatusSnapshot {
        if !self.pending.state.accepts_request() {
            info!(state = %self.pending.state, "Update already scheduled");
            return self.pending.snapshot(now);
        }
        if !self.enabled {
            self.pending.message = "OTA disabled".to_string();
            return self.pending.snapshot(now);
        }

        let current = self.layout.current_version();
        self.pending.current_version = current.clone();

        let check = self.checker.check_for_update(&current, self.channel).await;
        match check.new_version {
            Some(target) if check.has_update => {
                let due = chrono::Duration::from_std(self.delay)
                    .ok()
                    .and_then(|delay| now.checked_add_signed(delay));
                let Some(due) = due else {
                    error!(delay_secs = self.delay.as_secs(), "Update delay out of range");
                    self.pending.message =
                        format!("Update delay of {} seconds is out of range", self.delay.as_secs());
                    return self.pending.snapshot(now);
                };
                let message = format!(
                    "Update to {} scheduled in {} seconds",
                    target,
                    self.delay.as_secs()
                );
                info!(%target, %current, delay_secs = self.delay.as_secs(), "Update scheduled");
                self.pending.arm(&target, &current, due, message);
            }
            _ => {
                self.pending.message = match check.source {
                    CheckSource::Unavailable { reason } => format!("Update check failed: {}", reason),
                    _ => "No updates available".to_string(),
                };
                info!(message = %self.pending.message, "No update scheduled");
            }
        }

        self.pending.snapshot(now)
    }

    pub async fn poll_scheduled(&mut self) {
        self.poll_scheduled_at(Utc::now()).await
    }

    /// Run the armed update to a terminal state when it is due
    pub async fn poll_scheduled_at(&mut self, now: DateTime<Utc>) {
        if !self.pending.is_due(now) {
            return;
        }
        self.run_update().await;
    }

    async fn run_update(&mut self) {
        let Some(target) = self.pending.target_version.clone() else {
            self.pending.mark_failed("No target version".to_string());
            return;
        };
        info!(%target, "Starting scheduled update");
        if let Err(e) = self.layout.check() {
            error!(error = %e, "Refusing to update with this storage layout");
            self.pending.mark_failed(format!("Storage layout invalid: {}", e));
            return;
        }
        self.pending.start_downloading();

        let manifest = self.resolver.resolve().await;
        let total = manifest.len();
        self.pending.update_progress(
            DOWNLOAD_START_PERCENT as u8,
            format!("Downloading {} files", total),
        );

        let staging = self.layout.staging_dir().to_path_buf();
        let pending = &mut self.pending;
        let downloaded = self
            .transfer
            .download(&manifest, &staging, |done, total| {
                let span = DOWNLOAD_END_PERCENT - DOWNLOAD_START_PERCENT;
                let percent = DOWNLOAD_START_PERCENT + span * done / total.max(1);
                pending.update_progress(percent as u8, format!("Downloaded {}/{} files", done, total));
            })
            .await;

        if let Err(e) = downloaded {
            error!(error = %e, "Update download failed");
            self.pending.mark_failed(format!("Download failed: {}", e));
            return;
        }

        self.pending.start_applying();
        if let Err(e) = self.applier.apply(&staging, &manifest, &target) {
            error!(error = %e, "Update apply failed");
            self.pending.mark_failed(format!("Apply failed: {}", e));
            return;
        }

        self.pending.current_version = self.layout.current_version();
        self.pending.scheduled = false;
        self.pending.mark_restarting();
        info!(%target, "Update installed");
        self.restart.restart(&target);
    }

    pub fn state(&self) -> UpdateState {
        self.pending.state
    }
}
