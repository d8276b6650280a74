//! Update State Machine
//!
//! The pending update record and its lifecycle states. Only the scheduler
//! mutates it; everything else sees a [`StatusSnapshot`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a single update cycle
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    /// Nothing scheduled
    #[default]
    Idle,
    /// Armed, waiting for the scheduled time
    Scheduled,
    Downloading,
    Applying,
    /// Applied; the device is restarting into the new version
    Restarting,
    /// Cycle aborted; the previous version is still installed
    Failed,
}

impl UpdateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scheduled => "scheduled",
            Self::Downloading => "downloading",
            Self::Applying => "applying",
            Self::Restarting => "restarting",
            Self::Failed => "failed",
        }
    }

    /// States from which a new request may arm an update
    pub fn accepts_request(&self) -> bool {
        matches!(self, Self::Idle | Self::Failed)
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single pending update
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingUpdate {
    pub scheduled: bool,
    pub target_version: Option<String>,
    pub current_version: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub state: UpdateState,
    pub progress_percent: u8,
    pub message: String,
}

impl PendingUpdate {
    pub fn new(current_version: impl Into<String>) -> Self {
        Self {
            scheduled: false,
            target_version: None,
            current_version: current_version.into(),
            scheduled_at: None,
            state: UpdateState::Idle,
            progress_percent: 0,
            message: "Ready".to_string(),
        }
    }

    /// Arm an update to `target` at `at`
    pub fn arm(&mut self, target: &str, current: &str, at: DateTime<Utc>, message: String) {
        self.scheduled = true;
        self.target_version = Some(target.to_string());
        self.current_version = current.to_string();
        self.scheduled_at = Some(at);
        self.state = UpdateState::Scheduled;
        self.progress_percent = 0;
        self.message = message;
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled
            && self.state == UpdateState::Scheduled
            && self.scheduled_at.is_some_and(|at| now >= at)
    }

    pub fn start_downloading(&mut self) {
        self.state = UpdateState::Downloading;
        self.progress_percent = 10;
        self.message = "Resolving firmware files".to_string();
    }

    pub fn update_progress(&mut self, percent: u8, message: String) {
        self.progress_percent = percent.min(100);
        self.message = message;
    }

    pub fn start_applying(&mut self) {
        self.state = UpdateState::Applying;
        self.progress_percent = 80;
        self.message = "Installing files".to_string();
    }

    pub fn mark_restarting(&mut self) {
        self.state = UpdateState::Restarting;
        self.progress_percent = 100;
        self.message = match &self.target_version {
            Some(version) => format!("Update to {} complete, restarting", version),
            None => "Update complete, restarting".to_string(),
        };
    }

    /// Terminal failure. The target stays visible for status; the scheduled
    /// flag is cleared so a new request can arm again.
    pub fn mark_failed(&mut self, message: String) {
        self.scheduled = false;
        self.scheduled_at = None;
        self.state = UpdateState::Failed;
        self.message = message;
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> StatusSnapshot {
        let scheduled_seconds_remaining = match (self.state, self.scheduled_at) {
            (UpdateState::Scheduled, Some(at)) => Some((at - now).num_seconds().max(0) as u64),
            _ => None,
        };
        StatusSnapshot {
            current_version: self.current_version.clone(),
            target_version: self.target_version.clone(),
            state: self.state,
            progress_percent: self.progress_percent,
            message: self.message.clone(),
            scheduled_seconds_remaining,
        }
    }
}

/// Read-only view of the pending update
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub current_version: String,
    pub target_version: Option<String>,
    pub state: UpdateState,
    pub progress_percent: u8,
    pub message: String,
    pub scheduled_seconds_remaining: Option<u64>,
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "OTA Update Status")?;
        writeln!(f, "Current version: {}", self.current_version)?;
        if let Some(target) = &self.target_version {
            writeln!(f, "Target version: {}", target)?;
        }
        writeln!(f, "State: {}", self.state)?;
        writeln!(f, "Progress: {}%", self.progress_percent)?;
        writeln!(f, "Message: {}", self.message)?;
        if let Some(remaining) = self.scheduled_seconds_remaining {
            writeln!(f, "Time remaining: {} seconds", remaining)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_default_idle() {
        let pending = PendingUpdate::new("v1.0.0");
        assert_eq!(pending.state, UpdateState::Idle);
        assert!(!pending.scheduled);
        assert!(pending.state.accepts_request());
        assert!(!pending.is_due(Utc::now()));
    }

    #[test]
    fn test_lifecycle_success() {
        let now = Utc::now();
        let mut pending = PendingUpdate::new("v1.0.0");

        pending.arm("v1.1.0", "v1.0.0", now + Duration::seconds(5), "armed".to_string());
        assert_eq!(pending.state, UpdateState::Scheduled);
        assert!(!pending.state.accepts_request());
        assert!(!pending.is_due(now));
        assert!(pending.is_due(now + Duration::seconds(5)));

        pending.start_downloading();
        assert_eq!(pending.progress_percent, 10);
        pending.update_progress(40, "2/4 files".to_string());
        pending.start_applying();
        assert_eq!(pending.progress_percent, 80);

        pending.mark_restarting();
        assert_eq!(pending.state, UpdateState::Restarting);
        assert_eq!(pending.progress_percent, 100);
        assert!(pending.message.contains("v1.1.0"));
    }

    #[test]
    fn test_failure_clears_schedule() {
        let now = Utc::now();
        let mut pending = PendingUpdate::new("v1.0.0");
        pending.arm("v1.1.0", "v1.0.0", now, "armed".to_string());
        pending.start_downloading();
        pending.mark_failed("Download failed".to_string());

        assert_eq!(pending.state, UpdateState::Failed);
        assert!(!pending.scheduled);
        assert!(pending.state.accepts_request());
        assert!(!pending.is_due(now));
    }

    #[test]
    fn test_snapshot_remaining_time() {
        let now = Utc::now();
        let mut pending = PendingUpdate::new("v1.0.0");
        pending.arm("v1.1.0", "v1.0.0", now + Duration::seconds(5), "armed".to_string());

        let snapshot = pending.snapshot(now);
        assert_eq!(snapshot.scheduled_seconds_remaining, Some(5));
        assert_eq!(pending.snapshot(now + Duration::seconds(9)).scheduled_seconds_remaining, Some(0));

        let text = snapshot.to_string();
        assert!(text.contains("State: scheduled"));
        assert!(text.contains("Time remaining: 5 seconds"));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["state"], "scheduled");
        assert_eq!(json["target_version"], "v1.1.0");
    }
}
