//! picosense Self-Update System
//!
//! Replaces the device's firmware files from a remote repository without
//! ever leaving a mixed-version file set behind.
//!
//! Components:
//! - `transport` - Outbound HTTP with bounded retries
//! - `source` - Remote endpoint URLs
//! - `release` - Release channel lookup and version comparison
//! - `manifest` - Firmware file discovery
//! - `transfer` - Streaming chunked download into staging
//! - `verify` - Content integrity checks
//! - `layout` - On-device directories and the version marker
//! - `backup` / `rollback` - Live file snapshots and restore
//! - `apply` - Ordered promotion of staged files
//! - `state` - Update state machine
//! - `scheduler` - Drives one update cycle
//! - `recovery` - Reinstall of the branch firmware
//! - `restart` - Post-update restart hooks

pub mod apply;
pub mod backup;
pub mod layout;
pub mod manifest;
pub mod recovery;
pub mod release;
pub mod restart;
pub mod rollback;
pub mod scheduler;
pub mod source;
pub mod state;
pub mod transfer;
pub mod transport;
pub mod verify;

#[cfg(test)]
pub(crate) mod testing;

pub use layout::DeviceLayout;
pub use release::{Channel, ReleaseChecker, UpdateCheck};
pub use scheduler::UpdateScheduler;
pub use state::{PendingUpdate, StatusSnapshot, UpdateState};
pub use transport::{HttpClient, ReqwestClient, RetryPolicy, RetryingTransport};
