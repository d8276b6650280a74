//! Rollback after a failed apply

use super::backup::BackupStore;
use tracing::{error, warn};

#[derive(Debug, Clone)]
pub struct RollbackManager {
    store: BackupStore,
}

impl RollbackManager {
    pub fn new(store: BackupStore) -> Self {
        Self { store }
    }

    /// Restore the backed-up live files. True when anything was restored.
    pub fn rollback(&self) -> bool {
        warn!("Rolling back to backed-up files");
        let restored = self.store.restore();
        if restored == 0 {
            error!("Rollback found nothing to restore");
            return false;
        }
        warn!(restored, "Rollback complete");
        true
    }
}
