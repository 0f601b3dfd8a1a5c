use crate::auth::Principal;
use crate::domain::basket::Snapshot;
use crate::storage::SnapshotStore;
use std::sync::Arc;

/// Read path for the live snapshot. Never writes.
#[derive(Clone)]
pub struct SnapshotReader {
    store: Arc<dyn SnapshotStore>,
}

impl SnapshotReader {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    /// The live snapshot, or the empty one if nothing was ever generated.
    pub async fn current(&self, principal: &Principal) -> anyhow::Result<Snapshot> {
        let snapshot = self.store.read().await?;
        tracing::debug!(
            subject = principal.subject(),
            generation_id = snapshot.generation_id,
            baskets = snapshot.baskets.len(),
            "serving live snapshot"
        );
        Ok(snapshot)
    }
}
