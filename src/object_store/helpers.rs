//! Helper functions shared across object_store submodules.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::info;

use crate::agent::Agent;
use crate::backend::ScopedLock;
use crate::object::StoredObject;
use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::root_entry::RootEntry;

/// Get current epoch time in milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

impl ObjectStore {
    /// Record that this agent is about to own `address`.
    pub(crate) async fn add_to_ownership(&self, address: &str) -> Result<(), ObjectStoreError> {
        let lock = self.backend.lock_exclusive(self.agent_address()).await?;
        let mut agent = StoredObject::<Agent>::fetch(Arc::clone(&self.backend), &lock).await?;
        agent.add_to_ownership(address);
        agent.commit(&lock).await
    }

    /// Forget `address` once it has been handed over or deleted.
    pub(crate) async fn remove_from_ownership(&self, address: &str) -> Result<(), ObjectStoreError> {
        let lock = self.backend.lock_exclusive(self.agent_address()).await?;
        let mut agent = StoredObject::<Agent>::fetch(Arc::clone(&self.backend), &lock).await?;
        if agent.remove_from_ownership(address) {
            agent.commit(&lock).await?;
        }
        Ok(())
    }

    /// Delete an agent object and drop it from the root entry.
    pub(crate) async fn unregister_agent(
        &self,
        agent: StoredObject<Agent>,
        agent_lock: &ScopedLock,
    ) -> Result<(), ObjectStoreError> {
        let address = agent.address().to_string();
        agent.remove(agent_lock).await?;
        let root_lock = self.backend.lock_exclusive(self.root_address()).await?;
        let mut root = StoredObject::<RootEntry>::fetch(Arc::clone(&self.backend), &root_lock).await?;
        if root.remove_agent(&address) {
            root.commit(&root_lock).await?;
        }
        info!(agent = %address, "unregistered agent");
        Ok(())
    }
}
