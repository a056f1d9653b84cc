//! Ownership-based garbage collection of root-linked objects.
//!
//! A queue or register is created owned by the agent that creates it, and is
//! only handed to the root entry once linked. When that agent dies between the
//! two steps its replacement finds the object in the dead agent's list and
//! either finishes the handover or deletes the orphan.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use crate::backend::ScopedLock;
use crate::object::{ObjectKind, StoredObject};
use crate::object_store::ObjectStoreError;
use crate::root_entry::{RootChild, RootEntry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GcOutcome {
    /// Someone else owns it now; nothing to do.
    NotOwned { owner: String },
    /// The root already points at it, so ownership passed to `owner`.
    Relinked { owner: String },
    Removed,
    Requeued { queue: String, copy_nb: u32 },
    /// Kinds that are never collected through an agent's list.
    Skipped { kind: ObjectKind },
}

impl<P: RootChild> StoredObject<P> {
    /// Collect an object the caller holds exclusively, assuming it belonged to
    /// `presumed_owner`.
    pub async fn garbage_collect(
        mut self,
        lock: &ScopedLock,
        presumed_owner: &str,
        root_address: &str,
    ) -> Result<GcOutcome, ObjectStoreError> {
        if self.owner() != presumed_owner {
            return Ok(GcOutcome::NotOwned {
                owner: self.owner().to_string(),
            });
        }

        let root_lock = self.backend().lock_shared(root_address).await?;
        let root = StoredObject::<RootEntry>::fetch(Arc::clone(self.backend()), &root_lock).await?;
        if self.is_referenced_by(&root, self.address()) {
            root_lock.release();
            self.set_owner(root_address);
            self.commit(lock).await?;
            info!(address = %self.address(), kind = %P::KIND, "relinked object to root entry");
            return Ok(GcOutcome::Relinked {
                owner: root_address.to_string(),
            });
        }
        root_lock.release();

        if !self.is_collectable() {
            error!(
                address = %self.address(),
                kind = %P::KIND,
                "unreferenced object still holds data, leaving it in place"
            );
            return Err(ObjectStoreError::NotEmpty(self.address().to_string()));
        }
        let address = self.address().to_string();
        self.remove(lock).await?;
        info!(address = %address, kind = %P::KIND, "removed orphaned object");
        Ok(GcOutcome::Removed)
    }
}
