//! Queue lookup, creation and removal through the root entry.

use std::sync::Arc;

use tracing::{debug, info};

use crate::archive_queue::{ArchiveJobToAdd, ArchiveQueue};
use crate::backend::ScopedLock;
use crate::object::StoredObject;
use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::queue_stats::{JobQueue, JobsSummary};
use crate::retrieve_queue::RetrieveQueue;
use crate::root_entry::{RootChild, RootEntry};

/// A queue can be removed between looking up its address and locking it.
const MAX_LOOKUP_ATTEMPTS: usize = 5;

impl ObjectStore {
    /// The tape pool's queue, locked exclusively and fetched.
    pub async fn get_or_create_archive_queue(
        &self,
        tapepool: &str,
    ) -> Result<(ScopedLock, StoredObject<ArchiveQueue>), ObjectStoreError> {
        self.get_or_create_child::<ArchiveQueue>(tapepool).await
    }

    /// The tape's queue, locked exclusively and fetched.
    pub async fn get_or_create_retrieve_queue(
        &self,
        vid: &str,
    ) -> Result<(ScopedLock, StoredObject<RetrieveQueue>), ObjectStoreError> {
        self.get_or_create_child::<RetrieveQueue>(vid).await
    }

    pub(crate) async fn get_or_create_child<P: RootChild>(
        &self,
        name: &str,
    ) -> Result<(ScopedLock, StoredObject<P>), ObjectStoreError> {
        for attempt in 0..MAX_LOOKUP_ATTEMPTS {
            let address = self.child_address_or_create::<P>(name).await?;
            let lock = self.backend.lock_exclusive(&address).await?;
            match StoredObject::<P>::fetch(Arc::clone(&self.backend), &lock).await {
                Ok(child) => return Ok((lock, child)),
                Err(e) if e.is_missing_object() => {
                    debug!(kind = %P::KIND, name = %name, address = %address, attempt, "object vanished after lookup, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(ObjectStoreError::NotFound(format!(
            "{} {} kept disappearing",
            P::KIND,
            name
        )))
    }

    /// Address of the named child of the root entry, creating it if needed.
    ///
    /// Creation runs with the root entry locked: the address goes into this
    /// agent's ownership list, the object is inserted owned by the agent,
    /// linked from the root entry, handed over to the root entry and finally
    /// dropped from the ownership list. A crash at any step leaves an object
    /// that garbage collection of this agent either re-links or deletes.
    async fn child_address_or_create<P: RootChild>(
        &self,
        name: &str,
    ) -> Result<String, ObjectStoreError> {
        let root_lock = self.backend.lock_exclusive(self.root_address()).await?;
        let mut root = StoredObject::<RootEntry>::fetch(Arc::clone(&self.backend), &root_lock).await?;
        if let Some(address) = P::lookup(&root, name) {
            return Ok(address.to_string());
        }

        let address = self.agent().next_id(&P::address_prefix(name));
        self.add_to_ownership(&address).await?;
        let mut child = StoredObject::initialize(
            Arc::clone(&self.backend),
            address.as_str(),
            self.agent_address(),
            P::create(name),
        );
        child.insert().await?;
        P::link(&mut root, name, &address)?;
        root.commit(&root_lock).await?;
        root_lock.release();

        let child_lock = self.backend.lock_exclusive(&address).await?;
        let mut child = StoredObject::<P>::fetch(Arc::clone(&self.backend), &child_lock).await?;
        child.set_owner(self.root_address());
        child.commit(&child_lock).await?;
        child_lock.release();
        self.remove_from_ownership(&address).await?;

        info!(kind = %P::KIND, name = %name, address = %address, "created object under root entry");
        Ok(address)
    }

    /// Delete the named child if it holds nothing. Returns false when there is
    /// no such child, and `NotEmpty` when it still has content.
    pub(crate) async fn remove_child_if_empty<P: RootChild>(
        &self,
        name: &str,
    ) -> Result<bool, ObjectStoreError> {
        let snapshot = self.fetch_root_entry().await?;
        let Some(address) = P::lookup(&snapshot, name).map(str::to_string) else {
            return Ok(false);
        };
        drop(snapshot);

        let lock = self.backend.lock_exclusive(&address).await?;
        let child = match StoredObject::<P>::fetch(Arc::clone(&self.backend), &lock).await {
            Ok(child) => child,
            Err(e) if e.is_missing_object() => return Ok(false),
            Err(e) => return Err(e),
        };
        if !child.is_collectable() {
            return Err(ObjectStoreError::NotEmpty(address));
        }

        let root_lock = self.backend.lock_exclusive(self.root_address()).await?;
        let mut root = StoredObject::<RootEntry>::fetch(Arc::clone(&self.backend), &root_lock).await?;
        if P::lookup(&root, name) == Some(address.as_str()) {
            P::unlink(&mut root, name)?;
            root.commit(&root_lock).await?;
        }
        root_lock.release();

        child.remove(&lock).await?;
        info!(kind = %P::KIND, name = %name, address = %address, "removed empty object");
        Ok(true)
    }

    pub async fn remove_archive_queue_if_empty(
        &self,
        tapepool: &str,
    ) -> Result<bool, ObjectStoreError> {
        self.remove_child_if_empty::<ArchiveQueue>(tapepool).await
    }

    pub async fn remove_retrieve_queue_if_empty(&self, vid: &str) -> Result<bool, ObjectStoreError> {
        self.remove_child_if_empty::<RetrieveQueue>(vid).await
    }

    /// Queue an archive job unless its request is already queued.
    pub async fn queue_archive_job(
        &self,
        tapepool: &str,
        job: ArchiveJobToAdd,
    ) -> Result<bool, ObjectStoreError> {
        let (lock, mut queue) = self.get_or_create_archive_queue(tapepool).await?;
        let request = job.request_address.clone();
        let added = queue.add_job_if_necessary(job);
        if added {
            queue.commit(&lock).await?;
            debug!(tapepool = %tapepool, request = %request, "queued archive job");
        }
        Ok(added)
    }

    /// Drop every entry for `request_address` from the tape pool's queue.
    pub async fn remove_archive_job(
        &self,
        tapepool: &str,
        request_address: &str,
    ) -> Result<usize, ObjectStoreError> {
        let root = self.fetch_root_entry().await?;
        let Some(address) = root.archive_queue_address(tapepool).map(str::to_string) else {
            return Ok(0);
        };
        let lock = self.backend.lock_exclusive(&address).await?;
        let mut queue = match StoredObject::<ArchiveQueue>::fetch(Arc::clone(&self.backend), &lock).await {
            Ok(queue) => queue,
            Err(e) if e.is_missing_object() => return Ok(0),
            Err(e) => return Err(e),
        };
        let removed = queue.remove_job(request_address);
        if removed > 0 {
            queue.commit(&lock).await?;
        }
        Ok(removed)
    }

    pub async fn archive_queue_summary(
        &self,
        tapepool: &str,
    ) -> Result<Option<JobsSummary>, ObjectStoreError> {
        self.child_summary::<ArchiveQueue, _>(tapepool, |q| q.get_jobs_summary())
            .await
    }

    pub async fn retrieve_queue_summary(
        &self,
        vid: &str,
    ) -> Result<Option<JobsSummary>, ObjectStoreError> {
        self.child_summary::<RetrieveQueue, _>(vid, |q| q.get_jobs_summary())
            .await
    }

    async fn child_summary<P, F>(
        &self,
        name: &str,
        summarize: F,
    ) -> Result<Option<JobsSummary>, ObjectStoreError>
    where
        P: RootChild,
        F: FnOnce(&P) -> Result<JobsSummary, ObjectStoreError>,
    {
        let root = self.fetch_root_entry().await?;
        let Some(address) = P::lookup(&root, name).map(str::to_string) else {
            return Ok(None);
        };
        let lock = self.backend.lock_shared(&address).await?;
        match StoredObject::<P>::fetch(Arc::clone(&self.backend), &lock).await {
            Ok(child) => summarize(child.payload()).map(Some),
            Err(e) if e.is_missing_object() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
