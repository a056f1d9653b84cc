//! Retrieve request lifecycle: queueing, dispatch to a mount, and the
//! success and failure reports that follow.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::ScopedLock;
use crate::keys::retrieve_request_prefix;
use crate::object::StoredObject;
use crate::object_store::helpers::now_epoch_ms;
use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::queue_stats::JobQueue;
use crate::retrieve_queue::{RetrieveJobEntry, RetrieveQueue};
use crate::retrieve_request::{JobFailureTally, RetrieveRequest};
use crate::types::{RetrieveFileQueueCriteria, SchedulerRetrieveRequest};

/// Where a retrieve request ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRetrieve {
    pub request_address: String,
    pub vid: String,
    pub copy_nb: u32,
    pub queue_address: String,
}

/// What dispatch did with one queue entry.
enum Dispatch {
    Taken,
    Dropped,
}

impl ObjectStore {
    /// Create a retrieve request and queue its first copy on that tape's queue.
    pub async fn queue_retrieve_request(
        &self,
        scheduler_request: SchedulerRetrieveRequest,
        criteria: RetrieveFileQueueCriteria,
    ) -> Result<QueuedRetrieve, ObjectStoreError> {
        let mut payload = RetrieveRequest::new(scheduler_request);
        payload.set_retrieve_file_queue_criteria(criteria, &self.options().retry_limits)?;
        let copy_nb = payload.next_copy_to_queue().ok_or_else(|| {
            ObjectStoreError::NotFound(format!(
                "tape copy for archive file {}",
                payload.archive_file_id()
            ))
        })?;
        payload.set_active_copy_number(copy_nb)?;

        let address = self
            .agent()
            .next_id(&retrieve_request_prefix(payload.archive_file_id()));
        self.add_to_ownership(&address).await?;
        let mut request = StoredObject::initialize(
            Arc::clone(&self.backend),
            address.as_str(),
            self.agent_address(),
            payload,
        );
        request.insert().await?;

        let lock = self.backend.lock_exclusive(&address).await?;
        let mut request = StoredObject::<RetrieveRequest>::fetch(Arc::clone(&self.backend), &lock).await?;
        let (vid, queue_address) = self.requeue_request_copy(&mut request, &lock, copy_nb).await?;
        lock.release();
        self.remove_from_ownership(&address).await?;

        info!(request = %address, vid = %vid, copy_nb, "queued retrieve request");
        Ok(QueuedRetrieve {
            request_address: address,
            vid,
            copy_nb,
            queue_address,
        })
    }

    /// Put `copy_nb` of a locked request on its tape's queue and hand the
    /// request over to that queue. Returns the VID and queue address.
    pub(crate) async fn requeue_request_copy(
        &self,
        request: &mut StoredObject<RetrieveRequest>,
        lock: &ScopedLock,
        copy_nb: u32,
    ) -> Result<(String, String), ObjectStoreError> {
        request.reset_running_job(copy_nb)?;
        let (vid, job) = request.job_to_queue(lock.address(), copy_nb, now_epoch_ms())?;
        let (queue_lock, mut queue) = self.get_or_create_retrieve_queue(&vid).await?;
        if queue.add_job_if_necessary(job) {
            queue.commit(&queue_lock).await?;
        }
        let queue_address = queue.address().to_string();
        queue_lock.release();

        request.set_active_copy_number(copy_nb)?;
        request.set_owner(queue_address.as_str());
        request.commit(lock).await?;
        Ok((vid, queue_address))
    }

    /// Take jobs off a tape's queue for a mount, in tape order. The requests
    /// become Running and owned by this agent until their outcome is reported.
    /// A request that cannot be locked or fetched ends the sweep; the jobs
    /// taken before it are still returned, and the error only surfaces when
    /// nothing was taken.
    pub async fn dispatch_retrieve_jobs(
        &self,
        vid: &str,
        max_bytes: u64,
        max_files: u64,
    ) -> Result<Vec<RetrieveJobEntry>, ObjectStoreError> {
        let root = self.fetch_root_entry().await?;
        let Some(queue_address) = root.retrieve_queue_address(vid).map(str::to_string) else {
            return Ok(Vec::new());
        };
        drop(root);

        let queue_lock = self.backend.lock_exclusive(&queue_address).await?;
        let mut queue =
            match StoredObject::<RetrieveQueue>::fetch(Arc::clone(&self.backend), &queue_lock).await {
                Ok(queue) => queue,
                Err(e) if e.is_missing_object() => return Ok(Vec::new()),
                Err(e) => return Err(e),
            };
        let candidates = queue.get_candidate_list(max_bytes, max_files, &HashSet::new());

        let mut dispatched = Vec::with_capacity(candidates.candidates.len());
        let mut failure = None;
        for job in candidates.candidates {
            match self.dispatch_one(vid, &queue_address, &job).await {
                Ok(Dispatch::Taken) => {
                    queue.remove_job(&job.address);
                    dispatched.push(job);
                }
                Ok(Dispatch::Dropped) => {
                    queue.remove_job(&job.address);
                }
                Err(e) => {
                    warn!(vid = %vid, request = %job.address, error = %e, "stopping retrieve dispatch");
                    failure = Some(e);
                    break;
                }
            }
        }
        queue.commit(&queue_lock).await?;
        queue_lock.release();
        match failure {
            Some(e) if dispatched.is_empty() => Err(e),
            _ => {
                debug!(vid = %vid, jobs = dispatched.len(), "dispatched retrieve jobs");
                Ok(dispatched)
            }
        }
    }

    /// Move one queued request to this agent. Entries that can never run are
    /// reported as dropped; an error leaves the request as it was.
    async fn dispatch_one(
        &self,
        vid: &str,
        queue_address: &str,
        job: &RetrieveJobEntry,
    ) -> Result<Dispatch, ObjectStoreError> {
        self.add_to_ownership(&job.address).await?;
        let request_lock = match self.backend.lock_exclusive(&job.address).await {
            Ok(lock) => lock,
            Err(e) => {
                self.forget_intent(&job.address).await;
                return Err(e.into());
            }
        };
        let mut request = match StoredObject::<RetrieveRequest>::fetch(
            Arc::clone(&self.backend),
            &request_lock,
        )
        .await
        {
            Ok(request) => request,
            Err(e) if e.is_missing_object() => {
                warn!(vid = %vid, request = %job.address, "dropping queue entry of vanished retrieve request");
                self.remove_from_ownership(&job.address).await?;
                return Ok(Dispatch::Dropped);
            }
            Err(e @ ObjectStoreError::WrongObjectKind { .. }) => {
                warn!(vid = %vid, request = %job.address, error = %e, "dropping queue entry that is not a retrieve request");
                self.remove_from_ownership(&job.address).await?;
                return Ok(Dispatch::Dropped);
            }
            Err(e) => {
                request_lock.release();
                self.forget_intent(&job.address).await;
                return Err(e);
            }
        };
        if request.owner() != queue_address {
            warn!(vid = %vid, request = %job.address, owner = %request.owner(), "dropping queue entry of request owned elsewhere");
            // a request this agent already holds stays on its ownership list
            if request.owner() != self.agent_address() {
                self.remove_from_ownership(&job.address).await?;
            }
            return Ok(Dispatch::Dropped);
        }
        if let Err(e) = request.set_job_running(job.copy_nb) {
            warn!(vid = %vid, request = %job.address, error = %e, "dropping queue entry that cannot run");
            self.remove_from_ownership(&job.address).await?;
            return Ok(Dispatch::Dropped);
        }
        request.set_owner(self.agent_address());
        request.commit(&request_lock).await?;
        Ok(Dispatch::Taken)
    }

    /// Drop an ownership intent after a failed hand-over, keeping the first error.
    async fn forget_intent(&self, address: &str) {
        if let Err(e) = self.remove_from_ownership(address).await {
            warn!(request = %address, error = %e, "could not drop ownership intent");
        }
    }

    /// Count a failed recall attempt and requeue or abandon the request.
    pub async fn report_retrieve_job_failure(
        &self,
        request_address: &str,
        copy_nb: u32,
        mount_id: u64,
        reason: &str,
    ) -> Result<JobFailureTally, ObjectStoreError> {
        let lock = self.backend.lock_exclusive(request_address).await?;
        let mut request = StoredObject::<RetrieveRequest>::fetch(Arc::clone(&self.backend), &lock).await?;
        let tally = request.add_job_failure(copy_nb, mount_id, reason)?;

        if tally.should_abandon() {
            warn!(request = %request_address, copy_nb, reason = %reason, "every copy exhausted its retries, abandoning retrieve request");
            request.finish(&lock).await?;
        } else {
            match request.copy_to_requeue_after_failure(copy_nb, &tally) {
                Some(next) => {
                    let (vid, _) = self.requeue_request_copy(&mut request, &lock, next).await?;
                    info!(request = %request_address, failed_copy = copy_nb, copy_nb = next, vid = %vid, "requeued retrieve request after failure");
                }
                None if request.is_satisfied() => request.finish(&lock).await?,
                None => request.commit(&lock).await?,
            }
        }
        lock.release();
        self.remove_from_ownership(request_address).await?;
        Ok(tally)
    }

    /// Record a recalled copy and delete the request. Returns whether it was
    /// the last non-terminal job.
    pub async fn report_retrieve_job_success(
        &self,
        request_address: &str,
        copy_nb: u32,
    ) -> Result<bool, ObjectStoreError> {
        let lock = self.backend.lock_exclusive(request_address).await?;
        let mut request = StoredObject::<RetrieveRequest>::fetch(Arc::clone(&self.backend), &lock).await?;
        let last = request.set_job_successful(copy_nb)?;
        request.finish(&lock).await?;
        lock.release();
        self.remove_from_ownership(request_address).await?;
        info!(request = %request_address, copy_nb, "retrieve request complete");
        Ok(last)
    }
}
