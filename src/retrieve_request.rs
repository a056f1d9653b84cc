//! Durable record of one file recall, with one job per tape copy.
//!
//! Only one copy is queued at a time (the active copy). Each job carries its
//! own retry counters; a failure either keeps the job retriable, possibly on
//! the same mount, or exhausts it.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::Serialize;

use crate::codec::{decode_retrieve_request, encode_retrieve_request, CodecError};
use crate::backend::ScopedLock;
use crate::object::{ObjectKind, ObjectPayload, StoredObject};
use crate::object_store::ObjectStoreError;
use crate::retrieve_queue::RetrieveJobToAdd;
use crate::retry::{retry_decision, RetryDecision, RetryLimits};
use crate::types::{RetrieveFileQueueCriteria, SchedulerRetrieveRequest};

/// Failure reasons kept per job; older ones are dropped.
pub const MAX_FAILURE_LOGS: usize = 10;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub enum RetrieveJobStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

impl RetrieveJobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RetrieveJobStatus::Complete | RetrieveJobStatus::Failed)
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub struct RetrieveJob {
    pub copy_nb: u32,
    pub status: RetrieveJobStatus,
    pub retries_within_mount: u32,
    pub max_retries_within_mount: u32,
    pub total_retries: u32,
    pub max_total_retries: u32,
    /// Mount on which the last failure happened; 0 before any failure.
    pub last_mount_with_failure: u64,
    pub failure_logs: Vec<String>,
}

/// Retry counters of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryStatus {
    pub retries_within_mount: u32,
    pub max_retries_within_mount: u32,
    pub total_retries: u32,
    pub max_total_retries: u32,
}

/// Outcome of `add_job_failure` across the whole request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobFailureTally {
    /// Status of the failed job after the failure was counted.
    pub job_status: RetrieveJobStatus,
    /// The failed job may be retried on the mount it just failed on.
    pub can_retry_in_same_mount: bool,
    /// Jobs still Pending or Running.
    pub retriable_jobs: u32,
    pub exhausted_jobs: u32,
    pub completed_jobs: u32,
}

impl JobFailureTally {
    /// No copy can ever satisfy the request any more.
    pub fn should_abandon(&self) -> bool {
        self.retriable_jobs == 0 && self.completed_jobs == 0
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub struct RetrieveRequest {
    scheduler_request: SchedulerRetrieveRequest,
    criteria: Option<RetrieveFileQueueCriteria>,
    jobs: Vec<RetrieveJob>,
    /// Copy currently queued or being recalled; 0 when none was chosen.
    active_copy_nb: u32,
}

impl RetrieveRequest {
    pub fn new(scheduler_request: SchedulerRetrieveRequest) -> Self {
        Self {
            scheduler_request,
            ..Default::default()
        }
    }

    pub fn set_scheduler_request(&mut self, request: SchedulerRetrieveRequest) {
        self.scheduler_request = request;
    }

    pub fn get_scheduler_request(&self) -> &SchedulerRetrieveRequest {
        &self.scheduler_request
    }

    pub fn archive_file_id(&self) -> u64 {
        self.scheduler_request.archive_file_id
    }

    /// Store the file's tape locations and create one job per tape copy.
    pub fn set_retrieve_file_queue_criteria(
        &mut self,
        criteria: RetrieveFileQueueCriteria,
        limits: &RetryLimits,
    ) -> Result<(), ObjectStoreError> {
        let mut jobs = Vec::with_capacity(criteria.archive_file.tape_files.len());
        for tape_file in &criteria.archive_file.tape_files {
            if tape_file.copy_nb == 0 || jobs.iter().any(|j: &RetrieveJob| j.copy_nb == tape_file.copy_nb) {
                return Err(ObjectStoreError::InvalidCopyNumber(tape_file.copy_nb));
            }
            jobs.push(new_job(
                tape_file.copy_nb,
                limits.max_retries_within_mount,
                limits.max_total_retries,
            ));
        }
        self.jobs = jobs;
        self.criteria = Some(criteria);
        Ok(())
    }

    pub fn get_retrieve_file_queue_criteria(
        &self,
    ) -> Result<&RetrieveFileQueueCriteria, ObjectStoreError> {
        self.criteria
            .as_ref()
            .ok_or(ObjectStoreError::MissingQueueCriteria)
    }

    pub fn add_job(
        &mut self,
        copy_nb: u32,
        max_retries_within_mount: u32,
        max_total_retries: u32,
    ) -> Result<(), ObjectStoreError> {
        if copy_nb == 0 || self.jobs.iter().any(|j| j.copy_nb == copy_nb) {
            return Err(ObjectStoreError::InvalidCopyNumber(copy_nb));
        }
        self.jobs
            .push(new_job(copy_nb, max_retries_within_mount, max_total_retries));
        Ok(())
    }

    pub fn get_job(&self, copy_nb: u32) -> Result<&RetrieveJob, ObjectStoreError> {
        self.jobs
            .iter()
            .find(|j| j.copy_nb == copy_nb)
            .ok_or(ObjectStoreError::NoSuchJob(copy_nb))
    }

    fn job_mut(&mut self, copy_nb: u32) -> Result<&mut RetrieveJob, ObjectStoreError> {
        self.jobs
            .iter_mut()
            .find(|j| j.copy_nb == copy_nb)
            .ok_or(ObjectStoreError::NoSuchJob(copy_nb))
    }

    pub fn get_jobs(&self) -> &[RetrieveJob] {
        &self.jobs
    }

    /// `(copy_nb, status)` for every job.
    pub fn dump_jobs(&self) -> Vec<(u32, RetrieveJobStatus)> {
        self.jobs.iter().map(|j| (j.copy_nb, j.status)).collect()
    }

    pub fn set_job_running(&mut self, copy_nb: u32) -> Result<(), ObjectStoreError> {
        let job = self.job_mut(copy_nb)?;
        if job.status != RetrieveJobStatus::Pending {
            return Err(ObjectStoreError::InvalidJobTransition {
                copy_nb,
                from: job.status,
                to: RetrieveJobStatus::Running,
            });
        }
        job.status = RetrieveJobStatus::Running;
        Ok(())
    }

    /// Mark the copy as recalled. Returns true when no job is left non-terminal.
    pub fn set_job_successful(&mut self, copy_nb: u32) -> Result<bool, ObjectStoreError> {
        let job = self.job_mut(copy_nb)?;
        if job.status.is_terminal() {
            return Err(ObjectStoreError::InvalidJobTransition {
                copy_nb,
                from: job.status,
                to: RetrieveJobStatus::Complete,
            });
        }
        job.status = RetrieveJobStatus::Complete;
        Ok(self.all_jobs_terminal())
    }

    pub fn add_job_failure(
        &mut self,
        copy_nb: u32,
        mount_id: u64,
        reason: &str,
    ) -> Result<JobFailureTally, ObjectStoreError> {
        let job = self.job_mut(copy_nb)?;
        if job.status.is_terminal() {
            return Err(ObjectStoreError::InvalidJobTransition {
                copy_nb,
                from: job.status,
                to: RetrieveJobStatus::Failed,
            });
        }
        if job.last_mount_with_failure == mount_id {
            job.retries_within_mount += 1;
        } else {
            job.retries_within_mount = 1;
            job.last_mount_with_failure = mount_id;
        }
        job.total_retries += 1;
        job.failure_logs.push(reason.to_string());
        if job.failure_logs.len() > MAX_FAILURE_LOGS {
            job.failure_logs.remove(0);
        }
        let decision = retry_decision(
            job.retries_within_mount,
            job.max_retries_within_mount,
            job.total_retries,
            job.max_total_retries,
        );
        job.status = match decision {
            RetryDecision::Exhausted => RetrieveJobStatus::Failed,
            RetryDecision::SameMount | RetryDecision::NextMount => RetrieveJobStatus::Pending,
        };
        let job_status = job.status;

        let mut tally = JobFailureTally {
            job_status,
            can_retry_in_same_mount: decision == RetryDecision::SameMount,
            retriable_jobs: 0,
            exhausted_jobs: 0,
            completed_jobs: 0,
        };
        for j in &self.jobs {
            match j.status {
                RetrieveJobStatus::Pending | RetrieveJobStatus::Running => {
                    tally.retriable_jobs += 1
                }
                RetrieveJobStatus::Failed => tally.exhausted_jobs += 1,
                RetrieveJobStatus::Complete => tally.completed_jobs += 1,
            }
        }
        Ok(tally)
    }

    /// Give a failed job a fresh retry budget. Only an operator does this.
    pub fn requeue_failed_job(&mut self, copy_nb: u32) -> Result<(), ObjectStoreError> {
        let job = self.job_mut(copy_nb)?;
        if job.status != RetrieveJobStatus::Failed {
            return Err(ObjectStoreError::InvalidJobTransition {
                copy_nb,
                from: job.status,
                to: RetrieveJobStatus::Pending,
            });
        }
        job.status = RetrieveJobStatus::Pending;
        job.retries_within_mount = 0;
        job.total_retries = 0;
        job.last_mount_with_failure = 0;
        Ok(())
    }

    /// Put a job that was running on a lost mount back to Pending.
    pub(crate) fn reset_running_job(&mut self, copy_nb: u32) -> Result<(), ObjectStoreError> {
        let job = self.job_mut(copy_nb)?;
        if job.status == RetrieveJobStatus::Running {
            job.status = RetrieveJobStatus::Pending;
        }
        Ok(())
    }

    pub fn get_retry_status(&self, copy_nb: u32) -> Result<RetryStatus, ObjectStoreError> {
        let job = self.get_job(copy_nb)?;
        Ok(RetryStatus {
            retries_within_mount: job.retries_within_mount,
            max_retries_within_mount: job.max_retries_within_mount,
            total_retries: job.total_retries,
            max_total_retries: job.max_total_retries,
        })
    }

    pub fn set_active_copy_number(&mut self, copy_nb: u32) -> Result<(), ObjectStoreError> {
        self.get_job(copy_nb)?;
        self.active_copy_nb = copy_nb;
        Ok(())
    }

    pub fn get_active_copy_number(&self) -> u32 {
        self.active_copy_nb
    }

    /// Every job has failed for good.
    pub fn is_failed(&self) -> bool {
        !self.jobs.is_empty()
            && self
                .jobs
                .iter()
                .all(|j| j.status == RetrieveJobStatus::Failed)
    }

    pub fn is_satisfied(&self) -> bool {
        self.jobs
            .iter()
            .any(|j| j.status == RetrieveJobStatus::Complete)
    }

    pub fn all_jobs_terminal(&self) -> bool {
        self.jobs.iter().all(|j| j.status.is_terminal())
    }

    /// Non-terminal copy to queue next: the active copy if still usable,
    /// otherwise the lowest copy number that is.
    pub fn next_copy_to_queue(&self) -> Option<u32> {
        let usable = |j: &&RetrieveJob| !j.status.is_terminal();
        self.jobs
            .iter()
            .filter(usable)
            .find(|j| j.copy_nb == self.active_copy_nb)
            .or_else(|| self.jobs.iter().filter(usable).min_by_key(|j| j.copy_nb))
            .map(|j| j.copy_nb)
    }

    /// Next copy after a failure on `failed_copy_nb`: the same copy if it may
    /// still retry on that mount, else another usable copy, else the same copy
    /// on a later mount.
    pub fn copy_to_requeue_after_failure(
        &self,
        failed_copy_nb: u32,
        tally: &JobFailureTally,
    ) -> Option<u32> {
        if tally.can_retry_in_same_mount {
            return Some(failed_copy_nb);
        }
        self.jobs
            .iter()
            .filter(|j| j.copy_nb != failed_copy_nb && j.status == RetrieveJobStatus::Pending)
            .min_by_key(|j| j.copy_nb)
            .map(|j| j.copy_nb)
            .or_else(|| (tally.job_status == RetrieveJobStatus::Pending).then_some(failed_copy_nb))
    }

    /// Queue entry for `copy_nb`, with the VID of the tape holding it.
    pub fn job_to_queue(
        &self,
        request_address: &str,
        copy_nb: u32,
        start_time: i64,
    ) -> Result<(String, RetrieveJobToAdd), ObjectStoreError> {
        self.get_job(copy_nb)?;
        let criteria = self.get_retrieve_file_queue_criteria()?;
        let tape_file = criteria
            .archive_file
            .tape_file(copy_nb)
            .ok_or(ObjectStoreError::NoSuchJob(copy_nb))?;
        Ok((
            tape_file.vid.clone(),
            RetrieveJobToAdd {
                request_address: request_address.to_string(),
                archive_file_id: criteria.archive_file.archive_file_id,
                copy_nb,
                fseq: tape_file.fseq,
                size: criteria.archive_file.file_size,
                mount_policy: criteria.mount_policy.clone(),
                start_time,
            },
        ))
    }

    /// The request may be deleted: a copy was recalled or none ever can be.
    pub fn check_finishable(&self) -> Result<(), ObjectStoreError> {
        if self.is_satisfied() || self.all_jobs_terminal() {
            Ok(())
        } else {
            Err(ObjectStoreError::RequestNotFinished)
        }
    }
}

impl StoredObject<RetrieveRequest> {
    /// Delete a request that needs no further work.
    pub async fn finish(self, lock: &ScopedLock) -> Result<(), ObjectStoreError> {
        self.check_finishable()?;
        self.remove(lock).await
    }
}

fn new_job(copy_nb: u32, max_retries_within_mount: u32, max_total_retries: u32) -> RetrieveJob {
    RetrieveJob {
        copy_nb,
        status: RetrieveJobStatus::Pending,
        retries_within_mount: 0,
        max_retries_within_mount,
        total_retries: 0,
        max_total_retries,
        last_mount_with_failure: 0,
        failure_logs: Vec::new(),
    }
}

impl ObjectPayload for RetrieveRequest {
    const KIND: ObjectKind = ObjectKind::RetrieveRequest;

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_retrieve_request(self)
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        decode_retrieve_request(bytes)
    }
}
