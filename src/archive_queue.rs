//! Pending archive jobs of one tape pool.

use std::collections::HashSet;

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::Serialize;

use crate::codec::{decode_archive_queue, encode_archive_queue, CodecError};
use crate::object::{ObjectKind, ObjectPayload};
use crate::queue_stats::{
    select_candidates, CandidateJobList, CountedPolicy, JobQueue, JobToAdd, QueueAggregates,
    QueuedJob,
};
use crate::types::MountPolicy;

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub struct ArchiveJobEntry {
    /// Address of the owning archive request.
    pub address: String,
    pub archive_file_id: u64,
    pub copy_nb: u32,
    pub size: u64,
    /// Epoch ms at which the request was queued.
    pub start_time: i64,
    pub policy: CountedPolicy,
}

impl QueuedJob for ArchiveJobEntry {
    fn address(&self) -> &str {
        &self.address
    }
    fn size(&self) -> u64 {
        self.size
    }
    fn start_time(&self) -> i64 {
        self.start_time
    }
    fn policy(&self) -> &CountedPolicy {
        &self.policy
    }
}

/// Arguments of `ArchiveQueue::add_job`.
#[derive(Debug, Clone)]
pub struct ArchiveJobToAdd {
    pub request_address: String,
    pub archive_file_id: u64,
    pub copy_nb: u32,
    pub size: u64,
    pub mount_policy: MountPolicy,
    pub start_time: i64,
}

impl JobToAdd for ArchiveJobToAdd {
    type Entry = ArchiveJobEntry;

    fn request_address(&self) -> &str {
        &self.request_address
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn into_entry(self) -> ArchiveJobEntry {
        ArchiveJobEntry {
            policy: CountedPolicy {
                name: self.mount_policy.name,
                priority: self.mount_policy.archive_priority,
                min_request_age: self.mount_policy.archive_min_request_age,
                max_drives_allowed: self.mount_policy.max_drives_allowed,
            },
            address: self.request_address,
            archive_file_id: self.archive_file_id,
            copy_nb: self.copy_nb,
            size: self.size,
            start_time: self.start_time,
        }
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub struct ArchiveQueue {
    tapepool: String,
    jobs: Vec<ArchiveJobEntry>,
    /// Requests whose namespace entry is still being created.
    orphaned_pending_ns_creation: Vec<String>,
    /// Requests whose namespace entry is being deleted.
    orphaned_pending_ns_deletion: Vec<String>,
    aggregates: QueueAggregates,
}

impl ArchiveQueue {
    pub fn initialize(tapepool: impl Into<String>) -> Self {
        Self {
            tapepool: tapepool.into(),
            ..Default::default()
        }
    }

    pub fn tapepool(&self) -> &str {
        &self.tapepool
    }

    /// Oldest first, stopping once `max_bytes` or `max_files` is reached.
    pub fn get_candidate_list(
        &self,
        max_bytes: u64,
        max_files: u64,
        skip: &HashSet<String>,
    ) -> CandidateJobList<ArchiveJobEntry> {
        let mut ordered: Vec<&ArchiveJobEntry> = self.jobs.iter().collect();
        ordered.sort_by_key(|j| j.start_time);
        select_candidates(
            ordered,
            self.aggregates.total_size,
            self.jobs.len() as u64,
            max_bytes,
            max_files,
            skip,
        )
    }

    pub fn add_orphaned_job_pending_ns_creation(&mut self, address: impl Into<String>) {
        let address = address.into();
        if !self.orphaned_pending_ns_creation.contains(&address) {
            self.orphaned_pending_ns_creation.push(address);
        }
    }

    pub fn remove_orphaned_job_pending_ns_creation(&mut self, address: &str) -> bool {
        remove_address(&mut self.orphaned_pending_ns_creation, address)
    }

    pub fn add_orphaned_job_pending_ns_deletion(&mut self, address: impl Into<String>) {
        let address = address.into();
        if !self.orphaned_pending_ns_deletion.contains(&address) {
            self.orphaned_pending_ns_deletion.push(address);
        }
    }

    pub fn remove_orphaned_job_pending_ns_deletion(&mut self, address: &str) -> bool {
        remove_address(&mut self.orphaned_pending_ns_deletion, address)
    }

    /// No jobs and no orphaned requests waiting on the namespace.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
            && self.orphaned_pending_ns_creation.is_empty()
            && self.orphaned_pending_ns_deletion.is_empty()
    }
}

impl JobQueue for ArchiveQueue {
    type Job = ArchiveJobEntry;
    type ToAdd = ArchiveJobToAdd;

    fn queue_name(&self) -> &str {
        &self.tapepool
    }

    fn jobs(&self) -> &[ArchiveJobEntry] {
        &self.jobs
    }

    fn aggregates(&self) -> &QueueAggregates {
        &self.aggregates
    }

    fn jobs_and_aggregates_mut(&mut self) -> (&mut Vec<ArchiveJobEntry>, &mut QueueAggregates) {
        (&mut self.jobs, &mut self.aggregates)
    }
}

fn remove_address(list: &mut Vec<String>, address: &str) -> bool {
    match list.iter().position(|a| a == address) {
        Some(idx) => {
            list.swap_remove(idx);
            true
        }
        None => false,
    }
}

impl ObjectPayload for ArchiveQueue {
    const KIND: ObjectKind = ObjectKind::ArchiveQueue;

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_archive_queue(self)
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        decode_archive_queue(bytes)
    }

    fn prepare_for_commit(&mut self) {
        self.repair_aggregates();
    }
}
