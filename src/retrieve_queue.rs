//! Pending retrieve jobs of one tape, identified by its VID.

use std::collections::HashSet;

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::Serialize;

use crate::codec::{decode_retrieve_queue, encode_retrieve_queue, CodecError};
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
pub struct RetrieveJobEntry {
    /// Address of the owning retrieve request.
    pub address: String,
    pub archive_file_id: u64,
    pub copy_nb: u32,
    /// Position of the file on the tape.
    pub fseq: u64,
    pub size: u64,
    pub start_time: i64,
    pub policy: CountedPolicy,
}

impl QueuedJob for RetrieveJobEntry {
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

#[derive(Debug, Clone)]
pub struct RetrieveJobToAdd {
    pub request_address: String,
    pub archive_file_id: u64,
    pub copy_nb: u32,
    pub fseq: u64,
    pub size: u64,
    pub mount_policy: MountPolicy,
    pub start_time: i64,
}

impl JobToAdd for RetrieveJobToAdd {
    type Entry = RetrieveJobEntry;

    fn request_address(&self) -> &str {
        &self.request_address
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn into_entry(self) -> RetrieveJobEntry {
        RetrieveJobEntry {
            policy: CountedPolicy {
                name: self.mount_policy.name,
                priority: self.mount_policy.retrieve_priority,
                min_request_age: self.mount_policy.retrieve_min_request_age,
                max_drives_allowed: self.mount_policy.max_drives_allowed,
            },
            address: self.request_address,
            archive_file_id: self.archive_file_id,
            copy_nb: self.copy_nb,
            fseq: self.fseq,
            size: self.size,
            start_time: self.start_time,
        }
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub struct RetrieveQueue {
    vid: String,
    jobs: Vec<RetrieveJobEntry>,
    aggregates: QueueAggregates,
}

impl RetrieveQueue {
    pub fn initialize(vid: impl Into<String>) -> Self {
        Self {
            vid: vid.into(),
            ..Default::default()
        }
    }

    pub fn vid(&self) -> &str {
        &self.vid
    }

    /// Candidates in tape order (ascending fseq).
    pub fn get_candidate_list(
        &self,
        max_bytes: u64,
        max_files: u64,
        skip: &HashSet<String>,
    ) -> CandidateJobList<RetrieveJobEntry> {
        let mut ordered: Vec<&RetrieveJobEntry> = self.jobs.iter().collect();
        ordered.sort_by_key(|j| j.fseq);
        select_candidates(
            ordered,
            self.aggregates.total_size,
            self.jobs.len() as u64,
            max_bytes,
            max_files,
            skip,
        )
    }

    /// Distinct mount policy names of the queued jobs, sorted.
    pub fn get_mount_policy_names(&self) -> Vec<String> {
        self.aggregates
            .mount_policy_name_map
            .get_map()
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl JobQueue for RetrieveQueue {
    type Job = RetrieveJobEntry;
    type ToAdd = RetrieveJobToAdd;

    fn queue_name(&self) -> &str {
        &self.vid
    }

    fn jobs(&self) -> &[RetrieveJobEntry] {
        &self.jobs
    }

    fn aggregates(&self) -> &QueueAggregates {
        &self.aggregates
    }

    fn jobs_and_aggregates_mut(&mut self) -> (&mut Vec<RetrieveJobEntry>, &mut QueueAggregates) {
        (&mut self.jobs, &mut self.aggregates)
    }
}

impl ObjectPayload for RetrieveQueue {
    const KIND: ObjectKind = ObjectKind::RetrieveQueue;

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_retrieve_queue(self)
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        decode_retrieve_queue(bytes)
    }

    fn prepare_for_commit(&mut self) {
        self.repair_aggregates();
    }
}
