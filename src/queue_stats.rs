//! Aggregates shared by archive and retrieve queues.

use std::collections::HashSet;

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::Serialize;
use tracing::warn;

use crate::object_store::ObjectStoreError;
use crate::value_count_map::{ValueCountMapString, ValueCountMapU64};

/// The mount policy values a job contributed to its queue's maps. Stored with
/// the job so removal decrements exactly what insertion incremented.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub struct CountedPolicy {
    pub name: String,
    pub priority: u64,
    pub min_request_age: u64,
    pub max_drives_allowed: u64,
}

/// A job summary held by a queue.
pub trait QueuedJob {
    fn address(&self) -> &str;
    fn size(&self) -> u64;
    fn start_time(&self) -> i64;
    fn policy(&self) -> &CountedPolicy;
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub struct QueueAggregates {
    pub total_size: u64,
    /// Epoch ms; 0 while the queue is empty.
    pub oldest_job_creation_time: i64,
    pub youngest_job_creation_time: i64,
    pub max_drives_allowed_map: ValueCountMapU64,
    pub priority_map: ValueCountMapU64,
    pub min_request_age_map: ValueCountMapU64,
    pub mount_policy_name_map: ValueCountMapString,
    /// How many times the maps had to be recomputed from the job list.
    pub maps_rebuild_count: u64,
}

impl QueueAggregates {
    pub(crate) fn count_added(
        &mut self,
        was_empty: bool,
        size: u64,
        start_time: i64,
        policy: &CountedPolicy,
    ) {
        self.total_size += size;
        if was_empty {
            self.oldest_job_creation_time = start_time;
            self.youngest_job_creation_time = start_time;
        } else {
            self.oldest_job_creation_time = self.oldest_job_creation_time.min(start_time);
            self.youngest_job_creation_time = self.youngest_job_creation_time.max(start_time);
        }
        self.max_drives_allowed_map.inc_count(policy.max_drives_allowed);
        self.priority_map.inc_count(policy.priority);
        self.min_request_age_map.inc_count(policy.min_request_age);
        self.mount_policy_name_map.inc_count(policy.name.as_str());
    }

    pub(crate) fn count_removed(
        &mut self,
        size: u64,
        policy: &CountedPolicy,
    ) -> Result<(), ObjectStoreError> {
        self.total_size = self.total_size.saturating_sub(size);
        self.max_drives_allowed_map.dec_count(policy.max_drives_allowed)?;
        self.priority_map.dec_count(policy.priority)?;
        self.min_request_age_map.dec_count(policy.min_request_age)?;
        self.mount_policy_name_map.dec_count(policy.name.as_str())?;
        Ok(())
    }

    pub(crate) fn recompute_times<J: QueuedJob>(&mut self, jobs: &[J]) {
        self.oldest_job_creation_time = jobs.iter().map(|j| j.start_time()).min().unwrap_or(0);
        self.youngest_job_creation_time = jobs.iter().map(|j| j.start_time()).max().unwrap_or(0);
    }

    fn recomputed<J: QueuedJob>(jobs: &[J]) -> Self {
        let mut fresh = Self::default();
        for (i, job) in jobs.iter().enumerate() {
            fresh.count_added(i == 0, job.size(), job.start_time(), job.policy());
        }
        fresh
    }

    /// Whether every aggregate matches what `jobs` would produce.
    pub(crate) fn is_coherent<J: QueuedJob>(&self, jobs: &[J]) -> bool {
        let fresh = Self::recomputed(jobs);
        self.total_size == fresh.total_size
            && self.oldest_job_creation_time == fresh.oldest_job_creation_time
            && self.youngest_job_creation_time == fresh.youngest_job_creation_time
            && self.max_drives_allowed_map.get_map() == fresh.max_drives_allowed_map.get_map()
            && self.priority_map.get_map() == fresh.priority_map.get_map()
            && self.min_request_age_map.get_map() == fresh.min_request_age_map.get_map()
            && self.mount_policy_name_map.get_map() == fresh.mount_policy_name_map.get_map()
    }

    /// Cheap commit-time check: every map counts each job exactly once and an
    /// empty queue holds no bytes. Drift inside a map needs `is_coherent`.
    pub(crate) fn counts_match(&self, jobs: usize) -> bool {
        let jobs = jobs as u64;
        self.max_drives_allowed_map.total() == jobs
            && self.priority_map.total() == jobs
            && self.min_request_age_map.total() == jobs
            && self.mount_policy_name_map.total() == jobs
            && (jobs > 0 || self.total_size == 0)
    }

    pub(crate) fn rebuild<J: QueuedJob>(&mut self, jobs: &[J]) {
        let rebuilds = self.maps_rebuild_count + 1;
        *self = Self::recomputed(jobs);
        self.maps_rebuild_count = rebuilds;
    }

    pub(crate) fn summary(&self, files: u64) -> Result<JobsSummary, ObjectStoreError> {
        if files == 0 {
            return Ok(JobsSummary::default());
        }
        Ok(JobsSummary {
            files,
            bytes: self.total_size,
            oldest_job_start_time: self.oldest_job_creation_time,
            youngest_job_start_time: self.youngest_job_creation_time,
            max_drives_allowed: self.max_drives_allowed_map.max_value()?,
            priority: self.priority_map.max_value()?,
            min_request_age: self.min_request_age_map.min_value()?,
            mount_policy_counts: self.mount_policy_name_map.get_map(),
        })
    }
}

/// Arguments for queueing one job.
pub trait JobToAdd {
    type Entry: QueuedJob;

    fn request_address(&self) -> &str;
    fn size(&self) -> u64;
    fn into_entry(self) -> Self::Entry;
}

/// Job list and aggregates shared by archive and retrieve queues. Implementors
/// expose their storage; the bookkeeping lives here.
pub trait JobQueue {
    type Job: QueuedJob;
    type ToAdd: JobToAdd<Entry = Self::Job>;

    /// Tape pool or VID, used in logs.
    fn queue_name(&self) -> &str;
    fn jobs(&self) -> &[Self::Job];
    fn aggregates(&self) -> &QueueAggregates;
    fn jobs_and_aggregates_mut(&mut self) -> (&mut Vec<Self::Job>, &mut QueueAggregates);

    /// Append a job unconditionally. Adding the same request twice counts it twice.
    fn add_job(&mut self, job: Self::ToAdd) {
        let entry = job.into_entry();
        let (jobs, aggregates) = self.jobs_and_aggregates_mut();
        aggregates.count_added(jobs.is_empty(), entry.size(), entry.start_time(), entry.policy());
        jobs.push(entry);
    }

    /// Add the job unless its request is already queued. Returns whether it was added.
    fn add_job_if_necessary(&mut self, job: Self::ToAdd) -> bool {
        if self
            .jobs()
            .iter()
            .any(|j| j.address() == job.request_address())
        {
            return false;
        }
        self.add_job(job);
        true
    }

    fn add_jobs_if_necessary(
        &mut self,
        jobs: impl IntoIterator<Item = Self::ToAdd>,
    ) -> AdditionSummary
    where
        Self: Sized,
    {
        let mut summary = AdditionSummary::default();
        for job in jobs {
            let size = job.size();
            if self.add_job_if_necessary(job) {
                summary.files += 1;
                summary.bytes += size;
            }
        }
        summary
    }

    /// Drop every entry for `request_address` and return how many were dropped.
    fn remove_job(&mut self, request_address: &str) -> usize {
        let name = self.queue_name().to_string();
        let (jobs, aggregates) = self.jobs_and_aggregates_mut();
        let mut removed = 0;
        let mut incoherent = false;
        let mut i = 0;
        while i < jobs.len() {
            if jobs[i].address() != request_address {
                i += 1;
                continue;
            }
            let job = jobs.swap_remove(i);
            if let Err(e) = aggregates.count_removed(job.size(), job.policy()) {
                warn!(queue = %name, job = %job.address(), error = %e, "queue maps out of step with jobs");
                incoherent = true;
            }
            removed += 1;
        }
        if incoherent {
            aggregates.rebuild(jobs.as_slice());
        } else if removed > 0 {
            aggregates.recompute_times(jobs.as_slice());
        }
        removed
    }

    fn remove_jobs<'a>(&mut self, addresses: impl IntoIterator<Item = &'a str>) -> usize
    where
        Self: Sized,
    {
        addresses.into_iter().map(|a| self.remove_job(a)).sum()
    }

    fn get_jobs_summary(&self) -> Result<JobsSummary, ObjectStoreError> {
        self.aggregates().summary(self.jobs().len() as u64)
    }

    fn jobs_count(&self) -> usize {
        self.jobs().len()
    }

    fn dump_jobs(&self) -> &[Self::Job] {
        self.jobs()
    }

    fn get_candidate_summary(&self) -> CandidateSummary {
        CandidateSummary {
            candidate_files: self.jobs().len() as u64,
            candidate_bytes: self.aggregates().total_size,
        }
    }

    /// Full recomputation compared field by field.
    fn check_aggregates_coherency(&self) -> bool {
        self.aggregates().is_coherent(self.jobs())
    }

    fn rebuild(&mut self) {
        let (jobs, aggregates) = self.jobs_and_aggregates_mut();
        aggregates.rebuild(jobs.as_slice());
    }

    /// Rebuild the aggregates before a commit if their counts disagree with
    /// the job list.
    fn repair_aggregates(&mut self) {
        let aggregates = self.aggregates();
        if aggregates.counts_match(self.jobs().len()) {
            return;
        }
        warn!(queue = %self.queue_name(), rebuilds = aggregates.maps_rebuild_count + 1, "rebuilding queue aggregates before commit");
        self.rebuild();
    }
}

/// Scheduling view of a queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobsSummary {
    pub files: u64,
    pub bytes: u64,
    pub oldest_job_start_time: i64,
    pub youngest_job_start_time: i64,
    /// Highest `max_drives_allowed` among queued jobs.
    pub max_drives_allowed: u64,
    /// Highest priority among queued jobs.
    pub priority: u64,
    /// Smallest minimum request age among queued jobs.
    pub min_request_age: u64,
    pub mount_policy_counts: Vec<(String, u64)>,
}

/// What a batch insertion actually added.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdditionSummary {
    pub files: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CandidateSummary {
    pub candidate_files: u64,
    pub candidate_bytes: u64,
}

/// Jobs picked for a mount, plus what would be left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateJobList<J> {
    pub candidates: Vec<J>,
    pub candidate_bytes: u64,
    pub candidate_files: u64,
    pub remaining_bytes_after_candidates: u64,
    pub remaining_files_after_candidates: u64,
}

/// Walk `jobs` in order and take every job not in `skip` until either limit is
/// reached. The job that reaches `max_bytes` is included, so a single job larger
/// than the limit can still be scheduled.
pub(crate) fn select_candidates<'a, J, I>(
    jobs: I,
    total_bytes: u64,
    total_files: u64,
    max_bytes: u64,
    max_files: u64,
    skip: &HashSet<String>,
) -> CandidateJobList<J>
where
    J: QueuedJob + Clone + 'a,
    I: IntoIterator<Item = &'a J>,
{
    let mut list = CandidateJobList {
        candidates: Vec::new(),
        candidate_bytes: 0,
        candidate_files: 0,
        remaining_bytes_after_candidates: total_bytes,
        remaining_files_after_candidates: total_files,
    };
    if max_bytes == 0 || max_files == 0 {
        return list;
    }
    for job in jobs {
        if skip.contains(job.address()) {
            continue;
        }
        list.candidates.push(job.clone());
        list.candidate_bytes += job.size();
        list.candidate_files += 1;
        list.remaining_bytes_after_candidates =
            list.remaining_bytes_after_candidates.saturating_sub(job.size());
        list.remaining_files_after_candidates =
            list.remaining_files_after_candidates.saturating_sub(1);
        if list.candidate_bytes >= max_bytes || list.candidate_files >= max_files {
            break;
        }
    }
    list
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Job {
        address: String,
        size: u64,
        start_time: i64,
        policy: CountedPolicy,
    }

    impl QueuedJob for Job {
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

    fn job(address: &str, size: u64, start_time: i64, priority: u64) -> Job {
        Job {
            address: address.to_string(),
            size,
            start_time,
            policy: CountedPolicy {
                name: "default".to_string(),
                priority,
                min_request_age: 60,
                max_drives_allowed: 1,
            },
        }
    }

    fn aggregate(jobs: &[Job]) -> QueueAggregates {
        let mut aggregates = QueueAggregates::default();
        for (i, j) in jobs.iter().enumerate() {
            aggregates.count_added(i == 0, j.size, j.start_time, &j.policy);
        }
        aggregates
    }

    #[test]
    fn drifted_maps_are_detected_and_rebuilt() {
        let jobs = vec![job("a", 10, 5, 1), job("b", 20, 3, 4)];
        let mut aggregates = aggregate(&jobs);
        assert!(aggregates.is_coherent(&jobs));

        aggregates.priority_map.inc_count(9u64);
        aggregates.total_size += 1;
        assert!(!aggregates.is_coherent(&jobs));

        aggregates.rebuild(&jobs);
        assert!(aggregates.is_coherent(&jobs));
        assert_eq!(aggregates.maps_rebuild_count, 1);
        assert_eq!(aggregates.total_size, 30);
        assert_eq!(aggregates.oldest_job_creation_time, 3);
        assert_eq!(aggregates.priority_map.max_value().unwrap(), 4);
    }

    #[test]
    fn removing_an_uncounted_policy_is_reported() {
        let jobs = vec![job("a", 10, 5, 1)];
        let mut aggregates = aggregate(&jobs);
        let stranger = job("z", 10, 5, 7);
        assert!(aggregates.count_removed(stranger.size, &stranger.policy).is_err());
    }

    #[test]
    fn empty_summary_is_zeroed() {
        let aggregates = QueueAggregates::default();
        assert_eq!(aggregates.summary(0).unwrap(), JobsSummary::default());
    }

    #[test]
    fn candidates_stop_at_the_file_limit() {
        let jobs = vec![job("a", 10, 1, 1), job("b", 10, 2, 1), job("c", 10, 3, 1)];
        let list = select_candidates(jobs.iter(), 30, 3, u64::MAX, 2, &HashSet::new());
        assert_eq!(list.candidate_files, 2);
        assert_eq!(list.remaining_files_after_candidates, 1);
        assert_eq!(list.remaining_bytes_after_candidates, 10);
    }

    #[derive(Default)]
    struct TestQueue {
        jobs: Vec<Job>,
        aggregates: QueueAggregates,
    }

    struct NewJob(Job);

    impl JobToAdd for NewJob {
        type Entry = Job;

        fn request_address(&self) -> &str {
            &self.0.address
        }
        fn size(&self) -> u64 {
            self.0.size
        }
        fn into_entry(self) -> Job {
            self.0
        }
    }

    impl JobQueue for TestQueue {
        type Job = Job;
        type ToAdd = NewJob;

        fn queue_name(&self) -> &str {
            "test"
        }
        fn jobs(&self) -> &[Job] {
            &self.jobs
        }
        fn aggregates(&self) -> &QueueAggregates {
            &self.aggregates
        }
        fn jobs_and_aggregates_mut(&mut self) -> (&mut Vec<Job>, &mut QueueAggregates) {
            (&mut self.jobs, &mut self.aggregates)
        }
    }

    fn queue_of(jobs: &[Job]) -> TestQueue {
        let mut queue = TestQueue::default();
        for j in jobs {
            queue.add_job(NewJob(j.clone()));
        }
        queue
    }

    #[test]
    fn commit_check_only_compares_counts() {
        let mut queue = queue_of(&[job("a", 10, 5, 1), job("b", 20, 3, 4)]);
        // move one count to a priority no job has; totals still agree
        queue.aggregates.priority_map.dec_count(1u64).unwrap();
        queue.aggregates.priority_map.inc_count(9u64);
        assert!(queue.aggregates.counts_match(2));

        queue.repair_aggregates();
        assert_eq!(queue.aggregates.maps_rebuild_count, 0);
        assert!(!queue.check_aggregates_coherency());

        queue.rebuild();
        assert!(queue.check_aggregates_coherency());
        assert_eq!(queue.aggregates.maps_rebuild_count, 1);
    }

    #[test]
    fn commit_check_rebuilds_on_count_mismatch() {
        let mut queue = queue_of(&[job("a", 10, 5, 1)]);
        queue.aggregates.mount_policy_name_map.inc_count("ghost");
        queue.repair_aggregates();
        assert_eq!(queue.aggregates.maps_rebuild_count, 1);
        assert!(queue.check_aggregates_coherency());

        let mut empty = TestQueue::default();
        empty.aggregates.total_size = 5;
        assert!(!empty.aggregates.counts_match(0));
        empty.repair_aggregates();
        assert_eq!(empty.aggregates.total_size, 0);
    }

    #[test]
    fn queue_bookkeeping_is_shared() {
        let mut queue = queue_of(&[job("a", 10, 5, 1), job("b", 20, 3, 4)]);
        assert!(!queue.add_job_if_necessary(NewJob(job("a", 10, 5, 1))));
        queue.add_job(NewJob(job("a", 10, 7, 1)));
        assert_eq!(queue.jobs_count(), 3);

        assert_eq!(queue.remove_job("a"), 2);
        assert_eq!(queue.get_candidate_summary().candidate_bytes, 20);
        let summary = queue.get_jobs_summary().unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(summary.oldest_job_start_time, 3);
        assert_eq!(summary.priority, 4);
        assert!(queue.check_aggregates_coherency());
        assert_eq!(queue.remove_jobs(["b", "zz"]), 1);
        assert_eq!(queue.get_jobs_summary().unwrap(), JobsSummary::default());
    }
}
