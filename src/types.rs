//! Plain records shared by queues, requests and drives.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::Serialize;

/// Scheduling parameters attached to every request by the catalogue.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub struct MountPolicy {
    pub name: String,
    pub max_drives_allowed: u64,
    pub archive_priority: u64,
    /// Seconds.
    pub archive_min_request_age: u64,
    pub retrieve_priority: u64,
    /// Seconds.
    pub retrieve_min_request_age: u64,
}

/// Who did something, from where, and when (epoch ms).
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub struct EntryLog {
    pub username: String,
    pub host: String,
    pub time: i64,
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub struct UserIdentity {
    pub name: String,
    pub group: String,
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub struct DiskFileInfo {
    pub path: String,
    pub owner_uid: u32,
    pub gid: u32,
}

/// One copy of a file on tape.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub struct TapeFile {
    pub vid: String,
    pub fseq: u64,
    pub block_id: u64,
    pub file_size: u64,
    pub copy_nb: u32,
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub struct ArchiveFile {
    pub archive_file_id: u64,
    pub disk_instance: String,
    pub disk_file_id: String,
    pub file_size: u64,
    pub tape_files: Vec<TapeFile>,
}

impl ArchiveFile {
    pub fn tape_file(&self, copy_nb: u32) -> Option<&TapeFile> {
        self.tape_files.iter().find(|tf| tf.copy_nb == copy_nb)
    }
}

/// Where a file's copies live and which policy schedules their recall.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub struct RetrieveFileQueueCriteria {
    pub archive_file: ArchiveFile,
    pub mount_policy: MountPolicy,
}

/// The user-facing half of a retrieve request.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub struct SchedulerRetrieveRequest {
    pub requester: UserIdentity,
    pub archive_file_id: u64,
    pub dst_url: String,
    pub error_report_url: String,
    pub disk_file_info: DiskFileInfo,
    pub creation_log: EntryLog,
    pub is_verify_only: bool,
}
