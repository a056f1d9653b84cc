#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tapeq::backend::Backend;
use tapeq::object_store::{ObjectStore, StoreOptions};
use tapeq::settings::{StorageKind, StoreConfig};
use tapeq::slate_backend::SlateBackend;
use tapeq::types::{
    ArchiveFile, DiskFileInfo, EntryLog, MountPolicy, RetrieveFileQueueCriteria,
    SchedulerRetrieveRequest, TapeFile, UserIdentity,
};

pub async fn open_temp_backend() -> (tempfile::TempDir, Arc<dyn Backend>) {
    open_temp_backend_with_lock_timeout(Duration::from_secs(5)).await
}

pub async fn open_temp_backend_with_lock_timeout(
    lock_timeout: Duration,
) -> (tempfile::TempDir, Arc<dyn Backend>) {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = StoreConfig {
        backend: StorageKind::Fs,
        path: tmp.path().to_string_lossy().to_string(),
        // Use fast flush interval for tests to speed them up
        flush_interval_ms: Some(10),
    };
    let backend = SlateBackend::open(&cfg, lock_timeout)
        .await
        .expect("open backend");
    (tmp, Arc::new(backend))
}

/// A store over a fresh temp directory, with a single registered agent.
pub async fn open_temp_store() -> (tempfile::TempDir, ObjectStore) {
    let (tmp, backend) = open_temp_backend().await;
    let store = ObjectStore::new(backend, "test", StoreOptions::default())
        .await
        .expect("open store");
    (tmp, store)
}

/// A second process attached to the same backend, under its own agent.
pub async fn attach_agent(backend: &Arc<dyn Backend>, name: &str) -> ObjectStore {
    ObjectStore::new(Arc::clone(backend), name, StoreOptions::default())
        .await
        .expect("attach agent")
}

pub async fn attach_agent_with_options(
    backend: &Arc<dyn Backend>,
    name: &str,
    options: StoreOptions,
) -> ObjectStore {
    ObjectStore::new(Arc::clone(backend), name, options)
        .await
        .expect("attach agent")
}

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

pub fn mount_policy(name: &str, priority: u64, min_age: u64, max_drives: u64) -> MountPolicy {
    MountPolicy {
        name: name.to_string(),
        max_drives_allowed: max_drives,
        archive_priority: priority,
        archive_min_request_age: min_age,
        retrieve_priority: priority,
        retrieve_min_request_age: min_age,
    }
}

pub fn entry_log(time: i64) -> EntryLog {
    EntryLog {
        username: "operator".to_string(),
        host: "tapesrv01".to_string(),
        time,
    }
}

pub fn tape_file(vid: &str, fseq: u64, copy_nb: u32) -> TapeFile {
    TapeFile {
        vid: vid.to_string(),
        fseq,
        block_id: fseq * 100,
        file_size: 1000,
        copy_nb,
    }
}

pub fn scheduler_request(archive_file_id: u64) -> SchedulerRetrieveRequest {
    SchedulerRetrieveRequest {
        requester: UserIdentity {
            name: "user1".to_string(),
            group: "group1".to_string(),
        },
        archive_file_id,
        dst_url: format!("root://eos/file{archive_file_id}"),
        error_report_url: String::new(),
        disk_file_info: DiskFileInfo {
            path: format!("/eos/file{archive_file_id}"),
            owner_uid: 1000,
            gid: 1000,
        },
        creation_log: entry_log(now_ms()),
        is_verify_only: false,
    }
}

/// Criteria for a 1000-byte file with one copy per `(vid, fseq)`, numbered from 1.
pub fn criteria(archive_file_id: u64, copies: &[(&str, u64)]) -> RetrieveFileQueueCriteria {
    RetrieveFileQueueCriteria {
        archive_file: ArchiveFile {
            archive_file_id,
            disk_instance: "eos".to_string(),
            disk_file_id: archive_file_id.to_string(),
            file_size: 1000,
            tape_files: copies
                .iter()
                .enumerate()
                .map(|(i, (vid, fseq))| tape_file(vid, *fseq, i as u32 + 1))
                .collect(),
        },
        mount_policy: mount_policy("default", 1, 0, 2),
    }
}
