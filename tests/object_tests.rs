mod test_helpers;

use std::sync::Arc;
use std::time::Duration;

use tapeq::archive_queue::ArchiveQueue;
use tapeq::backend::{Backend, BackendError, LockMode};
use tapeq::codec::{
    decode_agent, decode_header, decode_root_entry, encode_agent, encode_root_entry, peek_version,
    CodecError, ROOT_ENTRY_VERSION,
};
use tapeq::agent::Agent;
use tapeq::object::{AnyObject, ObjectKind, StoredObject};
use tapeq::object_store::ObjectStoreError;
use tapeq::retrieve_queue::RetrieveQueue;
use tapeq::root_entry::RootEntry;
use test_helpers::*;

#[tapeq::test]
fn root_entry_survives_encoding() {
    let mut root = RootEntry::initialize();
    root.add_archive_queue("pool1", "ArchiveQueue-pool1-a-0").unwrap();
    root.add_retrieve_queue("V1", "RetrieveQueue-V1-a-1").unwrap();
    root.set_drive_register("DriveRegister-a-2").unwrap();
    root.register_agent("Agent-a");

    let bytes = encode_root_entry(&root).unwrap();
    assert_eq!(peek_version(&bytes).unwrap(), ROOT_ENTRY_VERSION);
    assert_eq!(decode_root_entry(&bytes).unwrap(), root);
}

#[tapeq::test]
fn decoding_rejects_bad_blobs() {
    assert!(matches!(decode_root_entry(&[]), Err(CodecError::TooShort)));
    assert!(matches!(peek_version(&[]), Err(CodecError::TooShort)));

    let mut bytes = encode_agent(&Agent::initialize("agent", 1)).unwrap();
    bytes[0] = 99;
    assert!(matches!(
        decode_agent(&bytes),
        Err(CodecError::UnsupportedVersion {
            expected: 1,
            found: 99
        })
    ));
}

#[tapeq::test]
fn root_entry_pointers_are_unique() {
    let mut root = RootEntry::initialize();
    root.add_archive_queue("pool1", "a").unwrap();
    assert!(matches!(
        root.add_archive_queue("pool1", "b"),
        Err(ObjectStoreError::DuplicateEntry(_))
    ));
    assert_eq!(root.remove_archive_queue("pool1").unwrap(), "a");
    assert!(matches!(
        root.remove_archive_queue("pool1"),
        Err(ObjectStoreError::NotFound(_))
    ));

    root.set_drive_register("d").unwrap();
    assert!(root.set_drive_register("e").is_err());
    assert_eq!(root.remove_drive_register().unwrap(), "d");
    assert!(root.remove_drive_register().is_err());

    root.register_agent("agent-1");
    root.register_agent("agent-1");
    assert_eq!(root.dump_agents().len(), 1);
    assert!(root.remove_agent("agent-1"));
    assert!(!root.remove_agent("agent-1"));
}

#[tapeq::test]
async fn objects_carry_kind_and_owner() {
    let (_tmp, store) = open_temp_store().await;
    let (lock, queue) = store.get_or_create_retrieve_queue("V1").await.unwrap();
    let address = queue.address().to_string();
    lock.release();

    let blob = store.backend().fetch(&address).await.unwrap();
    let header = decode_header(&blob).unwrap();
    assert_eq!(header.kind, ObjectKind::RetrieveQueue);
    assert_eq!(header.owner, store.root_address());

    let any = store.fetch_object(&address).await.unwrap();
    assert_eq!(any.kind(), ObjectKind::RetrieveQueue);
    assert!(matches!(any, AnyObject::RetrieveQueue(_)));
    let json = any.to_json().unwrap();
    assert_eq!(json["kind"], "RetrieveQueue");
    assert_eq!(json["payload"]["vid"], "V1");

    let err = StoredObject::<ArchiveQueue>::fetch_no_lock(Arc::clone(store.backend()), &address)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ObjectStoreError::WrongObjectKind {
            expected: ObjectKind::ArchiveQueue,
            found: ObjectKind::RetrieveQueue,
            ..
        }
    ));

    let listed = store.list_objects().await.unwrap();
    assert!(listed.contains(&address));
    assert!(listed.contains(&store.root_address().to_string()));
    assert!(listed.contains(&store.agent_address().to_string()));
}

#[tapeq::test]
async fn stale_copy_cannot_overwrite_a_newer_commit() {
    let (_tmp, store) = open_temp_store().await;
    let (lock, queue) = store.get_or_create_retrieve_queue("V1").await.unwrap();
    let address = queue.address().to_string();
    lock.release();

    let stale = StoredObject::<RetrieveQueue>::fetch_no_lock(Arc::clone(store.backend()), &address)
        .await
        .unwrap();
    let mut stale = stale;

    let lock = store.backend().lock_exclusive(&address).await.unwrap();
    let mut fresh = StoredObject::<RetrieveQueue>::fetch(Arc::clone(store.backend()), &lock)
        .await
        .unwrap();
    fresh.set_backup_owner("someone");
    fresh.commit(&lock).await.unwrap();

    stale.set_owner("thief");
    let err = stale.commit(&lock).await.unwrap_err();
    assert!(matches!(
        err,
        ObjectStoreError::Backend(BackendError::CasConflict(_))
    ));
    lock.release();

    let current = store.fetch_object(&address).await.unwrap();
    assert_eq!(current.owner(), store.root_address());
}

#[tapeq::test]
async fn inserting_twice_fails() {
    let (_tmp, backend) = open_temp_backend().await;
    let mut first = StoredObject::initialize(
        Arc::clone(&backend),
        "ArchiveQueue-x",
        "owner",
        ArchiveQueue::initialize("x"),
    );
    first.insert().await.unwrap();
    let mut second = StoredObject::initialize(
        Arc::clone(&backend),
        "ArchiveQueue-x",
        "owner",
        ArchiveQueue::initialize("x"),
    );
    let err = second.insert().await.unwrap_err();
    assert!(matches!(
        err,
        ObjectStoreError::Backend(BackendError::ObjectAlreadyExists(_))
    ));

    let lock = backend.lock_exclusive("ArchiveQueue-x").await.unwrap();
    first.remove(&lock).await.unwrap();
    let err = second.remove(&lock).await.unwrap_err();
    assert!(err.is_missing_object());
}

#[tapeq::test(timeout_ms = 5_000)]
async fn exclusive_locks_time_out() {
    let (_tmp, backend) = open_temp_backend_with_lock_timeout(Duration::from_millis(50)).await;

    let a = backend.lock_shared("obj").await.unwrap();
    let b = backend.lock_shared("obj").await.unwrap();
    assert_eq!(a.mode(), LockMode::Shared);
    assert!(!a.is_exclusive_on("obj"));

    let err = backend.lock_exclusive("obj").await.unwrap_err();
    assert!(matches!(err, BackendError::LockTimeout(_)));
    a.release();
    b.release();

    let x = backend.lock_exclusive("obj").await.unwrap();
    assert!(x.is_exclusive_on("obj"));
    assert!(!x.is_exclusive_on("other"));
    assert!(matches!(
        backend.lock_shared("obj").await,
        Err(BackendError::LockTimeout(_))
    ));
    // unrelated addresses are independent
    backend.lock_exclusive("other").await.unwrap().release();
    x.release();
    backend.lock_exclusive("obj").await.unwrap().release();
}
