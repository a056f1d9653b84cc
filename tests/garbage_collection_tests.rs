mod test_helpers;

use std::sync::Arc;
use std::time::Duration;

use tapeq::agent::Agent;
use tapeq::archive_queue::{ArchiveJobToAdd, ArchiveQueue};
use tapeq::backend::Backend;
use tapeq::gc::GcOutcome;
use tapeq::object::{ObjectKind, StoredObject};
use tapeq::object_store::{ObjectStore, StoreOptions};
use tapeq::queue_stats::JobQueue;
use tapeq::retrieve_request::{RetrieveJobStatus, RetrieveRequest};
use tapeq::root_entry::RootEntry;
use test_helpers::*;

fn impatient() -> StoreOptions {
    StoreOptions {
        heartbeat_timeout_ms: 0,
        ..StoreOptions::default()
    }
}

/// Put `address` on `store`'s ownership list, as creation does first.
async fn claim(store: &ObjectStore, address: &str) {
    let lock = store.backend().lock_exclusive(store.agent_address()).await.unwrap();
    let mut agent = StoredObject::<Agent>::fetch(Arc::clone(store.backend()), &lock).await.unwrap();
    agent.add_to_ownership(address);
    agent.commit(&lock).await.unwrap();
}

/// An archive queue inserted by `store`'s agent, optionally already linked
/// from the root entry: the two points at which creation can be interrupted.
async fn half_created_queue(store: &ObjectStore, tapepool: &str, linked: bool) -> String {
    let address = store.agent().next_id(&format!("ArchiveQueue-{tapepool}"));
    claim(store, &address).await;
    let mut queue = StoredObject::initialize(
        Arc::clone(store.backend()),
        address.as_str(),
        store.agent_address(),
        ArchiveQueue::initialize(tapepool),
    );
    queue.insert().await.unwrap();
    if linked {
        let lock = store.backend().lock_exclusive(store.root_address()).await.unwrap();
        let mut root = StoredObject::<RootEntry>::fetch(Arc::clone(store.backend()), &lock).await.unwrap();
        root.add_archive_queue(tapepool, &address).unwrap();
        root.commit(&lock).await.unwrap();
    }
    address
}

async fn registered_agents(store: &ObjectStore) -> Vec<String> {
    store.fetch_root_entry().await.unwrap().dump_agents().to_vec()
}

#[tapeq::test]
async fn unlinked_queue_of_dead_agent_is_deleted() {
    let (_tmp, backend) = open_temp_backend().await;
    let dead = attach_agent(&backend, "dead").await;
    let address = half_created_queue(&dead, "pool1", false).await;
    let dead_address = dead.agent_address().to_string();
    drop(dead);

    let survivor = attach_agent(&backend, "survivor").await;
    let report = survivor.collect_agent(&dead_address).await.unwrap();
    assert_eq!(report.collected, vec![(address.clone(), GcOutcome::Removed)]);
    assert!(report.agent_removed);
    assert!(!backend.exists(&address).await.unwrap());
    assert!(!backend.exists(&dead_address).await.unwrap());
    assert!(!registered_agents(&survivor).await.contains(&dead_address));
}

#[tapeq::test]
async fn linked_queue_of_dead_agent_is_handed_to_root() {
    let (_tmp, backend) = open_temp_backend().await;
    let dead = attach_agent(&backend, "dead").await;
    let address = half_created_queue(&dead, "pool1", true).await;
    let dead_address = dead.agent_address().to_string();
    drop(dead);

    let survivor = attach_agent(&backend, "survivor").await;
    let report = survivor.collect_agent(&dead_address).await.unwrap();
    assert_eq!(
        report.collected,
        vec![(
            address.clone(),
            GcOutcome::Relinked {
                owner: survivor.root_address().to_string()
            }
        )]
    );
    let queue = survivor.fetch_object(&address).await.unwrap();
    assert_eq!(queue.owner(), survivor.root_address());

    // the queue is usable again through the root entry
    let (lock, queue) = survivor.get_or_create_archive_queue("pool1").await.unwrap();
    assert_eq!(queue.address(), address);
    lock.release();
}

#[tapeq::test]
async fn unlinked_queue_with_jobs_is_kept() {
    let (_tmp, backend) = open_temp_backend().await;
    let dead = attach_agent(&backend, "dead").await;
    let address = half_created_queue(&dead, "pool1", false).await;
    {
        let lock = backend.lock_exclusive(&address).await.unwrap();
        let mut queue = StoredObject::<ArchiveQueue>::fetch(Arc::clone(&backend), &lock).await.unwrap();
        queue.add_job(ArchiveJobToAdd {
            request_address: "ArchiveRequest-1".to_string(),
            archive_file_id: 1,
            copy_nb: 1,
            size: 10,
            mount_policy: mount_policy("default", 1, 0, 1),
            start_time: 1,
        });
        queue.commit(&lock).await.unwrap();
    }
    let dead_address = dead.agent_address().to_string();
    drop(dead);

    let survivor = attach_agent(&backend, "survivor").await;
    let report = survivor.collect_agent(&dead_address).await.unwrap();
    assert!(report.collected.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, address);
    assert!(!report.agent_removed);
    assert!(backend.exists(&address).await.unwrap());
    assert!(backend.exists(&dead_address).await.unwrap());
}

#[tapeq::test]
async fn objects_handed_over_or_never_created_are_left_alone() {
    let (_tmp, backend) = open_temp_backend().await;
    let dead = attach_agent(&backend, "dead").await;
    // a queue created properly, so owned by the root entry
    let (lock, queue) = dead.get_or_create_archive_queue("pool1").await.unwrap();
    let handed_over = queue.address().to_string();
    lock.release();
    claim(&dead, &handed_over).await;
    claim(&dead, "ArchiveQueue-never-inserted").await;
    let dead_address = dead.agent_address().to_string();
    drop(dead);

    let survivor = attach_agent(&backend, "survivor").await;
    let report = survivor.collect_agent(&dead_address).await.unwrap();
    assert_eq!(
        report.collected,
        vec![(
            handed_over.clone(),
            GcOutcome::NotOwned {
                owner: survivor.root_address().to_string()
            }
        )]
    );
    assert_eq!(report.missing, vec!["ArchiveQueue-never-inserted".to_string()]);
    assert!(report.agent_removed);
    assert!(backend.exists(&handed_over).await.unwrap());
}

#[tapeq::test]
async fn dispatched_request_of_dead_agent_is_requeued() {
    let (_tmp, backend) = open_temp_backend().await;
    let dead = attach_agent(&backend, "dead").await;
    let queued = dead
        .queue_retrieve_request(scheduler_request(9), criteria(9, &[("V1", 3)]))
        .await
        .unwrap();
    let jobs = dead.dispatch_retrieve_jobs("V1", u64::MAX, 10).await.unwrap();
    assert_eq!(jobs.len(), 1);
    let dead_address = dead.agent_address().to_string();
    drop(dead);

    let survivor = attach_agent(&backend, "survivor").await;
    let report = survivor.collect_agent(&dead_address).await.unwrap();
    assert_eq!(
        report.collected,
        vec![(
            queued.request_address.clone(),
            GcOutcome::Requeued {
                queue: queued.queue_address.clone(),
                copy_nb: 1
            }
        )]
    );

    let request = StoredObject::<RetrieveRequest>::fetch_no_lock(
        Arc::clone(&backend),
        &queued.request_address,
    )
    .await
    .unwrap();
    assert_eq!(request.owner(), queued.queue_address);
    assert_eq!(request.get_job(1).unwrap().status, RetrieveJobStatus::Pending);
    assert_eq!(
        survivor.retrieve_queue_summary("V1").await.unwrap().unwrap().files,
        1
    );
    let again = survivor.dispatch_retrieve_jobs("V1", u64::MAX, 10).await.unwrap();
    assert_eq!(again.len(), 1);
}

#[tapeq::test]
async fn satisfied_request_of_dead_agent_is_deleted() {
    let (_tmp, backend) = open_temp_backend().await;
    let dead = attach_agent(&backend, "dead").await;
    let queued = dead
        .queue_retrieve_request(scheduler_request(5), criteria(5, &[("V1", 3)]))
        .await
        .unwrap();
    dead.dispatch_retrieve_jobs("V1", u64::MAX, 10).await.unwrap();
    {
        // the success was recorded but the agent died before deleting the request
        let lock = backend.lock_exclusive(&queued.request_address).await.unwrap();
        let mut request = StoredObject::<RetrieveRequest>::fetch(Arc::clone(&backend), &lock).await.unwrap();
        request.set_job_successful(1).unwrap();
        request.commit(&lock).await.unwrap();
    }
    let dead_address = dead.agent_address().to_string();
    drop(dead);

    let survivor = attach_agent(&backend, "survivor").await;
    let outcome = survivor
        .garbage_collect(&queued.request_address, &dead_address)
        .await
        .unwrap();
    assert_eq!(outcome, GcOutcome::Removed);
    assert!(!backend.exists(&queued.request_address).await.unwrap());
}

#[tapeq::test]
async fn agents_and_root_are_never_collected() {
    let (_tmp, store) = open_temp_store().await;
    let outcome = store
        .garbage_collect(store.root_address(), store.agent_address())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        GcOutcome::Skipped {
            kind: ObjectKind::RootEntry
        }
    );
    let outcome = store
        .garbage_collect(store.agent_address(), store.root_address())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        GcOutcome::Skipped {
            kind: ObjectKind::Agent
        }
    );
}

#[tapeq::test(timeout_ms = 20_000)]
async fn stale_agents_are_found_and_collected() {
    let (_tmp, backend) = open_temp_backend().await;
    let dead = attach_agent(&backend, "dead").await;
    let address = half_created_queue(&dead, "pool1", false).await;
    let dead_address = dead.agent_address().to_string();
    drop(dead);

    let patient = attach_agent(&backend, "patient").await;
    assert!(patient.find_stale_agents().await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(20)).await;
    let collector = attach_agent_with_options(&backend, "collector", impatient()).await;
    let stale = collector.find_stale_agents().await.unwrap();
    assert!(stale.contains(&dead_address));
    assert!(!stale.contains(&collector.agent_address().to_string()));

    let reports = collector.collect_stale_agents().await.unwrap();
    let dead_report = reports.iter().find(|r| r.agent == dead_address).unwrap();
    assert!(dead_report.agent_removed);
    assert!(!backend.exists(&address).await.unwrap());
}

#[tapeq::test]
async fn agent_missing_from_the_store_is_forgotten() {
    let (_tmp, backend) = open_temp_backend().await;
    let dead = attach_agent(&backend, "dead").await;
    let dead_address = dead.agent_address().to_string();
    {
        let lock = backend.lock_exclusive(&dead_address).await.unwrap();
        backend.remove(&dead_address).await.unwrap();
        lock.release();
    }
    drop(dead);

    let collector = attach_agent_with_options(&backend, "collector", impatient()).await;
    assert!(collector.find_stale_agents().await.unwrap().contains(&dead_address));
    let report = collector.collect_agent(&dead_address).await.unwrap();
    assert!(report.agent_removed);
    assert!(!registered_agents(&collector).await.contains(&dead_address));
}

#[tapeq::test]
async fn shutdown_deregisters_an_idle_agent() {
    let (_tmp, backend) = open_temp_backend().await;
    let store = attach_agent(&backend, "worker").await;
    let address = store.agent_address().to_string();
    assert!(registered_agents(&store).await.contains(&address));

    claim(&store, "ArchiveQueue-pending").await;
    assert!(!store.shutdown().await.unwrap());
    assert!(backend.exists(&address).await.unwrap());

    {
        let lock = backend.lock_exclusive(&address).await.unwrap();
        let mut agent = StoredObject::<Agent>::fetch(Arc::clone(&backend), &lock).await.unwrap();
        assert!(agent.remove_from_ownership("ArchiveQueue-pending"));
        agent.commit(&lock).await.unwrap();
    }
    assert!(store.shutdown().await.unwrap());
    assert!(!backend.exists(&address).await.unwrap());
    assert!(!registered_agents(&store).await.contains(&address));
}

#[tapeq::test]
async fn heartbeat_moves_forward() {
    let (_tmp, store) = open_temp_store().await;
    let before = StoredObject::<Agent>::fetch_no_lock(Arc::clone(store.backend()), store.agent_address())
        .await
        .unwrap()
        .heartbeat_time();
    tokio::time::sleep(Duration::from_millis(5)).await;
    store.heartbeat().await.unwrap();
    let after = StoredObject::<Agent>::fetch_no_lock(Arc::clone(store.backend()), store.agent_address())
        .await
        .unwrap()
        .heartbeat_time();
    assert!(after > before);
}
