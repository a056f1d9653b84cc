//! Garbage collection of objects left behind by dead agents.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::agent::Agent;
use crate::backend::ScopedLock;
use crate::gc::GcOutcome;
use crate::object::{AnyObject, StoredObject};
use crate::object_store::helpers::now_epoch_ms;
use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::retrieve_request::RetrieveRequest;
use crate::root_entry::RootEntry;

/// What sweeping one agent achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentCollectionReport {
    pub agent: String,
    pub collected: Vec<(String, GcOutcome)>,
    /// Listed objects that were never created or are already gone.
    pub missing: Vec<String>,
    /// Objects that could not be collected, with the reason. They stay listed.
    pub failures: Vec<(String, String)>,
    pub agent_removed: bool,
}

impl ObjectStore {
    /// Collect the object at `address` on behalf of `presumed_owner`.
    pub async fn garbage_collect(
        &self,
        address: &str,
        presumed_owner: &str,
    ) -> Result<GcOutcome, ObjectStoreError> {
        let lock = self.backend.lock_exclusive(address).await?;
        match AnyObject::fetch(Arc::clone(&self.backend), &lock).await? {
            AnyObject::ArchiveQueue(queue) => {
                queue
                    .garbage_collect(&lock, presumed_owner, self.root_address())
                    .await
            }
            AnyObject::RetrieveQueue(queue) => {
                queue
                    .garbage_collect(&lock, presumed_owner, self.root_address())
                    .await
            }
            AnyObject::DriveRegister(register) => {
                register
                    .garbage_collect(&lock, presumed_owner, self.root_address())
                    .await
            }
            AnyObject::RetrieveRequest(request) => {
                self.garbage_collect_retrieve_request(request, &lock, presumed_owner)
                    .await
            }
            other @ (AnyObject::RootEntry(_) | AnyObject::Agent(_)) => {
                Ok(GcOutcome::Skipped { kind: other.kind() })
            }
        }
    }

    /// Requeue a request abandoned mid-flight, or delete it if it needs no
    /// further work.
    async fn garbage_collect_retrieve_request(
        &self,
        mut request: StoredObject<RetrieveRequest>,
        lock: &ScopedLock,
        presumed_owner: &str,
    ) -> Result<GcOutcome, ObjectStoreError> {
        if request.owner() != presumed_owner {
            return Ok(GcOutcome::NotOwned {
                owner: request.owner().to_string(),
            });
        }
        let Some(copy_nb) = request.next_copy_to_queue().filter(|_| !request.is_satisfied()) else {
            let address = request.address().to_string();
            request.remove(lock).await?;
            info!(request = %address, "removed finished retrieve request");
            return Ok(GcOutcome::Removed);
        };
        let (vid, queue) = self.requeue_request_copy(&mut request, lock, copy_nb).await?;
        info!(request = %request.address(), vid = %vid, copy_nb, "requeued retrieve request");
        Ok(GcOutcome::Requeued { queue, copy_nb })
    }

    pub async fn heartbeat(&self) -> Result<(), ObjectStoreError> {
        let lock = self.backend.lock_exclusive(self.agent_address()).await?;
        let mut agent = StoredObject::<Agent>::fetch(Arc::clone(&self.backend), &lock).await?;
        agent.heartbeat(now_epoch_ms());
        agent.commit(&lock).await
    }

    /// Registered agents, other than this one, whose heartbeat expired or
    /// whose object is gone.
    pub async fn find_stale_agents(&self) -> Result<Vec<String>, ObjectStoreError> {
        let now = now_epoch_ms();
        let timeout = self.options().heartbeat_timeout_ms;
        let root = self.fetch_root_entry().await?;
        let mut stale = Vec::new();
        for address in root.dump_agents() {
            if address == self.agent_address() {
                continue;
            }
            match StoredObject::<Agent>::fetch_no_lock(Arc::clone(&self.backend), address).await {
                Ok(agent) if agent.is_stale(now, timeout) => stale.push(address.clone()),
                Ok(_) => {}
                Err(e) if e.is_missing_object() => stale.push(address.clone()),
                Err(e) => return Err(e),
            }
        }
        Ok(stale)
    }

    /// Garbage-collect everything a dead agent owned, then remove the agent.
    ///
    /// Failures on individual objects are reported and leave the object in
    /// the agent's list; the agent is only removed once the list is empty.
    pub async fn collect_agent(
        &self,
        agent_address: &str,
    ) -> Result<AgentCollectionReport, ObjectStoreError> {
        let mut report = AgentCollectionReport {
            agent: agent_address.to_string(),
            ..Default::default()
        };
        let agent_lock = self.backend.lock_exclusive(agent_address).await?;
        let mut agent = match StoredObject::<Agent>::fetch(Arc::clone(&self.backend), &agent_lock).await {
            Ok(agent) => agent,
            Err(e) if e.is_missing_object() => {
                self.forget_agent(agent_address).await?;
                report.agent_removed = true;
                return Ok(report);
            }
            Err(e) => return Err(e),
        };

        let owned: Vec<String> = agent.owned_objects().to_vec();
        for address in owned {
            match self.garbage_collect(&address, agent_address).await {
                Ok(outcome) => {
                    agent.remove_from_ownership(&address);
                    report.collected.push((address, outcome));
                }
                Err(e) if e.is_missing_object() => {
                    agent.remove_from_ownership(&address);
                    report.missing.push(address);
                }
                Err(e) => {
                    error!(agent = %agent_address, object = %address, error = %e, "failed to garbage collect object");
                    report.failures.push((address, e.to_string()));
                }
            }
        }

        if agent.owned_objects().is_empty() {
            self.unregister_agent(agent, &agent_lock).await?;
            report.agent_removed = true;
        } else {
            agent.commit(&agent_lock).await?;
            warn!(agent = %agent_address, remaining = agent.owned_objects().len(), "agent still owns objects after collection");
        }
        info!(
            agent = %agent_address,
            collected = report.collected.len(),
            missing = report.missing.len(),
            failed = report.failures.len(),
            "collected agent"
        );
        Ok(report)
    }

    /// Find and collect every stale agent.
    pub async fn collect_stale_agents(&self) -> Result<Vec<AgentCollectionReport>, ObjectStoreError> {
        let mut reports = Vec::new();
        for agent in self.find_stale_agents().await? {
            reports.push(self.collect_agent(&agent).await?);
        }
        Ok(reports)
    }

    async fn forget_agent(&self, agent_address: &str) -> Result<(), ObjectStoreError> {
        let root_lock = self.backend.lock_exclusive(self.root_address()).await?;
        let mut root = StoredObject::<RootEntry>::fetch(
            Arc::clone(&self.backend),
            &root_lock,
        )
        .await?;
        if root.remove_agent(agent_address) {
            root.commit(&root_lock).await?;
        }
        Ok(())
    }
}
