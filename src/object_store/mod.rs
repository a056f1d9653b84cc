//! The object store as seen by a single process.
//!
//! `ObjectStore` bundles the backend, this process's agent and its options.
//! There are no globals; everything that touches stored objects goes through
//! an instance. The implementation is split across submodules:
//!
//! - `helpers`: timestamps and agent ownership bookkeeping
//! - `queues`: get-or-create and removal of queues and archive job queueing
//! - `requests`: retrieve request lifecycle
//! - `drives`: drive register operations
//! - `gc`: garbage collection of objects and dead agents

mod drives;
mod gc;
mod helpers;
mod queues;
mod requests;

pub use gc::AgentCollectionReport;
pub use helpers::now_epoch_ms;
pub use requests::QueuedRetrieve;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::agent::{Agent, AgentReference};
use crate::backend::{Backend, BackendError};
use crate::codec::CodecError;
use crate::drive_register::DriveStatus;
use crate::keys::ROOT_ENTRY_ADDRESS;
use crate::object::{AnyObject, ObjectKind, StoredObject};
use crate::retrieve_request::RetrieveJobStatus;
use crate::retry::RetryLimits;
use crate::root_entry::RootEntry;
use crate::settings::AppConfig;
use crate::slate_backend::SlateBackend;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("duplicate entry: {0}")]
    DuplicateEntry(String),
    #[error("object {0} still holds jobs or entries")]
    NotEmpty(String),
    #[error("drive status {0:?} requires transfer statistics")]
    MissingStatistics(DriveStatus),
    #[error("drive status {0:?} requires a session id")]
    MissingSessionId(DriveStatus),
    #[error("drive status {0:?} requires a vid")]
    MissingVid(DriveStatus),
    #[error("drive cannot go from {from:?} to {to:?}")]
    InvalidTransition { from: DriveStatus, to: DriveStatus },
    #[error("no such drive: {0}")]
    NoSuchDrive(String),
    #[error("no job for copy number {0}")]
    NoSuchJob(u32),
    #[error("invalid or duplicate copy number {0}")]
    InvalidCopyNumber(u32),
    #[error("job for copy {copy_nb} cannot go from {from:?} to {to:?}")]
    InvalidJobTransition {
        copy_nb: u32,
        from: RetrieveJobStatus,
        to: RetrieveJobStatus,
    },
    #[error("value count map is empty")]
    EmptyValueCountMap,
    #[error("object {0} is not locked exclusively")]
    NotLocked(String),
    #[error("object {address} is a {found}, expected a {expected}")]
    WrongObjectKind {
        address: String,
        expected: ObjectKind,
        found: ObjectKind,
    },
    #[error("retrieve request has no queue criteria")]
    MissingQueueCriteria,
    #[error("retrieve request still has copies to recall")]
    RequestNotFinished,
}

impl ObjectStoreError {
    /// The object was deleted (or never created) underneath us.
    pub fn is_missing_object(&self) -> bool {
        matches!(
            self,
            ObjectStoreError::Backend(BackendError::NoSuchObject(_))
        )
    }
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub retry_limits: RetryLimits,
    pub heartbeat_timeout_ms: i64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            retry_limits: RetryLimits::default(),
            heartbeat_timeout_ms: 60_000,
        }
    }
}

impl StoreOptions {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            retry_limits: cfg.retrieve,
            heartbeat_timeout_ms: cfg.agent.heartbeat_timeout_ms,
        }
    }
}

pub struct ObjectStore {
    pub(crate) backend: Arc<dyn Backend>,
    agent: AgentReference,
    root_address: String,
    options: StoreOptions,
}

impl ObjectStore {
    /// Open the configured slatedb store and register a new agent in it.
    pub async fn open(cfg: &AppConfig) -> Result<Self, ObjectStoreError> {
        let backend = SlateBackend::open(
            &cfg.store,
            Duration::from_millis(cfg.locking.lock_timeout_ms),
        )
        .await?;
        Self::new(
            Arc::new(backend),
            &cfg.agent.resolved_name(),
            StoreOptions::from_config(cfg),
        )
        .await
    }

    /// Attach to `backend`, creating the root entry if this is a fresh store.
    pub async fn new(
        backend: Arc<dyn Backend>,
        agent_name: &str,
        options: StoreOptions,
    ) -> Result<Self, ObjectStoreError> {
        let store = Self {
            backend,
            agent: AgentReference::new(agent_name),
            root_address: ROOT_ENTRY_ADDRESS.to_string(),
            options,
        };
        store.ensure_root_entry().await?;
        store.register_agent(agent_name).await?;
        Ok(store)
    }

    async fn ensure_root_entry(&self) -> Result<(), ObjectStoreError> {
        if self.backend.exists(&self.root_address).await? {
            return Ok(());
        }
        let mut root = StoredObject::initialize(
            Arc::clone(&self.backend),
            self.root_address.as_str(),
            "",
            RootEntry::initialize(),
        );
        match root.insert().await {
            Ok(()) => {
                info!(address = %self.root_address, "created root entry");
                Ok(())
            }
            // another process won the race
            Err(ObjectStoreError::Backend(BackendError::ObjectAlreadyExists(_))) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn register_agent(&self, agent_name: &str) -> Result<(), ObjectStoreError> {
        let description = format!("{} pid {}", agent_name, std::process::id());
        let mut agent = StoredObject::initialize(
            Arc::clone(&self.backend),
            self.agent.address(),
            self.root_address.as_str(),
            Agent::initialize(description, now_epoch_ms()),
        );
        agent.insert().await?;

        let root_lock = self.backend.lock_exclusive(&self.root_address).await?;
        let mut root = StoredObject::<RootEntry>::fetch(Arc::clone(&self.backend), &root_lock).await?;
        root.register_agent(self.agent.address());
        root.commit(&root_lock).await?;
        info!(agent = %self.agent.address(), "registered agent");
        Ok(())
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn agent(&self) -> &AgentReference {
        &self.agent
    }

    pub fn agent_address(&self) -> &str {
        self.agent.address()
    }

    pub fn root_address(&self) -> &str {
        &self.root_address
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Snapshot of the root entry under a shared lock.
    pub async fn fetch_root_entry(&self) -> Result<StoredObject<RootEntry>, ObjectStoreError> {
        let lock = self.backend.lock_shared(&self.root_address).await?;
        StoredObject::fetch(Arc::clone(&self.backend), &lock).await
    }

    /// Snapshot of any object under a shared lock.
    pub async fn fetch_object(&self, address: &str) -> Result<AnyObject, ObjectStoreError> {
        let lock = self.backend.lock_shared(address).await?;
        AnyObject::fetch(Arc::clone(&self.backend), &lock).await
    }

    pub async fn list_objects(&self) -> Result<Vec<String>, ObjectStoreError> {
        Ok(self.backend.list().await?)
    }

    /// Deregister this agent if it owns nothing. An agent that still owns
    /// objects is left for another process to collect.
    pub async fn shutdown(&self) -> Result<bool, ObjectStoreError> {
        let agent_lock = self.backend.lock_exclusive(self.agent.address()).await?;
        let agent = StoredObject::<Agent>::fetch(Arc::clone(&self.backend), &agent_lock).await?;
        if !agent.owned_objects().is_empty() {
            warn!(agent = %self.agent.address(), owned = agent.owned_objects().len(), "agent still owns objects, leaving it for garbage collection");
            return Ok(false);
        }
        self.unregister_agent(agent, &agent_lock).await?;
        Ok(true)
    }
}
