//! Key → blob store collaborator.
//!
//! Objects are addressed by plain strings. The backend offers whole-blob reads
//! and writes, a compare-and-swap commit and scoped locks; everything above it
//! follows lock → fetch → mutate → commit → release.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Slate(#[from] slatedb::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("no object at address {0}")]
    NoSuchObject(String),
    #[error("object already exists at address {0}")]
    ObjectAlreadyExists(String),
    #[error("object at address {0} changed since it was fetched")]
    CasConflict(String),
    #[error("timed out waiting for lock on {0}")]
    LockTimeout(String),
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Store a new blob; fails with `ObjectAlreadyExists` if the address is taken.
    async fn create(&self, address: &str, blob: Bytes) -> Result<(), BackendError>;

    async fn fetch(&self, address: &str) -> Result<Bytes, BackendError>;

    /// Replace the blob at `address` if it still holds `expected`.
    async fn commit(&self, address: &str, expected: &Bytes, blob: Bytes)
        -> Result<(), BackendError>;

    async fn remove(&self, address: &str) -> Result<(), BackendError>;

    async fn exists(&self, address: &str) -> Result<bool, BackendError>;

    /// Every stored address, in key order.
    async fn list(&self) -> Result<Vec<String>, BackendError>;

    async fn lock_exclusive(&self, address: &str) -> Result<ScopedLock, BackendError>;

    async fn lock_shared(&self, address: &str) -> Result<ScopedLock, BackendError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

enum LockGuard {
    Shared(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Exclusive(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

/// A held lock on one address. Dropping it (or calling `release`) unlocks.
pub struct ScopedLock {
    address: String,
    guard: LockGuard,
}

impl ScopedLock {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn mode(&self) -> LockMode {
        match self.guard {
            LockGuard::Shared(_) => LockMode::Shared,
            LockGuard::Exclusive(_) => LockMode::Exclusive,
        }
    }

    pub fn is_exclusive_on(&self, address: &str) -> bool {
        self.mode() == LockMode::Exclusive && self.address == address
    }

    pub fn release(self) {}
}

impl fmt::Debug for ScopedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedLock")
            .field("address", &self.address)
            .field("mode", &self.mode())
            .finish()
    }
}

/// Entries above this count trigger a sweep of unheld locks.
const PRUNE_THRESHOLD: usize = 1024;

/// Per-process reader/writer locks keyed by address.
pub struct LockTable {
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
    timeout: Duration,
}

impl LockTable {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    fn entry(&self, address: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.len() > PRUNE_THRESHOLD {
            // a held guard keeps its own reference
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        Arc::clone(locks.entry(address.to_string()).or_default())
    }

    pub async fn lock_exclusive(&self, address: &str) -> Result<ScopedLock, BackendError> {
        let lock = self.entry(address);
        let guard = tokio::time::timeout(self.timeout, lock.write_owned())
            .await
            .map_err(|_| BackendError::LockTimeout(address.to_string()))?;
        Ok(ScopedLock {
            address: address.to_string(),
            guard: LockGuard::Exclusive(guard),
        })
    }

    pub async fn lock_shared(&self, address: &str) -> Result<ScopedLock, BackendError> {
        let lock = self.entry(address);
        let guard = tokio::time::timeout(self.timeout, lock.read_owned())
            .await
            .map_err(|_| BackendError::LockTimeout(address.to_string()))?;
        Ok(ScopedLock {
            address: address.to_string(),
            guard: LockGuard::Shared(guard),
        })
    }
}
