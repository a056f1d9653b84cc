use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use slatedb::{Db, DBTransaction, ErrorKind as SlateErrorKind, IsolationLevel};
use tracing::debug;

use crate::backend::{Backend, BackendError, LockTable, ScopedLock};
use crate::keys::{address_from_key, object_key, OBJECT_KEY_PREFIX};
use crate::settings::StoreConfig;
use crate::storage::open_db;

/// Backend storing each object as one slatedb key.
///
/// slatedb allows a single writer per database, so scoped locks live in an
/// in-process table and compare-and-swap is a serializable transaction.
pub struct SlateBackend {
    db: Arc<Db>,
    locks: LockTable,
}

impl SlateBackend {
    pub async fn open(cfg: &StoreConfig, lock_timeout: Duration) -> Result<Self, BackendError> {
        let db = open_db(cfg).await?;
        Ok(Self::with_db(Arc::new(db), lock_timeout))
    }

    pub fn with_db(db: Arc<Db>, lock_timeout: Duration) -> Self {
        Self {
            db,
            locks: LockTable::new(lock_timeout),
        }
    }

    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    pub async fn close(&self) -> Result<(), BackendError> {
        self.db.flush().await?;
        self.db.close().await?;
        Ok(())
    }

    async fn finish(&self, txn: DBTransaction, address: &str) -> Result<(), BackendError> {
        match txn.commit().await {
            Ok(_) => {}
            Err(e) if e.kind() == SlateErrorKind::Transaction => {
                debug!(address = %address, "write conflicted with a concurrent transaction");
                return Err(BackendError::CasConflict(address.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        self.db.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Backend for SlateBackend {
    async fn create(&self, address: &str, blob: Bytes) -> Result<(), BackendError> {
        let key = object_key(address);
        let txn = self.db.begin(IsolationLevel::SerializableSnapshot).await?;
        if txn.get(&key).await?.is_some() {
            return Err(BackendError::ObjectAlreadyExists(address.to_string()));
        }
        txn.put(&key, &blob)?;
        self.finish(txn, address).await
    }

    async fn fetch(&self, address: &str) -> Result<Bytes, BackendError> {
        self.db
            .get(object_key(address))
            .await?
            .ok_or_else(|| BackendError::NoSuchObject(address.to_string()))
    }

    async fn commit(
        &self,
        address: &str,
        expected: &Bytes,
        blob: Bytes,
    ) -> Result<(), BackendError> {
        let key = object_key(address);
        let txn = self.db.begin(IsolationLevel::SerializableSnapshot).await?;
        match txn.get(&key).await? {
            None => return Err(BackendError::NoSuchObject(address.to_string())),
            Some(current) if current != *expected => {
                return Err(BackendError::CasConflict(address.to_string()));
            }
            Some(_) => {}
        }
        txn.put(&key, &blob)?;
        self.finish(txn, address).await
    }

    async fn remove(&self, address: &str) -> Result<(), BackendError> {
        let key = object_key(address);
        let txn = self.db.begin(IsolationLevel::SerializableSnapshot).await?;
        if txn.get(&key).await?.is_none() {
            return Err(BackendError::NoSuchObject(address.to_string()));
        }
        txn.delete(&key)?;
        self.finish(txn, address).await
    }

    async fn exists(&self, address: &str) -> Result<bool, BackendError> {
        Ok(self.db.get(object_key(address)).await?.is_some())
    }

    async fn list(&self) -> Result<Vec<String>, BackendError> {
        let start: Vec<u8> = OBJECT_KEY_PREFIX.as_bytes().to_vec();
        let mut end: Vec<u8> = OBJECT_KEY_PREFIX.as_bytes().to_vec();
        end.push(0xFF);
        let mut iter = self.db.scan::<Vec<u8>, _>(start..end).await?;
        let mut addresses = Vec::new();
        while let Some(kv) = iter.next().await? {
            if let Some(address) = address_from_key(&kv.key) {
                addresses.push(address.to_string());
            }
        }
        Ok(addresses)
    }

    async fn lock_exclusive(&self, address: &str) -> Result<ScopedLock, BackendError> {
        self.locks.lock_exclusive(address).await
    }

    async fn lock_shared(&self, address: &str) -> Result<ScopedLock, BackendError> {
        self.locks.lock_shared(address).await
    }
}
