//! Persisted objects: a versioned header carrying kind and ownership around a
//! versioned payload, and the lock → fetch → mutate → commit discipline.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::Bytes;
use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::Serialize;
use tracing::debug;

use crate::agent::Agent;
use crate::archive_queue::ArchiveQueue;
use crate::backend::{Backend, ScopedLock};
use crate::codec::{decode_header, encode_header, CodecError};
use crate::drive_register::DriveRegister;
use crate::object_store::ObjectStoreError;
use crate::retrieve_queue::RetrieveQueue;
use crate::retrieve_request::RetrieveRequest;
use crate::root_entry::RootEntry;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub enum ObjectKind {
    RootEntry,
    Agent,
    ArchiveQueue,
    RetrieveQueue,
    RetrieveRequest,
    DriveRegister,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::RootEntry => "RootEntry",
            ObjectKind::Agent => "Agent",
            ObjectKind::ArchiveQueue => "ArchiveQueue",
            ObjectKind::RetrieveQueue => "RetrieveQueue",
            ObjectKind::RetrieveRequest => "RetrieveRequest",
            ObjectKind::DriveRegister => "DriveRegister",
        };
        f.write_str(name)
    }
}

/// Envelope of every stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct ObjectHeader {
    pub kind: ObjectKind,
    /// Address of the object (agent, queue or root entry) responsible for this one.
    pub owner: String,
    pub backup_owner: String,
    /// Versioned encoding of the concrete object.
    pub payload: Vec<u8>,
}

/// A type that can live in the object store.
pub trait ObjectPayload: Sized + Send + Sync {
    const KIND: ObjectKind;

    fn encode(&self) -> Result<Vec<u8>, CodecError>;

    fn decode(bytes: &[u8]) -> Result<Self, CodecError>;

    /// Hook run before every insert and commit.
    fn prepare_for_commit(&mut self) {}
}

/// An object bound to its address, with the blob it was last read or written
/// as. That blob is the expected value of the next compare-and-swap commit.
pub struct StoredObject<P> {
    backend: Arc<dyn Backend>,
    address: String,
    owner: String,
    backup_owner: String,
    payload: P,
    committed: Option<Bytes>,
}

impl<P: ObjectPayload> StoredObject<P> {
    /// A fresh object that exists only in memory until `insert`.
    pub fn initialize(
        backend: Arc<dyn Backend>,
        address: impl Into<String>,
        owner: impl Into<String>,
        payload: P,
    ) -> Self {
        Self {
            backend,
            address: address.into(),
            owner: owner.into(),
            backup_owner: String::new(),
            payload,
            committed: None,
        }
    }

    pub async fn insert(&mut self) -> Result<(), ObjectStoreError> {
        let blob = self.serialize()?;
        self.backend.create(&self.address, blob.clone()).await?;
        self.committed = Some(blob);
        debug!(address = %self.address, kind = %P::KIND, owner = %self.owner, "inserted object");
        Ok(())
    }

    pub async fn fetch(
        backend: Arc<dyn Backend>,
        lock: &ScopedLock,
    ) -> Result<Self, ObjectStoreError> {
        Self::fetch_no_lock(backend, lock.address()).await
    }

    /// Read without a lock. The result may be stale and can still be
    /// committed only under an exclusive lock, where the CAS catches staleness.
    pub async fn fetch_no_lock(
        backend: Arc<dyn Backend>,
        address: &str,
    ) -> Result<Self, ObjectStoreError> {
        let blob = backend.fetch(address).await?;
        let header = decode_header(&blob)?;
        Self::from_header(backend, address, header, blob)
    }

    pub(crate) fn from_header(
        backend: Arc<dyn Backend>,
        address: &str,
        header: ObjectHeader,
        blob: Bytes,
    ) -> Result<Self, ObjectStoreError> {
        if header.kind != P::KIND {
            return Err(ObjectStoreError::WrongObjectKind {
                address: address.to_string(),
                expected: P::KIND,
                found: header.kind,
            });
        }
        let payload = P::decode(&header.payload)?;
        Ok(Self {
            backend,
            address: address.to_string(),
            owner: header.owner,
            backup_owner: header.backup_owner,
            payload,
            committed: Some(blob),
        })
    }

    pub async fn commit(&mut self, lock: &ScopedLock) -> Result<(), ObjectStoreError> {
        self.check_exclusive(lock)?;
        let expected = self.committed.clone().ok_or_else(|| {
            ObjectStoreError::NotFound(format!("object {} was never stored", self.address))
        })?;
        let blob = self.serialize()?;
        self.backend
            .commit(&self.address, &expected, blob.clone())
            .await?;
        self.committed = Some(blob);
        Ok(())
    }

    pub async fn remove(self, lock: &ScopedLock) -> Result<(), ObjectStoreError> {
        self.check_exclusive(lock)?;
        self.backend.remove(&self.address).await?;
        debug!(address = %self.address, kind = %P::KIND, "removed object");
        Ok(())
    }

    fn check_exclusive(&self, lock: &ScopedLock) -> Result<(), ObjectStoreError> {
        if lock.is_exclusive_on(&self.address) {
            Ok(())
        } else {
            Err(ObjectStoreError::NotLocked(self.address.clone()))
        }
    }

    fn serialize(&mut self) -> Result<Bytes, ObjectStoreError> {
        self.payload.prepare_for_commit();
        let header = ObjectHeader {
            kind: P::KIND,
            owner: self.owner.clone(),
            backup_owner: self.backup_owner.clone(),
            payload: self.payload.encode()?,
        };
        Ok(Bytes::from(encode_header(&header)?))
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn set_owner(&mut self, owner: impl Into<String>) {
        self.owner = owner.into();
    }

    pub fn backup_owner(&self) -> &str {
        &self.backup_owner
    }

    pub fn set_backup_owner(&mut self, owner: impl Into<String>) {
        self.backup_owner = owner.into();
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }
}

impl<P> Deref for StoredObject<P> {
    type Target = P;

    fn deref(&self) -> &P {
        &self.payload
    }
}

impl<P> DerefMut for StoredObject<P> {
    fn deref_mut(&mut self) -> &mut P {
        &mut self.payload
    }
}

impl<P: fmt::Debug> fmt::Debug for StoredObject<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredObject")
            .field("address", &self.address)
            .field("owner", &self.owner)
            .field("payload", &self.payload)
            .finish()
    }
}

/// An object of any kind, resolved once from its header.
pub enum AnyObject {
    RootEntry(StoredObject<RootEntry>),
    Agent(StoredObject<Agent>),
    ArchiveQueue(StoredObject<ArchiveQueue>),
    RetrieveQueue(StoredObject<RetrieveQueue>),
    RetrieveRequest(StoredObject<RetrieveRequest>),
    DriveRegister(StoredObject<DriveRegister>),
}

impl AnyObject {
    pub async fn fetch(
        backend: Arc<dyn Backend>,
        lock: &ScopedLock,
    ) -> Result<Self, ObjectStoreError> {
        Self::fetch_no_lock(backend, lock.address()).await
    }

    pub async fn fetch_no_lock(
        backend: Arc<dyn Backend>,
        address: &str,
    ) -> Result<Self, ObjectStoreError> {
        let blob = backend.fetch(address).await?;
        let header = decode_header(&blob)?;
        Ok(match header.kind {
            ObjectKind::RootEntry => {
                AnyObject::RootEntry(StoredObject::from_header(backend, address, header, blob)?)
            }
            ObjectKind::Agent => {
                AnyObject::Agent(StoredObject::from_header(backend, address, header, blob)?)
            }
            ObjectKind::ArchiveQueue => {
                AnyObject::ArchiveQueue(StoredObject::from_header(backend, address, header, blob)?)
            }
            ObjectKind::RetrieveQueue => AnyObject::RetrieveQueue(StoredObject::from_header(
                backend, address, header, blob,
            )?),
            ObjectKind::RetrieveRequest => AnyObject::RetrieveRequest(StoredObject::from_header(
                backend, address, header, blob,
            )?),
            ObjectKind::DriveRegister => AnyObject::DriveRegister(StoredObject::from_header(
                backend, address, header, blob,
            )?),
        })
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            AnyObject::RootEntry(_) => ObjectKind::RootEntry,
            AnyObject::Agent(_) => ObjectKind::Agent,
            AnyObject::ArchiveQueue(_) => ObjectKind::ArchiveQueue,
            AnyObject::RetrieveQueue(_) => ObjectKind::RetrieveQueue,
            AnyObject::RetrieveRequest(_) => ObjectKind::RetrieveRequest,
            AnyObject::DriveRegister(_) => ObjectKind::DriveRegister,
        }
    }

    pub fn address(&self) -> &str {
        match self {
            AnyObject::RootEntry(o) => o.address(),
            AnyObject::Agent(o) => o.address(),
            AnyObject::ArchiveQueue(o) => o.address(),
            AnyObject::RetrieveQueue(o) => o.address(),
            AnyObject::RetrieveRequest(o) => o.address(),
            AnyObject::DriveRegister(o) => o.address(),
        }
    }

    pub fn owner(&self) -> &str {
        match self {
            AnyObject::RootEntry(o) => o.owner(),
            AnyObject::Agent(o) => o.owner(),
            AnyObject::ArchiveQueue(o) => o.owner(),
            AnyObject::RetrieveQueue(o) => o.owner(),
            AnyObject::RetrieveRequest(o) => o.owner(),
            AnyObject::DriveRegister(o) => o.owner(),
        }
    }

    /// Human readable dump used by the admin CLI.
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        let payload = match self {
            AnyObject::RootEntry(o) => serde_json::to_value(o.payload())?,
            AnyObject::Agent(o) => serde_json::to_value(o.payload())?,
            AnyObject::ArchiveQueue(o) => serde_json::to_value(o.payload())?,
            AnyObject::RetrieveQueue(o) => serde_json::to_value(o.payload())?,
            AnyObject::RetrieveRequest(o) => serde_json::to_value(o.payload())?,
            AnyObject::DriveRegister(o) => serde_json::to_value(o.payload())?,
        };
        Ok(serde_json::json!({
            "address": self.address(),
            "kind": self.kind().to_string(),
            "owner": self.owner(),
            "payload": payload,
        }))
    }
}
