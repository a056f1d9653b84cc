//! Top-level index of the object store.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::Serialize;

use crate::archive_queue::ArchiveQueue;
use crate::codec::{decode_root_entry, encode_root_entry, CodecError};
use crate::drive_register::DriveRegister;
use crate::keys::{archive_queue_prefix, retrieve_queue_prefix, DRIVE_REGISTER_PREFIX};
use crate::object::{ObjectKind, ObjectPayload};
use crate::object_store::ObjectStoreError;
use crate::retrieve_queue::RetrieveQueue;

#[derive(
    Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub struct QueuePointer {
    /// Tape pool or VID.
    pub name: String,
    pub address: String,
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub struct RootEntry {
    archive_queues: Vec<QueuePointer>,
    retrieve_queues: Vec<QueuePointer>,
    drive_register: Option<String>,
    agents: Vec<String>,
}

fn find_pointer<'a>(pointers: &'a [QueuePointer], name: &str) -> Option<&'a str> {
    pointers
        .iter()
        .find(|p| p.name == name)
        .map(|p| p.address.as_str())
}

fn insert_pointer(
    pointers: &mut Vec<QueuePointer>,
    what: &str,
    name: &str,
    address: &str,
) -> Result<(), ObjectStoreError> {
    if find_pointer(pointers, name).is_some() {
        return Err(ObjectStoreError::DuplicateEntry(format!("{} {}", what, name)));
    }
    pointers.push(QueuePointer {
        name: name.to_string(),
        address: address.to_string(),
    });
    Ok(())
}

fn remove_pointer(
    pointers: &mut Vec<QueuePointer>,
    what: &str,
    name: &str,
) -> Result<String, ObjectStoreError> {
    let idx = pointers
        .iter()
        .position(|p| p.name == name)
        .ok_or_else(|| ObjectStoreError::NotFound(format!("{} {}", what, name)))?;
    Ok(pointers.swap_remove(idx).address)
}

impl RootEntry {
    pub fn initialize() -> Self {
        Self::default()
    }

    pub fn archive_queue_address(&self, tapepool: &str) -> Option<&str> {
        find_pointer(&self.archive_queues, tapepool)
    }

    pub fn add_archive_queue(
        &mut self,
        tapepool: &str,
        address: &str,
    ) -> Result<(), ObjectStoreError> {
        insert_pointer(&mut self.archive_queues, "archive queue", tapepool, address)
    }

    pub fn remove_archive_queue(&mut self, tapepool: &str) -> Result<String, ObjectStoreError> {
        remove_pointer(&mut self.archive_queues, "archive queue", tapepool)
    }

    pub fn dump_archive_queues(&self) -> &[QueuePointer] {
        &self.archive_queues
    }

    pub fn retrieve_queue_address(&self, vid: &str) -> Option<&str> {
        find_pointer(&self.retrieve_queues, vid)
    }

    pub fn add_retrieve_queue(&mut self, vid: &str, address: &str) -> Result<(), ObjectStoreError> {
        insert_pointer(&mut self.retrieve_queues, "retrieve queue", vid, address)
    }

    pub fn remove_retrieve_queue(&mut self, vid: &str) -> Result<String, ObjectStoreError> {
        remove_pointer(&mut self.retrieve_queues, "retrieve queue", vid)
    }

    pub fn dump_retrieve_queues(&self) -> &[QueuePointer] {
        &self.retrieve_queues
    }

    pub fn drive_register_address(&self) -> Option<&str> {
        self.drive_register.as_deref()
    }

    pub fn set_drive_register(&mut self, address: &str) -> Result<(), ObjectStoreError> {
        if self.drive_register.is_some() {
            return Err(ObjectStoreError::DuplicateEntry("drive register".to_string()));
        }
        self.drive_register = Some(address.to_string());
        Ok(())
    }

    pub fn remove_drive_register(&mut self) -> Result<String, ObjectStoreError> {
        self.drive_register
            .take()
            .ok_or_else(|| ObjectStoreError::NotFound("drive register".to_string()))
    }

    pub fn register_agent(&mut self, address: &str) {
        if !self.agents.iter().any(|a| a == address) {
            self.agents.push(address.to_string());
        }
    }

    pub fn remove_agent(&mut self, address: &str) -> bool {
        match self.agents.iter().position(|a| a == address) {
            Some(idx) => {
                self.agents.swap_remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn dump_agents(&self) -> &[String] {
        &self.agents
    }
}

impl ObjectPayload for RootEntry {
    const KIND: ObjectKind = ObjectKind::RootEntry;

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_root_entry(self)
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        decode_root_entry(bytes)
    }
}

/// An object that the root entry points to by name. Queues are named by tape
/// pool or VID; the drive register is a singleton and ignores the name.
pub trait RootChild: ObjectPayload {
    fn create(name: &str) -> Self;
    fn address_prefix(name: &str) -> String;
    fn lookup<'a>(root: &'a RootEntry, name: &str) -> Option<&'a str>;
    fn link(root: &mut RootEntry, name: &str, address: &str) -> Result<(), ObjectStoreError>;
    fn unlink(root: &mut RootEntry, name: &str) -> Result<String, ObjectStoreError>;
    /// Name under which the root entry lists this object.
    fn root_name(&self) -> &str;
    /// Nothing in it would be lost by deleting it.
    fn is_collectable(&self) -> bool;

    fn is_referenced_by(&self, root: &RootEntry, address: &str) -> bool {
        Self::lookup(root, self.root_name()) == Some(address)
    }
}

impl RootChild for ArchiveQueue {
    fn create(name: &str) -> Self {
        ArchiveQueue::initialize(name)
    }
    fn address_prefix(name: &str) -> String {
        archive_queue_prefix(name)
    }
    fn lookup<'a>(root: &'a RootEntry, name: &str) -> Option<&'a str> {
        root.archive_queue_address(name)
    }
    fn link(root: &mut RootEntry, name: &str, address: &str) -> Result<(), ObjectStoreError> {
        root.add_archive_queue(name, address)
    }
    fn unlink(root: &mut RootEntry, name: &str) -> Result<String, ObjectStoreError> {
        root.remove_archive_queue(name)
    }
    fn root_name(&self) -> &str {
        self.tapepool()
    }
    fn is_collectable(&self) -> bool {
        self.is_empty()
    }
}

impl RootChild for RetrieveQueue {
    fn create(name: &str) -> Self {
        RetrieveQueue::initialize(name)
    }
    fn address_prefix(name: &str) -> String {
        retrieve_queue_prefix(name)
    }
    fn lookup<'a>(root: &'a RootEntry, name: &str) -> Option<&'a str> {
        root.retrieve_queue_address(name)
    }
    fn link(root: &mut RootEntry, name: &str, address: &str) -> Result<(), ObjectStoreError> {
        root.add_retrieve_queue(name, address)
    }
    fn unlink(root: &mut RootEntry, name: &str) -> Result<String, ObjectStoreError> {
        root.remove_retrieve_queue(name)
    }
    fn root_name(&self) -> &str {
        self.vid()
    }
    fn is_collectable(&self) -> bool {
        self.is_empty()
    }
}

impl RootChild for DriveRegister {
    fn create(_name: &str) -> Self {
        DriveRegister::initialize()
    }
    fn address_prefix(_name: &str) -> String {
        DRIVE_REGISTER_PREFIX.to_string()
    }
    fn lookup<'a>(root: &'a RootEntry, _name: &str) -> Option<&'a str> {
        root.drive_register_address()
    }
    fn link(root: &mut RootEntry, _name: &str, address: &str) -> Result<(), ObjectStoreError> {
        root.set_drive_register(address)
    }
    fn unlink(root: &mut RootEntry, _name: &str) -> Result<String, ObjectStoreError> {
        root.remove_drive_register()
    }
    fn root_name(&self) -> &str {
        ""
    }
    fn is_collectable(&self) -> bool {
        self.is_empty()
    }
}
