//! Process identity used for ownership of objects in flight.
//!
//! Before an agent creates an object it records the address in its ownership
//! list; once the object is handed to a queue or the root entry the address is
//! dropped. If the agent dies, whatever is still listed is garbage-collected.

use std::sync::atomic::{AtomicU64, Ordering};

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::Serialize;
use uuid::Uuid;

use crate::codec::{decode_agent, encode_agent, CodecError};
use crate::keys::agent_address;
use crate::object::{ObjectKind, ObjectPayload};

/// In-memory handle on this process's agent object.
#[derive(Debug)]
pub struct AgentReference {
    address: String,
    counter: AtomicU64,
}

impl AgentReference {
    pub fn new(name: &str) -> Self {
        Self::with_address(agent_address(name, &Uuid::new_v4()))
    }

    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// A fresh object address: `<prefix>-<agent address>-<n>`.
    pub fn next_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", prefix, self.address, n)
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub struct Agent {
    description: String,
    owned_objects: Vec<String>,
    /// Epoch ms of the last heartbeat.
    heartbeat_time: i64,
}

impl Agent {
    pub fn initialize(description: impl Into<String>, now_ms: i64) -> Self {
        Self {
            description: description.into(),
            owned_objects: Vec::new(),
            heartbeat_time: now_ms,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn add_to_ownership(&mut self, address: &str) {
        if !self.owned_objects.iter().any(|a| a == address) {
            self.owned_objects.push(address.to_string());
        }
    }

    pub fn remove_from_ownership(&mut self, address: &str) -> bool {
        match self.owned_objects.iter().position(|a| a == address) {
            Some(idx) => {
                self.owned_objects.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn owned_objects(&self) -> &[String] {
        &self.owned_objects
    }

    pub fn heartbeat(&mut self, now_ms: i64) {
        self.heartbeat_time = now_ms;
    }

    pub fn heartbeat_time(&self) -> i64 {
        self.heartbeat_time
    }

    pub fn is_stale(&self, now_ms: i64, timeout_ms: i64) -> bool {
        now_ms.saturating_sub(self.heartbeat_time) > timeout_ms
    }
}

impl ObjectPayload for Agent {
    const KIND: ObjectKind = ObjectKind::Agent;

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_agent(self)
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        decode_agent(bytes)
    }
}
