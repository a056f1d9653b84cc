/// Address of the root entry. Every other object is reachable from it or from
/// an agent's ownership list.
pub const ROOT_ENTRY_ADDRESS: &str = "root";

/// Prefix of every object blob in the slatedb keyspace.
pub const OBJECT_KEY_PREFIX: &str = "objects/";

/// The KV store key holding the blob stored at `address`.
pub fn object_key(address: &str) -> String {
    format!("{}{}", OBJECT_KEY_PREFIX, address)
}

/// Inverse of `object_key`; `None` for keys outside the object keyspace.
pub fn address_from_key(key: &[u8]) -> Option<&str> {
    std::str::from_utf8(key)
        .ok()
        .and_then(|k| k.strip_prefix(OBJECT_KEY_PREFIX))
}

pub fn archive_queue_prefix(tapepool: &str) -> String {
    format!("ArchiveQueue-{}", tapepool)
}

pub fn retrieve_queue_prefix(vid: &str) -> String {
    format!("RetrieveQueue-{}", vid)
}

pub fn retrieve_request_prefix(archive_file_id: u64) -> String {
    format!("RetrieveRequest-{}", archive_file_id)
}

pub const DRIVE_REGISTER_PREFIX: &str = "DriveRegister";

pub fn agent_address(name: &str, instance: &uuid::Uuid) -> String {
    format!("Agent-{}-{}", name, instance)
}
