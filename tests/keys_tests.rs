use tapeq::keys::{
    address_from_key, agent_address, archive_queue_prefix, object_key, retrieve_queue_prefix,
    retrieve_request_prefix, OBJECT_KEY_PREFIX,
};
use tapeq::agent::AgentReference;

#[test]
fn object_keys_roundtrip() {
    let key = object_key("RetrieveQueue-V1-agent-0");
    assert!(key.starts_with(OBJECT_KEY_PREFIX));
    assert_eq!(address_from_key(key.as_bytes()), Some("RetrieveQueue-V1-agent-0"));
    assert_eq!(address_from_key(b"other/RetrieveQueue"), None);
}

#[test]
fn prefixes_name_the_object_kind() {
    assert_eq!(archive_queue_prefix("pool1"), "ArchiveQueue-pool1");
    assert_eq!(retrieve_queue_prefix("V00001"), "RetrieveQueue-V00001");
    assert_eq!(retrieve_request_prefix(42), "RetrieveRequest-42");
}

#[test]
fn agent_ids_are_unique_and_scoped() {
    let id = uuid::Uuid::new_v4();
    let address = agent_address("tapesrv01", &id);
    assert!(address.starts_with("Agent-tapesrv01-"));
    assert_ne!(address, agent_address("tapesrv01", &uuid::Uuid::new_v4()));

    let agent = AgentReference::with_address(address.clone());
    let first = agent.next_id("ArchiveQueue-pool1");
    let second = agent.next_id("ArchiveQueue-pool1");
    assert_ne!(first, second);
    assert_eq!(first, format!("ArchiveQueue-pool1-{address}-0"));
}
