pub mod admin;
pub mod agent;
pub mod archive_queue;
pub mod backend;
pub mod codec;
pub mod drive_register;
pub mod gc;
pub mod keys;
pub mod object;
pub mod object_store;
pub mod queue_stats;
pub mod retrieve_queue;
pub mod retrieve_request;
pub mod retry;
pub mod root_entry;
pub mod settings;
pub mod slate_backend;
pub mod storage;
pub mod trace;
pub mod types;
pub mod value_count_map;

pub use tapeq_macros::test;
