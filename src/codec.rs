//! Versioned rkyv encoding of every persisted object.
//!
//! Each blob is a single version byte followed by an rkyv archive. Objects are
//! stored as an [`ObjectHeader`] whose `payload` is itself a versioned blob of
//! the concrete object type, so the header can be inspected (kind, owner)
//! without knowing the payload schema.

use rkyv::AlignedVec;
use thiserror::Error;

use crate::agent::Agent;
use crate::archive_queue::ArchiveQueue;
use crate::drive_register::DriveRegister;
use crate::object::ObjectHeader;
use crate::retrieve_queue::RetrieveQueue;
use crate::retrieve_request::RetrieveRequest;
use crate::root_entry::RootEntry;

/// Why a blob could not be decoded.
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    #[error("data too short to contain version header")]
    TooShort,
    #[error("unsupported version: expected {expected}, found {found}")]
    UnsupportedVersion { expected: u8, found: u8 },
    #[error("rkyv error: {0}")]
    Rkyv(String),
}

// Bump a version when the matching schema changes and add migration logic to
// the decode function.

pub const OBJECT_HEADER_VERSION: u8 = 1;
pub const ROOT_ENTRY_VERSION: u8 = 1;
pub const AGENT_VERSION: u8 = 1;
pub const ARCHIVE_QUEUE_VERSION: u8 = 1;
pub const RETRIEVE_QUEUE_VERSION: u8 = 1;
pub const RETRIEVE_REQUEST_VERSION: u8 = 1;
pub const DRIVE_REGISTER_VERSION: u8 = 1;

/// One version byte precedes every archive.
/// Decoding copies the archive into an `AlignedVec`, so blobs need no alignment.
const VERSION_HEADER_SIZE: usize = 1;

#[inline]
fn prepend_version(version: u8, data: AlignedVec) -> Vec<u8> {
    let mut result = Vec::with_capacity(VERSION_HEADER_SIZE + data.len());
    result.push(version);
    result.extend_from_slice(&data);
    result
}

/// Strip and validate the version byte, copying the rest into an AlignedVec
/// so rkyv can validate it in place.
#[inline]
fn strip_version(expected: u8, data: &[u8]) -> Result<AlignedVec, CodecError> {
    if data.len() < VERSION_HEADER_SIZE {
        return Err(CodecError::TooShort);
    }
    let found = data[0];
    if found != expected {
        return Err(CodecError::UnsupportedVersion { expected, found });
    }
    let rkyv_data = &data[VERSION_HEADER_SIZE..];
    let mut aligned = AlignedVec::with_capacity(rkyv_data.len());
    aligned.extend_from_slice(rkyv_data);
    Ok(aligned)
}

/// Read the version byte without decoding anything else.
pub fn peek_version(data: &[u8]) -> Result<u8, CodecError> {
    data.first().copied().ok_or(CodecError::TooShort)
}

macro_rules! versioned_codec {
    ($encode:ident, $decode:ident, $ty:ty, $version:expr) => {
        #[inline]
        pub fn $encode(value: &$ty) -> Result<Vec<u8>, CodecError> {
            let data = rkyv::to_bytes::<$ty, 1024>(value)
                .map_err(|e| CodecError::Rkyv(e.to_string()))?;
            Ok(prepend_version($version, data))
        }

        #[inline]
        pub fn $decode(bytes: &[u8]) -> Result<$ty, CodecError> {
            let data = strip_version($version, bytes)?;
            let archived = rkyv::check_archived_root::<$ty>(&data)
                .map_err(|e| CodecError::Rkyv(e.to_string()))?;
            let mut des = rkyv::Infallible;
            Ok(rkyv::Deserialize::<$ty, _>::deserialize(archived, &mut des)
                .unwrap_or_else(|_| unreachable!(concat!(
                    "infallible deserialization for ",
                    stringify!($ty)
                ))))
        }
    };
}

versioned_codec!(encode_header, decode_header, ObjectHeader, OBJECT_HEADER_VERSION);
versioned_codec!(encode_root_entry, decode_root_entry, RootEntry, ROOT_ENTRY_VERSION);
versioned_codec!(encode_agent, decode_agent, Agent, AGENT_VERSION);
versioned_codec!(
    encode_archive_queue,
    decode_archive_queue,
    ArchiveQueue,
    ARCHIVE_QUEUE_VERSION
);
versioned_codec!(
    encode_retrieve_queue,
    decode_retrieve_queue,
    RetrieveQueue,
    RETRIEVE_QUEUE_VERSION
);
versioned_codec!(
    encode_retrieve_request,
    decode_retrieve_request,
    RetrieveRequest,
    RETRIEVE_REQUEST_VERSION
);
versioned_codec!(
    encode_drive_register,
    decode_drive_register,
    DriveRegister,
    DRIVE_REGISTER_VERSION
);
