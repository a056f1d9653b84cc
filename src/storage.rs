//! Opening the slatedb database that holds every queue object.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use slatedb::object_store::local::LocalFileSystem;
use slatedb::object_store::memory::InMemory;
use slatedb::object_store::ObjectStore;
use slatedb::{Db, DbBuilder, Error as SlateError};
use thiserror::Error;
use tracing::info;

use crate::settings::{StorageKind, StoreConfig};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("slatedb error: {0}")]
    Slate(#[from] SlateError),
    #[error("invalid object store location {path}: {reason}")]
    InvalidLocation { path: String, reason: String },
}

impl StorageError {
    fn location(path: &str, reason: impl ToString) -> Self {
        Self::InvalidLocation {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Object store for `kind` plus the path slatedb should use inside it.
fn object_store_for(
    kind: StorageKind,
    path: &str,
) -> Result<(Arc<dyn ObjectStore>, String), StorageError> {
    match kind {
        StorageKind::Fs => {
            let root = Path::new(path);
            fs::create_dir_all(root).map_err(|e| StorageError::location(path, e))?;
            // object_store escapes relative paths like "./x" inconsistently
            let canonical = root
                .canonicalize()
                .map_err(|e| StorageError::location(path, e))?
                .to_string_lossy()
                .into_owned();
            let local = LocalFileSystem::new_with_prefix(&canonical)
                .map_err(|e| StorageError::location(path, e))?;
            Ok((Arc::new(local), canonical))
        }
        StorageKind::Memory => Ok((Arc::new(InMemory::new()), path.to_string())),
        StorageKind::S3 | StorageKind::Gcs | StorageKind::Url => {
            Ok((Db::resolve_object_store(path)?, path.to_string()))
        }
    }
}

/// Build the database described by `cfg`.
pub async fn open_db(cfg: &StoreConfig) -> Result<Db, StorageError> {
    let (store, db_path) = object_store_for(cfg.backend, &cfg.path)?;
    let mut builder = DbBuilder::new(db_path.as_str(), store);
    if let Some(flush_ms) = cfg.flush_interval_ms {
        builder = builder.with_settings(slatedb::config::Settings {
            flush_interval: Some(Duration::from_millis(flush_ms)),
            ..Default::default()
        });
    }
    let db = builder.build().await?;
    info!(path = %db_path, backend = ?cfg.backend, "opened object store");
    Ok(db)
}
