use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::ScopedLock;
use crate::drive_register::{DriveRegister, DriveState, DriveStatusReport, DriveUpdate};
use crate::object::StoredObject;
use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::types::EntryLog;

impl ObjectStore {
    /// The drive register, locked exclusively and fetched.
    pub async fn get_or_create_drive_register(
        &self,
    ) -> Result<(ScopedLock, StoredObject<DriveRegister>), ObjectStoreError> {
        self.get_or_create_child::<DriveRegister>("").await
    }

    pub async fn add_drive(
        &self,
        drive_name: &str,
        logical_library: &str,
        creation_log: EntryLog,
    ) -> Result<(), ObjectStoreError> {
        let (lock, mut register) = self.get_or_create_drive_register().await?;
        register.add_drive(drive_name, logical_library, creation_log)?;
        register.commit(&lock).await?;
        info!(drive = %drive_name, library = %logical_library, "added drive");
        Ok(())
    }

    pub async fn report_drive_status(
        &self,
        report: &DriveStatusReport,
    ) -> Result<DriveUpdate, ObjectStoreError> {
        let (lock, mut register) = self.get_or_create_drive_register().await?;
        let update = register.report_drive_status(report)?;
        register.commit(&lock).await?;
        match update {
            DriveUpdate::Refreshed => {
                debug!(drive = %report.drive_name, status = ?report.status, "drive statistics refreshed")
            }
            _ => info!(drive = %report.drive_name, update = ?update, "drive status changed"),
        }
        Ok(update)
    }

    /// Every drive's state; empty when no register exists yet.
    pub async fn dump_drives(&self) -> Result<Vec<DriveState>, ObjectStoreError> {
        let root = self.fetch_root_entry().await?;
        let Some(address) = root.drive_register_address().map(str::to_string) else {
            return Ok(Vec::new());
        };
        let lock = self.backend.lock_shared(&address).await?;
        let register = StoredObject::<DriveRegister>::fetch(Arc::clone(&self.backend), &lock).await?;
        Ok(register.dump_drives().to_vec())
    }
}
