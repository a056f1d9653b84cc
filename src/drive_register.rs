//! Directory of tape drive states, updated by drive status reports.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::Serialize;

use crate::codec::{decode_drive_register, encode_drive_register, CodecError};
use crate::object::{ObjectKind, ObjectPayload};
use crate::object_store::ObjectStoreError;
use crate::types::EntryLog;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub enum DriveStatus {
    Down,
    Idle,
    Starting,
    Mounting,
    Transferring,
    Unloading,
    Unmounting,
    DrainingToDisk,
    CleaningUp,
    Up,
    Unknown,
    Shutdown,
    Probing,
}

impl DriveStatus {
    pub const ALL: [DriveStatus; 13] = [
        DriveStatus::Down,
        DriveStatus::Idle,
        DriveStatus::Starting,
        DriveStatus::Mounting,
        DriveStatus::Transferring,
        DriveStatus::Unloading,
        DriveStatus::Unmounting,
        DriveStatus::DrainingToDisk,
        DriveStatus::CleaningUp,
        DriveStatus::Up,
        DriveStatus::Unknown,
        DriveStatus::Shutdown,
        DriveStatus::Probing,
    ];

    pub fn requires_session_id(self) -> bool {
        matches!(
            self,
            DriveStatus::Starting
                | DriveStatus::Mounting
                | DriveStatus::Transferring
                | DriveStatus::Unloading
                | DriveStatus::Unmounting
                | DriveStatus::DrainingToDisk
                | DriveStatus::CleaningUp
        )
    }

    pub fn requires_vid(self) -> bool {
        matches!(
            self,
            DriveStatus::Mounting
                | DriveStatus::Transferring
                | DriveStatus::Unloading
                | DriveStatus::Unmounting
                | DriveStatus::DrainingToDisk
        )
    }

    pub fn requires_statistics(self) -> bool {
        matches!(
            self,
            DriveStatus::Transferring
                | DriveStatus::Unloading
                | DriveStatus::Unmounting
                | DriveStatus::DrainingToDisk
        )
    }

    pub fn is_session_less(self) -> bool {
        !self.requires_session_id()
    }

    /// Whether a drive may move from `self` to `to`. Down and Unknown can
    /// always be reported.
    pub fn can_transition_to(self, to: DriveStatus) -> bool {
        use DriveStatus::*;
        if matches!(to, Down | Unknown) {
            return true;
        }
        match self {
            Down | Idle | Up | Unknown | Probing | Shutdown => {
                matches!(to, Idle | Up | Probing | Shutdown | Starting)
            }
            Starting => matches!(to, Mounting | CleaningUp | Idle | Up),
            Mounting => matches!(to, Transferring | Unloading | CleaningUp),
            Transferring => matches!(to, DrainingToDisk | Unloading | CleaningUp),
            DrainingToDisk => matches!(to, Unloading | CleaningUp),
            Unloading => matches!(to, Unmounting | CleaningUp),
            Unmounting => matches!(to, Idle | Up | Shutdown | Starting | CleaningUp),
            CleaningUp => matches!(to, Idle | Up | Shutdown),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub enum MountType {
    #[default]
    NoMount,
    Archive,
    Retrieve,
    Label,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Default, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub struct TransferStats {
    pub bytes_transferred_in_session: u64,
    pub files_transferred_in_session: u64,
    /// Bytes per second.
    pub latest_bandwidth: f64,
}

/// Epoch ms at which the drive entered each phase of its current cycle.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub struct PhaseTimes {
    pub session_start: Option<i64>,
    pub mount_start: Option<i64>,
    pub transfer_start: Option<i64>,
    pub draining_start: Option<i64>,
    pub unload_start: Option<i64>,
    pub unmount_start: Option<i64>,
    pub cleanup_start: Option<i64>,
    pub probe_start: Option<i64>,
    pub shutdown_time: Option<i64>,
    pub down_or_up_start: Option<i64>,
}

impl PhaseTimes {
    fn enter(&mut self, status: DriveStatus, at: i64) {
        let slot = match status {
            DriveStatus::Down | DriveStatus::Up | DriveStatus::Idle | DriveStatus::Unknown => {
                &mut self.down_or_up_start
            }
            DriveStatus::Probing => &mut self.probe_start,
            DriveStatus::Shutdown => &mut self.shutdown_time,
            DriveStatus::Starting => &mut self.session_start,
            DriveStatus::Mounting => &mut self.mount_start,
            DriveStatus::Transferring => &mut self.transfer_start,
            DriveStatus::DrainingToDisk => &mut self.draining_start,
            DriveStatus::Unloading => &mut self.unload_start,
            DriveStatus::Unmounting => &mut self.unmount_start,
            DriveStatus::CleaningUp => &mut self.cleanup_start,
        };
        *slot = Some(at);
    }
}

#[derive(
    Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub struct DriveState {
    pub drive_name: String,
    pub logical_library: String,
    pub status: DriveStatus,
    pub mount_type: MountType,
    pub current_vid: Option<String>,
    pub current_tape_pool: Option<String>,
    pub session_id: Option<u64>,
    pub phase_times: PhaseTimes,
    pub stats: Option<TransferStats>,
    pub last_update_time: i64,
    pub creation_log: EntryLog,
}

/// A drive telling the register what it is doing.
#[derive(Debug, Clone, PartialEq)]
pub struct DriveStatusReport {
    pub drive_name: String,
    pub status: DriveStatus,
    pub mount_type: MountType,
    pub session_id: Option<u64>,
    pub vid: Option<String>,
    pub tape_pool: Option<String>,
    pub stats: Option<TransferStats>,
    pub report_time: i64,
}

impl DriveStatusReport {
    pub fn new(drive_name: impl Into<String>, status: DriveStatus, report_time: i64) -> Self {
        Self {
            drive_name: drive_name.into(),
            status,
            mount_type: MountType::NoMount,
            session_id: None,
            vid: None,
            tape_pool: None,
            stats: None,
            report_time,
        }
    }

    pub fn with_session(mut self, session_id: u64, mount_type: MountType) -> Self {
        self.session_id = Some(session_id);
        self.mount_type = mount_type;
        self
    }

    pub fn with_tape(mut self, vid: impl Into<String>, tape_pool: impl Into<String>) -> Self {
        self.vid = Some(vid.into());
        self.tape_pool = Some(tape_pool.into());
        self
    }

    pub fn with_stats(mut self, stats: TransferStats) -> Self {
        self.stats = Some(stats);
        self
    }

    fn validate(&self) -> Result<(), ObjectStoreError> {
        let status = self.status;
        if status.requires_session_id() && self.session_id.is_none() {
            return Err(ObjectStoreError::MissingSessionId(status));
        }
        if status.requires_vid() && self.vid.is_none() {
            return Err(ObjectStoreError::MissingVid(status));
        }
        if status.requires_statistics() && self.stats.is_none() {
            return Err(ObjectStoreError::MissingStatistics(status));
        }
        Ok(())
    }
}

/// What a status report did to the drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveUpdate {
    /// Same status, same session.
    Refreshed,
    /// Same status, a new session started.
    SessionRestarted,
    Transitioned { from: DriveStatus, to: DriveStatus },
}

#[derive(
    Debug, Clone, Default, PartialEq, Archive, RkyvSerialize, RkyvDeserialize, Serialize,
)]
#[archive(check_bytes)]
pub struct DriveRegister {
    drives: Vec<DriveState>,
}

impl DriveRegister {
    pub fn initialize() -> Self {
        Self::default()
    }

    pub fn add_drive(
        &mut self,
        drive_name: &str,
        logical_library: &str,
        creation_log: EntryLog,
    ) -> Result<(), ObjectStoreError> {
        if self.drives.iter().any(|d| d.drive_name == drive_name) {
            return Err(ObjectStoreError::DuplicateEntry(format!("drive {}", drive_name)));
        }
        let mut phase_times = PhaseTimes::default();
        phase_times.enter(DriveStatus::Down, creation_log.time);
        self.drives.push(DriveState {
            drive_name: drive_name.to_string(),
            logical_library: logical_library.to_string(),
            status: DriveStatus::Down,
            mount_type: MountType::NoMount,
            current_vid: None,
            current_tape_pool: None,
            session_id: None,
            phase_times,
            stats: None,
            last_update_time: creation_log.time,
            creation_log,
        });
        Ok(())
    }

    pub fn get_drive(&self, drive_name: &str) -> Result<&DriveState, ObjectStoreError> {
        self.drives
            .iter()
            .find(|d| d.drive_name == drive_name)
            .ok_or_else(|| ObjectStoreError::NoSuchDrive(drive_name.to_string()))
    }

    pub fn dump_drives(&self) -> &[DriveState] {
        &self.drives
    }

    pub fn is_empty(&self) -> bool {
        self.drives.is_empty()
    }

    /// Apply a status report. On error the drive is left untouched.
    pub fn report_drive_status(
        &mut self,
        report: &DriveStatusReport,
    ) -> Result<DriveUpdate, ObjectStoreError> {
        let drive = self
            .drives
            .iter_mut()
            .find(|d| d.drive_name == report.drive_name)
            .ok_or_else(|| ObjectStoreError::NoSuchDrive(report.drive_name.clone()))?;
        report.validate()?;

        let to = report.status;
        let from = drive.status;
        let same_session = to.is_session_less() || drive.session_id == report.session_id;

        if from == to && same_session {
            if to.requires_statistics() {
                drive.stats = report.stats;
            }
            drive.last_update_time = report.report_time;
            return Ok(DriveUpdate::Refreshed);
        }

        if from == to {
            if to != DriveStatus::Starting {
                return Err(ObjectStoreError::InvalidTransition { from, to });
            }
            enter_status(drive, report);
            return Ok(DriveUpdate::SessionRestarted);
        }

        let changes_session = !to.is_session_less()
            && to != DriveStatus::Starting
            && drive.session_id.is_some()
            && drive.session_id != report.session_id;
        if changes_session || !from.can_transition_to(to) {
            return Err(ObjectStoreError::InvalidTransition { from, to });
        }
        enter_status(drive, report);
        Ok(DriveUpdate::Transitioned { from, to })
    }
}

fn enter_status(drive: &mut DriveState, report: &DriveStatusReport) {
    let to = report.status;
    if to.is_session_less() {
        drive.phase_times = PhaseTimes::default();
        drive.session_id = None;
        drive.current_vid = None;
        drive.current_tape_pool = None;
        drive.mount_type = MountType::NoMount;
    } else if to == DriveStatus::Starting {
        drive.phase_times = PhaseTimes::default();
        drive.session_id = report.session_id;
        drive.mount_type = report.mount_type;
        drive.current_vid = report.vid.clone();
        drive.current_tape_pool = report.tape_pool.clone();
    } else {
        drive.session_id = report.session_id;
        drive.mount_type = report.mount_type;
        if report.vid.is_some() {
            drive.current_vid = report.vid.clone();
        }
        if report.tape_pool.is_some() {
            drive.current_tape_pool = report.tape_pool.clone();
        }
    }
    drive.stats = if to.requires_statistics() {
        report.stats
    } else {
        None
    };
    drive.phase_times.enter(to, report.report_time);
    drive.status = to;
    drive.last_update_time = report.report_time;
}

impl ObjectPayload for DriveRegister {
    const KIND: ObjectKind = ObjectKind::DriveRegister;

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_drive_register(self)
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        decode_drive_register(bytes)
    }
}
