//! High level operations on a connected brain or controller
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::commands::file::{
    EraseFile, ExitFileTransfer, FileClearUp, FileEntry, GetDirectoryEntry,
    GetDirectoryFileCount, GetProgramSlotInfo, LoadFileAction, ProgramTarget,
};
use crate::commands::kv::{ReadKeyValue, WriteKeyValue};
use crate::commands::remote::{
    GetMatchStatus, MatchStatusReply, SendDashTouch, SwitchChannel, UpdateMatchMode,
};
use crate::commands::simple::SystemVersionReply;
use crate::commands::system::{GetSystemStatus, SystemStatusReply};
use crate::connection::Connection;
use crate::errors::{DeviceError, TransferError};
use crate::v5::meta::{
    FileExitAction, FileLoadAction, FileTransferTarget, FileVendor, MatchMode,
    V5ControllerChannel,
};
use crate::v5::USER_PROG_CHUNK_START;

pub mod file;

pub use file::{FileBasicInfo, FileWriteRequest, LinkedFile};

/// Vendor the cold library of a program is stored under
pub const COLD_LIBRARY_VENDOR: FileVendor = FileVendor::Dev2;

const CLEAR_UP_TIMEOUT: Duration = Duration::from_secs(30);

/// Timings of the controller channel switch around a wireless upload
const CHANNEL_SETTLE: Duration = Duration::from_millis(250);
const BRAIN_POLL_TIMEOUT: Duration = Duration::from_millis(150);
const BRAIN_POLL_INTERVAL: Duration = Duration::from_millis(200);
const BRAIN_WAIT: Duration = Duration::from_secs(10);

/// How a program gets stored on the brain.
///
/// `name`, `slot`, `icon` and `description` describe the program in its
/// descriptor file, which callers render themselves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramConfig {
    /// Every file of the program is named after this, e.g. `slot_1`
    pub base_name: String,
    /// Run the program once it is uploaded
    pub autorun: bool,
    /// Name shown on the brain
    pub name: String,
    /// Slot index, numbered from 0. The brain shows it as `slot + 1`.
    pub slot: u8,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub description: String,
}

impl ProgramConfig {
    /// The config of the program in slot `index`, numbered from 0.
    ///
    /// Files are named after the slot the brain shows, so index 0 is
    /// stored as `slot_1`.
    pub fn slot(index: u8) -> Self {
        let shown = u16::from(index) + 1;
        ProgramConfig {
            base_name: format!("slot_{}", shown),
            autorun: true,
            name: format!("Slot {}", shown),
            slot: index,
            icon: String::new(),
            description: String::new(),
        }
    }

    pub fn descriptor_name(&self) -> String {
        format!("{}.ini", self.base_name)
    }

    pub fn cold_name(&self) -> String {
        format!("{}_lib.bin", self.base_name)
    }

    pub fn hot_name(&self) -> String {
        format!("{}.bin", self.base_name)
    }
}

/// The file of a program being uploaded
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProgramPart {
    Descriptor,
    Cold,
    Hot,
}

impl std::fmt::Display for ProgramPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ProgramPart::Descriptor => "INI",
            ProgramPart::Cold => "COLD",
            ProgramPart::Hot => "BIN",
        })
    }
}

/// A file as listed by [`V5Device::list_files`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileHandle {
    pub vendor: FileVendor,
    pub entry: FileEntry,
}

impl FileHandle {
    pub fn name(&self) -> &str {
        &self.entry.filename
    }

    pub fn size(&self) -> u32 {
        self.entry.metadata.size
    }
}

/// A program stored on the brain
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramInfo {
    pub name: String,
    pub binary_name: String,
    /// Descriptor and binary together
    pub size: u32,
    /// Unix time the binary was written
    pub timestamp: u64,
    pub slot: Option<u8>,
    pub requested_slot: Option<u8>,
}

/// Clears the transfer flag when dropped
struct TransferGuard<'a>(&'a AtomicBool);

impl<'a> TransferGuard<'a> {
    fn new(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        TransferGuard(flag)
    }
}

impl Drop for TransferGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A V5 brain, reached directly or through a controller
#[derive(Clone)]
pub struct V5Device {
    connection: Connection,
    transferring: Arc<AtomicBool>,
}

impl V5Device {
    pub fn new(connection: Connection) -> Self {
        V5Device {
            connection,
            transferring: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// True while a file transfer is running. Periodic status polling
    /// should pause meanwhile.
    pub fn is_transferring(&self) -> bool {
        self.transferring.load(Ordering::SeqCst)
    }

    /// True when the device is a controller talking to the brain by radio
    pub fn is_controller(&self) -> bool {
        self.connection
            .endpoint_info()
            .map(|info| info.is_controller())
            .unwrap_or(false)
    }

    pub async fn system_version(&self) -> Result<Option<SystemVersionReply>, DeviceError> {
        self.connection.system_version().await
    }

    pub async fn system_status(&self) -> Result<Option<SystemStatusReply>, DeviceError> {
        self.connection.system_status().await
    }

    pub async fn match_status(&self) -> Result<Option<MatchStatusReply>, DeviceError> {
        self.connection.request(&GetMatchStatus).await
    }

    /// Reads a value from the brain's key-value store
    pub async fn get_value(&self, key: &str) -> Result<Option<String>, DeviceError> {
        Ok(self
            .connection
            .request(&ReadKeyValue(key))
            .await?
            .map(|reply| reply.value))
    }

    pub async fn set_value(&self, key: &str, value: &str) -> Result<bool, DeviceError> {
        Ok(self
            .connection
            .request(&WriteKeyValue(key, value))
            .await?
            .is_some())
    }

    /// Lists the files of a vendor. Returns `None` when a listing request
    /// went unanswered.
    pub async fn list_files(&self, vendor: FileVendor) -> Result<Option<Vec<FileHandle>>, DeviceError> {
        let count = match self.connection.request(&GetDirectoryFileCount(vendor)).await? {
            Some(reply) => reply.count,
            None => return Ok(None),
        };
        debug!("{} files under {:?}", count, vendor);

        let mut files = Vec::new();
        for index in 0..count.min(u8::MAX as u16 + 1) {
            let reply = match self
                .connection
                .request(&GetDirectoryEntry(index as u8))
                .await?
            {
                Some(reply) => reply,
                None => return Ok(None),
            };

            // Entries can vanish between the count and the fetch
            if let Some(entry) = reply.file {
                files.push(FileHandle { vendor, entry });
            }
        }

        Ok(Some(files))
    }

    /// Lists the user programs.
    ///
    /// A program is a descriptor `<name>.ini` next to a binary
    /// `<name>.bin`. Descriptors without a binary are left out.
    pub async fn list_programs(&self) -> Result<Option<Vec<ProgramInfo>>, DeviceError> {
        let files = match self.list_files(FileVendor::User).await? {
            Some(files) => files,
            None => return Ok(None),
        };

        let mut programs = Vec::new();
        for ini in &files {
            let name = match ini.name().strip_suffix(".ini") {
                Some(name) if !name.is_empty() => name,
                _ => continue,
            };
            if ini.size() == 0 {
                continue;
            }

            let binary_name = format!("{}.bin", name);
            let bin = match files.iter().find(|f| f.name() == binary_name) {
                Some(bin) if bin.size() > 0 && bin.entry.metadata.timestamp > 0 => bin,
                _ => continue,
            };

            let slot_info = self
                .connection
                .request(&GetProgramSlotInfo {
                    vendor: FileVendor::User,
                    name: binary_name.clone(),
                })
                .await?;

            programs.push(ProgramInfo {
                name: name.to_string(),
                binary_name,
                size: ini.size() + bin.size(),
                timestamp: bin.entry.metadata.timestamp,
                slot: slot_info.map(|info| info.slot),
                requested_slot: slot_info.map(|info| info.requested_slot),
            });
        }

        Ok(Some(programs))
    }

    /// Downloads a file
    pub async fn download_file(
        &self,
        file: &FileBasicInfo,
        target: FileTransferTarget,
        progress: impl FnMut(u32, u32),
    ) -> Result<Vec<u8>, TransferError> {
        let _guard = TransferGuard::new(&self.transferring);
        file::download_file(&self.connection, file, target, progress).await
    }

    /// Downloads a file from flash. A bare name is looked up in the user
    /// vendor.
    pub async fn read_file(
        &self,
        file: impl Into<FileBasicInfo>,
        progress: impl FnMut(u32, u32),
    ) -> Result<Vec<u8>, TransferError> {
        self.download_file(&file.into(), FileTransferTarget::Qspi, progress)
            .await
    }

    /// Uploads a single file
    pub async fn write_file(
        &self,
        request: &FileWriteRequest<'_>,
        progress: impl FnMut(u32, u32),
    ) -> Result<(), TransferError> {
        let _guard = TransferGuard::new(&self.transferring);
        file::upload_file(&self.connection, request, progress).await
    }

    /// Uploads a program.
    ///
    /// The descriptor goes first, then the cold library when there is one,
    /// then the hot binary linked against it. Through a controller, the
    /// radio is moved to the download channel for the upload and back to
    /// the pit channel afterwards.
    pub async fn upload_program(
        &self,
        config: &ProgramConfig,
        descriptor: &[u8],
        hot: &[u8],
        cold: Option<&[u8]>,
        mut progress: impl FnMut(ProgramPart, u32, u32),
    ) -> Result<(), TransferError> {
        let _guard = TransferGuard::new(&self.transferring);
        let through_controller = self.is_controller();

        if through_controller {
            tokio::time::sleep(CHANNEL_SETTLE).await;
            info!("Switching the controller to the download channel");
            self.switch_channel_and_wait(V5ControllerChannel::Download)
                .await?;
        }

        let mut descriptor_request = FileWriteRequest::new(config.descriptor_name(), descriptor);
        descriptor_request.auto_run = false;
        file::upload_file(&self.connection, &descriptor_request, |c, t| {
            progress(ProgramPart::Descriptor, c, t)
        })
        .await?;

        let linked_file = match cold {
            Some(cold) => {
                let mut cold_request = FileWriteRequest::new(config.cold_name(), cold);
                cold_request.vendor = COLD_LIBRARY_VENDOR;
                file::upload_file(&self.connection, &cold_request, |c, t| {
                    progress(ProgramPart::Cold, c, t)
                })
                .await?;

                Some(LinkedFile {
                    name: config.cold_name(),
                    vendor: Some(COLD_LIBRARY_VENDOR),
                })
            }
            None => None,
        };

        let mut hot_request = FileWriteRequest::new(config.hot_name(), hot);
        if linked_file.is_some() {
            hot_request.load_address = USER_PROG_CHUNK_START;
        }
        hot_request.auto_run = config.autorun;
        hot_request.linked_file = linked_file;
        file::upload_file(&self.connection, &hot_request, |c, t| {
            progress(ProgramPart::Hot, c, t)
        })
        .await?;

        if through_controller {
            if !self.connection.is_connected() {
                return Err(DeviceError::NotConnected.into());
            }
            info!("Switching the controller back to the pit channel");
            self.switch_channel_and_wait(V5ControllerChannel::Pit).await?;
        }

        info!("Uploaded program {}", config.base_name);
        Ok(())
    }

    async fn switch_channel_and_wait(
        &self,
        channel: V5ControllerChannel,
    ) -> Result<(), TransferError> {
        if !self.change_channel(channel).await? {
            return Err(TransferError::ChannelSwitch(channel));
        }
        tokio::time::sleep(CHANNEL_SETTLE).await;

        if !self.wait_for_brain().await? {
            warn!("The brain did not come back on the {:?} channel", channel);
        }
        Ok(())
    }

    /// Polls the brain until it answers a status request
    async fn wait_for_brain(&self) -> Result<bool, DeviceError> {
        let deadline = tokio::time::Instant::now() + BRAIN_WAIT;
        loop {
            let status = self
                .connection
                .request_with_timeout(&GetSystemStatus, BRAIN_POLL_TIMEOUT)
                .await?;
            if status.is_some() {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(BRAIN_POLL_INTERVAL).await;
        }
    }

    /// Erases a file. A bare name is looked up in the user vendor.
    pub async fn remove_file(&self, file: impl Into<FileBasicInfo>) -> Result<bool, DeviceError> {
        let file = file.into();
        let erased = self
            .connection
            .request(&EraseFile {
                vendor: file.vendor,
                name: file.name.clone(),
            })
            .await?;
        let exited = self
            .connection
            .request(&ExitFileTransfer(FileExitAction::Halt))
            .await?;

        Ok(erased.is_some() && exited.is_some())
    }

    /// Erases every user file
    pub async fn remove_all_files(&self) -> Result<bool, DeviceError> {
        Ok(self
            .connection
            .request_with_timeout(&FileClearUp(FileVendor::User), CLEAR_UP_TIMEOUT)
            .await?
            .is_some())
    }

    /// Runs a program by slot or by name
    pub async fn load_program(&self, target: ProgramTarget) -> Result<bool, DeviceError> {
        Ok(self
            .connection
            .request(&LoadFileAction {
                vendor: FileVendor::User,
                action: FileLoadAction::Run,
                target,
            })
            .await?
            .is_some())
    }

    /// Stops the running program
    pub async fn stop_program(&self) -> Result<bool, DeviceError> {
        Ok(self
            .connection
            .request(&LoadFileAction {
                vendor: FileVendor::User,
                action: FileLoadAction::Stop,
                target: ProgramTarget::Name(String::new()),
            })
            .await?
            .is_some())
    }

    pub async fn set_match_mode(&self, mode: MatchMode) -> Result<bool, DeviceError> {
        Ok(self
            .connection
            .request(&UpdateMatchMode {
                mode,
                match_clock: 0,
            })
            .await?
            .is_some())
    }

    /// Moves the controller's radio to another channel
    pub async fn change_channel(&self, channel: V5ControllerChannel) -> Result<bool, DeviceError> {
        Ok(self
            .connection
            .request(&SwitchChannel(channel))
            .await?
            .is_some())
    }

    /// Touches the brain's screen at (`x`, `y`)
    pub async fn mock_touch(&self, x: u16, y: u16, pressed: bool) -> Result<bool, DeviceError> {
        Ok(self
            .connection
            .request(&SendDashTouch { x, y, pressed })
            .await?
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_file_names() {
        let config = ProgramConfig::slot(2);
        assert_eq!(config.descriptor_name(), "slot_3.ini");
        assert_eq!(config.cold_name(), "slot_3_lib.bin");
        assert_eq!(config.hot_name(), "slot_3.bin");
        assert_eq!(config.slot, 2);
        assert!(config.autorun);
    }

    #[test]
    fn last_slot_index_does_not_overflow() {
        let config = ProgramConfig::slot(u8::MAX);
        assert_eq!(config.base_name, "slot_256");
        assert_eq!(config.slot, u8::MAX);
    }

    #[test]
    fn transfer_flag_follows_guard() {
        let flag = AtomicBool::new(false);
        {
            let _guard = TransferGuard::new(&flag);
            assert!(flag.load(Ordering::SeqCst));
        }
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    fn part_names() {
        assert_eq!(ProgramPart::Descriptor.to_string(), "INI");
        assert_eq!(ProgramPart::Hot.to_string(), "BIN");
    }
}
