//! Commands that deal with files on the brain
use byteorder::{ByteOrder, LittleEndian};

use super::{put_name, Command};
use crate::checks::crc32;
use crate::errors::{DecodeError, VexAckType};
use crate::responses::{DecodeReply, HostFrame};
use crate::v5::meta::{
    FileExitAction, FileInitAction, FileInitOptions, FileLoadAction, FileTransferTarget,
    FileVendor,
};
use crate::v5::{j2000_timestamp, CDC2_COMMAND, J2000_EPOCH};
use crate::version::VexFirmwareVersion;

/// Metadata the brain keeps about a stored file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileMetadata {
    pub load_address: u32,
    pub size: u32,
    pub crc32: u32,
    /// Up to four characters, usually the extension
    pub file_type: String,
    /// Unix time in seconds
    pub timestamp: u64,
    pub version: VexFirmwareVersion,
}

impl FileMetadata {
    /// The timestamp as a date, if it is representable
    pub fn modified(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp(self.timestamp as i64, 0)
    }
}

/// A file as listed in a directory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub index: u8,
    pub filename: String,
    pub metadata: FileMetadata,
}

/// The file type sent in an init packet. Derived from the extension of
/// `name` unless given, and compressed binaries count as binaries.
fn file_type_for(name: &str, file_type: Option<&str>) -> String {
    match file_type {
        Some(t) => t.to_string(),
        None => {
            let ext = match name.rfind('.') {
                Some(i) => &name[i + 1..],
                None => "",
            };
            if ext == "gz" {
                "bin".to_string()
            } else {
                ext.to_string()
            }
        }
    }
}

/// Raw file control command. The only known use is switching the
/// controller's radio channel.
#[derive(Copy, Clone, Debug)]
pub struct FileControl(pub u8, pub u8);

impl Command for FileControl {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x10);
    type Reply = FileControlReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        Some(vec![self.0, self.1])
    }
}

ack_reply!(FileControlReply, CDC2_COMMAND, 0x10);

/// Initializes a file transfer between the brain and host
#[derive(Clone, Debug)]
pub struct InitFileTransfer {
    pub action: FileInitAction,
    pub target: FileTransferTarget,
    pub vendor: FileVendor,
    pub options: FileInitOptions,
    pub file_size: u32,
    pub load_address: u32,
    pub crc32: u32,
    pub file_type: String,
    /// Seconds since the J2000 epoch
    pub timestamp: u32,
    pub version: VexFirmwareVersion,
    pub name: String,
}

impl InitFileTransfer {
    /// Opens a session that writes `data` to `name`.
    /// The CRC32 of the data is computed here.
    pub fn write(
        target: FileTransferTarget,
        vendor: FileVendor,
        options: FileInitOptions,
        data: &[u8],
        load_address: u32,
        name: &str,
        file_type: Option<&str>,
    ) -> Self {
        InitFileTransfer {
            action: FileInitAction::Write,
            target,
            vendor,
            options,
            file_size: data.len() as u32,
            load_address,
            crc32: crc32(data, 0),
            file_type: file_type_for(name, file_type),
            timestamp: j2000_timestamp(),
            version: VexFirmwareVersion::new(1, 0, 0, 0),
            name: name.to_string(),
        }
    }

    /// Opens a session that reads `name` back
    pub fn read(
        target: FileTransferTarget,
        vendor: FileVendor,
        load_address: u32,
        name: &str,
    ) -> Self {
        InitFileTransfer {
            action: FileInitAction::Read,
            target,
            vendor,
            options: FileInitOptions::NONE,
            file_size: 0,
            load_address,
            crc32: 0,
            file_type: String::new(),
            timestamp: j2000_timestamp(),
            version: VexFirmwareVersion::new(1, 0, 0, 0),
            name: name.to_string(),
        }
    }
}

impl Command for InitFileTransfer {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x11);
    type Reply = InitFileTransferReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        let mut payload = vec![0u8; 52];

        // Load the function, target, vid, and options
        payload[0] = self.action as u8;
        payload[1] = self.target as u8;
        payload[2] = self.vendor.into();
        payload[3] = self.options.bits();

        LittleEndian::write_u32(&mut payload[4..8], self.file_size);
        LittleEndian::write_u32(&mut payload[8..12], self.load_address);

        // Only uploads carry a checksum
        let crc = match self.action {
            FileInitAction::Write => self.crc32,
            FileInitAction::Read => 0,
        };
        LittleEndian::write_u32(&mut payload[12..16], crc);

        put_name(&mut payload[16..20], &self.file_type, 4);
        LittleEndian::write_u32(&mut payload[20..24], self.timestamp);
        payload[24..28].copy_from_slice(&self.version.to_bytes(false));

        // Long names keep their last 23 bytes, so the extension survives.
        // Byte 51 stays zero as the terminator.
        let name = self.name.as_bytes();
        let start = name.len().saturating_sub(23);
        payload[28..28 + (name.len() - start)].copy_from_slice(&name[start..]);

        Some(payload)
    }
}

/// The brain's answer to [`InitFileTransfer`]
///
/// # Members
///
/// * `window_size` - The largest chunk the brain accepts per packet
/// * `file_size` - Size of the file on the brain. Only meaningful for reads.
/// * `crc32` - CRC32 of the file on the brain
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InitFileTransferReply {
    pub window_size: u16,
    pub file_size: u32,
    pub crc32: u32,
}

impl DecodeReply for InitFileTransferReply {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x11);

    fn decode(frame: &HostFrame) -> Result<Self, DecodeError> {
        let mut cursor = frame.cursor();

        Ok(InitFileTransferReply {
            window_size: cursor.next_u16()?,
            file_size: cursor.next_u32()?,
            crc32: cursor.next_u32()?,
        })
    }
}

/// Ends a transfer session and tells the brain what to do next
#[derive(Copy, Clone, Debug)]
pub struct ExitFileTransfer(pub FileExitAction);

impl Command for ExitFileTransfer {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x12);
    type Reply = ExitFileTransferReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        Some(vec![self.0 as u8])
    }
}

ack_reply!(ExitFileTransferReply, CDC2_COMMAND, 0x12);

/// Writes one chunk of an open upload at `address`
#[derive(Clone, Debug)]
pub struct WriteFile<'a> {
    pub address: u32,
    pub data: &'a [u8],
}

impl<'a> Command for WriteFile<'a> {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x13);
    type Reply = WriteFileReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        let mut payload = vec![0u8; 4];
        LittleEndian::write_u32(&mut payload, self.address);
        payload.extend_from_slice(self.data);
        Some(payload)
    }
}

ack_reply!(WriteFileReply, CDC2_COMMAND, 0x13);

/// Reads one chunk of an open download at `address`
#[derive(Copy, Clone, Debug)]
pub struct ReadFile {
    pub address: u32,
    pub size: u16,
}

impl Command for ReadFile {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x14);
    type Reply = ReadFileReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        let mut payload = vec![0u8; 6];
        LittleEndian::write_u32(&mut payload[0..4], self.address);
        LittleEndian::write_u16(&mut payload[4..6], self.size);
        Some(payload)
    }
}

/// A chunk of file data. This reply has no ack byte: the address
/// follows the extended id directly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadFileReply {
    pub address: u32,
    pub data: Vec<u8>,
}

impl DecodeReply for ReadFileReply {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x14);

    fn decode(frame: &HostFrame) -> Result<Self, DecodeError> {
        let mut cursor = frame.cursor_at(frame.ack_index());
        let address = cursor.next_u32()?;

        // Extended id, address and CRC are not data
        let length = frame.payload_size().saturating_sub(7);
        let data = cursor.take(length)?.to_vec();

        Ok(ReadFileReply { address, data })
    }

    /// A bare status reply must be an ACK. Anything longer carries data.
    fn is_valid(frame: &HostFrame) -> bool {
        if frame.payload_size() == 4 {
            frame.ack() == Some(0x76)
        } else {
            true
        }
    }
}

/// Links the file being uploaded to another file, usually a library
#[derive(Clone, Debug)]
pub struct LinkFile {
    pub vendor: FileVendor,
    pub name: String,
    pub options: u8,
}

impl Command for LinkFile {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x15);
    type Reply = LinkFileReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        Some(vendor_name_payload(self.vendor, self.options, &self.name))
    }
}

ack_reply!(LinkFileReply, CDC2_COMMAND, 0x15);

/// The 26 byte vendor, option, name payload shared by several file commands
fn vendor_name_payload(vendor: FileVendor, option: u8, name: &str) -> Vec<u8> {
    let mut payload = vec![0u8; 26];
    payload[0] = vendor.into();
    payload[1] = option;
    put_name(&mut payload[2..], name, 23);
    payload
}

/// Counts the files of a vendor
#[derive(Copy, Clone, Debug)]
pub struct GetDirectoryFileCount(pub FileVendor);

impl Command for GetDirectoryFileCount {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x16);
    type Reply = DirectoryFileCountReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        Some(vec![self.0.into(), 0])
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DirectoryFileCountReply {
    pub count: u16,
}

impl DecodeReply for DirectoryFileCountReply {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x16);

    fn decode(frame: &HostFrame) -> Result<Self, DecodeError> {
        Ok(DirectoryFileCountReply {
            count: frame.cursor().next_u16()?,
        })
    }
}

/// Fetches a directory entry by index. Follows a [`GetDirectoryFileCount`].
#[derive(Copy, Clone, Debug)]
pub struct GetDirectoryEntry(pub u8);

impl Command for GetDirectoryEntry {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x17);
    type Reply = DirectoryEntryReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        Some(vec![self.0, 0])
    }
}

/// `file` is `None` when there is no entry at that index
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryEntryReply {
    pub file: Option<FileEntry>,
}

impl DecodeReply for DirectoryEntryReply {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x17);

    fn decode(frame: &HostFrame) -> Result<Self, DecodeError> {
        if frame.payload_size() <= 4 {
            return Ok(DirectoryEntryReply { file: None });
        }

        let mut cursor = frame.cursor();
        let index = cursor.next_u8()?;
        let size = cursor.next_u32()?;
        let load_address = cursor.next_u32()?;
        let crc32 = cursor.next_u32()?;
        let file_type = cursor.next_string(4)?;
        let timestamp = cursor.next_u32()? as u64 + J2000_EPOCH as u64;
        let version = cursor.next_version(false)?;
        let filename = cursor.next_ntbs(32)?;

        Ok(DirectoryEntryReply {
            file: Some(FileEntry {
                index,
                filename,
                metadata: FileMetadata {
                    load_address,
                    size,
                    crc32,
                    file_type,
                    timestamp,
                    version,
                },
            }),
        })
    }
}

/// What [`LoadFileAction`] acts on
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgramTarget {
    /// Program slot, 1 through 8
    Slot(u8),
    Name(String),
}

impl ProgramTarget {
    /// The file name on the brain. Slot `n` is stored as `___s_{n-1}.bin`.
    pub fn file_name(&self) -> String {
        match self {
            ProgramTarget::Slot(slot) => format!("___s_{}.bin", slot.saturating_sub(1)),
            ProgramTarget::Name(name) => name.clone(),
        }
    }
}

/// Runs or stops a program
#[derive(Clone, Debug)]
pub struct LoadFileAction {
    pub vendor: FileVendor,
    pub action: FileLoadAction,
    pub target: ProgramTarget,
}

impl Command for LoadFileAction {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x18);
    type Reply = LoadFileActionReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        Some(vendor_name_payload(
            self.vendor,
            self.action as u8,
            &self.target.file_name(),
        ))
    }
}

ack_reply!(LoadFileActionReply, CDC2_COMMAND, 0x18);

/// Looks up the metadata of a file by name
#[derive(Clone, Debug)]
pub struct GetFileMetadata {
    pub vendor: FileVendor,
    pub name: String,
    pub options: u8,
}

impl Command for GetFileMetadata {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x19);
    type Reply = FileMetadataReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        Some(vendor_name_payload(self.vendor, self.options, &self.name))
    }
}

/// `file` is `None` when the file does not exist
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileMetadataReply {
    pub linked_vendor: Option<u8>,
    pub file: Option<FileMetadata>,
}

impl DecodeReply for FileMetadataReply {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x19);

    fn decode(frame: &HostFrame) -> Result<Self, DecodeError> {
        let mut cursor = frame.cursor();
        let linked_vendor = cursor.next_u8().ok();

        // size, address, crc, type, timestamp and version
        if cursor.remaining() < 24 {
            return Ok(FileMetadataReply {
                linked_vendor,
                file: None,
            });
        }

        Ok(FileMetadataReply {
            linked_vendor,
            file: Some(FileMetadata {
                size: cursor.next_u32()?,
                load_address: cursor.next_u32()?,
                crc32: cursor.next_u32()?,
                file_type: cursor.next_string(4)?,
                timestamp: cursor.next_u32()? as u64 + J2000_EPOCH as u64,
                version: cursor.next_version(false)?,
            }),
        })
    }
}

/// Rewrites the metadata of a stored file
#[derive(Clone, Debug)]
pub struct SetFileMetadata {
    pub vendor: FileVendor,
    pub name: String,
    pub metadata: FileMetadata,
    pub options: u8,
}

impl Command for SetFileMetadata {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x1A);
    type Reply = SetFileMetadataReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        let mut payload = vec![0u8; 42];
        payload[0] = self.vendor.into();
        payload[1] = self.options;
        LittleEndian::write_u32(&mut payload[2..6], self.metadata.load_address);
        put_name(&mut payload[6..10], &self.metadata.file_type, 4);

        let timestamp = self.metadata.timestamp.saturating_sub(J2000_EPOCH as u64);
        LittleEndian::write_u32(&mut payload[10..14], timestamp.min(u32::MAX as u64) as u32);

        payload[14..18].copy_from_slice(&self.metadata.version.to_bytes(false));
        put_name(&mut payload[18..], &self.name, 23);
        Some(payload)
    }
}

ack_reply!(SetFileMetadataReply, CDC2_COMMAND, 0x1A);

/// Erases a file
#[derive(Clone, Debug)]
pub struct EraseFile {
    pub vendor: FileVendor,
    pub name: String,
}

impl Command for EraseFile {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x1B);
    type Reply = EraseFileReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        Some(vendor_name_payload(self.vendor, 0x80, &self.name))
    }
}

ack_reply!(EraseFileReply, CDC2_COMMAND, 0x1B);

/// Asks which slot a program occupies
#[derive(Clone, Debug)]
pub struct GetProgramSlotInfo {
    pub vendor: FileVendor,
    pub name: String,
}

impl Command for GetProgramSlotInfo {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x1C);
    type Reply = ProgramSlotInfoReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        Some(vendor_name_payload(self.vendor, 0, &self.name))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProgramSlotInfoReply {
    pub slot: u8,
    pub requested_slot: u8,
}

impl DecodeReply for ProgramSlotInfoReply {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x1C);

    fn decode(frame: &HostFrame) -> Result<Self, DecodeError> {
        let mut cursor = frame.cursor();
        Ok(ProgramSlotInfoReply {
            slot: cursor.next_u8()?,
            requested_slot: cursor.next_u8()?,
        })
    }
}

/// Erases every file of a vendor
#[derive(Copy, Clone, Debug)]
pub struct FileClearUp(pub FileVendor);

impl Command for FileClearUp {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x1E);
    type Reply = FileClearUpReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        Some(vec![self.0.into(), 0])
    }
}

ack_reply!(FileClearUpReply, CDC2_COMMAND, 0x1E);

/// Formats the file system
#[derive(Copy, Clone, Debug)]
pub struct FileFormat;

impl Command for FileFormat {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x1F);
    type Reply = FileFormatReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        // Magic confirmation bytes
        Some(vec![0x44, 0x43, 0x42, 0x41])
    }
}

ack_reply!(FileFormatReply, CDC2_COMMAND, 0x1F);

/// Ack of any reply that is an ack and nothing else
pub trait AckOnly {
    fn ack(&self) -> VexAckType;
}

macro_rules! impl_ack_only {
    ($($name:ident),*) => {
        $(impl AckOnly for $name {
            fn ack(&self) -> VexAckType {
                self.ack
            }
        })*
    };
}

impl_ack_only!(
    FileControlReply,
    ExitFileTransferReply,
    WriteFileReply,
    LinkFileReply,
    LoadFileActionReply,
    SetFileMetadataReply,
    EraseFileReply,
    FileClearUpReply,
    FileFormatReply
);
