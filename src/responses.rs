//! Decoding of host-bound frames into typed replies
use std::collections::HashMap;

use log::warn;

use crate::commands::extended::{host_payload_info, validate_crc};
use crate::commands::{file, kv, remote, simple, system, Command, CommandId};
use crate::cursor::PacketCursor;
use crate::errors::{DecodeError, VexAckType};
use crate::v5::is_cdc2_command;

/// A complete host-bound frame, header and CRC included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostFrame {
    data: Vec<u8>,
    command_id: u8,
    extended_id: Option<u8>,
    header_len: usize,
    payload_size: usize,
}

impl HostFrame {
    /// Takes apart a frame whose length field matches `data` exactly.
    ///
    /// The CRC is not checked here, see [`HostFrame::crc_valid`].
    pub fn parse(data: Vec<u8>) -> Result<Self, DecodeError> {
        let (header_len, payload_size) = match host_payload_info(&data)? {
            Some(info) => info,
            None => {
                return Err(DecodeError::UnexpectedEnd {
                    offset: 0,
                    needed: 5,
                    available: data.len(),
                })
            }
        };

        if header_len + payload_size != data.len() {
            return Err(DecodeError::BadLength {
                declared: header_len + payload_size,
                available: data.len(),
            });
        }

        let command_id = data[2];
        let extended_id = if is_cdc2_command(command_id) {
            // The extended id and the CRC at the very least
            if payload_size < 3 {
                return Err(DecodeError::BadLength {
                    declared: payload_size,
                    available: 3,
                });
            }
            Some(data[header_len])
        } else {
            None
        };

        Ok(HostFrame {
            data,
            command_id,
            extended_id,
            header_len,
            payload_size,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn command_id(&self) -> u8 {
        self.command_id
    }

    pub fn extended_id(&self) -> Option<u8> {
        self.extended_id
    }

    pub fn id(&self) -> CommandId {
        CommandId {
            command: self.command_id,
            extended: self.extended_id,
        }
    }

    /// CDC2 frames carry an extended id and a CRC
    pub fn is_extended(&self) -> bool {
        self.extended_id.is_some()
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// The size declared by the length field
    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// Offset of the ack byte, right after the extended id
    pub fn ack_index(&self) -> usize {
        self.header_len + 1
    }

    /// The raw ack byte of a CDC2 frame
    pub fn ack(&self) -> Option<u8> {
        if self.is_extended() {
            self.body().get(self.ack_index()).copied()
        } else {
            None
        }
    }

    pub fn ack_type(&self) -> Result<VexAckType, DecodeError> {
        self.ack()
            .map(VexAckType::from)
            .ok_or(DecodeError::UnexpectedEnd {
                offset: self.ack_index(),
                needed: 1,
                available: 0,
            })
    }

    /// Simple frames have no CRC and always pass
    pub fn crc_valid(&self) -> bool {
        !self.is_extended() || validate_crc(&self.data)
    }

    /// The frame without its trailing CRC
    pub fn body(&self) -> &[u8] {
        if self.is_extended() {
            &self.data[..self.data.len() - 2]
        } else {
            &self.data
        }
    }

    /// Borrows `n` bytes at an absolute offset of the body
    pub fn bytes_at(&self, offset: usize, n: usize) -> Result<&[u8], DecodeError> {
        PacketCursor::new(self.body()).peek_at(offset, n)
    }

    /// A cursor over the fields that follow the ack byte
    pub fn cursor(&self) -> PacketCursor<'_> {
        self.cursor_at(self.ack_index() + 1)
    }

    /// A cursor over the body starting at an absolute offset
    pub fn cursor_at(&self, position: usize) -> PacketCursor<'_> {
        PacketCursor::at(self.body(), position)
    }
}

/// A reply the device sends back for a command
pub trait DecodeReply: Sized {
    const COMMAND_ID: u8;
    const EXTENDED_ID: Option<u8> = None;

    /// Reads the reply's fields out of the frame
    fn decode(frame: &HostFrame) -> Result<Self, DecodeError>;

    /// Whether the frame is a reply or a bare NACK.
    ///
    /// 0xA7 has been seen in place of the ACK on match status replies.
    fn is_valid(frame: &HostFrame) -> bool {
        matches!(frame.ack(), Some(0x76) | Some(0xA7))
    }
}

/// Pulls a typed reply back out of a [`Response`]
pub trait FromReply: Sized {
    fn from_reply(reply: Reply) -> Option<Self>;

    /// Used when no decoder is registered for the reply
    fn from_raw(_data: Vec<u8>) -> Option<Self> {
        None
    }
}

/// The undecoded bytes of a frame
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawReply(pub Vec<u8>);

impl FromReply for RawReply {
    fn from_reply(_reply: Reply) -> Option<Self> {
        None
    }

    fn from_raw(data: Vec<u8>) -> Option<Self> {
        Some(RawReply(data))
    }
}

/// Decoder registered for one (command, extended command) pair
#[derive(Copy, Clone)]
pub struct ReplyDecoder {
    pub id: CommandId,
    pub decode: fn(&HostFrame) -> Result<Reply, DecodeError>,
    pub is_valid: fn(&HostFrame) -> bool,
}

impl std::fmt::Debug for ReplyDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyDecoder").field("id", &self.id).finish()
    }
}

macro_rules! replies {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        /// Every reply this crate knows how to decode
        #[derive(Clone, Debug, PartialEq, Eq)]
        pub enum Reply {
            $($variant($ty),)*
        }

        $(
            impl From<$ty> for Reply {
                fn from(reply: $ty) -> Self {
                    Reply::$variant(reply)
                }
            }

            impl FromReply for $ty {
                fn from_reply(reply: Reply) -> Option<Self> {
                    match reply {
                        Reply::$variant(reply) => Some(reply),
                        _ => None,
                    }
                }
            }
        )*

        /// The decoders of every known reply
        pub fn reply_table() -> Vec<ReplyDecoder> {
            vec![$(
                ReplyDecoder {
                    id: CommandId {
                        command: <$ty as DecodeReply>::COMMAND_ID,
                        extended: <$ty as DecodeReply>::EXTENDED_ID,
                    },
                    decode: |frame| <$ty as DecodeReply>::decode(frame).map(Reply::$variant),
                    is_valid: <$ty as DecodeReply>::is_valid,
                },
            )*]
        }
    };
}

replies!(
    Query1(simple::Query1Reply),
    SystemVersion(simple::SystemVersionReply),
    FileControl(file::FileControlReply),
    InitFileTransfer(file::InitFileTransferReply),
    ExitFileTransfer(file::ExitFileTransferReply),
    WriteFile(file::WriteFileReply),
    ReadFile(file::ReadFileReply),
    LinkFile(file::LinkFileReply),
    DirectoryFileCount(file::DirectoryFileCountReply),
    DirectoryEntry(file::DirectoryEntryReply),
    LoadFileAction(file::LoadFileActionReply),
    FileMetadata(file::FileMetadataReply),
    SetFileMetadata(file::SetFileMetadataReply),
    EraseFile(file::EraseFileReply),
    ProgramSlotInfo(file::ProgramSlotInfoReply),
    FileClearUp(file::FileClearUpReply),
    FileFormat(file::FileFormatReply),
    ReadKeyValue(kv::ReadKeyValueReply),
    WriteKeyValue(kv::WriteKeyValueReply),
    MatchMode(remote::MatchModeReply),
    MatchStatus(remote::MatchStatusReply),
    SendDashTouch(remote::SendDashTouchReply),
    SelectDash(remote::SelectDashReply),
    EnableDash(remote::EnableDashReply),
    DisableDash(remote::DisableDashReply),
    SystemFlags(system::SystemFlagsReply),
    DeviceStatus(system::DeviceStatusReply),
    SystemStatus(system::SystemStatusReply),
    FdtStatus(system::FdtStatusReply),
    LogCount(system::LogCountReply),
    ReadLogPage(system::ReadLogPageReply),
    RadioStatus(system::RadioStatusReply),
    UserData(system::UserDataReply),
    ScreenCapture(system::ScreenCaptureReply),
    Slot1to4Info(system::Slot1to4InfoReply),
    Slot5to8Info(system::Slot5to8InfoReply),
    FactoryStatus(system::FactoryStatusReply),
    FactoryEnable(system::FactoryEnableReply),
);

/// The outcome of one round trip
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    /// A decoded reply
    Reply(Reply),
    /// A frame nothing knows how to decode
    Raw(Vec<u8>),
    /// A NACK from the device, or a host side failure
    Ack(VexAckType),
}

impl Response {
    /// The typed reply, or the ack the round trip ended with.
    ///
    /// A reply of another type counts as a NACK.
    pub fn into_typed<T: FromReply>(self) -> Result<T, VexAckType> {
        match self {
            Response::Reply(reply) => T::from_reply(reply).ok_or(VexAckType::Nack),
            Response::Raw(data) => T::from_raw(data).ok_or(VexAckType::Nack),
            Response::Ack(ack) => Err(ack),
        }
    }

    pub fn into_reply<T: FromReply>(self) -> Option<T> {
        self.into_typed().ok()
    }
}

/// Which frames a pending request accepts. An unset field matches anything.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplyFilter {
    pub command: Option<u8>,
    pub extended: Option<u8>,
}

impl ReplyFilter {
    /// Accepts any frame
    pub const ANY: ReplyFilter = ReplyFilter {
        command: None,
        extended: None,
    };

    /// Accepts the reply to `C`
    pub fn of<C: Command>() -> Self {
        ReplyFilter {
            command: Some(C::COMMAND_ID),
            extended: C::EXTENDED_ID,
        }
    }

    pub fn matches(&self, frame: &HostFrame) -> bool {
        self.command.map_or(true, |c| c == frame.command_id())
            && self.extended.map_or(true, |e| Some(e) == frame.extended_id())
    }
}

/// Maps (command, extended command) pairs to reply decoders
#[derive(Clone, Debug)]
pub struct PacketCodec {
    decoders: HashMap<CommandId, ReplyDecoder>,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketCodec {
    /// A codec that knows every reply in [`reply_table`]
    pub fn new() -> Self {
        let mut decoders = HashMap::new();
        for decoder in reply_table() {
            decoders.entry(decoder.id).or_insert(decoder);
        }
        PacketCodec { decoders }
    }

    /// A codec with no decoders at all
    pub fn empty() -> Self {
        PacketCodec {
            decoders: HashMap::new(),
        }
    }

    pub fn from_decoders(
        decoders: impl IntoIterator<Item = ReplyDecoder>,
    ) -> Result<Self, DecodeError> {
        let mut codec = Self::empty();
        for decoder in decoders {
            codec.register(decoder)?;
        }
        Ok(codec)
    }

    /// Adds a decoder. Each pair can only be registered once.
    pub fn register(&mut self, decoder: ReplyDecoder) -> Result<(), DecodeError> {
        if self.decoders.contains_key(&decoder.id) {
            return Err(DecodeError::DuplicateRegistration {
                command: decoder.id.command,
                extended: decoder.id.extended,
            });
        }
        self.decoders.insert(decoder.id, decoder);
        Ok(())
    }

    pub fn decoder(&self, id: CommandId) -> Option<&ReplyDecoder> {
        self.decoders.get(&id)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Turns a frame into the response for a request that accepted it.
    ///
    /// The decoder is picked by what the request asked for. Without one,
    /// the caller gets the raw bytes. A bad CRC or a failed validity check
    /// yields the ack alone.
    pub fn resolve(&self, frame: HostFrame, filter: ReplyFilter) -> Response {
        if !frame.crc_valid() {
            return Response::Ack(VexAckType::NackPacketCrc);
        }

        let decoder = filter.command.and_then(|command| {
            self.decoder(CommandId {
                command,
                extended: filter.extended,
            })
        });

        let decoder = match decoder {
            Some(decoder) => decoder,
            None => return Response::Raw(frame.into_data()),
        };

        if frame.is_extended() && !(decoder.is_valid)(&frame) {
            return Response::Ack(frame.ack_type().unwrap_or(VexAckType::Nack));
        }

        match (decoder.decode)(&frame) {
            Ok(reply) => Response::Reply(reply),
            Err(err) => {
                warn!("Failed to decode reply {}: {}", frame.id(), err);
                Response::Ack(frame.ack_type().unwrap_or(VexAckType::Nack))
            }
        }
    }
}
