// Module that contains all commands that can be sent to the v5

/// Declares a reply that carries nothing but its ack byte
macro_rules! ack_reply {
    ($(#[$meta:meta])* $name:ident, $command:expr, $extended:expr) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq)]
        pub struct $name {
            pub ack: $crate::errors::VexAckType,
        }

        impl $crate::responses::DecodeReply for $name {
            const COMMAND_ID: u8 = $command;
            const EXTENDED_ID: Option<u8> = Some($extended);

            fn decode(
                frame: &$crate::responses::HostFrame,
            ) -> Result<Self, $crate::errors::DecodeError> {
                Ok($name {
                    ack: frame.ack_type()?,
                })
            }
        }
    };
}

pub mod simple;
pub use simple::{Query1, Query1Reply, SystemVersion, SystemVersionReply};

pub mod extended;

pub mod file;
pub mod kv;
pub mod remote;
pub mod system;

use crate::responses::FromReply;

/// The (command, extended command) pair that identifies a packet.
///
/// Only the CDC2 command ids (0x56 and 0x58) carry an extended id.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommandId {
    pub command: u8,
    pub extended: Option<u8>,
}

impl CommandId {
    pub const fn simple(command: u8) -> Self {
        CommandId {
            command,
            extended: None,
        }
    }

    pub const fn extended(command: u8, extended: u8) -> Self {
        CommandId {
            command,
            extended: Some(extended),
        }
    }
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.extended {
            Some(ext) => write!(f, "{:#04x}/{:#04x}", self.command, ext),
            None => write!(f, "{:#04x}", self.command),
        }
    }
}

/// A command trait that every device-bound command implements
pub trait Command {
    /// The simple command id
    const COMMAND_ID: u8;

    /// The extended command id, for CDC2 commands
    const EXTENDED_ID: Option<u8> = None;

    /// The reply the device answers this command with
    type Reply: FromReply;

    /// Encodes the payload of the command, if it has one
    fn encode_payload(&self) -> Option<Vec<u8>> {
        None
    }

    /// Encodes the library->v5 request
    fn encode_request(&self) -> Vec<u8> {
        let payload = self.encode_payload();
        match Self::EXTENDED_ID {
            Some(ext) => extended::encode(Self::COMMAND_ID, ext, payload.as_deref()),
            None => simple::encode(Self::COMMAND_ID, payload.as_deref()),
        }
    }

    /// The pair the reply to this command is matched on
    fn command_id() -> CommandId {
        CommandId {
            command: Self::COMMAND_ID,
            extended: Self::EXTENDED_ID,
        }
    }
}

/// Copies `name` into the front of a zeroed, fixed width field.
///
/// At most `max` bytes of the name are kept, so the field stays NUL
/// terminated when `max` is shorter than it.
pub(crate) fn put_name(field: &mut [u8], name: &str, max: usize) {
    let bytes = name.as_bytes();
    let len = bytes.len().min(max).min(field.len());
    field[..len].copy_from_slice(&bytes[..len]);
}
