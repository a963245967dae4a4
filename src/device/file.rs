//! Chunked file transfers to and from the brain.
//!
//! A transfer is an init exchange, an optional link exchange, one
//! exchange per chunk and an exit exchange. The first exchange that does
//! not get the expected reply ends the transfer. Whatever was written to
//! the brain until then stays there.
use std::borrow::Cow;
use std::time::Duration;

use log::{debug, info, warn};

use crate::commands::file::{
    ExitFileTransfer, InitFileTransfer, LinkFile, ReadFile, WriteFile,
};
use crate::commands::Command;
use crate::connection::Connection;
use crate::errors::{TransferError, TransferStep};
use crate::v5::meta::{FileExitAction, FileInitOptions, FileTransferTarget, FileVendor};
use crate::v5::{MAX_CHUNK_SIZE, USER_FLASH_USR_CODE_START};

pub const LINK_TIMEOUT: Duration = Duration::from_secs(10);
pub const CHUNK_TIMEOUT: Duration = Duration::from_secs(3);
pub const EXIT_TIMEOUT: Duration = Duration::from_secs(30);

/// A file the uploaded file is linked against
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkedFile {
    pub name: String,
    /// Defaults to [`FileVendor::User`]
    pub vendor: Option<FileVendor>,
}

/// Describes an upload
#[derive(Clone, Debug)]
pub struct FileWriteRequest<'a> {
    pub name: String,
    pub data: &'a [u8],
    pub target: FileTransferTarget,
    pub vendor: FileVendor,
    pub load_address: u32,
    /// Taken from the name's extension when not given
    pub file_type: Option<String>,
    /// Run the file once it is written, instead of halting
    pub auto_run: bool,
    pub linked_file: Option<LinkedFile>,
}

impl<'a> FileWriteRequest<'a> {
    /// An upload of `data` to a user file in flash
    pub fn new(name: impl Into<String>, data: &'a [u8]) -> Self {
        FileWriteRequest {
            name: name.into(),
            data,
            target: FileTransferTarget::Qspi,
            vendor: FileVendor::User,
            load_address: USER_FLASH_USR_CODE_START,
            file_type: None,
            auto_run: false,
            linked_file: None,
        }
    }
}

/// Names a file on the brain
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileBasicInfo {
    pub name: String,
    pub vendor: FileVendor,
    pub load_address: Option<u32>,
    /// When unset, the size the brain reports is used
    pub size: Option<u32>,
}

impl FileBasicInfo {
    pub fn new(name: impl Into<String>, vendor: FileVendor) -> Self {
        FileBasicInfo {
            name: name.into(),
            vendor,
            load_address: None,
            size: None,
        }
    }
}

impl From<&str> for FileBasicInfo {
    fn from(name: &str) -> Self {
        FileBasicInfo::new(name, FileVendor::User)
    }
}

/// The chunk size to use for a window the brain offered
pub fn chunk_size(window_size: u16) -> u32 {
    let window = window_size as u32;
    if window > 0 && window <= MAX_CHUNK_SIZE {
        window
    } else {
        MAX_CHUNK_SIZE
    }
}

/// Runs one exchange of a transfer, failing the transfer on anything
/// but the expected reply
async fn exchange<C: Command>(
    connection: &Connection,
    command: &C,
    timeout: Duration,
    step: TransferStep,
) -> Result<C::Reply, TransferError> {
    connection
        .send(command, timeout)
        .await?
        .into_typed::<C::Reply>()
        .map_err(|outcome| {
            warn!("File transfer {} step failed: {:?}", step, outcome);
            TransferError::StepFailed { step, outcome }
        })
}

/// Uploads a file.
///
/// `progress` is called after every chunk with the bytes written so far
/// and the total.
pub async fn upload_file(
    connection: &Connection,
    request: &FileWriteRequest<'_>,
    mut progress: impl FnMut(u32, u32),
) -> Result<(), TransferError> {
    let data = request.data;
    let total = data.len() as u32;

    info!("Uploading {} ({} bytes)", request.name, total);

    let init = InitFileTransfer::write(
        request.target,
        request.vendor,
        FileInitOptions::OVERWRITE,
        data,
        request.load_address,
        &request.name,
        request.file_type.as_deref(),
    );
    let init = exchange(
        connection,
        &init,
        connection.config().default_timeout(),
        TransferStep::Init,
    )
    .await?;

    if let Some(linked) = &request.linked_file {
        debug!("Linking {} to {}", request.name, linked.name);
        let link = LinkFile {
            vendor: linked.vendor.unwrap_or(FileVendor::User),
            name: linked.name.clone(),
            options: 0,
        };
        exchange(connection, &link, LINK_TIMEOUT, TransferStep::Link).await?;
    }

    let chunk = chunk_size(init.window_size);
    debug!("Writing in chunks of {} bytes", chunk);

    let mut offset: u32 = 0;
    let mut address = request.load_address;
    loop {
        let remaining = &data[offset as usize..];
        let last = remaining.len() as u32 <= chunk;

        // The last chunk is padded to a whole number of words
        let payload: Cow<[u8]> = if last {
            let mut padded = remaining.to_vec();
            padded.resize((remaining.len() + 3) & !3, 0);
            Cow::Owned(padded)
        } else {
            Cow::Borrowed(&remaining[..chunk as usize])
        };

        let write = WriteFile {
            address,
            data: &payload,
        };
        exchange(connection, &write, CHUNK_TIMEOUT, TransferStep::Chunk).await?;

        progress(offset.saturating_add(chunk).min(total), total);

        if last {
            break;
        }
        offset += chunk;
        address = address.wrapping_add(chunk);
    }

    let action = if request.auto_run {
        FileExitAction::RunProgram
    } else {
        FileExitAction::Halt
    };
    exchange(
        connection,
        &ExitFileTransfer(action),
        EXIT_TIMEOUT,
        TransferStep::Exit,
    )
    .await?;

    info!("Uploaded {}", request.name);
    Ok(())
}

/// Downloads a file and returns its contents
pub async fn download_file(
    connection: &Connection,
    file: &FileBasicInfo,
    target: FileTransferTarget,
    mut progress: impl FnMut(u32, u32),
) -> Result<Vec<u8>, TransferError> {
    let load_address = file.load_address.unwrap_or(USER_FLASH_USR_CODE_START);

    let init = InitFileTransfer::read(target, file.vendor, load_address, &file.name);
    let init = exchange(
        connection,
        &init,
        connection.config().default_timeout(),
        TransferStep::Init,
    )
    .await?;

    let size = file.size.unwrap_or(init.file_size);
    let chunk = chunk_size(init.window_size);
    info!("Downloading {} ({} bytes)", file.name, size);

    let mut buffer = vec![0u8; size as usize + chunk as usize];
    let mut offset: u32 = 0;
    let mut address = load_address;
    loop {
        let last = size <= offset.saturating_add(chunk);

        let read = ReadFile {
            address,
            size: chunk as u16,
        };
        let reply = exchange(connection, &read, CHUNK_TIMEOUT, TransferStep::Chunk).await?;

        let start = offset as usize;
        let end = (start + reply.data.len()).min(buffer.len());
        buffer[start..end].copy_from_slice(&reply.data[..end - start]);

        progress(offset.saturating_add(chunk).min(size), size);

        if last {
            break;
        }
        offset += chunk;
        address = address.wrapping_add(chunk);
    }

    exchange(
        connection,
        &ExitFileTransfer(FileExitAction::Halt),
        EXIT_TIMEOUT,
        TransferStep::Exit,
    )
    .await?;

    buffer.truncate(size as usize);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_sizes() {
        assert_eq!(chunk_size(0), 4096);
        assert_eq!(chunk_size(512), 512);
        assert_eq!(chunk_size(4096), 4096);
        assert_eq!(chunk_size(8192), 4096);
    }

    #[test]
    fn request_defaults() {
        let data = [0u8; 4];
        let request = FileWriteRequest::new("slot_1.bin", &data);

        assert_eq!(request.target, FileTransferTarget::Qspi);
        assert_eq!(request.vendor, FileVendor::User);
        assert_eq!(request.load_address, 0x03800000);
        assert!(!request.auto_run);
    }

    #[test]
    fn basic_info_from_name() {
        let info = FileBasicInfo::from("slot_1.ini");
        assert_eq!(info.vendor, FileVendor::User);
        assert_eq!(info.size, None);
    }
}
