//! Reassembles host-bound frames out of the byte stream
use std::sync::Arc;

use log::{debug, trace, warn};
use tokio::io::AsyncReadExt;

use super::{hex, Shared};
use crate::commands::extended::host_payload_info;
use crate::errors::DecodeError;
use crate::io::BoxedReader;
use crate::responses::HostFrame;
use crate::v5::HEADER_TO_HOST;

/// Buffers incoming bytes and cuts complete frames off the front.
///
/// Bytes in front of a bad header are dropped up to the next `AA 55`.
/// Once more than `max_resync_bytes` have been dropped without a frame in
/// between, the stream is considered lost.
pub(crate) struct FrameAssembler {
    buffer: Vec<u8>,
    discarded: usize,
    max_resync_bytes: usize,
}

impl FrameAssembler {
    pub fn new(max_resync_bytes: usize) -> Self {
        FrameAssembler {
            buffer: Vec::new(),
            discarded: 0,
            max_resync_bytes,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// The next complete frame, if the buffer holds one
    pub fn next_frame(&mut self) -> Result<Option<HostFrame>, DecodeError> {
        loop {
            let (header_len, payload_size) = match host_payload_info(&self.buffer) {
                Ok(Some(info)) => info,
                Ok(None) => return Ok(None),
                Err(DecodeError::BadHeader) => {
                    self.resync()?;
                    continue;
                }
                Err(err) => return Err(err),
            };

            let total = header_len + payload_size;
            if self.buffer.len() < total {
                return Ok(None);
            }

            let data: Vec<u8> = self.buffer.drain(..total).collect();
            match HostFrame::parse(data) {
                Ok(frame) => {
                    self.discarded = 0;
                    return Ok(Some(frame));
                }
                Err(err) => {
                    warn!("Dropping malformed frame: {}", err);
                    self.discard(total)?;
                }
            }
        }
    }

    /// Drops everything up to the next host header
    fn resync(&mut self) -> Result<(), DecodeError> {
        let next = self.buffer[1..]
            .windows(2)
            .position(|w| w == HEADER_TO_HOST)
            .map(|p| p + 1);

        let dropped = match next {
            Some(index) => index,
            // Keep a trailing 0xAA, it may start the next header
            None if self.buffer.last() == Some(&HEADER_TO_HOST[0]) => self.buffer.len() - 1,
            None => self.buffer.len(),
        };

        warn!(
            "Bad header, dropping {} bytes: {}",
            dropped,
            hex(&self.buffer[..dropped])
        );
        self.buffer.drain(..dropped);
        self.discard(dropped)
    }

    fn discard(&mut self, count: usize) -> Result<(), DecodeError> {
        self.discarded += count;
        if self.discarded > self.max_resync_bytes {
            return Err(DecodeError::BadHeader);
        }
        Ok(())
    }
}

/// Reads the port until it closes, handing every frame to the connection
pub(crate) async fn read_loop(mut reader: BoxedReader, shared: Arc<Shared>, session: u64) {
    let mut assembler = FrameAssembler::new(shared.config.max_resync_bytes);
    let mut buf = vec![0u8; 4096];

    'read: loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("Serial stream ended");
                break;
            }
            Ok(n) => n,
            Err(err) => {
                warn!("Failed to read from the serial port: {}", err);
                break;
            }
        };
        trace!("Read {} bytes: {}", n, hex(&buf[..n]));
        assembler.push(&buf[..n]);

        loop {
            match assembler.next_frame() {
                Ok(Some(frame)) => shared.dispatch(frame),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Lost track of frames after {} bytes of garbage",
                        shared.config.max_resync_bytes
                    );
                    break 'read;
                }
            }
        }
    };

    Shared::reader_finished(shared, session).await;
}
