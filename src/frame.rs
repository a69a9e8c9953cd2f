//! Client request framing.
//!
//! A request is one `\n`-terminated command line, plus the data block for
//! storage commands. The data block is read by its declared length, never by
//! scanning for line terminators, so payloads containing `\r` or `\n` bytes
//! pass through untouched. Blocks are read in bounded chunks so memory grows
//! with the bytes actually received, not with the declared length.

use crate::protocol::{self, CommandKind};
use bytes::Bytes;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::debug;

/// Upper bound on a single data block (request or `VALUE` payload)
pub const MAX_DATA_LEN: usize = 128 * 1024 * 1024;

/// Initial capacity for a command line
const LINE_CAPACITY: usize = 256;

/// Largest single read into a data block
const READ_CHUNK: usize = 8192;

/// One complete client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    frame: Bytes,
    kind: CommandKind,
}

impl Request {
    /// Raw bytes to forward, data block included
    pub fn frame(&self) -> &Bytes {
        &self.frame
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// The command line up to and including its terminator
    pub fn command_line(&self) -> &[u8] {
        match self.frame.iter().position(|&b| b == b'\n') {
            Some(pos) => &self.frame[..=pos],
            None => &self.frame,
        }
    }

    pub fn expects_reply(&self) -> bool {
        protocol::expects_reply(self.command_line())
    }
}

/// Read one complete request from the client stream.
///
/// Any error, including EOF before or inside a frame, means the client is
/// gone.
pub async fn read_request<R>(reader: &mut R) -> io::Result<Request>
where
    R: AsyncBufRead + Unpin,
{
    let mut frame = Vec::with_capacity(LINE_CAPACITY);
    read_line(reader, &mut frame).await?;

    let kind = CommandKind::classify(&frame);
    if kind == CommandKind::Storage {
        match protocol::storage_data_len(&frame) {
            Ok(len) => read_block(reader, &mut frame, len).await?,
            Err(e) => {
                // let the backend reject it, but keep the stream in step
                debug!(error = %e, "Storage command without usable length");
                read_line(reader, &mut frame).await?;
            }
        }
    }

    Ok(Request {
        frame: Bytes::from(frame),
        kind,
    })
}

/// Append one `\n`-terminated line to `buf`.
pub async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let n = reader.read_until(b'\n', buf).await?;
    if n == 0 || buf.last() != Some(&b'\n') {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "stream closed before end of line",
        ));
    }
    Ok(n)
}

/// Append a data block of `len` bytes plus its trailing `\r\n` to `buf`.
///
/// On error `buf` holds only the bytes that actually arrived.
pub async fn read_block<R>(reader: &mut R, buf: &mut Vec<u8>, len: usize) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    if len > MAX_DATA_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("data block of {} bytes exceeds limit", len),
        ));
    }

    let mut remaining = len + 2;
    while remaining > 0 {
        let start = buf.len();
        let chunk = remaining.min(READ_CHUNK);
        buf.resize(start + chunk, 0);

        let n = match reader.read(&mut buf[start..]).await {
            Ok(n) => n,
            Err(e) => {
                buf.truncate(start);
                return Err(e);
            }
        };
        buf.truncate(start + n);

        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream closed with {} bytes of data block missing", remaining),
            ));
        }
        remaining -= n;
    }

    Ok(())
}
