//! Backend relay.
//!
//! Every relayed request gets its own backend connection: connect, write the
//! request verbatim, read one logical response, close. A response is zero or
//! more `VALUE`/`VA` blocks or list lines (`STAT`, `ITEM`, `key=`) followed
//! by a single terminal line. Value payloads are consumed by their declared
//! length so embedded line terminators are never mistaken for protocol syntax.

use crate::frame::{self, Request};
use crate::protocol::{self, ParseError, Response};
use bytes::BytesMut;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Initial capacity for a response line
const LINE_CAPACITY: usize = 256;

/// Errors during one backend round-trip
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to connect to backend {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("backend i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed VALUE header: {0}")]
    MalformedValue(#[from] ParseError),
    #[error("backend closed the connection before the terminal line")]
    Closed,
}

/// A memcached backend reached over a fresh connection per request
#[derive(Debug, Clone)]
pub struct Backend {
    addr: String,
}

impl Backend {
    pub fn new(addr: impl Into<String>) -> Self {
        Backend { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Forward one request and return whatever should go back to the client.
    ///
    /// A backend that cannot be reached yields `SERVER_ERROR`. Failures after
    /// the connection is up return the response read so far, which may be
    /// truncated or empty.
    pub async fn relay(&self, request: &Request, trace: bool) -> BytesMut {
        let mut response = BytesMut::new();

        match self.round_trip(request, &mut response).await {
            Ok(()) => {}
            Err(e @ RelayError::Connect { .. }) => {
                warn!(error = %e, "Backend unavailable");
                response = Response::server_error("backend unavailable");
            }
            Err(e) => {
                warn!(
                    backend = %self.addr,
                    error = %e,
                    partial = response.len(),
                    "Backend relay failed"
                );
            }
        }

        if trace {
            info!(
                request = ?String::from_utf8_lossy(request.frame()),
                response = ?String::from_utf8_lossy(&response),
                "trace"
            );
        }

        response
    }

    async fn round_trip(
        &self,
        request: &Request,
        response: &mut BytesMut,
    ) -> Result<(), RelayError> {
        let mut stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| RelayError::Connect {
                addr: self.addr.clone(),
                source,
            })?;

        stream.write_all(request.frame()).await?;

        if !request.expects_reply() {
            debug!("noreply request, skipping backend response");
            return Ok(());
        }

        let mut reader = BufReader::new(stream);
        read_response(&mut reader, response).await
        // connection closes when the reader drops
    }
}

/// Read one logical backend response, appending it to `response`.
///
/// Bytes are appended as they arrive, so on error `response` holds the
/// complete lines and blocks received before the failure.
pub async fn read_response<R>(reader: &mut R, response: &mut BytesMut) -> Result<(), RelayError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::with_capacity(LINE_CAPACITY);
    let mut block = Vec::new();

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            return Err(RelayError::Closed);
        }

        response.extend_from_slice(&line);
        if !line.ends_with(b"\n") {
            return Err(RelayError::Closed);
        }

        if protocol::is_value_line(&line) {
            let len = protocol::value_data_len(&line)?;
            block.clear();
            frame::read_block(reader, &mut block, len).await?;
            response.extend_from_slice(&block);
            continue;
        }

        if protocol::is_list_line(&line) {
            continue;
        }

        return Ok(());
    }
}
