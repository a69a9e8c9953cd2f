//! Per-connection protocol handler.
//!
//! Each accepted client gets one task running [`handle_connection`]. The task
//! reads a request, answers discovery locally or relays to the backend,
//! writes the reply, and loops until the client goes away. Requests on one
//! connection are strictly sequential: the reply to one request is written
//! before the next is read.

use crate::config::Config;
use crate::frame;
use crate::protocol::CommandKind;
use crate::relay::Backend;
use crate::topology::Topology;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, trace};

/// Read-only settings shared by every connection task
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub backend: Backend,
    pub topology: Topology,
    pub trace: bool,
}

impl RelaySettings {
    pub fn from_config(config: &Config) -> Self {
        RelaySettings {
            backend: Backend::new(config.backend_addr()),
            topology: config.cluster_nodes.clone(),
            trace: config.trace,
        }
    }
}

/// Serve one client connection until it disconnects.
///
/// A read error of any kind ends the connection; it is not reported further.
/// Write errors are logged and the handler goes back to reading, where a dead
/// client shows up as a read error.
pub async fn handle_connection<S>(stream: S, settings: &RelaySettings)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);

    loop {
        let request = match frame::read_request(&mut reader).await {
            Ok(request) => request,
            Err(e) => {
                trace!(error = %e, "Connection closed by client");
                break;
            }
        };

        let response = match request.kind() {
            CommandKind::Discovery => settings
                .topology
                .respond(request.frame(), settings.trace),
            CommandKind::Quit => {
                trace!("Client sent quit");
                break;
            }
            _ => settings.backend.relay(&request, settings.trace).await,
        };

        if response.is_empty() {
            continue;
        }

        if let Err(e) = writer.write_all(&response).await {
            debug!(error = %e, "Failed to write response");
        }
    }

    let _ = writer.shutdown().await;
}
