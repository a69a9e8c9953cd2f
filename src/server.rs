//! TCP server for the relay.
//!
//! Binds the listening socket and hands every accepted connection to its own
//! task. Tasks share nothing but the read-only [`RelaySettings`].

use crate::config::Config;
use crate::handler::{handle_connection, RelaySettings};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Listen backlog
const BACKLOG: i32 = 1024;

/// Server instance
pub struct Server {
    config: Config,
    settings: Arc<RelaySettings>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        let settings = Arc::new(RelaySettings::from_config(&config));
        Server { config, settings }
    }

    /// Bind the listener and accept connections until the process exits.
    pub async fn run(&self) -> io::Result<()> {
        let listener = self.bind()?;
        info!(
            address = %listener.local_addr()?,
            backend = %self.settings.backend.addr(),
            nodes = self.settings.topology.node_count(),
            "Server listening"
        );

        self.serve(listener).await;
        Ok(())
    }

    /// Bind the configured address. Must be called inside a tokio runtime.
    pub fn bind(&self) -> io::Result<TcpListener> {
        let addr = resolve(&self.config.host, self.config.port)?;
        let listener = create_listener(addr)?;
        TcpListener::from_std(listener)
    }

    /// Accept loop: one spawned task per connection.
    pub async fn serve(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "New connection");

                    let settings = Arc::clone(&self.settings);
                    tokio::spawn(async move {
                        handle_connection(stream, &settings).await;
                        debug!(peer = %addr, "Connection closed");
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Resolve `host:port` to the first matching socket address.
fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("could not resolve {}:{}", host, port),
        )
    })
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}
