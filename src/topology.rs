//! Static cluster topology and the discovery responder.
//!
//! The descriptor is the `host|ip|port` node list handed to clients in place
//! of live cluster membership. Several nodes are separated by whitespace:
//!
//! ```text
//! cache-1|10.0.0.5|11211 cache-2|10.0.0.6|11211
//! ```

use crate::protocol::Response;
use bytes::BytesMut;
use std::fmt;
use thiserror::Error;
use tracing::info;

/// Default descriptor: a single local node
pub const DEFAULT_TOPOLOGY: &str = "localhost|127.0.0.1|11211";

/// Topology validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("topology is empty")]
    Empty,
    #[error("node '{0}' is not in host|ip|port form")]
    MalformedNode(String),
    #[error("node '{0}' has an invalid port")]
    InvalidPort(String),
}

/// Immutable topology descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    descriptor: String,
}

impl Topology {
    /// Validate a descriptor. Runs of spaces between nodes are accepted and
    /// the text is kept verbatim for replies.
    pub fn parse(descriptor: &str) -> Result<Self, TopologyError> {
        if descriptor.trim().is_empty() {
            return Err(TopologyError::Empty);
        }

        for node in descriptor.split_whitespace() {
            let fields: Vec<&str> = node.split('|').collect();
            if fields.len() != 3 || fields[0].is_empty() {
                return Err(TopologyError::MalformedNode(node.to_string()));
            }
            if fields[2].parse::<u16>().is_err() {
                return Err(TopologyError::InvalidPort(node.to_string()));
            }
        }

        Ok(Topology {
            descriptor: descriptor.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.descriptor
    }

    /// Number of nodes in the descriptor
    pub fn node_count(&self) -> usize {
        self.descriptor.split_whitespace().count()
    }

    /// Build the reply to the discovery command.
    pub fn respond(&self, request: &[u8], trace: bool) -> BytesMut {
        let response = Response::config_cluster(&self.descriptor);

        if trace {
            info!(
                request = ?String::from_utf8_lossy(request),
                response = ?String::from_utf8_lossy(&response),
                "trace"
            );
        }

        response
    }
}

impl Default for Topology {
    fn default() -> Self {
        Topology {
            descriptor: DEFAULT_TOPOLOGY.to_string(),
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor)
    }
}
