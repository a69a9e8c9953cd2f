//! Memcached text protocol helpers for the relay.
//!
//! The relay forwards almost every command without looking inside it. It only
//! needs to know:
//! - which request is the cluster discovery query
//! - which commands carry a data block after the command line
//! - which requests expect no reply (`noreply`)
//! - how a `VALUE` or meta `VA` header declares its payload length
//! - which reply lines are entries of a list ended by `END`

use bytes::BytesMut;
use std::str;
use thiserror::Error;

/// Discovery query sent by auto-discovery aware clients. Matched byte for byte.
pub const DISCOVERY_COMMAND: &[u8] = b"config get cluster\r\n";

/// Config version reported in the discovery reply
pub const CONFIG_VERSION: u32 = 5;

/// Classification of a request's command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// `config get cluster`
    Discovery,
    /// `quit`
    Quit,
    /// get, gets, gat, gats
    Retrieval,
    /// set, add, replace, append, prepend, cas, ms (data block follows)
    Storage,
    /// Anything else, forwarded as a single line
    Other,
}

impl CommandKind {
    /// Classify a request by its first line (terminator included or not).
    pub fn classify(line: &[u8]) -> Self {
        if line == DISCOVERY_COMMAND {
            return CommandKind::Discovery;
        }

        let mut parts = tokens(line);
        let Some(name) = parts.next() else {
            return CommandKind::Other;
        };

        match name {
            b"quit" if parts.next().is_none() => CommandKind::Quit,
            b"get" | b"gets" | b"gat" | b"gats" => CommandKind::Retrieval,
            b"set" | b"add" | b"replace" | b"append" | b"prepend" | b"cas" | b"ms" => {
                CommandKind::Storage
            }
            _ => CommandKind::Other,
        }
    }
}

/// Errors from inspecting protocol lines
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("missing {0} field")]
    MissingField(&'static str),
    #[error("invalid number: {0}")]
    InvalidNumber(String),
}

/// Split a protocol line into whitespace separated tokens.
pub fn tokens(line: &[u8]) -> impl Iterator<Item = &[u8]> {
    line.split(u8::is_ascii_whitespace)
        .filter(|token| !token.is_empty())
}

/// Declared data length of a storage command line.
///
/// - `<command> <key> <flags> <exptime> <bytes> [cas unique] [noreply]`
/// - `ms <key> <datalen> <flags>*`
pub fn storage_data_len(line: &[u8]) -> Result<usize, ParseError> {
    let index = match tokens(line).next() {
        Some(b"ms") => 2,
        _ => 4,
    };
    let field = tokens(line).nth(index).ok_or(ParseError::MissingField("bytes"))?;
    parse_number(field)
}

/// Payload length declared by a value header.
///
/// - `VALUE <key> <flags> <bytes> [<cas>]`
/// - `VA <bytes> <flags>*`
pub fn value_data_len(line: &[u8]) -> Result<usize, ParseError> {
    let index = match tokens(line).next() {
        Some(b"VA") => 1,
        _ => 3,
    };
    let field = tokens(line).nth(index).ok_or(ParseError::MissingField("bytes"))?;
    parse_number(field)
}

/// Whether the backend will answer this request at all.
///
/// Retrievals always answer; everything else stays silent when its command
/// line ends in `noreply`.
pub fn expects_reply(line: &[u8]) -> bool {
    if CommandKind::classify(line) == CommandKind::Retrieval {
        return true;
    }
    tokens(line).last() != Some(b"noreply".as_slice())
}

/// True if the line starts a `VALUE` or meta `VA` block
pub fn is_value_line(line: &[u8]) -> bool {
    line.starts_with(b"VALUE ") || line.starts_with(b"VA ")
}

/// True if the line is one entry of a list reply terminated by `END`:
/// `STAT` (stats), `ITEM` (stats cachedump), `key=` (lru_crawler metadump)
pub fn is_list_line(line: &[u8]) -> bool {
    line.starts_with(b"STAT ") || line.starts_with(b"ITEM ") || line.starts_with(b"key=")
}

fn parse_number(field: &[u8]) -> Result<usize, ParseError> {
    str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ParseError::InvalidNumber(String::from_utf8_lossy(field).into_owned()))
}

/// Response generator for the lines the relay produces itself
pub struct Response;

impl Response {
    /// Generate the discovery reply for a topology descriptor.
    ///
    /// `CONFIG cluster 0 <n>\r\n<version>\n<topology>\n\r\nEND\r\n` where `<n>`
    /// is the length of `<topology>\n\r\n`.
    pub fn config_cluster(topology: &str) -> BytesMut {
        let nodes_len = topology.len() + 3;
        let header = format!("CONFIG cluster 0 {}\r\n{}\n", nodes_len, CONFIG_VERSION);

        let mut response = BytesMut::with_capacity(header.len() + nodes_len + 5);
        response.extend_from_slice(header.as_bytes());
        response.extend_from_slice(topology.as_bytes());
        response.extend_from_slice(b"\n\r\n");
        response.extend_from_slice(Response::end());
        response
    }

    /// Generate END response
    pub fn end() -> &'static [u8] {
        b"END\r\n"
    }

    /// Generate SERVER_ERROR response
    pub fn server_error(msg: &str) -> BytesMut {
        let mut response = BytesMut::new();
        response.extend_from_slice(format!("SERVER_ERROR {}\r\n", msg).as_bytes());
        response
    }
}
