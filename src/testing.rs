//! In-process memcached stand-in for relay and server tests.
//!
//! Speaks enough of the text protocol to exercise the relay: storage
//! commands, get/gets, meta ms/mg, delete, stats and version. Items are shared across
//! connections because the relay opens a new connection per request.

use crate::frame::{read_request, Request};
use crate::protocol::{self, CommandKind};
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Default)]
struct State {
    items: HashMap<String, (u32, Bytes)>,
    received: Vec<Bytes>,
    connections: usize,
}

pub struct FakeBackend {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
    task: JoinHandle<()>,
}

impl FakeBackend {
    pub async fn start() -> FakeBackend {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(State::default()));

        let shared = Arc::clone(&state);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&shared);
                tokio::spawn(serve(stream, state));
            }
        });

        FakeBackend { addr, state, task }
    }

    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    /// Every request frame received, in arrival order
    pub fn received(&self) -> Vec<Bytes> {
        self.state.lock().unwrap().received.clone()
    }

    /// Number of backend connections accepted so far
    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }

    /// Wait until `count` requests have been processed. `noreply` requests
    /// give the relay nothing to wait on, so tests synchronise here.
    pub async fn wait_for_requests(&self, count: usize) {
        for _ in 0..200 {
            if self.state.lock().unwrap().received.len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("backend did not receive {} requests", count);
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: TcpStream, state: Arc<Mutex<State>>) {
    state.lock().unwrap().connections += 1;

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    while let Ok(request) = read_request(&mut reader).await {
        if request.kind() == CommandKind::Quit {
            break;
        }

        let reply = execute(&request, &state);
        if !request.expects_reply() {
            continue;
        }
        if writer.write_all(&reply).await.is_err() {
            break;
        }
    }
}

fn execute(request: &Request, state: &Arc<Mutex<State>>) -> Vec<u8> {
    let mut state = state.lock().unwrap();
    state.received.push(request.frame().clone());

    let line = request.command_line();
    let parts: Vec<String> = protocol::tokens(line)
        .map(|t| String::from_utf8_lossy(t).into_owned())
        .collect();
    let Some(name) = parts.first() else {
        return b"ERROR\r\n".to_vec();
    };

    match name.as_str() {
        "set" => {
            let flags = parts[2].parse().unwrap_or(0);
            let data = request.frame().slice(line.len()..request.frame().len() - 2);
            state.items.insert(parts[1].clone(), (flags, data));
            b"STORED\r\n".to_vec()
        }
        "get" | "gets" => {
            let mut reply = Vec::new();
            for key in &parts[1..] {
                if let Some((flags, data)) = state.items.get(key) {
                    let header = if name == "gets" {
                        format!("VALUE {} {} {} 1\r\n", key, flags, data.len())
                    } else {
                        format!("VALUE {} {} {}\r\n", key, flags, data.len())
                    };
                    reply.extend_from_slice(header.as_bytes());
                    reply.extend_from_slice(data);
                    reply.extend_from_slice(b"\r\n");
                }
            }
            reply.extend_from_slice(b"END\r\n");
            reply
        }
        "ms" => {
            let data = request.frame().slice(line.len()..request.frame().len() - 2);
            state.items.insert(parts[1].clone(), (0, data));
            b"HD\r\n".to_vec()
        }
        "mg" => match state.items.get(&parts[1]) {
            Some((_, data)) if parts[2..].iter().any(|flag| flag == "v") => {
                let mut reply = format!("VA {}\r\n", data.len()).into_bytes();
                reply.extend_from_slice(data);
                reply.extend_from_slice(b"\r\n");
                reply
            }
            Some(_) => b"HD\r\n".to_vec(),
            None => b"EN\r\n".to_vec(),
        },
        "stats" if parts.get(1).map(String::as_str) == Some("cachedump") => {
            let mut reply = Vec::new();
            for (key, (_, data)) in &state.items {
                let entry = format!("ITEM {} [{} b; 0 s]\r\n", key, data.len());
                reply.extend_from_slice(entry.as_bytes());
            }
            reply.extend_from_slice(b"END\r\n");
            reply
        }
        "delete" => match state.items.remove(&parts[1]) {
            Some(_) => b"DELETED\r\n".to_vec(),
            None => b"NOT_FOUND\r\n".to_vec(),
        },
        "stats" => format!(
            "STAT pid 1\r\nSTAT curr_items {}\r\nEND\r\n",
            state.items.len()
        )
        .into_bytes(),
        "version" => b"VERSION 1.6.0-fake\r\n".to_vec(),
        _ => b"ERROR\r\n".to_vec(),
    }
}
