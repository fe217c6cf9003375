//! Loopback relay.
//!
//! A minimal stand-in for the hosted relay: sockets are grouped by the
//! pairing code in the request path, text frames are forwarded to the other
//! members of the group, and `partner_connected` / `partner_disconnected`
//! are sent as members come and go. `ping` is answered with `pong`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

const PARTNER_CONNECTED: &str = r#"{"type":"partner_connected"}"#;
const PARTNER_DISCONNECTED: &str = r#"{"type":"partner_disconnected"}"#;

type Rooms = Arc<Mutex<HashMap<String, Vec<(u64, mpsc::UnboundedSender<String>)>>>>;

/// A running loopback relay.
pub struct TestRelay {
    addr: SocketAddr,
    rooms: Rooms,
    task: JoinHandle<()>,
}

impl TestRelay {
    /// Start a relay on an ephemeral port.
    pub async fn start() -> anyhow::Result<Self> {
        Self::bind("127.0.0.1:0".parse()?).await
    }

    /// Start a relay on `addr`. Used to bring a stopped relay back on the same port.
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let rooms = Rooms::default();
        let task = tokio::spawn(accept_loop(listener, Arc::clone(&rooms)));
        Ok(Self { addr, rooms, task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL; clients append `/<code>`.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Number of sockets currently joined to `code`.
    pub fn members(&self, code: &str) -> usize {
        self.rooms.lock().get(code).map_or(0, Vec::len)
    }

    /// Wait up to five seconds for `code` to have `count` members.
    pub async fn wait_members(&self, code: &str, count: usize) -> anyhow::Result<()> {
        for _ in 0..100 {
            if self.members(code) == count {
                return Ok(());
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        anyhow::bail!("{code} never reached {count} member(s)")
    }

    /// Stop listening and drop every open socket.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

async fn accept_loop(listener: TcpListener, rooms: Rooms) {
    let next_id = AtomicU64::new(1);
    // Dropping the set when this task is aborted aborts every connection.
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let id = next_id.fetch_add(1, Ordering::Relaxed);
                    connections.spawn(serve(stream, Arc::clone(&rooms), id));
                }
                Err(_) => break,
            },
            Some(_) = connections.join_next() => {}
        }
    }
}

async fn serve(stream: TcpStream, rooms: Rooms, id: u64) {
    let mut code = String::new();
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        code = request.uri().path().trim_start_matches('/').to_string();
        Ok(response)
    };
    let Ok(socket) = accept_hdr_async(stream, callback).await else {
        return;
    };
    let (mut sink, mut stream) = socket.split();
    let (tx, mut outbound) = mpsc::unbounded_channel::<String>();

    join(&rooms, &code, id, &tx);

    loop {
        tokio::select! {
            Some(text) = outbound.recv() => {
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => route(&rooms, &code, id, &tx, text),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    leave(&rooms, &code, id);
}

fn join(rooms: &Rooms, code: &str, id: u64, tx: &mpsc::UnboundedSender<String>) {
    let mut rooms = rooms.lock();
    let room = rooms.entry(code.to_string()).or_default();
    if !room.is_empty() {
        for (_, peer) in room.iter() {
            let _ = peer.send(PARTNER_CONNECTED.to_string());
        }
        let _ = tx.send(PARTNER_CONNECTED.to_string());
    }
    room.push((id, tx.clone()));
}

fn leave(rooms: &Rooms, code: &str, id: u64) {
    let mut rooms = rooms.lock();
    let Some(room) = rooms.get_mut(code) else {
        return;
    };
    room.retain(|(member, _)| *member != id);
    for (_, peer) in room.iter() {
        let _ = peer.send(PARTNER_DISCONNECTED.to_string());
    }
    if room.is_empty() {
        rooms.remove(code);
    }
}

fn route(rooms: &Rooms, code: &str, id: u64, tx: &mpsc::UnboundedSender<String>, text: String) {
    let kind = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v["type"].as_str().map(str::to_string));
    if kind.as_deref() == Some("ping") {
        let _ = tx.send(r#"{"type":"pong"}"#.to_string());
        return;
    }

    let rooms = rooms.lock();
    if let Some(room) = rooms.get(code) {
        for (member, peer) in room {
            if *member != id {
                let _ = peer.send(text.clone());
            }
        }
    }
}
