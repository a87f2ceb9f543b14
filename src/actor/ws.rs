//! Websocket actor.
//!
//! Three moving parts around one shared client table:
//! - an acceptor thread that binds the port, performs the handshake and
//!   validates URL, parameters and tool version;
//! - a polling reader thread that parses client frames and forwards
//!   them to the supervisor;
//! - an async writer task that fans supervisor messages out to sockets.
//!
//! Target validation needs project state, so it happens in the
//! supervisor after a `SessionHello`; everything checkable from the
//! request alone is rejected here with an `UnexpectedError` message.

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use percent_encoding::percent_decode_str;
use tokio::sync::mpsc;
use tungstenite::WebSocket;
use tungstenite::protocol::Message;

use super::messages::{SupervisorMsg, WsOut};
use crate::reload::{ClientMsg, ServerMsg, SessionId, SessionStatus};

/// Maximum port retry attempts when the preferred port is taken.
const MAX_PORT_RETRIES: u16 = 10;

/// A connected socket with its session id.
pub struct RegisteredClient {
    id: SessionId,
    ws: WebSocket<TcpStream>,
}

/// Shared client table.
pub type ClientTable = Arc<Mutex<Vec<RegisteredClient>>>;

pub fn new_client_table() -> ClientTable {
    Arc::new(Mutex::new(Vec::new()))
}

// =============================================================================
// Handshake validation
// =============================================================================

/// A validated handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub target: String,
    pub compiled_at: u64,
}

/// Why a handshake was rejected (before target validation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    BadUrl { path: String },
    ParamsDecodeError { message: String },
    WrongVersion { client: String },
}

impl HandshakeError {
    pub fn message(&self) -> String {
        match self {
            Self::BadUrl { path } => {
                format!("bad url: expected path `/`, got `{path}`")
            }
            Self::ParamsDecodeError { message } => {
                format!("failed to decode query parameters: {message}")
            }
            Self::WrongVersion { client } => format!(
                "wrong version: client is {client}, server is {}",
                env!("CARGO_PKG_VERSION")
            ),
        }
    }
}

/// Validate the request URI of an incoming websocket connection:
/// `/?toolVersion=V&targetName=T&compiledAt=N`.
pub fn validate_handshake(uri: &str) -> Result<Hello, HandshakeError> {
    let (path, query) = match uri.split_once('?') {
        Some((path, query)) => (path, query),
        None => (uri, ""),
    };
    if path != "/" {
        return Err(HandshakeError::BadUrl {
            path: path.to_string(),
        });
    }

    let mut tool_version = None;
    let mut target = None;
    let mut compiled_at = None;
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = percent_decode_str(value)
            .decode_utf8()
            .map_err(|e| HandshakeError::ParamsDecodeError {
                message: e.to_string(),
            })?
            .into_owned();
        match key {
            "toolVersion" => tool_version = Some(value),
            "targetName" => target = Some(value),
            "compiledAt" => {
                compiled_at =
                    Some(
                        value
                            .parse::<u64>()
                            .map_err(|_| HandshakeError::ParamsDecodeError {
                                message: format!("compiledAt is not a number: `{value}`"),
                            })?,
                    );
            }
            _ => {}
        }
    }

    let missing = |name: &str| HandshakeError::ParamsDecodeError {
        message: format!("missing parameter `{name}`"),
    };
    let tool_version = tool_version.ok_or_else(|| missing("toolVersion"))?;
    let target = target.ok_or_else(|| missing("targetName"))?;
    let compiled_at = compiled_at.ok_or_else(|| missing("compiledAt"))?;

    if tool_version != env!("CARGO_PKG_VERSION") {
        return Err(HandshakeError::WrongVersion {
            client: tool_version,
        });
    }

    Ok(Hello {
        target,
        compiled_at,
    })
}

// =============================================================================
// Listener + acceptor thread
// =============================================================================

/// Bind the websocket listener and start the acceptor and reader
/// threads. Returns the actual port (the preferred one may be taken).
pub fn start_listener(
    preferred_port: Option<u16>,
    clients: ClientTable,
    sup_tx: mpsc::Sender<SupervisorMsg>,
) -> Result<u16> {
    let (listener, actual_port) = bind_port(preferred_port.unwrap_or(0))?;

    let acceptor_clients = Arc::clone(&clients);
    let acceptor_tx = sup_tx.clone();
    std::thread::spawn(move || accept_loop(listener, acceptor_clients, acceptor_tx));

    std::thread::spawn(move || reader_loop(clients, sup_tx));

    Ok(actual_port)
}

/// Try the preferred port, then increments, then an ephemeral port.
fn bind_port(base_port: u16) -> Result<(TcpListener, u16)> {
    for offset in 0..MAX_PORT_RETRIES {
        let port = base_port.saturating_add(offset);
        if let Ok(listener) = TcpListener::bind(("127.0.0.1", port)) {
            let actual = listener.local_addr()?.port();
            return Ok((listener, actual));
        }
        if base_port == 0 {
            break; // The OS refused an ephemeral port; retrying won't help.
        }
    }
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    let actual = listener.local_addr()?.port();
    Ok((listener, actual))
}

fn accept_loop(listener: TcpListener, clients: ClientTable, sup_tx: mpsc::Sender<SupervisorMsg>) {
    loop {
        if crate::core::is_shutdown() {
            break;
        }
        let (stream, addr) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                crate::log!("ws"; "accept error: {}", e);
                std::thread::sleep(std::time::Duration::from_millis(100));
                continue;
            }
        };
        crate::debug!("ws"; "connection from {}", addr);

        // Capture the request URI during the handshake.
        let mut uri = String::new();
        let handshake = tungstenite::accept_hdr(
            stream,
            |req: &tungstenite::handshake::server::Request,
             resp: tungstenite::handshake::server::Response| {
                uri = req.uri().to_string();
                Ok(resp)
            },
        );

        let mut ws = match handshake {
            Ok(ws) => ws,
            Err(e) => {
                crate::log!("ws"; "handshake failed: {}", e);
                continue;
            }
        };

        match validate_handshake(&uri) {
            Ok(hello) => {
                let id = SessionId::next();
                let connecting = ServerMsg::status(SessionStatus::Connecting);
                if let Err(e) = ws.send(Message::Text(connecting.to_json().into())) {
                    crate::log!("ws"; "failed to greet client: {}", e);
                    continue;
                }
                // Non-blocking from here on: the reader thread polls.
                let _ = ws.get_ref().set_nonblocking(true);
                clients.lock().push(RegisteredClient { id, ws });
                let msg = SupervisorMsg::SessionHello {
                    id,
                    target: hello.target,
                    compiled_at: hello.compiled_at,
                };
                if sup_tx.blocking_send(msg).is_err() {
                    break; // Supervisor gone for good
                }
            }
            Err(reject) => {
                crate::debug!("ws"; "rejected handshake: {}", reject.message());
                let msg = ServerMsg::unexpected(reject.message());
                let _ = ws.send(Message::Text(msg.to_json().into()));
                let _ = ws.close(None);
            }
        }
    }
}

// =============================================================================
// Reader thread
// =============================================================================

/// Poll clients for incoming frames; forward parsed messages, answer
/// garbage with `UnexpectedError`, report disconnects.
fn reader_loop(clients: ClientTable, sup_tx: mpsc::Sender<SupervisorMsg>) {
    loop {
        if crate::core::is_shutdown() {
            return;
        }
        std::thread::sleep(std::time::Duration::from_millis(100));

        let mut closed: Vec<SessionId> = Vec::new();
        {
            let mut table = clients.lock();
            let mut dropped = Vec::new();

            for (index, client) in table.iter_mut().enumerate() {
                match client.ws.read() {
                    Ok(Message::Text(text)) => match ClientMsg::parse(&text) {
                        Ok(msg) => {
                            let _ = sup_tx.blocking_send(SupervisorMsg::SessionMsg {
                                id: client.id,
                                msg,
                            });
                        }
                        Err(bad) => {
                            crate::debug!("ws"; "bad json from {}: {}", client.id, bad);
                            let reply = ServerMsg::unexpected(format!("bad json: {bad}"));
                            let _ = send_frame(&mut client.ws, reply);
                        }
                    },
                    Ok(Message::Close(_)) => dropped.push(index),
                    Ok(_) => {}
                    Err(tungstenite::Error::Io(ref e))
                        if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(_) => dropped.push(index),
                }
            }

            for index in dropped.into_iter().rev() {
                let client = table.remove(index);
                closed.push(client.id);
            }
        }

        for id in closed {
            crate::debug!("ws"; "client {} disconnected", id);
            if sup_tx
                .blocking_send(SupervisorMsg::SessionClosed { id })
                .is_err()
            {
                return;
            }
        }
    }
}

// =============================================================================
// Writer actor
// =============================================================================

/// Fan supervisor messages out to client sockets.
pub struct WsActor {
    rx: mpsc::Receiver<WsOut>,
    clients: ClientTable,
    sup_tx: mpsc::Sender<SupervisorMsg>,
}

impl WsActor {
    pub fn new(
        rx: mpsc::Receiver<WsOut>,
        clients: ClientTable,
        sup_tx: mpsc::Sender<SupervisorMsg>,
    ) -> Self {
        Self {
            rx,
            clients,
            sup_tx,
        }
    }

    pub async fn run(mut self) {
        while let Some(out) = self.rx.recv().await {
            match out {
                WsOut::Send { id, msg } => {
                    let mut failed = false;
                    {
                        let mut table = self.clients.lock();
                        if let Some(pos) = table.iter().position(|c| c.id == id)
                            && let Err(e) = send_frame(&mut table[pos].ws, msg)
                        {
                            crate::debug!("ws"; "send to {} failed: {}", id, e);
                            table.remove(pos);
                            failed = true;
                        }
                    }
                    if failed {
                        // Spawned so a full supervisor inbox can never
                        // wedge the writer (the supervisor may itself be
                        // waiting on this actor).
                        let tx = self.sup_tx.clone();
                        tokio::spawn(async move {
                            let _ = tx.send(SupervisorMsg::SessionClosed { id }).await;
                        });
                    }
                }
                WsOut::Close { id } => {
                    let mut table = self.clients.lock();
                    if let Some(index) = table.iter().position(|c| c.id == id) {
                        let mut client = table.remove(index);
                        let _ = client.ws.close(None);
                    }
                }
                WsOut::Shutdown => {
                    let mut table = self.clients.lock();
                    for mut client in table.drain(..) {
                        let _ = client.ws.close(None);
                    }
                    break;
                }
            }
        }
    }
}

/// Send one frame on a non-blocking socket, retrying the flush while the
/// kernel buffer is full.
fn send_frame(ws: &mut WebSocket<TcpStream>, msg: ServerMsg) -> tungstenite::Result<()> {
    match ws.send(Message::Text(msg.to_json().into())) {
        Ok(()) => Ok(()),
        Err(tungstenite::Error::Io(ref e)) if e.kind() == std::io::ErrorKind::WouldBlock => loop {
            match ws.flush() {
                Ok(()) => return Ok(()),
                Err(tungstenite::Error::Io(ref e))
                    if e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
                Err(e) => return Err(e),
            }
        },
        Err(e) => Err(e),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const V: &str = env!("CARGO_PKG_VERSION");

    #[test]
    fn test_valid_handshake() {
        let uri = format!("/?toolVersion={V}&targetName=Html&compiledAt=1700000000000");
        assert_eq!(
            validate_handshake(&uri).unwrap(),
            Hello {
                target: "Html".into(),
                compiled_at: 1700000000000,
            }
        );
    }

    #[test]
    fn test_percent_encoded_target() {
        let uri = format!("/?toolVersion={V}&targetName=My%20App&compiledAt=0");
        assert_eq!(validate_handshake(&uri).unwrap().target, "My App");
    }

    #[test]
    fn test_bad_url() {
        let uri = format!("/other?toolVersion={V}&targetName=T&compiledAt=0");
        assert!(matches!(
            validate_handshake(&uri),
            Err(HandshakeError::BadUrl { path }) if path == "/other"
        ));
    }

    #[test]
    fn test_wrong_version() {
        let uri = "/?toolVersion=0.0.0&targetName=T&compiledAt=0";
        let err = validate_handshake(uri).unwrap_err();
        assert!(matches!(
            &err,
            HandshakeError::WrongVersion { client } if client == "0.0.0"
        ));
        assert!(err.message().contains("0.0.0"));
        assert!(err.message().contains(V));
    }

    #[test]
    fn test_non_numeric_compiled_at() {
        let uri = format!("/?toolVersion={V}&targetName=T&compiledAt=yesterday");
        assert!(matches!(
            validate_handshake(&uri),
            Err(HandshakeError::ParamsDecodeError { .. })
        ));
    }

    #[test]
    fn test_missing_params() {
        let uri = format!("/?toolVersion={V}");
        let err = validate_handshake(&uri).unwrap_err();
        assert!(matches!(err, HandshakeError::ParamsDecodeError { .. }));
        assert!(err.message().contains("targetName"));
    }

    #[test]
    fn test_version_checked_after_decode() {
        // Undecodable params win over the version check: a client so
        // broken it can't form a query string gets the decode error.
        let uri = "/?toolVersion=0.0.0&targetName=T&compiledAt=NaN";
        assert!(matches!(
            validate_handshake(uri),
            Err(HandshakeError::ParamsDecodeError { .. })
        ));
    }
}
