//! Distributed start/stop wire protocol.
//!
//! Lets two or more registry instances (e.g. recording stations on
//! different machines) start and stop in lock-step. Exactly one instance is
//! the *server* (not in listen mode); every other instance is a *client*
//! and blocks on its socket until told what to do.
//!
//! # Message format
//!
//! A fixed 14-byte ASCII message:
//!
//! ```text
//! SGP:STRT:RUN1\0
//! ^^^ ^^^^ ^^^^
//! head type id
//! ```
//!
//! The type token is `STRT` or `STOP`; the id token carries the run mode
//! the server picked (`QUIT`, `RUN1` = run and quit, `RUNN` = run and
//! restart). The handshake itself: the server sends START carrying the id
//! and begins running; a client blocks until it sees START and adopts the
//! id. On stop, the server sends STOP before going idle; a client whose
//! adopted id is QUIT skips waiting entirely, and RUN_AND_RESTART tells it
//! to loop the whole pipeline again after stopping.
//!
//! Transport is UDP or TCP over one configurable host/port; both sides use
//! the same blocking send/recv pair.

use crate::error::{Result, SigFlowError};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::time::Duration;

/// Message head identifying this protocol.
pub const MSG_HEAD: &[u8; 3] = b"SGP";
/// Total message size: head + delim + type + delim + id + NUL.
pub const MSG_LEN: usize = 14;
const MSG_DELIM: u8 = b':';

/// Message type token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Start,
    Stop,
}

impl MsgType {
    fn token(&self) -> &'static [u8; 4] {
        match self {
            MsgType::Start => b"STRT",
            MsgType::Stop => b"STOP",
        }
    }

    fn from_token(token: &[u8]) -> Option<Self> {
        match token {
            b"STRT" => Some(MsgType::Start),
            b"STOP" => Some(MsgType::Stop),
            _ => None,
        }
    }
}

/// Run mode carried in the id token, chosen by the server and adopted by
/// every client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Do not run; clients stop waiting immediately
    Quit,
    /// Run one cycle, then quit
    #[default]
    RunAndQuit,
    /// Run one cycle, then loop the whole pipeline again
    RunAndRestart,
}

impl RunMode {
    fn token(&self) -> &'static [u8; 4] {
        match self {
            RunMode::Quit => b"QUIT",
            RunMode::RunAndQuit => b"RUN1",
            RunMode::RunAndRestart => b"RUNN",
        }
    }

    fn from_token(token: &[u8]) -> Option<Self> {
        match token {
            b"QUIT" => Some(RunMode::Quit),
            b"RUN1" => Some(RunMode::RunAndQuit),
            b"RUNN" => Some(RunMode::RunAndRestart),
            _ => None,
        }
    }
}

/// Wire transport for the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Udp,
    Tcp,
}

/// Encode one handshake message.
pub fn encode(msg_type: MsgType, run_mode: RunMode) -> [u8; MSG_LEN] {
    let mut msg = [0u8; MSG_LEN];
    msg[..3].copy_from_slice(MSG_HEAD);
    msg[3] = MSG_DELIM;
    msg[4..8].copy_from_slice(msg_type.token());
    msg[8] = MSG_DELIM;
    msg[9..13].copy_from_slice(run_mode.token());
    msg[13] = 0;
    msg
}

/// Decode one handshake message.
pub fn decode(msg: &[u8]) -> Result<(MsgType, RunMode)> {
    if msg.len() != MSG_LEN {
        return Err(SigFlowError::Sync(format!(
            "message of unexpected size {}",
            msg.len()
        )));
    }
    if &msg[..3] != MSG_HEAD {
        return Err(SigFlowError::Sync("unexpected message head".to_string()));
    }
    if msg[3] != MSG_DELIM || msg[8] != MSG_DELIM || msg[13] != 0 {
        return Err(SigFlowError::Sync("malformed message".to_string()));
    }
    let msg_type = MsgType::from_token(&msg[4..8])
        .ok_or_else(|| SigFlowError::Sync("unknown message type".to_string()))?;
    let run_mode = RunMode::from_token(&msg[9..13])
        .ok_or_else(|| SigFlowError::Sync("unknown run mode".to_string()))?;
    Ok((msg_type, run_mode))
}

enum Link {
    Udp(UdpSocket),
    Tcp(TcpStream),
}

/// One side of the handshake connection. Servers [`connect`] and send;
/// clients [`listen`] and receive.
///
/// [`connect`]: SyncLink::connect
/// [`listen`]: SyncLink::listen
pub struct SyncLink {
    link: Link,
}

impl SyncLink {
    /// Bind the receiving side. An empty host binds all interfaces. TCP
    /// blocks until the server connects.
    pub fn listen(transport: Transport, host: &str, port: u16) -> Result<SyncLink> {
        let host = if host.is_empty() { "0.0.0.0" } else { host };
        let link = match transport {
            Transport::Udp => Link::Udp(UdpSocket::bind((host, port))?),
            Transport::Tcp => {
                let listener = TcpListener::bind((host, port))?;
                let (stream, peer) = listener.accept()?;
                tracing::info!("sync peer connected from {}", peer);
                Link::Tcp(stream)
            }
        };
        Ok(SyncLink { link })
    }

    /// Open the sending side towards `host:port`. An empty host targets
    /// localhost. TCP retries briefly, since the listener may still be on
    /// its way up.
    pub fn connect(transport: Transport, host: &str, port: u16) -> Result<SyncLink> {
        let host = if host.is_empty() { "127.0.0.1" } else { host };
        let link = match transport {
            Transport::Udp => {
                let socket = UdpSocket::bind(("0.0.0.0", 0))?;
                socket.connect((host, port))?;
                Link::Udp(socket)
            }
            Transport::Tcp => {
                let mut attempts = 0;
                let stream = loop {
                    match TcpStream::connect((host, port)) {
                        Ok(stream) => break stream,
                        Err(e) if attempts < 20 => {
                            attempts += 1;
                            tracing::debug!("sync connect retry {}: {}", attempts, e);
                            std::thread::sleep(Duration::from_millis(100));
                        }
                        Err(e) => return Err(e.into()),
                    }
                };
                Link::Tcp(stream)
            }
        };
        Ok(SyncLink { link })
    }

    /// Send one handshake message.
    pub fn send(&mut self, msg_type: MsgType, run_mode: RunMode) -> Result<()> {
        let msg = encode(msg_type, run_mode);
        match &mut self.link {
            Link::Udp(socket) => {
                let sent = socket.send(&msg)?;
                if sent != MSG_LEN {
                    return Err(SigFlowError::Sync("short send".to_string()));
                }
            }
            Link::Tcp(stream) => stream.write_all(&msg)?,
        }
        tracing::info!("sent {:?} message ({:?})", msg_type, run_mode);
        Ok(())
    }

    /// Block until the next well-formed handshake message arrives.
    /// Malformed datagrams are logged and skipped.
    pub fn recv(&mut self) -> Result<(MsgType, RunMode)> {
        loop {
            let mut buf = [0u8; MSG_LEN];
            match &mut self.link {
                Link::Udp(socket) => {
                    let (n, _) = socket.recv_from(&mut buf)?;
                    if n != MSG_LEN {
                        tracing::warn!("received message of unexpected size {}", n);
                        continue;
                    }
                }
                Link::Tcp(stream) => stream.read_exact(&mut buf)?,
            }
            match decode(&buf) {
                Ok((msg_type, run_mode)) => {
                    tracing::info!("received {:?} message ({:?})", msg_type, run_mode);
                    return Ok((msg_type, run_mode));
                }
                Err(e) => tracing::warn!("{}", e),
            }
        }
    }
}
