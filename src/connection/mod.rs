//! Per-client connection handling.
//!
//! Each TCP connection gets a [`Connection`] that tracks the registration
//! handshake and identity, a read loop that frames the byte stream into
//! lines and dispatches commands, and a writer task that drains the
//! session's outbound queue. Handlers live in submodules:
//! - [`registration`] — PASS, NICK, USER, and the welcome burst
//! - [`channel`] — JOIN, PART, TOPIC, MODE, KICK, INVITE
//! - [`messaging`] — PRIVMSG
//! - [`helpers`] — delivery, channel broadcast, session teardown

mod channel;
pub(crate) mod helpers;
mod messaging;
mod registration;

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};

use crate::irc::{self, Message};
use crate::server::{SessionId, SharedState};

use channel::{handle_invite, handle_join, handle_kick, handle_mode, handle_part, handle_topic};
use helpers::send_to;
use messaging::handle_privmsg;
use registration::{handle_nick, handle_pass, handle_user};

/// Maximum inbound line length, terminator included. Input that grows past
/// this without producing a complete line is fatal to the session.
pub const MAX_LINE_LEN: usize = 512;

/// Outbound queue depth per client.
const SEND_QUEUE: usize = 4096;

/// State of a single client connection.
pub struct Connection {
    pub id: SessionId,
    /// Remote address, reported as the host part of the user prefix.
    pub host: String,
    pub nick: Option<String>,
    pub user: Option<String>,
    pub realname: Option<String>,
    /// PASS accepted.
    pub authenticated: bool,
    /// PASS, NICK, and USER all done.
    pub registered: bool,
    welcome_sent: bool,
}

impl Connection {
    fn new(id: SessionId, host: String) -> Self {
        Self {
            id,
            host,
            nick: None,
            user: None,
            realname: None,
            authenticated: false,
            registered: false,
            welcome_sent: false,
        }
    }

    pub(crate) fn nick_or_star(&self) -> &str {
        self.nick.as_deref().unwrap_or("*")
    }

    /// The originator prefix carried on relayed messages: `nick!user@host`.
    pub(crate) fn prefix(&self) -> String {
        let nick = self.nick.as_deref().unwrap_or("*");
        let user = self.user.as_deref().unwrap_or("*");
        format!("{nick}!{user}@{host}", host = self.host)
    }
}

/// Handle one client connection until QUIT, EOF, transport error, oversize
/// input, or server shutdown.
pub async fn handle(
    stream: TcpStream,
    state: Arc<SharedState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let peer = stream.peer_addr()?;
    let id = state.next_session_id();
    let mut conn = Connection::new(id, peer.ip().to_string());
    tracing::info!(session = id, peer = %peer, "New connection");

    let (read_half, write_half) = stream.into_split();

    // Queue for lines addressed TO this client; drained by the writer task.
    let (tx, rx) = mpsc::channel::<String>(SEND_QUEUE);
    state.connections.lock().unwrap().insert(id, tx);

    let writer = tokio::spawn(write_loop(write_half, rx));

    let quit_reason = read_loop(read_half, &mut conn, &state, &mut shutdown).await;

    helpers::teardown_session(&state, &conn, &quit_reason);
    tracing::info!(
        session = id,
        nick = conn.nick.as_deref().unwrap_or("-"),
        reason = %quit_reason,
        "Connection closed"
    );
    writer.abort();
    Ok(())
}

async fn write_loop(mut write_half: OwnedWriteHalf, mut rx: mpsc::Receiver<String>) {
    while let Some(line) = rx.recv().await {
        if write_half.write_all(line.as_bytes()).await.is_err() {
            break;
        }
        if write_half.flush().await.is_err() {
            break;
        }
    }
}

/// Drive the read half: accumulate bytes, frame lines, dispatch commands.
/// Returns the reason the session ended.
async fn read_loop(
    mut read_half: OwnedReadHalf,
    conn: &mut Connection,
    state: &Arc<SharedState>,
    shutdown: &mut watch::Receiver<bool>,
) -> String {
    let mut read_buf = [0u8; MAX_LINE_LEN];
    let mut input: Vec<u8> = Vec::with_capacity(MAX_LINE_LEN);

    loop {
        tokio::select! {
            _ = shutdown.changed() => return "Server shutting down".to_string(),
            read = read_half.read(&mut read_buf) => match read {
                Ok(0) => return "Client disconnected".to_string(),
                Err(e) => {
                    tracing::debug!(session = conn.id, error = %e, "Read error");
                    return "Connection error".to_string();
                }
                Ok(n) => {
                    input.extend_from_slice(&read_buf[..n]);
                    while let Some(line) = next_line(&mut input) {
                        if line.is_empty() {
                            continue;
                        }
                        tracing::debug!(session = conn.id, "<- {line}");
                        if let Some(reason) = dispatch(conn, &line, state) {
                            return reason;
                        }
                    }
                    if input.len() > MAX_LINE_LEN {
                        tracing::warn!(session = conn.id, len = input.len(), "Oversize input");
                        return "Oversize input".to_string();
                    }
                }
            }
        }
    }
}

/// Split one complete line off the front of `buf`, stripping the `\n`
/// terminator and an optional preceding `\r`. Lossy-decodes so a stray
/// byte cannot wedge the session.
fn next_line(buf: &mut Vec<u8>) -> Option<String> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let mut line: Vec<u8> = buf.drain(..=pos).collect();
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Some(String::from_utf8_lossy(&line).into_owned())
}

/// Parse and execute one inbound line. Returns `Some(reason)` when the
/// command ends the session (QUIT).
fn dispatch(conn: &mut Connection, line: &str, state: &Arc<SharedState>) -> Option<String> {
    let msg = Message::parse(line)?;
    match msg.command.as_str() {
        "PASS" => handle_pass(conn, &msg, state),
        "NICK" => handle_nick(conn, &msg, state),
        "USER" => handle_user(conn, &msg, state),
        "JOIN" => handle_join(conn, &msg, state),
        "PART" => handle_part(conn, &msg, state),
        "PRIVMSG" => handle_privmsg(conn, &msg, state),
        "KICK" => handle_kick(conn, &msg, state),
        "INVITE" => handle_invite(conn, &msg, state),
        "TOPIC" => handle_topic(conn, &msg, state),
        "MODE" => handle_mode(conn, &msg, state),
        "QUIT" => {
            let reason = msg
                .params
                .first()
                .cloned()
                .unwrap_or_else(|| "Client Quit".to_string());
            return Some(reason);
        }
        _ => {
            let reply = Message::from_server(
                &state.server_name,
                irc::ERR_UNKNOWNCOMMAND,
                vec![conn.nick_or_star(), &msg.command, "Unknown command"],
            );
            send_to(state, conn.id, format!("{reply}\r\n"));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_line_strips_crlf() {
        let mut buf = b"NICK alice\r\nUSER".to_vec();
        assert_eq!(next_line(&mut buf).as_deref(), Some("NICK alice"));
        assert_eq!(buf, b"USER");
        assert_eq!(next_line(&mut buf), None);
    }

    #[test]
    fn next_line_accepts_bare_lf() {
        let mut buf = b"QUIT\n".to_vec();
        assert_eq!(next_line(&mut buf).as_deref(), Some("QUIT"));
        assert!(buf.is_empty());
    }

    #[test]
    fn next_line_keeps_residue() {
        let mut buf = b"PRIV".to_vec();
        assert_eq!(next_line(&mut buf), None);
        assert_eq!(buf, b"PRIV");
    }

    #[test]
    fn next_line_yields_multiple_lines() {
        let mut buf = b"A\r\nB\nC".to_vec();
        assert_eq!(next_line(&mut buf).as_deref(), Some("A"));
        assert_eq!(next_line(&mut buf).as_deref(), Some("B"));
        assert_eq!(next_line(&mut buf), None);
        assert_eq!(buf, b"C");
    }
}
