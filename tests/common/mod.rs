//! Shared helpers for integration tests: server bootstrap and a
//! line-oriented IRC test client.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

use ferric::config::ServerConfig;
use ferric::server::{Server, SharedState};

/// How long to wait for a line before considering the test failed.
pub const WAIT: Duration = Duration::from_secs(5);

/// Window in which "nothing arrives" is asserted.
pub const QUIET: Duration = Duration::from_millis(300);

pub const PASSWORD: &str = "pw";
pub const SERVER_NAME: &str = "irc.test";

/// Start a server on an ephemeral loopback port. The shared state is
/// returned so tests can arrange registry contents (notably operator
/// grants, which the wire deliberately does not bootstrap).
pub async fn start_server() -> (SocketAddr, Arc<SharedState>) {
    let config = ServerConfig {
        port: 0,
        password: PASSWORD.to_string(),
        server_name: SERVER_NAME.to_string(),
    };
    let (addr, state, _handle) = Server::new(config).start().await.expect("server start");
    (addr, state)
}

/// Make `nick` an operator of `channel`. The channel creator is not
/// auto-opped, so tests mint the first operator through the registry.
pub fn grant_op(state: &SharedState, channel: &str, nick: &str) {
    let session = state
        .nicks
        .lock()
        .unwrap()
        .get_session(nick)
        .expect("nick registered");
    let mut channels = state.channels.lock().unwrap();
    let ch = channels
        .get_mut(&channel.to_ascii_lowercase())
        .expect("channel exists");
    assert!(ch.members.contains(&session), "{nick} not in {channel}");
    ch.operators.insert(session);
}

pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Client {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (read_half, write_half) = stream.into_split();
        Client {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    /// Send one line; the terminator is appended.
    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .expect("write");
    }

    /// Send raw bytes with no terminator.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("write");
    }

    /// Read the next line, panicking on timeout or closed connection.
    pub async fn recv(&mut self) -> String {
        let mut line = String::new();
        let n = timeout(WAIT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a line")
            .expect("read");
        assert!(n > 0, "connection closed while a line was expected");
        line.trim_end().to_string()
    }

    /// Read lines until one contains `needle`; panics if it never shows.
    pub async fn expect(&mut self, needle: &str) -> String {
        for _ in 0..50 {
            let line = self.recv().await;
            if line.contains(needle) {
                return line;
            }
        }
        panic!("gave up waiting for a line containing {needle:?}");
    }

    /// Assert that no line arrives within a short window.
    pub async fn expect_silence(&mut self) {
        let mut line = String::new();
        let res = timeout(QUIET, self.reader.read_line(&mut line)).await;
        assert!(res.is_err(), "expected silence, got: {line:?}");
    }

    /// Wait for the server to close this connection, discarding any
    /// remaining lines.
    pub async fn expect_close(&mut self) {
        loop {
            let mut line = String::new();
            let n = timeout(WAIT, self.reader.read_line(&mut line))
                .await
                .expect("timed out waiting for close")
                .expect("read");
            if n == 0 {
                return;
            }
        }
    }

    /// Run the full PASS/NICK/USER handshake (username = nick) and consume
    /// the welcome burst through 004.
    pub async fn register(&mut self, nick: &str) {
        self.send(&format!("PASS {PASSWORD}")).await;
        self.send(&format!("NICK {nick}")).await;
        self.send(&format!("USER {nick} 0 * :{nick}")).await;
        self.expect(" 004 ").await;
    }

    /// Register and join a channel, consuming the join burst through 366.
    pub async fn register_and_join(&mut self, nick: &str, channel: &str) {
        self.register(nick).await;
        self.send(&format!("JOIN {channel}")).await;
        self.expect(" 366 ").await;
    }
}

/// The `nick!user@host` prefix the server relays for a test client
/// registered via [`Client::register`].
pub fn prefix_of(nick: &str) -> String {
    format!("{nick}!{nick}@127.0.0.1")
}
