//! Server state and TCP listener.

use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::connection;

/// Identifies one client connection for the lifetime of the process.
/// Ids come from an atomic counter and are never reused, so an id left
/// behind in a channel set simply stops resolving after teardown.
pub type SessionId = u64;

/// Listen backlog for the accept socket.
const LISTEN_BACKLOG: u32 = 10;

/// Upper bound on the invited set of a single channel.
pub const MAX_INVITED: usize = 64;

/// Two-way nickname registry. Lookups fold ASCII case; the stored display
/// form keeps the case the client chose.
#[derive(Debug, Default)]
pub struct NickMap {
    by_nick: HashMap<String, SessionId>,
    by_session: HashMap<SessionId, String>,
}

impl NickMap {
    pub fn get_session(&self, nick: &str) -> Option<SessionId> {
        self.by_nick.get(&nick.to_ascii_lowercase()).copied()
    }

    pub fn nick_of(&self, session: SessionId) -> Option<&str> {
        self.by_session.get(&session).map(String::as_str)
    }

    /// Bind `nick` to `session`, releasing any nick the session held before.
    pub fn insert(&mut self, nick: &str, session: SessionId) {
        if let Some(old) = self.by_session.insert(session, nick.to_string()) {
            self.by_nick.remove(&old.to_ascii_lowercase());
        }
        self.by_nick.insert(nick.to_ascii_lowercase(), session);
    }

    pub fn remove_session(&mut self, session: SessionId) {
        if let Some(old) = self.by_session.remove(&session) {
            self.by_nick.remove(&old.to_ascii_lowercase());
        }
    }
}

/// State for a single channel. The registry key is the lowercased name;
/// `name` keeps the case used when the channel was created.
#[derive(Debug, Default)]
pub struct ChannelState {
    pub name: String,
    pub members: HashSet<SessionId>,
    /// Channel operators. Always a subset of `members`.
    pub operators: HashSet<SessionId>,
    /// Sessions allowed past `+i`. Never contains a current member.
    pub invited: HashSet<SessionId>,
    /// Empty string means no topic is set.
    pub topic: String,
    pub invite_only: bool,
    pub topic_locked: bool,
    pub key: Option<String>,
    pub user_limit: Option<usize>,
}

impl ChannelState {
    pub fn new(name: &str) -> Self {
        ChannelState {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Record an invite. At the cap an arbitrary entry is evicted so the
    /// newest invite always lands.
    pub fn add_invite(&mut self, session: SessionId) {
        if self.invited.len() >= MAX_INVITED && !self.invited.contains(&session) {
            if let Some(&victim) = self.invited.iter().next() {
                self.invited.remove(&victim);
            }
        }
        self.invited.insert(session);
    }

    /// Summarise the active modes as `+<letters> [args...]`. Letters appear
    /// in `i t k l` order; the key and limit arguments follow in that order.
    pub fn mode_string(&self) -> String {
        let mut modes = String::from("+");
        let mut args: Vec<String> = Vec::new();
        if self.invite_only {
            modes.push('i');
        }
        if self.topic_locked {
            modes.push('t');
        }
        if let Some(ref key) = self.key {
            modes.push('k');
            args.push(key.clone());
        }
        if let Some(limit) = self.user_limit {
            modes.push('l');
            args.push(limit.to_string());
        }
        for arg in args {
            modes.push(' ');
            modes.push_str(&arg);
        }
        modes
    }

    /// NAMES list: every member's nick, operators prefixed with `@`,
    /// space separated. Sorted so replies are stable.
    pub fn names(&self, nicks: &NickMap) -> String {
        let mut list: Vec<String> = self
            .members
            .iter()
            .filter_map(|s| {
                nicks.nick_of(*s).map(|nick| {
                    if self.operators.contains(s) {
                        format!("@{nick}")
                    } else {
                        nick.to_string()
                    }
                })
            })
            .collect();
        list.sort();
        list.join(" ")
    }
}

/// Shared registry accessible by all connection tasks. The locks guard
/// plain maps and are only taken inside synchronous scopes, never across
/// an await.
pub struct SharedState {
    pub server_name: String,
    /// Startup time, reported in RPL_CREATED.
    pub created_at: String,
    pub password: String,
    /// session id -> sender for writing lines to that client
    pub connections: Mutex<HashMap<SessionId, mpsc::Sender<String>>>,
    /// nickname registry (case-insensitive)
    pub nicks: Mutex<NickMap>,
    /// sessions that have completed registration
    pub registered: Mutex<HashSet<SessionId>>,
    /// channel key (lowercase) -> channel state; holds exactly the
    /// channels with at least one member
    pub channels: Mutex<HashMap<String, ChannelState>>,
    next_session: AtomicU64,
}

impl SharedState {
    pub fn next_session_id(&self) -> SessionId {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }
}

pub struct Server {
    config: ServerConfig,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    fn build_state(&self) -> Arc<SharedState> {
        Arc::new(SharedState {
            server_name: self.config.server_name.clone(),
            created_at: chrono::Utc::now()
                .format("%a %b %d %Y %H:%M:%S UTC")
                .to_string(),
            password: self.config.password.clone(),
            connections: Mutex::new(HashMap::new()),
            nicks: Mutex::new(NickMap::default()),
            registered: Mutex::new(HashSet::new()),
            channels: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        })
    }

    fn bind(&self, ip: Ipv4Addr) -> Result<TcpListener> {
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(SocketAddr::from((ip, self.config.port)))?;
        Ok(socket.listen(LISTEN_BACKLOG)?)
    }

    /// Run the server until SIGINT or SIGTERM.
    pub async fn run(self) -> Result<()> {
        let listener = self.bind(Ipv4Addr::UNSPECIFIED)?;
        tracing::info!(port = self.config.port, "Listening");
        let state = self.build_state();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        });

        accept_loop(listener, state, shutdown_rx).await;
        tracing::info!("Server shut down");
        Ok(())
    }

    /// Bind an ephemeral loopback listener and run in the background (for
    /// testing). Returns the bound address and the shared state so tests
    /// can inspect and arrange registry contents.
    pub async fn start(self) -> Result<(SocketAddr, Arc<SharedState>, JoinHandle<()>)> {
        let listener = self.bind(Ipv4Addr::LOCALHOST)?;
        let addr = listener.local_addr()?;
        tracing::info!(%addr, "Listening");
        let state = self.build_state();

        let handle = {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                // Keep the sender alive for the life of the loop; it only
                // fires if this task is cancelled out from under it.
                let (_shutdown_tx, shutdown_rx) = watch::channel(false);
                accept_loop(listener, state, shutdown_rx).await;
            })
        };

        Ok((addr, state, handle))
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<SharedState>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let state = Arc::clone(&state);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = connection::handle(stream, state, shutdown).await {
                            tracing::warn!(error = %e, "Connection error");
                        }
                    });
                }
                Err(e) => tracing::error!(error = %e, "Accept error"),
            }
        }
    }
}

async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
    tracing::info!("Shutdown requested");
}
