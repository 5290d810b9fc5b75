//! Delivery helpers and session teardown.

use std::collections::HashSet;

use crate::irc::{self, Message};
use crate::server::{SessionId, SharedState};

use super::Connection;

/// Queue a line for one session. Sends are best-effort: a full or closed
/// queue means the client is stuck or gone, and its own read loop will
/// notice and tear it down.
pub(crate) fn send_to(state: &SharedState, session: SessionId, line: String) {
    if let Some(tx) = state.connections.lock().unwrap().get(&session) {
        let _ = tx.try_send(line);
    }
}

/// Send a pre-formatted line to every member of a channel, optionally
/// excluding one session (the sender of a PRIVMSG).
pub(crate) fn broadcast_to_channel(
    state: &SharedState,
    channel_key: &str,
    line: &str,
    exclude: Option<SessionId>,
) {
    let members: Vec<SessionId> = state
        .channels
        .lock()
        .unwrap()
        .get(channel_key)
        .map(|ch| ch.members.iter().copied().collect())
        .unwrap_or_default();

    let conns = state.connections.lock().unwrap();
    for member in &members {
        if Some(*member) == exclude {
            continue;
        }
        if let Some(tx) = conns.get(member) {
            let _ = tx.try_send(line.to_string());
        }
    }
}

/// `461 ERR_NEEDMOREPARAMS` for the given command.
pub(super) fn need_more_params(state: &SharedState, conn: &Connection, command: &str) {
    let reply = Message::from_server(
        &state.server_name,
        irc::ERR_NEEDMOREPARAMS,
        vec![conn.nick_or_star(), command, "Not enough parameters"],
    );
    send_to(state, conn.id, format!("{reply}\r\n"));
}

/// Remove a session from the registry: relay its QUIT at most once to
/// every peer sharing a channel with it, drop it from every member,
/// operator, and invited set, and reap channels left empty. Runs for
/// every way a session ends (QUIT, EOF, error, oversize, shutdown).
pub(crate) fn teardown_session(state: &SharedState, conn: &Connection, reason: &str) {
    let quit_line = format!(":{} QUIT :{}\r\n", conn.prefix(), reason);

    let mut notified: HashSet<SessionId> = HashSet::new();
    notified.insert(conn.id);
    {
        let mut channels = state.channels.lock().unwrap();
        {
            let conns = state.connections.lock().unwrap();
            for ch in channels.values() {
                if !ch.members.contains(&conn.id) {
                    continue;
                }
                for member in &ch.members {
                    if notified.insert(*member) {
                        if let Some(tx) = conns.get(member) {
                            let _ = tx.try_send(quit_line.clone());
                        }
                    }
                }
            }
        }
        for ch in channels.values_mut() {
            ch.members.remove(&conn.id);
            ch.operators.remove(&conn.id);
            ch.invited.remove(&conn.id);
        }
        channels.retain(|_, ch| !ch.members.is_empty());
    }

    state.nicks.lock().unwrap().remove_session(conn.id);
    state.registered.lock().unwrap().remove(&conn.id);
    state.connections.lock().unwrap().remove(&conn.id);
}
