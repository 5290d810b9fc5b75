//! Registration handshake: PASS, NICK, USER, and the welcome burst.
//!
//! A session is registered once the password has been accepted and both
//! identity halves (nickname, username) are present. Promotion happens in
//! the NICK and USER handlers only; a client that authenticates late must
//! resend one of them.

use std::sync::Arc;

use crate::irc::{self, Message};
use crate::server::SharedState;

use super::Connection;
use super::helpers::{need_more_params, send_to};

pub(super) fn handle_pass(conn: &mut Connection, msg: &Message, state: &Arc<SharedState>) {
    if conn.registered {
        let reply = Message::from_server(
            &state.server_name,
            irc::ERR_ALREADYREGISTERED,
            vec![conn.nick_or_star(), "You may not reregister"],
        );
        send_to(state, conn.id, format!("{reply}\r\n"));
        return;
    }
    let Some(pass) = msg.params.first() else {
        need_more_params(state, conn, "PASS");
        return;
    };
    if *pass == state.password {
        conn.authenticated = true;
    } else {
        // Not fatal; the client may retry.
        let reply = Message::from_server(
            &state.server_name,
            irc::ERR_PASSWDMISMATCH,
            vec![conn.nick_or_star(), "Password incorrect"],
        );
        send_to(state, conn.id, format!("{reply}\r\n"));
    }
}

pub(super) fn handle_nick(conn: &mut Connection, msg: &Message, state: &Arc<SharedState>) {
    let Some(nick) = msg.params.first() else {
        let reply = Message::from_server(
            &state.server_name,
            irc::ERR_NONICKNAMEGIVEN,
            vec![conn.nick_or_star(), "No nickname given"],
        );
        send_to(state, conn.id, format!("{reply}\r\n"));
        return;
    };
    if !irc::is_valid_nick(nick) {
        let reply = Message::from_server(
            &state.server_name,
            irc::ERR_ERRONEUSNICKNAME,
            vec![conn.nick_or_star(), nick, "Erroneous nickname"],
        );
        send_to(state, conn.id, format!("{reply}\r\n"));
        return;
    }

    // Check and claim under one lock so two clients cannot race the same
    // nick. A session may re-claim its own nick (e.g. to change case).
    let taken = {
        let mut nicks = state.nicks.lock().unwrap();
        match nicks.get_session(nick) {
            Some(holder) if holder != conn.id => true,
            _ => {
                nicks.insert(nick, conn.id);
                false
            }
        }
    };
    if taken {
        let reply = Message::from_server(
            &state.server_name,
            irc::ERR_NICKNAMEINUSE,
            vec![conn.nick_or_star(), nick, "Nickname is already in use"],
        );
        send_to(state, conn.id, format!("{reply}\r\n"));
        return;
    }

    let old_nick = conn.nick.replace(nick.clone());

    // A registered client renaming itself is announced to every other
    // registered session, once each.
    if conn.registered {
        if let Some(ref old) = old_nick {
            let prefix = format!(
                "{old}!{user}@{host}",
                user = conn.user.as_deref().unwrap_or("*"),
                host = conn.host
            );
            let line = format!(":{prefix} NICK {nick}\r\n");
            let registered = state.registered.lock().unwrap();
            let conns = state.connections.lock().unwrap();
            for session in registered.iter() {
                if *session == conn.id {
                    continue;
                }
                if let Some(tx) = conns.get(session) {
                    let _ = tx.try_send(line.clone());
                }
            }
        }
    }

    try_complete_registration(conn, state);
}

pub(super) fn handle_user(conn: &mut Connection, msg: &Message, state: &Arc<SharedState>) {
    if conn.registered {
        let reply = Message::from_server(
            &state.server_name,
            irc::ERR_ALREADYREGISTERED,
            vec![conn.nick_or_star(), "You may not reregister"],
        );
        send_to(state, conn.id, format!("{reply}\r\n"));
        return;
    }
    if msg.params.len() < 4 {
        need_more_params(state, conn, "USER");
        return;
    }
    conn.user = Some(msg.params[0].clone());
    // params[1] and params[2] (mode, unused) are accepted but not acted on.
    conn.realname = Some(msg.params[3].clone());
    try_complete_registration(conn, state);
}

/// Promote to registered once PASS, NICK, and USER have all landed, and
/// send the welcome sequence exactly once.
fn try_complete_registration(conn: &mut Connection, state: &Arc<SharedState>) {
    if conn.registered || !conn.authenticated || conn.nick.is_none() || conn.user.is_none() {
        return;
    }
    conn.registered = true;
    state.registered.lock().unwrap().insert(conn.id);

    if conn.welcome_sent {
        return;
    }
    conn.welcome_sent = true;

    let nick = conn.nick.clone().unwrap_or_default();
    let server = &state.server_name;
    let welcome = Message::from_server(
        server,
        irc::RPL_WELCOME,
        vec![
            &nick,
            &format!("Welcome to the Internet Relay Network {}", conn.prefix()),
        ],
    );
    let yourhost = Message::from_server(
        server,
        irc::RPL_YOURHOST,
        vec![&nick, &format!("Your host is {server}, running version 1.0")],
    );
    let created = Message::from_server(
        server,
        irc::RPL_CREATED,
        vec![
            &nick,
            &format!("This server was created {}", state.created_at),
        ],
    );
    let myinfo = Message::from_server(server, irc::RPL_MYINFO, vec![&nick, server, "1.0", "o", "itklno"]);

    for msg in [welcome, yourhost, created, myinfo] {
        send_to(state, conn.id, format!("{msg}\r\n"));
    }
    tracing::info!(session = conn.id, nick = %nick, "Client registered");
}
