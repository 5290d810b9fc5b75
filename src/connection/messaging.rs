//! Message routing: PRIVMSG to a channel or to a single nick.

use std::sync::Arc;

use crate::irc::{self, Message};
use crate::server::SharedState;

use super::Connection;
use super::helpers::{broadcast_to_channel, send_to};

pub(super) fn handle_privmsg(conn: &Connection, msg: &Message, state: &Arc<SharedState>) {
    if !conn.registered {
        return;
    }
    if msg.params.is_empty() {
        let reply = Message::from_server(
            &state.server_name,
            irc::ERR_NORECIPIENT,
            vec![conn.nick_or_star(), "No recipient given (PRIVMSG)"],
        );
        send_to(state, conn.id, format!("{reply}\r\n"));
        return;
    }
    if msg.params.len() < 2 {
        let reply = Message::from_server(
            &state.server_name,
            irc::ERR_NOTEXTTOSEND,
            vec![conn.nick_or_star(), "No text to send"],
        );
        send_to(state, conn.id, format!("{reply}\r\n"));
        return;
    }

    let target = &msg.params[0];
    let text = &msg.params[1];

    if target.starts_with('#') {
        let channel_key = target.to_ascii_lowercase();
        let info = state
            .channels
            .lock()
            .unwrap()
            .get(&channel_key)
            .map(|ch| (ch.name.clone(), ch.members.contains(&conn.id)));
        let Some((stored_name, is_member)) = info else {
            let reply = Message::from_server(
                &state.server_name,
                irc::ERR_NOSUCHCHANNEL,
                vec![conn.nick_or_star(), target, "No such channel"],
            );
            send_to(state, conn.id, format!("{reply}\r\n"));
            return;
        };
        if !is_member {
            let reply = Message::from_server(
                &state.server_name,
                irc::ERR_CANNOTSENDTOCHAN,
                vec![conn.nick_or_star(), target, "Cannot send to channel"],
            );
            send_to(state, conn.id, format!("{reply}\r\n"));
            return;
        }
        let line = format!(":{} PRIVMSG {} :{}\r\n", conn.prefix(), stored_name, text);
        broadcast_to_channel(state, &channel_key, &line, Some(conn.id));
    } else {
        let Some(target_session) = state.nicks.lock().unwrap().get_session(target) else {
            let reply = Message::from_server(
                &state.server_name,
                irc::ERR_NOSUCHNICK,
                vec![conn.nick_or_star(), target, "No such nick/channel"],
            );
            send_to(state, conn.id, format!("{reply}\r\n"));
            return;
        };
        let line = format!(":{} PRIVMSG {} :{}\r\n", conn.prefix(), target, text);
        send_to(state, target_session, line);
    }
}
