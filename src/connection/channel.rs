//! Channel operations: join, part, topic, mode, kick, invite.
//!
//! Every handler requires a registered session and is silently a no-op
//! otherwise. Error replies echo the channel name as the client typed it;
//! relays and informational replies use the stored (creation-case) name.

use std::sync::Arc;

use crate::irc::{self, Message};
use crate::server::{ChannelState, SharedState};

use super::Connection;
use super::helpers::{broadcast_to_channel, need_more_params, send_to};

fn no_such_channel(state: &SharedState, conn: &Connection, name: &str) {
    let reply = Message::from_server(
        &state.server_name,
        irc::ERR_NOSUCHCHANNEL,
        vec![conn.nick_or_star(), name, "No such channel"],
    );
    send_to(state, conn.id, format!("{reply}\r\n"));
}

fn not_on_channel(state: &SharedState, conn: &Connection, name: &str) {
    let reply = Message::from_server(
        &state.server_name,
        irc::ERR_NOTONCHANNEL,
        vec![conn.nick_or_star(), name, "You're not on that channel"],
    );
    send_to(state, conn.id, format!("{reply}\r\n"));
}

fn not_channel_operator(state: &SharedState, conn: &Connection, name: &str) {
    let reply = Message::from_server(
        &state.server_name,
        irc::ERR_CHANOPRIVSNEEDED,
        vec![conn.nick_or_star(), name, "You're not channel operator"],
    );
    send_to(state, conn.id, format!("{reply}\r\n"));
}

enum JoinDenied {
    InviteOnly,
    BadKey,
    Full,
}

pub(super) fn handle_join(conn: &Connection, msg: &Message, state: &Arc<SharedState>) {
    if !conn.registered {
        return;
    }
    let Some(name) = msg.params.first() else {
        need_more_params(state, conn, "JOIN");
        return;
    };
    if !irc::is_valid_channel_name(name) {
        no_such_channel(state, conn, name);
        return;
    }
    let supplied_key = msg.params.get(1).map(String::as_str);
    let channel_key = name.to_ascii_lowercase();

    // Admission and membership update under one lock; broadcasts use a
    // snapshot taken after insertion.
    let admitted = {
        let mut channels = state.channels.lock().unwrap();
        match channels.get_mut(&channel_key) {
            Some(ch) => {
                if ch.members.contains(&conn.id) {
                    // Re-joining a joined channel is a complete no-op.
                    return;
                }
                if ch.invite_only && !ch.invited.contains(&conn.id) {
                    Err(JoinDenied::InviteOnly)
                } else if ch.key.as_deref().is_some_and(|key| Some(key) != supplied_key) {
                    Err(JoinDenied::BadKey)
                } else if ch.user_limit.is_some_and(|limit| ch.members.len() >= limit) {
                    Err(JoinDenied::Full)
                } else {
                    ch.members.insert(conn.id);
                    ch.invited.remove(&conn.id);
                    Ok(ch.name.clone())
                }
            }
            None => {
                // Lazily created on the first successful join. A brand-new
                // channel has no modes, so admission always succeeds. The
                // creator is not given operator status.
                let mut ch = ChannelState::new(name);
                ch.members.insert(conn.id);
                channels.insert(channel_key.clone(), ch);
                Ok(name.to_string())
            }
        }
    };

    let stored_name = match admitted {
        Ok(stored_name) => stored_name,
        Err(denied) => {
            let (code, text) = match denied {
                JoinDenied::InviteOnly => (irc::ERR_INVITEONLYCHAN, "Cannot join channel (+i)"),
                JoinDenied::BadKey => (irc::ERR_BADCHANNELKEY, "Cannot join channel (+k)"),
                JoinDenied::Full => (irc::ERR_CHANNELISFULL, "Cannot join channel (+l)"),
            };
            let reply = Message::from_server(
                &state.server_name,
                code,
                vec![conn.nick_or_star(), name, text],
            );
            send_to(state, conn.id, format!("{reply}\r\n"));
            return;
        }
    };

    // Everyone in the channel, the joiner included, sees the JOIN.
    let join_line = format!(":{} JOIN {}\r\n", conn.prefix(), stored_name);
    broadcast_to_channel(state, &channel_key, &join_line, None);

    let nick = conn.nick_or_star();
    let (topic, names) = {
        let channels = state.channels.lock().unwrap();
        let nicks = state.nicks.lock().unwrap();
        match channels.get(&channel_key) {
            Some(ch) => (ch.topic.clone(), ch.names(&nicks)),
            None => (String::new(), String::new()),
        }
    };
    if !topic.is_empty() {
        let reply = Message::from_server(
            &state.server_name,
            irc::RPL_TOPIC,
            vec![nick, &stored_name, &topic],
        );
        send_to(state, conn.id, format!("{reply}\r\n"));
    }
    let names_reply = Message::from_server(
        &state.server_name,
        irc::RPL_NAMREPLY,
        vec![nick, "=", &stored_name, &names],
    );
    let end_names = Message::from_server(
        &state.server_name,
        irc::RPL_ENDOFNAMES,
        vec![nick, &stored_name, "End of /NAMES list"],
    );
    send_to(state, conn.id, format!("{names_reply}\r\n"));
    send_to(state, conn.id, format!("{end_names}\r\n"));
}

pub(super) fn handle_part(conn: &Connection, msg: &Message, state: &Arc<SharedState>) {
    if !conn.registered {
        return;
    }
    let Some(name) = msg.params.first() else {
        need_more_params(state, conn, "PART");
        return;
    };
    let channel_key = name.to_ascii_lowercase();

    let stored = state
        .channels
        .lock()
        .unwrap()
        .get(&channel_key)
        .filter(|ch| ch.members.contains(&conn.id))
        .map(|ch| ch.name.clone());
    let Some(stored_name) = stored else {
        not_on_channel(state, conn, name);
        return;
    };

    // The parting member sees their own PART before removal.
    let part_line = match msg.params.get(1) {
        Some(reason) => format!(":{} PART {} :{}\r\n", conn.prefix(), stored_name, reason),
        None => format!(":{} PART {}\r\n", conn.prefix(), stored_name),
    };
    broadcast_to_channel(state, &channel_key, &part_line, None);

    let mut channels = state.channels.lock().unwrap();
    let now_empty = channels
        .get_mut(&channel_key)
        .map(|ch| {
            ch.members.remove(&conn.id);
            ch.operators.remove(&conn.id);
            ch.members.is_empty()
        })
        .unwrap_or(false);
    if now_empty {
        channels.remove(&channel_key);
    }
}

pub(super) fn handle_topic(conn: &Connection, msg: &Message, state: &Arc<SharedState>) {
    if !conn.registered {
        return;
    }
    let Some(name) = msg.params.first() else {
        need_more_params(state, conn, "TOPIC");
        return;
    };
    let channel_key = name.to_ascii_lowercase();

    let info = state.channels.lock().unwrap().get(&channel_key).map(|ch| {
        (
            ch.name.clone(),
            ch.topic.clone(),
            ch.members.contains(&conn.id),
            ch.operators.contains(&conn.id),
            ch.topic_locked,
        )
    });
    let Some((stored_name, topic, is_member, is_op, locked)) = info else {
        no_such_channel(state, conn, name);
        return;
    };
    if !is_member {
        not_on_channel(state, conn, name);
        return;
    }

    match msg.params.get(1) {
        None => {
            // Query. An unset topic stays silent.
            if !topic.is_empty() {
                let reply = Message::from_server(
                    &state.server_name,
                    irc::RPL_TOPIC,
                    vec![conn.nick_or_star(), &stored_name, &topic],
                );
                send_to(state, conn.id, format!("{reply}\r\n"));
            }
        }
        Some(text) => {
            if locked && !is_op {
                not_channel_operator(state, conn, name);
                return;
            }
            if let Some(ch) = state.channels.lock().unwrap().get_mut(&channel_key) {
                ch.topic = text.clone();
            }
            let line = format!(":{} TOPIC {} :{}\r\n", conn.prefix(), stored_name, text);
            broadcast_to_channel(state, &channel_key, &line, None);
        }
    }
}

pub(super) fn handle_mode(conn: &Connection, msg: &Message, state: &Arc<SharedState>) {
    if !conn.registered {
        return;
    }
    let Some(target) = msg.params.first() else {
        need_more_params(state, conn, "MODE");
        return;
    };
    if !target.starts_with('#') {
        // User-targeted MODE is accepted syntactically and ignored.
        return;
    }
    let channel_key = target.to_ascii_lowercase();

    let info = state.channels.lock().unwrap().get(&channel_key).map(|ch| {
        (
            ch.name.clone(),
            ch.members.contains(&conn.id),
            ch.operators.contains(&conn.id),
            ch.mode_string(),
        )
    });
    let Some((stored_name, is_member, is_op, mode_string)) = info else {
        no_such_channel(state, conn, target);
        return;
    };
    if !is_member {
        not_on_channel(state, conn, target);
        return;
    }

    let Some(flags) = msg.params.get(1) else {
        // Query: 324 with the current mode summary, arguments as separate
        // parameters.
        let mut params = vec![conn.nick_or_star(), stored_name.as_str()];
        params.extend(mode_string.split(' '));
        let reply = Message::from_server(&state.server_name, irc::RPL_CHANNELMODEIS, params);
        send_to(state, conn.id, format!("{reply}\r\n"));
        return;
    };

    if !is_op {
        not_channel_operator(state, conn, target);
        return;
    }

    // Flags are processed left to right with a sticky sign. Mode arguments
    // are consumed in order by the letters that take one.
    let mut args = msg.params.iter().skip(2);
    let mut adding = true;
    {
        let mut channels = state.channels.lock().unwrap();
        let Some(ch) = channels.get_mut(&channel_key) else {
            return;
        };
        for flag in flags.chars() {
            match flag {
                '+' => adding = true,
                '-' => adding = false,
                'i' => ch.invite_only = adding,
                't' => ch.topic_locked = adding,
                'k' => {
                    if adding {
                        if let Some(key) = args.next() {
                            ch.key = Some(key.clone());
                        }
                    } else {
                        // -k consumes no argument.
                        ch.key = None;
                    }
                }
                'l' => {
                    if adding {
                        if let Some(arg) = args.next() {
                            match arg.parse::<usize>() {
                                Ok(limit) if limit > 0 => ch.user_limit = Some(limit),
                                _ => {}
                            }
                        }
                    } else {
                        ch.user_limit = None;
                    }
                }
                'o' => {
                    // Grant or revoke only for current members; silently
                    // skipped otherwise. The argument is consumed either way.
                    if let Some(target_nick) = args.next() {
                        let target_session = state.nicks.lock().unwrap().get_session(target_nick);
                        if let Some(session) = target_session {
                            if ch.members.contains(&session) {
                                if adding {
                                    ch.operators.insert(session);
                                } else {
                                    ch.operators.remove(&session);
                                }
                            }
                        }
                    }
                }
                // Unrecognised mode letters are ignored.
                _ => {}
            }
        }
    }

    // The flag string is echoed as received, even when letters were dropped.
    let line = format!(":{} MODE {} {}\r\n", conn.prefix(), stored_name, flags);
    broadcast_to_channel(state, &channel_key, &line, None);
}

pub(super) fn handle_kick(conn: &Connection, msg: &Message, state: &Arc<SharedState>) {
    if !conn.registered {
        return;
    }
    if msg.params.len() < 2 {
        need_more_params(state, conn, "KICK");
        return;
    }
    let name = &msg.params[0];
    let target_nick = &msg.params[1];
    let channel_key = name.to_ascii_lowercase();

    let info = state.channels.lock().unwrap().get(&channel_key).map(|ch| {
        (
            ch.name.clone(),
            ch.members.contains(&conn.id),
            ch.operators.contains(&conn.id),
        )
    });
    let Some((stored_name, is_member, is_op)) = info else {
        no_such_channel(state, conn, name);
        return;
    };
    if !is_member {
        not_on_channel(state, conn, name);
        return;
    }
    if !is_op {
        not_channel_operator(state, conn, name);
        return;
    }

    let target = state.nicks.lock().unwrap().get_session(target_nick);
    let target_in_channel = target.is_some_and(|session| {
        state
            .channels
            .lock()
            .unwrap()
            .get(&channel_key)
            .is_some_and(|ch| ch.members.contains(&session))
    });
    let Some(target_session) = target.filter(|_| target_in_channel) else {
        let reply = Message::from_server(
            &state.server_name,
            irc::ERR_USERNOTINCHANNEL,
            vec![
                conn.nick_or_star(),
                target_nick,
                name,
                "They aren't on that channel",
            ],
        );
        send_to(state, conn.id, format!("{reply}\r\n"));
        return;
    };

    let reason = msg
        .params
        .get(2)
        .map(String::as_str)
        .unwrap_or(conn.nick_or_star());

    // Everyone, the target included, sees the KICK before removal.
    let kick_line = format!(
        ":{} KICK {} {} :{}\r\n",
        conn.prefix(),
        stored_name,
        target_nick,
        reason
    );
    broadcast_to_channel(state, &channel_key, &kick_line, None);

    let mut channels = state.channels.lock().unwrap();
    let now_empty = channels
        .get_mut(&channel_key)
        .map(|ch| {
            ch.members.remove(&target_session);
            ch.operators.remove(&target_session);
            ch.members.is_empty()
        })
        .unwrap_or(false);
    if now_empty {
        channels.remove(&channel_key);
    }
}

pub(super) fn handle_invite(conn: &Connection, msg: &Message, state: &Arc<SharedState>) {
    if !conn.registered {
        return;
    }
    if msg.params.len() < 2 {
        need_more_params(state, conn, "INVITE");
        return;
    }
    let target_nick = &msg.params[0];
    let name = &msg.params[1];
    let channel_key = name.to_ascii_lowercase();

    let info = state.channels.lock().unwrap().get(&channel_key).map(|ch| {
        (
            ch.name.clone(),
            ch.members.contains(&conn.id),
            ch.operators.contains(&conn.id),
        )
    });
    let Some((stored_name, is_member, is_op)) = info else {
        no_such_channel(state, conn, name);
        return;
    };
    if !is_member {
        not_on_channel(state, conn, name);
        return;
    }
    if !is_op {
        not_channel_operator(state, conn, name);
        return;
    }

    let Some(target_session) = state.nicks.lock().unwrap().get_session(target_nick) else {
        let reply = Message::from_server(
            &state.server_name,
            irc::ERR_NOSUCHNICK,
            vec![conn.nick_or_star(), target_nick, "No such nick/channel"],
        );
        send_to(state, conn.id, format!("{reply}\r\n"));
        return;
    };

    let already_member = state
        .channels
        .lock()
        .unwrap()
        .get(&channel_key)
        .is_some_and(|ch| ch.members.contains(&target_session));
    if already_member {
        let reply = Message::from_server(
            &state.server_name,
            irc::ERR_USERONCHANNEL,
            vec![
                conn.nick_or_star(),
                target_nick,
                name,
                "is already on channel",
            ],
        );
        send_to(state, conn.id, format!("{reply}\r\n"));
        return;
    }

    if let Some(ch) = state.channels.lock().unwrap().get_mut(&channel_key) {
        ch.add_invite(target_session);
    }

    let line = format!(
        ":{} INVITE {} {}\r\n",
        conn.prefix(),
        target_nick,
        stored_name
    );
    send_to(state, target_session, line);
}
