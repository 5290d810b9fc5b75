//! IRC wire protocol: message parsing, reply formatting, numeric codes.
//!
//! A wire line is `[:prefix] VERB [param ...] [:trailing]`. Clients rarely
//! send a prefix; when they do it is parsed and ignored for routing.

use std::fmt;

// Numeric replies (RFC 1459).
pub const RPL_WELCOME: &str = "001";
pub const RPL_YOURHOST: &str = "002";
pub const RPL_CREATED: &str = "003";
pub const RPL_MYINFO: &str = "004";
pub const RPL_CHANNELMODEIS: &str = "324";
pub const RPL_TOPIC: &str = "332";
pub const RPL_NAMREPLY: &str = "353";
pub const RPL_ENDOFNAMES: &str = "366";
pub const ERR_NOSUCHNICK: &str = "401";
pub const ERR_NOSUCHCHANNEL: &str = "403";
pub const ERR_CANNOTSENDTOCHAN: &str = "404";
pub const ERR_NORECIPIENT: &str = "411";
pub const ERR_NOTEXTTOSEND: &str = "412";
pub const ERR_UNKNOWNCOMMAND: &str = "421";
pub const ERR_NONICKNAMEGIVEN: &str = "431";
pub const ERR_ERRONEUSNICKNAME: &str = "432";
pub const ERR_NICKNAMEINUSE: &str = "433";
pub const ERR_USERNOTINCHANNEL: &str = "441";
pub const ERR_NOTONCHANNEL: &str = "442";
pub const ERR_USERONCHANNEL: &str = "443";
pub const ERR_NEEDMOREPARAMS: &str = "461";
pub const ERR_ALREADYREGISTERED: &str = "462";
pub const ERR_PASSWDMISMATCH: &str = "464";
pub const ERR_CHANNELISFULL: &str = "471";
pub const ERR_INVITEONLYCHAN: &str = "473";
pub const ERR_BADCHANNELKEY: &str = "475";
pub const ERR_CHANOPRIVSNEEDED: &str = "482";

/// Longest accepted nickname.
pub const MAX_NICK_LEN: usize = 9;

/// Longest accepted channel name, `#` included.
pub const MAX_CHANNEL_NAME_LEN: usize = 50;

/// A parsed IRC message: optional prefix, upper-cased verb, parameters in
/// wire order. The trailing parameter (introduced by `:`) may contain
/// spaces; all others are single tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl Message {
    /// Parse one framed line (terminator already stripped). Returns `None`
    /// for lines that are empty after trimming, or a bare prefix with no
    /// verb behind it.
    pub fn parse(line: &str) -> Option<Message> {
        let mut rest = line.trim();
        if rest.is_empty() {
            return None;
        }

        let mut prefix = None;
        if let Some(after_colon) = rest.strip_prefix(':') {
            let (p, after) = after_colon.split_once(' ')?;
            prefix = Some(p.to_string());
            rest = after;
        }

        rest = rest.trim_start_matches(' ');
        if rest.is_empty() {
            return None;
        }
        let (verb, mut rest) = match rest.split_once(' ') {
            Some((verb, rest)) => (verb, rest),
            None => (rest, ""),
        };
        let command = verb.to_ascii_uppercase();

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((token, remainder)) => {
                    params.push(token.to_string());
                    rest = remainder;
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        Some(Message {
            prefix,
            command,
            params,
        })
    }

    /// Build a server-originated reply: `:<server> <code> <params...>`.
    pub fn from_server(server: &str, command: &str, params: Vec<&str>) -> Message {
        Message {
            prefix: Some(server.to_string()),
            command: command.to_string(),
            params: params.into_iter().map(str::to_string).collect(),
        }
    }
}

impl fmt::Display for Message {
    /// Serialize to wire form, without the terminator. The last parameter
    /// gains a leading `:` only when it needs one (empty, contains a
    /// space, or itself starts with `:`), so format-then-parse returns the
    /// original parameter list.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref prefix) = self.prefix {
            write!(f, ":{prefix} ")?;
        }
        write!(f, "{}", self.command)?;
        for (i, param) in self.params.iter().enumerate() {
            let last = i + 1 == self.params.len();
            if last && (param.is_empty() || param.contains(' ') || param.starts_with(':')) {
                write!(f, " :{param}")?;
            } else {
                write!(f, " {param}")?;
            }
        }
        Ok(())
    }
}

/// Nickname validity: 1-9 characters, a leading letter, then letters,
/// digits, or any of ``-[]\`^{}_|``.
pub fn is_valid_nick(nick: &str) -> bool {
    if nick.len() > MAX_NICK_LEN {
        return false;
    }
    let mut chars = nick.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_alphabetic() {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || "-[]\\`^{}_|".contains(c))
}

/// Channel name validity: `#`-prefixed, at most 50 characters, and free of
/// spaces, commas, and control characters.
pub fn is_valid_channel_name(name: &str) -> bool {
    name.len() > 1
        && name.len() <= MAX_CHANNEL_NAME_LEN
        && name.starts_with('#')
        && !name.chars().any(|c| c == ' ' || c == ',' || c.is_control())
}
