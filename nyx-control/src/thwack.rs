//! Provider management ("thwack") line protocol.
//!
//! Line oriented, SMTP-like. The server greets with `220`, every command is
//! answered with `NNN text`; multi-line replies use `NNN-text` for all but the
//! last line.

use std::fmt;

use crate::{Error, Result};

pub const STATUS_SERVICE_READY: u16 = 220;
pub const STATUS_OK: u16 = 250;
pub const STATUS_UNKNOWN_COMMAND: u16 = 500;
pub const STATUS_SYNTAX_ERROR: u16 = 501;
pub const STATUS_TRANSACTION_FAILED: u16 = 554;

/// Maximum accepted line length, excluding the terminator.
pub const MAX_LINE_LEN: usize = 4096;

pub const CMD_ADD_USER: &str = "ADD_USER";
pub const CMD_REMOVE_USER: &str = "REMOVE_USER";
pub const CMD_QUIT: &str = "QUIT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    AddUser { user: String, key: String },
    RemoveUser { user: String },
    Quit,
}

/// Why a command line could not be turned into a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    Unknown(String),
    Syntax(String),
}

impl CommandError {
    pub fn status(&self) -> u16 {
        match self {
            Self::Unknown(_) => STATUS_UNKNOWN_COMMAND,
            Self::Syntax(_) => STATUS_SYNTAX_ERROR,
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(v) => write!(f, "unknown command: {v}"),
            Self::Syntax(v) => write!(f, "syntax error: {v}"),
        }
    }
}

impl Command {
    pub fn parse(line: &str) -> std::result::Result<Self, CommandError> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();
        match (verb.to_ascii_uppercase().as_str(), args.as_slice()) {
            (CMD_ADD_USER, [user, key]) => {
                Ok(Self::AddUser { user: (*user).to_string(), key: (*key).to_string() })
            }
            (CMD_ADD_USER, _) => Err(CommandError::Syntax(format!("{CMD_ADD_USER} <user> <key>"))),
            (CMD_REMOVE_USER, [user]) => Ok(Self::RemoveUser { user: (*user).to_string() }),
            (CMD_REMOVE_USER, _) => Err(CommandError::Syntax(format!("{CMD_REMOVE_USER} <user>"))),
            (CMD_QUIT, []) => Ok(Self::Quit),
            (CMD_QUIT, _) => Err(CommandError::Syntax(CMD_QUIT.to_string())),
            _ => Err(CommandError::Unknown(verb.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddUser { user, key } => write!(f, "{CMD_ADD_USER} {user} {key}"),
            Self::RemoveUser { user } => write!(f, "{CMD_REMOVE_USER} {user}"),
            Self::Quit => f.write_str(CMD_QUIT),
        }
    }
}

/// One parsed reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine<'a> {
    pub code: u16,
    /// `true` for `NNN-text`, i.e. more lines follow.
    pub more: bool,
    pub text: &'a str,
}

pub fn parse_reply_line(line: &str) -> Result<ReplyLine<'_>> {
    let line = line.trim_end_matches(['\r', '\n']);
    let digits = line.get(..3).filter(|d| d.bytes().all(|b| b.is_ascii_digit()));
    let Some(digits) = digits else {
        return Err(Error::protocol(format!("short or non-numeric reply: {line:?}")));
    };
    let code: u16 = digits.parse().map_err(|_| Error::protocol(format!("bad status: {line:?}")))?;
    let (more, text) = match line.as_bytes().get(3) {
        None => (false, ""),
        Some(b' ') => (false, &line[4..]),
        Some(b'-') => (true, &line[4..]),
        Some(_) => return Err(Error::protocol(format!("malformed reply: {line:?}"))),
    };
    Ok(ReplyLine { code, more, text })
}

/// Render a reply; every line but the last gets the `-` continuation marker.
pub fn format_reply(code: u16, lines: &[&str]) -> String {
    let mut out = String::new();
    let last = lines.len().saturating_sub(1);
    for (i, l) in lines.iter().enumerate() {
        let sep = if i == last { ' ' } else { '-' };
        out.push_str(&format!("{code}{sep}{l}\r\n"));
    }
    if lines.is_empty() {
        out.push_str(&format!("{code} \r\n"));
    }
    out
}
