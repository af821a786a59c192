use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

pub const PRIVMSG: &str = "PRIVMSG";
pub const NOTICE: &str = "NOTICE";
pub const PING: &str = "PING";
pub const PONG: &str = "PONG";
pub const QUIT: &str = "QUIT";
pub const NICK: &str = "NICK";
pub const USER: &str = "USER";
pub const ERROR: &str = "ERROR";
pub const RPL_WELCOME: &str = "001";

/// One IRC line: `[:prefix ]COMMAND[ params...][ :trailing]`.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct Message {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
    /// `Some("")` when the line ends in a bare `:`.
    pub trailing: Option<String>,
}

fn line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?::(\S+)\s+)?([^\s:]\S*)(.*)$").expect("line grammar regex is valid")
    })
}

impl Message {
    pub fn new<C: Into<String>>(command: C) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_trailing<T: Into<String>>(mut self, trailing: T) -> Self {
        self.trailing = Some(trailing.into());
        self
    }

    /// Lenient parse. Returns `None` only when there is no command token at all,
    /// anything else is taken at face value.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']).trim();
        let caps = line_regex().captures(line)?;

        let prefix = caps.get(1).map(|m| m.as_str().to_string());
        let command = caps.get(2)?.as_str().to_string();
        let rest = caps.get(3).map_or("", |m| m.as_str());

        let (params, trailing) = if let Some(trailing) = rest.trim_start().strip_prefix(':') {
            ("", Some(trailing))
        } else {
            match rest.split_once(" :") {
                Some((params, trailing)) => (params, Some(trailing)),
                None => (rest, None),
            }
        };

        Some(Self {
            prefix,
            command,
            params: params.split_whitespace().map(str::to_string).collect(),
            trailing: trailing.map(str::to_string),
        })
    }

    /// Nick part of a `nick!user@host` prefix.
    pub fn source_nick(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .map(|prefix| prefix.split_once('!').map_or(prefix, |(nick, _)| nick))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, ":{} ", prefix)?;
        }

        write!(f, "{}", self.command)?;

        for param in &self.params {
            write!(f, " {}", param)?;
        }

        if let Some(trailing) = &self.trailing {
            write!(f, " :{}", trailing)?;
        }

        Ok(())
    }
}
