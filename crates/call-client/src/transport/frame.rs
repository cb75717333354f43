//! STOMP 1.2 frame codec.
//!
//! A frame is `COMMAND\n`, zero or more `name:value\n` headers, a blank
//! line, the body, and a NUL octet. One WebSocket text message carries one
//! frame. A message holding only end-of-line octets is a heart-beat.
//!
//! Header values are escaped (`\\`, `\n`, `\c`, `\r`) on every frame except
//! CONNECT and CONNECTED. When a header repeats, the first value wins.

use std::fmt;
use thiserror::Error;

/// Frame codec errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Empty frame")]
    Empty,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Malformed header line: {0}")]
    MalformedHeader(String),

    #[error("Invalid escape sequence in header: {0}")]
    InvalidEscape(String),

    #[error("Invalid content-length: {0}")]
    InvalidContentLength(String),

    #[error("Frame is missing the NUL terminator")]
    MissingTerminator,
}

/// Frame commands used by this client and its broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Subscribe,
    Unsubscribe,
    Send,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Send => "SEND",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    fn parse(raw: &str) -> Result<Self, FrameError> {
        Ok(match raw {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "CONNECTED" => Command::Connected,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "SEND" => Command::Send,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        })
    }

    /// CONNECT and CONNECTED frames carry raw header values.
    const fn escapes_headers(self) -> bool {
        !matches!(self, Command::Connect | Command::Stomp | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    /// Create a frame with no headers and an empty body.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Serialize to wire text, NUL-terminated.
    ///
    /// Adds `content-length` for non-empty bodies.
    #[must_use]
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                push_escaped(&mut out, name);
                out.push(':');
                push_escaped(&mut out, value);
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str("content-length:");
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse wire text.
    ///
    /// Returns `Ok(None)` for heart-beats.
    ///
    /// # Errors
    ///
    /// Returns `FrameError` if the text is not a well-formed frame.
    pub fn decode(text: &str) -> Result<Option<Self>, FrameError> {
        // Frames may be preceded by heart-beat EOLs
        let text = text.trim_start_matches(['\r', '\n']);
        if text.is_empty() {
            return Ok(None);
        }

        let (head, rest) = split_head(text).ok_or(FrameError::MissingTerminator)?;
        let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

        let command = Command::parse(lines.next().ok_or(FrameError::Empty)?)?;
        let escaped = command.escapes_headers();

        let mut headers: Vec<(String, String)> = Vec::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
            let (name, value) = if escaped {
                (unescape(name)?, unescape(value)?)
            } else {
                (name.to_string(), value.to_string())
            };
            headers.push((name, value));
        }

        let content_length = headers
            .iter()
            .find(|(n, _)| n == "content-length")
            .map(|(_, v)| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| FrameError::InvalidContentLength(v.clone()))
            })
            .transpose()?;

        let body = match content_length {
            Some(len) => {
                let body = rest
                    .get(..len)
                    .ok_or_else(|| FrameError::InvalidContentLength(len.to_string()))?;
                if !rest.get(len..).is_some_and(|r| r.starts_with('\0')) {
                    return Err(FrameError::MissingTerminator);
                }
                body
            }
            None => {
                let end = rest.find('\0').ok_or(FrameError::MissingTerminator)?;
                rest.get(..end).ok_or(FrameError::MissingTerminator)?
            }
        };

        Ok(Some(Self {
            command,
            headers,
            body: body.to_string(),
        }))
    }
}

/// Split at the blank line ending the header block.
fn split_head(text: &str) -> Option<(&str, &str)> {
    let lf = text.find("\n\n").map(|i| (i, 2));
    let crlf = text.find("\r\n\r\n").map(|i| (i, 4));
    let (idx, sep) = match (lf, crlf) {
        (Some(a), Some(b)) => std::cmp::min_by_key(a, b, |(i, _)| *i),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    Some((text.get(..idx)?, text.get(idx + sep..)?))
}

fn push_escaped(out: &mut String, raw: &str) {
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape(raw: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(raw.to_string())),
        }
    }
    Ok(out)
}
