//! Incremental state-machine parser.
//!
//! `Parser::parse` is fed whatever bytes a connection has read so far and
//! either returns a fully parsed `Command` (consuming exactly its bytes
//! from the buffer) or `Ok(None)` when more bytes are needed. Because it
//! only ever consumes complete commands, a caller can feed it the same
//! growing buffer across multiple reads and call it again after each
//! command to support pipelining.

use bytes::{Buf, BytesMut};

use super::command::{Command, ProtocolError};

/// No single command line should reasonably exceed this; guards against
/// a client streaming an unterminated line forever.
const MAX_LINE_LEN: usize = 8192;

/// Ceiling on a single entry's value length, matching the default
/// `MAX_SET_BYTES`. A `set` declaring more than this is rejected before
/// any data bytes are buffered.
const MAX_SET_BYTES: usize = 1024 * 1024;

/// Maximum key length, matching memcached's own limit.
const MAX_KEY_LEN: usize = 250;

#[derive(Debug)]
enum State {
    AwaitingLine,
    AwaitingData(PendingSet),
}

#[derive(Debug)]
struct PendingSet {
    key: Vec<u8>,
    flags: u32,
    exptime: i64,
    length: usize,
    noreply: bool,
}

pub struct Parser {
    state: State,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Parser { state: State::AwaitingLine }
    }

    /// Tries to parse one command out of `buf`. Consumes bytes from
    /// `buf` only for a command it successfully (or fatally) parses.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Command>, ProtocolError> {
        loop {
            match &self.state {
                State::AwaitingLine => match take_line(buf, MAX_LINE_LEN)? {
                    None => return Ok(None),
                    Some(line) => match parse_line(&line)? {
                        LineResult::Command(cmd) => return Ok(Some(cmd)),
                        LineResult::AwaitData(pending) => {
                            self.state = State::AwaitingData(pending);
                        }
                    },
                },
                State::AwaitingData(pending) => {
                    let length = pending.length;
                    let need = length + 2;
                    if buf.len() < need {
                        return Ok(None);
                    }
                    let chunk = buf.split_to(need);
                    let bad_terminator = &chunk[length..] != b"\r\n";
                    let data = chunk[..length].to_vec();
                    let PendingSet { key, flags, exptime, noreply, .. } =
                        std::mem::replace(&mut self.state, State::AwaitingLine)
                            .into_pending()
                            .expect("matched AwaitingData above");
                    if bad_terminator {
                        return Err(ProtocolError::BadDataChunk(length));
                    }
                    return Ok(Some(Command::Set { key, flags, exptime, data, noreply }));
                }
            }
        }
    }
}

impl State {
    fn into_pending(self) -> Option<PendingSet> {
        match self {
            State::AwaitingData(p) => Some(p),
            State::AwaitingLine => None,
        }
    }
}

enum LineResult {
    Command(Command),
    AwaitData(PendingSet),
}

/// Pulls one CRLF-terminated line out of `buf`, excluding the CRLF, or
/// `None` if the buffer doesn't contain a full line yet.
fn take_line(buf: &mut BytesMut, max_len: usize) -> Result<Option<Vec<u8>>, ProtocolError> {
    if let Some(pos) = find_crlf(buf) {
        let line = buf.split_to(pos).to_vec();
        buf.advance(2); // the CRLF itself
        Ok(Some(line))
    } else if buf.len() > max_len {
        Err(ProtocolError::LineTooLong)
    } else {
        Ok(None)
    }
}

fn find_crlf(buf: &BytesMut) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// A key must be 1-250 bytes of printable, non-whitespace ASCII — no
/// spaces (already excluded by line splitting), `\r`, `\n`, or other
/// control characters.
fn validate_key(key: &str) -> Result<(), ProtocolError> {
    if key.is_empty()
        || key.len() > MAX_KEY_LEN
        || !key.bytes().all(|b| (0x21..=0x7e).contains(&b))
    {
        return Err(ProtocolError::BadKey);
    }
    Ok(())
}

fn parse_line(line: &[u8]) -> Result<LineResult, ProtocolError> {
    let text = std::str::from_utf8(line).map_err(|_| ProtocolError::MalformedLine)?;
    let mut parts = text.split(' ').filter(|s| !s.is_empty());
    let verb = parts.next().ok_or(ProtocolError::MalformedLine)?;

    match verb {
        "get" => {
            let key = parts.next().ok_or(ProtocolError::MalformedLine)?;
            if parts.next().is_some() {
                // Multi-key get is out of scope; treat extra keys as malformed.
                return Err(ProtocolError::MalformedLine);
            }
            validate_key(key)?;
            Ok(LineResult::Command(Command::Get { key: key.as_bytes().to_vec() }))
        }
        "set" => {
            let key = parts.next().ok_or(ProtocolError::MalformedLine)?;
            validate_key(key)?;
            let key = key.as_bytes().to_vec();
            let flags: u32 = parts.next().and_then(|s| s.parse().ok()).ok_or(ProtocolError::MalformedLine)?;
            let exptime: i64 = parts.next().and_then(|s| s.parse().ok()).ok_or(ProtocolError::MalformedLine)?;
            let length: usize = parts.next().and_then(|s| s.parse().ok()).ok_or(ProtocolError::MalformedLine)?;
            if length > MAX_SET_BYTES {
                return Err(ProtocolError::BadDataChunk(length));
            }
            let noreply = matches!(parts.next(), Some("noreply"));
            if parts.next().is_some() {
                return Err(ProtocolError::MalformedLine);
            }
            Ok(LineResult::AwaitData(PendingSet { key, flags, exptime, length, noreply }))
        }
        "delete" => {
            let key = parts.next().ok_or(ProtocolError::MalformedLine)?;
            validate_key(key)?;
            let key = key.as_bytes().to_vec();
            let noreply = matches!(parts.next(), Some("noreply"));
            if parts.next().is_some() {
                return Err(ProtocolError::MalformedLine);
            }
            Ok(LineResult::Command(Command::Delete { key, noreply }))
        }
        "stats" => Ok(LineResult::Command(Command::Stats)),
        "flush_all" => Ok(LineResult::Command(Command::FlushAll)),
        "quit" => Ok(LineResult::Command(Command::Quit)),
        other => Err(ProtocolError::UnknownCommand(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_get() {
        let mut parser = Parser::new();
        let mut buf = BytesMut::from(&b"get foo\r\n"[..]);
        assert_eq!(
            parser.parse(&mut buf).unwrap(),
            Some(Command::Get { key: b"foo".to_vec() })
        );
    }

    #[test]
    fn parses_set_across_two_feeds() {
        let mut parser = Parser::new();
        let mut buf = BytesMut::from(&b"set foo 0 0 3\r\n"[..]);
        assert_eq!(parser.parse(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"bar\r\n");
        assert_eq!(
            parser.parse(&mut buf).unwrap(),
            Some(Command::Set {
                key: b"foo".to_vec(),
                flags: 0,
                exptime: 0,
                data: b"bar".to_vec(),
                noreply: false,
            })
        );
    }

    #[test]
    fn parses_pipelined_commands() {
        let mut parser = Parser::new();
        let mut buf = BytesMut::from(&b"delete a\r\ndelete b\r\n"[..]);
        assert_eq!(
            parser.parse(&mut buf).unwrap(),
            Some(Command::Delete { key: b"a".to_vec(), noreply: false })
        );
        assert_eq!(
            parser.parse(&mut buf).unwrap(),
            Some(Command::Delete { key: b"b".to_vec(), noreply: false })
        );
    }

    #[test]
    fn rejects_bad_data_terminator() {
        let mut parser = Parser::new();
        let mut buf = BytesMut::from(&b"set foo 0 0 3\r\nbarXX"[..]);
        assert!(matches!(parser.parse(&mut buf), Err(ProtocolError::BadDataChunk(3))));
    }

    #[test]
    fn unknown_command_is_an_error() {
        let mut parser = Parser::new();
        let mut buf = BytesMut::from(&b"frobnicate x\r\n"[..]);
        assert!(matches!(parser.parse(&mut buf), Err(ProtocolError::UnknownCommand(_))));
    }

    #[test]
    fn set_noreply_is_recognized() {
        let mut parser = Parser::new();
        let mut buf = BytesMut::from(&b"set foo 0 0 1 noreply\r\nx\r\n"[..]);
        match parser.parse(&mut buf).unwrap() {
            Some(Command::Set { noreply, .. }) => assert!(noreply),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn rejects_declared_length_over_max_set_bytes() {
        let mut parser = Parser::new();
        let line = format!("set foo 0 0 {}\r\n", MAX_SET_BYTES + 1);
        let mut buf = BytesMut::from(line.as_bytes());
        assert!(matches!(
            parser.parse(&mut buf),
            Err(ProtocolError::BadDataChunk(n)) if n == MAX_SET_BYTES + 1
        ));
    }

    #[test]
    fn rejects_key_over_max_key_len() {
        let mut parser = Parser::new();
        let key = "k".repeat(MAX_KEY_LEN + 1);
        let mut buf = BytesMut::from(format!("get {key}\r\n").as_bytes());
        assert!(matches!(parser.parse(&mut buf), Err(ProtocolError::BadKey)));
    }

    #[test]
    fn rejects_key_with_control_byte() {
        let mut parser = Parser::new();
        let mut buf = BytesMut::from(&b"delete foo\x01bar\r\n"[..]);
        assert!(matches!(parser.parse(&mut buf), Err(ProtocolError::BadKey)));
    }

    #[test]
    fn accepts_key_at_max_key_len() {
        let mut parser = Parser::new();
        let key = "k".repeat(MAX_KEY_LEN);
        let mut buf = BytesMut::from(format!("get {key}\r\n").as_bytes());
        assert_eq!(
            parser.parse(&mut buf).unwrap(),
            Some(Command::Get { key: key.into_bytes() })
        );
    }
}
