//! RESP2 framing: command encoding and incremental reply parsing.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Largest bulk string accepted, matching the server's `proto-max-bulk-len`
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Deepest array nesting accepted
pub const MAX_DEPTH: usize = 16;

/// Smallest encoding of one value, e.g. `+\r\n`
const MIN_VALUE_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Array(Vec<RespValue>),
    Null,
}

impl RespValue {
    /// Text of a simple or bulk string.
    pub fn as_text(&self) -> Option<String> {
        match self {
            RespValue::Simple(s) => Some(s.clone()),
            RespValue::Bulk(b) => String::from_utf8(b.to_vec()).ok(),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[RespValue]> {
        match self {
            RespValue::Array(items) => Some(items),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RespError {
    #[error("invalid type byte {0:#04x}")]
    InvalidType(u8),

    #[error("invalid integer {0:?}")]
    InvalidInteger(String),

    #[error("invalid length {0}")]
    InvalidLength(i64),

    #[error("length {0} exceeds limit")]
    TooLarge(i64),

    #[error("arrays nested deeper than {MAX_DEPTH}")]
    TooDeep,

    #[error("bulk string not terminated by CRLF")]
    MissingTerminator,

    #[error("invalid UTF-8 in status line")]
    InvalidUtf8,
}

/// Append `args` as a RESP array of bulk strings.
pub fn encode_command(args: &[&str], out: &mut BytesMut) {
    out.put_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        out.put_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.put_slice(arg.as_bytes());
        out.put_slice(b"\r\n");
    }
}

/// Parse one complete value from the front of `buf`.
///
/// Returns the value and the bytes it consumed, or `None` when `buf` holds
/// only part of a value.
pub fn parse(buf: &[u8]) -> Result<Option<(RespValue, usize)>, RespError> {
    parse_at(buf, 0, 0)
}

fn parse_at(buf: &[u8], pos: usize, depth: usize) -> Result<Option<(RespValue, usize)>, RespError> {
    if depth > MAX_DEPTH {
        return Err(RespError::TooDeep);
    }
    let Some(&kind) = buf.get(pos) else {
        return Ok(None);
    };
    let Some((line, next)) = read_line(buf, pos + 1) else {
        return Ok(None);
    };

    match kind {
        b'+' => Ok(Some((RespValue::Simple(text(line)?), next))),
        b'-' => Ok(Some((RespValue::Error(text(line)?), next))),
        b':' => Ok(Some((RespValue::Integer(integer(line)?), next))),
        b'$' => {
            let len = integer(line)?;
            if len == -1 {
                return Ok(Some((RespValue::Null, next)));
            }
            let len = length(len)?;
            if len > MAX_BULK_LEN {
                return Err(RespError::TooLarge(len as i64));
            }
            let end = next + len;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(RespError::MissingTerminator);
            }
            let bulk = Bytes::copy_from_slice(&buf[next..end]);
            Ok(Some((RespValue::Bulk(bulk), end + 2)))
        }
        b'*' => {
            let count = integer(line)?;
            if count == -1 {
                return Ok(Some((RespValue::Null, next)));
            }
            let count = length(count)?;

            // Every element takes at least MIN_VALUE_LEN bytes of what is buffered
            let remaining = buf.len().saturating_sub(next) / MIN_VALUE_LEN;
            let mut items = Vec::with_capacity(count.min(remaining));
            let mut cursor = next;
            for _ in 0..count {
                match parse_at(buf, cursor, depth + 1)? {
                    Some((item, after)) => {
                        items.push(item);
                        cursor = after;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespValue::Array(items), cursor)))
        }
        other => Err(RespError::InvalidType(other)),
    }
}

fn length(raw: i64) -> Result<usize, RespError> {
    usize::try_from(raw).map_err(|_| RespError::InvalidLength(raw))
}

fn read_line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(start..)?;
    let offset = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..offset], start + offset + 2))
}

fn text(line: &[u8]) -> Result<String, RespError> {
    std::str::from_utf8(line)
        .map(str::to_string)
        .map_err(|_| RespError::InvalidUtf8)
}

fn integer(line: &[u8]) -> Result<i64, RespError> {
    let s = text(line)?;
    s.parse().map_err(|_| RespError::InvalidInteger(s))
}
