use bytes::{Buf, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest bulk payload accepted from a peer.
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
/// Largest element count accepted for one array header.
const MAX_ARRAY_LEN: i64 = 1024 * 1024;
/// Upper bound on the slots reserved up front for a declared array length.
const ARRAY_PREALLOC: usize = 1024;

/// A RESP2 value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK\r\n
    SimpleString(String),
    /// -ERR message\r\n
    Error(String),
    /// :1000\r\n
    Integer(i64),
    /// $6\r\nfoobar\r\n
    BulkString(Vec<u8>),
    /// *2\r\n... (an empty array is not Null)
    Array(Vec<RespValue>),
    /// $-1\r\n
    Null,
}

impl RespValue {
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Vec<u8>>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn array(items: Vec<RespValue>) -> Self {
        RespValue::Array(items)
    }

    /// Build a command array from its words, the form clients send.
    pub fn command<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        RespValue::Array(
            words
                .into_iter()
                .map(|w| RespValue::BulkString(w.as_ref().to_vec()))
                .collect(),
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Serialize this value to RESP bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.write_to(&mut buf);
        buf
    }

    /// Write RESP bytes into the given buffer.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => write_line(buf, b'+', s.as_bytes()),
            RespValue::Error(s) => write_line(buf, b'-', s.as_bytes()),
            RespValue::Integer(n) => write_line(buf, b':', n.to_string().as_bytes()),
            RespValue::BulkString(data) => {
                write_line(buf, b'$', data.len().to_string().as_bytes());
                buf.extend_from_slice(data);
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::Array(items) => {
                write_line(buf, b'*', items.len().to_string().as_bytes());
                for item in items {
                    item.write_to(buf);
                }
            }
            RespValue::Null => buf.extend_from_slice(b"$-1\r\n"),
        }
    }

    /// Number of bytes `serialize` produces. Replication offsets are
    /// measured in this unit.
    pub fn encoded_len(&self) -> usize {
        fn digits(n: usize) -> usize {
            n.to_string().len()
        }
        match self {
            RespValue::SimpleString(s) | RespValue::Error(s) => s.len() + 3,
            RespValue::Integer(n) => n.to_string().len() + 3,
            RespValue::BulkString(data) => digits(data.len()) + data.len() + 5,
            RespValue::Array(items) => {
                digits(items.len()) + 3 + items.iter().map(RespValue::encoded_len).sum::<usize>()
            }
            RespValue::Null => 5,
        }
    }

    /// Raw bytes of a string-like value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(data) => Some(data),
            RespValue::SimpleString(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Convert to a UTF-8 string, if possible.
    pub fn to_string_lossy(&self) -> Option<String> {
        self.as_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

fn write_line(buf: &mut Vec<u8>, prefix: u8, body: &[u8]) {
    buf.push(prefix);
    buf.extend_from_slice(body);
    buf.extend_from_slice(b"\r\n");
}

/// Incremental RESP parser over a receive buffer.
///
/// `parse` returns `Ok(None)` and leaves the buffer untouched until a
/// complete value is present.
pub struct RespParser;

impl RespParser {
    pub fn parse(buf: &mut BytesMut) -> Result<Option<RespValue>, RespError> {
        match parse_at(buf, 0)? {
            Some((value, end)) => {
                buf.advance(end);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

/// Parse one value starting at `pos`, returning it with the index just past it.
fn parse_at(buf: &[u8], pos: usize) -> Result<Option<(RespValue, usize)>, RespError> {
    let Some(&kind) = buf.get(pos) else {
        return Ok(None);
    };
    let Some(line_end) = find_crlf_from(buf, pos + 1) else {
        return Ok(None);
    };
    let line = &buf[pos + 1..line_end];
    let next = line_end + 2;

    match kind {
        b'+' => Ok(Some((RespValue::SimpleString(lossy(line)), next))),
        b'-' => Ok(Some((RespValue::Error(lossy(line)), next))),
        b':' => Ok(Some((RespValue::Integer(parse_int(line, "integer")?), next))),
        b'$' => {
            let len = parse_int(line, "bulk length")?;
            if len == -1 {
                return Ok(Some((RespValue::Null, next)));
            }
            if !(0..=MAX_BULK_LEN).contains(&len) {
                return Err(RespError::InvalidData("invalid bulk length".into()));
            }
            let end = next + len as usize;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(RespError::InvalidData(
                    "missing CRLF after bulk string".into(),
                ));
            }
            Ok(Some((RespValue::BulkString(buf[next..end].to_vec()), end + 2)))
        }
        b'*' => {
            let len = parse_int(line, "multibulk length")?;
            if len == -1 {
                return Ok(Some((RespValue::Null, next)));
            }
            if !(0..=MAX_ARRAY_LEN).contains(&len) {
                return Err(RespError::InvalidData("invalid multibulk length".into()));
            }
            let mut items = Vec::with_capacity((len as usize).min(ARRAY_PREALLOC));
            let mut cursor = next;
            for _ in 0..len {
                match parse_at(buf, cursor)? {
                    Some((item, after)) => {
                        items.push(item);
                        cursor = after;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespValue::Array(items), cursor)))
        }
        other => Err(RespError::InvalidByte(other)),
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn parse_int(bytes: &[u8], what: &str) -> Result<i64, RespError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| RespError::InvalidData(format!("invalid {what}")))
}

/// Find \r\n starting from the given position.
fn find_crlf_from(buf: &[u8], start: usize) -> Option<usize> {
    buf.get(start..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|i| start + i)
}

/// Buffered RESP decoder over an async byte source.
///
/// Bytes read past the end of one value stay buffered for the next call, so
/// a peer that sends several frames in one segment (a FULLRESYNC line, the
/// snapshot blob and the first propagated commands) loses nothing.
pub struct RespReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> RespReader<R> {
    pub fn new(inner: R) -> Self {
        RespReader {
            inner,
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Read one complete value. `Ok(None)` means the peer closed the stream,
    /// whether or not a partial value was pending.
    pub async fn read_value(&mut self) -> Result<Option<RespValue>, RespError> {
        loop {
            if let Some(value) = RespParser::parse(&mut self.buf)? {
                return Ok(Some(value));
            }
            if !self.fill().await? {
                return Ok(None);
            }
        }
    }

    /// Read a `$<len>\r\n` header followed by exactly `len` raw bytes with no
    /// trailing terminator.
    pub async fn read_snapshot(&mut self) -> Result<Option<Vec<u8>>, RespError> {
        loop {
            if let Some(line_end) = find_crlf_from(&self.buf, 0) {
                if self.buf[0] != b'$' {
                    return Err(RespError::InvalidByte(self.buf[0]));
                }
                let len = parse_int(&self.buf[1..line_end], "snapshot length")?;
                if !(0..=MAX_BULK_LEN).contains(&len) {
                    return Err(RespError::InvalidData("invalid snapshot length".into()));
                }
                let start = line_end + 2;
                let end = start + len as usize;
                if self.buf.len() >= end {
                    let blob = self.buf[start..end].to_vec();
                    self.buf.advance(end);
                    return Ok(Some(blob));
                }
            }
            if !self.fill().await? {
                return Ok(None);
            }
        }
    }

    async fn fill(&mut self) -> Result<bool, RespError> {
        let n = self.inner.read_buf(&mut self.buf).await?;
        Ok(n > 0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RespError {
    #[error("unexpected type byte '{}'", *.0 as char)]
    InvalidByte(u8),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
