use bytes::{Buf, BufMut, Bytes, BytesMut};

const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
const MAX_ARRAY_LEN: i64 = 1024 * 1024;
const MAX_INLINE_LEN: usize = 64 * 1024;
const MAX_DEPTH: usize = 32;

/// A RESP2 value.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// +OK\r\n
    SimpleString(String),
    /// -ERR message\r\n
    Error(String),
    /// :1000\r\n
    Integer(i64),
    /// $6\r\nfoobar\r\n  or  $-1\r\n (null)
    BulkString(Option<Bytes>),
    /// *2\r\n...  or  *-1\r\n (null)
    Array(Option<Vec<RespValue>>),
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

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    pub fn null_bulk_string() -> Self {
        RespValue::BulkString(None)
    }

    pub fn array(items: Vec<RespValue>) -> Self {
        RespValue::Array(Some(items))
    }

    /// Build a command frame: an array of bulk strings.
    pub fn command<I, B>(parts: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        RespValue::Array(Some(
            parts.into_iter().map(|p| RespValue::bulk_string(p)).collect(),
        ))
    }

    /// Serialize this value to RESP bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        buf.to_vec()
    }

    /// Append the RESP encoding of this value to `buf`.
    pub fn write_to(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => write_line(buf, b'+', s.as_bytes()),
            RespValue::Error(s) => write_line(buf, b'-', s.as_bytes()),
            RespValue::Integer(n) => write_line(buf, b':', n.to_string().as_bytes()),
            RespValue::BulkString(None) => buf.put_slice(b"$-1\r\n"),
            RespValue::BulkString(Some(data)) => {
                write_line(buf, b'$', data.len().to_string().as_bytes());
                buf.put_slice(data);
                buf.put_slice(b"\r\n");
            }
            RespValue::Array(None) => buf.put_slice(b"*-1\r\n"),
            RespValue::Array(Some(items)) => {
                write_line(buf, b'*', items.len().to_string().as_bytes());
                for item in items {
                    item.write_to(buf);
                }
            }
        }
    }

    /// Borrow the payload of a string-like value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(Some(data)) => Some(data),
            RespValue::SimpleString(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Take the payload of a string-like value without copying bulk data.
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            RespValue::BulkString(Some(data)) => Some(data),
            RespValue::SimpleString(s) => Some(Bytes::from(s)),
            _ => None,
        }
    }

    pub fn to_string_lossy(&self) -> Option<String> {
        self.as_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

fn write_line(buf: &mut BytesMut, prefix: u8, body: &[u8]) {
    buf.put_u8(prefix);
    buf.put_slice(body);
    buf.put_slice(b"\r\n");
}

/// Streaming RESP parser.
///
/// Call `parse()` each time more data arrives. A value is only consumed from
/// the buffer once it is complete; `Ok(None)` leaves the buffer untouched.
pub struct RespParser;

impl RespParser {
    pub fn parse(buf: &mut BytesMut) -> Result<Option<RespValue>, RespError> {
        while !buf.is_empty() && !matches!(buf[0], b'+' | b'-' | b':' | b'$' | b'*') {
            match parse_inline(buf)? {
                None => return Ok(None),
                // Blank lines are consumed without producing a request.
                Some(items) if items.is_empty() => continue,
                Some(items) => return Ok(Some(RespValue::Array(Some(items)))),
            }
        }
        if buf.is_empty() {
            return Ok(None);
        }
        match decode(buf, 0, 0)? {
            Some((value, consumed)) => {
                buf.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

/// Decode one value starting at `pos`. Returns the value and the position just
/// past it, or `None` if the buffer ends first.
fn decode(buf: &[u8], pos: usize, depth: usize) -> Result<Option<(RespValue, usize)>, RespError> {
    if depth > MAX_DEPTH {
        return Err(RespError::InvalidData("nesting too deep".into()));
    }
    let Some((line, next)) = line_at(buf, pos + 1) else {
        return Ok(None);
    };

    match buf[pos] {
        b'+' => Ok(Some((RespValue::SimpleString(lossy(line)), next))),
        b'-' => Ok(Some((RespValue::Error(lossy(line)), next))),
        b':' => Ok(Some((RespValue::Integer(parse_int(line, "integer")?), next))),
        b'$' => {
            let len = parse_int(line, "bulk length")?;
            if len == -1 {
                return Ok(Some((RespValue::BulkString(None), next)));
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
                    "missing trailing CRLF after bulk string".into(),
                ));
            }
            let data = Bytes::copy_from_slice(&buf[next..end]);
            Ok(Some((RespValue::BulkString(Some(data)), end + 2)))
        }
        b'*' => {
            let len = parse_int(line, "multibulk length")?;
            if len == -1 {
                return Ok(Some((RespValue::Array(None), next)));
            }
            if !(0..=MAX_ARRAY_LEN).contains(&len) {
                return Err(RespError::InvalidData("invalid multibulk length".into()));
            }
            let mut items = Vec::with_capacity(len as usize);
            let mut cursor = next;
            for _ in 0..len {
                if cursor >= buf.len() {
                    return Ok(None);
                }
                match decode(buf, cursor, depth + 1)? {
                    Some((item, after)) => {
                        items.push(item);
                        cursor = after;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespValue::Array(Some(items)), cursor)))
        }
        other => Err(RespError::InvalidByte(other)),
    }
}

/// The bytes between `start` and the next CRLF, plus the position after it.
fn line_at(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
    if start > buf.len() {
        return None;
    }
    buf[start..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|off| (&buf[start..start + off], start + off + 2))
}

fn parse_int(line: &[u8], what: &str) -> Result<i64, RespError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| RespError::InvalidData(format!("invalid {what}")))
}

fn lossy(line: &[u8]) -> String {
    String::from_utf8_lossy(line).into_owned()
}

/// Inline commands (`SET k v\r\n`, as typed into telnet) become an array of
/// bulk strings. A bare newline terminator is accepted too.
fn parse_inline(buf: &mut BytesMut) -> Result<Option<Vec<RespValue>>, RespError> {
    let Some(nl) = buf.iter().position(|&b| b == b'\n') else {
        if buf.len() > MAX_INLINE_LEN {
            return Err(RespError::InvalidData("inline command too long".into()));
        }
        return Ok(None);
    };
    let line = buf.split_to(nl + 1);
    let line = line.strip_suffix(b"\n").unwrap_or(&line[..]);
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    let items = tokenize_inline(line)?
        .into_iter()
        .map(|t| RespValue::BulkString(Some(Bytes::from(t))))
        .collect();
    Ok(Some(items))
}

/// Split on whitespace. Double quotes support `\"`, `\\`, `\n`, `\r`, `\t`;
/// single quotes are taken literally.
fn tokenize_inline(line: &[u8]) -> Result<Vec<Vec<u8>>, RespError> {
    let mut tokens = Vec::new();
    let mut current: Option<Vec<u8>> = None;
    let mut iter = line.iter().copied();

    while let Some(b) = iter.next() {
        match b {
            b'"' => {
                let tok = current.get_or_insert_with(Vec::new);
                loop {
                    match iter.next() {
                        Some(b'"') => break,
                        Some(b'\\') => match iter.next() {
                            Some(b'n') => tok.push(b'\n'),
                            Some(b'r') => tok.push(b'\r'),
                            Some(b't') => tok.push(b'\t'),
                            Some(other) => tok.push(other),
                            None => break,
                        },
                        Some(other) => tok.push(other),
                        None => {
                            return Err(RespError::InvalidData(
                                "unbalanced quotes in request".into(),
                            ));
                        }
                    }
                }
            }
            b'\'' => {
                let tok = current.get_or_insert_with(Vec::new);
                loop {
                    match iter.next() {
                        Some(b'\'') => break,
                        Some(other) => tok.push(other),
                        None => {
                            return Err(RespError::InvalidData(
                                "unbalanced quotes in request".into(),
                            ));
                        }
                    }
                }
            }
            b if b.is_ascii_whitespace() => {
                if let Some(tok) = current.take() {
                    tokens.push(tok);
                }
            }
            other => current.get_or_insert_with(Vec::new).push(other),
        }
    }
    if let Some(tok) = current {
        tokens.push(tok);
    }
    Ok(tokens)
}

#[derive(Debug, thiserror::Error)]
pub enum RespError {
    #[error("unexpected type byte '{}'", *.0 as char)]
    InvalidByte(u8),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(input: &str) -> RespValue {
        let mut buf = BytesMut::from(input);
        let value = RespParser::parse(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty(), "leftover bytes: {buf:?}");
        value
    }

    fn bulk(s: &str) -> RespValue {
        RespValue::bulk_string(s.as_bytes().to_vec())
    }

    #[test]
    fn test_parse_scalars() {
        assert_eq!(parse_one("+OK\r\n"), RespValue::ok());
        assert_eq!(
            parse_one("-ERR unknown command\r\n"),
            RespValue::error("ERR unknown command")
        );
        assert_eq!(parse_one(":-42\r\n"), RespValue::Integer(-42));
        assert_eq!(parse_one("$6\r\nfoobar\r\n"), bulk("foobar"));
        assert_eq!(parse_one("$0\r\n\r\n"), bulk(""));
        assert_eq!(parse_one("$-1\r\n"), RespValue::null_bulk_string());
    }

    #[test]
    fn test_parse_arrays() {
        assert_eq!(
            parse_one("*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n"),
            RespValue::array(vec![bulk("GET"), bulk("foo")])
        );
        assert_eq!(parse_one("*-1\r\n"), RespValue::Array(None));
        assert_eq!(parse_one("*0\r\n"), RespValue::array(vec![]));
        assert_eq!(
            parse_one("*2\r\n*1\r\n:1\r\n$-1\r\n"),
            RespValue::array(vec![
                RespValue::array(vec![RespValue::Integer(1)]),
                RespValue::null_bulk_string(),
            ])
        );
    }

    #[test]
    fn test_partial_input_is_not_consumed() {
        for partial in ["$6\r\nfoo", "*2\r\n$3\r\nGET\r\n", "*2\r\n$3\r\nGET\r\n$3\r\nfo", ":12"] {
            let mut buf = BytesMut::from(partial);
            assert!(RespParser::parse(&mut buf).unwrap().is_none());
            assert_eq!(&buf[..], partial.as_bytes());
        }
    }

    #[test]
    fn test_frame_split_across_reads() {
        let mut buf = BytesMut::from("*2\r\n$3\r\nGET\r\n$3\r\nk");
        assert!(RespParser::parse(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"ey\r\n+PONG\r\n");
        assert_eq!(
            RespParser::parse(&mut buf).unwrap().unwrap(),
            RespValue::array(vec![bulk("GET"), bulk("key")])
        );
        assert_eq!(
            RespParser::parse(&mut buf).unwrap().unwrap(),
            RespValue::simple_string("PONG")
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_malformed_frames() {
        for bad in ["$abc\r\n", "$3\r\nfooXX", "*-5\r\n", ":12x\r\n"] {
            let mut buf = BytesMut::from(bad);
            assert!(RespParser::parse(&mut buf).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_inline_commands() {
        assert_eq!(
            parse_one("SET user:1 '{\"name\":\"a\"}'\r\n"),
            RespValue::array(vec![bulk("SET"), bulk("user:1"), bulk("{\"name\":\"a\"}")])
        );
        assert_eq!(
            parse_one("set k \"a b\\n\"\n"),
            RespValue::array(vec![bulk("set"), bulk("k"), bulk("a b\n")])
        );
        assert_eq!(parse_one("\r\n\n   \r\nPING\r\n"), RespValue::array(vec![bulk("PING")]));

        let mut buf = BytesMut::from("\r\n\r\n");
        assert_eq!(RespParser::parse(&mut buf).unwrap(), None);
        assert!(buf.is_empty());

        let mut buf = BytesMut::from("\r\n*1\r\n$4\r\nPING\r\n");
        assert_eq!(
            RespParser::parse(&mut buf).unwrap(),
            Some(RespValue::array(vec![bulk("PING")]))
        );

        let mut buf = BytesMut::from("GET \"oops\r\n");
        assert!(RespParser::parse(&mut buf).is_err());
    }

    #[test]
    fn test_serialize() {
        let value = RespValue::array(vec![
            bulk("foo"),
            RespValue::null_bulk_string(),
            RespValue::Integer(42),
            RespValue::ok(),
            RespValue::error("ERR bad"),
        ]);
        assert_eq!(
            value.serialize(),
            b"*5\r\n$3\r\nfoo\r\n$-1\r\n:42\r\n+OK\r\n-ERR bad\r\n"
        );
        assert_eq!(RespValue::Array(None).serialize(), b"*-1\r\n");
    }

    #[test]
    fn test_command_builder() {
        let cmd = RespValue::command([&b"EXPIREAT"[..], b"k", b"10"]);
        assert_eq!(
            cmd.serialize(),
            b"*3\r\n$8\r\nEXPIREAT\r\n$1\r\nk\r\n$2\r\n10\r\n"
        );
    }
}
