//! RESP2 codec
//!
//! Encodes commands as arrays of bulk strings and incrementally decodes
//! replies from a read buffer.

use crate::error::{ClusterError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// A decoded server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK`
    Status(String),
    /// `-ERR ...`
    Error(String),
    /// `:42`
    Integer(i64),
    /// `$N` bulk string, `None` for the null bulk string
    Bulk(Option<Bytes>),
    /// `*N` array, `None` for the null array
    Array(Option<Vec<Reply>>),
}

impl Reply {
    /// Build a bulk reply from text
    pub fn bulk(text: impl Into<String>) -> Self {
        Reply::Bulk(Some(Bytes::from(text.into())))
    }

    /// Null bulk or null array
    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Bulk(None) | Reply::Array(None))
    }

    /// Text content of status and UTF-8 bulk replies
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reply::Status(s) => Some(s),
            Reply::Bulk(Some(b)) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Integer replies, or text replies holding an integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Reply::Integer(n) => Some(*n),
            other => other.as_str().and_then(|s| s.parse().ok()),
        }
    }

    /// Elements of a non-null array
    pub fn as_array(&self) -> Option<&[Reply]> {
        match self {
            Reply::Array(Some(items)) => Some(items),
            _ => None,
        }
    }

    /// Owned text content, lossy for non UTF-8 bulk strings
    pub fn into_string(self) -> Option<String> {
        match self {
            Reply::Status(s) => Some(s),
            Reply::Bulk(Some(b)) => Some(String::from_utf8_lossy(&b).into_owned()),
            _ => None,
        }
    }
}

/// Encode a command as a RESP array of bulk strings
///
/// # Example
/// ```
/// use slotroute::resp::encode_command;
///
/// let frame = encode_command(&["GET", "foo"]);
/// assert_eq!(&frame[..], b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n");
/// ```
pub fn encode_command<T: AsRef<[u8]>>(tokens: &[T]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(16 + tokens.len() * 16);
    buf.put_slice(format!("*{}\r\n", tokens.len()).as_bytes());
    for token in tokens {
        let token = token.as_ref();
        buf.put_slice(format!("${}\r\n", token.len()).as_bytes());
        buf.put_slice(token);
        buf.put_slice(b"\r\n");
    }
    buf
}

/// Decode one reply from the front of `buf`
///
/// Returns `Ok(None)` and leaves `buf` untouched when the frame is not yet
/// complete.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Reply>> {
    match parse(&buf[..], 0)? {
        Some((reply, consumed)) => {
            buf.advance(consumed);
            Ok(Some(reply))
        }
        None => Ok(None),
    }
}

fn parse(src: &[u8], pos: usize) -> Result<Option<(Reply, usize)>> {
    let Some(line_end) = find_crlf(src, pos) else {
        return Ok(None);
    };
    if line_end == pos {
        return Err(ClusterError::Protocol("empty frame header".to_string()));
    }

    let line = &src[pos + 1..line_end];
    let next = line_end + 2;

    match src[pos] {
        b'+' => Ok(Some((Reply::Status(text(line)?), next))),
        b'-' => Ok(Some((Reply::Error(text(line)?), next))),
        b':' => Ok(Some((Reply::Integer(integer(line)?), next))),
        b'$' => {
            let len = integer(line)?;
            if len == -1 {
                return Ok(Some((Reply::Bulk(None), next)));
            }
            let len = usize::try_from(len)
                .map_err(|_| ClusterError::Protocol(format!("invalid bulk length {}", len)))?;
            if src.len() < next + len + 2 {
                return Ok(None);
            }
            if &src[next + len..next + len + 2] != b"\r\n" {
                return Err(ClusterError::Protocol(
                    "bulk string not terminated by CRLF".to_string(),
                ));
            }
            let body = Bytes::copy_from_slice(&src[next..next + len]);
            Ok(Some((Reply::Bulk(Some(body)), next + len + 2)))
        }
        b'*' => {
            let len = integer(line)?;
            if len == -1 {
                return Ok(Some((Reply::Array(None), next)));
            }
            let len = usize::try_from(len)
                .map_err(|_| ClusterError::Protocol(format!("invalid array length {}", len)))?;
            let mut items = Vec::with_capacity(len.min(1024));
            let mut cursor = next;
            for _ in 0..len {
                match parse(src, cursor)? {
                    Some((item, end)) => {
                        items.push(item);
                        cursor = end;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((Reply::Array(Some(items)), cursor)))
        }
        other => Err(ClusterError::Protocol(format!(
            "unexpected type byte 0x{:02x}",
            other
        ))),
    }
}

fn find_crlf(src: &[u8], from: usize) -> Option<usize> {
    src.get(from..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|p| p + from)
}

fn text(line: &[u8]) -> Result<String> {
    std::str::from_utf8(line)
        .map(str::to_string)
        .map_err(|e| ClusterError::Protocol(format!("invalid UTF-8 in reply: {}", e)))
}

fn integer(line: &[u8]) -> Result<i64> {
    text(line)?
        .parse()
        .map_err(|e| ClusterError::Protocol(format!("invalid integer in reply: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Result<Option<Reply>> {
        let mut buf = BytesMut::from(input);
        decode(&mut buf)
    }

    #[test]
    fn test_encode_command() {
        let frame = encode_command(&["CLUSTER", "SLOTS"]);
        assert_eq!(&frame[..], b"*2\r\n$7\r\nCLUSTER\r\n$5\r\nSLOTS\r\n");

        let frame = encode_command(&["ASKING"]);
        assert_eq!(&frame[..], b"*1\r\n$6\r\nASKING\r\n");
    }

    #[test]
    fn test_decode_scalars() {
        assert_eq!(
            decode_all(b"+OK\r\n").unwrap(),
            Some(Reply::Status("OK".into()))
        );
        assert_eq!(
            decode_all(b"-MOVED 3999 127.0.0.1:6381\r\n").unwrap(),
            Some(Reply::Error("MOVED 3999 127.0.0.1:6381".into()))
        );
        assert_eq!(decode_all(b":-42\r\n").unwrap(), Some(Reply::Integer(-42)));
        assert_eq!(decode_all(b"$-1\r\n").unwrap(), Some(Reply::Bulk(None)));
        assert_eq!(decode_all(b"$0\r\n\r\n").unwrap(), Some(Reply::bulk("")));
        assert_eq!(decode_all(b"*-1\r\n").unwrap(), Some(Reply::Array(None)));
    }

    #[test]
    fn test_decode_nested_array() {
        let input = b"*2\r\n:1\r\n*2\r\n$3\r\nfoo\r\n$-1\r\n";
        let reply = decode_all(input).unwrap().unwrap();
        assert_eq!(
            reply,
            Reply::Array(Some(vec![
                Reply::Integer(1),
                Reply::Array(Some(vec![Reply::bulk("foo"), Reply::Bulk(None)])),
            ]))
        );
    }

    #[test]
    fn test_decode_partial_frame_keeps_buffer() {
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nfoo\r\n$3\r\nba"[..]);
        assert_eq!(decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 19);

        buf.extend_from_slice(b"r\r\n+PONG\r\n");
        let first = decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            first,
            Reply::Array(Some(vec![Reply::bulk("foo"), Reply::bulk("bar")]))
        );
        let second = decode(&mut buf).unwrap().unwrap();
        assert_eq!(second, Reply::Status("PONG".into()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_all(b"?what\r\n").is_err());
        assert!(decode_all(b":abc\r\n").is_err());
        assert!(decode_all(b"$3\r\nfooXX").is_err());
        assert!(decode_all(b"$-5\r\n").is_err());
    }

    #[test]
    fn test_reply_accessors() {
        assert_eq!(Reply::bulk("12").as_int(), Some(12));
        assert_eq!(Reply::Integer(7).as_int(), Some(7));
        assert_eq!(Reply::Status("OK".into()).as_str(), Some("OK"));
        assert!(Reply::Bulk(None).is_nil());
        assert_eq!(Reply::bulk("x").into_string(), Some("x".to_string()));
        assert!(Reply::Integer(1).as_array().is_none());
    }
}
