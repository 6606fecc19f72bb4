//! RESP (REdis Serialization Protocol) framing
//!
//! `RespCodec` plugs into `tokio_util::codec::Framed`. Requests arrive either
//! as arrays of bulk strings (what every client library sends) or as inline
//! commands (a plain whitespace-separated line, as typed into telnet).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

const MAX_BULK_LEN: usize = 512 * 1024 * 1024;
// Requests are flat arrays of a few arguments
const MAX_ARRAY_LEN: usize = 1024;
const MAX_INLINE_LEN: usize = 64 * 1024;

/// One RESP value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
}

impl Frame {
    pub fn ok() -> Self {
        Frame::Simple("OK".to_string())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Frame::Error(message.into())
    }

    fn encode_into(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => {
                dst.put_u8(b'+');
                dst.put_slice(s.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Frame::Error(s) => {
                dst.put_u8(b'-');
                // A line break would end the frame early
                dst.put_slice(s.replace(['\r', '\n'], " ").as_bytes());
                dst.put_slice(b"\r\n");
            }
            Frame::Integer(n) => {
                dst.put_slice(format!(":{}\r\n", n).as_bytes());
            }
            Frame::Bulk(data) => {
                dst.put_slice(format!("${}\r\n", data.len()).as_bytes());
                dst.put_slice(data);
                dst.put_slice(b"\r\n");
            }
            Frame::Null => dst.put_slice(b"$-1\r\n"),
            Frame::Array(items) => {
                dst.put_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.encode_into(dst);
                }
            }
        }
    }
}

/// The peer sent bytes that are not valid RESP
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Protocol error: {0}")]
    Invalid(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn invalid(message: impl Into<String>) -> ProtocolError {
    ProtocolError::Invalid(message.into())
}

#[derive(Debug, Default)]
pub struct RespCodec {
    /// Buffer length the pending frame needs before it is worth parsing again
    want: usize,
}

impl RespCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for RespCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        loop {
            if src.is_empty() {
                return Ok(None);
            }
            if !is_type_byte(src[0]) {
                match decode_inline(src)? {
                    Inline::Incomplete => return Ok(None),
                    // Blank lines between commands are ignored
                    Inline::Blank => continue,
                    Inline::Frame(frame) => return Ok(Some(frame)),
                }
            }
            if src.len() < self.want {
                return Ok(None);
            }
            return match parse_frame(src, 0, false)? {
                Parsed::Frame(frame, consumed) => {
                    self.want = 0;
                    src.advance(consumed);
                    Ok(Some(frame))
                }
                Parsed::Need(len) => {
                    self.want = len;
                    Ok(None)
                }
            };
        }
    }
}

impl Encoder<Frame> for RespCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        frame.encode_into(dst);
        Ok(())
    }
}

fn is_type_byte(b: u8) -> bool {
    matches!(b, b'*' | b'$' | b'+' | b'-' | b':')
}

enum Inline {
    Incomplete,
    Blank,
    Frame(Frame),
}

fn decode_inline(src: &mut BytesMut) -> Result<Inline, ProtocolError> {
    let Some(newline) = src.iter().position(|b| *b == b'\n') else {
        if src.len() > MAX_INLINE_LEN {
            return Err(invalid("too big inline request"));
        }
        return Ok(Inline::Incomplete);
    };

    let raw = src.split_to(newline + 1);
    let line: &[u8] = &raw;
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    let args: Vec<Frame> = line
        .split(|b| b.is_ascii_whitespace())
        .filter(|arg| !arg.is_empty())
        .map(|arg| Frame::Bulk(Bytes::copy_from_slice(arg)))
        .collect();
    if args.is_empty() {
        Ok(Inline::Blank)
    } else {
        Ok(Inline::Frame(Frame::Array(args)))
    }
}

/// Find the CRLF-terminated line starting at `pos`; returns (line, next position)
fn read_line(src: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rest = src.get(pos..)?;
    let end = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..end], pos + end + 2))
}

fn parse_int(line: &[u8]) -> Result<i64, ProtocolError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| invalid("invalid length or integer"))
}

fn parse_len(line: &[u8], max: usize, what: &str) -> Result<Option<usize>, ProtocolError> {
    match parse_int(line)? {
        -1 => Ok(None),
        n if n < 0 => Err(invalid(format!("invalid {} length", what))),
        n if n as u64 > max as u64 => Err(invalid(format!("invalid {} length", what))),
        n => Ok(Some(n as usize)),
    }
}

enum Parsed {
    /// A complete frame and the position just past it
    Frame(Frame, usize),
    /// Incomplete; the buffer must reach this length before retrying
    Need(usize),
}

/// Parse one frame starting at `pos` without consuming anything.
/// Arrays may only hold scalar frames.
fn parse_frame(src: &[u8], pos: usize, in_array: bool) -> Result<Parsed, ProtocolError> {
    let Some(&type_byte) = src.get(pos) else {
        return Ok(Parsed::Need(pos + 1));
    };
    if in_array && type_byte == b'*' {
        return Err(invalid("nested arrays are not allowed"));
    }
    let Some((line, next)) = read_line(src, pos + 1) else {
        if src.len() - pos > MAX_INLINE_LEN {
            return Err(invalid("line too long"));
        }
        return Ok(Parsed::Need(src.len() + 1));
    };

    match type_byte {
        b'+' => Ok(Parsed::Frame(Frame::Simple(String::from_utf8_lossy(line).into_owned()), next)),
        b'-' => Ok(Parsed::Frame(Frame::Error(String::from_utf8_lossy(line).into_owned()), next)),
        b':' => Ok(Parsed::Frame(Frame::Integer(parse_int(line)?), next)),
        b'$' => {
            let Some(len) = parse_len(line, MAX_BULK_LEN, "bulk")? else {
                return Ok(Parsed::Frame(Frame::Null, next));
            };
            let end = next + len;
            if src.len() < end + 2 {
                return Ok(Parsed::Need(end + 2));
            }
            if &src[end..end + 2] != b"\r\n" {
                return Err(invalid("bulk string not terminated by CRLF"));
            }
            Ok(Parsed::Frame(Frame::Bulk(Bytes::copy_from_slice(&src[next..end])), end + 2))
        }
        b'*' => {
            let Some(len) = parse_len(line, MAX_ARRAY_LEN, "multibulk")? else {
                return Ok(Parsed::Frame(Frame::Null, next));
            };
            let mut items = Vec::with_capacity(len);
            let mut cursor = next;
            for _ in 0..len {
                match parse_frame(src, cursor, true)? {
                    Parsed::Frame(item, after) => {
                        items.push(item);
                        cursor = after;
                    }
                    need => return Ok(need),
                }
            }
            Ok(Parsed::Frame(Frame::Array(items), cursor))
        }
        other => Err(invalid(format!("unexpected type byte '{}'", other as char))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Result<Vec<Frame>, ProtocolError> {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::from(input);
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut buf)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn bulk(s: &str) -> Frame {
        Frame::Bulk(Bytes::copy_from_slice(s.as_bytes()))
    }

    fn encode(frame: Frame) -> Vec<u8> {
        let mut buf = BytesMut::new();
        RespCodec::new().encode(frame, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn test_decode_array_of_bulk_strings() {
        let frames = decode_all(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n").unwrap();
        assert_eq!(frames, vec![Frame::Array(vec![bulk("SET"), bulk("foo"), bulk("bar")])]);
    }

    #[test]
    fn test_decode_binary_bulk_with_crlf_inside() {
        let frames = decode_all(b"*1\r\n$4\r\na\r\nb\r\n").unwrap();
        assert_eq!(frames, vec![Frame::Array(vec![bulk("a\r\nb")])]);
    }

    #[test]
    fn test_decode_waits_for_complete_frame() {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$3\r\nfo"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        // Nothing consumed while incomplete
        assert_eq!(buf.len(), 19);

        buf.extend_from_slice(b"o\r\n");
        let frame = codec.decode(&mut buf).unwrap();
        assert_eq!(frame, Some(Frame::Array(vec![bulk("GET"), bulk("foo")])));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_pipelined_requests() {
        let frames = decode_all(b"*2\r\n$3\r\nGET\r\n$1\r\na\r\n*2\r\n$3\r\nGET\r\n$1\r\nb\r\n").unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], Frame::Array(vec![bulk("GET"), bulk("b")]));
    }

    #[test]
    fn test_decode_inline_command() {
        let frames = decode_all(b"\r\nset  foo bar\r\nGET foo\n").unwrap();
        assert_eq!(
            frames,
            vec![
                Frame::Array(vec![bulk("set"), bulk("foo"), bulk("bar")]),
                Frame::Array(vec![bulk("GET"), bulk("foo")]),
            ]
        );
    }

    #[test]
    fn test_decode_empty_array() {
        assert_eq!(decode_all(b"*0\r\n").unwrap(), vec![Frame::Array(vec![])]);
    }

    #[test]
    fn test_decode_rejects_malformed_lengths() {
        assert!(matches!(decode_all(b"*x\r\n"), Err(ProtocolError::Invalid(_))));
        assert!(matches!(decode_all(b"$-5\r\n"), Err(ProtocolError::Invalid(_))));
        assert!(matches!(decode_all(b"$3\r\nabcde\r\n"), Err(ProtocolError::Invalid(_))));
        assert!(matches!(decode_all(b"*1\r\n!oops\r\n"), Err(ProtocolError::Invalid(_))));
    }

    #[test]
    fn test_encode_replies() {
        assert_eq!(encode(Frame::ok()), b"+OK\r\n");
        assert_eq!(encode(Frame::error("ERR boom")), b"-ERR boom\r\n");
        assert_eq!(encode(Frame::Integer(1)), b":1\r\n");
        assert_eq!(encode(bulk("bar")), b"$3\r\nbar\r\n");
        assert_eq!(encode(Frame::Null), b"$-1\r\n");
        assert_eq!(
            encode(Frame::Array(vec![bulk("a"), Frame::Integer(-2)])),
            b"*2\r\n$1\r\na\r\n:-2\r\n"
        );
    }

    #[test]
    fn test_encode_error_strips_line_breaks() {
        assert_eq!(encode(Frame::error("ERR a\r\nb")), b"-ERR a  b\r\n");
    }

    #[test]
    fn test_decode_reply_types() {
        let frames = decode_all(b"+OK\r\n-ERR x\r\n:42\r\n$-1\r\n").unwrap();
        assert_eq!(
            frames,
            vec![Frame::ok(), Frame::error("ERR x"), Frame::Integer(42), Frame::Null]
        );
    }

    #[test]
    fn test_decode_rejects_nested_arrays() {
        assert!(matches!(decode_all(b"*1\r\n*1\r\n$1\r\na\r\n"), Err(ProtocolError::Invalid(_))));

        let deep = b"*1\r\n".repeat(100_000);
        assert!(matches!(decode_all(&deep), Err(ProtocolError::Invalid(_))));
    }

    #[test]
    fn test_decode_rejects_oversized_array() {
        assert!(matches!(decode_all(b"*2000\r\n"), Err(ProtocolError::Invalid(_))));
        assert_eq!(decode_all(b"*1024\r\n$1\r\n").unwrap(), vec![]);
    }

    #[test]
    fn test_decode_skips_reparse_until_bulk_can_complete() {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::from(&b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$10\r\n01"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        let header = buf.len() - 2;
        assert_eq!(codec.want, header + 12);

        buf.extend_from_slice(b"2345");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"6789\r\n");
        let frame = codec.decode(&mut buf).unwrap();
        assert_eq!(frame, Some(Frame::Array(vec![bulk("SET"), bulk("k"), bulk("0123456789")])));
        assert_eq!(codec.want, 0);
        assert!(buf.is_empty());
    }
}
