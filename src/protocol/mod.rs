//! Line-oriented batch protocol spoken over the two TCP channels.
//!
//! Tasks channel (coordinator -> peer):
//!
//! ```text
//! BEGIN <n>
//! <index>;<games>,<winning>     n lines, index 0..n-1 ascending
//! END
//! ```
//!
//! Results channel (peer -> coordinator):
//!
//! ```text
//! RESULTS <n>
//! <index>;<value>               any order, any subset, duplicates allowed
//! DONE
//! ```
//!
//! Every line ends with a single `\n`.

use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

pub mod results;
pub mod tasks;

pub use results::{RemoteResults, ResultStreamer};
pub use tasks::TaskStreamer;

pub const MSG_BEGIN: &str = "BEGIN";
pub const MSG_END: &str = "END";
pub const MSG_RESULTS: &str = "RESULTS";
pub const MSG_DONE: &str = "DONE";

/// Longest line either side accepts.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// The two connections of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Channel {
    Tasks,
    Results,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Tasks => write!(f, "tasks"),
            Channel::Results => write!(f, "results"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("{channel} channel: connection lost: {reason}")]
    ConnectionLost { channel: Channel, reason: String },

    #[error("{channel} channel: protocol error: {detail}")]
    Protocol { channel: Channel, detail: String },
}

impl StreamError {
    pub fn lost(channel: Channel, reason: impl std::fmt::Display) -> Self {
        StreamError::ConnectionLost {
            channel,
            reason: reason.to_string(),
        }
    }

    pub fn protocol(channel: Channel, detail: impl Into<String>) -> Self {
        StreamError::Protocol {
            channel,
            detail: detail.into(),
        }
    }

    /// Map a codec failure on `channel` to the protocol taxonomy.
    pub fn from_codec(channel: Channel, err: CodecError) -> Self {
        match err {
            CodecError::LineTooLong => StreamError::protocol(
                channel,
                format!("line exceeds {} bytes", MAX_LINE_LENGTH),
            ),
            CodecError::Io(e) => StreamError::lost(channel, e),
        }
    }
}

/// Borrow a received line as text; non-UTF-8 bytes are a protocol error.
pub fn line_str(channel: Channel, line: &[u8]) -> Result<&str, StreamError> {
    std::str::from_utf8(line).map_err(|_| {
        StreamError::protocol(
            channel,
            format!("line is not valid UTF-8: {:?}", String::from_utf8_lossy(line)),
        )
    })
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("line exceeds {} bytes", MAX_LINE_LENGTH)]
    LineTooLong,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Newline-delimited framing over raw bytes.
///
/// Lines are yielded without the `\n` (and without a trailing `\r`) and
/// are not decoded as text; callers decide what a non-UTF-8 line means.
/// A trailing partial line at end of stream is refused: a peer that closes
/// mid-line has lost the connection.
#[derive(Debug, Default)]
pub struct LineCodec {
    /// Bytes of `buf` already searched for a newline.
    scanned: usize,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LineCodec {
    type Item = BytesMut;
    type Error = CodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<BytesMut>, CodecError> {
        let Some(offset) = buf[self.scanned..].iter().position(|&b| b == b'\n') else {
            if buf.len() > MAX_LINE_LENGTH {
                return Err(CodecError::LineTooLong);
            }
            self.scanned = buf.len();
            return Ok(None);
        };

        let end = self.scanned + offset;
        self.scanned = 0;
        if end > MAX_LINE_LENGTH {
            return Err(CodecError::LineTooLong);
        }
        let mut line = buf.split_to(end + 1);
        line.truncate(end);
        if line.last() == Some(&b'\r') {
            line.truncate(end - 1);
        }
        Ok(Some(line))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<BytesMut>, CodecError> {
        match self.decode(buf)? {
            Some(line) => Ok(Some(line)),
            None if buf.is_empty() => Ok(None),
            None => Err(CodecError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "peer closed mid-line",
            ))),
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, line: String, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.reserve(line.len() + 1);
        buf.put_slice(line.as_bytes());
        buf.put_u8(b'\n');
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Line formats
// ---------------------------------------------------------------------------

pub fn begin_line(n: usize) -> String {
    format!("{} {}", MSG_BEGIN, n)
}

pub fn task_line(index: usize, payload: &str) -> String {
    format!("{};{}", index, payload)
}

pub fn results_line(n: usize) -> String {
    format!("{} {}", MSG_RESULTS, n)
}

pub fn result_line(index: usize, value: u32) -> String {
    format!("{};{}", index, value)
}

/// Parse `<keyword> <n>`.
pub fn parse_header(line: &str, keyword: &str) -> Option<usize> {
    let count = line.strip_prefix(keyword)?.strip_prefix(' ')?;
    count.trim().parse().ok()
}

/// Split `<index>;<payload>` on the first `;`.
pub fn parse_task_line(line: &str) -> Option<(usize, &str)> {
    let (index, payload) = line.split_once(';')?;
    Some((index.trim().parse().ok()?, payload))
}

/// One line read from the results channel after the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultLine {
    Done,
    Value { index: usize, value: u32 },
    /// Well-formed, but the index is outside `[0, n)`.
    OutOfRange { index: i64 },
    /// No `;` separator; not a protocol line.
    Noise,
}

/// Classify a raw results line against a declared count `n`.
///
/// Lines without `;` are noise whatever their bytes. A line with a
/// separator that is not UTF-8, or whose index or value is not a number, is
/// malformed and returned as `Err(detail)`.
pub fn parse_result_line(line: &[u8], n: usize) -> Result<ResultLine, String> {
    if line == MSG_DONE.as_bytes() {
        return Ok(ResultLine::Done);
    }
    if !line.contains(&b';') {
        return Ok(ResultLine::Noise);
    }
    let line = std::str::from_utf8(line).map_err(|_| {
        format!(
            "result line is not valid UTF-8: {:?}",
            String::from_utf8_lossy(line)
        )
    })?;
    let Some((index, value)) = line.split_once(';') else {
        return Ok(ResultLine::Noise);
    };
    let index: i64 = index
        .trim()
        .parse()
        .map_err(|_| format!("bad index in result line {:?}", line))?;
    let value: u32 = value
        .trim()
        .parse()
        .map_err(|_| format!("bad value in result line {:?}", line))?;

    match usize::try_from(index) {
        Ok(i) if i < n => Ok(ResultLine::Value { index: i, value }),
        _ => Ok(ResultLine::OutOfRange { index }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_parsing() {
        assert_eq!(parse_header("RESULTS 5", MSG_RESULTS), Some(5));
        assert_eq!(parse_header("BEGIN 0", MSG_BEGIN), Some(0));
        assert_eq!(parse_header("RESULTS", MSG_RESULTS), None);
        assert_eq!(parse_header("RESULTS x", MSG_RESULTS), None);
        assert_eq!(parse_header("RESULTS -1", MSG_RESULTS), None);
        assert_eq!(parse_header("RESULTSX 3", MSG_RESULTS), None);
        assert_eq!(parse_header("BEGIN 3", MSG_RESULTS), None);
    }

    #[test]
    fn test_result_line_classification() {
        assert_eq!(parse_result_line(b"DONE", 3), Ok(ResultLine::Done));
        assert_eq!(
            parse_result_line(b"1;99", 3),
            Ok(ResultLine::Value { index: 1, value: 99 })
        );
        assert_eq!(parse_result_line(b"garbage", 3), Ok(ResultLine::Noise));
        assert_eq!(parse_result_line(b"", 3), Ok(ResultLine::Noise));
        assert_eq!(
            parse_result_line(b"3;1", 3),
            Ok(ResultLine::OutOfRange { index: 3 })
        );
        assert_eq!(
            parse_result_line(b"-1;1", 3),
            Ok(ResultLine::OutOfRange { index: -1 })
        );
    }

    #[test]
    fn test_result_line_rejects_non_numeric_fields() {
        assert!(parse_result_line(b"a;1", 3).is_err());
        assert!(parse_result_line(b"1;b", 3).is_err());
        assert!(parse_result_line(b"1;4294967296", 3).is_err());
    }

    #[test]
    fn test_result_line_non_utf8() {
        assert_eq!(
            parse_result_line(b"\xff\xfe garbage", 3),
            Ok(ResultLine::Noise)
        );
        assert!(parse_result_line(b"0;\xff", 3).is_err());
    }

    #[test]
    fn test_task_line_parsing() {
        assert_eq!(parse_task_line("2;30,70.0"), Some((2, "30,70.0")));
        assert_eq!(parse_task_line("no separator"), None);
        assert_eq!(parse_task_line("x;1,2"), None);
    }

    #[test]
    fn test_line_formats() {
        assert_eq!(begin_line(3), "BEGIN 3");
        assert_eq!(task_line(0, "10,55.0"), "0;10,55.0");
        assert_eq!(results_line(3), "RESULTS 3");
        assert_eq!(result_line(2, 7), "2;7");
    }

    #[test]
    fn test_decode_eof_rejects_partial_line() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("DONE\nDON");
        assert_eq!(
            codec.decode_eof(&mut buf).unwrap().as_deref(),
            Some(&b"DONE"[..])
        );
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(CodecError::Io(_))
        ));

        let mut empty = BytesMut::new();
        assert_eq!(codec.decode_eof(&mut empty).unwrap(), None);
    }

    #[test]
    fn test_decode_strips_carriage_return() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("RESULTS 2\r\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap().as_deref(),
            Some(&b"RESULTS 2"[..])
        );
    }

    #[test]
    fn test_decode_keeps_raw_bytes_across_reads() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"\xff\xfe gar"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"bage\n0;5\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap().as_deref(),
            Some(&b"\xff\xfe garbage"[..])
        );
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some(&b"0;5"[..]));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_overlong_line_is_rejected() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(vec![b'x'; MAX_LINE_LENGTH + 1].as_slice());
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::LineTooLong)));
        assert!(matches!(
            StreamError::from_codec(Channel::Results, CodecError::LineTooLong),
            StreamError::Protocol { .. }
        ));
    }

    #[test]
    fn test_encode_appends_newline() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("BEGIN 3".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"BEGIN 3\n");
    }
}
