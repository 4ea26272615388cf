//! Streamed reframing of daemon replies.
//!
//! The daemon replies with an unframed byte stream that ends when it
//! closes the connection. The transcoder consumes that stream chunk by
//! chunk and emits the HTTP body incrementally, so a large board never
//! sits in memory as a whole. The only state carried across chunk
//! boundaries is one partial line (capped at [`MAX_LINE_LENGTH`]) or up
//! to three bytes of a split UTF-8 sequence.

use std::fmt::Write as _;

use bytes::Bytes;
use thiserror::Error;

use crate::fields::FieldSpec;
use crate::record::{ScheduledTaskRecord, StatusRecord};
use crate::MAX_LINE_LENGTH;

/// How a reply is presented to the HTTP client.
#[derive(Debug, Clone)]
pub enum TranscodeMode {
    /// Verbatim byte passthrough.
    Raw,
    /// Delimited listing to a JSON array of objects, columns named by
    /// the field spec.
    Records(FieldSpec),
    /// Schedule listing to a JSON array of typed task records.
    Tasks,
    /// Single status log: first line projected like `Records`, the rest
    /// of the reply streamed into a trailing `msg` attribute.
    Record(FieldSpec),
    /// Whole reply wrapped as `{"result":"…"}`.
    Text,
}

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("reply line too long to transcode")]
    LineTooLong,
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

/// Chunk-in/chunk-out reply transcoder. Drive it with [`begin`], any
/// number of [`push`] calls, then [`finish`] at end-of-reply; the
/// concatenation of everything returned is the response body.
///
/// [`begin`]: Transcoder::begin
/// [`push`]: Transcoder::push
/// [`finish`]: Transcoder::finish
pub struct Transcoder {
    state: State,
}

enum State {
    Raw,
    Array {
        buffer: LineBuffer,
        kind: ArrayKind,
        first: bool,
    },
    Head {
        head: Vec<u8>,
        spec: FieldSpec,
    },
    Message {
        escaper: StringEscaper,
    },
    Text {
        escaper: StringEscaper,
    },
}

enum ArrayKind {
    Status(FieldSpec),
    Tasks,
}

impl ArrayKind {
    fn line_json(&self, line: &str) -> Result<String, serde_json::Error> {
        match self {
            ArrayKind::Status(spec) => serde_json::to_string(&spec.project(line)),
            ArrayKind::Tasks => serde_json::to_string(&ScheduledTaskRecord::decode(line)),
        }
    }
}

impl Transcoder {
    pub fn new(mode: TranscodeMode) -> Self {
        let state = match mode {
            TranscodeMode::Raw => State::Raw,
            TranscodeMode::Records(spec) => State::Array {
                buffer: LineBuffer::new(),
                kind: ArrayKind::Status(spec),
                first: true,
            },
            TranscodeMode::Tasks => State::Array {
                buffer: LineBuffer::new(),
                kind: ArrayKind::Tasks,
                first: true,
            },
            TranscodeMode::Record(spec) => State::Head {
                head: Vec::new(),
                spec,
            },
            TranscodeMode::Text => State::Text {
                escaper: StringEscaper::new(),
            },
        };
        Self { state }
    }

    /// Bytes to emit before any reply data arrives.
    pub fn begin(&self) -> Bytes {
        match &self.state {
            State::Array { .. } => Bytes::from_static(b"["),
            State::Text { .. } => Bytes::from_static(b"{\"result\":\""),
            State::Raw | State::Head { .. } | State::Message { .. } => Bytes::new(),
        }
    }

    /// Transcodes one reply chunk. The returned bytes may be empty when
    /// the chunk only extended a partial line.
    pub fn push(&mut self, chunk: Bytes) -> Result<Bytes, TranscodeError> {
        match &mut self.state {
            State::Raw => Ok(chunk),
            State::Array {
                buffer,
                kind,
                first,
            } => {
                let lines = buffer.feed(&chunk)?;
                let mut out = String::new();
                for line in lines {
                    if line.is_empty() {
                        continue;
                    }
                    if *first {
                        *first = false;
                    } else {
                        out.push(',');
                    }
                    out.push_str(&kind.line_json(&line)?);
                }
                Ok(Bytes::from(out))
            }
            State::Head { head, spec } => match chunk.iter().position(|&b| b == b'\n') {
                None => {
                    if head.len() + chunk.len() > MAX_LINE_LENGTH {
                        return Err(TranscodeError::LineTooLong);
                    }
                    head.extend_from_slice(&chunk);
                    Ok(Bytes::new())
                }
                Some(newline) => {
                    head.extend_from_slice(&chunk[..newline]);
                    let mut out = open_message_object(&spec.project(&decode_line(head)))?;
                    let mut escaper = StringEscaper::new();
                    escaper.feed(&chunk[newline + 1..], &mut out);
                    self.state = State::Message { escaper };
                    Ok(Bytes::from(out))
                }
            },
            State::Message { escaper } | State::Text { escaper } => {
                let mut out = String::new();
                escaper.feed(&chunk, &mut out);
                Ok(Bytes::from(out))
            }
        }
    }

    /// Flushes the partial line and closes the JSON structure once the
    /// daemon has closed the connection.
    pub fn finish(self) -> Result<Bytes, TranscodeError> {
        match self.state {
            State::Raw => Ok(Bytes::new()),
            State::Array {
                mut buffer,
                kind,
                first,
            } => {
                let mut out = String::new();
                if let Some(line) = buffer.take_remainder() {
                    if !line.is_empty() {
                        if !first {
                            out.push(',');
                        }
                        out.push_str(&kind.line_json(&line)?);
                    }
                }
                out.push(']');
                Ok(Bytes::from(out))
            }
            State::Head { head, spec } => {
                // Reply ended before any newline: the whole buffer is
                // the status line and the message is empty.
                let mut out = open_message_object(&spec.project(&decode_line(&head)))?;
                out.push_str("\"}");
                Ok(Bytes::from(out))
            }
            State::Message { mut escaper } | State::Text { mut escaper } => {
                let mut out = String::new();
                escaper.flush(&mut out);
                out.push_str("\"}");
                Ok(Bytes::from(out))
            }
        }
    }
}

/// Serializes the projected head line and reopens the object so the
/// trailing `msg` string can be streamed into it.
fn open_message_object(record: &StatusRecord) -> Result<String, TranscodeError> {
    let mut json = serde_json::to_string(record)?;
    json.pop();
    if json.len() > 1 {
        json.push(',');
    }
    json.push_str("\"msg\":\"");
    Ok(json)
}

/// Accumulates bytes until whole `\n`-terminated lines are available.
struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    fn new() -> Self {
        Self {
            partial: Vec::new(),
        }
    }

    /// Splits a chunk into the lines it completes; the unterminated tail
    /// is retained for the next feed, subject to the line-length cap.
    fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>, TranscodeError> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(newline) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(newline);
            if self.partial.is_empty() {
                lines.push(decode_line(head));
            } else {
                self.partial.extend_from_slice(head);
                lines.push(decode_line(&self.partial));
                self.partial.clear();
            }
            rest = &tail[1..];
        }
        if !rest.is_empty() {
            if self.partial.len() + rest.len() > MAX_LINE_LENGTH {
                return Err(TranscodeError::LineTooLong);
            }
            self.partial.extend_from_slice(rest);
        }
        Ok(lines)
    }

    fn take_remainder(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let line = decode_line(&self.partial);
        self.partial.clear();
        Some(line)
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = match bytes.last() {
        Some(b'\r') => &bytes[..bytes.len() - 1],
        _ => bytes,
    };
    String::from_utf8_lossy(bytes).into_owned()
}

/// Incremental JSON string escaper. Output is the escaped interior of a
/// JSON string, without the surrounding quotes. A UTF-8 sequence split
/// across chunks is carried until its remaining bytes arrive; invalid
/// sequences become U+FFFD.
struct StringEscaper {
    pending: Vec<u8>,
}

impl StringEscaper {
    fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    fn feed(&mut self, chunk: &[u8], out: &mut String) {
        if self.pending.is_empty() {
            self.escape(chunk, out);
        } else {
            let mut joined = std::mem::take(&mut self.pending);
            joined.extend_from_slice(chunk);
            self.escape(&joined, out);
        }
    }

    fn escape(&mut self, bytes: &[u8], out: &mut String) {
        let mut rest = bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    escape_into(text, out);
                    return;
                }
                Err(error) => {
                    let (valid, tail) = rest.split_at(error.valid_up_to());
                    escape_into(&String::from_utf8_lossy(valid), out);
                    match error.error_len() {
                        Some(skip) => {
                            out.push('\u{fffd}');
                            rest = &tail[skip..];
                        }
                        None => {
                            // Incomplete sequence at the chunk edge;
                            // kept until the next feed resolves it.
                            self.pending = tail.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }

    fn flush(&mut self, out: &mut String) {
        if !self.pending.is_empty() {
            self.pending.clear();
            out.push('\u{fffd}');
        }
    }
}

fn escape_into(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ch if (ch as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", ch as u32);
            }
            ch => out.push(ch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcode(mode: TranscodeMode, chunks: &[&[u8]]) -> String {
        let mut transcoder = Transcoder::new(mode);
        let mut out = Vec::new();
        out.extend_from_slice(&transcoder.begin());
        for chunk in chunks {
            let pushed = transcoder.push(Bytes::copy_from_slice(chunk)).expect("push");
            out.extend_from_slice(&pushed);
        }
        out.extend_from_slice(&transcoder.finish().expect("finish"));
        String::from_utf8(out).expect("utf8 output")
    }

    #[test]
    fn raw_mode_passes_bytes_through_untouched() {
        let mut transcoder = Transcoder::new(TranscodeMode::Raw);
        assert!(transcoder.begin().is_empty());
        let chunk = Bytes::from_static(b"[free] \xff\xfe not utf-8\n");
        assert_eq!(transcoder.push(chunk.clone()).expect("push"), chunk);
        assert!(transcoder.finish().expect("finish").is_empty());
    }

    #[test]
    fn board_listing_becomes_a_json_array() {
        let out = transcode(
            TranscodeMode::Records(FieldSpec::parse("hostname,testname,color")),
            &[b"web01|conn|red\nweb02|http|red\n"],
        );
        assert_eq!(
            out,
            r#"[{"hostname":"web01","testname":"conn","color":"red"},{"hostname":"web02","testname":"http","color":"red"}]"#
        );
    }

    #[test]
    fn reframing_is_chunking_invariant() {
        let reply: &[u8] = b"web01|conn|red\nweb02|http|green\nweb03|disk|yellow";
        let whole = transcode(
            TranscodeMode::Records(FieldSpec::parse("hostname,testname,color")),
            &[reply],
        );
        let tiny: Vec<&[u8]> = reply.chunks(1).collect();
        let rechunked = transcode(
            TranscodeMode::Records(FieldSpec::parse("hostname,testname,color")),
            &tiny,
        );
        assert_eq!(whole, rechunked);
        assert!(whole.ends_with(r#"{"hostname":"web03","testname":"disk","color":"yellow"}]"#));
    }

    #[test]
    fn empty_listing_reply_is_an_empty_array() {
        let out = transcode(TranscodeMode::Records(FieldSpec::board_default()), &[]);
        assert_eq!(out, "[]");
    }

    #[test]
    fn blank_lines_produce_no_records() {
        let out = transcode(
            TranscodeMode::Records(FieldSpec::parse("hostname,color")),
            &[b"web01|red\n\n\nweb02|green\n"],
        );
        assert_eq!(
            out,
            r#"[{"hostname":"web01","color":"red"},{"hostname":"web02","color":"green"}]"#
        );
    }

    #[test]
    fn carriage_returns_are_stripped_from_line_ends() {
        let out = transcode(
            TranscodeMode::Records(FieldSpec::parse("hostname,color")),
            &[b"web01|red\r\n"],
        );
        assert_eq!(out, r#"[{"hostname":"web01","color":"red"}]"#);
    }

    #[test]
    fn overlong_line_aborts_the_transcode() {
        let mut transcoder = Transcoder::new(TranscodeMode::Records(FieldSpec::board_default()));
        let big = vec![b'a'; MAX_LINE_LENGTH + 1];
        assert!(matches!(
            transcoder.push(Bytes::from(big)),
            Err(TranscodeError::LineTooLong)
        ));
    }

    #[test]
    fn schedule_listing_decodes_typed_tasks() {
        let out = transcode(
            TranscodeMode::Tasks,
            &[b"1|1625670744|10.0.0.5|disable example.com.http 5 maintenance\n"],
        );
        assert_eq!(
            out,
            r#"[{"id":1,"timestamp":1625670744,"sender":"10.0.0.5","command":"disable example.com.http 5 maintenance"}]"#
        );
    }

    #[test]
    fn log_reply_streams_message_after_head_line() {
        let out = transcode(
            TranscodeMode::Record(FieldSpec::parse("hostname,testname,color")),
            &[b"web01|conn|red\nService down\nsince 12:00\n"],
        );
        assert_eq!(
            out,
            "{\"hostname\":\"web01\",\"testname\":\"conn\",\"color\":\"red\",\"msg\":\"Service down\\nsince 12:00\\n\"}"
        );
    }

    #[test]
    fn log_head_line_may_arrive_split_across_chunks() {
        let out = transcode(
            TranscodeMode::Record(FieldSpec::parse("hostname,color")),
            &[b"web01|r", b"ed\nbody", b" text"],
        );
        assert_eq!(
            out,
            "{\"hostname\":\"web01\",\"color\":\"red\",\"msg\":\"body text\"}"
        );
    }

    #[test]
    fn empty_log_reply_yields_empty_fields() {
        let out = transcode(TranscodeMode::Record(FieldSpec::parse("hostname,color")), &[]);
        assert_eq!(out, "{\"hostname\":\"\",\"color\":\"\",\"msg\":\"\"}");
    }

    #[test]
    fn text_mode_wraps_the_whole_reply() {
        let out = transcode(TranscodeMode::Text, &[b"xymond 6.4.3\n"]);
        assert_eq!(out, "{\"result\":\"xymond 6.4.3\\n\"}");
    }

    #[test]
    fn empty_text_reply_is_an_empty_result() {
        let out = transcode(TranscodeMode::Text, &[]);
        assert_eq!(out, "{\"result\":\"\"}");
    }

    #[test]
    fn text_mode_escapes_quotes_and_control_bytes() {
        let out = transcode(TranscodeMode::Text, &[b"say \"hi\"\tnow\x01"]);
        assert_eq!(out, "{\"result\":\"say \\\"hi\\\"\\tnow\\u0001\"}");
    }

    #[test]
    fn utf8_sequences_survive_chunk_splits() {
        let reply = "Gr\u{00fc}\u{00df}e, \u{4e16}\u{754c}".as_bytes();
        let whole = transcode(TranscodeMode::Text, &[reply]);
        let tiny: Vec<&[u8]> = reply.chunks(1).collect();
        let rechunked = transcode(TranscodeMode::Text, &tiny);
        assert_eq!(whole, rechunked);
        assert_eq!(whole, "{\"result\":\"Gr\u{00fc}\u{00df}e, \u{4e16}\u{754c}\"}");
    }

    #[test]
    fn invalid_utf8_becomes_replacement_chars() {
        let out = transcode(TranscodeMode::Text, &[b"ok \xff\xfe done"]);
        assert_eq!(out, "{\"result\":\"ok \u{fffd}\u{fffd} done\"}");
    }

    #[test]
    fn truncated_utf8_at_end_of_reply_is_replaced() {
        // First byte of a two-byte sequence, then the daemon closes.
        let out = transcode(TranscodeMode::Text, &[b"\xc3"]);
        assert_eq!(out, "{\"result\":\"\u{fffd}\"}");
    }
}
