//! Incremental raft-log record stream.
//!
//! The log-read endpoint returns one JSON document,
//! `{"info": {...}, "log": [record, record, ...]}`, whose `log` array can
//! be arbitrarily large. The stream parses it incrementally over the
//! transport's byte chunks: the header is surfaced as soon as its object
//! is complete, records are yielded one at a time, and at no point is the
//! whole body buffered. A stream lives for exactly one batch cycle.

use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;

use rivulet_core::event::EventKind;
use rivulet_core::record::{LogInfo, LogRecord};

use crate::error::SourceError;

/// Byte chunks as the transport delivers them.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, SourceError>> + Send>>;

/// Lazy, forward-only sequence of log records.
pub struct LogRecordStream {
    chunks: Option<ByteStream>,
    scanner: Scanner,
    info: Option<LogInfo>,
    pending: VecDeque<LogRecord>,
    done: bool,
}

impl std::fmt::Debug for LogRecordStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogRecordStream")
            .field("info", &self.info)
            .field("pending", &self.pending.len())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl LogRecordStream {
    /// Wraps a transport body.
    #[must_use]
    pub fn new(chunks: ByteStream) -> Self {
        Self {
            chunks: Some(chunks),
            scanner: Scanner::new(),
            info: None,
            pending: VecDeque::new(),
            done: false,
        }
    }

    /// A stream that completes immediately with an empty header.
    ///
    /// This is how 404 (no such partition) and 416 (range not yet
    /// available) resolve: `{info: {start: null, end: null}, log: null}`.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            chunks: None,
            scanner: Scanner::new(),
            info: Some(LogInfo::default()),
            pending: VecDeque::new(),
            done: true,
        }
    }

    /// The response header.
    ///
    /// Drives the underlying stream until the `info` object is complete.
    /// Records arriving ahead of the call are buffered, not lost.
    ///
    /// # Errors
    ///
    /// Transport or parse failure.
    pub async fn info(&mut self) -> Result<LogInfo, SourceError> {
        loop {
            if let Some(info) = self.info {
                return Ok(info);
            }
            if self.done {
                // Document ended without an info object.
                self.info = Some(LogInfo::default());
                return Ok(LogInfo::default());
            }
            self.pump().await?;
        }
    }

    /// The next record, or `None` at end of log.
    ///
    /// Entries carrying a key but no type are defaulted to `put`;
    /// entries with neither are left untyped for the caller to drop.
    ///
    /// # Errors
    ///
    /// Transport or parse failure; the stream is unusable afterwards.
    pub async fn next_record(&mut self) -> Result<Option<LogRecord>, SourceError> {
        loop {
            if let Some(mut record) = self.pending.pop_front() {
                normalize(&mut record);
                return Ok(Some(record));
            }
            if self.done {
                return Ok(None);
            }
            self.pump().await?;
        }
    }

    /// Feeds the scanner one transport chunk and drains its items.
    async fn pump(&mut self) -> Result<(), SourceError> {
        let Some(chunks) = self.chunks.as_mut() else {
            self.done = true;
            return Ok(());
        };
        match chunks.next().await {
            Some(Ok(chunk)) => {
                self.scanner.feed(&chunk);
                self.drain_scanner()
            }
            Some(Err(e)) => Err(e),
            None => {
                if self.scanner.is_complete() {
                    self.done = true;
                    Ok(())
                } else {
                    Err(SourceError::Truncated)
                }
            }
        }
    }

    fn drain_scanner(&mut self) -> Result<(), SourceError> {
        while let Some(item) = self.scanner.next_item()? {
            match item {
                ScanItem::Info(info) => self.info = Some(info),
                ScanItem::Record(record) => self.pending.push_back(record),
                ScanItem::End => self.done = true,
            }
        }
        Ok(())
    }
}

/// Applies the legacy default: a keyed entry with no type is a put.
fn normalize(record: &mut LogRecord) {
    for entry in &mut record.entries {
        if entry.kind.is_none() && entry.key.is_some() {
            entry.kind = Some(EventKind::Put);
        }
    }
}

/// One parsed piece of the response document.
#[derive(Debug)]
enum ScanItem {
    Info(LogInfo),
    Record(LogRecord),
    End,
}

/// Push parser over the response bytes.
///
/// Consumes input token by token; a step that cannot complete on the
/// buffered bytes leaves the buffer untouched so the caller can feed
/// more and retry.
struct Scanner {
    buf: BytesMut,
    state: ScanState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Before the top-level `{`.
    Start,
    /// Inside the top object, before a key (or its closing `}`).
    Key,
    /// After `"info":`.
    InfoValue,
    /// After `"log":`.
    LogValue,
    /// After some other key's `:`.
    SkipValue,
    /// Inside the `log` array.
    InLog,
    /// Document finished; remaining input is ignored.
    Complete,
}

impl Scanner {
    fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            state: ScanState::Start,
        }
    }

    fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    fn is_complete(&self) -> bool {
        self.state == ScanState::Complete
    }

    /// Advances until an item is produced or the input runs dry.
    fn next_item(&mut self) -> Result<Option<ScanItem>, SourceError> {
        loop {
            match self.state {
                ScanState::Start => {
                    let Some(pos) = skip_ws(&self.buf, 0) else {
                        return Ok(None);
                    };
                    if self.buf[pos] != b'{' {
                        return Err(unexpected(self.buf[pos], "document start"));
                    }
                    self.buf.advance(pos + 1);
                    self.state = ScanState::Key;
                }
                ScanState::Key => {
                    let Some(pos) = skip_ws(&self.buf, 0) else {
                        return Ok(None);
                    };
                    match self.buf[pos] {
                        b',' => {
                            self.buf.advance(pos + 1);
                        }
                        b'}' => {
                            self.buf.advance(pos + 1);
                            self.state = ScanState::Complete;
                            return Ok(Some(ScanItem::End));
                        }
                        b'"' => {
                            let Some(end) = scan_string(&self.buf, pos) else {
                                return Ok(None);
                            };
                            let Some(colon) = skip_ws(&self.buf, end) else {
                                return Ok(None);
                            };
                            if self.buf[colon] != b':' {
                                return Err(unexpected(self.buf[colon], "after object key"));
                            }
                            self.state = match &self.buf[pos + 1..end - 1] {
                                b"info" => ScanState::InfoValue,
                                b"log" => ScanState::LogValue,
                                _ => ScanState::SkipValue,
                            };
                            self.buf.advance(colon + 1);
                        }
                        other => return Err(unexpected(other, "object key")),
                    }
                }
                ScanState::InfoValue => {
                    let Some((start, end)) = self.value_bounds()? else {
                        return Ok(None);
                    };
                    let info: LogInfo = serde_json::from_slice(&self.buf[start..end])
                        .map_err(|e| SourceError::Parse(format!("info header: {e}")))?;
                    self.buf.advance(end);
                    self.state = ScanState::Key;
                    return Ok(Some(ScanItem::Info(info)));
                }
                ScanState::LogValue => {
                    let Some(pos) = skip_ws(&self.buf, 0) else {
                        return Ok(None);
                    };
                    match self.buf[pos] {
                        b'[' => {
                            self.buf.advance(pos + 1);
                            self.state = ScanState::InLog;
                        }
                        b'n' => {
                            if self.buf.len() < pos + 4 {
                                return Ok(None);
                            }
                            if &self.buf[pos..pos + 4] != b"null" {
                                return Err(unexpected(self.buf[pos], "log value"));
                            }
                            self.buf.advance(pos + 4);
                            self.state = ScanState::Key;
                        }
                        other => return Err(unexpected(other, "log value")),
                    }
                }
                ScanState::SkipValue => {
                    let Some((_, end)) = self.value_bounds()? else {
                        return Ok(None);
                    };
                    self.buf.advance(end);
                    self.state = ScanState::Key;
                }
                ScanState::InLog => {
                    let Some(pos) = skip_ws(&self.buf, 0) else {
                        return Ok(None);
                    };
                    match self.buf[pos] {
                        b',' => {
                            self.buf.advance(pos + 1);
                        }
                        b']' => {
                            self.buf.advance(pos + 1);
                            self.state = ScanState::Complete;
                            return Ok(Some(ScanItem::End));
                        }
                        _ => {
                            let Some(end) = scan_value(&self.buf, pos) else {
                                return Ok(None);
                            };
                            let record: LogRecord = serde_json::from_slice(&self.buf[pos..end])
                                .map_err(|e| SourceError::Parse(format!("log record: {e}")))?;
                            self.buf.advance(end);
                            return Ok(Some(ScanItem::Record(record)));
                        }
                    }
                }
                ScanState::Complete => {
                    // Trailing bytes after the document are ignored.
                    self.buf.clear();
                    return Ok(None);
                }
            }
        }
    }

    /// Bounds of the next complete JSON value, after leading whitespace.
    fn value_bounds(&self) -> Result<Option<(usize, usize)>, SourceError> {
        let Some(start) = skip_ws(&self.buf, 0) else {
            return Ok(None);
        };
        Ok(scan_value(&self.buf, start).map(|end| (start, end)))
    }
}

fn unexpected(byte: u8, context: &str) -> SourceError {
    SourceError::Parse(format!("unexpected byte {byte:#04x} at {context}"))
}

/// Index of the first non-whitespace byte at or after `from`.
fn skip_ws(buf: &[u8], from: usize) -> Option<usize> {
    buf[from..]
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map(|i| from + i)
}

/// End index (exclusive) of the complete JSON value starting at `start`,
/// or `None` when the buffer does not yet hold all of it.
fn scan_value(buf: &[u8], start: usize) -> Option<usize> {
    match buf.get(start)? {
        b'"' => scan_string(buf, start),
        b'{' | b'[' => {
            let mut depth = 0usize;
            let mut in_string = false;
            let mut escaped = false;
            for (i, &b) in buf.iter().enumerate().skip(start) {
                if in_string {
                    if escaped {
                        escaped = false;
                    } else if b == b'\\' {
                        escaped = true;
                    } else if b == b'"' {
                        in_string = false;
                    }
                } else {
                    match b {
                        b'"' => in_string = true,
                        b'{' | b'[' => depth += 1,
                        b'}' | b']' => {
                            depth -= 1;
                            if depth == 0 {
                                return Some(i + 1);
                            }
                        }
                        _ => {}
                    }
                }
            }
            None
        }
        _ => {
            // Primitive: complete once a delimiter appears.
            buf.iter()
                .enumerate()
                .skip(start)
                .find(|&(_, &b)| matches!(b, b',' | b'}' | b']') || b.is_ascii_whitespace())
                .map(|(i, _)| i)
        }
    }
}

/// End index (exclusive, past the closing quote) of the string starting
/// at the opening quote `start`.
fn scan_string(buf: &[u8], start: usize) -> Option<usize> {
    let mut escaped = false;
    for (i, &b) in buf.iter().enumerate().skip(start + 1) {
        if escaped {
            escaped = false;
        } else if b == b'\\' {
            escaped = true;
        } else if b == b'"' {
            return Some(i + 1);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_stream(chunks: Vec<&'static [u8]>) -> ByteStream {
        Box::pin(futures::stream::iter(
            chunks.into_iter().map(|c| Ok(Bytes::from_static(c))),
        ))
    }

    const RESPONSE: &[u8] = br#"{"info":{"start":7,"cseq":9,"prune":1},"log":[
        {"db":"bucket1","entries":[{"key":"k1","value":{"a":1}}]},
        {"db":"bucket1","entries":[{"type":"del","key":"k2"}]},
        {"db":"other","entries":[{"key":"k3"}]}
    ]}"#;

    async fn collect(mut stream: LogRecordStream) -> (LogInfo, Vec<LogRecord>) {
        let info = stream.info().await.unwrap();
        let mut records = Vec::new();
        while let Some(record) = stream.next_record().await.unwrap() {
            records.push(record);
        }
        (info, records)
    }

    #[tokio::test]
    async fn test_single_chunk_response() {
        let stream = LogRecordStream::new(byte_stream(vec![RESPONSE]));
        let (info, records) = collect(stream).await;
        assert_eq!(info.start, Some(7));
        assert_eq!(info.cseq, Some(9));
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].db.as_deref(), Some("bucket1"));
    }

    #[tokio::test]
    async fn test_byte_at_a_time_chunks() {
        let chunks: Vec<&'static [u8]> = RESPONSE.chunks(1).collect();
        let stream = LogRecordStream::new(byte_stream(chunks));
        let (info, records) = collect(stream).await;
        assert_eq!(info.start, Some(7));
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn test_info_available_before_records_are_read() {
        let mut stream = LogRecordStream::new(byte_stream(vec![RESPONSE]));
        let info = stream.info().await.unwrap();
        assert_eq!(info.start, Some(7));
        let first = stream.next_record().await.unwrap().unwrap();
        assert_eq!(first.entries[0].key.as_deref(), Some("k1"));
    }

    #[tokio::test]
    async fn test_untyped_keyed_entry_defaults_to_put() {
        let stream = LogRecordStream::new(byte_stream(vec![RESPONSE]));
        let (_, records) = collect(stream).await;
        assert_eq!(records[0].entries[0].kind, Some(EventKind::Put));
        assert_eq!(records[1].entries[0].kind, Some(EventKind::Del));
    }

    #[tokio::test]
    async fn test_entry_with_neither_key_nor_type_stays_untyped() {
        let body: &[u8] = br#"{"info":{"start":1},"log":[{"db":"b","entries":[{"value":"x"}]}]}"#;
        let stream = LogRecordStream::new(byte_stream(vec![body]));
        let (_, records) = collect(stream).await;
        assert_eq!(records[0].entries[0].kind, None);
        assert_eq!(records[0].entries[0].key, None);
    }

    #[tokio::test]
    async fn test_null_log_completes_empty() {
        let body: &[u8] = br#"{"info":{"start":null,"cseq":null},"log":null}"#;
        let stream = LogRecordStream::new(byte_stream(vec![body]));
        let (info, records) = collect(stream).await;
        assert_eq!(info.start, None);
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_empty_constructor() {
        let (info, records) = collect(LogRecordStream::empty()).await;
        assert_eq!(info, LogInfo::default());
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_top_level_keys_are_skipped() {
        let body: &[u8] =
            br#"{"extra":[1,{"x":"]"}],"info":{"start":2},"log":[{"db":"b","entries":[]}]}"#;
        let stream = LogRecordStream::new(byte_stream(vec![body]));
        let (info, records) = collect(stream).await;
        assert_eq!(info.start, Some(2));
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_strings_containing_braces() {
        let body: &[u8] =
            br#"{"info":{"start":1},"log":[{"db":"b","entries":[{"key":"a}b\"]c"}]}]}"#;
        let stream = LogRecordStream::new(byte_stream(vec![body]));
        let (_, records) = collect(stream).await;
        assert_eq!(records[0].entries[0].key.as_deref(), Some(r#"a}b"]c"#));
    }

    #[tokio::test]
    async fn test_malformed_json_fails() {
        let body: &[u8] = br#"{"info":{"start":1},"log":[{"db":]}"#;
        let mut stream = LogRecordStream::new(byte_stream(vec![body]));
        stream.info().await.unwrap();
        assert!(matches!(
            stream.next_record().await,
            Err(SourceError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_body_fails() {
        let body: &[u8] = br#"{"info":{"start":1},"log":[{"db":"b","entries":[]}"#;
        let mut stream = LogRecordStream::new(byte_stream(vec![body]));
        stream.info().await.unwrap();
        // First record parses; the missing `]` then surfaces.
        assert!(stream.next_record().await.unwrap().is_some());
        assert!(matches!(
            stream.next_record().await,
            Err(SourceError::Truncated)
        ));
    }

    #[tokio::test]
    async fn test_transport_error_mid_stream() {
        let chunks: Vec<Result<Bytes, SourceError>> = vec![
            Ok(Bytes::from_static(br#"{"info":{"start":1},"log":["#)),
            Err(SourceError::Parse("connection reset".into())),
        ];
        let mut stream = LogRecordStream::new(Box::pin(futures::stream::iter(chunks)));
        stream.info().await.unwrap();
        assert!(stream.next_record().await.is_err());
    }

    #[test]
    fn test_scan_value_primitives() {
        assert_eq!(scan_value(b"123,", 0), Some(3));
        assert_eq!(scan_value(b"true}", 0), Some(4));
        assert_eq!(scan_value(b"123", 0), None);
    }

    #[test]
    fn test_scan_string_with_escapes() {
        let buf = br#""a\"b" rest"#;
        assert_eq!(scan_string(buf, 0), Some(6));
    }
}
