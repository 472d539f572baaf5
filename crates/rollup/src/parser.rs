//! Streaming reader for delimited recipe exports.
//!
//! Records are pulled lazily from the underlying reader, one at a time. A
//! malformed record yields a [`RowError`] and reading continues with the next
//! record; only an unreadable header row is fatal.

use std::collections::HashMap;
use std::io::{Chain, Cursor, Read};
use std::sync::Arc;

use crate::config::{Delimiter, InputConfig};
use crate::error::{RollupError, RowError, RowErrorKind};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Bytes read up front when the delimiter is sniffed; the sniffer only sees this head.
const SNIFF_HEAD: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Headers + records
// ---------------------------------------------------------------------------

/// Header row with case-insensitive, position-independent lookup.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl Headers {
    pub fn new(names: Vec<String>) -> Self {
        let mut index = HashMap::new();
        for (i, name) in names.iter().enumerate() {
            // First occurrence wins for duplicated header names.
            index.entry(name.to_lowercase()).or_insert(i);
        }
        Self { names, index }
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(&name.trim().to_lowercase()).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One data record: field values in header order.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub line: u64,
    fields: Vec<String>,
    headers: Arc<Headers>,
}

impl RawRecord {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.headers
            .position(column)
            .and_then(|i| self.fields.get(i))
            .map(String::as_str)
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// `(header, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .names
            .iter()
            .map(String::as_str)
            .zip(self.fields.iter().map(String::as_str))
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

pub struct RecordReader<R: Read> {
    input: String,
    dialect: Dialect,
    reader: csv::Reader<QuoteTracker<Source<R>>>,
    headers: Arc<Headers>,
    header_line: u64,
    /// Lines consumed before the current `reader` started (nonzero after a replay).
    line_offset: u64,
    record: csv::ByteRecord,
    done: bool,
}

impl<R: Read> RecordReader<R> {
    /// Open an export. `input` names the stream in diagnostics.
    ///
    /// An empty stream is not an error: the reader has no headers and yields nothing.
    pub fn new(input: impl Into<String>, mut source: R, config: &InputConfig) -> Result<Self, RollupError> {
        let input = input.into();

        // Pipes return short reads: fill the head or reach end of stream.
        let want = match config.delimiter {
            Delimiter::Auto => SNIFF_HEAD,
            Delimiter::Byte(_) => UTF8_BOM.len(),
        };
        let mut head = Vec::with_capacity(want);
        source
            .by_ref()
            .take(want as u64)
            .read_to_end(&mut head)
            .map_err(|e| RollupError::io(input.clone(), e))?;
        if head.starts_with(UTF8_BOM) {
            head = head.split_off(UTF8_BOM.len());
        }

        let quote = config.quote as u8;
        let delimiter = match config.delimiter {
            Delimiter::Byte(b) => b,
            Delimiter::Auto => sniff_delimiter(&head, quote),
        };
        let dialect = Dialect {
            delimiter,
            quote,
            escape: config.escape.map(|c| c as u8),
            trim: config.trim,
        };
        let reader = dialect.reader(Source::Stream(Cursor::new(head).chain(source)));

        let mut this = Self {
            input,
            dialect,
            reader,
            headers: Arc::new(Headers::default()),
            header_line: 0,
            line_offset: 0,
            record: csv::ByteRecord::new(),
            done: false,
        };
        this.read_headers()?;
        Ok(this)
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Line of the header row, 0 when the stream was empty.
    pub fn header_line(&self) -> u64 {
        self.header_line
    }

    fn read_headers(&mut self) -> Result<(), RollupError> {
        loop {
            match self.reader.read_byte_record(&mut self.record) {
                Ok(false) => {
                    self.done = true;
                    return Ok(());
                }
                Ok(true) if is_blank(&self.record) => continue,
                Ok(true) => {
                    if self.reader.get_ref().unterminated_at_eof() {
                        return Err(RollupError::Header {
                            input: self.input.clone(),
                            message: "unterminated quoted field".into(),
                        });
                    }
                    self.header_line = self.record_line();
                    let names = self
                        .record
                        .iter()
                        .map(|f| decode_field(f).trim().to_string())
                        .collect();
                    self.headers = Arc::new(Headers::new(names));
                    return Ok(());
                }
                Err(e) => {
                    return Err(RollupError::Header {
                        input: self.input.clone(),
                        message: e.to_string(),
                    })
                }
            }
        }
    }

    fn record_line(&self) -> u64 {
        self.line_offset + self.record.position().map(|p| p.line()).unwrap_or(0)
    }

    /// A quote left open at end of input made the csv reader swallow every
    /// byte after it into one record. Drop the record's first line and parse
    /// the rest again from the line after it.
    fn resume_after(&mut self, line: u64) {
        let swallowed = self.reader.get_mut().take_pending();
        let rest = after_first_line(&swallowed).to_vec();
        self.reader = self.dialect.reader(Source::Replay(Cursor::new(rest)));
        self.line_offset = line;
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<RawRecord, RowError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            match self.reader.read_byte_record(&mut self.record) {
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Ok(true) if is_blank(&self.record) => continue,
                Ok(true) => {
                    let line = self.record_line();
                    if self.reader.get_ref().unterminated_at_eof() {
                        self.resume_after(line);
                        return Some(Err(RowError::new(
                            self.input.clone(),
                            line,
                            RowErrorKind::UnterminatedQuote,
                        )));
                    }
                    if self.record.len() != self.headers.len() {
                        return Some(Err(RowError::new(
                            self.input.clone(),
                            line,
                            RowErrorKind::FieldCount {
                                expected: self.headers.len(),
                                found: self.record.len(),
                            },
                        )));
                    }
                    let fields = self.record.iter().map(decode_field).collect();
                    return Some(Ok(RawRecord {
                        line,
                        fields,
                        headers: Arc::clone(&self.headers),
                    }));
                }
                Err(e) => {
                    let line = self.line_offset + e.position().map(|p| p.line()).unwrap_or(0);
                    // An I/O failure leaves the stream in an unknown state.
                    if matches!(e.kind(), csv::ErrorKind::Io(_)) {
                        self.done = true;
                    }
                    return Some(Err(RowError::new(
                        self.input.clone(),
                        line,
                        RowErrorKind::Csv {
                            message: e.to_string(),
                        },
                    )));
                }
            }
        }
    }
}

/// Delimiter and quoting settings shared by the first reader and any replay.
#[derive(Debug, Clone, Copy)]
struct Dialect {
    delimiter: u8,
    quote: u8,
    escape: Option<u8>,
    trim: bool,
}

impl Dialect {
    fn reader<S: Read>(&self, source: S) -> csv::Reader<QuoteTracker<S>> {
        csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .quote(self.quote)
            .escape(self.escape)
            .double_quote(true)
            .has_headers(false)
            .flexible(true)
            .trim(if self.trim { csv::Trim::All } else { csv::Trim::None })
            .from_reader(QuoteTracker::new(source, self.delimiter, self.quote, self.escape))
    }
}

/// The caller's stream behind its already-read head, or the tail of it being
/// parsed again after an unterminated quote.
enum Source<R> {
    Stream(Chain<Cursor<Vec<u8>>, R>),
    Replay(Cursor<Vec<u8>>),
}

impl<R: Read> Read for Source<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Source::Stream(inner) => inner.read(buf),
            Source::Replay(inner) => inner.read(buf),
        }
    }
}

fn after_first_line(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == b'\n' || b == b'\r') {
        Some(i) if bytes[i] == b'\r' && bytes.get(i + 1) == Some(&b'\n') => &bytes[i + 2..],
        Some(i) => &bytes[i + 1..],
        None => &[],
    }
}

fn is_blank(record: &csv::ByteRecord) -> bool {
    record.iter().all(|f| f.iter().all(u8::is_ascii_whitespace))
}

/// Decode a field as UTF-8, falling back to Windows-1252 for legacy exports.
fn decode_field(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

// ---------------------------------------------------------------------------
// Delimiter sniffing
// ---------------------------------------------------------------------------

const SNIFF_CANDIDATES: [u8; 4] = [b'\t', b';', b',', b'|'];
const SNIFF_RECORDS: usize = 10;

/// Pick the field delimiter from the head of an export.
///
/// The head is split into records with quoting respected, so a quoted field
/// that spans lines stays inside its record. A candidate scores the number of
/// records whose field count matches the header's, times that count; a
/// candidate that leaves the header as a single field never wins.
pub fn sniff_delimiter(head: &[u8], quote: u8) -> u8 {
    let records = split_records(head, quote);
    let mut best = b',';
    let mut best_score = 0;

    for delimiter in SNIFF_CANDIDATES {
        let counts: Vec<usize> = records
            .iter()
            .map(|record| count_fields(record, delimiter, quote))
            .collect();
        let Some(&target) = counts.first() else {
            break;
        };
        if target <= 1 {
            continue;
        }
        let score = counts.iter().filter(|&&c| c == target).count() * target;
        if score > best_score {
            best_score = score;
            best = delimiter;
        }
    }

    best
}

/// First non-blank records of `head`. A trailing record cut off inside quotes is dropped.
fn split_records(head: &[u8], quote: u8) -> Vec<&[u8]> {
    let mut records = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, &b) in head.iter().enumerate() {
        if b == quote {
            quoted = !quoted;
        } else if (b == b'\n' || b == b'\r') && !quoted {
            push_record(&mut records, &head[start..i]);
            start = i + 1;
            if records.len() == SNIFF_RECORDS {
                return records;
            }
        }
    }
    if !quoted {
        push_record(&mut records, &head[start..]);
    }
    records
}

fn push_record<'a>(records: &mut Vec<&'a [u8]>, record: &'a [u8]) {
    if !record.iter().all(u8::is_ascii_whitespace) {
        records.push(record);
    }
}

fn count_fields(record: &[u8], delimiter: u8, quote: u8) -> usize {
    let mut fields = 1;
    let mut quoted = false;
    for &b in record {
        if b == quote {
            quoted = !quoted;
        } else if b == delimiter && !quoted {
            fields += 1;
        }
    }
    fields
}

// ---------------------------------------------------------------------------
// Quote tracking
// ---------------------------------------------------------------------------

/// Pass-through reader that mirrors the CSV quoting state machine, so a quote
/// still open at end of input can be reported instead of silently swallowing
/// the rest of the stream into one field.
///
/// It also keeps the raw bytes read since the last record terminator outside
/// quotes, which is everything the unterminated record swallowed.
struct QuoteTracker<R> {
    inner: R,
    delimiter: u8,
    quote: u8,
    escape: Option<u8>,
    state: QuoteState,
    pending: Vec<u8>,
    eof: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuoteState {
    FieldStart,
    Unquoted,
    Quoted,
    Escaped,
    QuoteInQuoted,
}

impl<R> QuoteTracker<R> {
    fn new(inner: R, delimiter: u8, quote: u8, escape: Option<u8>) -> Self {
        Self {
            inner,
            delimiter,
            quote,
            escape,
            state: QuoteState::FieldStart,
            pending: Vec::new(),
            eof: false,
        }
    }

    fn unterminated_at_eof(&self) -> bool {
        self.eof && matches!(self.state, QuoteState::Quoted | QuoteState::Escaped)
    }

    fn take_pending(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }

    fn advance(&mut self, b: u8) {
        let newline = b == b'\n' || b == b'\r';
        let boundary = b == self.delimiter || newline;
        self.state = match self.state {
            QuoteState::FieldStart | QuoteState::Unquoted if boundary => QuoteState::FieldStart,
            QuoteState::FieldStart if b == self.quote => QuoteState::Quoted,
            QuoteState::FieldStart | QuoteState::Unquoted => QuoteState::Unquoted,
            QuoteState::Quoted if Some(b) == self.escape => QuoteState::Escaped,
            QuoteState::Quoted if b == self.quote => QuoteState::QuoteInQuoted,
            QuoteState::Quoted => QuoteState::Quoted,
            QuoteState::Escaped => QuoteState::Quoted,
            QuoteState::QuoteInQuoted if b == self.quote => QuoteState::Quoted,
            QuoteState::QuoteInQuoted if boundary => QuoteState::FieldStart,
            QuoteState::QuoteInQuoted => QuoteState::Unquoted,
        };
        if newline && self.state == QuoteState::FieldStart {
            self.pending.clear();
        } else {
            self.pending.push(b);
        }
    }
}

impl<R: Read> Read for QuoteTracker<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.eof = true;
        }
        for &b in &buf[..n] {
            self.advance(b);
        }
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
