
use std::fmt;
use std::ops::Range;

use memchr::memchr;
use util::pool::Pool;

use crate::error::{Error, Result};
use crate::imf;

pub const DEFAULT_HEADER_CAPACITY: usize = 100;
pub const DEFAULT_BUFFER_SIZE: usize = 4096;
pub const DEFAULT_MAX_BUFFER_RECACHE: usize = DEFAULT_BUFFER_SIZE * 10;
pub const DEFAULT_MAX_TRANSFER_ENCODINGS: usize = 10;
// max of the HTTP 1.1 methods
pub const DEFAULT_MAX_METHOD_NAME: usize = 7;
// max bytes of a header line
pub const DEFAULT_MAX_HEADER_LINE: usize = 1000;

const URI_MAX: usize = 4096;

/// Outcome of a streaming parse step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// The element parsed completely.
    Success,
    /// More input is required.
    Progress,
    /// A configured capacity was exceeded.
    Oob,
    /// The queried element is not present.
    Absent,
    /// The input cannot be valid HTTP.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageConfig {
    pub header_capacity: usize,
    pub max_header_line_bytes: usize,
    pub max_method_name_bytes: usize,
    pub max_transfer_encodings: usize,
    pub buffer_default_size: usize,
    /// Retired buffers above this capacity are dropped instead of pooled.
    pub max_buffer_recache_bytes: usize,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            header_capacity: DEFAULT_HEADER_CAPACITY,
            max_header_line_bytes: DEFAULT_MAX_HEADER_LINE,
            max_method_name_bytes: DEFAULT_MAX_METHOD_NAME,
            max_transfer_encodings: DEFAULT_MAX_TRANSFER_ENCODINGS,
            buffer_default_size: DEFAULT_BUFFER_SIZE,
            max_buffer_recache_bytes: DEFAULT_MAX_BUFFER_RECACHE,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

#[derive(Debug, Clone)]
struct HeaderSpan {
    name: Range<usize>,
    value: Range<usize>,
}

#[derive(Debug, Clone)]
enum StartLine {
    None,
    Request {
        method: Range<usize>,
        uri: Range<usize>,
    },
    Status {
        code: u16,
        phrase: Range<usize>,
    },
}

enum Step<T> {
    Done(T),
    Progress,
    Oob,
    Fail,
}

fn is_whitespace(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

fn is_control(b: u8) -> bool {
    b < 32 || b == 127
}

fn is_separator(b: u8) -> bool {
    matches!(
        b,
        b'(' | b')'
            | b'<'
            | b'>'
            | b'@'
            | b','
            | b';'
            | b':'
            | b'\\'
            | b'"'
            | b'/'
            | b'['
            | b']'
            | b'?'
            | b'='
            | b'{'
            | b'}'
            | b' '
            | b'\t'
    )
}

fn is_token_char(b: u8) -> bool {
    b.is_ascii() && !is_control(b) && !is_separator(b)
}

fn is_token(bytes: &[u8]) -> bool {
    !bytes.is_empty() && bytes.iter().all(|&b| is_token_char(b))
}

fn is_reason_phrase(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == b'\t' || (32..127).contains(&b) || b > 127)
}

fn is_uri_string(bytes: &[u8]) -> bool {
    !bytes.is_empty() && bytes.iter().all(|&b| (33..127).contains(&b))
}

// field-value including embedded obs-fold (CRLF followed by SP / HTAB)
fn is_field_content(bytes: &[u8]) -> bool {
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' => {
                if i + 2 >= bytes.len() || bytes[i + 1] != b'\n' || !is_whitespace(bytes[i + 2]) {
                    return false;
                }
                i += 3;
            }
            b'\t' => i += 1,
            b if !is_control(b) => i += 1,
            _ => return false,
        }
    }
    true
}

fn is_quoted_string(bytes: &[u8]) -> bool {
    if bytes.len() < 2 || bytes[0] != b'"' || bytes[bytes.len() - 1] != b'"' {
        return false;
    }
    let inner = &bytes[1..bytes.len() - 1];
    let mut i = 0;
    while i < inner.len() {
        match inner[i] {
            b'\\' => {
                if i + 1 >= inner.len() {
                    return false;
                }
                i += 2;
            }
            b'"' => return false,
            b if is_control(b) => return false,
            _ => i += 1,
        }
    }
    true
}

fn skip_whitespace(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|&&b| is_whitespace(b)).count()
}

fn trim(bytes: &[u8], range: Range<usize>) -> Range<usize> {
    let mut start = range.start;
    let mut end = range.end;
    while start < end && is_whitespace(bytes[start]) {
        start += 1;
    }
    while end > start && is_whitespace(bytes[end - 1]) {
        end -= 1;
    }
    start..end
}

fn find(bytes: &[u8], pattern: &[u8]) -> Option<usize> {
    if pattern.len() == 1 {
        memchr(pattern[0], bytes)
    } else {
        bytes
            .windows(pattern.len())
            .position(|window| window == pattern)
    }
}

//                   0123   4  5        6  7
// HTTP-Version   = "HTTP" "/" 1*DIGIT "." 1*DIGIT
fn parse_version(buf: &[u8]) -> Step<(Version, usize)> {
    let ws = skip_whitespace(buf);
    let b = &buf[ws..];

    if b.is_empty() {
        return Step::Progress;
    }

    let prefix: &[u8] = b"HTTP/";
    let n = b.len().min(prefix.len());
    if !b[..n].eq_ignore_ascii_case(&prefix[..n]) {
        return Step::Fail;
    }
    if b.len() < 6 {
        return Step::Progress;
    }
    if !b[5].is_ascii_digit() {
        return Step::Fail;
    }
    if b.len() < 7 {
        return Step::Progress;
    }
    if b[6] != b'.' {
        return Step::Fail;
    }
    if b.len() < 8 {
        return Step::Progress;
    }
    if !b[7].is_ascii_digit() {
        return Step::Fail;
    }

    Step::Done((
        Version {
            major: b[5] - b'0',
            minor: b[7] - b'0',
        },
        ws + 8,
    ))
}

//                            8  9 10 11     12
// Status-Line = HTTP-Version SP Status-Code SP Reason-Phrase CRLF
fn parse_status_line(buf: &[u8]) -> Step<(Version, u16, Range<usize>, usize)> {
    let ws = skip_whitespace(buf);
    let b = &buf[ws..];

    let version = match parse_version(b) {
        Step::Done((version, _)) => version,
        Step::Progress => return Step::Progress,
        _ => return Step::Fail,
    };

    if b.len() == 8 {
        return Step::Progress;
    }
    if b[8] != b' ' {
        return Step::Fail;
    }
    if b.len() == 9 {
        return Step::Progress;
    }

    let digits = (b.len() - 9).min(3);
    if !b[9..9 + digits].iter().all(u8::is_ascii_digit) {
        return Step::Fail;
    }
    if b.len() < 13 {
        return Step::Progress;
    }
    if b[12] != b' ' {
        return Step::Fail;
    }
    if b.len() == 13 {
        return Step::Progress;
    }

    let mut code: u16 = 0;
    for &digit in &b[9..12] {
        code = code * 10 + (digit - b'0') as u16;
    }

    let phrase_end = match find(&b[13..], b"\r\n") {
        Some(pos) => 13 + pos,
        None => return Step::Progress,
    };
    if phrase_end == 13 {
        return Step::Fail;
    }
    if !is_reason_phrase(&b[13..phrase_end]) {
        return Step::Fail;
    }

    Step::Done((version, code, ws + 13..ws + phrase_end, ws + phrase_end + 2))
}

// Request-Line = Method SP Request-URI SP HTTP-Version CRLF
fn parse_request_line(
    buf: &[u8],
    max_method_name: usize,
) -> Step<(Version, Range<usize>, Range<usize>, usize)> {
    let lineend = memchr(b'\r', buf);

    let ws = skip_whitespace(buf);
    let mut offset = ws;

    let method_end = match memchr(b' ', &buf[offset..]) {
        None => {
            if max_method_name != 0 && buf.len() - offset >= max_method_name {
                return Step::Fail;
            }
            if lineend.is_some() {
                return Step::Fail;
            }
            return Step::Progress;
        }
        Some(pos) => {
            if max_method_name != 0 && pos > max_method_name {
                return Step::Fail;
            }
            if let Some(le) = lineend {
                if le < offset + pos {
                    return Step::Fail;
                }
            }
            offset + pos
        }
    };

    let method = offset..method_end;
    if !is_token(&buf[method.clone()]) {
        return Step::Fail;
    }
    offset = method_end + 1;

    if offset >= buf.len() {
        return Step::Progress;
    }

    let uri_end = match memchr(b' ', &buf[offset..]) {
        None => {
            if buf.len() - offset > URI_MAX {
                return Step::Fail;
            }
            if lineend.is_some() {
                return Step::Fail;
            }
            return Step::Progress;
        }
        Some(pos) => {
            if pos > URI_MAX {
                return Step::Fail;
            }
            if let Some(le) = lineend {
                if le < offset + pos {
                    return Step::Fail;
                }
            }
            offset + pos
        }
    };

    let uri = offset..uri_end;
    if !is_uri_string(&buf[uri.clone()]) {
        return Step::Fail;
    }
    offset = uri_end + 1;

    if offset >= buf.len() {
        return Step::Progress;
    }

    let rest = &buf[offset..];
    let version = match parse_version(rest) {
        Step::Done((version, _)) => version,
        Step::Progress => return Step::Progress,
        _ => return Step::Fail,
    };

    if rest.len() < 10 {
        return Step::Progress;
    }
    if rest[8] != b'\r' || rest[9] != b'\n' {
        return Step::Fail;
    }

    Step::Done((version, method, uri, offset + 10))
}

/*
 *      header-field   = field-name ":" OWS field-value OWS
 *
 *      field-name     = token
 *      field-value    = *( field-content / obs-fold )
 *
 *      obs-fold       = CRLF 1*( SP / HTAB )
 *                     ; obsolete line folding
 */
fn parse_header_line(buf: &[u8], max_line: usize) -> Step<(HeaderSpan, usize)> {
    let lineend = memchr(b'\r', buf);
    if let (Some(le), true) = (lineend, max_line != 0) {
        if le > max_line {
            return Step::Fail;
        }
    }

    let ws = skip_whitespace(buf);
    let mut offset = ws;

    let colon = match memchr(b':', &buf[offset..]) {
        None => {
            if lineend.is_some() {
                return Step::Fail;
            }
            if max_line != 0 && buf.len() - offset > max_line {
                return Step::Fail;
            }
            return Step::Progress;
        }
        Some(pos) => {
            if let Some(le) = lineend {
                if le < offset + pos {
                    return Step::Fail;
                }
            }
            offset + pos
        }
    };

    let name = offset..colon;
    if !is_token(&buf[name.clone()]) {
        return Step::Fail;
    }
    offset = colon + 1;
    offset += skip_whitespace(&buf[offset..]);

    let value_start = offset;

    let mut lineend = match find(&buf[offset..], b"\r\n") {
        Some(pos) => offset + pos,
        None => {
            if max_line != 0 && max_line < buf.len() {
                return Step::Fail;
            }
            return Step::Progress;
        }
    };

    // obs-fold: a CRLF followed by whitespace continues the value
    loop {
        if lineend + 2 >= buf.len() {
            // cannot yet tell a fold from the next element
            return Step::Progress;
        }
        if !is_whitespace(buf[lineend + 2]) {
            break;
        }
        lineend = match find(&buf[lineend + 2..], b"\r\n") {
            Some(pos) => lineend + 2 + pos,
            None => return Step::Progress,
        };
    }

    let value = trim(buf, value_start..lineend);
    if value.is_empty() {
        return Step::Fail;
    }
    if !is_field_content(&buf[value.clone()]) {
        return Step::Fail;
    }

    Step::Done((HeaderSpan { name, value }, lineend + 2))
}

fn parse_headers(
    buf: &[u8],
    capacity: usize,
    max_line: usize,
) -> Step<(Vec<HeaderSpan>, usize)> {
    let mut headers = Vec::new();
    let mut offset = 0;

    loop {
        match parse_header_line(&buf[offset..], max_line) {
            Step::Done((span, next)) => {
                if headers.len() == capacity {
                    return Step::Oob;
                }
                headers.push(HeaderSpan {
                    name: span.name.start + offset..span.name.end + offset,
                    value: span.value.start + offset..span.value.end + offset,
                });
                offset += next;
            }
            Step::Progress => return Step::Progress,
            _ => {
                // no further header line, expect the closing CRLF
                let rest = &buf[offset..];
                if rest.is_empty() {
                    return Step::Progress;
                }
                if rest[0] != b'\r' {
                    return Step::Fail;
                }
                if rest.len() == 1 {
                    return Step::Progress;
                }
                if rest[1] != b'\n' {
                    return Step::Fail;
                }
                return Step::Done((headers, offset + 2));
            }
        }
    }
}

//  transfer-extension = token *( OWS ";" OWS transfer-parameter )
//  transfer-parameter = token BWS "=" BWS ( token / quoted-string )
fn is_transfer_encoding(bytes: &[u8]) -> bool {
    match memchr(b';', bytes) {
        None => is_token(bytes),
        Some(delimiter) => {
            if delimiter == 0 {
                return false;
            }
            let name = trim(bytes, 0..delimiter);
            if name.is_empty() || !is_token(&bytes[name]) {
                return false;
            }
            is_parameter_list(&bytes[delimiter..])
        }
    }
}

//  chunk-ext      = *( ";" chunk-ext-name [ "=" chunk-ext-val ] )
//  chunk-ext-name = token
//  chunk-ext-val  = token / quoted-string
fn is_parameter_list(bytes: &[u8]) -> bool {
    let mut rest = bytes;

    while !rest.is_empty() {
        if rest[0] != b';' {
            return false;
        }
        rest = &rest[1..];

        let eq = match memchr(b'=', rest) {
            Some(pos) => pos,
            None => return false,
        };
        let key = trim(rest, 0..eq);
        if key.is_empty() || !is_token(&rest[key]) {
            return false;
        }

        let after = &rest[eq + 1..];
        let end = memchr(b';', after).unwrap_or(after.len());
        let value = trim(after, 0..end);
        if value.is_empty() {
            return false;
        }
        let value_bytes = &after[value];
        if !is_token(value_bytes) && !is_quoted_string(value_bytes) {
            return false;
        }

        rest = &after[end..];
    }

    true
}

/*
 *   chunked-body   = *chunk
 *                    last-chunk
 *                    trailer-part
 *                    CRLF
 *
 *   chunk          = chunk-size [ chunk-ext ] CRLF
 *                    chunk-data CRLF
 *   chunk-size     = 1*HEXDIG
 *   last-chunk     = 1*("0") [ chunk-ext ] CRLF
 */
fn parse_chunk(buf: &[u8], body_start: usize) -> Step<(Range<usize>, usize)> {
    let b = &buf[body_start..];
    if b.is_empty() {
        return Step::Progress;
    }

    let lineend = match memchr(b'\r', b) {
        Some(pos) => pos,
        None => return Step::Progress,
    };

    let ext = memchr(b';', &b[..lineend]);
    let size_end = ext.unwrap_or(lineend);

    if size_end == 0 {
        return Step::Fail;
    }
    let mut chunk_size: usize = 0;
    for &digit in &b[..size_end] {
        let nibble = match digit {
            b'0'..=b'9' => (digit - b'0') as usize,
            b'a'..=b'f' => (digit - b'a' + 10) as usize,
            b'A'..=b'F' => (digit - b'A' + 10) as usize,
            _ => return Step::Fail,
        };
        chunk_size = match chunk_size
            .checked_mul(16)
            .and_then(|n| n.checked_add(nibble))
        {
            Some(n) => n,
            None => return Step::Fail,
        };
    }

    if let Some(ext) = ext {
        if !is_parameter_list(&b[ext..lineend]) {
            return Step::Fail;
        }
    }

    if b.len() < lineend + 2 {
        return Step::Progress;
    }
    if b[lineend + 1] != b'\n' {
        return Step::Fail;
    }

    let data = lineend + 2;

    if chunk_size == 0 {
        // last chunk, expect the terminating CRLF
        if b.len() < data + 2 {
            return Step::Progress;
        }
        if b[data] != b'\r' || b[data + 1] != b'\n' {
            return Step::Fail;
        }
        return Step::Done((body_start + data..body_start + data, body_start + data + 2));
    }

    if b.len() < data + chunk_size + 2 {
        return Step::Progress;
    }
    if b[data + chunk_size] != b'\r' || b[data + chunk_size + 1] != b'\n' {
        return Step::Fail;
    }

    Step::Done((
        body_start + data..body_start + data + chunk_size,
        body_start + data + chunk_size + 2,
    ))
}

/// A streaming HTTP message over one owned, growable byte buffer.
///
/// Parsed elements are spans into the buffer; [`Message::parse`] may be
/// called after every [`Message::push`] until it stops reporting
/// [`ParseStatus::Progress`].
pub struct Message {
    config: MessageConfig,
    buffer: Vec<u8>,

    version: Option<Version>,
    start_line: StartLine,
    headers: Vec<HeaderSpan>,
    body: Option<Range<usize>>,
    chunk: Option<Range<usize>>,
    next: usize,
}

impl Message {
    pub fn new(config: MessageConfig) -> Self {
        let buffer = Vec::with_capacity(config.buffer_default_size);
        Self::with_buffer(config, buffer)
    }

    fn with_buffer(config: MessageConfig, mut buffer: Vec<u8>) -> Self {
        buffer.clear();
        Self {
            config,
            buffer,
            version: None,
            start_line: StartLine::None,
            headers: Vec::new(),
            body: None,
            chunk: None,
            next: 0,
        }
    }

    /// Starts a request message: `METHOD uri HTTP/1.1CRLF`.
    pub fn request(method: &str, uri: &str, config: MessageConfig) -> Result<Self> {
        if !is_token(method.as_bytes()) {
            return Err(Error::ErrInvalidHeaderName);
        }
        if config.max_method_name_bytes != 0 && method.len() > config.max_method_name_bytes {
            return Err(Error::ErrMethodTooLong);
        }
        if !is_uri_string(uri.as_bytes()) {
            return Err(Error::Other(format!("not a valid request uri: {uri}")));
        }

        let mut message = Self::new(config);
        message.buffer.extend_from_slice(method.as_bytes());
        message.buffer.push(b' ');
        message.buffer.extend_from_slice(uri.as_bytes());
        message.buffer.extend_from_slice(b" HTTP/1.1\r\n");
        Ok(message)
    }

    /// Starts a status message: `HTTP/1.1 code phraseCRLF`.
    pub fn status(code: u16, phrase: &str, config: MessageConfig) -> Result<Self> {
        if !(100..=999).contains(&code) {
            return Err(Error::ErrInvalidStatusCode);
        }
        if phrase.is_empty() || !is_reason_phrase(phrase.as_bytes()) {
            return Err(Error::Other(format!("not a valid reason phrase: {phrase}")));
        }

        let mut message = Self::new(config);
        message.buffer.extend_from_slice(b"HTTP/1.1 ");
        message.buffer.extend_from_slice(code.to_string().as_bytes());
        message.buffer.push(b' ');
        message.buffer.extend_from_slice(phrase.as_bytes());
        message.buffer.extend_from_slice(b"\r\n");
        Ok(message)
    }

    pub fn add_header(&mut self, name: &str, value: &str) -> Result<()> {
        if !is_token(name.as_bytes()) {
            return Err(Error::ErrInvalidHeaderName);
        }
        self.buffer.extend_from_slice(name.as_bytes());
        self.buffer.extend_from_slice(b": ");
        self.buffer.extend_from_slice(value.as_bytes());
        self.buffer.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Adds a `Date` header carrying the current time as IMF fixdate.
    pub fn add_date_header(&mut self) -> Result<()> {
        self.add_header("Date", &imf::now())
    }

    /// Terminates the header section.
    pub fn close_header(&mut self) {
        self.buffer.extend_from_slice(b"\r\n");
    }

    /// Adds a `Content-Length` header, closes the header section and
    /// appends the body.
    pub fn add_body(&mut self, body: &[u8]) -> Result<()> {
        self.add_header("Content-Length", &body.len().to_string())?;
        self.close_header();
        self.buffer.extend_from_slice(body);
        Ok(())
    }

    /// Appends incoming bytes to the unparsed buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn config(&self) -> MessageConfig {
        self.config
    }

    fn clear_parsed(&mut self) {
        self.version = None;
        self.start_line = StartLine::None;
        self.headers.clear();
        self.body = None;
        self.chunk = None;
        self.next = 0;
    }

    /// Parses the buffered bytes from the start.
    ///
    /// [`ParseStatus::Success`] leaves the parsed spans accessible and
    /// remembers how far the message reaches, so trailing bytes can be
    /// moved on with [`Message::shift_trailing`]. With a chunked transfer
    /// encoding every call surfaces one chunk via [`Message::chunk`]; the
    /// last chunk is the empty one.
    pub fn parse(&mut self) -> ParseStatus {
        self.clear_parsed();

        if self.buffer.is_empty() {
            return ParseStatus::Progress;
        }

        // the start line is a status line or a request line
        let mut offset;
        match parse_status_line(&self.buffer) {
            Step::Done((version, code, phrase, next)) => {
                self.version = Some(version);
                self.start_line = StartLine::Status { code, phrase };
                offset = next;
            }
            Step::Progress => return ParseStatus::Progress,
            _ => match parse_request_line(&self.buffer, self.config.max_method_name_bytes) {
                Step::Done((version, method, uri, next)) => {
                    self.version = Some(version);
                    self.start_line = StartLine::Request { method, uri };
                    offset = next;
                }
                Step::Progress => return ParseStatus::Progress,
                _ => return ParseStatus::Error,
            },
        }

        match parse_headers(
            &self.buffer[offset..],
            self.config.header_capacity,
            self.config.max_header_line_bytes,
        ) {
            Step::Done((spans, next)) => {
                self.headers = spans
                    .into_iter()
                    .map(|span| HeaderSpan {
                        name: span.name.start + offset..span.name.end + offset,
                        value: span.value.start + offset..span.value.end + offset,
                    })
                    .collect();
                offset += next;
            }
            Step::Progress => return ParseStatus::Progress,
            Step::Oob => {
                log::warn!(
                    "HTTP header exceeds the configured capacity of {} fields",
                    self.config.header_capacity
                );
                return ParseStatus::Oob;
            }
            Step::Fail => return ParseStatus::Error,
        }

        self.parse_body(offset)
    }

    fn parse_body(&mut self, body_start: usize) -> ParseStatus {
        let content_length = self.header("Content-Length");
        let has_transfer = self.header("Transfer-Encoding").is_some();

        if has_transfer {
            // Content-Length next to Transfer-Encoding is not allowed
            if content_length.is_some() {
                return ParseStatus::Error;
            }
            return self.parse_transfer_body(body_start);
        }

        if let Some(value) = content_length {
            if self.header_all("Content-Length").len() > 1 {
                return ParseStatus::Error;
            }
            if value.is_empty() || !value.iter().all(u8::is_ascii_digit) {
                return ParseStatus::Error;
            }
            let mut length: usize = 0;
            for &digit in value {
                length = match length
                    .checked_mul(10)
                    .and_then(|n| n.checked_add((digit - b'0') as usize))
                {
                    Some(n) => n,
                    None => return ParseStatus::Error,
                };
            }

            if self.buffer.len() < body_start + length {
                return ParseStatus::Progress;
            }

            self.body = Some(body_start..body_start + length);
            self.next = body_start + length;
            return ParseStatus::Success;
        }

        // no framing header, no body
        self.body = None;
        self.next = body_start;
        ParseStatus::Success
    }

    fn parse_transfer_body(&mut self, body_start: usize) -> ParseStatus {
        let mut encodings = Vec::new();
        match self.parse_transfer_encodings(&mut encodings) {
            ParseStatus::Success => {}
            ParseStatus::Oob => {
                log::warn!(
                    "HTTP header with more than {} transfer encodings is not supported",
                    self.config.max_transfer_encodings
                );
                return ParseStatus::Error;
            }
            _ => return ParseStatus::Error,
        }

        // the last applied encoding must be chunked, nothing else is
        // supported yet
        match encodings.last() {
            Some(range) => {
                if !self.buffer[range.clone()].eq_ignore_ascii_case(b"chunked") {
                    return ParseStatus::Error;
                }
            }
            None => return ParseStatus::Error,
        }

        match parse_chunk(&self.buffer, body_start) {
            Step::Done((chunk, next)) => {
                self.chunk = Some(chunk);
                self.body = Some(body_start..next);
                self.next = next;
                ParseStatus::Success
            }
            Step::Progress => ParseStatus::Progress,
            _ => ParseStatus::Error,
        }
    }

    /// Collects the comma separated Transfer-Encoding tokens across all
    /// Transfer-Encoding headers into `out`.
    ///
    /// [`ParseStatus::Absent`] without such a header, [`ParseStatus::Oob`]
    /// when more than the configured maximum are present.
    pub fn parse_transfer_encodings(&self, out: &mut Vec<Range<usize>>) -> ParseStatus {
        out.clear();

        let mut found = false;
        for span in &self.headers {
            if !self.buffer[span.name.clone()].eq_ignore_ascii_case(b"Transfer-Encoding") {
                continue;
            }
            found = true;

            let mut cursor = span.value.start;
            while cursor < span.value.end {
                let part_end = match memchr(b',', &self.buffer[cursor..span.value.end]) {
                    Some(pos) => cursor + pos,
                    None => span.value.end,
                };

                if out.len() == self.config.max_transfer_encodings {
                    return ParseStatus::Oob;
                }

                let token = trim(&self.buffer, cursor..part_end);
                if token.is_empty() || !is_transfer_encoding(&self.buffer[token.clone()]) {
                    return ParseStatus::Error;
                }
                out.push(token);

                if part_end == span.value.end {
                    break;
                }
                cursor = part_end + 1;
                if cursor >= span.value.end {
                    // a trailing comma leaves an empty element
                    return ParseStatus::Error;
                }
            }
        }

        if !found {
            return ParseStatus::Absent;
        }
        ParseStatus::Success
    }

    /// Parses the next chunk of a chunked message and advances past it.
    ///
    /// [`ParseStatus::Absent`] unless the preceding parse surfaced a
    /// chunk.
    pub fn parse_next_chunk(&mut self) -> ParseStatus {
        if self.chunk.is_none() {
            return ParseStatus::Absent;
        }

        match parse_chunk(&self.buffer, self.next) {
            Step::Done((chunk, next)) => {
                self.chunk = Some(chunk);
                if let Some(body) = &mut self.body {
                    body.end = next;
                }
                self.next = next;
                ParseStatus::Success
            }
            Step::Progress => ParseStatus::Progress,
            _ => ParseStatus::Error,
        }
    }

    /// Moves unparsed trailing bytes into a fresh message.
    ///
    /// Only meaningful after a successful parse; `None` when the buffer
    /// ends exactly with the parsed message.
    pub fn shift_trailing(&mut self) -> Option<Message> {
        if self.next == 0 || self.next >= self.buffer.len() {
            return None;
        }

        let mut message = Message::new(self.config);
        message.buffer.extend_from_slice(&self.buffer[self.next..]);
        self.buffer.truncate(self.next);
        Some(message)
    }

    pub fn version(&self) -> Option<Version> {
        self.version
    }

    pub fn is_request(&self) -> bool {
        matches!(self.start_line, StartLine::Request { .. })
    }

    pub fn is_status(&self) -> bool {
        matches!(self.start_line, StartLine::Status { .. })
    }

    pub fn method(&self) -> Option<&[u8]> {
        match &self.start_line {
            StartLine::Request { method, .. } => Some(&self.buffer[method.clone()]),
            _ => None,
        }
    }

    pub fn uri(&self) -> Option<&[u8]> {
        match &self.start_line {
            StartLine::Request { uri, .. } => Some(&self.buffer[uri.clone()]),
            _ => None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match &self.start_line {
            StartLine::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn reason_phrase(&self) -> Option<&[u8]> {
        match &self.start_line {
            StartLine::Status { phrase, .. } => Some(&self.buffer[phrase.clone()]),
            _ => None,
        }
    }

    pub fn headers<'a>(&'a self) -> impl Iterator<Item = (&'a [u8], &'a [u8])> + 'a {
        self.headers
            .iter()
            .map(|span| (&self.buffer[span.name.clone()], &self.buffer[span.value.clone()]))
    }

    /// First header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|span| self.buffer[span.name.clone()].eq_ignore_ascii_case(name.as_bytes()))
            .map(|span| &self.buffer[span.value.clone()])
    }

    pub fn header_all(&self, name: &str) -> Vec<&[u8]> {
        self.headers
            .iter()
            .filter(|span| self.buffer[span.name.clone()].eq_ignore_ascii_case(name.as_bytes()))
            .map(|span| &self.buffer[span.value.clone()])
            .collect()
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_ref().map(|range| &self.buffer[range.clone()])
    }

    /// The data of the chunk surfaced by the latest parse; empty for the
    /// last chunk.
    pub fn chunk(&self) -> Option<&[u8]> {
        self.chunk.as_ref().map(|range| &self.buffer[range.clone()])
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("buffered_bytes", &self.buffer.len())
            .field("version", &self.version)
            .field("start_line", &self.start_line)
            .field("headers", &self.headers.len())
            .field("body", &self.body)
            .field("chunk", &self.chunk)
            .finish()
    }
}

/// Creates messages whose buffers are drawn from a bounded pool.
pub struct MessageFactory {
    config: MessageConfig,
    pool: Pool<Vec<u8>>,
}

impl MessageFactory {
    pub fn new(config: MessageConfig, pool_capacity: usize) -> Self {
        Self {
            config,
            pool: Pool::new(pool_capacity),
        }
    }

    pub fn message(&self) -> Message {
        match self.pool.get() {
            Some(buffer) => Message::with_buffer(self.config, buffer),
            None => Message::new(self.config),
        }
    }

    /// Retires a message, recycling its buffer unless it grew beyond the
    /// recache limit.
    pub fn retire(&self, message: Message) {
        let buffer = message.buffer;
        if buffer.capacity() <= self.config.max_buffer_recache_bytes {
            self.pool.put(buffer);
        }
    }
}
