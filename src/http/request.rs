use crate::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Put,
    Get,
    Delete,
    /// Anything else; answered 406 once the headers are in.
    Other,
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Put => "PUT",
            Method::Get => "GET",
            Method::Delete => "DELETE",
            Method::Other => "?",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpVersion {
    pub major: u8,
    pub minor: u8,
}

impl Default for HttpVersion {
    fn default() -> Self {
        HttpVersion { major: 1, minor: 1 }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParsingState {
    RequestLine,
    Headers,
    HeadersDone,
    Body,
    ChunkedBody,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    ReadSize,
    ReadData(usize),
    ReadTrailingCRLF,
    ReadTrailers,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Not an error: the buffer holds no complete element yet.
    Incomplete,
    MalformedRequestLine,
    MalformedHeader,
    InvalidChunkSize,
    HeaderTooLong,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Incomplete => write!(f, "incomplete input"),
            ParseError::MalformedRequestLine => write!(f, "malformed request line"),
            ParseError::MalformedHeader => write!(f, "malformed header"),
            ParseError::InvalidChunkSize => write!(f, "invalid chunk size"),
            ParseError::HeaderTooLong => write!(f, "header section too long"),
        }
    }
}

impl std::error::Error for ParseError {}

const CRLF_LEN: usize = 2;

// A chunk-size line longer than this cannot be an honest size.
const CHUNK_SIZE_LINE_MAX: usize = 18;

/// Incremental parser state for one HTTP message, plus the request context
/// the gateway routes on: chunk id, targets, xattrs, the expect flag and
/// the deferred error slot.
#[derive(Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub version: HttpVersion,

    pub chunk_id: String,
    pub targets: Vec<String>,
    pub xattrs: BTreeMap<String, String>,
    pub expect_100: bool,
    pub deferred_error: Option<SoftError>,

    pub is_chunked: bool,
    pub body_remaining: usize,

    pub buffer: Vec<u8>,
    pub cursor: usize,
    pub state: ParsingState,
    pub chunk_state: ChunkState,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRequest {
    pub fn new() -> HttpRequest {
        HttpRequest {
            method: Method::Other,
            url: String::new(),
            version: HttpVersion::default(),
            chunk_id: String::new(),
            targets: Vec::new(),
            xattrs: BTreeMap::new(),
            expect_100: false,
            deferred_error: None,
            is_chunked: false,
            body_remaining: 0,
            buffer: Vec::with_capacity(READ_BUF_SIZE),
            cursor: 0,
            state: ParsingState::RequestLine,
            chunk_state: ChunkState::ReadSize,
        }
    }

    /// Consumes the parsed bytes and resets the per-message context, keeping
    /// whatever trailing bytes belong to the next message.
    pub fn finish_request(&mut self) {
        self.buffer.drain(..self.cursor);
        self.cursor = 0;
        self.method = Method::Other;
        self.url.clear();
        self.version = HttpVersion::default();
        self.chunk_id.clear();
        self.targets.clear();
        self.xattrs.clear();
        self.expect_100 = false;
        self.deferred_error = None;
        self.is_chunked = false;
        self.body_remaining = 0;
        self.state = ParsingState::RequestLine;
        self.chunk_state = ChunkState::ReadSize;
    }

    pub fn parse_request_line(&mut self) -> std::result::Result<(), ParseError> {
        let Some(line_end) = find_crlf(&self.buffer, self.cursor) else {
            return Err(ParseError::Incomplete);
        };
        let line = std::str::from_utf8(&self.buffer[self.cursor..line_end])
            .map_err(|_| ParseError::MalformedRequestLine)?;

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(ParseError::MalformedRequestLine);
        }
        let method = match parts[0] {
            "PUT" => Method::Put,
            "GET" => Method::Get,
            "DELETE" => Method::Delete,
            _ => Method::Other,
        };
        let url = parts[1].to_string();
        let version = parse_version(parts[2]).ok_or(ParseError::MalformedRequestLine)?;

        self.method = method;
        self.url = url;
        self.version = version;
        self.cursor = line_end + CRLF_LEN;
        self.state = ParsingState::Headers;
        self.extract_chunk_id();
        Ok(())
    }

    // The chunk id is the basename of the request path, common to every
    // method. A missing or empty basename is a deferred 400.
    fn extract_chunk_id(&mut self) {
        let path = self
            .url
            .split(|c| c == '?' || c == '#')
            .next()
            .unwrap_or("");
        match path.rfind('/') {
            Some(sep) if sep + 1 < path.len() => {
                self.chunk_id = path[sep + 1..].to_string();
            }
            _ => self.save_header_error(SoftError::new(
                HTTP_BAD_REQUEST,
                400,
                "URL has no/empty basename",
            )),
        }
    }

    /// Stashes an early error; header and body content is ignored from here
    /// on, and the reply goes out at headers-complete.
    pub fn save_header_error(&mut self, err: SoftError) {
        if self.deferred_error.is_none() {
            self.deferred_error = Some(err);
        }
    }

    /// Extracts the next `name: value` line. `Ok(None)` is the empty line
    /// closing a header (or trailer) section.
    pub fn next_header(
        &mut self,
    ) -> std::result::Result<Option<(String, String)>, ParseError> {
        let Some(line_end) = find_crlf(&self.buffer, self.cursor) else {
            return Err(ParseError::Incomplete);
        };
        if line_end == self.cursor {
            self.cursor = line_end + CRLF_LEN;
            return Ok(None);
        }
        let line = std::str::from_utf8(&self.buffer[self.cursor..line_end])
            .map_err(|_| ParseError::MalformedHeader)?;
        let Some(sep) = line.find(':') else {
            return Err(ParseError::MalformedHeader);
        };
        let name = line[..sep].trim().to_ascii_lowercase();
        let value = line[sep + 1..].trim().to_string();
        self.cursor = line_end + CRLF_LEN;
        Ok(Some((name, value)))
    }

    /// Routes one header (or trailer) into the request context. Trailers go
    /// through the same accumulators, so they extend the target list and
    /// overwrite xattrs exactly like headers do.
    pub fn handle_header(&mut self, name: &str, value: &str) {
        if self.deferred_error.is_some() {
            return;
        }
        if name == TARGET_HEADER {
            self.targets.push(value.to_string());
        } else if let Some(key) = name.strip_prefix(META_HEADER_PREFIX) {
            if !key.is_empty() {
                self.xattrs.insert(key.to_string(), value.to_string());
            }
        } else if name == "expect" {
            if value.to_ascii_lowercase().contains("100-continue") {
                self.expect_100 = true;
            }
        } else if name == "content-length" {
            self.body_remaining = value.parse().unwrap_or(0);
        } else if name == "transfer-encoding" {
            self.is_chunked = value.contains("chunked");
        }
    }

    /// Hands out whatever identity-encoded body bytes are available, up to
    /// what the message still owes.
    pub fn take_body(&mut self) -> Option<Vec<u8>> {
        debug_assert_eq!(self.cursor, 0);
        let take = self.buffer.len().min(self.body_remaining);
        if take == 0 {
            return None;
        }
        self.body_remaining -= take;
        Some(self.buffer.drain(..take).collect())
    }

    /// Drives the chunked-transfer sub-machine. `Ok(Some(data))` is a piece
    /// of body, `Ok(None)` means the terminating chunk and its trailers have
    /// been consumed.
    pub fn parse_chunk(&mut self) -> std::result::Result<Option<Vec<u8>>, ParseError> {
        loop {
            match self.chunk_state {
                ChunkState::ReadSize => {
                    if self.buffer.is_empty() {
                        return Err(ParseError::Incomplete);
                    }
                    let limit = self.buffer.len().min(CHUNK_SIZE_LINE_MAX);
                    match find_crlf(&self.buffer[..limit], 0) {
                        Some(line_end) => {
                            let line = String::from_utf8_lossy(&self.buffer[..line_end]);
                            let size = usize::from_str_radix(line.trim(), 16)
                                .map_err(|_| ParseError::InvalidChunkSize)?;
                            self.buffer.drain(..line_end + CRLF_LEN);
                            if size == 0 {
                                self.chunk_state = ChunkState::ReadTrailers;
                                continue;
                            }
                            self.chunk_state = ChunkState::ReadData(size);
                        }
                        None => {
                            if self.buffer.len() >= CHUNK_SIZE_LINE_MAX {
                                return Err(ParseError::InvalidChunkSize);
                            }
                            return Err(ParseError::Incomplete);
                        }
                    }
                }

                ChunkState::ReadData(remaining) => {
                    if self.buffer.is_empty() {
                        return Err(ParseError::Incomplete);
                    }
                    let take = self.buffer.len().min(remaining);
                    let data: Vec<u8> = self.buffer.drain(..take).collect();
                    self.chunk_state = if take == remaining {
                        ChunkState::ReadTrailingCRLF
                    } else {
                        ChunkState::ReadData(remaining - take)
                    };
                    return Ok(Some(data));
                }

                ChunkState::ReadTrailingCRLF => {
                    if self.buffer.len() < CRLF_LEN {
                        return Err(ParseError::Incomplete);
                    }
                    if &self.buffer[..CRLF_LEN] != b"\r\n" {
                        return Err(ParseError::InvalidChunkSize);
                    }
                    self.buffer.drain(..CRLF_LEN);
                    self.chunk_state = ChunkState::ReadSize;
                }

                ChunkState::ReadTrailers => {
                    if self.buffer.len() > READ_BUF_SIZE {
                        return Err(ParseError::HeaderTooLong);
                    }
                    match self.next_header()? {
                        Some((name, value)) => self.handle_header(&name, &value),
                        None => {
                            self.buffer.drain(..self.cursor);
                            self.cursor = 0;
                            return Ok(None);
                        }
                    }
                }
            }
        }
    }
}

fn parse_version(s: &str) -> Option<HttpVersion> {
    let rest = s.strip_prefix("HTTP/")?;
    let (major, minor) = rest.split_once('.')?;
    Some(HttpVersion {
        major: major.parse().ok()?,
        minor: minor.parse().ok()?,
    })
}

fn find_crlf(buffer: &[u8], start: usize) -> Option<usize> {
    buffer
        .get(start..)?
        .windows(CRLF_LEN)
        .position(|w| w == b"\r\n")
        .map(|at| start + at)
}
