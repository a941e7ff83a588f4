use crate::prelude::*;
use std::net::TcpStream;

/// What the current message resolved to, decided at headers-complete.
pub enum Route {
    None,
    Upload(Upload),
    Download,
    Removal(Removal),
}

/// Per-connection request driver: owns the parser state and the pending
/// response bytes, but no socket. `handle_client` wires it to one.
pub struct Connection {
    pub factory: Arc<dyn ClientFactory>,
    pub block_size: usize,
    pub request: HttpRequest,
    pub route: Route,
    pub write_buffer: Vec<u8>,
    /// A download ready to stream, handed to the socket loop at
    /// message-complete together with the version to echo.
    pub streaming: Option<(HttpVersion, Download)>,
    pub closed: bool,
}

impl Connection {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Connection {
        Connection {
            factory,
            block_size: DEFAULT_BLOCK_SIZE,
            request: HttpRequest::new(),
            route: Route::None,
            write_buffer: Vec::new(),
            streaming: None,
            closed: false,
        }
    }

    /// Appends freshly read bytes and drives the state machine as far as
    /// they reach.
    pub fn feed(&mut self, data: &[u8]) {
        self.request.buffer.extend_from_slice(data);
        self.process();
    }

    fn process(&mut self) {
        loop {
            // one response at a time: a pending stream pauses parsing until
            // the socket loop has written it out
            if self.closed || self.streaming.is_some() {
                break;
            }
            let step = match self.request.state {
                ParsingState::RequestLine => self.request.parse_request_line(),
                ParsingState::Headers => self.parse_headers(),
                ParsingState::HeadersDone => {
                    self.setup_route();
                    Ok(())
                }
                ParsingState::Body => self.parse_body(),
                ParsingState::ChunkedBody => self.parse_chunked_body(),
                ParsingState::Complete => {
                    self.finish_message();
                    Ok(())
                }
            };
            match step {
                Ok(()) => {}
                Err(ParseError::Incomplete) => break,
                Err(e) => {
                    info!("hard parse error: {}", e);
                    let why = match e {
                        ParseError::MalformedRequestLine => "Malformed request line",
                        ParseError::MalformedHeader => "Malformed header",
                        ParseError::InvalidChunkSize => "Invalid chunk framing",
                        _ => "Bad request",
                    };
                    self.reply_error(&SoftError::new(HTTP_BAD_REQUEST, 400, why));
                    break;
                }
            }
        }
    }

    fn parse_headers(&mut self) -> std::result::Result<(), ParseError> {
        loop {
            match self.request.next_header()? {
                Some((name, value)) => self.request.handle_header(&name, &value),
                None => {
                    self.request.buffer.drain(..self.request.cursor);
                    self.request.cursor = 0;
                    self.request.state = ParsingState::HeadersDone;
                    return Ok(());
                }
            }
        }
    }

    // Headers are in: either report what went wrong early, or pick the
    // operation for the method and prepare for the body.
    fn setup_route(&mut self) {
        if let Some(err) = self.request.deferred_error.take() {
            debug!("resuming a deferred error: {}", err.why);
            self.reply_error(&err);
            return;
        }
        if self.request.targets.is_empty() {
            self.reply_error(&SoftError::new(HTTP_BAD_REQUEST, 400, "No target specified"));
            return;
        }

        match self.request.method {
            Method::Put => {
                self.reply_100();
                let upload = {
                    let mut builder = UploadBuilder::new(Arc::clone(&self.factory));
                    builder
                        .name(&self.request.chunk_id)
                        .block_size(self.block_size);
                    for target in &self.request.targets {
                        builder.target(target);
                    }
                    builder.build()
                };
                self.route = Route::Upload(upload);
                self.enter_body_state();
            }
            Method::Get => {
                self.reply_100();
                // the transfer itself waits for message-complete
                self.route = Route::Download;
                self.enter_body_state();
            }
            Method::Delete => {
                self.reply_100();
                let mut removal = {
                    let mut builder = RemovalBuilder::new(Arc::clone(&self.factory));
                    builder.name(&self.request.chunk_id);
                    for target in &self.request.targets {
                        builder.target(target);
                    }
                    builder.build()
                };
                let rc = removal.prepare();
                if rc != Status::Ok {
                    warn!("removal prepare on {}: {:?}", self.request.chunk_id, rc);
                    self.reply_error(&SoftError::new(HTTP_INTERNAL_SERVER_ERROR, 500, "Error"));
                    return;
                }
                self.route = Route::Removal(removal);
                self.enter_body_state();
            }
            Method::Other => {
                self.reply_error(&SoftError::new(
                    HTTP_NOT_ACCEPTABLE,
                    406,
                    "Method not managed",
                ));
            }
        }
    }

    fn enter_body_state(&mut self) {
        self.request.state = if self.request.is_chunked {
            ParsingState::ChunkedBody
        } else if self.request.body_remaining > 0 {
            ParsingState::Body
        } else {
            ParsingState::Complete
        };
    }

    fn parse_body(&mut self) -> std::result::Result<(), ParseError> {
        if let Some(data) = self.request.take_body() {
            self.route_body(&data);
        }
        if self.request.body_remaining == 0 {
            self.request.state = ParsingState::Complete;
            Ok(())
        } else {
            Err(ParseError::Incomplete)
        }
    }

    fn parse_chunked_body(&mut self) -> std::result::Result<(), ParseError> {
        loop {
            match self.request.parse_chunk()? {
                Some(data) => self.route_body(&data),
                None => {
                    self.request.state = ParsingState::Complete;
                    return Ok(());
                }
            }
        }
    }

    fn route_body(&mut self, data: &[u8]) {
        match &mut self.route {
            Route::Upload(upload) => upload.write(data),
            // GET and DELETE bodies carry nothing the gateway wants
            _ => {}
        }
    }

    fn finish_message(&mut self) {
        let version = self.request.version;
        match std::mem::replace(&mut self.route, Route::None) {
            Route::Upload(mut upload) => {
                for (key, value) in &self.request.xattrs {
                    upload.set_xattr(key, value);
                }
                if upload.commit() {
                    info!("upload of {} committed", self.request.chunk_id);
                    self.write_buffer.extend_from_slice(&success_reply(version));
                } else {
                    self.reply_error(&SoftError::new(
                        HTTP_INTERNAL_SERVER_ERROR,
                        400,
                        "Upload commit failed",
                    ));
                }
            }
            Route::Download => {
                let download = {
                    let mut builder = DownloadBuilder::new(Arc::clone(&self.factory));
                    builder.name(&self.request.chunk_id);
                    for target in &self.request.targets {
                        builder.target(target);
                    }
                    builder.build()
                };
                self.streaming = Some((version, download));
            }
            Route::Removal(mut removal) => {
                if removal.commit() {
                    info!("removal of {} committed", self.request.chunk_id);
                    self.write_buffer.extend_from_slice(&success_reply(version));
                } else {
                    self.reply_error(&SoftError::new(
                        HTTP_INTERNAL_SERVER_ERROR,
                        500,
                        "Removal impossible",
                    ));
                }
            }
            Route::None => {}
        }
        self.request.finish_request();
    }

    fn reply_100(&mut self) {
        if !self.request.expect_100 {
            return;
        }
        self.request.expect_100 = false;
        let reply = continue_reply(self.request.version);
        self.write_buffer.extend_from_slice(&reply);
    }

    fn reply_error(&mut self, err: &SoftError) {
        let reply = error_reply(self.request.version, err);
        self.write_buffer.extend_from_slice(&reply);
        self.closed = true;
    }
}

/// Per-connection task: reads up to `READ_BUF_SIZE` at a time, feeds the
/// driver, flushes replies, and streams downloads. Runs until EOF, a hard
/// error, or shutdown; the socket always closes on the way out.
pub fn handle_client(
    mut stream: TcpStream,
    factory: Arc<dyn ClientFactory>,
    shutdown: Arc<AtomicBool>,
) {
    if stream.set_read_timeout(Some(IO_TIMEOUT)).is_err()
        || stream.set_write_timeout(Some(IO_TIMEOUT)).is_err()
    {
        return;
    }

    let mut conn = Connection::new(factory);
    let mut buf = [0u8; READ_BUF_SIZE];

    'client: while !shutdown.load(Ordering::SeqCst) {
        match stream.read(&mut buf) {
            Ok(0) => {
                trace!("client peer closed");
                break;
            }
            Ok(n) => {
                conn.feed(&buf[..n]);
                loop {
                    if flush(&mut stream, &mut conn.write_buffer).is_err() {
                        break 'client;
                    }
                    let Some((version, mut download)) = conn.streaming.take() else {
                        break;
                    };
                    if stream_download(&mut stream, version, &mut download).is_err() {
                        break 'client;
                    }
                    // the stream is out; resume whatever is already buffered
                    conn.process();
                }
                if conn.closed {
                    break;
                }
            }
            // the read timeout is only the liveness tick
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                continue;
            }
            Err(e) => {
                debug!("client read: {}", e);
                break;
            }
        }
    }

    let _ = stream.shutdown(Shutdown::Both);
}

fn flush(stream: &mut TcpStream, buffer: &mut Vec<u8>) -> io::Result<()> {
    if buffer.is_empty() {
        return Ok(());
    }
    stream.write_all(buffer)?;
    buffer.clear();
    Ok(())
}

// The status line goes out before the backend is consulted, so a failure
// past this point can only truncate the stream: the terminating chunk is
// withheld and the connection drops.
fn stream_download(
    stream: &mut TcpStream,
    version: HttpVersion,
    download: &mut Download,
) -> io::Result<()> {
    stream.write_all(&stream_reply(version))?;
    download.prepare();

    let mut fragment = Vec::new();
    while !download.is_eof() {
        fragment.clear();
        match download.read(&mut fragment) {
            Ok(_) => {
                if !fragment.is_empty() {
                    stream.write_all(&chunk_frame(&fragment))?;
                }
            }
            Err(e) => {
                warn!("download aborted mid-stream: {}", e);
                return Err(io::Error::other(e));
            }
        }
    }
    stream.write_all(END_OF_STREAM)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::MemoryFactory;

    fn connection(factory: &Arc<MemoryFactory>) -> Connection {
        let mut conn = Connection::new(factory.clone());
        conn.block_size = 4;
        conn
    }

    #[test]
    fn test_put_stripes_and_replies_200() {
        let factory = Arc::new(MemoryFactory::new());
        let mut conn = connection(&factory);
        conn.feed(
            b"PUT /rawx/c HTTP/1.1\r\n\
              X-oio-chunk-meta-target: t0\r\n\
              X-oio-chunk-meta-target: t1\r\n\
              Content-Length: 8\r\n\r\n\
              AAAABBBB",
        );
        let reply = String::from_utf8(conn.write_buffer.clone()).unwrap();
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(reply.contains("Content-Length: 0\r\n"));
        assert!(!conn.closed);
        assert_eq!(
            factory.client("t0").keys(),
            vec!["c-#".to_string(), "c-0000000000-4".to_string()]
        );
        assert_eq!(
            factory.client("t1").keys(),
            vec!["c-0000000001-4".to_string()]
        );
    }

    #[test]
    fn test_put_body_may_arrive_in_pieces() {
        let factory = Arc::new(MemoryFactory::new());
        let mut conn = connection(&factory);
        conn.feed(b"PUT /rawx/c HTTP/1.1\r\nX-oio-chunk-meta-targ");
        conn.feed(b"et: t0\r\nContent-Length: 6\r\n\r\nAAA");
        assert!(conn.write_buffer.is_empty());
        conn.feed(b"ABB");
        assert!(
            String::from_utf8(conn.write_buffer.clone())
                .unwrap()
                .starts_with("HTTP/1.1 200 OK\r\n")
        );
    }

    #[test]
    fn test_chunked_put_with_trailer_target() {
        let factory = Arc::new(MemoryFactory::new());
        let mut conn = connection(&factory);
        conn.feed(
            b"PUT /rawx/c HTTP/1.1\r\n\
              X-oio-chunk-meta-target: t0\r\n\
              Transfer-Encoding: chunked\r\n\r\n\
              4\r\nAAAA\r\n0\r\nX-oio-chunk-meta-policy: p\r\n\r\n",
        );
        assert!(
            String::from_utf8(conn.write_buffer.clone())
                .unwrap()
                .starts_with("HTTP/1.1 200 OK\r\n")
        );
        assert_eq!(
            factory.client("t0").value("c-#"),
            Some(br#"{"policy":"p"}"#.to_vec())
        );
    }

    #[test]
    fn test_expect_continue_is_answered_once() {
        let factory = Arc::new(MemoryFactory::new());
        let mut conn = connection(&factory);
        conn.feed(
            b"PUT /rawx/c HTTP/1.1\r\n\
              X-oio-chunk-meta-target: t0\r\n\
              Expect: 100-continue\r\n\
              Content-Length: 4\r\n\r\n",
        );
        let interim = String::from_utf8(conn.write_buffer.clone()).unwrap();
        assert_eq!(interim.matches("100 Continue").count(), 1);
        conn.feed(b"AAAA");
        let all = String::from_utf8(conn.write_buffer.clone()).unwrap();
        assert_eq!(all.matches("100 Continue").count(), 1);
        assert!(all.contains("200 OK"));
    }

    #[test]
    fn test_get_defers_the_transfer_to_message_complete() {
        let factory = Arc::new(MemoryFactory::new());
        factory.client("t0").insert("c-0000000000-4", b"AAAA");
        factory.client("t0").insert("c-#", b"{}");
        let mut conn = connection(&factory);
        conn.feed(b"GET /rawx/c HTTP/1.1\r\nX-oio-chunk-meta-target: t0\r\n\r\n");
        assert!(conn.write_buffer.is_empty());
        let (version, mut download) = conn.streaming.take().unwrap();
        assert_eq!(version, HttpVersion { major: 1, minor: 1 });
        assert_eq!(download.prepare(), Status::Ok);
        let mut body = Vec::new();
        while !download.is_eof() {
            download.read(&mut body).unwrap();
        }
        assert_eq!(body, b"AAAA");
    }

    #[test]
    fn test_delete_runs_prepare_at_headers_complete() {
        let factory = Arc::new(MemoryFactory::new());
        factory.client("t0").insert("c-0000000000-4", b"AAAA");
        let mut conn = connection(&factory);
        conn.feed(b"DELETE /rawx/c HTTP/1.1\r\nX-oio-chunk-meta-target: t0\r\n\r\n");
        assert!(
            String::from_utf8(conn.write_buffer.clone())
                .unwrap()
                .starts_with("HTTP/1.1 200 OK\r\n")
        );
        assert!(factory.client("t0").keys().is_empty());
    }

    #[test]
    fn test_delete_of_missing_chunk_is_a_500() {
        let factory = Arc::new(MemoryFactory::new());
        let mut conn = connection(&factory);
        conn.feed(b"DELETE /rawx/c HTTP/1.1\r\nX-oio-chunk-meta-target: t0\r\n\r\n");
        let reply = String::from_utf8(conn.write_buffer.clone()).unwrap();
        assert!(reply.starts_with("HTTP/1.1 500 Error\r\n"));
        assert!(reply.ends_with(r#"{"status":500,"message":"Error"}"#));
        assert!(conn.closed);
    }

    #[test]
    fn test_delete_with_unreachable_target_is_a_500() {
        let factory = Arc::new(MemoryFactory::new());
        factory.client("t0").insert("c-0000000000-4", b"AAAA");
        factory.client("t1").set_broken(true);
        let mut conn = connection(&factory);
        conn.feed(
            b"DELETE /rawx/c HTTP/1.1\r\n\
              X-oio-chunk-meta-target: t0\r\n\
              X-oio-chunk-meta-target: t1\r\n\
              X-oio-chunk-meta-target: t2\r\n\r\n",
        );
        assert!(
            String::from_utf8(conn.write_buffer.clone())
                .unwrap()
                .starts_with("HTTP/1.1 500 Error\r\n")
        );
    }

    #[test]
    fn test_missing_target_header_is_a_400() {
        let factory = Arc::new(MemoryFactory::new());
        let mut conn = connection(&factory);
        conn.feed(b"PUT /rawx/c HTTP/1.1\r\nContent-Length: 4\r\n\r\nAAAA");
        let reply = String::from_utf8(conn.write_buffer.clone()).unwrap();
        assert!(reply.starts_with("HTTP/1.1 400 Error\r\n"));
        assert!(reply.ends_with(r#"{"status":400,"message":"No target specified"}"#));
        assert!(conn.closed);
    }

    #[test]
    fn test_empty_basename_is_a_deferred_400() {
        let factory = Arc::new(MemoryFactory::new());
        let mut conn = connection(&factory);
        conn.feed(b"PUT /rawx/ HTTP/1.1\r\nX-oio-chunk-meta-target: t0\r\n\r\n");
        let reply = String::from_utf8(conn.write_buffer.clone()).unwrap();
        assert!(reply.starts_with("HTTP/1.1 400 Error\r\n"));
        assert!(reply.contains("URL has no/empty basename"));
        // nothing was built, nothing was written
        assert!(factory.client("t0").keys().is_empty());
    }

    #[test]
    fn test_unknown_method_is_a_406() {
        let factory = Arc::new(MemoryFactory::new());
        let mut conn = connection(&factory);
        conn.feed(b"POST /rawx/c HTTP/1.1\r\nX-oio-chunk-meta-target: t0\r\n\r\n");
        let reply = String::from_utf8(conn.write_buffer.clone()).unwrap();
        assert!(reply.starts_with("HTTP/1.1 406 Error\r\n"));
        assert!(reply.ends_with(r#"{"status":406,"message":"Method not managed"}"#));
    }

    #[test]
    fn test_pipelined_message_waits_for_the_stream() {
        let factory = Arc::new(MemoryFactory::new());
        factory.client("t0").insert("c-0000000000-4", b"AAAA");
        let mut conn = connection(&factory);
        conn.feed(
            b"GET /rawx/c HTTP/1.1\r\nX-oio-chunk-meta-target: t0\r\n\r\n\
              GET /rawx/c HTTP/1.1\r\nX-oio-chunk-meta-target: t0\r\n\r\n",
        );
        assert!(conn.streaming.is_some());
        // the second message stays buffered until the first stream is out
        conn.streaming = None;
        conn.process();
        assert!(conn.streaming.is_some());
    }

    #[test]
    fn test_empty_put_leaves_only_the_manifest() {
        let factory = Arc::new(MemoryFactory::new());
        let mut conn = connection(&factory);
        conn.feed(b"PUT /rawx/c HTTP/1.1\r\nX-oio-chunk-meta-target: t0\r\n\r\n");
        assert!(
            String::from_utf8(conn.write_buffer.clone())
                .unwrap()
                .starts_with("HTTP/1.1 200 OK\r\n")
        );
        assert_eq!(factory.client("t0").keys(), vec!["c-#".to_string()]);
    }
}
