use chunk_proxy::client::memory::MemoryFactory;
use chunk_proxy::http::{Connection, HttpRequest, Method, ParseError, ParsingState};
use std::sync::Arc;

#[test]
fn test_simple_put_request() {
    let factory = Arc::new(MemoryFactory::new());
    let mut conn = Connection::new(factory.clone());
    conn.feed(
        b"PUT /rawx/chunk42 HTTP/1.1\r\n\
          Host: localhost\r\n\
          X-oio-chunk-meta-target: 127.0.0.1:6000\r\n\
          Content-Length: 5\r\n\r\nhello",
    );

    let reply = String::from_utf8(conn.write_buffer.clone()).unwrap();
    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
    let client = factory.client("127.0.0.1:6000");
    assert_eq!(client.value("chunk42-0000000000-5"), Some(b"hello".to_vec()));
    assert_eq!(client.value("chunk42-#"), Some(b"{}".to_vec()));
}

#[test]
fn test_request_fed_one_byte_at_a_time() {
    let factory = Arc::new(MemoryFactory::new());
    let mut conn = Connection::new(factory.clone());
    let raw = b"PUT /rawx/c HTTP/1.1\r\n\
                X-oio-chunk-meta-target: t0\r\n\
                Content-Length: 4\r\n\r\nAAAA";
    for byte in raw {
        conn.feed(&[*byte]);
    }
    assert!(
        String::from_utf8(conn.write_buffer.clone())
            .unwrap()
            .starts_with("HTTP/1.1 200 OK\r\n")
    );
    assert_eq!(factory.client("t0").value("c-0000000000-4"), Some(b"AAAA".to_vec()));
}

#[test]
fn test_duplicate_targets_canonicalise_for_upload() {
    let factory = Arc::new(MemoryFactory::new());
    let mut conn = Connection::new(factory.clone());
    conn.block_size = 4;
    conn.feed(
        b"PUT /rawx/c HTTP/1.1\r\n\
          X-oio-chunk-meta-target: t1\r\n\
          X-oio-chunk-meta-target: t0\r\n\
          X-oio-chunk-meta-target: t1\r\n\
          Content-Length: 8\r\n\r\nAAAABBBB",
    );
    assert!(
        String::from_utf8(conn.write_buffer.clone())
            .unwrap()
            .starts_with("HTTP/1.1 200 OK\r\n")
    );
    // two distinct clients, striped in sorted order
    assert_eq!(
        factory.client("t0").keys(),
        vec!["c-#".to_string(), "c-0000000000-4".to_string()]
    );
    assert_eq!(factory.client("t1").keys(), vec!["c-0000000001-4".to_string()]);
}

#[test]
fn test_version_is_echoed_on_errors() {
    let factory = Arc::new(MemoryFactory::new());
    let mut conn = Connection::new(factory.clone());
    conn.feed(b"PATCH /rawx/c HTTP/1.0\r\nX-oio-chunk-meta-target: t0\r\n\r\n");
    let reply = String::from_utf8(conn.write_buffer.clone()).unwrap();
    assert!(reply.starts_with("HTTP/1.0 406 Error\r\n"));
    assert!(conn.closed);
}

#[test]
fn test_malformed_request_line_is_fatal() {
    let factory = Arc::new(MemoryFactory::new());
    let mut conn = Connection::new(factory.clone());
    conn.feed(b"PUT nonsense\r\n\r\n");
    let reply = String::from_utf8(conn.write_buffer.clone()).unwrap();
    assert!(reply.starts_with("HTTP/1.1 400 Error\r\n"));
    assert!(conn.closed);
}

#[test]
fn test_parser_surface_reports_incomplete_input() {
    let mut req = HttpRequest::new();
    req.buffer.extend_from_slice(b"GET /rawx");
    assert_eq!(req.parse_request_line(), Err(ParseError::Incomplete));

    req.buffer.extend_from_slice(b"/c HTTP/1.1\r\n");
    assert!(req.parse_request_line().is_ok());
    assert_eq!(req.method, Method::Get);
    assert_eq!(req.chunk_id, "c");
    assert_eq!(req.state, ParsingState::Headers);

    assert_eq!(req.next_header(), Err(ParseError::Incomplete));
    req.buffer.extend_from_slice(b"X-oio-chunk-meta-target: t0\r\n\r\n");
    let (name, value) = req.next_header().unwrap().unwrap();
    req.handle_header(&name, &value);
    assert_eq!(req.next_header(), Ok(None));
    assert_eq!(req.targets, vec!["t0"]);
}
