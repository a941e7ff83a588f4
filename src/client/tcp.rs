//! TCP sessions to the backend targets. One session per target, shared by
//! every request; submissions are framed with an 8-byte sequence number that
//! the backend echoes, so replies may come back in any order. A dedicated
//! reader thread per session decodes replies and resolves the pending
//! completions; when the session dies, every pending completion resolves
//! with a network error so no waiter is left stuck.

use crate::prelude::*;
use std::net::TcpStream;

const MAGIC_REQUEST: u8 = 0x80;
const MAGIC_REPLY: u8 = 0x81;

const OP_PUT: u8 = 1;
const OP_GET: u8 = 2;
const OP_RANGE: u8 = 3;
const OP_DELETE: u8 = 4;

const STATUS_OK: u8 = 0;
const STATUS_MISSING: u8 = 1;

// magic, opcode, status, reserved, key_len u16, seq u64, body_len u32
const HEADER_LEN: usize = 18;

// Sanity cap on a single reply frame.
const MAX_FRAME: usize = 256 * 1024 * 1024;

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn encode_request(seq: u64, op: &Op) -> Vec<u8> {
    let (opcode, key, payload): (u8, &str, Vec<u8>) = match op {
        Op::Put { key, value } => (OP_PUT, key, value.clone()),
        Op::Get { key } => (OP_GET, key, Vec::new()),
        Op::Delete { key } => (OP_DELETE, key, Vec::new()),
        Op::Range {
            start,
            end,
            max_items,
        } => {
            let mut payload = Vec::new();
            put_u16(&mut payload, start.len() as u16);
            payload.extend_from_slice(start.as_bytes());
            put_u16(&mut payload, end.len() as u16);
            payload.extend_from_slice(end.as_bytes());
            put_u32(&mut payload, *max_items);
            (OP_RANGE, "", payload)
        }
    };

    let mut frame = Vec::with_capacity(HEADER_LEN + key.len() + payload.len());
    frame.push(MAGIC_REQUEST);
    frame.push(opcode);
    frame.push(0);
    frame.push(0);
    put_u16(&mut frame, key.len() as u16);
    frame.extend_from_slice(&seq.to_be_bytes());
    put_u32(&mut frame, (key.len() + payload.len()) as u32);
    frame.extend_from_slice(key.as_bytes());
    frame.extend_from_slice(&payload);
    frame
}

fn decode_keys(body: &[u8]) -> std::result::Result<Vec<String>, ClientError> {
    let malformed = || ClientError::Protocol("malformed key list".to_string());
    if body.len() < 4 {
        return Err(malformed());
    }
    let count = u32::from_be_bytes(body[..4].try_into().unwrap()) as usize;
    let mut keys = Vec::with_capacity(count.min(1024));
    let mut at = 4;
    for _ in 0..count {
        if body.len() < at + 2 {
            return Err(malformed());
        }
        let len = u16::from_be_bytes(body[at..at + 2].try_into().unwrap()) as usize;
        at += 2;
        if body.len() < at + len {
            return Err(malformed());
        }
        let key = String::from_utf8(body[at..at + len].to_vec()).map_err(|_| malformed())?;
        keys.push(key);
        at += len;
    }
    Ok(keys)
}

fn decode_reply(opcode: u8, status: u8, body: Vec<u8>) -> RpcResult {
    match status {
        STATUS_OK => match opcode {
            OP_GET => Ok(Reply::Value(body)),
            OP_RANGE => decode_keys(&body).map(Reply::Keys),
            OP_PUT | OP_DELETE => Ok(Reply::Done),
            _ => Err(ClientError::Protocol(format!("unknown opcode {}", opcode))),
        },
        STATUS_MISSING => Err(ClientError::Protocol("no such key".to_string())),
        code => Err(ClientError::Protocol(format!("backend status {}", code))),
    }
}

type PendingMap = Arc<Mutex<HashMap<u64, Resolver>>>;

fn fail_all(pending: &PendingMap, target: &str) {
    let mut pending = pending.lock().unwrap();
    for (_, resolver) in pending.drain() {
        resolver.resolve(Err(ClientError::Network(format!("{}: session lost", target))));
    }
}

struct Session {
    stream: TcpStream,
    pending: PendingMap,
    healthy: Arc<AtomicBool>,
    next_seq: u64,
}

impl Session {
    fn connect(target: &str) -> io::Result<Session> {
        let stream = TcpStream::connect(target)?;
        let reader = stream.try_clone()?;
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let healthy = Arc::new(AtomicBool::new(true));

        let thread_pending = Arc::clone(&pending);
        let thread_healthy = Arc::clone(&healthy);
        let thread_target = target.to_string();
        thread::spawn(move || {
            reader_loop(reader, &thread_pending, &thread_target);
            thread_healthy.store(false, Ordering::SeqCst);
            fail_all(&thread_pending, &thread_target);
        });

        Ok(Session {
            stream,
            pending,
            healthy,
            next_seq: 0,
        })
    }
}

fn reader_loop(mut stream: TcpStream, pending: &PendingMap, target: &str) {
    let mut header = [0u8; HEADER_LEN];
    loop {
        if let Err(e) = stream.read_exact(&mut header) {
            debug!("{}: session read: {}", target, e);
            return;
        }
        if header[0] != MAGIC_REPLY {
            warn!("{}: bad reply magic {:#x}", target, header[0]);
            return;
        }
        let opcode = header[1];
        let status = header[2];
        let seq = u64::from_be_bytes(header[6..14].try_into().unwrap());
        let body_len = u32::from_be_bytes(header[14..18].try_into().unwrap()) as usize;
        if body_len > MAX_FRAME {
            warn!("{}: oversized reply frame ({} bytes)", target, body_len);
            return;
        }
        let mut body = vec![0u8; body_len];
        if stream.read_exact(&mut body).is_err() {
            return;
        }

        let resolver = pending.lock().unwrap().remove(&seq);
        match resolver {
            Some(resolver) => resolver.resolve(decode_reply(opcode, status, body)),
            None => trace!("{}: reply for unknown seq {}", target, seq),
        }
    }
}

pub struct TcpClient {
    target: String,
    session: Mutex<Option<Session>>,
}

impl TcpClient {
    pub fn new(target: &str) -> TcpClient {
        TcpClient {
            target: target.to_string(),
            session: Mutex::new(None),
        }
    }
}

impl ClientInterface for TcpClient {
    fn start(&self, op: Op) -> Completion {
        let mut slot = self.session.lock().unwrap();

        let dead = match slot.as_ref() {
            Some(session) => !session.healthy.load(Ordering::SeqCst),
            None => true,
        };
        if dead {
            match Session::connect(&self.target) {
                Ok(session) => *slot = Some(session),
                Err(e) => {
                    return Completion::ready(Err(ClientError::Network(format!(
                        "{}: {}",
                        self.target, e
                    ))));
                }
            }
        }

        let session = slot.as_mut().unwrap();
        let seq = session.next_seq;
        session.next_seq += 1;

        let (completion, resolver) = Completion::pending();
        session.pending.lock().unwrap().insert(seq, resolver);

        let frame = encode_request(seq, &op);
        if let Err(e) = session.stream.write_all(&frame) {
            debug!("{}: session write: {}", self.target, e);
            session.healthy.store(false, Ordering::SeqCst);
            fail_all(&session.pending, &self.target);
        }
        completion
    }

    fn id(&self) -> &str {
        &self.target
    }
}

pub struct TcpClientFactory {
    pool: Mutex<HashMap<String, Arc<TcpClient>>>,
}

impl TcpClientFactory {
    pub fn new() -> TcpClientFactory {
        TcpClientFactory {
            pool: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for TcpClientFactory {
    fn default() -> Self {
        TcpClientFactory::new()
    }
}

impl ClientFactory for TcpClientFactory {
    fn get(&self, target: &str) -> Arc<dyn ClientInterface> {
        let mut pool = self.pool.lock().unwrap();
        let client = pool
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(TcpClient::new(target)));
        Arc::clone(client) as Arc<dyn ClientInterface>
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_frame_layout() {
        let frame = encode_request(
            7,
            &Op::Put {
                key: "c-0".to_string(),
                value: b"abc".to_vec(),
            },
        );
        assert_eq!(frame[0], MAGIC_REQUEST);
        assert_eq!(frame[1], OP_PUT);
        assert_eq!(u16::from_be_bytes(frame[4..6].try_into().unwrap()), 3);
        assert_eq!(u64::from_be_bytes(frame[6..14].try_into().unwrap()), 7);
        assert_eq!(u32::from_be_bytes(frame[14..18].try_into().unwrap()), 6);
        assert_eq!(&frame[HEADER_LEN..], b"c-0abc");
    }

    #[test]
    fn test_decode_key_list() {
        let mut body = Vec::new();
        put_u32(&mut body, 2);
        put_u16(&mut body, 3);
        body.extend_from_slice(b"c-0");
        put_u16(&mut body, 3);
        body.extend_from_slice(b"c-1");
        assert_eq!(
            decode_reply(OP_RANGE, STATUS_OK, body),
            Ok(Reply::Keys(vec!["c-0".to_string(), "c-1".to_string()]))
        );
    }

    #[test]
    fn test_decode_truncated_key_list() {
        let mut body = Vec::new();
        put_u32(&mut body, 2);
        put_u16(&mut body, 3);
        body.extend_from_slice(b"c-0");
        assert!(matches!(
            decode_reply(OP_RANGE, STATUS_OK, body),
            Err(ClientError::Protocol(_))
        ));
    }

    #[test]
    fn test_unreachable_target_fails_fast() {
        // reserved port, nothing listens there
        let client = TcpClient::new("127.0.0.1:1");
        let completion = client.start(Op::Get {
            key: "k".to_string(),
        });
        assert!(matches!(completion.wait(), Err(ClientError::Network(_))));
    }
}
