use crate::prelude::*;

pub mod memory;
pub mod tcp;

/// One backend submission. The backend keyspace is flat; RANGE is inclusive
/// on both bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Put { key: String, value: Vec<u8> },
    Get { key: String },
    Range { start: String, end: String, max_items: u32 },
    Delete { key: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Done,
    Value(Vec<u8>),
    Keys(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    Network(String),
    Protocol(String),
}

impl Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Network(why) => write!(f, "network error: {}", why),
            ClientError::Protocol(why) => write!(f, "protocol error: {}", why),
        }
    }
}

impl std::error::Error for ClientError {}

pub type RpcResult = std::result::Result<Reply, ClientError>;

struct Slot {
    state: Mutex<Option<RpcResult>>,
    cond: Condvar,
}

/// One-shot completion handle for a submitted operation. `wait` blocks the
/// calling thread until the session resolves the slot; resolution order is
/// whatever order the backend answers in.
pub struct Completion {
    slot: Arc<Slot>,
    on_wait: Option<Box<dyn FnOnce() + Send>>,
}

impl Completion {
    pub fn pending() -> (Completion, Resolver) {
        let slot = Arc::new(Slot {
            state: Mutex::new(None),
            cond: Condvar::new(),
        });
        let completion = Completion {
            slot: Arc::clone(&slot),
            on_wait: None,
        };
        (completion, Resolver { slot })
    }

    pub fn ready(result: RpcResult) -> Completion {
        let (completion, resolver) = Completion::pending();
        resolver.resolve(result);
        completion
    }

    pub fn on_wait<F: FnOnce() + Send + 'static>(mut self, hook: F) -> Completion {
        self.on_wait = Some(Box::new(hook));
        self
    }

    pub fn wait(mut self) -> RpcResult {
        let mut state = self.slot.state.lock().unwrap();
        while state.is_none() {
            state = self.slot.cond.wait(state).unwrap();
        }
        let result = state.take().unwrap();
        drop(state);
        if let Some(hook) = self.on_wait.take() {
            hook();
        }
        result
    }
}

/// Write half of a pending completion; held by whoever decodes the reply.
#[derive(Clone)]
pub struct Resolver {
    slot: Arc<Slot>,
}

impl Resolver {
    pub fn resolve(&self, result: RpcResult) {
        let mut state = self.slot.state.lock().unwrap();
        // first resolution wins; a session teardown racing the reader is fine
        if state.is_none() {
            *state = Some(result);
            self.slot.cond.notify_all();
        }
    }
}

/// A session to one backend target. Submissions return immediately and
/// multiplex over the session; any number may be in flight at once.
pub trait ClientInterface: Send + Sync {
    fn start(&self, op: Op) -> Completion;

    /// Stable identifier of the target, also its pool key.
    fn id(&self) -> &str;
}

/// Process-wide pool of client sessions, keyed by target address.
/// Creation is lazy, `get` is idempotent, there is no eviction.
pub trait ClientFactory: Send + Sync {
    fn get(&self, target: &str) -> Arc<dyn ClientInterface>;
}
