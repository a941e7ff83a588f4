//! In-process backend. One sorted store per target id, instant completions.
//! Used by the test suite in place of real sessions, with per-target fault
//! injection and a gauge of submitted-but-unawaited operations.

use crate::prelude::*;

pub struct MemoryClient {
    target: String,
    store: Mutex<BTreeMap<String, Vec<u8>>>,
    broken: AtomicBool,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl MemoryClient {
    pub fn new(target: &str) -> MemoryClient {
        MemoryClient {
            target: target.to_string(),
            store: Mutex::new(BTreeMap::new()),
            broken: AtomicBool::new(false),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Makes every subsequent submission fail with a network error.
    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    pub fn keys(&self) -> Vec<String> {
        self.store.lock().unwrap().keys().cloned().collect()
    }

    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.store.lock().unwrap().get(key).cloned()
    }

    pub fn insert(&self, key: &str, value: &[u8]) {
        self.store
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
    }

    /// Highest number of operations that were submitted but not yet awaited.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn execute(&self, op: Op) -> RpcResult {
        let mut store = self.store.lock().unwrap();
        match op {
            Op::Put { key, value } => {
                store.insert(key, value);
                Ok(Reply::Done)
            }
            Op::Get { key } => store
                .get(&key)
                .cloned()
                .map(Reply::Value)
                .ok_or_else(|| ClientError::Protocol(format!("no such key {}", key))),
            Op::Range {
                start,
                end,
                max_items,
            } => {
                let keys = store
                    .range(start..=end)
                    .take(max_items as usize)
                    .map(|(k, _)| k.clone())
                    .collect();
                Ok(Reply::Keys(keys))
            }
            Op::Delete { key } => {
                store.remove(&key);
                Ok(Reply::Done)
            }
        }
    }
}

impl ClientInterface for MemoryClient {
    fn start(&self, op: Op) -> Completion {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        let result = if self.broken.load(Ordering::SeqCst) {
            Err(ClientError::Network(format!(
                "{}: connection refused",
                self.target
            )))
        } else {
            self.execute(op)
        };

        let gauge = Arc::clone(&self.in_flight);
        Completion::ready(result).on_wait(move || {
            gauge.fetch_sub(1, Ordering::SeqCst);
        })
    }

    fn id(&self) -> &str {
        &self.target
    }
}

pub struct MemoryFactory {
    pool: Mutex<HashMap<String, Arc<MemoryClient>>>,
}

impl MemoryFactory {
    pub fn new() -> MemoryFactory {
        MemoryFactory {
            pool: Mutex::new(HashMap::new()),
        }
    }

    /// Concrete handle to the pooled client, for seeding and inspection.
    pub fn client(&self, target: &str) -> Arc<MemoryClient> {
        let mut pool = self.pool.lock().unwrap();
        let client = pool
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(MemoryClient::new(target)));
        Arc::clone(client)
    }
}

impl Default for MemoryFactory {
    fn default() -> Self {
        MemoryFactory::new()
    }
}

impl ClientFactory for MemoryFactory {
    fn get(&self, target: &str) -> Arc<dyn ClientInterface> {
        self.client(target)
    }
}
