//! Removes every fragment of a chunk. A listing enumerates the fragments,
//! then the deletes run with a bounded window: the first `P` start up
//! front, and each completed delete starts one more. At most `P` deletes
//! are ever in flight.

use crate::prelude::*;
use crate::blob::Status;

struct PendingDelete {
    key: String,
    client: Arc<dyn ClientInterface>,
    completion: Option<Completion>,
}

impl PendingDelete {
    fn start(&mut self) {
        debug_assert!(self.completion.is_none());
        trace!("del({}, {})", self.client.id(), self.key);
        self.completion = Some(self.client.start(Op::Delete {
            key: self.key.clone(),
        }));
    }
}

pub struct RemovalBuilder {
    factory: Arc<dyn ClientFactory>,
    name: String,
    targets: BTreeSet<String>,
}

impl RemovalBuilder {
    pub fn new(factory: Arc<dyn ClientFactory>) -> RemovalBuilder {
        RemovalBuilder {
            factory,
            name: String::new(),
            targets: BTreeSet::new(),
        }
    }

    pub fn name(&mut self, name: &str) -> &mut Self {
        self.name = name.to_string();
        self
    }

    pub fn target(&mut self, target: &str) -> &mut Self {
        self.targets.insert(target.to_string());
        self
    }

    pub fn build(&self) -> Removal {
        debug_assert!(!self.name.is_empty());
        debug_assert!(!self.targets.is_empty());
        Removal {
            factory: Arc::clone(&self.factory),
            chunk_id: self.name.clone(),
            targets: self.targets.iter().cloned().collect(),
            ops: Vec::new(),
        }
    }
}

pub struct Removal {
    factory: Arc<dyn ClientFactory>,
    chunk_id: String,
    targets: Vec<String>,
    ops: Vec<PendingDelete>,
}

impl Removal {
    /// Enumerates the fragments and binds one delete per `(target, key)`.
    pub fn prepare(&mut self) -> Status {
        let mut listing = {
            let mut builder = ListingBuilder::new(Arc::clone(&self.factory));
            builder.name(&self.chunk_id);
            for target in &self.targets {
                builder.target(target);
            }
            builder.build()
        };

        let rc = listing.prepare();
        if rc != Status::Ok {
            return rc;
        }

        let (mut id, mut key) = (String::new(), String::new());
        while listing.next(&mut id, &mut key) {
            self.ops.push(PendingDelete {
                key: key.clone(),
                client: self.factory.get(&id),
                completion: None,
            });
        }
        Status::Ok
    }

    /// Drains the delete list with a window of `REMOVAL_PARALLELISM`.
    pub fn commit(&mut self) -> bool {
        debug!("removal of {} fragments", self.ops.len());
        let total = self.ops.len();
        for i in 0..REMOVAL_PARALLELISM.min(total) {
            self.ops[i].start();
        }

        let mut removed = true;
        for i in 0..total {
            match self.ops[i].completion.take() {
                Some(completion) => {
                    if let Err(e) = completion.wait() {
                        debug!("removal {}: {}", self.ops[i].key, e);
                        removed = false;
                    }
                }
                None => removed = false,
            }
            // one finished, start the next one past the window
            if i + REMOVAL_PARALLELISM < total {
                self.ops[i + REMOVAL_PARALLELISM].start();
            }
        }
        removed
    }

    pub fn abort(&mut self) -> bool {
        false
    }
}
