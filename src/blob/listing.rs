//! Enumerates the fragments of a chunk across a set of targets. Every
//! target gets the same range query in parallel; the answers merge into one
//! stream sorted by key, with ties surfacing once per target.

use crate::prelude::*;
use crate::blob::Status;

pub struct ListingBuilder {
    factory: Arc<dyn ClientFactory>,
    name: String,
    targets: BTreeSet<String>,
}

impl ListingBuilder {
    pub fn new(factory: Arc<dyn ClientFactory>) -> ListingBuilder {
        ListingBuilder {
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

    pub fn build(&self) -> Listing {
        debug_assert!(!self.name.is_empty());
        debug_assert!(!self.targets.is_empty());
        Listing {
            clients: self
                .targets
                .iter()
                .map(|t| self.factory.get(t))
                .collect(),
            chunk_id: self.name.clone(),
            items: Vec::new(),
            cursor: 0,
        }
    }
}

pub struct Listing {
    clients: Vec<Arc<dyn ClientInterface>>,
    chunk_id: String,
    // (client index, key), sorted by key then client
    items: Vec<(usize, String)>,
    cursor: usize,
}

impl Listing {
    /// Fans the range query out to every target and merges the answers.
    pub fn prepare(&mut self) -> Status {
        // Half-open in spirit: '~' sorts after every suffix byte in use.
        let start = format!("{}-", self.chunk_id);
        let end = format!("{}-~", self.chunk_id);

        let mut pending = Vec::with_capacity(self.clients.len());
        for client in &self.clients {
            pending.push(client.start(Op::Range {
                start: start.clone(),
                end: end.clone(),
                max_items: u32::MAX,
            }));
        }

        let mut merged = Vec::new();
        let mut network = false;
        let mut protocol = false;
        for (index, completion) in pending.into_iter().enumerate() {
            match completion.wait() {
                Ok(Reply::Keys(keys)) => {
                    for key in keys {
                        merged.push((index, key));
                    }
                }
                Ok(_) => protocol = true,
                Err(ClientError::Network(why)) => {
                    debug!("listing {}: {}", self.clients[index].id(), why);
                    network = true;
                }
                Err(ClientError::Protocol(why)) => {
                    debug!("listing {}: {}", self.clients[index].id(), why);
                    protocol = true;
                }
            }
        }

        if network {
            return Status::NetworkError;
        }
        if protocol {
            return Status::ProtocolError;
        }
        if merged.is_empty() {
            return Status::NotFound;
        }

        merged.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        self.items = merged;
        self.cursor = 0;
        Status::Ok
    }

    /// Fills `id` and `key` with the next fragment; false at exhaustion.
    pub fn next(&mut self, id: &mut String, key: &mut String) -> bool {
        match self.items.get(self.cursor) {
            Some((index, k)) => {
                id.clear();
                id.push_str(self.clients[*index].id());
                key.clear();
                key.push_str(k);
                self.cursor += 1;
                true
            }
            None => false,
        }
    }
}
