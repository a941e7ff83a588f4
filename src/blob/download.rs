//! Reassembles a chunk from its fragments. A listing discovers what exists
//! and where; the data fragments are then fetched one by one in key order,
//! which reproduces the upload byte stream. The manifest is skipped.

use crate::prelude::*;
use crate::blob::{Status, is_manifest_key};

pub struct DownloadBuilder {
    factory: Arc<dyn ClientFactory>,
    name: String,
    targets: Vec<String>,
}

impl DownloadBuilder {
    pub fn new(factory: Arc<dyn ClientFactory>) -> DownloadBuilder {
        DownloadBuilder {
            factory,
            name: String::new(),
            targets: Vec::new(),
        }
    }

    pub fn name(&mut self, name: &str) -> &mut Self {
        self.name = name.to_string();
        self
    }

    pub fn target(&mut self, target: &str) -> &mut Self {
        self.targets.push(target.to_string());
        self
    }

    pub fn build(&self) -> Download {
        debug_assert!(!self.name.is_empty());
        Download {
            factory: Arc::clone(&self.factory),
            chunk_id: self.name.clone(),
            targets: self.targets.clone(),
            fragments: Vec::new(),
            cursor: 0,
        }
    }
}

pub struct Download {
    factory: Arc<dyn ClientFactory>,
    chunk_id: String,
    targets: Vec<String>,
    // (target, key) of every data fragment, in listing order
    fragments: Vec<(String, String)>,
    cursor: usize,
}

impl Download {
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
            if is_manifest_key(&key) {
                continue;
            }
            self.fragments.push((id.clone(), key.clone()));
        }
        Status::Ok
    }

    /// Appends the next data fragment to `out`. Returns the number of bytes
    /// appended, 0 once every fragment has been consumed.
    pub fn read(&mut self, out: &mut Vec<u8>) -> std::result::Result<usize, ClientError> {
        let Some((target, key)) = self.fragments.get(self.cursor) else {
            return Ok(0);
        };
        let client = self.factory.get(target);
        match client.start(Op::Get { key: key.clone() }).wait()? {
            Reply::Value(value) => {
                self.cursor += 1;
                out.extend_from_slice(&value);
                Ok(value.len())
            }
            _ => Err(ClientError::Protocol("unexpected reply to GET".to_string())),
        }
    }

    pub fn is_eof(&self) -> bool {
        self.cursor >= self.fragments.len()
    }
}
