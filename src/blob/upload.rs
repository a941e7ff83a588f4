//! Striped upload of one chunk. Incoming bytes accumulate into fixed-size
//! blocks; every full block becomes one PUT on the next target in
//! round-robin order. Commit closes the stream with the xattr manifest and
//! only then awaits the submitted PUTs, in submission order.

use crate::prelude::*;
use crate::blob::{Status, fragment_suffix, manifest_key};

pub struct UploadBuilder {
    factory: Arc<dyn ClientFactory>,
    name: String,
    targets: BTreeSet<String>,
    block_size: usize,
}

impl UploadBuilder {
    pub fn new(factory: Arc<dyn ClientFactory>) -> UploadBuilder {
        UploadBuilder {
            factory,
            name: String::new(),
            targets: BTreeSet::new(),
            block_size: DEFAULT_BLOCK_SIZE,
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

    pub fn block_size(&mut self, block_size: usize) -> &mut Self {
        self.block_size = block_size;
        self
    }

    pub fn build(&self) -> Upload {
        debug_assert!(!self.name.is_empty());
        debug_assert!(!self.targets.is_empty());
        debug_assert!(self.block_size > 0);
        Upload {
            clients: self
                .targets
                .iter()
                .map(|t| self.factory.get(t))
                .collect(),
            chunk_id: self.name.clone(),
            next_client: 0,
            block_size: self.block_size,
            buffer: Vec::new(),
            pending: Vec::new(),
            xattr: BTreeMap::new(),
        }
    }
}

pub struct Upload {
    clients: Vec<Arc<dyn ClientInterface>>,
    chunk_id: String,
    next_client: u32,
    block_size: usize,
    buffer: Vec<u8>,
    pending: Vec<Completion>,
    xattr: BTreeMap<String, String>,
}

impl Upload {
    /// Probes every target for an existing manifest. Discovery only, no
    /// state is written.
    pub fn prepare(&self) -> Status {
        let key = manifest_key(&self.chunk_id);
        let mut probes = Vec::with_capacity(self.clients.len());
        for client in &self.clients {
            probes.push(client.start(Op::Range {
                start: key.clone(),
                end: key.clone(),
                max_items: 1,
            }));
        }

        let mut found = false;
        let mut network = false;
        let mut protocol = false;
        for probe in probes {
            match probe.wait() {
                Ok(Reply::Keys(keys)) => found |= !keys.is_empty(),
                Ok(_) => protocol = true,
                Err(ClientError::Network(_)) => network = true,
                Err(ClientError::Protocol(_)) => protocol = true,
            }
        }

        if found {
            Status::Already
        } else if network {
            Status::NetworkError
        } else if protocol {
            Status::ProtocolError
        } else {
            Status::Ok
        }
    }

    pub fn set_xattr(&mut self, key: &str, value: &str) {
        self.xattr.insert(key.to_string(), value.to_string());
    }

    /// Buffers `data`, handing every full block off to a PUT. Never fails at
    /// the call site; backend trouble surfaces in `commit`.
    pub fn write(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let avail = self.block_size - self.buffer.len();
            let take = avail.min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.buffer.len() >= self.block_size {
                self.trigger_upload();
            }
        }
        thread::yield_now();
    }

    /// Hands off a trailing partial block, if any.
    pub fn flush(&mut self) {
        if !self.buffer.is_empty() {
            self.trigger_upload();
        }
    }

    /// Flushes, appends the manifest block, then awaits every PUT in
    /// submission order. True only if all of them landed.
    pub fn commit(&mut self) -> bool {
        self.flush();

        // the manifest is always exactly one block, whatever its size;
        // running it through write() would split it into data fragments
        let manifest = serde_json::to_vec(&self.xattr).unwrap_or_else(|_| b"{}".to_vec());
        self.buffer = manifest;
        self.trigger_suffix("#");

        let mut committed = true;
        for completion in self.pending.drain(..) {
            if let Err(e) = completion.wait() {
                debug!("upload {}: {}", self.chunk_id, e);
                committed = false;
            }
        }
        committed
    }

    /// Submitted PUTs are not rolled back.
    pub fn abort(&mut self) -> bool {
        true
    }

    fn trigger_upload(&mut self) {
        let suffix = fragment_suffix(self.next_client, self.buffer.len());
        self.trigger_suffix(&suffix);
    }

    fn trigger_suffix(&mut self, suffix: &str) {
        debug_assert!(!self.clients.is_empty());
        let client = &self.clients[self.next_client as usize % self.clients.len()];
        let key = format!("{}-{}", self.chunk_id, suffix);
        let value = std::mem::take(&mut self.buffer);
        self.next_client += 1;
        trace!("put({}, {}, {} bytes)", client.id(), key, value.len());
        self.pending.push(client.start(Op::Put { key, value }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::MemoryFactory;

    fn upload(factory: &Arc<MemoryFactory>, targets: &[&str], block_size: usize) -> Upload {
        let mut builder = UploadBuilder::new(factory.clone());
        builder.name("c").block_size(block_size);
        for t in targets {
            builder.target(t);
        }
        builder.build()
    }

    #[test]
    fn test_empty_blob_yields_manifest_only() {
        let factory = Arc::new(MemoryFactory::new());
        // five identical targets collapse into one client
        let mut up = upload(&factory, &["t0", "t0", "t0", "t0", "t0"], 1024 * 1024);
        assert!(up.commit());
        assert_eq!(factory.client("t0").keys(), vec!["c-#".to_string()]);
        assert_eq!(factory.client("t0").value("c-#"), Some(b"{}".to_vec()));
    }

    #[test]
    fn test_small_writes_flush_as_one_block() {
        let factory = Arc::new(MemoryFactory::new());
        let targets = ["t0", "t1", "t2", "t3", "t4"];
        let mut up = upload(&factory, &targets, 1024 * 1024);
        up.write(&[b'0'; 8192]);
        up.write(&[b'0'; 8192]);
        assert!(up.commit());

        assert_eq!(
            factory.client("t0").keys(),
            vec!["c-0000000000-16384".to_string()]
        );
        assert_eq!(factory.client("t1").keys(), vec!["c-#".to_string()]);
        for t in &targets[2..] {
            assert!(factory.client(t).keys().is_empty());
        }
    }

    #[test]
    fn test_striping_rotates_over_targets() {
        let factory = Arc::new(MemoryFactory::new());
        let mut up = upload(&factory, &["t0", "t1", "t2"], 4);
        up.write(b"AAAABBBBCCCCDDDD");
        assert!(up.commit());

        assert_eq!(
            factory.client("t0").keys(),
            vec![
                "c-0000000000-4".to_string(),
                "c-0000000003-4".to_string()
            ]
        );
        assert_eq!(
            factory.client("t1").keys(),
            vec!["c-#".to_string(), "c-0000000001-4".to_string()]
        );
        assert_eq!(
            factory.client("t2").keys(),
            vec!["c-0000000002-4".to_string()]
        );
        assert_eq!(factory.client("t0").value("c-0000000000-4"), Some(b"AAAA".to_vec()));
        assert_eq!(factory.client("t0").value("c-0000000003-4"), Some(b"DDDD".to_vec()));
    }

    #[test]
    fn test_manifest_carries_xattrs_in_key_order() {
        let factory = Arc::new(MemoryFactory::new());
        let mut up = upload(&factory, &["t0"], 1024);
        up.set_xattr("policy", "threecopies");
        up.set_xattr("hash", "00");
        up.set_xattr("policy", "single");
        assert!(up.commit());
        assert_eq!(
            factory.client("t0").value("c-#"),
            Some(br#"{"hash":"00","policy":"single"}"#.to_vec())
        );
    }

    #[test]
    fn test_manifest_larger_than_a_block_stays_one_fragment() {
        let factory = Arc::new(MemoryFactory::new());
        let mut up = upload(&factory, &["t0"], 4);
        up.set_xattr("policy", "a-value-much-longer-than-the-block-size");
        up.write(b"AAAA");
        assert!(up.commit());

        assert_eq!(
            factory.client("t0").keys(),
            vec!["c-#".to_string(), "c-0000000000-4".to_string()]
        );
        assert_eq!(
            factory.client("t0").value("c-#"),
            Some(br#"{"policy":"a-value-much-longer-than-the-block-size"}"#.to_vec())
        );
    }

    #[test]
    fn test_prepare_reports_existing_manifest() {
        let factory = Arc::new(MemoryFactory::new());
        factory.client("t1").insert("c-#", b"{}");
        let up = upload(&factory, &["t0", "t1", "t2"], 1024);
        assert_eq!(up.prepare(), Status::Already);

        let fresh = upload(&factory, &["t0", "t2"], 1024);
        assert_eq!(fresh.prepare(), Status::Ok);
    }

    #[test]
    fn test_prepare_reports_unreachable_target() {
        let factory = Arc::new(MemoryFactory::new());
        factory.client("t1").set_broken(true);
        let up = upload(&factory, &["t0", "t1"], 1024);
        assert_eq!(up.prepare(), Status::NetworkError);
    }

    #[test]
    fn test_commit_fails_when_any_put_fails() {
        let factory = Arc::new(MemoryFactory::new());
        factory.client("t1").set_broken(true);
        let mut up = upload(&factory, &["t0", "t1"], 4);
        up.write(b"AAAABBBB");
        assert!(!up.commit());
    }

    #[test]
    fn test_buffer_is_empty_after_commit() {
        let factory = Arc::new(MemoryFactory::new());
        let mut up = upload(&factory, &["t0"], 4);
        up.write(b"AAAABB");
        assert!(up.commit());
        assert!(up.buffer.is_empty());
        assert!(up.pending.is_empty());
    }
}
