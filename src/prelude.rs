pub use crate::blob::{
    Status, download::Download, download::DownloadBuilder, is_manifest_key, listing::Listing,
    listing::ListingBuilder, manifest_key, removal::Removal, removal::RemovalBuilder,
    upload::Upload, upload::UploadBuilder,
};
pub use crate::client::{
    ClientError, ClientFactory, ClientInterface, Completion, Op, Reply, Resolver, RpcResult,
};
pub use crate::config::AppConfig;
pub use crate::error::Result;
pub use crate::http::*;

pub use log::{debug, error, info, trace, warn};

pub use std::collections::{BTreeMap, BTreeSet, HashMap};
pub use std::fmt::{self, Display};
pub use std::fs;
pub use std::io::{self, ErrorKind, Read, Write};
pub use std::net::{Shutdown, SocketAddr};
pub use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
pub use std::sync::{Arc, Condvar, Mutex};
pub use std::thread;
pub use std::time::Duration;

pub const READ_BUF_SIZE: usize = 8192;
pub const DEFAULT_BLOCK_SIZE: usize = 512 * 1024;
pub const REMOVAL_PARALLELISM: usize = 8;
pub const FRAGMENT_INDEX_WIDTH: usize = 10;

// One-second socket tick; liveness, not a data timeout.
pub const IO_TIMEOUT: Duration = Duration::from_secs(1);
pub const POLL_TIMEOUT: Duration = Duration::from_secs(1);

pub const TARGET_HEADER: &str = "x-oio-chunk-meta-target";
pub const META_HEADER_PREFIX: &str = "x-oio-chunk-meta-";

pub const HTTP_BAD_REQUEST: u16 = 400;
pub const HTTP_NOT_ACCEPTABLE: u16 = 406;
pub const HTTP_INTERNAL_SERVER_ERROR: u16 = 500;
