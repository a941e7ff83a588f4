pub mod blob;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod prelude;
pub mod server;
