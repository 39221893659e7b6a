//! Watchleft - remaining watch time across open video tabs

mod record;

pub use record::*;

pub mod aggregate;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod extractor;
pub mod format;
pub mod persist;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod tracked;
pub mod transport;
