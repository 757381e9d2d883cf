//! Client-side gateway plumbing: proxy discovery, retry with failure
//! classification, sticky-session affinity, and the streaming path.
//!
//! The crate is built around two injected seams — [`DiscoverySource`]
//! for the proxy directory and [`ProxyChannel`] for the call path — so
//! several independent clusters can coexist in one process and tests can
//! run against an in-process cluster. [`GatewayClient`] ties the pieces
//! together for ordinary use.

pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod http;
pub mod retry;
pub mod sticky;
pub mod streaming;
pub mod transport;

pub use client::GatewayClient;
pub use config::ClientConfig;
pub use directory::{DirectorySnapshot, ProxyDirectory};
pub use error::ClientError;
pub use retry::RetryEngine;
pub use sticky::StickySessionTable;
pub use streaming::StreamingTransport;
pub use transport::{ByteStream, DiscoverySource, ProxyChannel};
