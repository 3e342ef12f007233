//! dnsmux - A small DNS forwarder with suffix overrides.
//!
//! dnsmux listens for DNS queries over UDP. Names under a configured suffix
//! (for example `.docker`) are answered locally with a fixed address; every
//! other query is forwarded to a list of upstream resolvers tried strictly in
//! priority order, and the first one that answers wins.
//!
//! # Architecture
//!
//! - [`config`]: Configuration loading and validation
//! - [`dns`]: Override table, upstream resolvers, failover and response building
//! - [`server`]: Query handling and the UDP listener
//! - [`metrics`]: Prometheus exporter setup
//! - [`error`]: Error types
//!
//! # Testing
//!
//! Upstreams sit behind the [`dns::DnsResolver`] trait, so the resolution
//! logic can be exercised without network access:
//!
//! ```rust
//! use dnsmux::dns::OverrideTable;
//!
//! let overrides = OverrideTable::new([(".docker", "172.168.1.1")]);
//! assert!(overrides.lookup(&"app.docker.".parse().unwrap()).is_some());
//! assert!(overrides.lookup(&"example.com.".parse().unwrap()).is_none());
//! ```

pub mod config;
pub mod dns;
pub mod error;
pub mod metrics;
pub mod server;

pub use config::Config;
pub use error::{Error, Result};
