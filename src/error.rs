//! Error types for the dnsmux forwarder.

use std::io;
use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;

use thiserror::Error;

/// Main error type for dnsmux operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("DNS protocol error: {0}")]
    Protocol(#[from] hickory_proto::ProtoError),

    #[error("resolver error: {0}")]
    Resolver(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("upstream {upstream} did not answer within {timeout:?}")]
    UpstreamTimeout {
        upstream: SocketAddr,
        timeout: Duration,
    },

    #[error("all {attempts} upstream servers failed, last error: {}", display_last(.last))]
    AllUpstreamsFailed {
        attempts: usize,
        last: Option<Box<Error>>,
    },

    #[error("cannot build address record from override target {target:?}: {source}")]
    MalformedOverride {
        target: String,
        #[source]
        source: AddrParseError,
    },

    #[error("metrics error: {0}")]
    Metrics(String),
}

fn display_last(last: &Option<Box<Error>>) -> String {
    last.as_ref()
        .map_or_else(|| "no upstream configured".to_string(), ToString::to_string)
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("invalid listen address {addr:?}: {source}")]
    InvalidListen {
        addr: String,
        #[source]
        source: AddrParseError,
    },

    #[error("invalid upstream server address {addr:?}: {source}")]
    InvalidUpstream {
        addr: String,
        #[source]
        source: AddrParseError,
    },

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
}

/// Validation errors for configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("at least one upstream server is required")]
    NoUpstreams,

    #[error("upstream_timeout_ms must be greater than 0")]
    ZeroUpstreamTimeout,

    #[error("domain mapping has an empty domain suffix")]
    EmptyDomainSuffix,

    #[error("domain mapping {domain:?} has an empty target address")]
    EmptyOverrideTarget { domain: String },
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;
