//! Ordered failover across upstream resolvers.
//!
//! Upstreams are tried strictly in priority order, one at a time. The first
//! exchange that completes without a transport error wins, whatever its
//! response code. Nothing is remembered between queries: every query starts
//! again from the most preferred upstream.

use std::sync::Arc;

use hickory_proto::op::Message;
use tracing::{info, warn};

use crate::dns::DnsResolver;
use crate::error::{Error, Result};

/// A response obtained from one of the upstreams.
#[derive(Debug, Clone)]
pub struct Forwarded {
    /// Zero-based position of the answering upstream in the list.
    pub index: usize,
    /// Display name of the answering upstream.
    pub upstream: String,
    /// The upstream's message, unmodified.
    pub response: Message,
}

/// Ordered list of upstream resolvers.
#[derive(Clone)]
pub struct Failover<R: DnsResolver> {
    upstreams: Arc<[R]>,
}

impl<R: DnsResolver> Failover<R> {
    pub fn new(upstreams: impl IntoIterator<Item = R>) -> Self {
        Self {
            upstreams: upstreams.into_iter().collect(),
        }
    }

    /// Forward `query` to the first upstream that answers.
    ///
    /// Returns [`Error::AllUpstreamsFailed`] with the last transport error
    /// when every upstream fails.
    pub async fn exchange(&self, query: &Message) -> Result<Forwarded> {
        let mut last = None;

        for (index, upstream) in self.upstreams.iter().enumerate() {
            match upstream.resolve(query).await {
                Ok(response) => {
                    info!(
                        server = index + 1,
                        upstream = %upstream,
                        rcode = %response.response_code(),
                        "resolved by upstream"
                    );
                    return Ok(Forwarded {
                        index,
                        upstream: upstream.to_string(),
                        response,
                    });
                }
                Err(err) => {
                    warn!(
                        server = index + 1,
                        upstream = %upstream,
                        error = %err,
                        "upstream failed, trying next"
                    );
                    metrics::counter!(
                        "dnsmux_upstream_failures_total",
                        "upstream" => upstream.to_string()
                    )
                    .increment(1);
                    last = Some(Box::new(err));
                }
            }
        }

        Err(Error::AllUpstreamsFailed {
            attempts: self.upstreams.len(),
            last,
        })
    }
}
