//! DNS server orchestration.
//!
//! [`QueryHandler`] holds the resolution decision: override match first,
//! then ordered failover, then SERVFAIL. [`Listener`] owns the UDP socket
//! and runs one task per incoming query.

use std::net::SocketAddr;
use std::sync::Arc;

use hickory_proto::op::Message;
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use tokio::net::UdpSocket;
use tracing::{debug, error, info, instrument, warn};

use crate::dns::response::{self, OVERRIDE_TTL};
use crate::dns::{DnsResolver, Failover, OverrideTable};
use crate::error::{Error, Result};

/// Receive buffer for client queries.
const MAX_QUERY_SIZE: usize = 4096;

/// Which path produced the response to a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Answered locally from the override table.
    Override { suffix: String, target: String },
    /// An override matched but its target could not be encoded.
    MalformedOverride { suffix: String, target: String },
    /// Forwarded; `index` is the zero-based position of the answering upstream.
    Forwarded { index: usize },
    /// Every upstream failed.
    AllUpstreamsFailed,
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Override { .. } => "override",
            Self::MalformedOverride { .. } => "malformed_override",
            Self::Forwarded { .. } => "forwarded",
            Self::AllUpstreamsFailed => "servfail",
        }
    }
}

/// The response to a query together with the path that produced it.
#[derive(Debug, Clone)]
pub struct Answer {
    pub response: Message,
    pub outcome: Outcome,
}

/// DNS query handler combining the override table and the upstream list.
///
/// Both are read-only and shared, so clones are cheap and can be moved into
/// per-query tasks.
pub struct QueryHandler<R>
where
    R: DnsResolver,
{
    overrides: Arc<OverrideTable>,
    failover: Failover<R>,
}

impl<R> QueryHandler<R>
where
    R: DnsResolver,
{
    /// Create a new query handler.
    pub fn new(overrides: OverrideTable, failover: Failover<R>) -> Self {
        Self {
            overrides: Arc::new(overrides),
            failover,
        }
    }

    /// Handle a DNS query and return the response.
    pub async fn handle_query(&self, query: &Message) -> Message {
        self.resolve(query).await.response
    }

    /// Resolve a query, reporting which path answered it.
    #[instrument(skip(self, query), fields(domain, id = query.id()))]
    pub async fn resolve(&self, query: &Message) -> Answer {
        let answer = self.decide(query).await;
        metrics::counter!("dnsmux_queries_total", "outcome" => answer.outcome.label())
            .increment(1);
        answer
    }

    async fn decide(&self, query: &Message) -> Answer {
        if let Some(question) = query.queries().first() {
            let name = question.name();
            tracing::Span::current().record("domain", name.to_string());
            debug!("received query for {} ({})", name, question.query_type());

            if let Some(entry) = self.overrides.lookup(name) {
                return match response::override_answer(query, name, &entry.target, OVERRIDE_TTL)
                {
                    Ok(response) => {
                        info!("MAPPED DOMAIN: {} -> {}", name, entry.target);
                        Answer {
                            response,
                            outcome: Outcome::Override {
                                suffix: entry.suffix.clone(),
                                target: entry.target.clone(),
                            },
                        }
                    }
                    Err(err) => {
                        error!("failed to build override answer for {}: {}", name, err);
                        Answer {
                            response: response::server_failure(query),
                            outcome: Outcome::MalformedOverride {
                                suffix: entry.suffix.clone(),
                                target: entry.target.clone(),
                            },
                        }
                    }
                };
            }
        } else {
            warn!("query has no questions, forwarding as-is");
        }

        match self.failover.exchange(query).await {
            Ok(forwarded) => {
                debug!(
                    upstream = %forwarded.upstream,
                    index = forwarded.index,
                    "forwarded upstream response"
                );
                Answer {
                    response: response::pass_through(query, forwarded.response),
                    outcome: Outcome::Forwarded {
                        index: forwarded.index,
                    },
                }
            }
            Err(err) => {
                error!("ALL DNS SERVERS FAILED: {}", err);
                Answer {
                    response: response::server_failure(query),
                    outcome: Outcome::AllUpstreamsFailed,
                }
            }
        }
    }
}

impl<R> Clone for QueryHandler<R>
where
    R: DnsResolver,
{
    fn clone(&self) -> Self {
        Self {
            overrides: Arc::clone(&self.overrides),
            failover: self.failover.clone(),
        }
    }
}

/// UDP listener handing each query to its own task.
pub struct Listener {
    socket: Arc<UdpSocket>,
}

impl Listener {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive queries until the socket fails.
    ///
    /// Undecodable datagrams are dropped. Responses are written back to the
    /// address each query came from.
    pub async fn run<R>(self, handler: QueryHandler<R>) -> Result<()>
    where
        R: DnsResolver,
    {
        let mut buf = vec![0u8; MAX_QUERY_SIZE];

        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(err) if is_transient(&err) => {
                    debug!("ignoring transient receive error: {}", err);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let query = match Message::from_bytes(&buf[..len]) {
                Ok(m) => m,
                Err(e) => {
                    warn!("Failed to parse DNS message from {}: {}", peer, e);
                    continue;
                }
            };

            let socket = Arc::clone(&self.socket);
            let handler = handler.clone();
            tokio::spawn(async move {
                let response = handler.handle_query(&query).await;
                if let Err(e) = send_response(&socket, &response, peer).await {
                    warn!("Failed to send response to {}: {}", peer, e);
                }
            });
        }
    }
}

async fn send_response(socket: &UdpSocket, response: &Message, peer: SocketAddr) -> Result<()> {
    let bytes = response.to_bytes()?;
    socket.send_to(&bytes, peer).await?;
    Ok(())
}

/// Errors a UDP socket may report for an earlier datagram (ICMP port
/// unreachable and friends) that do not affect the listener.
fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
    )
}
