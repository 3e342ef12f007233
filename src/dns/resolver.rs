//! DNS resolver trait and the UDP upstream implementation.
//!
//! The trait lets the failover logic be exercised against mock upstreams
//! in tests.

use std::fmt;
use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::{Error, Result};

/// Receive buffer size for upstream replies. Large enough for EDNS payloads.
pub const MAX_UDP_DNS_SIZE: usize = 4096;

/// Default bound on a single upstream exchange.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(2);

/// Trait for DNS resolution.
///
/// `Display` is used to name the upstream in logs and metrics.
pub trait DnsResolver: Send + Sync + Clone + fmt::Display + 'static {
    /// Resolve a DNS query and return the response.
    fn resolve(&self, query: &Message) -> impl Future<Output = Result<Message>> + Send;
}

/// Upstream DNS resolver using UDP.
///
/// Every exchange uses a fresh ephemeral socket and is bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct UpstreamResolver {
    upstream_addr: SocketAddr,
    timeout: Duration,
}

impl UpstreamResolver {
    /// Create a new upstream resolver with the default timeout.
    pub const fn new(upstream_addr: SocketAddr) -> Self {
        Self {
            upstream_addr,
            timeout: DEFAULT_UPSTREAM_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn exchange(&self, query: &Message) -> Result<Message> {
        let local: SocketAddr = if self.upstream_addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(self.upstream_addr).await?;

        let query_bytes = query.to_bytes()?;
        socket.send(&query_bytes).await?;

        let mut response_buf = vec![0u8; MAX_UDP_DNS_SIZE];
        loop {
            let len = socket.recv(&mut response_buf).await?;
            let response = Message::from_bytes(&response_buf[..len])?;
            if is_reply_to(query, &response) {
                return Ok(response);
            }
            debug!(
                upstream = %self.upstream_addr,
                expected = query.id(),
                got = response.id(),
                "discarding reply that does not correlate with the query"
            );
        }
    }
}

/// Whether `response` answers `query`: same transaction id and the same
/// question section. Names compare case-insensitively. Error replies that
/// omit the question section are accepted on the id alone.
fn is_reply_to(query: &Message, response: &Message) -> bool {
    if response.id() != query.id() {
        return false;
    }
    if response.queries().is_empty() && response.response_code() != ResponseCode::NoError {
        return true;
    }
    response.queries() == query.queries()
}

impl fmt::Display for UpstreamResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.upstream_addr, f)
    }
}

impl DnsResolver for UpstreamResolver {
    async fn resolve(&self, query: &Message) -> Result<Message> {
        tokio::time::timeout(self.timeout, self.exchange(query))
            .await
            .map_err(|_| Error::UpstreamTimeout {
                upstream: self.upstream_addr,
                timeout: self.timeout,
            })?
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use hickory_proto::op::{MessageType, OpCode, Query};
    use hickory_proto::rr::{Name, RecordType};
    use std::str::FromStr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Mock resolver for testing.
    ///
    /// Either answers every query with a fixed response or fails every
    /// exchange, and counts how often it was asked.
    #[derive(Clone)]
    pub struct MockResolver {
        label: &'static str,
        response: Option<Message>,
        error: Option<String>,
        resolve_count: Arc<AtomicU64>,
    }

    impl MockResolver {
        /// A resolver answering NOERROR with no records.
        pub fn new(label: &'static str) -> Self {
            Self {
                label,
                response: None,
                error: None,
                resolve_count: Arc::new(AtomicU64::new(0)),
            }
        }

        /// A resolver answering every query with `response`.
        pub fn answering(label: &'static str, response: Message) -> Self {
            Self {
                response: Some(response),
                ..Self::new(label)
            }
        }

        /// A resolver whose exchanges always fail with `error`.
        pub fn failing(label: &'static str, error: &str) -> Self {
            Self {
                error: Some(error.to_string()),
                ..Self::new(label)
            }
        }

        /// Get the number of resolve calls.
        pub fn resolve_count(&self) -> u64 {
            self.resolve_count.load(Ordering::SeqCst)
        }
    }

    impl fmt::Display for MockResolver {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.label)
        }
    }

    impl DnsResolver for MockResolver {
        async fn resolve(&self, query: &Message) -> Result<Message> {
            self.resolve_count.fetch_add(1, Ordering::SeqCst);

            if let Some(error) = &self.error {
                return Err(Error::Resolver(error.clone()));
            }

            if let Some(response) = &self.response {
                let mut resp = response.clone();
                resp.set_id(query.id());
                return Ok(resp);
            }

            let mut response = Message::new();
            response
                .set_id(query.id())
                .set_message_type(MessageType::Response)
                .set_op_code(OpCode::Query)
                .set_response_code(ResponseCode::NoError);
            Ok(response)
        }
    }

    fn create_query(domain: &str, id: u16) -> Message {
        let name = Name::from_str(domain).unwrap();
        let mut query = Query::new();
        query.set_name(name);
        query.set_query_type(RecordType::A);

        let mut message = Message::new();
        message.set_id(id);
        message.add_query(query);
        message
    }

    /// Spawn a fake upstream that answers `replies` (encoded as given) to the
    /// first query it receives.
    async fn spawn_upstream(replies: Vec<Message>) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (_, peer) = socket.recv_from(&mut buf).await.unwrap();
            for reply in replies {
                socket.send_to(&reply.to_bytes().unwrap(), peer).await.unwrap();
            }
        });
        addr
    }

    fn reply(id: u16, code: ResponseCode) -> Message {
        let mut response = Message::new();
        response
            .set_id(id)
            .set_message_type(MessageType::Response)
            .set_response_code(code);
        response
    }

    #[tokio::test]
    async fn should_count_calls_on_mock() {
        let resolver = MockResolver::new("mock");
        let query = create_query("example.com.", 1234);

        let response = resolver.resolve(&query).await.unwrap();

        assert_eq!(response.id(), 1234);
        assert_eq!(resolver.resolve_count(), 1);
    }

    #[tokio::test]
    async fn should_return_error_when_mock_configured_to_fail() {
        let resolver = MockResolver::failing("mock", "connection refused");
        let query = create_query("example.com.", 1);

        assert!(resolver.resolve(&query).await.is_err());
        assert_eq!(resolver.resolve_count(), 1);
    }

    #[tokio::test]
    async fn should_exchange_with_udp_upstream() {
        let addr = spawn_upstream(vec![reply(77, ResponseCode::NXDomain)]).await;
        let resolver = UpstreamResolver::new(addr).with_timeout(Duration::from_secs(2));

        let response = resolver.resolve(&create_query("missing.example.", 77)).await.unwrap();

        assert_eq!(response.id(), 77);
        assert_eq!(response.response_code(), ResponseCode::NXDomain);
    }

    #[tokio::test]
    async fn should_skip_replies_with_wrong_id() {
        let query = create_query("example.com.", 55);
        let addr = spawn_upstream(vec![
            reply(1, ResponseCode::Refused),
            reply_for(&query, "example.com."),
        ])
        .await;
        let resolver = UpstreamResolver::new(addr);

        let response = resolver.resolve(&query).await.unwrap();

        assert_eq!(response.id(), 55);
        assert_eq!(response.response_code(), ResponseCode::NoError);
    }

    fn reply_for(query: &Message, domain: &str) -> Message {
        let mut response = reply(query.id(), ResponseCode::NoError);
        let mut question = query.queries()[0].clone();
        question.set_name(Name::from_str(domain).unwrap());
        response.add_query(question);
        response
    }

    #[tokio::test]
    async fn should_skip_replies_with_wrong_question() {
        let query = create_query("example.com.", 31);
        let addr = spawn_upstream(vec![
            reply_for(&query, "evil.example."),
            reply_for(&query, "EXAMPLE.com."),
        ])
        .await;
        let resolver = UpstreamResolver::new(addr);

        let response = resolver.resolve(&query).await.unwrap();

        assert_eq!(response.queries().len(), 1);
        assert_eq!(response.queries()[0].name(), &Name::from_str("example.com.").unwrap());
    }

    #[tokio::test]
    async fn should_time_out_when_only_foreign_questions_arrive() {
        let query = create_query("example.com.", 32);
        let addr = spawn_upstream(vec![reply_for(&query, "evil.example.")]).await;
        let resolver = UpstreamResolver::new(addr).with_timeout(Duration::from_millis(200));

        let err = resolver.resolve(&query).await.unwrap_err();

        assert!(matches!(err, Error::UpstreamTimeout { .. }));
    }

    #[test]
    fn should_correlate_by_id_and_question() {
        let query = create_query("example.com.", 40);

        assert!(is_reply_to(&query, &reply_for(&query, "example.com.")));
        assert!(is_reply_to(&query, &reply_for(&query, "Example.COM.")));
        assert!(!is_reply_to(&query, &reply_for(&query, "other.example.")));
        assert!(!is_reply_to(&query, &reply(41, ResponseCode::NoError)));
        assert!(is_reply_to(&query, &reply(40, ResponseCode::FormErr)));
        assert!(!is_reply_to(&query, &reply(40, ResponseCode::NoError)));
    }

    #[tokio::test]
    async fn should_time_out_on_silent_upstream() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let resolver = UpstreamResolver::new(silent.local_addr().unwrap())
            .with_timeout(Duration::from_millis(100));

        let err = resolver
            .resolve(&create_query("example.com.", 9))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UpstreamTimeout { .. }));
    }

    #[test]
    fn should_display_upstream_address() {
        let resolver = UpstreamResolver::new("10.0.0.1:53".parse().unwrap());
        assert_eq!(resolver.to_string(), "10.0.0.1:53");
    }
}
