//! DNS-related modules.

pub mod failover;
pub mod overrides;
pub mod resolver;
pub mod response;

pub use failover::{Failover, Forwarded};
pub use overrides::{Override, OverrideTable};
pub use resolver::{DnsResolver, UpstreamResolver};
