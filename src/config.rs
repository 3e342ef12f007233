//! Configuration loading and validation.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::dns::OverrideTable;
use crate::dns::overrides::normalize_suffix;
use crate::error::{ConfigError, Result, ValidationError};

/// Port used for upstream servers given without one.
pub const DNS_PORT: u16 = 53;

/// Main configuration for the dnsmux forwarder.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address to listen on. The `:53` shorthand binds `0.0.0.0:53`, IPv4
    /// only; use `[::]:53` for an IPv6 socket.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Upstream DNS servers in priority order (e.g., "8.8.8.8" or "10.0.0.1:5353").
    #[serde(default = "default_servers")]
    pub servers: Vec<String>,

    /// Domain suffix overrides, e.g. `".docker" = "172.168.1.1"`.
    ///
    /// Keyed by normalized suffix, so spellings of the same suffix share one
    /// entry and a later insert replaces an earlier one.
    #[serde(default, deserialize_with = "deserialize_domains")]
    pub domains: BTreeMap<String, String>,

    /// Timeout for a single upstream exchange, in milliseconds.
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

/// Values given on the command line, applied over the file configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub listen: Option<String>,
    /// Comma-separated server list.
    pub servers: Option<String>,
    /// Comma-separated `domain=ip` pairs.
    pub domains: Option<String>,
    pub upstream_timeout_ms: Option<u64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            servers: default_servers(),
            domains: BTreeMap::new(),
            upstream_timeout_ms: default_upstream_timeout_ms(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_listen() -> String {
    ":53".to_string()
}

fn default_servers() -> Vec<String> {
    vec!["8.8.8.8".to_string(), "1.1.1.1".to_string()]
}

const fn default_upstream_timeout_ms() -> u64 {
    2000
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9090))
}

fn deserialize_domains<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
    let mut domains = BTreeMap::new();
    insert_domains(&mut domains, raw);
    Ok(domains)
}

/// Insert `(domain, target)` pairs keyed by normalized suffix, in order.
pub fn insert_domains<I>(domains: &mut BTreeMap<String, String>, pairs: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (domain, target) in pairs {
        domains.insert(normalize_suffix(&domain), target.trim().to_string());
    }
}

/// Split a comma-separated server list, trimming entries and dropping empty ones.
pub fn parse_server_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Parse comma-separated `domain=ip` pairs.
///
/// Pairs that do not split into exactly two parts are skipped with a
/// warning. Domains get a leading dot when missing.
pub fn parse_domain_mappings(list: &str) -> Vec<(String, String)> {
    let mut mappings = Vec::new();
    for mapping in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let parts: Vec<&str> = mapping.split('=').collect();
        let [domain, ip] = parts.as_slice() else {
            warn!("ignoring malformed domain mapping {:?}", mapping);
            continue;
        };
        let domain = domain.trim();
        let domain = if domain.starts_with('.') {
            domain.to_string()
        } else {
            format!(".{domain}")
        };
        mappings.push((domain, ip.trim().to_string()));
    }
    mappings
}

/// Parse a listen address, accepting the `:port` shorthand.
///
/// The shorthand is IPv4 only. Dual-stack listening needs an explicit
/// `[::]:port`.
pub fn parse_listen_addr(addr: &str) -> std::result::Result<SocketAddr, ConfigError> {
    let candidate = if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    };
    candidate
        .parse()
        .map_err(|source| ConfigError::InvalidListen {
            addr: addr.to_string(),
            source,
        })
}

/// Parse an upstream address. A bare IP gets port 53.
pub fn parse_upstream_addr(addr: &str) -> std::result::Result<SocketAddr, ConfigError> {
    if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
        return Ok(socket_addr);
    }
    addr.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DNS_PORT))
        .map_err(|source| ConfigError::InvalidUpstream {
            addr: addr.to_string(),
            source,
        })
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line values over this configuration, then validate.
    ///
    /// Listen address, servers and timeout replace the file values. Domain
    /// mappings are merged, a flag mapping replacing any file mapping for the
    /// same suffix.
    pub fn apply_overrides(mut self, overrides: &ConfigOverrides) -> Result<Self> {
        if let Some(listen) = &overrides.listen {
            self.listen.clone_from(listen);
        }
        if let Some(servers) = &overrides.servers {
            self.servers = parse_server_list(servers);
        }
        if let Some(domains) = &overrides.domains {
            insert_domains(&mut self.domains, parse_domain_mappings(domains));
        }
        if let Some(timeout_ms) = overrides.upstream_timeout_ms {
            self.upstream_timeout_ms = timeout_ms;
        }

        self.validate()?;
        Ok(self)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.servers.iter().all(|s| s.trim().is_empty()) {
            return Err(ConfigError::from(ValidationError::NoUpstreams).into());
        }

        if self.upstream_timeout_ms == 0 {
            return Err(ConfigError::from(ValidationError::ZeroUpstreamTimeout).into());
        }

        for (domain, target) in &self.domains {
            if domain.trim().trim_matches('.').is_empty() {
                return Err(ConfigError::from(ValidationError::EmptyDomainSuffix).into());
            }
            if target.trim().is_empty() {
                return Err(ConfigError::from(ValidationError::EmptyOverrideTarget {
                    domain: domain.clone(),
                })
                .into());
            }
        }

        self.listen_addr()?;
        self.upstream_addrs()?;

        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        Ok(parse_listen_addr(&self.listen)?)
    }

    /// Upstream addresses in priority order.
    pub fn upstream_addrs(&self) -> Result<Vec<SocketAddr>> {
        self.servers
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| parse_upstream_addr(s).map_err(Into::into))
            .collect()
    }

    pub const fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    pub fn override_table(&self) -> OverrideTable {
        OverrideTable::new(&self.domains)
    }
}
