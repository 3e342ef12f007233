//! Domain-suffix overrides.
//!
//! Maps domain suffixes such as `.docker` to a fixed address. Suffixes are
//! normalized once at construction so lookups only lowercase the queried
//! name.

use std::collections::HashMap;
use std::net::IpAddr;

use hickory_proto::rr::Name;

/// A single configured override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    /// Normalized suffix: lowercase, leading dot, no trailing dot.
    pub suffix: String,
    /// Target address as configured. Parsed only when an answer is built.
    pub target: String,
}

/// Read-only table of suffix overrides.
///
/// Entries are ordered by descending suffix length, so when several
/// suffixes match a name the longest one wins.
#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    entries: Vec<Override>,
}

/// Normalize a configured domain suffix to the `.example.com` form.
///
/// Non-ASCII suffixes are converted to their punycode form so they compare
/// against names as they appear on the wire.
pub fn normalize_suffix(domain: &str) -> String {
    let domain = domain.trim();
    let domain = if domain.is_ascii() {
        domain.to_lowercase()
    } else {
        Name::from_utf8(domain.trim_matches('.'))
            .map(|name| name.to_ascii().to_lowercase())
            .unwrap_or_else(|_| domain.to_lowercase())
    };
    let domain = domain.trim_end_matches('.');
    if domain.starts_with('.') {
        domain.to_string()
    } else {
        format!(".{domain}")
    }
}

impl OverrideTable {
    /// Create a table from `(domain, target)` pairs.
    ///
    /// When the same suffix appears more than once, the last pair wins.
    pub fn new<I, D, T>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (D, T)>,
        D: AsRef<str>,
        T: AsRef<str>,
    {
        let mut by_suffix = HashMap::new();
        for (domain, target) in pairs {
            by_suffix.insert(
                normalize_suffix(domain.as_ref()),
                target.as_ref().trim().to_string(),
            );
        }

        let mut entries: Vec<Override> = by_suffix
            .into_iter()
            .map(|(suffix, target)| Override { suffix, target })
            .collect();
        entries.sort_by(|a, b| {
            b.suffix
                .len()
                .cmp(&a.suffix.len())
                .then_with(|| a.suffix.cmp(&b.suffix))
        });

        Self { entries }
    }

    /// Find the override covering `name`, if any.
    #[inline]
    pub fn lookup(&self, name: &Name) -> Option<&Override> {
        if self.entries.is_empty() {
            return None;
        }

        let name_str = name.to_ascii().to_lowercase();
        let name_str = name_str.trim_end_matches('.');

        self.entries
            .iter()
            .find(|entry| name_str.ends_with(entry.suffix.as_str()))
    }

    /// Entries whose target is not an IP literal.
    pub fn malformed(&self) -> impl Iterator<Item = &Override> {
        self.entries
            .iter()
            .filter(|entry| entry.target.parse::<IpAddr>().is_err())
    }

    /// Iterate over the entries in match order.
    pub fn iter(&self) -> impl Iterator<Item = &Override> {
        self.entries.iter()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn name(s: &str) -> Name {
        Name::from_str(s).unwrap()
    }

    fn target<'a>(table: &'a OverrideTable, query: &str) -> Option<&'a str> {
        table.lookup(&name(query)).map(|o| o.target.as_str())
    }

    #[test]
    fn should_normalize_suffixes() {
        assert_eq!(normalize_suffix("docker"), ".docker");
        assert_eq!(normalize_suffix(".docker"), ".docker");
        assert_eq!(normalize_suffix("Docker.Local."), ".docker.local");
        assert_eq!(normalize_suffix(" .test "), ".test");
    }

    #[test]
    fn should_match_subdomains_of_suffix() {
        let table = OverrideTable::new([(".docker", "172.168.1.1")]);

        assert_eq!(target(&table, "app.docker."), Some("172.168.1.1"));
        assert_eq!(target(&table, "a.b.app.docker"), Some("172.168.1.1"));
        assert_eq!(target(&table, "example.com."), None);
    }

    #[test]
    fn should_not_match_bare_suffix_or_partial_label() {
        let table = OverrideTable::new([(".docker", "172.168.1.1")]);

        assert_eq!(target(&table, "docker."), None);
        assert_eq!(target(&table, "notdocker."), None);
    }

    #[test]
    fn should_match_case_insensitively() {
        let table = OverrideTable::new([(".DOCKER", "172.168.1.1")]);

        assert_eq!(target(&table, "App.Docker."), Some("172.168.1.1"));
        assert_eq!(target(&table, "APP.DOCKER"), Some("172.168.1.1"));
    }

    #[test]
    fn should_ignore_trailing_dots_on_both_sides() {
        let table = OverrideTable::new([("test.", "192.168.1.1")]);

        assert_eq!(target(&table, "web.test."), Some("192.168.1.1"));
        assert_eq!(target(&table, "web.test"), Some("192.168.1.1"));
    }

    #[test]
    fn should_match_punycode_suffix_literally() {
        let table = OverrideTable::new([(".xn--bcher-kva.example", "10.1.1.1")]);

        assert_eq!(target(&table, "www.xn--bcher-kva.example."), Some("10.1.1.1"));
        assert_eq!(target(&table, "www.XN--BCHER-KVA.example."), Some("10.1.1.1"));
        assert_eq!(target(&table, "www.buecher.example."), None);
    }

    #[test]
    fn should_convert_unicode_suffix_to_punycode() {
        assert_eq!(normalize_suffix("bücher.example"), ".xn--bcher-kva.example");

        let table = OverrideTable::new([("bücher.example", "10.1.1.1")]);
        assert_eq!(target(&table, "www.xn--bcher-kva.example."), Some("10.1.1.1"));
    }

    #[test]
    fn should_prefer_longest_matching_suffix() {
        let table = OverrideTable::new([
            (".local", "10.0.0.1"),
            (".svc.local", "10.0.0.2"),
            (".db.svc.local", "10.0.0.3"),
        ]);

        assert_eq!(target(&table, "pg.db.svc.local."), Some("10.0.0.3"));
        assert_eq!(target(&table, "api.svc.local."), Some("10.0.0.2"));
        assert_eq!(target(&table, "host.local."), Some("10.0.0.1"));
    }

    #[test]
    fn should_keep_last_target_for_duplicate_suffix() {
        let table = OverrideTable::new([("docker", "10.0.0.1"), (".docker.", "10.0.0.2")]);

        assert_eq!(table.len(), 1);
        assert_eq!(target(&table, "app.docker."), Some("10.0.0.2"));
    }

    #[test]
    fn should_order_entries_deterministically() {
        let table = OverrideTable::new([(".b", "1.1.1.1"), (".aa", "2.2.2.2"), (".a", "3.3.3.3")]);

        let suffixes: Vec<_> = table.iter().map(|o| o.suffix.as_str()).collect();
        assert_eq!(suffixes, [".aa", ".a", ".b"]);
    }

    #[test]
    fn should_report_malformed_targets() {
        let table = OverrideTable::new([(".ok", "10.0.0.1"), (".bad", "not-an-ip")]);

        let malformed: Vec<_> = table.malformed().map(|o| o.suffix.as_str()).collect();
        assert_eq!(malformed, [".bad"]);
    }

    #[test]
    fn should_not_match_when_empty() {
        let table = OverrideTable::default();

        assert!(table.is_empty());
        assert_eq!(table.len(), 0);
        assert!(table.lookup(&name("app.docker.")).is_none());
    }
}
