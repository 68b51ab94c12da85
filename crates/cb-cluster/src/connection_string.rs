//! Connection-string grammar (spec §4.5, §6):
//! `scheme://host[,host…][/bucket]?opt=…` where scheme is one of
//! `couchbase`, `couchbases`, `http`, `https`.

use cb_core::{CouchbaseError, ErrorKind};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Couchbase,
    Couchbases,
    Http,
    Https,
}

impl Scheme {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "couchbase" => Some(Scheme::Couchbase),
            "couchbases" => Some(Scheme::Couchbases),
            "http" => Some(Scheme::Http),
            "https" => Some(Scheme::Https),
            _ => None,
        }
    }

    pub fn implies_tls(self) -> bool {
        matches!(self, Scheme::Couchbases | Scheme::Https)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Default,
    External,
}

#[derive(Debug, Clone)]
pub struct Host {
    pub hostname: String,
    pub port: Option<u16>,
}

/// Recognised options (spec §6). Unrecognised keys are preserved verbatim
/// in `extra` rather than rejected, since management-plane tooling
/// sometimes appends vendor-specific query parameters.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub enable_tls: bool,
    pub trust_certificate: Option<String>,
    pub enable_mutation_tokens: bool,
    pub enable_unordered_execution: bool,
    pub enable_tcp_keepalive: bool,
    pub key_value_timeout: Duration,
    pub query_timeout: Duration,
    pub management_timeout: Duration,
    pub network: Network,
    pub extra: HashMap<String, String>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            enable_tls: false,
            trust_certificate: None,
            enable_mutation_tokens: true,
            enable_unordered_execution: false,
            enable_tcp_keepalive: true,
            key_value_timeout: Duration::from_millis(2500),
            query_timeout: Duration::from_secs(75),
            management_timeout: Duration::from_secs(75),
            network: Network::Default,
            extra: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionString {
    pub scheme: Scheme,
    pub hosts: Vec<Host>,
    pub bucket: Option<String>,
    pub options: ConnectionOptions,
}

impl ConnectionString {
    /// Whether DNS-SRV expansion applies: exactly one host, and it has no
    /// explicit port (spec §4.5: "a single host with no port triggers
    /// DNS-SRV expansion").
    pub fn needs_srv_expansion(&self) -> bool {
        self.hosts.len() == 1 && self.hosts[0].port.is_none()
    }

    pub fn srv_record_name(&self) -> String {
        let service = if self.scheme.implies_tls() { "_couchbases._tcp" } else { "_couchbase._tcp" };
        format!("{}.{}", service, self.hosts[0].hostname)
    }
}

pub fn parse(input: &str) -> Result<ConnectionString, CouchbaseError> {
    let (scheme_str, rest) = input
        .split_once("://")
        .ok_or_else(|| CouchbaseError::new(ErrorKind::InvalidArgument, "connection string is missing a scheme"))?;
    let scheme = Scheme::parse(scheme_str)
        .ok_or_else(|| CouchbaseError::new(ErrorKind::InvalidArgument, format!("unrecognised scheme `{scheme_str}`")))?;

    let (authority_and_path, query) = match rest.split_once('?') {
        Some((a, q)) => (a, Some(q)),
        None => (rest, None),
    };
    let (authority, path) = match authority_and_path.split_once('/') {
        Some((a, p)) => (a, Some(p)),
        None => (authority_and_path, None),
    };

    if authority.is_empty() {
        return Err(CouchbaseError::new(ErrorKind::InvalidArgument, "connection string is missing a host"));
    }
    let hosts = authority
        .split(',')
        .map(parse_host)
        .collect::<Result<Vec<_>, _>>()?;

    let bucket = path.filter(|p| !p.is_empty()).map(|p| p.to_string());

    let mut options = ConnectionOptions { enable_tls: scheme.implies_tls(), ..ConnectionOptions::default() };
    if let Some(query) = query {
        apply_options(&mut options, query)?;
    }

    Ok(ConnectionString { scheme, hosts, bucket, options })
}

fn parse_host(raw: &str) -> Result<Host, CouchbaseError> {
    match raw.rsplit_once(':') {
        Some((host, port_str)) => {
            let port = port_str
                .parse()
                .map_err(|_| CouchbaseError::new(ErrorKind::InvalidArgument, format!("invalid port in `{raw}`")))?;
            Ok(Host { hostname: host.to_string(), port: Some(port) })
        }
        None => Ok(Host { hostname: raw.to_string(), port: None }),
    }
}

fn apply_options(options: &mut ConnectionOptions, query: &str) -> Result<(), CouchbaseError> {
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| CouchbaseError::new(ErrorKind::InvalidArgument, format!("malformed query option `{pair}`")))?;
        match key {
            "enable_tls" => options.enable_tls = value == "true",
            "trust_certificate" => options.trust_certificate = Some(value.to_string()),
            "enable_mutation_tokens" => options.enable_mutation_tokens = value == "true",
            "enable_unordered_execution" => options.enable_unordered_execution = value == "true",
            "enable_tcp_keepalive" => options.enable_tcp_keepalive = value == "true",
            "key_value_timeout_ms" => options.key_value_timeout = parse_millis(value)?,
            "query_timeout_ms" => options.query_timeout = parse_millis(value)?,
            "management_timeout_ms" => options.management_timeout = parse_millis(value)?,
            "network" => {
                options.network = if value == "external" { Network::External } else { Network::Default }
            }
            other => {
                options.extra.insert(other.to_string(), value.to_string());
            }
        }
    }
    Ok(())
}

fn parse_millis(value: &str) -> Result<Duration, CouchbaseError> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| CouchbaseError::new(ErrorKind::InvalidArgument, format!("`{value}` is not a valid millisecond count")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multi_host_with_bucket_and_options() {
        let cs = parse("couchbase://node1,node2:11210/travel-sample?key_value_timeout_ms=3000").unwrap();
        assert_eq!(cs.scheme, Scheme::Couchbase);
        assert_eq!(cs.hosts.len(), 2);
        assert_eq!(cs.hosts[0].port, None);
        assert_eq!(cs.hosts[1].port, Some(11210));
        assert_eq!(cs.bucket.as_deref(), Some("travel-sample"));
        assert_eq!(cs.options.key_value_timeout, Duration::from_millis(3000));
    }

    #[test]
    fn couchbases_scheme_implies_tls() {
        let cs = parse("couchbases://node1").unwrap();
        assert!(cs.options.enable_tls);
    }

    #[test]
    fn single_unported_host_needs_srv_expansion() {
        let cs = parse("couchbase://cb.example.com").unwrap();
        assert!(cs.needs_srv_expansion());
        assert_eq!(cs.srv_record_name(), "_couchbase._tcp.cb.example.com");
    }

    #[test]
    fn explicit_port_skips_srv_expansion() {
        let cs = parse("couchbase://cb.example.com:11210").unwrap();
        assert!(!cs.needs_srv_expansion());
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(parse("ftp://host").is_err());
    }
}
