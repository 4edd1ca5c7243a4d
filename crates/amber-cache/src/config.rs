//! Environment-driven configuration

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use ipnet::IpNet;
use tracing::warn;
use url::Url;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_CACHE_DIR: &str = "cache";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_REDIRECTS: usize = 5;
const DEFAULT_LOOKUP_TIMEOUT_MS: u64 = 20_000;

/// Runtime configuration, read from the environment
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub cache_dir: PathBuf,
    /// No limit when unset
    pub max_cache_size: Option<u64>,
    pub request_timeout: Duration,
    pub max_redirects: usize,
    pub author_lookup_timeout: Duration,
    pub lookup_relays: Vec<Url>,
    pub fallback_servers: Vec<Url>,
    pub allowed_upload_nets: Vec<IpNet>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = match env_var("PORT") {
            Some(value) => value.parse().context("PORT must be a port number")?,
            None => DEFAULT_PORT,
        };

        let cache_dir = env_var("CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));

        let max_cache_size = match env_var("MAX_CACHE_SIZE") {
            Some(value) => Some(
                parse_size(&value)
                    .with_context(|| format!("MAX_CACHE_SIZE {value:?} is not a size"))?,
            ),
            None => None,
        };

        let request_timeout = duration_ms(
            env_var("REQUEST_TIMEOUT"),
            DEFAULT_REQUEST_TIMEOUT_MS,
            "REQUEST_TIMEOUT",
        )?;

        let max_redirects = match env_var("MAX_REDIRECTS") {
            Some(value) => value.parse().context("MAX_REDIRECTS must be a number")?,
            None => DEFAULT_MAX_REDIRECTS,
        };

        let author_lookup_timeout = duration_ms(
            env_var("USER_SERVER_LIST_TIMEOUT"),
            DEFAULT_LOOKUP_TIMEOUT_MS,
            "USER_SERVER_LIST_TIMEOUT",
        )?;

        let lookup_relays = env_var("LOOKUP_RELAYS")
            .map(|value| parse_servers(&value))
            .unwrap_or_default();

        let fallback_servers = env_var("FALLBACK_SERVERS")
            .map(|value| parse_servers(&value))
            .unwrap_or_default();

        let allowed_upload_nets = match env_var("ALLOWED_UPLOAD_IPS") {
            Some(value) => {
                let nets = parse_nets(&value);
                if nets.is_empty() {
                    warn!("ALLOWED_UPLOAD_IPS contained no usable entries, keeping loopback-only");
                    default_upload_nets()
                } else {
                    nets
                }
            }
            None => default_upload_nets(),
        };

        Ok(Self {
            port,
            cache_dir,
            max_cache_size,
            request_timeout,
            max_redirects,
            author_lookup_timeout,
            lookup_relays,
            fallback_servers,
            allowed_upload_nets,
        })
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn duration_ms(value: Option<String>, default_ms: u64, name: &str) -> Result<Duration> {
    let ms = match value {
        Some(value) => value
            .parse()
            .with_context(|| format!("{name} must be milliseconds"))?,
        None => default_ms,
    };
    Ok(Duration::from_millis(ms))
}

/// Parse a byte size with an optional B/KB/MB/GB/TB suffix (powers of 1024)
fn parse_size(input: &str) -> Option<u64> {
    let text = input.trim().to_ascii_uppercase();
    let (digits, multiplier) = if let Some(d) = text.strip_suffix("TB") {
        (d, 1u64 << 40)
    } else if let Some(d) = text.strip_suffix("GB") {
        (d, 1 << 30)
    } else if let Some(d) = text.strip_suffix("MB") {
        (d, 1 << 20)
    } else if let Some(d) = text.strip_suffix("KB") {
        (d, 1 << 10)
    } else if let Some(d) = text.strip_suffix("B") {
        (d, 1)
    } else {
        (text.as_str(), 1)
    };

    let value: u64 = digits.trim().parse().ok()?;
    value.checked_mul(multiplier)
}

/// Parse a comma-separated list of server URLs, skipping unparseable entries
fn parse_servers(raw: &str) -> Vec<Url> {
    raw.split(',')
        .filter_map(|item| {
            let item = item.trim();
            if item.is_empty() {
                return None;
            }
            match Url::parse(item) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url),
                _ => {
                    warn!("skipping unparseable server URL {item:?}");
                    None
                }
            }
        })
        .collect()
}

/// Parse a comma-separated list of IPs and CIDR ranges
fn parse_nets(raw: &str) -> Vec<IpNet> {
    raw.split(',')
        .filter_map(|item| {
            let item = item.trim();
            if item.is_empty() {
                return None;
            }
            if let Ok(net) = item.parse::<IpNet>() {
                return Some(net);
            }
            if let Ok(ip) = item.parse::<IpAddr>() {
                return Some(IpNet::from(ip));
            }
            warn!("skipping invalid upload allowlist entry {item:?}");
            None
        })
        .collect()
}

fn default_upload_nets() -> Vec<IpNet> {
    vec!["127.0.0.0/8".parse().unwrap(), "::1/128".parse().unwrap()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_parse_with_and_without_suffixes() {
        assert_eq!(parse_size("1024"), Some(1024));
        assert_eq!(parse_size("10B"), Some(10));
        assert_eq!(parse_size("1KB"), Some(1024));
        assert_eq!(parse_size("1kb"), Some(1024));
        assert_eq!(parse_size("500MB"), Some(500 * 1024 * 1024));
        assert_eq!(parse_size("2GB"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_size("1TB"), Some(1 << 40));
        assert_eq!(parse_size(" 5 MB "), Some(5 * 1024 * 1024));
    }

    #[test]
    fn bad_sizes_are_rejected() {
        assert_eq!(parse_size(""), None);
        assert_eq!(parse_size("abc"), None);
        assert_eq!(parse_size("10XB"), None);
        assert_eq!(parse_size("-5MB"), None);
        assert_eq!(parse_size("99999999999TB"), None);
    }

    #[test]
    fn server_lists_keep_order_and_skip_junk() {
        let servers = parse_servers(
            "https://one.example.com, not a url, http://two.example.com,, ftp://three.example.com",
        );
        let hosts: Vec<&str> = servers.iter().map(|u| u.host_str().unwrap()).collect();
        assert_eq!(hosts, vec!["one.example.com", "two.example.com"]);
    }

    #[test]
    fn allowlists_accept_bare_ips_and_cidr_ranges() {
        let nets = parse_nets("127.0.0.1, 10.0.0.0/8, ::1, bogus");
        assert_eq!(nets.len(), 3);
        assert!(nets[0].contains(&"127.0.0.1".parse::<IpAddr>().unwrap()));
        assert!(!nets[0].contains(&"127.0.0.2".parse::<IpAddr>().unwrap()));
        assert!(nets[1].contains(&"10.1.2.3".parse::<IpAddr>().unwrap()));
    }

    #[test]
    fn default_allowlist_is_loopback_only() {
        let nets = default_upload_nets();
        assert!(nets.iter().any(|n| n.contains(&"127.0.0.1".parse::<IpAddr>().unwrap())));
        assert!(nets.iter().any(|n| n.contains(&"::1".parse::<IpAddr>().unwrap())));
        assert!(!nets.iter().any(|n| n.contains(&"8.8.8.8".parse::<IpAddr>().unwrap())));
    }
}
