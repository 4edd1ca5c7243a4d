//! Candidate server resolution
//!
//! Builds the ordered candidate list for a blob request: explicit server
//! hints first, then servers published by the blob's authors (when lookup
//! relays are configured), then the operator's fallback servers. Duplicates
//! are collapsed by origin, keeping the first occurrence.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use url::Url;

use crate::authors::AuthorIndex;
use crate::client::Candidate;

/// Resolves the ordered candidate server list for a request
#[derive(Clone)]
pub struct ServerResolver {
    author_index: Option<Arc<dyn AuthorIndex>>,
    lookup_timeout: Duration,
    fallback: Vec<Url>,
}

impl ServerResolver {
    pub fn new(
        author_index: Option<Arc<dyn AuthorIndex>>,
        lookup_timeout: Duration,
        fallback: Vec<Url>,
    ) -> Self {
        Self {
            author_index,
            lookup_timeout,
            fallback,
        }
    }

    /// Resolve hints + author pubkeys + fallback config into candidates.
    /// An empty result means the blob cannot be fetched from anywhere.
    pub async fn resolve(&self, hints: &[String], authors: &[String]) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        for hint in hints {
            match normalize_server(hint) {
                Some(candidate) => candidates.push(candidate),
                None => warn!("ignoring unusable server hint {hint:?}"),
            }
        }

        if let Some(index) = &self.author_index {
            for pubkey in authors {
                match tokio::time::timeout(self.lookup_timeout, index.servers_for(pubkey)).await {
                    Ok(Ok(servers)) => {
                        for server in servers {
                            if let Some(candidate) = normalize_server(&server) {
                                candidates.push(candidate);
                            }
                        }
                    }
                    Ok(Err(e)) => debug!("author lookup for {pubkey} failed: {e}"),
                    Err(_) => debug!("author lookup for {pubkey} timed out"),
                }
            }
        }

        candidates.extend(self.fallback.iter().cloned().map(|url| Candidate {
            url,
            allow_http_fallback: false,
        }));

        dedupe_by_origin(candidates)
    }
}

/// Promote a possibly-schemeless server string to an https URL.
/// Bare hostnames keep the right to retry over plain http later.
pub fn normalize_server(raw: &str) -> Option<Candidate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (text, promoted) = if trimmed.contains("://") {
        (trimmed.to_string(), false)
    } else {
        (format!("https://{trimmed}"), true)
    };

    let url = Url::parse(&text).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    Some(Candidate {
        url,
        allow_http_fallback: promoted,
    })
}

fn dedupe_by_origin(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(origin_key(&c.url)))
        .collect()
}

fn origin_key(url: &Url) -> String {
    format!(
        "{}://{}:{}",
        url.scheme(),
        url.host_str().unwrap_or_default(),
        url.port_or_known_default().unwrap_or(0)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(fallback: &[&str]) -> ServerResolver {
        ServerResolver::new(
            None,
            Duration::from_secs(1),
            fallback.iter().map(|s| Url::parse(s).unwrap()).collect(),
        )
    }

    #[test]
    fn bare_hosts_are_promoted_to_https_with_fallback_rights() {
        let candidate = normalize_server("cdn.example.com").unwrap();
        assert_eq!(candidate.url.as_str(), "https://cdn.example.com/");
        assert!(candidate.allow_http_fallback);

        let candidate = normalize_server("http://cdn.example.com").unwrap();
        assert_eq!(candidate.url.scheme(), "http");
        assert!(!candidate.allow_http_fallback);
    }

    #[test]
    fn junk_hints_are_dropped() {
        assert!(normalize_server("").is_none());
        assert!(normalize_server("   ").is_none());
        assert!(normalize_server("ftp://files.example.com").is_none());
    }

    #[tokio::test]
    async fn hints_come_before_fallback_servers() {
        let resolver = resolver(&["https://fallback.example.com"]);
        let candidates = resolver
            .resolve(&["hinted.example.com".to_string()], &[])
            .await;

        let hosts: Vec<&str> = candidates
            .iter()
            .map(|c| c.url.host_str().unwrap())
            .collect();
        assert_eq!(hosts, vec!["hinted.example.com", "fallback.example.com"]);
    }

    #[tokio::test]
    async fn duplicate_origins_keep_first_occurrence() {
        let resolver = resolver(&["https://cdn.example.com/base/"]);
        let candidates = resolver
            .resolve(
                &[
                    "cdn.example.com".to_string(),
                    "https://cdn.example.com".to_string(),
                    "other.example.com".to_string(),
                ],
                &[],
            )
            .await;

        let hosts: Vec<&str> = candidates
            .iter()
            .map(|c| c.url.host_str().unwrap())
            .collect();
        assert_eq!(hosts, vec!["cdn.example.com", "other.example.com"]);
        // the surviving cdn entry is the hinted one, not the fallback
        assert!(candidates[0].allow_http_fallback);
    }

    #[tokio::test]
    async fn no_sources_yields_empty_list() {
        let resolver = resolver(&[]);
        assert!(resolver.resolve(&[], &[]).await.is_empty());
    }

    struct StaticIndex(Vec<String>);

    #[async_trait::async_trait]
    impl AuthorIndex for StaticIndex {
        async fn servers_for(&self, _pubkey: &str) -> Result<Vec<String>, crate::FetchError> {
            Ok(self.0.clone())
        }
    }

    struct StallingIndex;

    #[async_trait::async_trait]
    impl AuthorIndex for StallingIndex {
        async fn servers_for(&self, _pubkey: &str) -> Result<Vec<String>, crate::FetchError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec!["https://too-late.example.com".to_string()])
        }
    }

    #[tokio::test]
    async fn author_servers_slot_between_hints_and_fallback() {
        let resolver = ServerResolver::new(
            Some(Arc::new(StaticIndex(vec![
                "published.example.com".to_string(),
            ]))),
            Duration::from_secs(1),
            vec![Url::parse("https://fallback.example.com").unwrap()],
        );

        let candidates = resolver
            .resolve(&["hinted.example.com".to_string()], &["pubkey1".to_string()])
            .await;
        let hosts: Vec<&str> = candidates
            .iter()
            .map(|c| c.url.host_str().unwrap())
            .collect();
        assert_eq!(
            hosts,
            vec![
                "hinted.example.com",
                "published.example.com",
                "fallback.example.com"
            ]
        );
    }

    #[tokio::test]
    async fn authors_are_ignored_without_a_lookup_index() {
        let resolver = resolver(&[]);
        let candidates = resolver.resolve(&[], &["pubkey1".to_string()]).await;
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn slow_author_lookups_are_cut_off() {
        let resolver = ServerResolver::new(
            Some(Arc::new(StallingIndex)),
            Duration::from_millis(20),
            vec![Url::parse("https://fallback.example.com").unwrap()],
        );

        let start = std::time::Instant::now();
        let candidates = resolver.resolve(&[], &["pubkey1".to_string()]).await;
        assert!(start.elapsed() < Duration::from_secs(5));

        let hosts: Vec<&str> = candidates
            .iter()
            .map(|c| c.url.host_str().unwrap())
            .collect();
        assert_eq!(hosts, vec!["fallback.example.com"]);
    }
}
