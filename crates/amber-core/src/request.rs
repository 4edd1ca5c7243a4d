//! Parsed blob request

use amber_store::digest::is_hex_digest;

/// Everything a blob GET/HEAD carries: the digest, an optional extension
/// (affects only the Content-Type default), author pubkeys (`as`), and
/// server hints (`sx`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRequest {
    pub digest: String,
    pub extension: Option<String>,
    pub authors: Vec<String>,
    pub server_hints: Vec<String>,
}

impl BlobRequest {
    /// Build a request from the path segment (`<64hex>[.ext]`) and the raw
    /// query string. Returns None when the path is not a digest.
    pub fn from_parts(path: &str, query: Option<&str>) -> Option<Self> {
        let (digest, extension) = parse_blob_path(path)?;
        let mut authors = Vec::new();
        let mut server_hints = Vec::new();

        if let Some(query) = query {
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                match key.as_ref() {
                    "as" if !value.is_empty() => authors.push(value.into_owned()),
                    "sx" if !value.is_empty() => server_hints.push(value.into_owned()),
                    _ => {}
                }
            }
        }

        Some(Self {
            digest,
            extension,
            authors,
            server_hints,
        })
    }
}

/// Split `<64hex>[.ext]` into a lowercase digest and the extension after the
/// first dot. Uppercase hex is accepted and normalized; anything else is not
/// a blob path.
pub fn parse_blob_path(segment: &str) -> Option<(String, Option<String>)> {
    let (hash, extension) = match segment.split_once('.') {
        Some((hash, ext)) if !ext.is_empty() => (hash, Some(ext.to_string())),
        Some((hash, _)) => (hash, None),
        None => (segment, None),
    };

    let digest = hash.to_ascii_lowercase();
    if !is_hex_digest(&digest) {
        return None;
    }
    Some((digest, extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest() -> String {
        "a".repeat(64)
    }

    #[test]
    fn parses_plain_digest() {
        assert_eq!(parse_blob_path(&digest()), Some((digest(), None)));
    }

    #[test]
    fn parses_digest_with_extension() {
        assert_eq!(
            parse_blob_path(&format!("{}.txt", digest())),
            Some((digest(), Some("txt".to_string())))
        );
        assert_eq!(
            parse_blob_path(&format!("{}.tar.gz", digest())),
            Some((digest(), Some("tar.gz".to_string())))
        );
    }

    #[test]
    fn normalizes_uppercase_hex() {
        let upper = "A".repeat(64);
        assert_eq!(parse_blob_path(&upper), Some((digest(), None)));
    }

    #[test]
    fn rejects_non_digests() {
        assert!(parse_blob_path("").is_none());
        assert!(parse_blob_path("index.html").is_none());
        assert!(parse_blob_path(&"a".repeat(63)).is_none());
        assert!(parse_blob_path(&format!("{}x", "a".repeat(63))).is_none());
    }

    #[test]
    fn collects_repeatable_query_params() {
        let req = BlobRequest::from_parts(
            &format!("{}.png", digest()),
            Some("as=pk1&sx=one.example.com&as=pk2&sx=https%3A%2F%2Ftwo.example.com&other=x"),
        )
        .unwrap();

        assert_eq!(req.digest, digest());
        assert_eq!(req.extension.as_deref(), Some("png"));
        assert_eq!(req.authors, vec!["pk1", "pk2"]);
        assert_eq!(
            req.server_hints,
            vec!["one.example.com", "https://two.example.com"]
        );
    }

    #[test]
    fn empty_query_values_are_skipped() {
        let req = BlobRequest::from_parts(&digest(), Some("as=&sx=")).unwrap();
        assert!(req.authors.is_empty());
        assert!(req.server_hints.is_empty());
    }
}
