//! Deterministic basenames for step outputs.
//!
//! A basename is either a digest of the parameters that define a step (URL,
//! credentials, command text, merge sources) or the upstream basename plus a
//! fixed suffix. Rebuilding the same pipeline therefore resolves to the same
//! file, which is what lets later runs recognize cached artifacts.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;
use sha2::{Digest, Sha256};

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid regex"));

/// Short hex digest over `parts`. Parts are length-prefixed so that
/// `["ab", "c"]` and `["a", "bc"]` never collide.
pub fn parameter_hash<S: AsRef<str>>(parts: &[S]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        let bytes = part.as_ref().as_bytes();
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

pub fn suffixed(upstream: &str, suffix: &str) -> String {
    format!("{upstream}{suffix}")
}

/// Last path segment of `url`, reduced to filesystem-safe characters.
pub fn url_file_name(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();
    let cleaned = UNSAFE_CHARS.replace_all(segment, "_");
    let cleaned = cleaned.trim_matches(|ch| ch == '.' || ch == '_');
    if cleaned.is_empty() {
        "download".to_string()
    } else {
        cleaned.to_string()
    }
}

pub fn fetch_basename(url: &Url, username: Option<&str>, password: Option<&str>) -> String {
    let hash = parameter_hash(&[
        url.as_str(),
        username.unwrap_or_default(),
        password.unwrap_or_default(),
    ]);
    format!("{hash}-{}", url_file_name(url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_length_prefixed() {
        assert_eq!(parameter_hash(&["ab", "c"]), parameter_hash(&["ab", "c"]));
        assert_ne!(parameter_hash(&["ab", "c"]), parameter_hash(&["a", "bc"]));
        assert_eq!(parameter_hash(&["x"]).len(), 16);
    }

    #[test]
    fn url_file_name_sanitizes() {
        let url = Url::parse("https://example.org/data/clinvar%20v2.vcf.gz?x=1").unwrap();
        assert_eq!(url_file_name(&url), "clinvar_20v2.vcf.gz");

        let bare = Url::parse("https://example.org/").unwrap();
        assert_eq!(url_file_name(&bare), "download");
    }

    #[test]
    fn credentials_change_fetch_basename() {
        let url = Url::parse("ftp://ftp.example.org/pub/file.zip").unwrap();
        let anonymous = fetch_basename(&url, None, None);
        let authed = fetch_basename(&url, Some("user"), Some("secret"));
        assert!(anonymous.ends_with("-file.zip"));
        assert_ne!(anonymous, authed);
    }
}
