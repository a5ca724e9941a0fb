//! Deterministic, idempotent URL normalization used as the dedupe key.
//!
//! Scheme and host are lowercased; path case is preserved. Default ports
//! are dropped, tracking parameters are stripped, and the remaining
//! query parameters are sorted by key then value. The result is a
//! reconstructed URL string, not a hash of one.

use std::collections::BTreeSet;

use url::Url;

use crate::error::{NormalizeError, NormalizeResult};

/// Explicit tracking-parameter names, plus the prefixes matched below.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "utm_id",
    "utm_source_platform",
    "utm_creative_format",
    "utm_marketing_tactic",
    "fbclid",
    "gclid",
    "gclsrc",
    "dclid",
    "msclkid",
    "ref",
    "source",
    "src",
    "campaign",
    "affiliate",
    "affiliate_id",
    "partner",
    "partner_id",
    "tracking",
    "track",
    "trk",
    "click_id",
    "clickid",
    "li_fat_id",
    "twclid",
    "ttclid",
    "sessionid",
    "session_id",
    "_ga",
    "_gl",
    "_hsenc",
    "_hsmi",
    "mc_cid",
    "mc_eid",
    "igshid",
    "s_kwcid",
    "zanpid",
];

const TRACKING_PREFIXES: &[&str] = &["utm_", "affiliate", "partner", "li_fat_id"];

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedUrl {
    pub normalized: String,
    pub original: String,
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        "ftp" => Some(21),
        _ => None,
    }
}

fn is_tracking_param(key: &str) -> bool {
    let lower = key.to_lowercase();
    TRACKING_PARAMS.contains(&lower.as_str())
        || TRACKING_PREFIXES.iter().any(|p| lower.starts_with(p))
}

fn collapse_path_slashes(path: &str) -> String {
    let mut collapsed = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        collapsed.push(c);
    }
    if collapsed.len() > 1 && collapsed.ends_with('/') {
        collapsed.pop();
    }
    if collapsed.is_empty() {
        collapsed.push('/');
    }
    collapsed
}

/// Normalizes `input`. Path case is intentionally preserved; only scheme
/// and host are lowercased.
pub fn normalize(input: &str) -> NormalizeResult<NormalizedUrl> {
    let parsed = Url::parse(input)?;

    let scheme = parsed.scheme().to_lowercase();
    if !matches!(scheme.as_str(), "http" | "https" | "ftp") {
        return Err(NormalizeError::DisallowedScheme(scheme));
    }

    let host = parsed
        .host_str()
        .ok_or(NormalizeError::NoHost)?
        .to_lowercase();

    let port = parsed.port().filter(|p| Some(*p) != default_port(&scheme));

    let path = collapse_path_slashes(parsed.path());

    let mut pairs: BTreeSet<(String, String)> = BTreeSet::new();
    for (k, v) in parsed.query_pairs() {
        if is_tracking_param(&k) {
            continue;
        }
        pairs.insert((k.to_string(), v.to_string()));
    }

    let mut normalized = String::new();
    normalized.push_str(&scheme);
    normalized.push_str("://");
    if let Some(userinfo) = non_empty_userinfo(&parsed) {
        normalized.push_str(&userinfo);
        normalized.push('@');
    }
    normalized.push_str(&host);
    if let Some(p) = port {
        normalized.push(':');
        normalized.push_str(&p.to_string());
    }
    normalized.push_str(&path);
    if !pairs.is_empty() {
        normalized.push('?');
        let query = pairs
            .into_iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        normalized.push_str(&query);
    }

    Ok(NormalizedUrl {
        normalized,
        original: input.to_string(),
    })
}

fn non_empty_userinfo(parsed: &Url) -> Option<String> {
    let username = parsed.username();
    if username.is_empty() {
        return None;
    }
    match parsed.password() {
        Some(password) => Some(format!("{username}:{password}")),
        None => Some(username.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_scheme_and_host_preserves_path_case() {
        let result = normalize("HTTPS://Example.COM:443/Path/?b=2&utm_source=x&a=1#frag").unwrap();
        assert_eq!(result.normalized, "https://example.com/Path?a=1&b=2");
    }

    #[test]
    fn drops_default_port_keeps_nondefault() {
        let a = normalize("http://example.com:80/x").unwrap();
        assert_eq!(a.normalized, "http://example.com/x");
        let b = normalize("http://example.com:8080/x").unwrap();
        assert_eq!(b.normalized, "http://example.com:8080/x");
    }

    #[test]
    fn collapses_double_slashes_and_trailing_slash() {
        let a = normalize("http://example.com//a//b/").unwrap();
        assert_eq!(a.normalized, "http://example.com/a/b");
    }

    #[test]
    fn root_path_keeps_single_slash() {
        let a = normalize("http://example.com/").unwrap();
        assert_eq!(a.normalized, "http://example.com/");
    }

    #[test]
    fn strips_utm_prefixed_and_affiliate_params() {
        let a = normalize("http://example.com/?utm_whatever=1&affiliate_code=2&keep=3").unwrap();
        assert_eq!(a.normalized, "http://example.com/?keep=3");
    }

    #[test]
    fn rejects_disallowed_scheme() {
        let err = normalize("file:///etc/passwd").unwrap_err();
        assert!(matches!(err, NormalizeError::DisallowedScheme(_)));
    }

    #[test]
    fn idempotent() {
        let once = normalize("HTTP://Example.com:80/A//B/?z=1&a=2#f").unwrap();
        let twice = normalize(&once.normalized).unwrap();
        assert_eq!(once.normalized, twice.normalized);
    }

    #[test]
    fn query_order_does_not_affect_equality() {
        let a = normalize("http://example.com/?a=1&b=2").unwrap();
        let b = normalize("http://example.com/?b=2&a=1").unwrap();
        assert_eq!(a.normalized, b.normalized);
    }
}
