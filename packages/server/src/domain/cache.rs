//! Cache-bundle reuse and revisit throttling. Scans prior per-run
//! databases for a fresh cache-key match or a too-recent `last_seen_at`.

use chrono::{DateTime, Duration, Utc};

use crate::domain::store::RunResultRow;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl_hours: i64,
    pub revisit_throttle_days: i64,
}

/// `md5(lower(collapse_ws(query_text)) | lower(domain))`
pub fn cache_key(query_text: &str, domain: &str) -> String {
    let collapsed = query_text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let input = format!("{}|{}", collapsed, domain.to_lowercase());
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Freshness is strict: `now < expires`.
pub fn is_fresh(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now < expires_at
}

pub fn cache_expires_at(cached_at: DateTime<Utc>, ttl_hours: i64) -> DateTime<Utc> {
    cached_at + Duration::hours(ttl_hours)
}

/// Revisit is allowed inclusively at the cutoff: `now >= last_seen_at + throttle_days`.
pub fn is_revisit_allowed(last_seen_at: DateTime<Utc>, throttle_days: i64, now: DateTime<Utc>) -> bool {
    now >= last_seen_at + Duration::days(throttle_days)
}

/// The most recently cached group of rows sharing `key`, if any group's
/// `cache_expires_at` is still fresh relative to `now`.
pub fn freshest_bundle<'a>(
    candidates: &'a [Vec<RunResultRow>],
    now: DateTime<Utc>,
) -> Option<&'a [RunResultRow]> {
    candidates
        .iter()
        .filter(|group| {
            group.iter().any(|row| {
                row.cache_expires_at
                    .as_deref()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|expires| is_fresh(expires.with_timezone(&Utc), now))
                    .unwrap_or(false)
            })
        })
        .map(|group| group.as_slice())
        .next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_ignores_case_and_whitespace() {
        let a = cache_key("  Senior   Engineer ", "Example.COM");
        let b = cache_key("senior engineer", "example.com");
        assert_eq!(a, b);
    }

    #[test]
    fn freshness_boundary_is_strict() {
        let now = Utc::now();
        assert!(!is_fresh(now, now));
        assert!(is_fresh(now + Duration::seconds(1), now));
    }

    #[test]
    fn revisit_boundary_is_inclusive_allowed() {
        let last_seen = Utc::now() - Duration::days(7);
        let now = last_seen + Duration::days(7);
        assert!(is_revisit_allowed(last_seen, 7, now));
    }

    #[test]
    fn revisit_throttled_before_cutoff() {
        let last_seen = Utc::now();
        let now = last_seen + Duration::days(3);
        assert!(!is_revisit_allowed(last_seen, 7, now));
    }
}
