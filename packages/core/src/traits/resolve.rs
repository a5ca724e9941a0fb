//! URL resolver: follows at most one redirect hop and reports the final
//! status/URL. HTTP error-status responses are legal outcomes; network
//! and timeout failures are the only error cases.

use async_trait::async_trait;

use crate::error::{ResolveError, ResolveResult};

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedUrl {
    pub status_code: u16,
    pub final_url: String,
    pub redirected: bool,
}

#[async_trait]
pub trait UrlResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> ResolveResult<ResolvedUrl>;
}

/// Resolves a URL with a single redirect hop. Mirrors the reference
/// resolver's no-auto-redirect fetch followed by exactly one manual
/// follow when the first response is a 3xx.
pub struct HttpUrlResolver {
    http: reqwest::Client,
}

impl HttpUrlResolver {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("resolver http client builds");
        Self { http }
    }

    async fn fetch_once(&self, url: &str) -> ResolveResult<reqwest::Response> {
        self.http.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ResolveError::Timeout {
                    url: url.to_string(),
                }
            } else {
                ResolveError::Network(Box::new(e))
            }
        })
    }
}

impl Default for HttpUrlResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UrlResolver for HttpUrlResolver {
    async fn resolve(&self, url: &str) -> ResolveResult<ResolvedUrl> {
        if url.is_empty() {
            return Err(ResolveError::EmptyUrl);
        }

        let first = self.fetch_once(url).await?;
        let status = first.status().as_u16();

        if (300..400).contains(&status) {
            if let Some(location) = first
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
            {
                let target = resolve_relative(url, location);
                let second = self.fetch_once(&target).await?;
                return Ok(ResolvedUrl {
                    status_code: second.status().as_u16(),
                    final_url: target,
                    redirected: true,
                });
            }
        }

        Ok(ResolvedUrl {
            status_code: status,
            final_url: url.to_string(),
            redirected: false,
        })
    }
}

fn resolve_relative(base: &str, location: &str) -> String {
    url::Url::parse(base)
        .and_then(|b| b.join(location))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| location.to_string())
}

/// Deterministic mock matching the reference resolver's fixture rules:
/// URLs containing "404" or "not-found" resolve to a 404; URLs
/// containing "/redirect/" resolve to the same path with "/final/"
/// substituted and `redirected = true`; everything else passes through.
pub struct DeterministicMockUrlResolver;

#[async_trait]
impl UrlResolver for DeterministicMockUrlResolver {
    async fn resolve(&self, url: &str) -> ResolveResult<ResolvedUrl> {
        if url.is_empty() {
            return Err(ResolveError::EmptyUrl);
        }
        if url.contains("404") || url.contains("not-found") {
            return Ok(ResolvedUrl {
                status_code: 404,
                final_url: url.to_string(),
                redirected: false,
            });
        }
        if url.contains("/redirect/") {
            return Ok(ResolvedUrl {
                status_code: 200,
                final_url: url.replacen("/redirect/", "/final/", 1),
                redirected: true,
            });
        }
        Ok(ResolvedUrl {
            status_code: 200,
            final_url: url.to_string(),
            redirected: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_resolves_404_paths() {
        let resolver = DeterministicMockUrlResolver;
        let resolved = resolver.resolve("https://x.test/not-found/1").await.unwrap();
        assert_eq!(resolved.status_code, 404);
        assert!(!resolved.redirected);
    }

    #[tokio::test]
    async fn mock_resolves_redirect_paths() {
        let resolver = DeterministicMockUrlResolver;
        let resolved = resolver
            .resolve("https://x.test/redirect/42")
            .await
            .unwrap();
        assert_eq!(resolved.final_url, "https://x.test/final/42");
        assert!(resolved.redirected);
    }

    #[tokio::test]
    async fn mock_rejects_empty_url() {
        let resolver = DeterministicMockUrlResolver;
        let err = resolver.resolve("").await.unwrap_err();
        assert!(matches!(err, ResolveError::EmptyUrl));
    }
}
