//! HTML fetch and visible-text extraction.
//!
//! Fetching writes raw HTML to a content-addressed path under the data
//! directory; extraction strips script/style/noscript/meta/link/title
//! elements and collapses whitespace in the remaining text.

use std::path::{Path, PathBuf};

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::{FetchError, FetchResult};

const STRIPPED_TAGS: &[&str] = &["script", "style", "noscript", "meta", "link", "title"];

/// `<data>/html/raw/<run_id>/<sha256(url)>.html`
pub fn raw_html_path(data_dir: &Path, run_id: &str, url: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let digest = hex::encode(hasher.finalize());
    data_dir
        .join("html")
        .join("raw")
        .join(run_id)
        .join(format!("{digest}.html"))
}

pub struct HtmlFetcher {
    http: reqwest::Client,
}

impl HtmlFetcher {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("html fetcher client builds"),
        }
    }

    /// Fetches `url` and writes the body to the content-addressed path
    /// under `data_dir`, returning that path.
    pub async fn fetch(&self, data_dir: &Path, run_id: &str, url: &str) -> FetchResult<PathBuf> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(Box::new(e)))?;
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Network(Box::new(e)))?;

        let path = raw_html_path(data_dir, run_id, url);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, body)?;
        Ok(path)
    }
}

impl Default for HtmlFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Strips script/style/noscript/meta/link/title tags and `on*`
/// attributes, then collapses whitespace in the remaining visible text.
pub fn extract_visible_text(html: &str) -> FetchResult<String> {
    let document = scraper::Html::parse_document(html);
    let selector = scraper::Selector::parse("body")
        .or_else(|_| scraper::Selector::parse("*"))
        .map_err(|e| FetchError::Extract {
            reason: format!("selector error: {e:?}"),
        })?;

    let mut text_parts = Vec::new();
    collect_visible_text(&document, &selector, &mut text_parts);

    let joined = text_parts.join(" ");
    let whitespace = Regex::new(r"\s+").expect("static regex compiles");
    let collapsed = whitespace.replace_all(&joined, " ");
    Ok(html_escape_decode(collapsed.trim()))
}

fn collect_visible_text(
    document: &scraper::Html,
    root_selector: &scraper::Selector,
    out: &mut Vec<String>,
) {
    let skip: std::collections::HashSet<&str> = STRIPPED_TAGS.iter().copied().collect();
    for root in document.select(root_selector) {
        for node in root.descendants() {
            if let Some(element) = node.value().as_element() {
                if skip.contains(element.name()) {
                    continue;
                }
            }
            if let Some(text) = node.value().as_text() {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    out.push(trimmed.to_string());
                }
            }
        }
        // A body (or the whole document as fallback) is enough; avoid
        // walking every top-level match when "*" matched many nodes.
        break;
    }
}

fn html_escape_decode(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_and_style_tags() {
        let html = "<html><body><script>bad()</script><style>.c{}</style><p>Hello World</p></body></html>";
        let text = extract_visible_text(html).unwrap();
        assert_eq!(text, "Hello World");
    }

    #[test]
    fn collapses_whitespace() {
        let html = "<html><body><p>Hello</p>\n\n<p>   World  </p></body></html>";
        let text = extract_visible_text(html).unwrap();
        assert_eq!(text, "Hello World");
    }

    #[test]
    fn decodes_entities() {
        let html = "<html><body><p>Tom &amp; Jerry</p></body></html>";
        let text = extract_visible_text(html).unwrap();
        assert_eq!(text, "Tom & Jerry");
    }

    #[test]
    fn raw_html_path_is_content_addressed_per_run() {
        let path = raw_html_path(Path::new("/data"), "run-1", "https://example.com/job/1");
        assert!(path.starts_with("/data/html/raw/run-1"));
        assert_eq!(path.extension().unwrap(), "html");
    }
}
