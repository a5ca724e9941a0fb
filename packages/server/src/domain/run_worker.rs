//! The run worker: drives one `run.requested` event through the full
//! ingestion pipeline (cache probe -> search -> resolve -> fetch ->
//! extract -> normalize -> dedupe -> score -> persist -> publish).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use jobato_core::{
    dedupe_run_results_default, normalize, DedupeCandidate, FetchError, HtmlFetcher, ResolveError,
    ResolvedUrl, SearchClient, SearchError, SearchHit, UrlResolver,
};
use serde::Deserialize;

use crate::domain::activation::ActivationService;
use crate::domain::cache::{self, CacheConfig};
use crate::domain::events::RunInput;
use crate::domain::quota::{dispatchable_count, quota_day_for, QuotaLedger};
use crate::domain::registry::ModelRegistry;
use crate::domain::scoring;
use crate::domain::store::{NewRunResult, ResultStore};

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("ingestion failure: {0}")]
    Ingestion(String),
}

impl From<std::io::Error> for WorkerError {
    fn from(e: std::io::Error) -> Self {
        WorkerError::Ingestion(e.to_string())
    }
}

impl From<sqlx::Error> for WorkerError {
    fn from(e: sqlx::Error) -> Self {
        WorkerError::Ingestion(e.to_string())
    }
}

impl From<crate::config::ConfigFileError> for WorkerError {
    fn from(e: crate::config::ConfigFileError) -> Self {
        WorkerError::Ingestion(e.to_string())
    }
}

impl From<crate::domain::quota::QuotaError> for WorkerError {
    fn from(e: crate::domain::quota::QuotaError) -> Self {
        WorkerError::Ingestion(e.to_string())
    }
}

impl From<crate::domain::scoring::ScoringError> for WorkerError {
    fn from(e: crate::domain::scoring::ScoringError) -> Self {
        WorkerError::Ingestion(e.to_string())
    }
}

impl From<SearchError> for WorkerError {
    fn from(e: SearchError) -> Self {
        match e {
            SearchError::Network(_) => WorkerError::Network(e.to_string()),
            other => WorkerError::Ingestion(other.to_string()),
        }
    }
}

impl From<ResolveError> for WorkerError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::Network(_) | ResolveError::Timeout { .. } => WorkerError::Network(e.to_string()),
            other => WorkerError::Ingestion(other.to_string()),
        }
    }
}

impl From<FetchError> for WorkerError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Network(_) => WorkerError::Network(e.to_string()),
            other => WorkerError::Ingestion(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ZeroResult {
    pub query_text: String,
    pub domain: String,
    pub occurred_at: String,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub issued_calls: u32,
    pub persisted_results: usize,
    pub new_jobs_count: usize,
    pub relevant_count: usize,
    pub skipped404: u32,
    pub zero_results: Vec<ZeroResult>,
}

// --- §3.1 default run-input builder -----------------------------------

#[derive(Debug, Deserialize)]
struct QueriesFile {
    #[serde(default)]
    queries: Vec<QueryDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
struct QueryDefinition {
    #[allow(dead_code)]
    id: Option<String>,
    text: String,
    #[serde(default = "default_true")]
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct AllowlistsFile {
    #[serde(default)]
    allowlists: Vec<AllowlistEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct AllowlistEntry {
    domain: String,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Lowercases, strips a trailing dot, and rejects anything that is not a
/// bare RFC-1035 hostname (no scheme, path, port, or wildcard).
fn normalize_domain(raw: &str) -> Option<String> {
    let mut domain = raw.trim().to_lowercase();
    if domain.ends_with('.') {
        domain.pop();
    }
    if domain.is_empty() || domain.len() > 253 {
        return None;
    }
    if domain.contains("://") || domain.contains('/') || domain.contains(':') || domain.contains('*') {
        return None;
    }
    for label in domain.split('.') {
        if label.is_empty() || label.len() > 63 {
            return None;
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return None;
        }
        if label.starts_with('-') || label.ends_with('-') {
            return None;
        }
    }
    Some(domain)
}

/// Reads `queries.yaml`/`allowlists.yaml` and returns the cross product
/// of enabled, deduplicated queries x domains.
pub fn default_run_inputs(config_dir: &Path) -> Result<Vec<RunInput>, crate::config::ConfigFileError> {
    let queries_path = config_dir.join("queries.yaml");
    let queries: QueriesFile = if queries_path.exists() {
        let content = std::fs::read_to_string(&queries_path).map_err(|source| {
            crate::config::ConfigFileError::Read { path: queries_path.clone(), source }
        })?;
        serde_yaml::from_str(&content).map_err(|source| crate::config::ConfigFileError::Parse {
            path: queries_path.clone(),
            source,
        })?
    } else {
        QueriesFile { queries: Vec::new() }
    };

    let allowlists_path = config_dir.join("allowlists.yaml");
    let allowlists: AllowlistsFile = if allowlists_path.exists() {
        let content = std::fs::read_to_string(&allowlists_path).map_err(|source| {
            crate::config::ConfigFileError::Read { path: allowlists_path.clone(), source }
        })?;
        serde_yaml::from_str(&content).map_err(|source| crate::config::ConfigFileError::Parse {
            path: allowlists_path.clone(),
            source,
        })?
    } else {
        AllowlistsFile { allowlists: Vec::new() }
    };

    let mut seen_text = std::collections::HashSet::new();
    let mut unique_queries = Vec::new();
    for q in queries.queries.into_iter().filter(|q| q.enabled) {
        let key = q.text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        if seen_text.insert(key) {
            unique_queries.push(q);
        }
    }

    let mut seen_domain = std::collections::HashSet::new();
    let mut unique_domains = Vec::new();
    for entry in allowlists.allowlists.into_iter().filter(|a| a.enabled) {
        if let Some(domain) = normalize_domain(&entry.domain) {
            if seen_domain.insert(domain.clone()) {
                unique_domains.push(domain);
            }
        }
    }

    let mut inputs = Vec::new();
    for query in &unique_queries {
        for domain in &unique_domains {
            inputs.push(RunInput {
                query_id: None,
                query_text: query.text.clone(),
                domain: domain.clone(),
                search_query: format!("site:{domain} {}", query.text),
            });
        }
    }
    Ok(inputs)
}

// --- run worker ---------------------------------------------------------

pub struct RunWorker {
    pub data_dir: PathBuf,
    pub config_dir: PathBuf,
    pub search: Arc<dyn SearchClient>,
    pub resolver: Arc<dyn UrlResolver>,
    pub quota: Arc<QuotaLedger>,
    pub registry: Arc<ModelRegistry>,
    pub activation: Arc<ActivationService>,
}

impl RunWorker {
    fn pointer_path(&self) -> PathBuf {
        self.data_dir.join("db/current-db.txt")
    }

    fn run_db_path(&self, run_id: &str) -> PathBuf {
        self.data_dir.join(format!("db/runs/{run_id}.db"))
    }

    fn read_pointer(&self) -> Option<PathBuf> {
        let content = std::fs::read_to_string(self.pointer_path()).ok()?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(PathBuf::from(trimmed))
    }

    fn write_pointer(&self, run_db_path: &Path) -> std::io::Result<()> {
        let pointer = self.pointer_path();
        if let Some(parent) = pointer.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = pointer.with_extension("txt.tmp");
        std::fs::write(&tmp, run_db_path.to_string_lossy().as_bytes())?;
        std::fs::rename(&tmp, &pointer)
    }

    fn snapshot(&self, run_id: &str) -> std::io::Result<PathBuf> {
        let run_db_path = self.run_db_path(run_id);
        if let Some(parent) = run_db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match self.read_pointer() {
            Some(source) if source.exists() => {
                std::fs::copy(&source, &run_db_path)?;
            }
            _ => {
                std::fs::File::create(&run_db_path)?;
            }
        }
        Ok(run_db_path)
    }

    /// Prior run DB files other than this run's own, newest first.
    fn prior_run_paths(&self, run_id: &str) -> Vec<PathBuf> {
        let runs_dir = self.data_dir.join("db/runs");
        let Ok(entries) = std::fs::read_dir(&runs_dir) else {
            return Vec::new();
        };
        let mut paths: Vec<(std::time::SystemTime, PathBuf)> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().map(|ext| ext == "db").unwrap_or(false))
            .filter(|p| p.file_stem().map(|s| s != run_id).unwrap_or(true))
            .filter_map(|p| std::fs::metadata(&p).ok().and_then(|m| m.modified().ok()).map(|t| (t, p)))
            .collect();
        paths.sort_by(|a, b| b.0.cmp(&a.0));
        paths.into_iter().map(|(_, p)| p).collect()
    }

    async fn find_cache_hit(
        &self,
        run_id: &str,
        cache_key: &str,
        cache_config: &CacheConfig,
    ) -> Option<Vec<crate::domain::store::RunResultRow>> {
        let now = Utc::now();
        for path in self.prior_run_paths(run_id) {
            let Ok(store) = ResultStore::open(&path).await else { continue };
            let Ok(all_rows) = sqlx::query_as::<_, crate::domain::store::RunResultRow>(
                "SELECT * FROM run_items WHERE cache_key = ?",
            )
            .bind(cache_key)
            .fetch_all(store.pool())
            .await else { continue };
            if all_rows.is_empty() {
                continue;
            }
            let groups = vec![all_rows];
            if let Some(bundle) = cache::freshest_bundle(&groups, now) {
                return Some(bundle.to_vec());
            }
        }
        let _ = cache_config;
        None
    }

    async fn max_last_seen(&self, run_id: &str, raw_url: &str) -> Option<chrono::DateTime<Utc>> {
        let mut max_seen = None;
        for path in self.prior_run_paths(run_id) {
            let Ok(store) = ResultStore::open(&path).await else { continue };
            let Ok(rows) = sqlx::query_as::<_, crate::domain::store::RunResultRow>(
                "SELECT * FROM run_items WHERE raw_url = ?",
            )
            .bind(raw_url)
            .fetch_all(store.pool())
            .await else { continue };
            for row in rows {
                if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(&row.last_seen_at) {
                    let ts = ts.with_timezone(&Utc);
                    if max_seen.map(|m| ts > m).unwrap_or(true) {
                        max_seen = Some(ts);
                    }
                }
            }
        }
        max_seen
    }

    pub async fn process_event(
        &self,
        run_id: &str,
        requested_inputs: Vec<RunInput>,
        cache_config: &CacheConfig,
        quota_config: &crate::config::QuotaConfig,
        data_dir_for_html: &Path,
    ) -> Result<RunOutcome, WorkerError> {
        let run_inputs = if requested_inputs.is_empty() {
            default_run_inputs(&self.config_dir)?
        } else {
            requested_inputs
        };

        let run_db_path = self.snapshot(run_id)?;
        let store = ResultStore::open(&run_db_path).await?;

        let now = Utc::now();
        let day = quota_day_for(
            now,
            &quota_config.reset_policy.time_zone,
            quota_config.reset_policy.reset_hour,
        )?;
        let used = self.quota.get_daily_usage(day).await?;
        let (dispatch_count, _quota_outcome) =
            dispatchable_count(quota_config.daily_limit, used, run_inputs.len());
        let dispatched = &run_inputs[..dispatch_count];

        let mut issued_calls = 0u32;
        let mut skipped404 = 0u32;
        let mut zero_results = Vec::new();
        let mut rows = Vec::new();
        let html_fetcher = HtmlFetcher::new();

        for input in dispatched {
            let cache_key = cache::cache_key(&input.query_text, &input.domain);

            if let Some(bundle) = self.find_cache_hit(run_id, &cache_key, cache_config).await {
                let cached_at = now;
                let expires_at = cache::cache_expires_at(cached_at, cache_config.ttl_hours);
                for cached_row in &bundle {
                    rows.push(NewRunResult {
                        run_id: run_id.to_string(),
                        query_id: input.query_id.clone(),
                        query_text: input.query_text.clone(),
                        domain: input.domain.clone(),
                        search_query: input.search_query.clone(),
                        title: cached_row.title.clone(),
                        snippet: cached_row.snippet.clone(),
                        raw_url: cached_row.raw_url.clone(),
                        final_url: cached_row.final_url.clone(),
                        raw_html_path: cached_row.raw_html_path.clone(),
                        visible_text: cached_row.visible_text.clone(),
                        fetch_error: None,
                        extract_error: None,
                        normalization_error: cached_row.normalization_error.clone(),
                        normalized_url: cached_row.normalized_url.clone(),
                        cache_key: Some(cache_key.clone()),
                        cached_at: Some(cached_at),
                        cache_expires_at: Some(expires_at),
                        last_seen_at: now,
                        skip_reason: None,
                    });
                }
                continue;
            }

            self.quota.increment(day, run_id, 1).await?;
            issued_calls += 1;
            let hits: Vec<SearchHit> = self.search.search(run_id, &input.search_query).await?;

            if hits.is_empty() {
                zero_results.push(ZeroResult {
                    query_text: input.query_text.clone(),
                    domain: input.domain.clone(),
                    occurred_at: crate::domain::now_rfc3339(),
                });
                continue;
            }

            for hit in hits {
                let ResolvedUrl { status_code, final_url, .. } = self.resolver.resolve(&hit.link).await?;
                if status_code == 404 {
                    skipped404 += 1;
                    continue;
                }

                let throttled = self
                    .max_last_seen(run_id, &hit.link)
                    .await
                    .map(|last_seen| !cache::is_revisit_allowed(last_seen, cache_config.revisit_throttle_days, now))
                    .unwrap_or(false);

                let (raw_html_path, visible_text, fetch_error, extract_error) = if throttled {
                    (None, None, None, None)
                } else {
                    match html_fetcher.fetch(data_dir_for_html, run_id, &final_url).await {
                        Ok(path) => {
                            let path_str = path.to_string_lossy().to_string();
                            match std::fs::read_to_string(&path)
                                .map_err(|e| e.to_string())
                                .and_then(|html| jobato_core::extract_visible_text(&html).map_err(|e| e.to_string()))
                            {
                                Ok(text) => (Some(path_str), Some(text), None, None),
                                Err(err) => (Some(path_str), None, None, Some(err)),
                            }
                        }
                        Err(err) => (None, None, Some(err.to_string()), None),
                    }
                };

                let (normalized_url, normalization_error) = match normalize(&final_url) {
                    Ok(n) => (Some(n.normalized), None),
                    Err(err) => (None, Some(err.to_string())),
                };

                rows.push(NewRunResult {
                    run_id: run_id.to_string(),
                    query_id: input.query_id.clone(),
                    query_text: input.query_text.clone(),
                    domain: input.domain.clone(),
                    search_query: input.search_query.clone(),
                    title: hit.title,
                    snippet: hit.snippet,
                    raw_url: hit.link,
                    final_url,
                    raw_html_path,
                    visible_text,
                    fetch_error,
                    extract_error,
                    normalization_error,
                    normalized_url,
                    cache_key: Some(cache_key.clone()),
                    cached_at: Some(now),
                    cache_expires_at: Some(cache::cache_expires_at(now, cache_config.ttl_hours)),
                    last_seen_at: now,
                    skip_reason: if throttled { Some("revisit_throttle".to_string()) } else { None },
                });
            }
        }

        let persisted_results = store.insert_batch(&rows).await?;

        let all_rows = store.fetch_run_rows(run_id).await?;
        let candidates: Vec<DedupeCandidate> = all_rows
            .iter()
            .map(|r| DedupeCandidate {
                id: r.id,
                normalized_url: r.normalized_url.clone(),
                title: r.title.clone(),
                snippet: r.snippet.clone(),
                visible_text: r.visible_text.clone(),
            })
            .collect();
        let (decisions, _dedupe_outcome) = dedupe_run_results_default(&candidates);
        for decision in &decisions {
            store.apply_dedupe_decision(decision).await?;
        }

        scoring::score_run(&store, &self.registry, &self.activation, run_id, None).await?;

        self.write_pointer(&run_db_path)?;

        let scored_rows = store.fetch_run_rows(run_id).await?;
        let relevant_count = scored_rows
            .iter()
            .filter(|r| !r.is_duplicate && r.relevance_score.unwrap_or(0.0) > 0.0)
            .count();
        let new_jobs_count = scored_rows.iter().filter(|r| !r.is_duplicate).count();

        Ok(RunOutcome {
            issued_calls,
            persisted_results,
            new_jobs_count,
            relevant_count,
            skipped404,
            zero_results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn normalize_domain_rejects_scheme_and_wildcard() {
        assert!(normalize_domain("https://example.com").is_none());
        assert!(normalize_domain("*.example.com").is_none());
        assert!(normalize_domain("example.com:8080").is_none());
        assert_eq!(normalize_domain("Example.COM."), Some("example.com".to_string()));
    }

    #[test]
    fn default_run_inputs_builds_cross_product() {
        let dir = tempfile::tempdir().unwrap();
        let mut queries = std::fs::File::create(dir.path().join("queries.yaml")).unwrap();
        writeln!(
            queries,
            "queries:\n  - id: q1\n    text: Senior Engineer\n    enabled: true\n  - id: q2\n    text: senior   engineer\n    enabled: true\n"
        )
        .unwrap();
        let mut allowlists = std::fs::File::create(dir.path().join("allowlists.yaml")).unwrap();
        writeln!(
            allowlists,
            "allowlists:\n  - domain: Example.COM\n    enabled: true\n  - domain: disabled.com\n    enabled: false\n"
        )
        .unwrap();

        let inputs = default_run_inputs(dir.path()).unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].domain, "example.com");
        assert_eq!(inputs[0].search_query, "site:example.com Senior Engineer");
    }

    #[test]
    fn default_run_inputs_is_empty_without_config_files() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = default_run_inputs(dir.path()).unwrap();
        assert!(inputs.is_empty());
    }
}
