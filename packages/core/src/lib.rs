//! # jobato-core
//!
//! Domain-agnostic primitives for the job-posting ingestion core:
//! URL normalization, the two-phase dedupe engine, classification
//! metrics, HTML fetch/extract, and the pluggable search/resolve/model
//! traits plus their deterministic mocks.
//!
//! ## Modules
//!
//! - [`url_normalize`] — canonicalizes URLs to a stable dedupe key
//! - [`dedupe`] — exact + near-duplicate linking over a run's rows
//! - [`metrics`] — precision/recall/F1/accuracy from a confusion matrix
//! - [`html`] — content-addressed raw HTML storage + visible-text extraction
//! - [`model`] — the scoring model contract and built-in baseline
//! - [`traits`] — pluggable search client and URL resolver

pub mod dedupe;
pub mod error;
pub mod html;
pub mod metrics;
pub mod model;
pub mod traits;
pub mod url_normalize;

pub use dedupe::{dedupe_run_results, dedupe_run_results_default, DedupeCandidate, DedupeDecision, DedupeOutcome};
pub use error::{
    DedupeError, FetchError, ModelError, NormalizeError, ResolveError, SearchError,
};
pub use html::{extract_visible_text, raw_html_path, HtmlFetcher};
pub use metrics::{calculate_classification_counts, calculate_metrics, ClassificationCounts, Metrics};
pub use model::{clamp_score, to_binary_prediction, BaselineModel, BuiltinModel, FeatureRow, Model};
pub use traits::resolve::{
    DeterministicMockUrlResolver, HttpUrlResolver, ResolvedUrl, UrlResolver,
};
pub use traits::search::{
    BraveSearchClient, BraveSearchConfig, DeterministicMockSearchClient, SearchClient, SearchHit,
};
pub use url_normalize::{normalize, NormalizedUrl};
