//! Domain modules: everything downstream of the run worker's event-loop
//! boundary (cache, quota, store, dedupe/scoring glue, registry,
//! evaluation, activation, retrain, scheduler) plus the Redis Streams
//! event client.

pub mod activation;
pub mod cache;
pub mod evaluation;
pub mod events;
pub mod model_selector;
pub mod quota;
pub mod registry;
pub mod retrain;
pub mod run_worker;
pub mod scheduler;
pub mod scoring;
pub mod store;

use chrono::{SecondsFormat, Utc};

/// UTC, second-precision, RFC3339 with a literal `Z` suffix.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
