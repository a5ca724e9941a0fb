//! The job-posting ingestion core's application binary: run worker,
//! cache/quota/dedupe/scoring pipeline, model registry, evaluation
//! engine, activation service, retrain pipeline, daily scheduler, the
//! Redis Streams event client, and the `axum` HTTP surface.

pub mod config;
pub mod domain;
pub mod server;

pub use config::Config;
