//! HTTP surface: axum `Router` + `AppState` wiring.

pub mod app;
pub mod routes;

pub use app::{build_app, AppState};
