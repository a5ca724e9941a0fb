//! Integration coverage for the dedupe engine against a real
//! `ResultStore`: insert a run's rows, compute decisions with
//! `jobato_core::dedupe_run_results_default`, persist them back, and
//! read the run through the same path the run worker uses.

use chrono::Utc;
use jobato_core::{dedupe_run_results_default, DedupeCandidate};
use jobato_server::domain::store::{NewRunResult, ResultStore};

fn candidate_from_row(row: &jobato_server::domain::store::RunResultRow) -> DedupeCandidate {
    DedupeCandidate {
        id: row.id,
        normalized_url: row.normalized_url.clone(),
        title: row.title.clone(),
        snippet: row.snippet.clone(),
        visible_text: row.visible_text.clone(),
    }
}

fn new_result(run_id: &str, normalized_url: &str, title: &str, snippet: &str) -> NewRunResult {
    NewRunResult {
        run_id: run_id.to_string(),
        query_text: "engineer".to_string(),
        domain: "example.com".to_string(),
        search_query: "site:example.com engineer".to_string(),
        title: title.to_string(),
        snippet: snippet.to_string(),
        raw_url: format!("https://example.com/{normalized_url}"),
        final_url: format!("https://example.com/{normalized_url}"),
        normalized_url: Some(normalized_url.to_string()),
        last_seen_at: Utc::now(),
        ..Default::default()
    }
}

#[tokio::test]
async fn exact_duplicate_rows_are_linked_and_hidden_after_persisting() {
    let store = ResultStore::in_memory().await.unwrap();
    store
        .insert_batch(&[
            new_result("run-1", "jobs/123", "Senior Backend Engineer", "great team"),
            new_result("run-1", "jobs/123", "Senior Backend Engineer (reposted)", "great team"),
        ])
        .await
        .unwrap();

    let rows = store.fetch_run_rows("run-1").await.unwrap();
    assert_eq!(rows.len(), 2);

    let candidates: Vec<DedupeCandidate> = rows.iter().map(candidate_from_row).collect();
    let (decisions, outcome) = dedupe_run_results_default(&candidates);
    assert_eq!(outcome.exact_duplicates, 1);
    assert_eq!(outcome.canonical_count, 1);

    for decision in &decisions {
        store.apply_dedupe_decision(decision).await.unwrap();
    }

    let persisted = store.fetch_run_rows("run-1").await.unwrap();
    let canonical = persisted.iter().find(|r| !r.is_duplicate).unwrap();
    let duplicate = persisted.iter().find(|r| r.is_duplicate).unwrap();
    assert_eq!(canonical.duplicate_count, 1);
    assert!(duplicate.is_hidden);
    assert_eq!(duplicate.canonical_id, Some(canonical.id));
}

#[tokio::test]
async fn distinct_rows_in_the_same_run_stay_unlinked() {
    let store = ResultStore::in_memory().await.unwrap();
    store
        .insert_batch(&[
            new_result("run-2", "jobs/1", "Frontend Developer", "react and typescript role"),
            new_result("run-2", "jobs/2", "Warehouse Associate", "overnight shift, forklift cert"),
        ])
        .await
        .unwrap();

    let rows = store.fetch_run_rows("run-2").await.unwrap();
    let candidates: Vec<DedupeCandidate> = rows.iter().map(candidate_from_row).collect();
    let (decisions, outcome) = dedupe_run_results_default(&candidates);
    assert_eq!(outcome.duplicates_found, 0);

    for decision in &decisions {
        store.apply_dedupe_decision(decision).await.unwrap();
    }

    let persisted = store.fetch_run_rows("run-2").await.unwrap();
    assert!(persisted.iter().all(|r| !r.is_duplicate && !r.is_hidden));
}

#[tokio::test]
async fn dedupe_decisions_are_scoped_to_their_own_run() {
    let store = ResultStore::in_memory().await.unwrap();
    store
        .insert_batch(&[new_result("run-a", "jobs/1", "Line Cook", "kitchen role")])
        .await
        .unwrap();
    store
        .insert_batch(&[new_result("run-b", "jobs/1", "Line Cook", "kitchen role")])
        .await
        .unwrap();

    let run_a_rows = store.fetch_run_rows("run-a").await.unwrap();
    assert_eq!(run_a_rows.len(), 1);
    let run_b_rows = store.fetch_run_rows("run-b").await.unwrap();
    assert_eq!(run_b_rows.len(), 1);

    // Same normalized URL in two different runs is not a same-run duplicate;
    // each run's candidate set is computed independently.
    let (decisions_a, outcome_a) = dedupe_run_results_default(
        &run_a_rows.iter().map(candidate_from_row).collect::<Vec<_>>(),
    );
    assert_eq!(outcome_a.duplicates_found, 0);
    assert!(decisions_a.iter().all(|d| !d.is_duplicate));
}
