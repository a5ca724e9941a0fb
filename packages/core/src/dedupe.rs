//! Two-phase dedupe: exact normalized-URL grouping, then n-gram Jaccard
//! near-duplicate linking over non-duplicate rows.

use std::collections::{HashMap, HashSet};

/// The subset of a run result's fields the dedupe engine needs. The
/// caller owns row storage; this module only computes the linking
/// decisions to apply back.
#[derive(Debug, Clone)]
pub struct DedupeCandidate {
    pub id: i64,
    pub normalized_url: Option<String>,
    pub title: String,
    pub snippet: String,
    pub visible_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DedupeDecision {
    pub id: i64,
    pub is_duplicate: bool,
    pub is_hidden: bool,
    pub canonical_id: Option<i64>,
    /// Only set on canonical rows.
    pub duplicate_count: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupeOutcome {
    pub duplicates_found: usize,
    pub canonical_count: usize,
    pub exact_duplicates: usize,
    pub similar_duplicates: usize,
}

const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.90;
const NGRAM_SIZE: usize = 3;

/// Runs both dedupe phases over `candidates` (assumed already sorted by
/// ascending id, the tie-break the canonical-row rule depends on) and
/// returns the per-row decisions to persist, plus a summary.
pub fn dedupe_run_results(
    candidates: &[DedupeCandidate],
    similarity_threshold: f64,
) -> (Vec<DedupeDecision>, DedupeOutcome) {
    let mut decisions: HashMap<i64, DedupeDecision> = HashMap::new();
    let mut outcome = DedupeOutcome::default();

    // Phase 1: exact normalized_url grouping.
    let mut groups: HashMap<&str, Vec<&DedupeCandidate>> = HashMap::new();
    for c in candidates {
        if let Some(url) = c.normalized_url.as_deref() {
            groups.entry(url).or_default().push(c);
        }
    }

    let mut processed: HashSet<i64> = HashSet::new();

    for group in groups.values() {
        if group.len() < 2 {
            continue;
        }
        let mut sorted = group.clone();
        sorted.sort_by_key(|c| c.id);
        let canonical = sorted[0];
        let duplicate_count = (sorted.len() - 1) as i64;
        decisions.insert(
            canonical.id,
            DedupeDecision {
                id: canonical.id,
                is_duplicate: false,
                is_hidden: false,
                canonical_id: None,
                duplicate_count: Some(duplicate_count),
            },
        );
        processed.insert(canonical.id);
        outcome.canonical_count += 1;
        for dup in &sorted[1..] {
            decisions.insert(
                dup.id,
                DedupeDecision {
                    id: dup.id,
                    is_duplicate: true,
                    is_hidden: true,
                    canonical_id: Some(canonical.id),
                    duplicate_count: None,
                },
            );
            processed.insert(dup.id);
            outcome.duplicates_found += 1;
            outcome.exact_duplicates += 1;
        }
    }

    // Phase 2: n-gram Jaccard near-duplicate linking over rows not yet
    // marked duplicate in phase 1.
    let remaining: Vec<&DedupeCandidate> = candidates
        .iter()
        .filter(|c| !processed.contains(&c.id))
        .collect();

    let signatures: HashMap<i64, HashSet<String>> = remaining
        .iter()
        .map(|c| (c.id, ngram_signature(&comparable_text(c))))
        .collect();

    for (i, a) in remaining.iter().enumerate() {
        if processed.contains(&a.id) {
            continue;
        }
        for b in remaining.iter().skip(i + 1) {
            if processed.contains(&b.id) {
                continue;
            }
            let sig_a = &signatures[&a.id];
            let sig_b = &signatures[&b.id];
            let similarity = jaccard_similarity(sig_a, sig_b);
            if similarity >= similarity_threshold {
                decisions.entry(a.id).or_insert(DedupeDecision {
                    id: a.id,
                    is_duplicate: false,
                    is_hidden: false,
                    canonical_id: None,
                    duplicate_count: Some(0),
                });
                if let Some(canonical) = decisions.get_mut(&a.id) {
                    canonical.duplicate_count = Some(canonical.duplicate_count.unwrap_or(0) + 1);
                }
                decisions.insert(
                    b.id,
                    DedupeDecision {
                        id: b.id,
                        is_duplicate: true,
                        is_hidden: true,
                        canonical_id: Some(a.id),
                        duplicate_count: None,
                    },
                );
                processed.insert(b.id);
                outcome.duplicates_found += 1;
                outcome.similar_duplicates += 1;
            }
        }
        if decisions.contains_key(&a.id) && !processed.contains(&a.id) {
            processed.insert(a.id);
            outcome.canonical_count += 1;
        }
    }

    (decisions.into_values().collect(), outcome)
}

pub fn dedupe_run_results_default(
    candidates: &[DedupeCandidate],
) -> (Vec<DedupeDecision>, DedupeOutcome) {
    dedupe_run_results(candidates, DEFAULT_SIMILARITY_THRESHOLD)
}

fn comparable_text(c: &DedupeCandidate) -> String {
    let mut parts = vec![c.title.as_str(), c.snippet.as_str()];
    if let Some(text) = c.visible_text.as_deref() {
        parts.push(text);
    }
    parts.join(" ")
}

fn ngram_signature(text: &str) -> HashSet<String> {
    let collapsed = collapse_whitespace(&text.to_lowercase());
    let words: Vec<&str> = collapsed.split(' ').filter(|w| !w.is_empty()).collect();
    if words.len() < NGRAM_SIZE {
        if words.is_empty() {
            return HashSet::new();
        }
        return HashSet::from([words.join(" ")]);
    }
    words
        .windows(NGRAM_SIZE)
        .map(|w| w.join(" "))
        .collect()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn jaccard_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: i64, normalized_url: Option<&str>, title: &str) -> DedupeCandidate {
        DedupeCandidate {
            id,
            normalized_url: normalized_url.map(str::to_string),
            title: title.to_string(),
            snippet: String::new(),
            visible_text: None,
        }
    }

    #[test]
    fn exact_duplicate_by_normalized_url() {
        let rows = vec![
            candidate(1, Some("abc"), "Senior Engineer"),
            candidate(2, Some("abc"), "Senior Engineer (copy)"),
        ];
        let (decisions, outcome) = dedupe_run_results_default(&rows);
        let by_id: HashMap<i64, &DedupeDecision> = decisions.iter().map(|d| (d.id, d)).collect();
        assert!(!by_id[&1].is_duplicate);
        assert_eq!(by_id[&1].duplicate_count, Some(1));
        assert!(by_id[&2].is_duplicate);
        assert_eq!(by_id[&2].canonical_id, Some(1));
        assert!(by_id[&2].is_hidden);
        assert_eq!(outcome.exact_duplicates, 1);
        assert_eq!(outcome.canonical_count, 1);
    }

    #[test]
    fn similar_duplicate_by_text_signature() {
        let text = "python django senior engineer remote opportunity";
        let rows = vec![
            candidate(1, Some("u1"), text),
            candidate(2, Some("u2"), text),
        ];
        let (decisions, outcome) = dedupe_run_results_default(&rows);
        let by_id: HashMap<i64, &DedupeDecision> = decisions.iter().map(|d| (d.id, d)).collect();
        assert!(!by_id[&1].is_duplicate);
        assert!(by_id[&2].is_duplicate);
        assert_eq!(by_id[&2].canonical_id, Some(1));
        assert_eq!(outcome.similar_duplicates, 1);
    }

    #[test]
    fn distinct_rows_are_not_linked() {
        let rows = vec![
            candidate(1, Some("u1"), "totally distinct first role"),
            candidate(2, Some("u2"), "completely different second listing"),
        ];
        let (decisions, outcome) = dedupe_run_results_default(&rows);
        assert_eq!(outcome.duplicates_found, 0);
        for d in &decisions {
            assert!(!d.is_duplicate);
        }
    }

    #[test]
    fn jaccard_handles_empty_signatures() {
        assert_eq!(jaccard_similarity(&HashSet::new(), &HashSet::new()), 1.0);
        let mut non_empty = HashSet::new();
        non_empty.insert("a b c".to_string());
        assert_eq!(jaccard_similarity(&HashSet::new(), &non_empty), 0.0);
    }

    #[test]
    fn null_normalized_url_never_joins_phase_one() {
        let rows = vec![candidate(1, None, "x"), candidate(2, None, "y")];
        let (decisions, outcome) = dedupe_run_results_default(&rows);
        assert_eq!(outcome.exact_duplicates, 0);
        assert!(decisions.iter().all(|d| !d.is_duplicate));
    }
}
