//! Query matching and Thompson-sampled ranking (spec.md §4.5 `match` and
//! `getVidhis`).

use std::collections::HashSet;

use super::beta::sample_beta;
use super::model::Vidhi;
use super::text::{jaccard, tokenize_without_stopwords};

/// Finds the best vidhi for a free-text query: Jaccard-similar to the
/// vidhi's triggers, weighted by one Thompson draw from its outcome
/// posterior. Returns `None` if the query is empty after stop-word removal,
/// or if every candidate has zero trigger overlap.
pub fn match_query(query: &str, candidates: &[Vidhi]) -> Option<Vidhi> {
    let query_tokens: HashSet<String> = tokenize_without_stopwords(query).into_iter().collect();
    if query_tokens.is_empty() {
        return None;
    }

    let mut best: Option<(f64, &Vidhi)> = None;
    let mut any_overlap = false;

    for vidhi in candidates {
        let trigger_tokens: HashSet<String> = vidhi
            .triggers
            .iter()
            .flat_map(|t| tokenize_without_stopwords(t))
            .collect();
        let similarity = jaccard(&query_tokens, &trigger_tokens);
        if similarity > 0.0 {
            any_overlap = true;
        }
        let sample = sample_beta(vidhi.success_count as f64 + 1.0, vidhi.failure_count as f64 + 1.0);
        let composite = similarity * sample;

        match &best {
            Some((best_score, _)) if *best_score >= composite => {}
            _ => best = Some((composite, vidhi)),
        }
    }

    if !any_overlap {
        return None;
    }
    best.map(|(_, v)| v.clone())
}

/// Ranks vidhis purely by a fresh Thompson draw, returning the top K.
pub fn top_k_by_thompson_sample(candidates: &[Vidhi], top_k: usize) -> Vec<Vidhi> {
    let mut scored: Vec<(f64, &Vidhi)> = candidates
        .iter()
        .map(|v| {
            let sample = sample_beta(v.success_count as f64 + 1.0, v.failure_count as f64 + 1.0);
            (sample, v)
        })
        .collect();
    scored.sort_by(|(a, _), (b, _)| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(top_k).map(|(_, v)| v.clone()).collect()
}
