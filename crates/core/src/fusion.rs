use crate::models::SearchCandidate;
use std::collections::HashMap;

/// RRF smoothing constant. Larger values flatten the influence of rank,
/// smaller values let rank-1 results dominate.
pub const RRF_K: f64 = 60.0;

/// Merge independently-scored ranked lists with Reciprocal Rank Fusion.
///
/// Each candidate at 0-indexed rank `r` contributes `1 / (K + r + 1)`;
/// a chunk appearing in several lists accumulates all contributions.
/// Deduplication keys strictly on the chunk's stable id; candidates
/// without one do not exist in this engine. Output is sorted descending by
/// fused score; ties keep first-appearance order across the lists as
/// passed, so the earlier list wins.
pub fn fuse(lists: &[Vec<SearchCandidate>]) -> Vec<SearchCandidate> {
    fuse_with_k(lists, RRF_K)
}

pub fn fuse_with_k(lists: &[Vec<SearchCandidate>], k: f64) -> Vec<SearchCandidate> {
    let mut by_id: HashMap<&str, usize> = HashMap::new();
    // Slot index doubles as first-appearance order, the tie-break key.
    let mut merged: Vec<SearchCandidate> = Vec::new();

    for list in lists {
        for (rank, candidate) in list.iter().enumerate() {
            let contribution = 1.0 / (k + rank as f64 + 1.0);
            match by_id.get(candidate.chunk.id.as_str()) {
                Some(&slot) => merged[slot].fused_score += contribution,
                None => {
                    let mut kept = candidate.clone();
                    kept.fused_score = contribution;
                    by_id.insert(candidate.chunk.id.as_str(), merged.len());
                    merged.push(kept);
                }
            }
        }
    }

    let mut order: Vec<usize> = (0..merged.len()).collect();
    order.sort_by(|&a, &b| {
        merged[b]
            .fused_score
            .total_cmp(&merged[a].fused_score)
            .then(a.cmp(&b))
    });

    let mut taken: Vec<Option<SearchCandidate>> = merged.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|slot| taken[slot].take())
        .collect()
}
