//! Risk scoring model.
//!
//! Pure functions only: everything here is deterministic over its inputs so
//! screening results stay reproducible for a given sanctions-index
//! generation. Scores live in `[0, 100]` throughout.

use crate::types::{ListSource, PathAnalysis, RiskLevel, SanctionMatch};

/// Score contributed by direct sanctions matches.
///
/// Any match starts at 60; multiple matches add `min(20, 5·n)`; an OFAC
/// source adds 15. The direct component is capped at 80 so indirect
/// propagation still differentiates results above it.
pub fn direct_score(matches: &[SanctionMatch]) -> u8 {
    if matches.is_empty() {
        return 0;
    }
    let mut score: u32 = 60;
    if matches.len() > 1 {
        score += (5 * matches.len() as u32).min(20);
    }
    if matches.iter().any(|m| m.list_source == ListSource::Ofac) {
        score += 15;
    }
    score.min(80) as u8
}

/// Bucket a score into a categorical risk level.
pub fn bucket(score: u8) -> RiskLevel {
    match score {
        0..=25 => RiskLevel::Low,
        26..=50 => RiskLevel::Medium,
        51..=75 => RiskLevel::High,
        _ => RiskLevel::Critical,
    }
}

/// Risk contribution of a sanctioned node found at `hop` with `match_count`
/// matching entities: `min(100, max(0, 100 − 20·hop) + min(50, 25·matches))`.
pub fn risk_contribution(hop: u32, match_count: usize) -> u8 {
    let base = 100i64 - 20 * i64::from(hop);
    let match_bonus = (25 * match_count as i64).min(50);
    (base.max(0) + match_bonus).min(100) as u8
}

/// Aggregate indirect risk over a finished walk.
///
/// Node contributions are averaged with hop-decay weights
/// `max(0.1, 1 − 0.15·hop)`, then a count penalty `min(25, 5·found)` is
/// added. Empty walks propagate nothing.
pub fn risk_propagation(analysis: &PathAnalysis) -> u8 {
    if analysis.path_nodes.is_empty() {
        return 0;
    }
    let mut weighted_sum = 0.0f64;
    let mut weight_total = 0.0f64;
    for node in &analysis.path_nodes {
        let weight = (1.0 - 0.15 * f64::from(node.hop)).max(0.1);
        weighted_sum += f64::from(node.risk_contribution) * weight;
        weight_total += weight;
    }
    let weighted_avg = weighted_sum / weight_total;
    let node_penalty = (5 * analysis.sanctioned_nodes_found).min(25) as f64;
    (weighted_avg + node_penalty).round().min(100.0) as u8
}

/// Confidence in a screening outcome.
///
/// Direct matches dominate: 70 for any (plus 10 for several), 30 for a clean
/// lookup. A walk that actually analyzed nodes adds 15, and a deep walk
/// (more than 10 nodes) adds 5 more.
pub fn confidence_score(matches: &[SanctionMatch], analysis: Option<&PathAnalysis>) -> u8 {
    let mut confidence: u32 = 0;
    if matches.is_empty() {
        confidence += 30;
    } else {
        confidence += 70;
        if matches.len() > 1 {
            confidence += 10;
        }
    }
    if let Some(analysis) = analysis {
        if analysis.total_nodes_analyzed > 0 {
            confidence += 15;
            if analysis.total_nodes_analyzed > 10 {
                confidence += 5;
            }
        }
    }
    confidence.min(100) as u8
}
