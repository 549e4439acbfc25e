//! Transaction screening: resolve a transaction to its address set, screen
//! each side through the address screener, and aggregate an overall risk.
//!
//! Graph walking is deliberately disabled for the per-address screens here;
//! a transaction already names its counterparties, and recursive walking
//! from every one of them would multiply indexer load per request.

use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::instrument;

use crate::audit::{AuditAction, AuditEntry, AuditLog};
use crate::error::Result;
use crate::indexer::IndexerApi;
use crate::risk;
use crate::screener::AddressScreener;
use crate::types::{
    RiskLevel, SanctionMatch, ScreenDirection, ScreeningResult, TxScreeningResult,
};
use crate::validation;

/// Hop bound handed to the address screener; unused while walks stay
/// disabled but pinned here for a future walking mode.
const TX_SCREEN_MAX_HOPS: u32 = 3;
/// Penalty step per HIGH/CRITICAL address, capped at 25.
const HIGH_RISK_PENALTY_STEP: u32 = 10;

pub struct TransactionScreener {
    indexer: Arc<dyn IndexerApi>,
    screener: AddressScreener,
    audit: Arc<AuditLog>,
}

impl TransactionScreener {
    pub fn new(
        indexer: Arc<dyn IndexerApi>,
        screener: AddressScreener,
        audit: Arc<AuditLog>,
    ) -> Self {
        TransactionScreener {
            indexer,
            screener,
            audit,
        }
    }

    /// Screen the addresses on one side (or both sides) of a transaction.
    #[instrument(skip_all, err, fields(tx_hash = %tx_hash, direction = ?direction, correlation_id = %correlation_id))]
    pub async fn screen(
        &self,
        tx_hash: &str,
        direction: ScreenDirection,
        include_metadata: bool,
        correlation_id: &str,
    ) -> Result<TxScreeningResult> {
        let started = Instant::now();
        validation::require_valid_tx_hash(tx_hash)?;

        let subject = format!("tx:{tx_hash}");
        let tx = match self.indexer.get_transaction(tx_hash).await {
            Ok(tx) => tx,
            Err(e) => {
                let entry = AuditEntry::new(AuditAction::ScreenTransaction, &subject, correlation_id)
                    .with_tx_hash(tx_hash)
                    .failed(e.to_string())
                    .with_processing_time(started.elapsed().as_millis() as u64);
                self.audit.record(entry).await;
                return Err(e);
            }
        };

        let input_addresses = unique_addresses(tx.inputs.iter().flat_map(|i| i.addresses.iter()));
        let output_addresses = unique_addresses(tx.outputs.iter().flat_map(|o| o.addresses.iter()));

        let to_screen: Vec<String> = match direction {
            ScreenDirection::Inputs => input_addresses.clone(),
            ScreenDirection::Outputs => output_addresses.clone(),
            ScreenDirection::Both => {
                unique_addresses(input_addresses.iter().chain(output_addresses.iter()))
            }
        };
        let total_addresses = to_screen.len();

        let address_results = self.screen_addresses(&to_screen, correlation_id).await;
        let screened = address_results.len();

        let overall_risk_score = aggregate_score(&address_results);
        let overall_risk_level = risk::bucket(overall_risk_score);
        let confidence = aggregate_confidence(&address_results, screened, total_addresses);

        let mut sanction_matches: Vec<SanctionMatch> = Vec::new();
        for result in &address_results {
            sanction_matches.extend(result.sanction_matches.iter().cloned());
        }

        let result = TxScreeningResult {
            tx_hash: tx_hash.to_string(),
            direction,
            input_addresses,
            output_addresses,
            address_results,
            overall_risk_score,
            overall_risk_level,
            sanction_matches,
            confidence,
            transaction: include_metadata.then_some(tx),
            timestamp: chrono::Utc::now(),
            processing_time_ms: started.elapsed().as_millis() as u64,
        };

        let entry = AuditEntry::new(AuditAction::ScreenTransaction, &subject, correlation_id)
            .with_tx_hash(tx_hash)
            .with_result("overallRiskScore", Value::from(result.overall_risk_score))
            .with_result(
                "overallRiskLevel",
                Value::from(result.overall_risk_level.to_string()),
            )
            .with_result("addressesScreened", Value::from(screened))
            .with_result("totalAddresses", Value::from(total_addresses))
            .with_result("matchCount", Value::from(result.sanction_matches.len()))
            .with_processing_time(result.processing_time_ms);
        self.audit.record(entry).await;

        Ok(result)
    }

    /// Screen several transactions sequentially, skipping failures.
    ///
    /// Sequential on purpose: each transaction fans out over its own address
    /// set already, and stacking transactions concurrently would trip the
    /// indexer rate limit on modestly sized batches.
    #[instrument(skip_all, fields(total = tx_hashes.len(), correlation_id = %correlation_id))]
    pub async fn screen_batch(
        &self,
        tx_hashes: &[String],
        direction: ScreenDirection,
        include_metadata: bool,
        correlation_id: &str,
    ) -> Result<Vec<TxScreeningResult>> {
        let started = Instant::now();
        let mut results = Vec::with_capacity(tx_hashes.len());
        for tx_hash in tx_hashes {
            match self
                .screen(tx_hash, direction, include_metadata, correlation_id)
                .await
            {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::warn!(
                        tx_hash = %tx_hash,
                        error = %e,
                        "Skipping transaction in batch"
                    );
                }
            }
        }

        let entry = AuditEntry::new(
            AuditAction::ScreenTransactionBatch,
            format!("bulk_{}_items", tx_hashes.len()),
            correlation_id,
        )
        .with_result("screened", Value::from(results.len()))
        .with_result("skipped", Value::from(tx_hashes.len() - results.len()))
        .with_processing_time(started.elapsed().as_millis() as u64);
        self.audit.record(entry).await;

        Ok(results)
    }

    /// Fan the address set out to the address screener, walks disabled.
    /// Failed screens are logged and dropped; they count against the
    /// completeness ratio instead of the score.
    async fn screen_addresses(
        &self,
        addresses: &[String],
        correlation_id: &str,
    ) -> Vec<ScreeningResult> {
        let mut set = JoinSet::new();
        for (offset, address) in addresses.iter().enumerate() {
            let screener = self.screener.clone();
            let address = address.clone();
            let correlation_id = correlation_id.to_string();
            set.spawn(async move {
                let outcome = screener
                    .screen(&address, false, TX_SCREEN_MAX_HOPS, &correlation_id)
                    .await;
                (offset, address, outcome)
            });
        }

        let mut slots: Vec<Option<ScreeningResult>> = vec![None; addresses.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((offset, _, Ok(result))) => slots[offset] = Some(result),
                Ok((_, address, Err(e))) => {
                    tracing::warn!(
                        address = %address,
                        error = %e,
                        "Address screen failed during transaction screening"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "Address screening task failed");
                }
            }
        }
        slots.into_iter().flatten().collect()
    }
}

fn unique_addresses<'a>(addresses: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for address in addresses {
        if seen.insert(address.to_lowercase()) {
            out.push(address.clone());
        }
    }
    out
}

/// Confidence-weighted average of the per-address scores plus a capped
/// penalty per HIGH/CRITICAL address.
fn aggregate_score(results: &[ScreeningResult]) -> u8 {
    if results.is_empty() {
        return 0;
    }
    let mut weighted_sum = 0.0f64;
    let mut weight_total = 0.0f64;
    for result in results {
        let weight = (result.sanction_matches.len().max(1) as f64)
            * (f64::from(result.confidence) / 100.0);
        weighted_sum += f64::from(result.risk_score) * weight;
        weight_total += weight;
    }
    let avg_weighted = if weight_total > 0.0 {
        weighted_sum / weight_total
    } else {
        0.0
    };

    let high_risk_count = results
        .iter()
        .filter(|r| matches!(r.risk_level, RiskLevel::High | RiskLevel::Critical))
        .count() as u32;
    let high_risk_penalty = (HIGH_RISK_PENALTY_STEP * high_risk_count).min(25) as f64;

    (avg_weighted + high_risk_penalty).round().clamp(0.0, 100.0) as u8
}

/// `min(100, round(60 + 20·completeness + 20·avg_confidence/100))`, with
/// completeness 1 when the transaction had no screenable addresses.
fn aggregate_confidence(results: &[ScreeningResult], screened: usize, total: usize) -> u8 {
    let completeness = if total == 0 {
        1.0
    } else {
        screened as f64 / total as f64
    };
    let avg_confidence = if results.is_empty() {
        0.0
    } else {
        results.iter().map(|r| f64::from(r.confidence)).sum::<f64>() / results.len() as f64
    };
    (60.0 + 20.0 * completeness + 20.0 * avg_confidence / 100.0)
        .round()
        .min(100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn result(score: u8, level: RiskLevel, confidence: u8, matches: usize) -> ScreeningResult {
        let matches = (0..matches)
            .map(|i| SanctionMatch {
                list_source: crate::types::ListSource::Ofac,
                entity_name: "Entity".into(),
                entity_id: format!("{i}"),
                match_type: crate::types::MatchType::Direct,
                confidence: 100,
                matched_address: "12QtD5BFwRsdNsAZY76UVE1xyCGNTojH9h".into(),
            })
            .collect();
        ScreeningResult {
            address: "12QtD5BFwRsdNsAZY76UVE1xyCGNTojH9h".into(),
            risk_score: score,
            risk_level: level,
            sanction_matches: matches,
            path_analysis: None,
            timestamp: Utc::now(),
            confidence,
            processing_time_ms: 1,
        }
    }

    #[test]
    fn aggregation_matches_worked_example() {
        // One HIGH output (75, confidence 70) and one clean output
        // (0, confidence 30): weighted average 52.5, penalty 10.
        let results = vec![
            result(75, RiskLevel::High, 70, 1),
            result(0, RiskLevel::Low, 30, 0),
        ];
        assert_eq!(aggregate_score(&results), 63);
        assert_eq!(risk::bucket(63), RiskLevel::High);
    }

    #[test]
    fn aggregation_of_empty_result_set_is_zero() {
        assert_eq!(aggregate_score(&[]), 0);
        assert_eq!(aggregate_confidence(&[], 0, 0), 80);
    }

    #[test]
    fn high_risk_penalty_is_capped() {
        let results: Vec<ScreeningResult> = (0..5)
            .map(|_| result(80, RiskLevel::Critical, 70, 1))
            .collect();
        // Average is 80; the penalty would be 50 but caps at 25, and the
        // total clamps at 100.
        assert_eq!(aggregate_score(&results), 100);
    }

    #[test]
    fn confidence_blends_completeness_and_result_confidence() {
        let results = vec![
            result(75, RiskLevel::High, 70, 1),
            result(0, RiskLevel::Low, 30, 0),
        ];
        // 60 + 20·1 + 20·0.5 = 90.
        assert_eq!(aggregate_confidence(&results, 2, 2), 90);
        // One of two screens failed: 60 + 10 + 14 = 84.
        assert_eq!(
            aggregate_confidence(&results[..1], 1, 2),
            (60.0f64 + 10.0 + 20.0 * 0.7).round() as u8
        );
    }

    #[test]
    fn unique_addresses_preserve_first_seen_order() {
        let a = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa".to_string();
        let b = "3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy".to_string();
        let shouting = a.to_uppercase();
        let addresses = vec![&a, &b, &shouting, &a];
        let unique = unique_addresses(addresses.into_iter());
        assert_eq!(unique, vec![a, b]);
    }
}
