//! Address screening: direct sanctions matching plus optional graph-walk
//! risk propagation.

use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::audit::{AuditAction, AuditEntry, AuditLog};
use crate::error::Result;
use crate::risk;
use crate::sanctions::SanctionsIndex;
use crate::types::{PathAnalysis, RiskLevel, SanctionMatch, ScreeningResult};
use crate::validation;
use crate::walker::{PathWalker, MAX_HOPS_CEILING};

/// Weight of indirect (walker) risk in the final address score.
const INDIRECT_WEIGHT: f64 = 0.6;
/// Addresses screened concurrently per batch chunk.
const BATCH_CHUNK: usize = 10;
/// Pause between batch chunks.
const BATCH_PAUSE_MS: u64 = 100;
/// Invalid batch inputs reported in logs before truncating.
const INVALID_LOG_BUDGET: usize = 5;

/// Screens a single address against the sanctions index, optionally
/// propagating indirect risk through the [`PathWalker`].
#[derive(Clone)]
pub struct AddressScreener {
    sanctions: Arc<SanctionsIndex>,
    walker: Arc<PathWalker>,
    audit: Arc<AuditLog>,
}

impl AddressScreener {
    pub fn new(
        sanctions: Arc<SanctionsIndex>,
        walker: Arc<PathWalker>,
        audit: Arc<AuditLog>,
    ) -> Self {
        AddressScreener {
            sanctions,
            walker,
            audit,
        }
    }

    /// Screen one address. See [`AddressScreener::screen_with_cancel`].
    pub async fn screen(
        &self,
        address: &str,
        include_walk: bool,
        max_hops: u32,
        correlation_id: &str,
    ) -> Result<ScreeningResult> {
        self.screen_with_cancel(
            address,
            include_walk,
            max_hops,
            correlation_id,
            &CancellationToken::new(),
        )
        .await
    }

    /// Screen one address, propagating `cancel` into any graph walk.
    ///
    /// Walker failure degrades rather than fails: the result keeps its
    /// direct-match score and simply omits the path analysis. Validation
    /// failures abort before any lookup.
    #[instrument(skip_all, err, fields(address = %address, include_walk = include_walk, correlation_id = %correlation_id))]
    pub async fn screen_with_cancel(
        &self,
        address: &str,
        include_walk: bool,
        max_hops: u32,
        correlation_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ScreeningResult> {
        let started = Instant::now();
        validation::require_valid_address(address)?;

        let mut entry = AuditEntry::new(AuditAction::ScreenAddress, address, correlation_id);

        let entities = match self.sanctions.find_by_address(address).await {
            Ok(entities) => entities,
            Err(e) => {
                entry = entry
                    .failed(e.to_string())
                    .with_processing_time(started.elapsed().as_millis() as u64);
                self.audit.record(entry).await;
                return Err(e);
            }
        };
        let matches: Vec<SanctionMatch> = entities
            .iter()
            .map(|entity| SanctionMatch::direct(entity, address))
            .collect();

        let mut score = f64::from(risk::direct_score(&matches));
        let mut path_analysis: Option<PathAnalysis> = None;

        if include_walk {
            let hops = max_hops.clamp(1, MAX_HOPS_CEILING);
            match self.walker.analyze(address, hops, cancel).await {
                Ok(analysis) => {
                    score += INDIRECT_WEIGHT * f64::from(analysis.risk_propagation);
                    path_analysis = Some(analysis);
                }
                Err(e) => {
                    tracing::warn!(
                        address = %address,
                        error = %e,
                        "Path walk failed, continuing with direct matches only"
                    );
                    entry = entry.with_result("walkFailed", Value::from(true));
                }
            }
        }

        let risk_score = score.round().min(100.0) as u8;
        let risk_level = risk::bucket(risk_score);
        let confidence = risk::confidence_score(&matches, path_analysis.as_ref());
        let processing_time_ms = started.elapsed().as_millis() as u64;

        let result = ScreeningResult {
            address: address.to_string(),
            risk_score,
            risk_level,
            sanction_matches: matches,
            path_analysis,
            timestamp: chrono::Utc::now(),
            confidence,
            processing_time_ms,
        };

        entry = entry
            .with_result("riskScore", Value::from(result.risk_score))
            .with_result("riskLevel", Value::from(result.risk_level.to_string()))
            .with_result("matchCount", Value::from(result.sanction_matches.len()))
            .with_result(
                "pathNodes",
                Value::from(
                    result
                        .path_analysis
                        .as_ref()
                        .map(|a| a.path_nodes.len())
                        .unwrap_or(0),
                ),
            )
            .with_processing_time(processing_time_ms);
        self.audit.record(entry).await;

        Ok(result)
    }

    /// Screen many addresses, ten at a time with a short pause between
    /// chunks.
    ///
    /// Invalid inputs are dropped (the first few are logged); a per-address
    /// screening failure yields a zero-score stub so the output stays
    /// positionally aligned with the valid inputs.
    #[instrument(skip_all, fields(total = addresses.len(), correlation_id = %correlation_id))]
    pub async fn screen_batch(
        &self,
        addresses: &[String],
        include_walk: bool,
        max_hops: u32,
        correlation_id: &str,
    ) -> Result<Vec<ScreeningResult>> {
        let started = Instant::now();
        let (valid, invalid): (Vec<&String>, Vec<&String>) = addresses
            .iter()
            .partition(|a| validation::is_valid_address(a));

        if !invalid.is_empty() {
            let sample: Vec<&str> = invalid
                .iter()
                .take(INVALID_LOG_BUDGET)
                .map(|s| s.as_str())
                .collect();
            tracing::warn!(
                invalid = invalid.len(),
                sample = ?sample,
                "Dropping invalid addresses from batch"
            );
        }

        let mut results: Vec<ScreeningResult> = Vec::with_capacity(valid.len());
        for chunk in valid.chunks(BATCH_CHUNK) {
            if !results.is_empty() {
                tokio::time::sleep(std::time::Duration::from_millis(BATCH_PAUSE_MS)).await;
            }

            let mut set = JoinSet::new();
            for (offset, address) in chunk.iter().enumerate() {
                let screener = self.clone();
                let address = (*address).clone();
                let correlation_id = correlation_id.to_string();
                set.spawn(async move {
                    let outcome = screener
                        .screen(&address, include_walk, max_hops, &correlation_id)
                        .await;
                    (offset, address, outcome)
                });
            }

            let mut chunk_results: Vec<Option<ScreeningResult>> = vec![None; chunk.len()];
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((offset, _, Ok(result))) => chunk_results[offset] = Some(result),
                    Ok((offset, address, Err(e))) => {
                        tracing::warn!(
                            address = %address,
                            error = %e,
                            "Batch entry failed, emitting stub result"
                        );
                        chunk_results[offset] = Some(stub_result(&address));
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Batch screening task failed");
                    }
                }
            }
            // Positional alignment guarantee: any slot left empty (a task
            // that never reported back) still yields a stub.
            results.extend(
                chunk_results
                    .into_iter()
                    .enumerate()
                    .map(|(i, r)| r.unwrap_or_else(|| stub_result(chunk[i]))),
            );
        }

        let entry = AuditEntry::new(
            AuditAction::ScreenAddressBatch,
            format!("bulk_{}_items", addresses.len()),
            correlation_id,
        )
        .with_result("validCount", Value::from(valid.len()))
        .with_result("invalidCount", Value::from(invalid.len()))
        .with_result(
            "highRiskCount",
            Value::from(
                results
                    .iter()
                    .filter(|r| r.risk_level >= RiskLevel::High)
                    .count(),
            ),
        )
        .with_processing_time(started.elapsed().as_millis() as u64);
        self.audit.record(entry).await;

        Ok(results)
    }
}

/// Placeholder emitted when one batch entry fails: zero risk, zero
/// confidence, so downstream consumers can tell it from a clean screen.
fn stub_result(address: &str) -> ScreeningResult {
    ScreeningResult {
        address: address.to_string(),
        risk_score: 0,
        risk_level: RiskLevel::Low,
        sanction_matches: Vec::new(),
        path_analysis: None,
        timestamp: chrono::Utc::now(),
        confidence: 0,
        processing_time_ms: 0,
    }
}
