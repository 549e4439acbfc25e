//! Bounded breadth-first transaction-graph walker.
//!
//! Starting from a target address, the walker expands hop by hop through the
//! transaction graph served by the indexer, deduplicating visited addresses
//! and transactions, and emits a [`PathNode`] for every sanctioned address it
//! encounters. Fan-out is bounded everywhere: per-hop transaction budget,
//! per-batch concurrency, per-transaction expansion width.
//!
//! Failure model: the seed fetch is the only call allowed to fail the walk.
//! Every fetch past the seed is skipped on error, so a walk that started
//! always produces a well-formed [`PathAnalysis`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ScreeningError};
use crate::indexer::{extract_addresses, IndexerApi};
use crate::risk;
use crate::sanctions::SanctionsIndex;
use crate::types::{BitcoinTransaction, PathAnalysis, PathNode};

pub const MAX_HOPS_CEILING: u32 = 10;
pub const DEFAULT_WALK_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

/// Txids fetched for the target address when seeding the walk.
const TARGET_TXID_LIMIT: usize = 25;
/// Transactions examined per hop.
const HOP_TX_BUDGET: usize = 10;
/// Concurrent in-flight transaction fetches within a hop.
const FETCH_BATCH: usize = 5;
/// Unvisited addresses expanded per transaction.
const EXPANSION_WIDTH: usize = 3;
/// Txids fetched per expanded (non-target) address.
const EXPANSION_TXID_LIMIT: usize = 5;

struct CachedWalk {
    analysis: PathAnalysis,
    cached_at: Instant,
}

/// Multi-hop risk-propagation walker with a per-`(target, max_hops)` memo
/// cache.
///
/// There is deliberately no per-key single-flight guard: duplicate
/// concurrent walks are idempotent and converge to the same cached entry.
pub struct PathWalker {
    indexer: Arc<dyn IndexerApi>,
    sanctions: Arc<SanctionsIndex>,
    cache: RwLock<HashMap<(String, u32), CachedWalk>>,
    cache_ttl: Duration,
}

impl PathWalker {
    pub fn new(indexer: Arc<dyn IndexerApi>, sanctions: Arc<SanctionsIndex>) -> Self {
        Self::with_cache_ttl(indexer, sanctions, DEFAULT_WALK_CACHE_TTL)
    }

    pub fn with_cache_ttl(
        indexer: Arc<dyn IndexerApi>,
        sanctions: Arc<SanctionsIndex>,
        cache_ttl: Duration,
    ) -> Self {
        PathWalker {
            indexer,
            sanctions,
            cache: RwLock::new(HashMap::new()),
            cache_ttl,
        }
    }

    /// Walk the transaction graph around `target` up to `max_hops` hops.
    ///
    /// `max_hops` is clamped to [`MAX_HOPS_CEILING`]; zero short-circuits to
    /// an empty analysis without touching the indexer. Cancellation stops
    /// further fetches and discards the partial walk.
    pub async fn analyze(
        &self,
        target: &str,
        max_hops: u32,
        cancel: &CancellationToken,
    ) -> Result<PathAnalysis> {
        if max_hops == 0 {
            return Ok(PathAnalysis::empty(target, 0));
        }
        let max_hops = max_hops.min(MAX_HOPS_CEILING);
        let key = (target.to_lowercase(), max_hops);

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&key) {
                if cached.cached_at.elapsed() <= self.cache_ttl {
                    tracing::debug!(address = %target, max_hops, "Walk cache hit");
                    return Ok(cached.analysis.clone());
                }
            }
        }

        let analysis = self.walk(target, max_hops, cancel).await?;

        let mut cache = self.cache.write().await;
        cache.insert(
            key,
            CachedWalk {
                analysis: analysis.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(analysis)
    }

    async fn walk(
        &self,
        target: &str,
        max_hops: u32,
        cancel: &CancellationToken,
    ) -> Result<PathAnalysis> {
        let started = Instant::now();
        let mut analysis = PathAnalysis::empty(target, max_hops);
        let mut visited_addresses: HashSet<String> = HashSet::new();
        let mut visited_transactions: HashSet<String> = HashSet::new();
        visited_addresses.insert(target.to_lowercase());

        if cancel.is_cancelled() {
            return Err(ScreeningError::Internal("walk cancelled".to_string()));
        }

        // The seed fetch is the one fatal call: without it there is no graph
        // to walk and the caller falls back to direct-match-only scoring.
        let mut frontier = self
            .indexer
            .get_address_txids(target, TARGET_TXID_LIMIT)
            .await?;

        for hop in 0..max_hops {
            if frontier.is_empty() {
                break;
            }
            if cancel.is_cancelled() {
                return Err(ScreeningError::Internal("walk cancelled".to_string()));
            }

            frontier.truncate(HOP_TX_BUDGET);
            let mut next_frontier: Vec<String> = Vec::new();

            for batch in frontier.chunks(FETCH_BATCH) {
                if cancel.is_cancelled() {
                    return Err(ScreeningError::Internal("walk cancelled".to_string()));
                }
                for tx in self.fetch_batch(batch).await {
                    if !visited_transactions.insert(tx.txid.clone()) {
                        continue;
                    }
                    analysis.total_nodes_analyzed += 1;
                    self.inspect_transaction(
                        &tx,
                        hop,
                        max_hops,
                        &mut visited_addresses,
                        &mut next_frontier,
                        &mut analysis,
                        cancel,
                    )
                    .await?;
                }
            }

            frontier = next_frontier;
        }

        analysis.risk_propagation = risk::risk_propagation(&analysis);
        tracing::info!(
            address = %target,
            max_hops,
            nodes_analyzed = analysis.total_nodes_analyzed,
            sanctioned_found = analysis.sanctioned_nodes_found,
            risk_propagation = analysis.risk_propagation,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Path walk complete"
        );
        Ok(analysis)
    }

    /// Fetch one batch of transactions concurrently. Results come back in
    /// completion order; failed fetches are logged and dropped.
    async fn fetch_batch(&self, txids: &[String]) -> Vec<BitcoinTransaction> {
        let mut set = JoinSet::new();
        for txid in txids {
            let indexer = Arc::clone(&self.indexer);
            let txid = txid.clone();
            set.spawn(async move {
                let result = indexer.get_transaction(&txid).await;
                (txid, result)
            });
        }

        let mut fetched = Vec::with_capacity(txids.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(tx))) => fetched.push(tx),
                Ok((txid, Err(e))) => {
                    tracing::warn!(txid = %txid, error = %e, "Skipping unfetchable transaction");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Transaction fetch task failed");
                }
            }
        }
        fetched
    }

    /// Match every unvisited address of `tx` against the sanctions index and
    /// queue up to [`EXPANSION_WIDTH`] of them for the next hop.
    #[allow(clippy::too_many_arguments)]
    async fn inspect_transaction(
        &self,
        tx: &BitcoinTransaction,
        hop: u32,
        max_hops: u32,
        visited_addresses: &mut HashSet<String>,
        next_frontier: &mut Vec<String>,
        analysis: &mut PathAnalysis,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let addresses = extract_addresses(tx);
        let unvisited: Vec<&String> = addresses
            .iter()
            .filter(|a| !visited_addresses.contains(&a.to_lowercase()))
            .collect();

        for address in &unvisited {
            let entities = self.sanctions.find_by_address(address).await?;
            if entities.is_empty() {
                continue;
            }
            let node = PathNode {
                address: (*address).clone(),
                txid: tx.txid.clone(),
                hop: hop + 1,
                value: address_value(tx, address),
                timestamp: tx.block_time * 1000,
                risk_contribution: risk::risk_contribution(hop + 1, entities.len()),
            };
            tracing::warn!(
                address = %address,
                txid = %tx.txid,
                hop = node.hop,
                entities = entities.len(),
                "Sanctioned address on transaction path"
            );
            analysis.path_nodes.push(node);
            analysis.sanctioned_nodes_found += 1;
        }

        if hop + 1 < max_hops {
            for address in unvisited.into_iter().take(EXPANSION_WIDTH) {
                if cancel.is_cancelled() {
                    return Err(ScreeningError::Internal("walk cancelled".to_string()));
                }
                visited_addresses.insert(address.to_lowercase());
                match self
                    .indexer
                    .get_address_txids(address, EXPANSION_TXID_LIMIT)
                    .await
                {
                    Ok(txids) => next_frontier.extend(txids),
                    Err(e) => {
                        tracing::warn!(
                            address = %address,
                            error = %e,
                            "Skipping unexpandable address"
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

/// Satoshis moved from or to `address` within `tx`.
fn address_value(tx: &BitcoinTransaction, address: &str) -> u64 {
    let needle = address.to_lowercase();
    let holds = |addresses: &[String]| addresses.iter().any(|a| a.to_lowercase() == needle);
    let spent: u64 = tx
        .inputs
        .iter()
        .filter(|i| holds(&i.addresses))
        .map(|i| i.value)
        .sum();
    let received: u64 = tx
        .outputs
        .iter()
        .filter(|o| holds(&o.addresses))
        .map(|o| o.value)
        .sum();
    spent + received
}
