//! Blockchain indexer client.
//!
//! Shields the rest of the pipeline from the external indexer's wire format:
//! the [`IndexerApi`] trait exposes normalized [`BitcoinTransaction`] shapes,
//! and [`HttpIndexer`] adapts an esplora-style REST surface onto it. A local
//! sliding-window rate limiter caps outgoing requests; exceeding it fails
//! the call and the caller decides how to degrade.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use url::Url;

use crate::error::{Result, ScreeningError};
use crate::types::{BitcoinTransaction, TxInput, TxOutput};

const SERVICE_LABEL: &str = "blockchain-indexer";
const RATE_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_RATE_LIMIT: u32 = 60;
/// Most txids ever requested for one address.
pub const MAX_ADDRESS_TXIDS: usize = 25;

/// Read access to the external blockchain indexer.
#[async_trait]
pub trait IndexerApi: Send + Sync {
    /// Fetch and normalize one transaction.
    async fn get_transaction(&self, txid: &str) -> Result<BitcoinTransaction>;

    /// Up to `limit` recent txids for an address, most recent first.
    async fn get_address_txids(&self, address: &str, limit: usize) -> Result<Vec<String>>;

    /// Balance and activity summary, used for health reporting.
    async fn get_address_info(&self, address: &str) -> Result<AddressInfo>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressInfo {
    pub address: String,
    pub balance_sats: u64,
    pub tx_count: u64,
}

/// Observed request counter for the current window.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub current: u32,
    pub limit: u32,
    /// Seconds since epoch at which the window rolls over.
    pub resets_at: i64,
}

/// Union of unique input and output addresses, in first-seen order.
pub fn extract_addresses(tx: &BitcoinTransaction) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    let all = tx
        .inputs
        .iter()
        .flat_map(|i| i.addresses.iter())
        .chain(tx.outputs.iter().flat_map(|o| o.addresses.iter()));
    for address in all {
        if seen.insert(address.to_lowercase()) {
            out.push(address.clone());
        }
    }
    out
}

struct Window {
    started: Instant,
    started_epoch: i64,
    count: u32,
}

/// Fixed 60-second window counter. The cap is advisory: a reset racing an
/// increment can briefly over- or under-count by one.
struct RateLimiter {
    limit: u32,
    window: Mutex<Window>,
}

impl RateLimiter {
    fn new(limit: u32) -> Self {
        RateLimiter {
            limit,
            window: Mutex::new(Window {
                started: Instant::now(),
                started_epoch: epoch_secs(),
                count: 0,
            }),
        }
    }

    fn try_acquire(&self) -> Result<()> {
        let mut window = self.window.lock().expect("rate limiter lock poisoned");
        if window.started.elapsed() >= RATE_WINDOW {
            window.started = Instant::now();
            window.started_epoch = epoch_secs();
            window.count = 0;
        }
        if window.count >= self.limit {
            return Err(ScreeningError::RateLimited {
                current: window.count,
                limit: self.limit,
                resets_at: window.started_epoch + RATE_WINDOW.as_secs() as i64,
            });
        }
        window.count += 1;
        Ok(())
    }

    fn status(&self) -> RateLimitStatus {
        let window = self.window.lock().expect("rate limiter lock poisoned");
        let (current, started_epoch) = if window.started.elapsed() >= RATE_WINDOW {
            (0, epoch_secs())
        } else {
            (window.count, window.started_epoch)
        };
        RateLimitStatus {
            current,
            limit: self.limit,
            resets_at: started_epoch + RATE_WINDOW.as_secs() as i64,
        }
    }
}

fn epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

// Esplora wire shapes, converted to the normalized model on arrival.

#[derive(Debug, Deserialize)]
struct EsploraTx {
    txid: String,
    #[serde(default)]
    vin: Vec<EsploraVin>,
    #[serde(default)]
    vout: Vec<EsploraVout>,
    #[serde(default)]
    size: u32,
    #[serde(default)]
    fee: u64,
    status: EsploraStatus,
}

#[derive(Debug, Deserialize)]
struct EsploraVin {
    #[serde(default)]
    txid: Option<String>,
    #[serde(default)]
    vout: Option<u32>,
    #[serde(default)]
    prevout: Option<EsploraVout>,
    #[serde(default)]
    is_coinbase: bool,
}

#[derive(Debug, Deserialize)]
struct EsploraVout {
    #[serde(default)]
    scriptpubkey: String,
    #[serde(default)]
    scriptpubkey_address: Option<String>,
    #[serde(default)]
    value: u64,
}

#[derive(Debug, Deserialize)]
struct EsploraStatus {
    #[serde(default)]
    confirmed: bool,
    #[serde(default)]
    block_height: Option<u64>,
    #[serde(default)]
    block_time: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct EsploraAddress {
    address: String,
    chain_stats: EsploraChainStats,
}

#[derive(Debug, Deserialize)]
struct EsploraChainStats {
    #[serde(default)]
    funded_txo_sum: u64,
    #[serde(default)]
    spent_txo_sum: u64,
    #[serde(default)]
    tx_count: u64,
}

impl From<EsploraTx> for BitcoinTransaction {
    fn from(tx: EsploraTx) -> Self {
        let inputs = tx
            .vin
            .into_iter()
            .map(|vin| {
                // Coinbase and unresolved prevouts normalize to no
                // addresses and value 0; they still count as graph nodes.
                let (addresses, value) = match (&vin.prevout, vin.is_coinbase) {
                    (Some(prevout), false) => (
                        prevout.scriptpubkey_address.iter().cloned().collect(),
                        prevout.value,
                    ),
                    _ => (Vec::new(), 0),
                };
                TxInput {
                    prev_txid: if vin.is_coinbase { None } else { vin.txid },
                    prev_vout: if vin.is_coinbase { None } else { vin.vout },
                    addresses,
                    value,
                }
            })
            .collect();
        let outputs = tx
            .vout
            .into_iter()
            .map(|vout| TxOutput {
                addresses: vout.scriptpubkey_address.iter().cloned().collect(),
                value: vout.value,
                script_pubkey: vout.scriptpubkey,
            })
            .collect();
        let (block_height, block_time) = if tx.status.confirmed {
            (
                tx.status.block_height.unwrap_or(0),
                tx.status.block_time.unwrap_or(0),
            )
        } else {
            (0, 0)
        };
        BitcoinTransaction {
            txid: tx.txid,
            block_height,
            block_time,
            inputs,
            outputs,
            fee: tx.fee,
            size: tx.size,
        }
    }
}

/// Rate-limited esplora adapter.
pub struct HttpIndexer {
    client: reqwest::Client,
    base_url: Url,
    limiter: RateLimiter,
}

impl HttpIndexer {
    pub fn new(base_url: Url, rate_limit: u32, timeout: Duration) -> Self {
        HttpIndexer {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .user_agent("btcscreen/0.3 (screening-core)")
                .build()
                .expect("failed to build HTTP client"),
            base_url,
            limiter: RateLimiter::new(rate_limit),
        }
    }

    pub fn rate_limit_status(&self) -> RateLimitStatus {
        self.limiter.status()
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                ScreeningError::Internal(format!("indexer URL {} cannot be a base", self.base_url))
            })?;
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        identifier: &str,
    ) -> Result<T> {
        self.limiter.try_acquire()?;
        let external = |reason: String| ScreeningError::ExternalApi {
            service: SERVICE_LABEL,
            identifier: identifier.to_string(),
            reason,
        };

        tracing::debug!(url = %url, "Indexer request");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| external(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ScreeningError::DataNotFound(identifier.to_string()));
        }
        if !response.status().is_success() {
            return Err(external(format!("HTTP {}", response.status().as_u16())));
        }
        response.json().await.map_err(|e| external(e.to_string()))
    }
}

#[async_trait]
impl IndexerApi for HttpIndexer {
    async fn get_transaction(&self, txid: &str) -> Result<BitcoinTransaction> {
        let url = self.endpoint(&["tx", txid])?;
        let tx: EsploraTx = self.get_json(url, txid).await?;
        Ok(tx.into())
    }

    async fn get_address_txids(&self, address: &str, limit: usize) -> Result<Vec<String>> {
        let url = self.endpoint(&["address", address, "txs"])?;
        let txs: Vec<EsploraTx> = self.get_json(url, address).await?;
        Ok(txs
            .into_iter()
            .take(limit.min(MAX_ADDRESS_TXIDS))
            .map(|tx| tx.txid)
            .collect())
    }

    async fn get_address_info(&self, address: &str) -> Result<AddressInfo> {
        let url = self.endpoint(&["address", address])?;
        let info: EsploraAddress = self.get_json(url, address).await?;
        Ok(AddressInfo {
            address: info.address,
            balance_sats: info
                .chain_stats
                .funded_txo_sum
                .saturating_sub(info.chain_stats.spent_txo_sum),
            tx_count: info.chain_stats.tx_count,
        })
    }
}
