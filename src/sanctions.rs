//! Sanctions index: loads OFAC SDN crypto-address data and serves O(1)
//! address and entity lookups.
//!
//! The byte source is trait-shaped so production reads a file while tests
//! inject an in-memory fixture. The parsed index is rebuilt whenever its TTL
//! lapses and swapped in atomically under a write lock; readers in flight
//! keep the generation they started with.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::{Result, ScreeningError};
use crate::types::{ListSource, SanctionEntity};

pub const DEFAULT_SANCTIONS_TTL: Duration = Duration::from_secs(60 * 60);

/// Raw shape of the consolidated sanctions JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanctionsFile {
    pub metadata: SanctionsFileMetadata,
    pub entities: Vec<SanctionsFileRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SanctionsFileMetadata {
    pub source: String,
    pub last_updated: String,
    pub version: String,
    pub total_entities: usize,
    #[serde(default)]
    pub cryptocurrencies: HashMap<String, usize>,
}

/// One source row: a single address attributed to an entity. Multiple rows
/// may share an `entityId`; the index consolidates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SanctionsFileRow {
    pub entity_id: String,
    pub entity_name: String,
    #[serde(default)]
    pub entity_type: String,
    #[serde(default)]
    pub program: String,
    #[serde(default)]
    pub cryptocurrency: String,
    pub address: String,
    #[serde(default)]
    pub remarks: String,
    pub is_active: bool,
}

/// Where the sanctions bytes come from.
#[async_trait]
pub trait SanctionsSource: Send + Sync {
    /// `Ok(None)` means the source does not exist yet; the index stays empty
    /// and available. Any other failure is a data-load error.
    async fn read(&self) -> Result<Option<Vec<u8>>>;

    /// Human-readable origin for logs.
    fn describe(&self) -> String;
}

/// File-backed sanctions source.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSource { path: path.into() }
    }
}

#[async_trait]
impl SanctionsSource for FileSource {
    async fn read(&self) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ScreeningError::DataLoad(format!(
                "failed to read sanctions file {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory fixture source for tests and embedded use.
pub struct StaticSource {
    bytes: Vec<u8>,
}

impl StaticSource {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        StaticSource {
            bytes: bytes.into(),
        }
    }
}

#[async_trait]
impl SanctionsSource for StaticSource {
    async fn read(&self) -> Result<Option<Vec<u8>>> {
        Ok(Some(self.bytes.clone()))
    }

    fn describe(&self) -> String {
        "in-memory fixture".to_string()
    }
}

/// Aggregate metadata of the active index generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMetadata {
    pub source: String,
    pub last_updated: String,
    pub version: String,
    pub total_entities: usize,
    pub total_addresses: usize,
    pub cryptocurrencies: HashMap<String, usize>,
    pub checksum: String,
    pub loaded_at: DateTime<Utc>,
}

struct IndexState {
    /// Entity id → consolidated entity.
    entities: HashMap<String, Arc<SanctionEntity>>,
    /// Lowercased address → entity ids holding it.
    by_address: HashMap<String, Vec<String>>,
    metadata: IndexMetadata,
    loaded_at: Instant,
}

/// TTL-refreshed sanctions lookup index.
pub struct SanctionsIndex {
    source: Arc<dyn SanctionsSource>,
    ttl: Duration,
    state: RwLock<Option<IndexState>>,
}

impl SanctionsIndex {
    pub fn new(source: Arc<dyn SanctionsSource>, ttl: Duration) -> Self {
        SanctionsIndex {
            source,
            ttl,
            state: RwLock::new(None),
        }
    }

    pub fn with_default_ttl(source: Arc<dyn SanctionsSource>) -> Self {
        Self::new(source, DEFAULT_SANCTIONS_TTL)
    }

    /// All active entities in the current generation.
    pub async fn all(&self) -> Result<Vec<Arc<SanctionEntity>>> {
        self.ensure_loaded().await?;
        let state = self.state.read().await;
        let state = state.as_ref().expect("index loaded above");
        Ok(state.entities.values().cloned().collect())
    }

    /// Entities whose address set contains `address`, compared
    /// case-insensitively.
    pub async fn find_by_address(&self, address: &str) -> Result<Vec<Arc<SanctionEntity>>> {
        self.ensure_loaded().await?;
        let needle = address.to_lowercase();
        let state = self.state.read().await;
        let state = state.as_ref().expect("index loaded above");
        let Some(ids) = state.by_address.get(&needle) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| state.entities.get(id).cloned())
            .collect())
    }

    /// Batched lookup; the returned map is keyed by the addresses as
    /// supplied.
    pub async fn find_by_addresses(
        &self,
        addresses: &[String],
    ) -> Result<HashMap<String, Vec<Arc<SanctionEntity>>>> {
        self.ensure_loaded().await?;
        let state = self.state.read().await;
        let state = state.as_ref().expect("index loaded above");
        let mut out = HashMap::with_capacity(addresses.len());
        for address in addresses {
            let hits = state
                .by_address
                .get(&address.to_lowercase())
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| state.entities.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default();
            out.insert(address.clone(), hits);
        }
        Ok(out)
    }

    /// Case-insensitive substring search over entity names and aliases.
    pub async fn search_by_name(&self, query: &str) -> Result<Vec<Arc<SanctionEntity>>> {
        self.ensure_loaded().await?;
        let needle = query.to_lowercase();
        let state = self.state.read().await;
        let state = state.as_ref().expect("index loaded above");
        Ok(state
            .entities
            .values()
            .filter(|e| {
                e.name.to_lowercase().contains(&needle)
                    || e.aliases
                        .iter()
                        .any(|a| a.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect())
    }

    pub async fn metadata(&self) -> Result<IndexMetadata> {
        self.ensure_loaded().await?;
        let state = self.state.read().await;
        Ok(state.as_ref().expect("index loaded above").metadata.clone())
    }

    /// Drop the active generation; the next access reloads from the source.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        *state = None;
        tracing::info!("Sanctions index cleared, next access reloads");
    }

    async fn ensure_loaded(&self) -> Result<()> {
        {
            let state = self.state.read().await;
            if let Some(state) = state.as_ref() {
                if state.loaded_at.elapsed() <= self.ttl {
                    return Ok(());
                }
            }
        }
        let fresh = self.load().await?;
        let mut state = self.state.write().await;
        // Another task may have refreshed while we parsed; last write wins,
        // both generations are equivalent.
        *state = Some(fresh);
        Ok(())
    }

    async fn load(&self) -> Result<IndexState> {
        let loaded_at = Instant::now();
        let Some(bytes) = self.source.read().await? else {
            tracing::warn!(
                source = %self.source.describe(),
                "Sanctions source missing, serving an empty index"
            );
            return Ok(IndexState {
                entities: HashMap::new(),
                by_address: HashMap::new(),
                metadata: IndexMetadata {
                    source: self.source.describe(),
                    last_updated: String::new(),
                    version: String::new(),
                    total_entities: 0,
                    total_addresses: 0,
                    cryptocurrencies: HashMap::new(),
                    checksum: String::new(),
                    loaded_at: Utc::now(),
                },
                loaded_at,
            });
        };

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let checksum = format!("{:x}", hasher.finalize());

        let file: SanctionsFile = serde_json::from_slice(&bytes)
            .map_err(|e| ScreeningError::DataLoad(format!("failed to parse sanctions JSON: {e}")))?;

        let mut entities: HashMap<String, SanctionEntity> = HashMap::new();
        for row in file.entities.into_iter().filter(|r| r.is_active) {
            let aliases = extract_aliases(&row.remarks);
            let entry = entities
                .entry(row.entity_id.clone())
                .or_insert_with(|| SanctionEntity {
                    entity_id: row.entity_id.clone(),
                    name: row.entity_name.clone(),
                    list_source: ListSource::Ofac,
                    addresses: Vec::new(),
                    aliases: Vec::new(),
                    last_updated: file.metadata.last_updated.clone(),
                    is_active: true,
                });
            let lowered = row.address.to_lowercase();
            if !lowered.is_empty()
                && !entry.addresses.iter().any(|a| a.to_lowercase() == lowered)
            {
                entry.addresses.push(row.address);
            }
            for alias in aliases {
                if !entry.aliases.contains(&alias) {
                    entry.aliases.push(alias);
                }
            }
        }

        let mut by_address: HashMap<String, Vec<String>> = HashMap::new();
        let mut total_addresses = 0usize;
        for entity in entities.values() {
            for address in &entity.addresses {
                total_addresses += 1;
                by_address
                    .entry(address.to_lowercase())
                    .or_default()
                    .push(entity.entity_id.clone());
            }
        }

        let metadata = IndexMetadata {
            source: file.metadata.source,
            last_updated: file.metadata.last_updated,
            version: file.metadata.version,
            total_entities: entities.len(),
            total_addresses,
            cryptocurrencies: file.metadata.cryptocurrencies,
            checksum,
            loaded_at: Utc::now(),
        };

        tracing::info!(
            source = %self.source.describe(),
            entities = metadata.total_entities,
            addresses = metadata.total_addresses,
            checksum = %metadata.checksum,
            "Loaded sanctions index"
        );

        Ok(IndexState {
            entities: entities
                .into_iter()
                .map(|(id, e)| (id, Arc::new(e)))
                .collect(),
            by_address,
            metadata,
            loaded_at,
        })
    }
}

/// Pull `a.k.a. '<NAME>'` / `a.k.a. "<NAME>"` occurrences out of a remarks
/// string. Names are trimmed; empty extractions are dropped.
fn extract_aliases(remarks: &str) -> Vec<String> {
    const MARKER: &str = "a.k.a.";
    let mut aliases = Vec::new();
    let mut rest = remarks;
    while let Some(at) = rest.find(MARKER) {
        rest = &rest[at + MARKER.len()..];
        let trimmed = rest.trim_start();
        let Some(quote) = trimmed.chars().next().filter(|c| *c == '\'' || *c == '"') else {
            continue;
        };
        let body = &trimmed[quote.len_utf8()..];
        let Some(end) = body.find(quote) else {
            continue;
        };
        let name = body[..end].trim();
        if !name.is_empty() {
            aliases.push(name.to_string());
        }
        rest = &body[end + quote.len_utf8()..];
    }
    aliases
}
