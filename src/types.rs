//! Core data model for address and transaction screening.
//!
//! Everything here is either a wire shape (serialized into audit entries and
//! service replies) or an in-memory aggregate built during a screening
//! request. Serialized names follow the camelCase convention of the
//! surrounding service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScreeningError;

/// Sanctions list a record originates from. Currently only OFAC SDN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListSource {
    #[serde(rename = "OFAC")]
    Ofac,
}

impl std::fmt::Display for ListSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListSource::Ofac => write!(f, "OFAC"),
        }
    }
}

/// A sanctioned entity consolidated from one or more source rows.
///
/// Immutable after the index load that produced it. Addresses are
/// deduplicated case-insensitively but stored as supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SanctionEntity {
    pub entity_id: String,
    pub name: String,
    pub list_source: ListSource,
    pub addresses: Vec<String>,
    pub aliases: Vec<String>,
    /// ISO date the source reported for this record.
    pub last_updated: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchType {
    #[serde(rename = "DIRECT")]
    Direct,
    #[serde(rename = "INDIRECT")]
    Indirect,
}

/// A hit linking a screened address to a sanctioned entity.
///
/// `Direct` matches always carry confidence 100.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SanctionMatch {
    pub list_source: ListSource,
    pub entity_name: String,
    pub entity_id: String,
    pub match_type: MatchType,
    pub confidence: u8,
    pub matched_address: String,
}

impl SanctionMatch {
    /// Build a direct (exact address equality) match against an entity.
    pub fn direct(entity: &SanctionEntity, matched_address: &str) -> Self {
        SanctionMatch {
            list_source: entity.list_source,
            entity_name: entity.name.clone(),
            entity_id: entity.entity_id.clone(),
            match_type: MatchType::Direct,
            confidence: 100,
            matched_address: matched_address.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "CRITICAL")]
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        };
        write!(f, "{label}")
    }
}

/// One input of a normalized Bitcoin transaction.
///
/// Coinbase inputs and inputs whose prevout the indexer could not resolve
/// have an empty address list and value 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInput {
    pub prev_txid: Option<String>,
    pub prev_vout: Option<u32>,
    pub addresses: Vec<String>,
    /// Satoshis spent by this input.
    pub value: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxOutput {
    pub addresses: Vec<String>,
    /// Satoshis paid to this output.
    pub value: u64,
    pub script_pubkey: String,
}

/// Provider-independent transaction shape produced by the indexer client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitcoinTransaction {
    pub txid: String,
    /// 0 while unconfirmed.
    pub block_height: u64,
    /// Seconds since epoch; 0 while unconfirmed.
    pub block_time: u64,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub fee: u64,
    pub size: u32,
}

/// A sanctioned address discovered during graph traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathNode {
    pub address: String,
    /// Transaction along which the address was discovered.
    pub txid: String,
    /// Hop distance from the target, in `1..=max_hops`.
    pub hop: u32,
    /// Satoshis paid from/to the address within the discovering transaction.
    pub value: u64,
    /// Milliseconds since epoch; 0 for unconfirmed transactions.
    pub timestamp: u64,
    pub risk_contribution: u8,
}

/// Outcome of a bounded breadth-first walk anchored at a target address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathAnalysis {
    pub target_address: String,
    pub max_hops: u32,
    pub total_nodes_analyzed: u32,
    pub sanctioned_nodes_found: u32,
    /// Discovery order.
    pub path_nodes: Vec<PathNode>,
    pub risk_propagation: u8,
}

impl PathAnalysis {
    pub fn empty(target: &str, max_hops: u32) -> Self {
        PathAnalysis {
            target_address: target.to_string(),
            max_hops,
            total_nodes_analyzed: 0,
            sanctioned_nodes_found: 0,
            path_nodes: Vec::new(),
            risk_propagation: 0,
        }
    }
}

/// Per-address screening outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreeningResult {
    pub address: String,
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub sanction_matches: Vec<SanctionMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_analysis: Option<PathAnalysis>,
    pub timestamp: DateTime<Utc>,
    pub confidence: u8,
    pub processing_time_ms: u64,
}

/// Which side of a transaction to screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenDirection {
    Inputs,
    Outputs,
    Both,
}

impl std::str::FromStr for ScreenDirection {
    type Err = ScreeningError;

    /// Accepts both documented spellings: `inputs|outputs|both` and the
    /// `incoming|outgoing` aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inputs" | "incoming" => Ok(ScreenDirection::Inputs),
            "outputs" | "outgoing" => Ok(ScreenDirection::Outputs),
            "both" => Ok(ScreenDirection::Both),
            _ => Err(ScreeningError::validation("direction", s)),
        }
    }
}

/// Transaction-level screening outcome aggregated over its address set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxScreeningResult {
    pub tx_hash: String,
    pub direction: ScreenDirection,
    pub input_addresses: Vec<String>,
    pub output_addresses: Vec<String>,
    pub address_results: Vec<ScreeningResult>,
    pub overall_risk_score: u8,
    pub overall_risk_level: RiskLevel,
    pub sanction_matches: Vec<SanctionMatch>,
    pub confidence: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<BitcoinTransaction>,
    pub timestamp: DateTime<Utc>,
    pub processing_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn direction_accepts_both_spellings() {
        assert_eq!(
            ScreenDirection::from_str("inputs").unwrap(),
            ScreenDirection::Inputs
        );
        assert_eq!(
            ScreenDirection::from_str("incoming").unwrap(),
            ScreenDirection::Inputs
        );
        assert_eq!(
            ScreenDirection::from_str("OUTGOING").unwrap(),
            ScreenDirection::Outputs
        );
        assert_eq!(
            ScreenDirection::from_str("both").unwrap(),
            ScreenDirection::Both
        );
        assert!(ScreenDirection::from_str("sideways").is_err());
    }

    #[test]
    fn wire_names_are_camel_case() {
        let node = PathNode {
            address: "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa".into(),
            txid: "ab".repeat(32),
            hop: 1,
            value: 50_000,
            timestamp: 1_700_000_000_000,
            risk_contribution: 100,
        };
        let json = serde_json::to_value(&node).unwrap();
        assert!(json.get("riskContribution").is_some());
        assert!(json.get("risk_contribution").is_none());
    }

    #[test]
    fn direct_match_carries_full_confidence() {
        let entity = SanctionEntity {
            entity_id: "25308".into(),
            name: "YAN, Xiaobing".into(),
            list_source: ListSource::Ofac,
            addresses: vec!["12QtD5BFwRsdNsAZY76UVE1xyCGNTojH9h".into()],
            aliases: vec![],
            last_updated: "2024-01-01".into(),
            is_active: true,
        };
        let m = SanctionMatch::direct(&entity, "12QtD5BFwRsdNsAZY76UVE1xyCGNTojH9h");
        assert_eq!(m.confidence, 100);
        assert_eq!(m.match_type, MatchType::Direct);
    }
}
