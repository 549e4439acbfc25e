//! Bitcoin sanctions screening core.
//!
//! Screens Bitcoin addresses and transactions against OFAC SDN
//! cryptocurrency sanctions data and, on request, propagates risk through a
//! bounded multi-hop walk of the transaction graph served by an external
//! blockchain indexer.
//!
//! The pipeline, leaves first:
//! - [`validation`] — format checks for addresses and transaction hashes
//! - [`sanctions`] — TTL-refreshed address→entity lookup index
//! - [`indexer`] — rate-limited, normalizing client for the external indexer
//! - [`walker`] — bounded breadth-first graph traversal with a memo cache
//! - [`risk`] — pure scoring model (direct score, propagation, confidence)
//! - [`screener`] / [`tx_screener`] — the two screening entry points
//! - [`audit`] — day-bucketed append-only audit trail
//!
//! [`service::ScreeningService`] wires the pieces together; both the
//! sanctions source and the indexer are trait-shaped for dependency
//! injection.
//!
//! ```rust,ignore
//! let service = ScreeningService::builder(Config::from_env()).build()?;
//! let result = service
//!     .addresses()
//!     .screen("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", true, 5, &correlation_id)
//!     .await?;
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod indexer;
pub mod risk;
pub mod sanctions;
pub mod screener;
pub mod service;
pub mod tx_screener;
pub mod types;
pub mod validation;
pub mod walker;

pub use audit::{AuditAction, AuditEntry, AuditLog, AuditStats};
pub use config::Config;
pub use error::{ErrorKind, Result, ScreeningError};
pub use indexer::{AddressInfo, HttpIndexer, IndexerApi, RateLimitStatus};
pub use sanctions::{FileSource, SanctionsIndex, SanctionsSource, StaticSource};
pub use screener::AddressScreener;
pub use service::{ScreeningService, ScreeningServiceBuilder};
pub use tx_screener::TransactionScreener;
pub use types::{
    BitcoinTransaction, ListSource, MatchType, PathAnalysis, PathNode, RiskLevel, SanctionEntity,
    SanctionMatch, ScreenDirection, ScreeningResult, TxScreeningResult,
};
pub use walker::PathWalker;
