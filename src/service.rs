//! One-time assembly of the screening pipeline.
//!
//! The service owns the process-wide singletons (sanctions index, indexer
//! client, walker, audit log) and hands out the two screener entry points.
//! Both the sanctions source and the indexer are injectable, so tests and
//! embedders can swap fixtures in without touching the wiring.

use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::audit::AuditLog;
use crate::config::Config;
use crate::error::{Result, ScreeningError};
use crate::indexer::{HttpIndexer, IndexerApi};
use crate::sanctions::{FileSource, SanctionsIndex, SanctionsSource};
use crate::screener::AddressScreener;
use crate::tx_screener::TransactionScreener;
use crate::walker::PathWalker;

/// Builder for a [`ScreeningService`].
///
/// Defaults come from the supplied [`Config`]; the sanctions source and the
/// indexer client can each be overridden before `build()`.
pub struct ScreeningServiceBuilder {
    config: Config,
    sanctions_source: Option<Arc<dyn SanctionsSource>>,
    indexer: Option<Arc<dyn IndexerApi>>,
}

impl ScreeningServiceBuilder {
    pub fn new(config: Config) -> Self {
        ScreeningServiceBuilder {
            config,
            sanctions_source: None,
            indexer: None,
        }
    }

    pub fn with_sanctions_source(mut self, source: Arc<dyn SanctionsSource>) -> Self {
        self.sanctions_source = Some(source);
        self
    }

    pub fn with_indexer(mut self, indexer: Arc<dyn IndexerApi>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    pub fn build(self) -> Result<ScreeningService> {
        let config = self.config;

        let sanctions_source = self
            .sanctions_source
            .unwrap_or_else(|| Arc::new(FileSource::new(config.sanctions_path())));
        let sanctions = Arc::new(SanctionsIndex::new(
            sanctions_source,
            Duration::from_secs(config.risk_cache_ttl_hours * 60 * 60),
        ));

        let indexer: Arc<dyn IndexerApi> = match self.indexer {
            Some(indexer) => indexer,
            None => {
                let base_url = Url::parse(&config.indexer_url).map_err(|e| {
                    ScreeningError::Internal(format!(
                        "invalid indexer URL {}: {e}",
                        config.indexer_url
                    ))
                })?;
                Arc::new(HttpIndexer::new(
                    base_url,
                    config.api_rate_limit,
                    Duration::from_secs(config.request_timeout_secs),
                ))
            }
        };

        let walker = Arc::new(PathWalker::new(Arc::clone(&indexer), Arc::clone(&sanctions)));
        let audit = Arc::new(AuditLog::new(config.audit_logs_dir.clone()));

        let addresses = AddressScreener::new(
            Arc::clone(&sanctions),
            Arc::clone(&walker),
            Arc::clone(&audit),
        );
        let transactions =
            TransactionScreener::new(Arc::clone(&indexer), addresses.clone(), Arc::clone(&audit));

        tracing::info!(
            indexer_url = %config.indexer_url,
            rate_limit = config.api_rate_limit,
            default_max_hops = config.default_max_hops,
            "Screening service assembled"
        );

        Ok(ScreeningService {
            config,
            sanctions,
            walker,
            audit,
            addresses,
            transactions,
        })
    }
}

/// Assembled screening pipeline: explicit handles, no hidden globals.
pub struct ScreeningService {
    config: Config,
    sanctions: Arc<SanctionsIndex>,
    walker: Arc<PathWalker>,
    audit: Arc<AuditLog>,
    addresses: AddressScreener,
    transactions: TransactionScreener,
}

impl ScreeningService {
    pub fn builder(config: Config) -> ScreeningServiceBuilder {
        ScreeningServiceBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sanctions(&self) -> &Arc<SanctionsIndex> {
        &self.sanctions
    }

    pub fn walker(&self) -> &Arc<PathWalker> {
        &self.walker
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn addresses(&self) -> &AddressScreener {
        &self.addresses
    }

    pub fn transactions(&self) -> &TransactionScreener {
        &self.transactions
    }
}
