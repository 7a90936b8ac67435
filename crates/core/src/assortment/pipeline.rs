//! End-to-end engine run over one input snapshot

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::assortment::aggregate::ResultsAggregator;
use crate::assortment::opportunity::OpportunityIdentifier;
use crate::assortment::peer::PeerClusterAnalyzer;
use crate::assortment::pricing::{PriceResolver, PriceTables};
use crate::assortment::roi::{MarginTable, RoiCalculator, RoiDecision};
use crate::assortment::sell_through::{index_signals, ExternalValidator, SellThroughValidator};
use crate::config::EngineConfig;
use crate::domain::opportunity::{Opportunity, StoreResult};
use crate::domain::snapshot::AnalysisSnapshot;
use crate::domain::store::ClusterMap;
use crate::errors::EngineError;

/// Counts surfaced alongside the output tables. Skips and rejections are
/// never folded into zero-valued results.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    pub stores: usize,
    pub clusters: usize,
    pub unassigned_stores: usize,
    pub well_selling_features: usize,
    pub clusters_without_features: usize,
    pub candidates: usize,
    pub opportunities_identified: usize,
    pub approved: usize,
    pub margin_rows_rejected: usize,
    pub skipped: BTreeMap<String, usize>,
    pub rejected: BTreeMap<String, usize>,
    pub price_sources: BTreeMap<String, usize>,
}

impl RunDiagnostics {
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }

    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    /// Approved opportunities sorted by (cluster, feature, store).
    pub opportunities: Vec<Opportunity>,
    /// One row per store in the assignment table, sorted by store.
    pub store_results: Vec<StoreResult>,
    pub diagnostics: RunDiagnostics,
    pub checksum: String,
}

#[derive(Clone)]
pub struct OpportunityPipeline {
    config: EngineConfig,
    sell_through: SellThroughValidator,
}

impl fmt::Debug for OpportunityPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpportunityPipeline")
            .field("config", &self.config)
            .field("sell_through", &self.sell_through)
            .finish()
    }
}

impl OpportunityPipeline {
    /// Pipeline without an external validator.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::build(config, None)
    }

    pub fn with_validator(
        config: EngineConfig,
        validator: Arc<dyn ExternalValidator>,
    ) -> Result<Self, EngineError> {
        Self::build(config, Some(validator))
    }

    fn build(
        config: EngineConfig,
        validator: Option<Arc<dyn ExternalValidator>>,
    ) -> Result<Self, EngineError> {
        config.validate().map_err(|error| EngineError::Configuration(error.to_string()))?;
        let sell_through = SellThroughValidator::new(config.sell_through, validator)?;
        Ok(Self { config, sell_through })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn run(&self, snapshot: &AnalysisSnapshot) -> Result<PipelineOutput, EngineError> {
        let started = Instant::now();
        let clusters = ClusterMap::from_assignments(&snapshot.assignments)?;
        let mut diagnostics = RunDiagnostics {
            stores: clusters.store_count(),
            clusters: clusters.cluster_count(),
            unassigned_stores: clusters.unassigned_count(),
            ..RunDiagnostics::default()
        };

        let report = PeerClusterAnalyzer::new(self.config.thresholds)
            .find_well_selling_features(&snapshot.sales, &clusters)?;
        diagnostics.well_selling_features = report.features.len();
        diagnostics.clusters_without_features = report.clusters_without_features.len();

        let price_tables = PriceTables::from_records(&snapshot.quantities, &snapshot.sales);
        let resolver = PriceResolver::new(&price_tables, &clusters);
        let identified = OpportunityIdentifier::new(self.config)
            .identify_opportunities(&report.features, &clusters, &resolver);
        diagnostics.candidates = identified.candidates;
        for (reason, count) in &identified.skipped {
            *diagnostics.skipped.entry(reason.as_str().to_owned()).or_insert(0) += count;
        }
        for (source, count) in &identified.price_sources {
            diagnostics.price_sources.insert(source.as_str().to_owned(), *count);
        }

        let mut opportunities = identified.opportunities;
        diagnostics.opportunities_identified = opportunities.len();

        let signals = index_signals(&snapshot.signals);
        self.sell_through.validate_all(&mut opportunities, &signals)?;

        let mut margin_skips = 0_usize;
        if self.config.roi.enabled {
            let margins = MarginTable::from_records(&snapshot.margins, &snapshot.categories);
            diagnostics.margin_rows_rejected = margins.rejected_rows();
            let calculator = RoiCalculator::new(self.config.roi, self.config.strict_mode, &margins);
            for decision in calculator.filter_approved(&mut opportunities) {
                if let RoiDecision::Skipped(reason) = decision {
                    margin_skips += 1;
                    *diagnostics.skipped.entry(reason.as_str().to_owned()).or_insert(0) += 1;
                }
            }
        }

        for opportunity in &opportunities {
            if let Some(reason) = opportunity.rejection {
                *diagnostics.rejected.entry(reason.as_str().to_owned()).or_insert(0) += 1;
            }
        }

        opportunities.retain(|opportunity| opportunity.approved);
        diagnostics.approved = opportunities.len();

        let store_results = ResultsAggregator::new().aggregate(&opportunities, &clusters)?;
        let checksum = checksum_for_output(&opportunities, &store_results)?;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        info!(
            event_name = "engine.pipeline.completed",
            granularity = %self.config.granularity,
            roi_enabled = self.config.roi.enabled,
            stores = diagnostics.stores,
            candidates = diagnostics.candidates,
            identified = diagnostics.opportunities_identified,
            approved = diagnostics.approved,
            skipped = diagnostics.skipped_total(),
            rejected = diagnostics.rejected_total(),
            margin_skips,
            checksum = %checksum,
            elapsed_ms,
            "engine run completed"
        );

        Ok(PipelineOutput { opportunities, store_results, diagnostics, checksum })
    }
}

/// Digest of the canonical JSON of both output tables.
fn checksum_for_output(
    opportunities: &[Opportunity],
    store_results: &[StoreResult],
) -> Result<String, EngineError> {
    let canonical = serde_json::to_string(&(opportunities, store_results)).map_err(|error| {
        EngineError::InvariantViolation(format!("output tables are not serializable: {error}"))
    })?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(format!("sha256:{:x}", hasher.finalize()))
}
