//! Opportunity identification and validation engine
//!
//! Finds features that sell well across a store cluster, locates the stores
//! missing them, sizes a recommendation from peer demand, and gates it on
//! predicted sell-through and (optionally) return on investment.

mod aggregate;
mod opportunity;
mod peer;
mod pipeline;
mod pricing;
mod roi;
mod sell_through;
pub mod stats;

pub use aggregate::ResultsAggregator;
pub use opportunity::{
    estimate_expected_sales, recommended_quantity, IdentificationOutcome, OpportunityIdentifier,
};
pub use peer::{PeerClusterAnalyzer, PeerClusterReport};
pub use pipeline::{OpportunityPipeline, PipelineOutput, RunDiagnostics};
pub use pricing::{PriceCache, PriceResolver, PriceTables, PRICE_CHAIN};
pub use roi::{roi_metrics, MarginTable, RoiCalculator, RoiDecision, MARGIN_CHAIN};
pub use sell_through::{
    BlendWeights, ExternalValidator, SellThroughModel, SellThroughValidator, ValidatorVerdict,
};

/// Default blend weights for the sell-through estimate.
pub const DEFAULT_BLEND_WEIGHTS: BlendWeights = BlendWeights {
    adoption: 0.40,
    cluster_p50: 0.30,
    store_baseline: 0.20,
    seasonal: 0.10,
};

/// Minimum number of validated opportunities before a constant validator
/// score is treated as suspicious.
pub const CONSTANT_VALIDATOR_MIN_SAMPLES: usize = 3;

/// Relative tolerance absorbing float noise when a quantity ratio lands just
/// above a whole number.
pub const QUANTITY_EPSILON: f64 = 1e-12;
