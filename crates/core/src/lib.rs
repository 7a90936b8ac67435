pub mod assortment;
pub mod config;
pub mod domain;
pub mod errors;

pub use assortment::{
    ExternalValidator, OpportunityPipeline, PipelineOutput, RunDiagnostics, ValidatorVerdict,
};
pub use config::{AppConfig, ConfigError, ConfigOverrides, EngineConfig, LoadOptions};
pub use domain::opportunity::{Opportunity, PriceSource, StoreResult, WellSellingFeature};
pub use domain::sales::{FeatureId, Granularity};
pub use domain::snapshot::AnalysisSnapshot;
pub use domain::store::{ClusterId, StoreId};
pub use errors::{ApplicationError, EngineError, RejectionReason, SkipReason};
