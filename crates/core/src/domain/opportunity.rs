use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::sales::FeatureId;
use crate::domain::store::{ClusterId, StoreId};
use crate::errors::{EngineError, RejectionReason};

/// A (cluster, feature) pair that meets the adoption and sales floors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WellSellingFeature {
    pub cluster_id: ClusterId,
    pub feature_id: FeatureId,
    pub cluster_size: usize,
    pub stores_selling: usize,
    pub total_cluster_sales: f64,
    pub adoption_rate: f64,
    /// Sales of each store that currently sells the feature.
    pub peer_sales: BTreeMap<StoreId, f64>,
}

impl WellSellingFeature {
    pub fn new(
        cluster_id: ClusterId,
        feature_id: FeatureId,
        cluster_size: usize,
        peer_sales: BTreeMap<StoreId, f64>,
        total_cluster_sales: f64,
    ) -> Result<Self, EngineError> {
        let stores_selling = peer_sales.len();
        if cluster_size == 0 || stores_selling > cluster_size {
            return Err(EngineError::InvariantViolation(format!(
                "feature `{feature_id}` in cluster `{cluster_id}` has {stores_selling} selling stores for cluster size {cluster_size}"
            )));
        }

        Ok(Self {
            adoption_rate: stores_selling as f64 / cluster_size as f64,
            cluster_id,
            feature_id,
            cluster_size,
            stores_selling,
            total_cluster_sales,
            peer_sales,
        })
    }

    pub fn is_sold_by(&self, store_id: &StoreId) -> bool {
        self.peer_sales.contains_key(store_id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    StoreQuantity,
    StoreSales,
    ClusterMedian,
}

impl PriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StoreQuantity => "store_quantity",
            Self::StoreSales => "store_sales",
            Self::ClusterMedian => "cluster_median",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPrice {
    pub unit_price: f64,
    pub source: PriceSource,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarginSource {
    StoreFeature,
    StoreCategory,
    StoreAverage,
    Default,
}

impl MarginSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StoreFeature => "store_feature",
            Self::StoreCategory => "store_category",
            Self::StoreAverage => "store_average",
            Self::Default => "default",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoiMetrics {
    pub margin_rate_used: f64,
    pub margin_source: MarginSource,
    pub unit_cost: f64,
    pub margin_per_unit: f64,
    pub investment_required: f64,
    pub margin_uplift: f64,
    pub roi: f64,
    pub n_comparables: usize,
}

/// Output of the sell-through gate for one opportunity.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SellThroughDecision {
    pub predicted_sell_through: f64,
    pub sell_through_improvement: f64,
    pub validator_score: Option<f64>,
    pub approved: bool,
    pub rejection: Option<RejectionReason>,
}

/// A missing (store, feature) pair worth stocking.
///
/// `recommended_quantity` is computed once by the identifier and every later
/// stage reads this field; nothing downstream recomputes a quantity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub store_id: StoreId,
    pub cluster_id: ClusterId,
    pub feature_id: FeatureId,
    pub adoption_rate: f64,
    pub stores_selling: usize,
    pub expected_sales: f64,
    pub unit_price: f64,
    pub price_source: PriceSource,
    pub recommended_quantity: u32,
    pub retail_value: f64,
    pub investment_required: f64,
    pub predicted_sell_through: Option<f64>,
    pub sell_through_improvement: Option<f64>,
    pub validator_score: Option<f64>,
    pub approved: bool,
    pub rejection: Option<RejectionReason>,
    pub roi: Option<RoiMetrics>,
}

impl Opportunity {
    pub fn new(
        store_id: StoreId,
        feature: &WellSellingFeature,
        expected_sales: f64,
        price: ResolvedPrice,
        recommended_quantity: u32,
    ) -> Self {
        let retail_value = f64::from(recommended_quantity) * price.unit_price;
        Self {
            store_id,
            cluster_id: feature.cluster_id.clone(),
            feature_id: feature.feature_id.clone(),
            adoption_rate: feature.adoption_rate,
            stores_selling: feature.stores_selling,
            expected_sales,
            unit_price: price.unit_price,
            price_source: price.source,
            recommended_quantity,
            retail_value,
            investment_required: retail_value,
            predicted_sell_through: None,
            sell_through_improvement: None,
            validator_score: None,
            approved: false,
            rejection: None,
            roi: None,
        }
    }

    pub fn record_sell_through(&mut self, decision: SellThroughDecision) {
        self.predicted_sell_through = Some(decision.predicted_sell_through);
        self.sell_through_improvement = Some(decision.sell_through_improvement);
        self.validator_score = decision.validator_score;
        self.approved = decision.approved;
        self.rejection = decision.rejection;
    }

    pub fn record_roi(&mut self, metrics: RoiMetrics) {
        self.investment_required = metrics.investment_required;
        self.roi = Some(metrics);
    }

    pub fn reject(&mut self, reason: RejectionReason) {
        self.approved = false;
        self.rejection = Some(reason);
    }
}

/// Per-store rollup of approved opportunities. Stores with none are
/// zero-filled with `rule_flag == false`. Only approved opportunities are
/// aggregated, so `opportunity_count` always equals `approved_count`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoreResult {
    pub store_id: StoreId,
    pub cluster_id: Option<ClusterId>,
    pub opportunity_count: usize,
    pub total_quantity: u64,
    pub total_investment: f64,
    pub total_retail_value: f64,
    pub average_predicted_sell_through: f64,
    pub average_sell_through_improvement: f64,
    pub approved_count: usize,
    pub rule_flag: bool,
}

impl StoreResult {
    pub fn empty(store_id: StoreId, cluster_id: Option<ClusterId>) -> Self {
        Self {
            store_id,
            cluster_id,
            opportunity_count: 0,
            total_quantity: 0,
            total_investment: 0.0,
            total_retail_value: 0.0,
            average_predicted_sell_through: 0.0,
            average_sell_through_improvement: 0.0,
            approved_count: 0,
            rule_flag: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::WellSellingFeature;
    use crate::domain::sales::FeatureId;
    use crate::domain::store::{ClusterId, StoreId};

    #[test]
    fn adoption_rate_is_selling_share_of_cluster() {
        let peers: BTreeMap<StoreId, f64> = [("S1", 10.0), ("S2", 20.0), ("S3", 30.0)]
            .into_iter()
            .map(|(store, sales)| (StoreId(store.to_string()), sales))
            .collect();

        let feature = WellSellingFeature::new(
            ClusterId("C1".to_string()),
            FeatureId("F1".to_string()),
            4,
            peers,
            60.0,
        )
        .expect("valid feature");

        assert_eq!(feature.stores_selling, 3);
        assert!((feature.adoption_rate - 0.75).abs() < 1e-12);
        assert!(feature.is_sold_by(&StoreId("S2".to_string())));
        assert!(!feature.is_sold_by(&StoreId("S4".to_string())));
    }

    #[test]
    fn more_sellers_than_members_is_an_invariant_violation() {
        let peers: BTreeMap<StoreId, f64> =
            [(StoreId("S1".to_string()), 1.0), (StoreId("S2".to_string()), 1.0)].into();

        let result = WellSellingFeature::new(
            ClusterId("C1".to_string()),
            FeatureId("F1".to_string()),
            1,
            peers,
            2.0,
        );

        assert!(result.is_err());
    }
}
