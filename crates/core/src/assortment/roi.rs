//! Margin resolution and the optional profitability gate

use std::collections::BTreeMap;

use tracing::info;

use crate::config::RoiConfig;
use crate::domain::opportunity::{MarginSource, Opportunity, RoiMetrics};
use crate::domain::sales::{FeatureCategory, FeatureId, MarginRecord};
use crate::domain::store::StoreId;
use crate::errors::{RejectionReason, SkipReason};

/// Margin sources tried in order. `Default` is a synthesized rate and is
/// skipped in strict mode.
pub const MARGIN_CHAIN: [MarginSource; 4] = [
    MarginSource::StoreFeature,
    MarginSource::StoreCategory,
    MarginSource::StoreAverage,
    MarginSource::Default,
];

#[derive(Clone, Copy, Debug, Default)]
struct Mean {
    sum: f64,
    count: usize,
}

impl Mean {
    fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn value(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Observed margin rates indexed for each fallback tier. Rows outside
/// `[0, 1]` are treated as corrupt and never indexed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MarginTable {
    store_feature: BTreeMap<(StoreId, FeatureId), f64>,
    store_category: BTreeMap<(StoreId, FeatureId), f64>,
    store_average: BTreeMap<StoreId, f64>,
    parents: BTreeMap<FeatureId, FeatureId>,
    rejected_rows: usize,
}

impl MarginTable {
    pub fn from_records(margins: &[MarginRecord], categories: &[FeatureCategory]) -> Self {
        let parents: BTreeMap<FeatureId, FeatureId> = categories
            .iter()
            .map(|row| (row.feature_id.clone(), row.parent_category.clone()))
            .collect();

        let mut store_feature: BTreeMap<(StoreId, FeatureId), Mean> = BTreeMap::new();
        let mut store_category: BTreeMap<(StoreId, FeatureId), Mean> = BTreeMap::new();
        let mut store_average: BTreeMap<StoreId, Mean> = BTreeMap::new();
        let mut rejected_rows = 0;

        for row in margins {
            let rate = row.margin_rate;
            if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
                rejected_rows += 1;
                continue;
            }

            store_feature.entry((row.store_id.clone(), row.feature_id.clone())).or_default().push(rate);
            if let Some(parent) = parents.get(&row.feature_id) {
                store_category.entry((row.store_id.clone(), parent.clone())).or_default().push(rate);
            }
            store_average.entry(row.store_id.clone()).or_default().push(rate);
        }

        Self {
            store_feature: means_of(store_feature),
            store_category: means_of(store_category),
            store_average: means_of(store_average),
            parents,
            rejected_rows,
        }
    }

    pub fn rejected_rows(&self) -> usize {
        self.rejected_rows
    }

    fn lookup(
        &self,
        source: MarginSource,
        store_id: &StoreId,
        feature_id: &FeatureId,
        config: &RoiConfig,
    ) -> Option<f64> {
        match source {
            MarginSource::StoreFeature => {
                self.store_feature.get(&(store_id.clone(), feature_id.clone())).copied()
            }
            MarginSource::StoreCategory => self
                .parents
                .get(feature_id)
                .and_then(|parent| self.store_category.get(&(store_id.clone(), parent.clone())))
                .copied(),
            MarginSource::StoreAverage => self.store_average.get(store_id).copied(),
            MarginSource::Default => Some(config.default_margin_rate),
        }
    }

    /// First tier with a rate wins; the rate is clamped to
    /// `[0, max_margin_rate]`.
    pub fn resolve(
        &self,
        store_id: &StoreId,
        feature_id: &FeatureId,
        config: &RoiConfig,
        strict_mode: bool,
    ) -> Option<(f64, MarginSource)> {
        MARGIN_CHAIN
            .iter()
            .filter(|source| !(strict_mode && **source == MarginSource::Default))
            .find_map(|source| {
                self.lookup(*source, store_id, feature_id, config)
                    .map(|rate| (rate.clamp(0.0, config.max_margin_rate), *source))
            })
    }
}

fn means_of<K: Ord>(means: BTreeMap<K, Mean>) -> BTreeMap<K, f64> {
    means.into_iter().filter_map(|(key, mean)| mean.value().map(|value| (key, value))).collect()
}

/// Margin arithmetic for a fixed quantity and price. The quantity is the
/// one stored on the opportunity.
pub fn roi_metrics(
    quantity: u32,
    unit_price: f64,
    margin_rate: f64,
    margin_source: MarginSource,
    n_comparables: usize,
) -> RoiMetrics {
    let quantity = f64::from(quantity);
    let unit_cost = unit_price * (1.0 - margin_rate);
    let margin_per_unit = unit_price - unit_cost;
    let investment_required = quantity * unit_cost;
    let margin_uplift = margin_per_unit * quantity;
    let roi = if investment_required > 0.0 { margin_uplift / investment_required } else { 0.0 };

    RoiMetrics {
        margin_rate_used: margin_rate,
        margin_source,
        unit_cost,
        margin_per_unit,
        investment_required,
        margin_uplift,
        roi,
        n_comparables,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoiDecision {
    Kept,
    Skipped(SkipReason),
    Rejected(RejectionReason),
}

#[derive(Clone, Copy, Debug)]
pub struct RoiCalculator<'a> {
    config: RoiConfig,
    strict_mode: bool,
    margins: &'a MarginTable,
}

impl<'a> RoiCalculator<'a> {
    pub fn new(config: RoiConfig, strict_mode: bool, margins: &'a MarginTable) -> Self {
        Self { config, strict_mode, margins }
    }

    /// Attaches ROI fields and applies the three profitability filters.
    /// Anything but `Kept` leaves the opportunity unapproved.
    pub fn compute_and_filter(&self, opportunity: &mut Opportunity) -> RoiDecision {
        let Some((margin_rate, source)) = self.margins.resolve(
            &opportunity.store_id,
            &opportunity.feature_id,
            &self.config,
            self.strict_mode,
        ) else {
            opportunity.approved = false;
            return RoiDecision::Skipped(SkipReason::MissingMargin);
        };

        let metrics = roi_metrics(
            opportunity.recommended_quantity,
            opportunity.unit_price,
            margin_rate,
            source,
            opportunity.stores_selling,
        );
        opportunity.record_roi(metrics);

        let rejection = if metrics.roi < self.config.min_roi {
            Some(RejectionReason::RoiBelowMinimum)
        } else if metrics.margin_uplift < self.config.min_margin_uplift {
            Some(RejectionReason::MarginUpliftBelowMinimum)
        } else if metrics.n_comparables < self.config.min_comparables {
            Some(RejectionReason::TooFewComparables)
        } else {
            None
        };

        match rejection {
            Some(reason) => {
                opportunity.reject(reason);
                RoiDecision::Rejected(reason)
            }
            None => RoiDecision::Kept,
        }
    }

    /// Runs the gate over every approved opportunity.
    pub fn filter_approved(&self, opportunities: &mut [Opportunity]) -> Vec<RoiDecision> {
        let decisions: Vec<RoiDecision> = opportunities
            .iter_mut()
            .filter(|opportunity| opportunity.approved)
            .map(|opportunity| self.compute_and_filter(opportunity))
            .collect();

        let kept = decisions.iter().filter(|decision| **decision == RoiDecision::Kept).count();
        info!(
            event_name = "engine.roi.filtered",
            evaluated = decisions.len(),
            kept,
            dropped = decisions.len() - kept,
            strict_mode = self.strict_mode,
            "roi gate applied"
        );

        decisions
    }
}

#[cfg(test)]
mod tests {
    use super::{roi_metrics, MarginTable, RoiCalculator, RoiDecision};
    use crate::config::{EngineConfig, RoiConfig};
    use crate::domain::opportunity::{
        MarginSource, Opportunity, PriceSource, ResolvedPrice, WellSellingFeature,
    };
    use crate::domain::sales::{FeatureCategory, FeatureId, MarginRecord};
    use crate::domain::store::{ClusterId, StoreId};
    use crate::errors::{RejectionReason, SkipReason};

    fn roi_config() -> RoiConfig {
        RoiConfig { enabled: true, ..EngineConfig::default().roi }
    }

    fn margin(store: &str, feature: &str, rate: f64) -> MarginRecord {
        MarginRecord {
            store_id: StoreId(store.to_string()),
            feature_id: FeatureId(feature.to_string()),
            margin_rate: rate,
        }
    }

    fn opportunity(store: &str, feature: &str, quantity: u32, price: f64) -> Opportunity {
        let peers = (0..4).map(|index| (StoreId(format!("P{index}")), 100.0)).collect();
        let feature = WellSellingFeature::new(
            ClusterId("C1".to_string()),
            FeatureId(feature.to_string()),
            5,
            peers,
            400.0,
        )
        .expect("valid feature");
        let mut opportunity = Opportunity::new(
            StoreId(store.to_string()),
            &feature,
            100.0,
            ResolvedPrice { unit_price: price, source: PriceSource::StoreQuantity },
            quantity,
        );
        opportunity.approved = true;
        opportunity
    }

    #[test]
    fn roi_arithmetic_matches_worked_example() {
        let metrics = roi_metrics(10, 50.0, 0.40, MarginSource::StoreFeature, 5);

        assert!((metrics.unit_cost - 30.0).abs() < 1e-9);
        assert!((metrics.margin_per_unit - 20.0).abs() < 1e-9);
        assert!((metrics.investment_required - 300.0).abs() < 1e-9);
        assert!((metrics.margin_uplift - 200.0).abs() < 1e-9);
        assert!((metrics.roi - 0.6667).abs() < 1e-3);
    }

    #[test]
    fn margin_chain_falls_back_through_category_and_store_average() {
        let table = MarginTable::from_records(
            &[margin("S1", "LATTE", 0.50), margin("S1", "BAGEL", 0.20)],
            &[
                FeatureCategory {
                    feature_id: FeatureId("LATTE".to_string()),
                    parent_category: FeatureId("HOT_DRINKS".to_string()),
                },
                FeatureCategory {
                    feature_id: FeatureId("MOCHA".to_string()),
                    parent_category: FeatureId("HOT_DRINKS".to_string()),
                },
            ],
        );
        let config = roi_config();
        let store = StoreId("S1".to_string());

        assert_eq!(
            table.resolve(&store, &FeatureId("LATTE".to_string()), &config, true),
            Some((0.50, MarginSource::StoreFeature))
        );
        assert_eq!(
            table.resolve(&store, &FeatureId("MOCHA".to_string()), &config, true),
            Some((0.50, MarginSource::StoreCategory))
        );
        let average = table.resolve(&store, &FeatureId("SCONE".to_string()), &config, true);
        assert_eq!(average.map(|(_, source)| source), Some(MarginSource::StoreAverage));
        assert!((average.map_or(0.0, |(rate, _)| rate) - 0.35).abs() < 1e-12);
    }

    #[test]
    fn default_margin_only_outside_strict_mode() {
        let table = MarginTable::default();
        let config = roi_config();
        let store = StoreId("S9".to_string());
        let feature = FeatureId("LATTE".to_string());

        assert_eq!(table.resolve(&store, &feature, &config, true), None);
        assert_eq!(
            table.resolve(&store, &feature, &config, false),
            Some((0.45, MarginSource::Default))
        );
    }

    #[test]
    fn corrupt_rates_are_rejected_and_high_rates_clamped() {
        let table = MarginTable::from_records(
            &[margin("S1", "LATTE", 1.7), margin("S1", "MOCHA", 0.99), margin("S1", "TEA", f64::NAN)],
            &[],
        );
        let config = roi_config();
        let store = StoreId("S1".to_string());

        assert_eq!(table.rejected_rows(), 2);
        assert_eq!(
            table.resolve(&store, &FeatureId("MOCHA".to_string()), &config, true),
            Some((0.95, MarginSource::StoreFeature))
        );
    }

    #[test]
    fn missing_margin_in_strict_mode_skips_the_opportunity() {
        let table = MarginTable::default();
        let calculator = RoiCalculator::new(roi_config(), true, &table);
        let mut candidate = opportunity("S1", "LATTE", 10, 50.0);

        let decision = calculator.compute_and_filter(&mut candidate);

        assert_eq!(decision, RoiDecision::Skipped(SkipReason::MissingMargin));
        assert!(!candidate.approved);
        assert!(candidate.roi.is_none());
    }

    #[test]
    fn low_roi_is_rejected_and_investment_uses_unit_cost() {
        let table = MarginTable::from_records(&[margin("S1", "LATTE", 0.10)], &[]);
        let calculator = RoiCalculator::new(roi_config(), true, &table);
        let mut candidate = opportunity("S1", "LATTE", 10, 50.0);

        let decision = calculator.compute_and_filter(&mut candidate);

        assert_eq!(decision, RoiDecision::Rejected(RejectionReason::RoiBelowMinimum));
        assert!((candidate.investment_required - 450.0).abs() < 1e-9);
        assert!((candidate.retail_value - 500.0).abs() < 1e-9);
    }

    #[test]
    fn profitable_opportunity_is_kept() {
        let table = MarginTable::from_records(&[margin("S1", "LATTE", 0.40)], &[]);
        let calculator = RoiCalculator::new(roi_config(), true, &table);
        let mut candidate = opportunity("S1", "LATTE", 10, 50.0);

        assert_eq!(calculator.compute_and_filter(&mut candidate), RoiDecision::Kept);
        assert!(candidate.approved);
        assert_eq!(candidate.roi.map(|metrics| metrics.n_comparables), Some(4));
    }

    #[test]
    fn thin_comparable_sets_are_rejected() {
        let table = MarginTable::from_records(&[margin("S1", "LATTE", 0.40)], &[]);
        let config = RoiConfig { min_comparables: 6, ..roi_config() };
        let calculator = RoiCalculator::new(config, true, &table);
        let mut candidate = opportunity("S1", "LATTE", 10, 50.0);

        assert_eq!(
            calculator.compute_and_filter(&mut candidate),
            RoiDecision::Rejected(RejectionReason::TooFewComparables)
        );
    }
}
