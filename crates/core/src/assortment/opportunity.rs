//! Missing-store search, demand estimation and quantity sizing

use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::info;

use crate::assortment::pricing::{PriceCache, PriceResolver};
use crate::assortment::{stats, QUANTITY_EPSILON};
use crate::config::{EngineConfig, EstimationConfig};
use crate::domain::opportunity::{Opportunity, PriceSource, WellSellingFeature};
use crate::domain::store::{ClusterId, ClusterMap};
use crate::errors::SkipReason;

/// Robust per-store demand estimate from peer sales: median of the
/// percentile-trimmed distribution, capped at a percentile of the untrimmed
/// one, then at `absolute_cap` when set. Small peer sets whose trim band
/// holds no observed value fall back to the untrimmed median.
pub fn estimate_expected_sales(
    peer_sales: &[f64],
    estimation: &EstimationConfig,
    absolute_cap: Option<f64>,
) -> Option<f64> {
    let trimmed =
        stats::trim(peer_sales, estimation.trim_lower_percentile, estimation.trim_upper_percentile);
    let center = match stats::median(&trimmed) {
        Some(center) => center,
        None => stats::median(peer_sales)?,
    };
    let realism_cap = stats::percentile(peer_sales, estimation.cap_percentile)?;

    let capped = center.min(realism_cap);
    Some(match absolute_cap {
        Some(cap) => capped.min(cap),
        None => capped,
    })
}

/// Units to stock: `max(1, ceil(expected_sales * scaling_factor / unit_price))`.
pub fn recommended_quantity(expected_sales: f64, unit_price: f64, scaling_factor: f64) -> u32 {
    if !unit_price.is_finite() || unit_price <= 0.0 {
        return 1;
    }
    let ratio = expected_sales * scaling_factor / unit_price;
    if !ratio.is_finite() {
        return 1;
    }
    let floor = ratio.floor();
    let raw = if ratio - floor <= QUANTITY_EPSILON * ratio.abs() { floor } else { ratio.ceil() };
    if raw < 1.0 {
        return 1;
    }
    // Saturating float-to-int cast.
    raw as u32
}

/// Opportunities plus the bookkeeping of one identification pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IdentificationOutcome {
    /// Sorted by (cluster, feature, store).
    pub opportunities: Vec<Opportunity>,
    pub candidates: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
    pub price_sources: BTreeMap<PriceSource, usize>,
}

impl IdentificationOutcome {
    fn merge(&mut self, other: Self) {
        self.opportunities.extend(other.opportunities);
        self.candidates += other.candidates;
        for (reason, count) in other.skipped {
            *self.skipped.entry(reason).or_insert(0) += count;
        }
        for (source, count) in other.price_sources {
            *self.price_sources.entry(source).or_insert(0) += count;
        }
    }

    fn skip(&mut self, reason: SkipReason, count: usize) {
        if count > 0 {
            *self.skipped.entry(reason).or_insert(0) += count;
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct OpportunityIdentifier {
    config: EngineConfig,
}

impl OpportunityIdentifier {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Each cluster is processed by its own worker with its own price
    /// cache; partitions are concatenated in cluster order.
    pub fn identify_opportunities(
        &self,
        features: &[WellSellingFeature],
        clusters: &ClusterMap,
        resolver: &PriceResolver<'_>,
    ) -> IdentificationOutcome {
        let mut partitions: BTreeMap<&ClusterId, Vec<&WellSellingFeature>> = BTreeMap::new();
        for feature in features {
            partitions.entry(&feature.cluster_id).or_default().push(feature);
        }

        let outcomes: Vec<IdentificationOutcome> = partitions
            .into_iter()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|(_, cluster_features)| {
                let mut cache = PriceCache::new();
                let mut outcome = IdentificationOutcome::default();
                for feature in cluster_features {
                    self.identify_for_feature(feature, clusters, resolver, &mut cache, &mut outcome);
                }
                outcome
            })
            .collect();

        let mut merged = IdentificationOutcome::default();
        for outcome in outcomes {
            merged.merge(outcome);
        }

        info!(
            event_name = "engine.opportunity.identified",
            candidates = merged.candidates,
            opportunities = merged.opportunities.len(),
            skipped_missing_price = merged.skipped.get(&SkipReason::MissingPrice).copied().unwrap_or(0),
            skipped_below_minimum =
                merged.skipped.get(&SkipReason::BelowMinimumValue).copied().unwrap_or(0),
            "opportunity identification completed"
        );

        merged
    }

    fn identify_for_feature(
        &self,
        feature: &WellSellingFeature,
        clusters: &ClusterMap,
        resolver: &PriceResolver<'_>,
        cache: &mut PriceCache,
        outcome: &mut IdentificationOutcome,
    ) {
        let Some(members) = clusters.members(&feature.cluster_id) else {
            return;
        };
        let missing: Vec<_> = members.iter().filter(|store| !feature.is_sold_by(store)).collect();
        if missing.is_empty() {
            return;
        }
        outcome.candidates += missing.len();

        let peer_sales: Vec<f64> = feature.peer_sales.values().copied().collect();
        let expected = estimate_expected_sales(
            &peer_sales,
            &self.config.estimation,
            self.config.thresholds.max_expected_sales,
        );
        let expected = match expected {
            Some(value) if value >= self.config.thresholds.min_opportunity_value => value,
            _ => {
                outcome.skip(SkipReason::BelowMinimumValue, missing.len());
                return;
            }
        };

        let scaling_factor = self.config.period.scaling_factor();
        for store_id in missing {
            let Some(price) = resolver.resolve(store_id, &feature.feature_id, &feature.cluster_id, cache)
            else {
                outcome.skip(SkipReason::MissingPrice, 1);
                continue;
            };

            let quantity = recommended_quantity(expected, price.unit_price, scaling_factor);
            *outcome.price_sources.entry(price.source).or_insert(0) += 1;
            outcome.opportunities.push(Opportunity::new(
                store_id.clone(),
                feature,
                expected,
                price,
                quantity,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{estimate_expected_sales, recommended_quantity, OpportunityIdentifier};
    use crate::assortment::pricing::{PriceResolver, PriceTables};
    use crate::config::{EngineConfig, EstimationConfig};
    use crate::domain::opportunity::{PriceSource, WellSellingFeature};
    use crate::domain::sales::{FeatureId, QuantityRecord};
    use crate::domain::store::{ClusterAssignment, ClusterId, ClusterMap, StoreId};
    use crate::errors::SkipReason;

    fn estimation() -> EstimationConfig {
        EstimationConfig {
            trim_lower_percentile: 10.0,
            trim_upper_percentile: 90.0,
            cap_percentile: 80.0,
        }
    }

    #[test]
    fn quantity_rounds_up_partial_units() {
        assert_eq!(recommended_quantity(450.0, 35.0, 1.0), 13);
    }

    #[test]
    fn quantity_never_drops_below_one() {
        assert_eq!(recommended_quantity(10.0, 50.0, 1.0), 1);
        assert_eq!(recommended_quantity(0.0, 50.0, 1.0), 1);
    }

    #[test]
    fn exact_multiples_do_not_round_up() {
        assert_eq!(recommended_quantity(300.0, 30.0, 1.0), 10);
        assert_eq!(recommended_quantity(0.3, 0.1, 1.0), 3);
    }

    #[test]
    fn fractions_above_float_noise_still_round_up() {
        assert_eq!(recommended_quantity(10.000_000_000_5, 1.0, 1.0), 11);
        assert_eq!(recommended_quantity(0.1 + 0.2, 0.1, 1.0), 3);
        assert_eq!(recommended_quantity(1.0e9 + 0.5, 1.0, 1.0), 1_000_000_001);
    }

    #[test]
    fn two_peer_cluster_falls_back_to_untrimmed_median() {
        let estimate =
            estimate_expected_sales(&[400.0, 600.0], &estimation(), None).expect("estimate");

        // p80 of the two peers is 560, above their median.
        assert!((estimate - 500.0).abs() < 1e-9);
        let capped = estimate_expected_sales(&[400.0, 600.0], &estimation(), Some(450.0))
            .expect("estimate");
        assert!((capped - 450.0).abs() < 1e-9);
    }

    #[test]
    fn scaling_factor_stretches_quantity_to_target_window() {
        assert_eq!(recommended_quantity(450.0, 35.0, 2.0), 26);
        assert_eq!(recommended_quantity(450.0, 35.0, 30.0 / 90.0), 5);
    }

    #[test]
    fn outliers_do_not_move_the_estimate() {
        let clean = [100.0, 110.0, 120.0, 130.0, 140.0, 150.0, 160.0, 170.0, 180.0];
        let mut noisy = clean.to_vec();
        noisy.push(25_000.0);
        noisy.push(0.5);

        let clean_estimate = estimate_expected_sales(&clean, &estimation(), None).expect("estimate");
        let noisy_estimate = estimate_expected_sales(&noisy, &estimation(), None).expect("estimate");

        assert!((clean_estimate - 140.0).abs() < 1e-9);
        assert!((noisy_estimate - 140.0).abs() < 1e-9);
    }

    #[test]
    fn realism_cap_bounds_skewed_distributions() {
        // Trimmed median sits above the untrimmed 30th percentile.
        let estimation = EstimationConfig { cap_percentile: 30.0, ..estimation() };
        let values = [10.0, 20.0, 30.0, 400.0, 500.0, 600.0];

        let estimate = estimate_expected_sales(&values, &estimation, None).expect("estimate");

        assert!((estimate - 25.0).abs() < 1e-9);
    }

    #[test]
    fn absolute_cap_applies_after_percentile_cap() {
        let values = [4_000.0, 5_000.0, 6_000.0, 7_000.0];

        let estimate = estimate_expected_sales(&values, &estimation(), Some(2_500.0)).expect("estimate");

        assert!((estimate - 2_500.0).abs() < 1e-9);
    }

    fn fixture() -> (ClusterMap, WellSellingFeature) {
        let assignments: Vec<_> = ["S1", "S2", "S3", "S4", "S5"]
            .into_iter()
            .map(|id| ClusterAssignment {
                store_id: StoreId(id.to_string()),
                cluster_id: Some(ClusterId("C1".to_string())),
            })
            .collect();
        let clusters = ClusterMap::from_assignments(&assignments).expect("valid assignments");
        let peers: BTreeMap<StoreId, f64> = [("S1", 400.0), ("S2", 450.0), ("S3", 500.0)]
            .into_iter()
            .map(|(id, amount)| (StoreId(id.to_string()), amount))
            .collect();
        let feature = WellSellingFeature::new(
            ClusterId("C1".to_string()),
            FeatureId("COFFEE".to_string()),
            5,
            peers,
            1_350.0,
        )
        .expect("valid feature");
        (clusters, feature)
    }

    #[test]
    fn missing_stores_without_price_are_skipped_not_invented() {
        let (clusters, feature) = fixture();
        let tables = PriceTables::from_records(
            &[QuantityRecord {
                store_id: StoreId("S4".to_string()),
                feature_id: None,
                total_quantity: 20.0,
                total_amount: 700.0,
            }],
            &[],
        );
        let resolver = PriceResolver::new(&tables, &clusters);

        let outcome = OpportunityIdentifier::new(EngineConfig::default())
            .identify_opportunities(&[feature], &clusters, &resolver);

        assert_eq!(outcome.candidates, 2);
        assert_eq!(outcome.opportunities.len(), 1);
        assert_eq!(outcome.opportunities[0].store_id, StoreId("S4".to_string()));
        assert_eq!(outcome.opportunities[0].price_source, PriceSource::StoreQuantity);
        assert_eq!(outcome.opportunities[0].recommended_quantity, 13);
        assert_eq!(outcome.skipped.get(&SkipReason::MissingPrice), Some(&1));
    }

    #[test]
    fn low_value_features_are_discarded_for_every_missing_store() {
        let (clusters, feature) = fixture();
        let mut config = EngineConfig::default();
        config.thresholds.min_opportunity_value = 10_000.0;
        let tables = PriceTables::default();
        let resolver = PriceResolver::new(&tables, &clusters);

        let outcome =
            OpportunityIdentifier::new(config).identify_opportunities(&[feature], &clusters, &resolver);

        assert!(outcome.opportunities.is_empty());
        assert_eq!(outcome.skipped.get(&SkipReason::BelowMinimumValue), Some(&2));
    }

    #[test]
    fn two_peer_feature_still_yields_its_missing_store() {
        let assignments: Vec<_> = ["S1", "S2", "S3"]
            .into_iter()
            .map(|id| ClusterAssignment {
                store_id: StoreId(id.to_string()),
                cluster_id: Some(ClusterId("C1".to_string())),
            })
            .collect();
        let clusters = ClusterMap::from_assignments(&assignments).expect("valid assignments");
        let peers: BTreeMap<StoreId, f64> = [("S1", 400.0), ("S2", 600.0)]
            .into_iter()
            .map(|(id, amount)| (StoreId(id.to_string()), amount))
            .collect();
        let feature = WellSellingFeature::new(
            ClusterId("C1".to_string()),
            FeatureId("TEA".to_string()),
            3,
            peers,
            1_000.0,
        )
        .expect("valid feature");
        let tables = PriceTables::from_records(
            &[QuantityRecord {
                store_id: StoreId("S3".to_string()),
                feature_id: None,
                total_quantity: 20.0,
                total_amount: 500.0,
            }],
            &[],
        );
        let resolver = PriceResolver::new(&tables, &clusters);

        let outcome = OpportunityIdentifier::new(EngineConfig::default())
            .identify_opportunities(&[feature], &clusters, &resolver);

        assert!(outcome.skipped.is_empty());
        assert_eq!(outcome.opportunities.len(), 1);
        assert!((outcome.opportunities[0].expected_sales - 500.0).abs() < 1e-9);
        assert_eq!(outcome.opportunities[0].recommended_quantity, 20);
    }
}
