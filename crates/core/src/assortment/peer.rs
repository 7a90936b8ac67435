//! Well-selling feature detection per store cluster

use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::ThresholdPreset;
use crate::domain::opportunity::WellSellingFeature;
use crate::domain::sales::{FeatureId, SalesRecord};
use crate::domain::store::{ClusterId, ClusterMap, StoreId};
use crate::errors::EngineError;

type FeatureSales = BTreeMap<FeatureId, BTreeMap<StoreId, f64>>;

/// Result of one peer analysis pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PeerClusterReport {
    /// Sorted by (cluster, feature).
    pub features: Vec<WellSellingFeature>,
    /// Clusters that produced no well-selling feature. Recorded as a
    /// missing-data diagnostic, not an error.
    pub clusters_without_features: Vec<ClusterId>,
}

#[derive(Clone, Copy, Debug)]
pub struct PeerClusterAnalyzer {
    thresholds: ThresholdPreset,
}

impl PeerClusterAnalyzer {
    pub fn new(thresholds: ThresholdPreset) -> Self {
        Self { thresholds }
    }

    pub fn find_well_selling_features(
        &self,
        sales: &[SalesRecord],
        clusters: &ClusterMap,
    ) -> Result<PeerClusterReport, EngineError> {
        let by_cluster = group_by_cluster(sales, clusters);

        let partitions = clusters
            .clusters()
            .map(|(cluster_id, members)| (cluster_id, members.len()))
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|(cluster_id, cluster_size)| {
                let empty = FeatureSales::new();
                let features = by_cluster.get(cluster_id).unwrap_or(&empty);
                self.analyze_cluster(cluster_id, cluster_size, features)
                    .map(|found| (cluster_id.clone(), found))
            })
            .collect::<Result<Vec<_>, EngineError>>()?;

        let mut report = PeerClusterReport::default();
        for (cluster_id, found) in partitions {
            if found.is_empty() {
                debug!(
                    event_name = "engine.peer.cluster_without_features",
                    cluster_id = %cluster_id,
                    "cluster has no well-selling features"
                );
                report.clusters_without_features.push(cluster_id);
            }
            report.features.extend(found);
        }

        info!(
            event_name = "engine.peer.well_selling",
            clusters = clusters.cluster_count(),
            well_selling_features = report.features.len(),
            clusters_without_features = report.clusters_without_features.len(),
            "peer cluster analysis completed"
        );

        Ok(report)
    }

    fn analyze_cluster(
        &self,
        cluster_id: &ClusterId,
        cluster_size: usize,
        features: &FeatureSales,
    ) -> Result<Vec<WellSellingFeature>, EngineError> {
        let mut found = Vec::new();

        for (feature_id, store_sales) in features {
            let total_cluster_sales: f64 = store_sales.values().sum();
            let peer_sales: BTreeMap<StoreId, f64> = store_sales
                .iter()
                .filter(|(_, amount)| **amount > 0.0)
                .map(|(store, amount)| (store.clone(), *amount))
                .collect();

            if peer_sales.is_empty() || total_cluster_sales < self.thresholds.min_cluster_sales {
                continue;
            }

            let feature = WellSellingFeature::new(
                cluster_id.clone(),
                feature_id.clone(),
                cluster_size,
                peer_sales,
                total_cluster_sales,
            )?;

            if feature.adoption_rate >= self.thresholds.min_adoption {
                found.push(feature);
            }
        }

        Ok(found)
    }
}

/// Joins sales with cluster membership. Rows for unknown or unassigned
/// stores and non-finite amounts are dropped; duplicate rows for the same
/// store and feature are summed.
fn group_by_cluster(
    sales: &[SalesRecord],
    clusters: &ClusterMap,
) -> BTreeMap<ClusterId, FeatureSales> {
    let mut grouped: BTreeMap<ClusterId, FeatureSales> = BTreeMap::new();

    for record in sales {
        if !record.sales_amount.is_finite() {
            continue;
        }
        let Some(cluster_id) = clusters.cluster_of(&record.store_id) else {
            continue;
        };

        *grouped
            .entry(cluster_id.clone())
            .or_default()
            .entry(record.feature_id.clone())
            .or_default()
            .entry(record.store_id.clone())
            .or_insert(0.0) += record.sales_amount;
    }

    grouped
}

#[cfg(test)]
mod tests {
    use super::PeerClusterAnalyzer;
    use crate::config::SUBCATEGORY_PRESET;
    use crate::domain::sales::{FeatureId, SalesRecord};
    use crate::domain::store::{ClusterAssignment, ClusterId, ClusterMap, StoreId};

    fn assign(store: &str, cluster: Option<&str>) -> ClusterAssignment {
        ClusterAssignment {
            store_id: StoreId(store.to_string()),
            cluster_id: cluster.map(|value| ClusterId(value.to_string())),
        }
    }

    fn sale(store: &str, feature: &str, amount: f64) -> SalesRecord {
        SalesRecord {
            store_id: StoreId(store.to_string()),
            feature_id: FeatureId(feature.to_string()),
            sales_amount: amount,
            units: None,
        }
    }

    fn ten_store_cluster() -> ClusterMap {
        let assignments: Vec<_> =
            (1..=10).map(|index| assign(&format!("S{index:02}"), Some("C1"))).collect();
        ClusterMap::from_assignments(&assignments).expect("valid assignments")
    }

    #[test]
    fn keeps_features_meeting_adoption_and_sales_floors() {
        let clusters = ten_store_cluster();
        let mut sales: Vec<_> =
            (1..=8).map(|index| sale(&format!("S{index:02}"), "BEVERAGE", 40.0)).collect();
        sales.extend((1..=5).map(|index| sale(&format!("S{index:02}"), "SNACKS", 80.0)));

        let report = PeerClusterAnalyzer::new(SUBCATEGORY_PRESET)
            .find_well_selling_features(&sales, &clusters)
            .expect("analysis succeeds");

        assert_eq!(report.features.len(), 1);
        let feature = &report.features[0];
        assert_eq!(feature.feature_id, FeatureId("BEVERAGE".to_string()));
        assert_eq!(feature.stores_selling, 8);
        assert!((feature.adoption_rate - 0.8).abs() < 1e-12);
        assert!((feature.total_cluster_sales - 320.0).abs() < 1e-9);
    }

    #[test]
    fn sales_floor_excludes_low_volume_features() {
        let clusters = ten_store_cluster();
        let sales: Vec<_> =
            (1..=9).map(|index| sale(&format!("S{index:02}"), "CANDLES", 5.0)).collect();

        let report = PeerClusterAnalyzer::new(SUBCATEGORY_PRESET)
            .find_well_selling_features(&sales, &clusters)
            .expect("analysis succeeds");

        assert!(report.features.is_empty());
        assert_eq!(report.clusters_without_features, vec![ClusterId("C1".to_string())]);
    }

    #[test]
    fn zero_sales_rows_do_not_count_as_selling() {
        let clusters = ten_store_cluster();
        let mut sales: Vec<_> =
            (1..=7).map(|index| sale(&format!("S{index:02}"), "BAKERY", 50.0)).collect();
        sales.push(sale("S08", "BAKERY", 0.0));
        sales.push(sale("S09", "BAKERY", 0.0));

        let report = PeerClusterAnalyzer::new(SUBCATEGORY_PRESET)
            .find_well_selling_features(&sales, &clusters)
            .expect("analysis succeeds");

        assert_eq!(report.features[0].stores_selling, 7);
        assert!(!report.features[0].is_sold_by(&StoreId("S08".to_string())));
    }

    #[test]
    fn unassigned_stores_are_excluded_from_comparison() {
        let mut assignments: Vec<_> =
            (1..=3).map(|index| assign(&format!("S{index}"), Some("C1"))).collect();
        assignments.push(assign("S9", None));
        let clusters = ClusterMap::from_assignments(&assignments).expect("valid assignments");

        let sales = vec![
            sale("S1", "DAIRY", 60.0),
            sale("S2", "DAIRY", 60.0),
            sale("S3", "DAIRY", 60.0),
            sale("S9", "DAIRY", 1_000.0),
        ];

        let report = PeerClusterAnalyzer::new(SUBCATEGORY_PRESET)
            .find_well_selling_features(&sales, &clusters)
            .expect("analysis succeeds");

        assert_eq!(report.features[0].cluster_size, 3);
        assert!((report.features[0].total_cluster_sales - 180.0).abs() < 1e-9);
    }
}
