//! Unit price resolution with an ordered fallback chain

use std::collections::{BTreeMap, HashMap};

use crate::assortment::stats;
use crate::domain::opportunity::{PriceSource, ResolvedPrice};
use crate::domain::sales::{unit_price, FeatureId, QuantityRecord, SalesRecord};
use crate::domain::store::{ClusterId, ClusterMap, StoreId};

/// Sources tried in order; the first one yielding a price wins. There is no
/// synthetic tier: exhausting the chain means the candidate is skipped.
pub const PRICE_CHAIN: [PriceSource; 3] =
    [PriceSource::StoreQuantity, PriceSource::StoreSales, PriceSource::ClusterMedian];

#[derive(Clone, Copy, Debug, Default)]
struct Totals {
    amount: f64,
    quantity: f64,
}

impl Totals {
    fn add(&mut self, amount: f64, quantity: f64) {
        self.amount += amount;
        self.quantity += quantity;
    }

    fn price(&self) -> Option<f64> {
        unit_price(self.amount, self.quantity)
    }
}

/// Average unit prices derived once from the quantity and sales tables.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PriceTables {
    feature_quantity: BTreeMap<(StoreId, FeatureId), f64>,
    store_quantity: BTreeMap<StoreId, f64>,
    feature_sales: BTreeMap<(StoreId, FeatureId), f64>,
}

impl PriceTables {
    pub fn from_records(quantities: &[QuantityRecord], sales: &[SalesRecord]) -> Self {
        let mut feature_quantity: BTreeMap<(StoreId, FeatureId), Totals> = BTreeMap::new();
        let mut store_quantity: BTreeMap<StoreId, Totals> = BTreeMap::new();
        for row in quantities {
            if !row.total_amount.is_finite() || !row.total_quantity.is_finite() {
                continue;
            }
            match &row.feature_id {
                Some(feature_id) => feature_quantity
                    .entry((row.store_id.clone(), feature_id.clone()))
                    .or_default()
                    .add(row.total_amount, row.total_quantity),
                None => store_quantity
                    .entry(row.store_id.clone())
                    .or_default()
                    .add(row.total_amount, row.total_quantity),
            }
        }

        let mut feature_sales: BTreeMap<(StoreId, FeatureId), Totals> = BTreeMap::new();
        for row in sales {
            let Some(units) = row.units else {
                continue;
            };
            if !row.sales_amount.is_finite() || !units.is_finite() {
                continue;
            }
            feature_sales
                .entry((row.store_id.clone(), row.feature_id.clone()))
                .or_default()
                .add(row.sales_amount, units);
        }

        Self {
            feature_quantity: prices_of(feature_quantity),
            store_quantity: prices_of(store_quantity),
            feature_sales: prices_of(feature_sales),
        }
    }

    /// Quantity-table price for the feature, else the store-wide row.
    fn store_quantity_price(&self, store_id: &StoreId, feature_id: &FeatureId) -> Option<f64> {
        self.feature_quantity
            .get(&(store_id.clone(), feature_id.clone()))
            .or_else(|| self.store_quantity.get(store_id))
            .copied()
    }

    fn store_sales_price(&self, store_id: &StoreId, feature_id: &FeatureId) -> Option<f64> {
        self.feature_sales.get(&(store_id.clone(), feature_id.clone())).copied()
    }

    /// Feature-specific observed price for one store, used as a cluster
    /// median sample. Store-wide rows say nothing about the feature.
    fn observed_feature_price(&self, store_id: &StoreId, feature_id: &FeatureId) -> Option<f64> {
        let key = (store_id.clone(), feature_id.clone());
        self.feature_quantity.get(&key).or_else(|| self.feature_sales.get(&key)).copied()
    }
}

fn prices_of<K: Ord>(totals: BTreeMap<K, Totals>) -> BTreeMap<K, f64> {
    totals.into_iter().filter_map(|(key, totals)| totals.price().map(|price| (key, price))).collect()
}

/// Per-worker memo of resolved prices and cluster medians. Never shared
/// across workers.
#[derive(Debug, Default)]
pub struct PriceCache {
    resolved: HashMap<(StoreId, FeatureId), Option<ResolvedPrice>>,
    cluster_medians: HashMap<(ClusterId, FeatureId), Option<f64>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolved_len(&self) -> usize {
        self.resolved.len()
    }

    pub fn cluster_median_len(&self) -> usize {
        self.cluster_medians.len()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PriceResolver<'a> {
    tables: &'a PriceTables,
    clusters: &'a ClusterMap,
}

impl<'a> PriceResolver<'a> {
    pub fn new(tables: &'a PriceTables, clusters: &'a ClusterMap) -> Self {
        Self { tables, clusters }
    }

    /// Resolves a unit price for `(store, feature)`; `None` means no
    /// observed price exists anywhere in the chain.
    pub fn resolve(
        &self,
        store_id: &StoreId,
        feature_id: &FeatureId,
        cluster_id: &ClusterId,
        cache: &mut PriceCache,
    ) -> Option<ResolvedPrice> {
        let key = (store_id.clone(), feature_id.clone());
        if let Some(cached) = cache.resolved.get(&key) {
            return *cached;
        }

        let resolved = PRICE_CHAIN.iter().find_map(|source| {
            self.try_source(*source, store_id, feature_id, cluster_id, cache)
                .map(|unit_price| ResolvedPrice { unit_price, source: *source })
        });

        cache.resolved.insert(key, resolved);
        resolved
    }

    fn try_source(
        &self,
        source: PriceSource,
        store_id: &StoreId,
        feature_id: &FeatureId,
        cluster_id: &ClusterId,
        cache: &mut PriceCache,
    ) -> Option<f64> {
        match source {
            PriceSource::StoreQuantity => self.tables.store_quantity_price(store_id, feature_id),
            PriceSource::StoreSales => self.tables.store_sales_price(store_id, feature_id),
            PriceSource::ClusterMedian => self.cluster_median(cluster_id, feature_id, cache),
        }
    }

    fn cluster_median(
        &self,
        cluster_id: &ClusterId,
        feature_id: &FeatureId,
        cache: &mut PriceCache,
    ) -> Option<f64> {
        let key = (cluster_id.clone(), feature_id.clone());
        if let Some(cached) = cache.cluster_medians.get(&key) {
            return *cached;
        }

        let samples: Vec<f64> = self
            .clusters
            .members(cluster_id)
            .into_iter()
            .flatten()
            .filter_map(|member| self.tables.observed_feature_price(member, feature_id))
            .collect();
        let median = stats::median(&samples);

        cache.cluster_medians.insert(key, median);
        median
    }
}

#[cfg(test)]
mod tests {
    use super::{PriceCache, PriceResolver, PriceTables};
    use crate::domain::opportunity::PriceSource;
    use crate::domain::sales::{FeatureId, QuantityRecord, SalesRecord};
    use crate::domain::store::{ClusterAssignment, ClusterId, ClusterMap, StoreId};

    fn store(value: &str) -> StoreId {
        StoreId(value.to_string())
    }

    fn feature(value: &str) -> FeatureId {
        FeatureId(value.to_string())
    }

    fn cluster() -> ClusterId {
        ClusterId("C1".to_string())
    }

    fn clusters() -> ClusterMap {
        let assignments: Vec<_> = ["S1", "S2", "S3", "S4"]
            .into_iter()
            .map(|id| ClusterAssignment { store_id: store(id), cluster_id: Some(cluster()) })
            .collect();
        ClusterMap::from_assignments(&assignments).expect("valid assignments")
    }

    fn quantity(store_id: &str, feature_id: Option<&str>, qty: f64, amount: f64) -> QuantityRecord {
        QuantityRecord {
            store_id: store(store_id),
            feature_id: feature_id.map(feature),
            total_quantity: qty,
            total_amount: amount,
        }
    }

    fn sale(store_id: &str, feature_id: &str, amount: f64, units: Option<f64>) -> SalesRecord {
        SalesRecord { store_id: store(store_id), feature_id: feature(feature_id), sales_amount: amount, units }
    }

    #[test]
    fn quantity_table_price_wins_over_other_sources() {
        let tables = PriceTables::from_records(
            &[quantity("S1", Some("TEA"), 10.0, 120.0)],
            &[sale("S1", "TEA", 500.0, Some(10.0)), sale("S2", "TEA", 90.0, Some(10.0))],
        );
        let clusters = clusters();
        let resolver = PriceResolver::new(&tables, &clusters);

        let price = resolver
            .resolve(&store("S1"), &feature("TEA"), &cluster(), &mut PriceCache::new())
            .expect("price resolves");

        assert_eq!(price.source, PriceSource::StoreQuantity);
        assert!((price.unit_price - 12.0).abs() < 1e-12);
    }

    #[test]
    fn store_wide_quantity_row_backs_up_missing_feature_row() {
        let tables = PriceTables::from_records(&[quantity("S1", None, 40.0, 200.0)], &[]);
        let clusters = clusters();
        let resolver = PriceResolver::new(&tables, &clusters);

        let price = resolver
            .resolve(&store("S1"), &feature("TEA"), &cluster(), &mut PriceCache::new())
            .expect("price resolves");

        assert_eq!(price.source, PriceSource::StoreQuantity);
        assert!((price.unit_price - 5.0).abs() < 1e-12);
    }

    #[test]
    fn sales_units_are_second_tier() {
        let tables = PriceTables::from_records(&[], &[sale("S1", "TEA", 90.0, Some(6.0))]);
        let clusters = clusters();
        let resolver = PriceResolver::new(&tables, &clusters);

        let price = resolver
            .resolve(&store("S1"), &feature("TEA"), &cluster(), &mut PriceCache::new())
            .expect("price resolves");

        assert_eq!(price.source, PriceSource::StoreSales);
        assert!((price.unit_price - 15.0).abs() < 1e-12);
    }

    #[test]
    fn cluster_median_covers_stores_without_own_prices() {
        let tables = PriceTables::from_records(
            &[quantity("S2", Some("TEA"), 10.0, 100.0)],
            &[sale("S3", "TEA", 140.0, Some(10.0)), sale("S4", "TEA", 300.0, Some(10.0))],
        );
        let clusters = clusters();
        let resolver = PriceResolver::new(&tables, &clusters);
        let mut cache = PriceCache::new();

        let price = resolver
            .resolve(&store("S1"), &feature("TEA"), &cluster(), &mut cache)
            .expect("price resolves");

        assert_eq!(price.source, PriceSource::ClusterMedian);
        assert!((price.unit_price - 14.0).abs() < 1e-12);
        assert_eq!(cache.cluster_median_len(), 1);
    }

    #[test]
    fn exhausted_chain_yields_none_and_is_cached() {
        let tables = PriceTables::from_records(&[], &[sale("S2", "TEA", 50.0, None)]);
        let clusters = clusters();
        let resolver = PriceResolver::new(&tables, &clusters);
        let mut cache = PriceCache::new();

        assert!(resolver.resolve(&store("S1"), &feature("TEA"), &cluster(), &mut cache).is_none());
        assert!(resolver.resolve(&store("S1"), &feature("TEA"), &cluster(), &mut cache).is_none());
        assert_eq!(cache.resolved_len(), 1);
    }

    #[test]
    fn zero_quantity_rows_are_not_prices() {
        let tables = PriceTables::from_records(
            &[quantity("S1", Some("TEA"), 0.0, 100.0)],
            &[sale("S1", "TEA", 80.0, Some(4.0))],
        );
        let clusters = clusters();
        let resolver = PriceResolver::new(&tables, &clusters);

        let price = resolver
            .resolve(&store("S1"), &feature("TEA"), &cluster(), &mut PriceCache::new())
            .expect("price resolves");

        assert_eq!(price.source, PriceSource::StoreSales);
    }
}
