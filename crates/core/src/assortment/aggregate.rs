//! Per-store rollup of approved opportunities

use std::collections::BTreeMap;

use tracing::info;

use crate::domain::opportunity::{Opportunity, StoreResult};
use crate::domain::store::{ClusterMap, StoreId};
use crate::errors::EngineError;

#[derive(Clone, Copy, Debug, Default)]
pub struct ResultsAggregator;

impl ResultsAggregator {
    pub fn new() -> Self {
        Self
    }

    /// One result per store in the assignment table, in store order,
    /// including unassigned stores. Unapproved opportunities are ignored.
    pub fn aggregate(
        &self,
        opportunities: &[Opportunity],
        clusters: &ClusterMap,
    ) -> Result<Vec<StoreResult>, EngineError> {
        let mut by_store: BTreeMap<&StoreId, Vec<&Opportunity>> = BTreeMap::new();
        for opportunity in opportunities.iter().filter(|opportunity| opportunity.approved) {
            by_store.entry(&opportunity.store_id).or_default().push(opportunity);
        }

        let mut results = Vec::with_capacity(clusters.store_count());
        for (store_id, cluster_id) in clusters.stores() {
            let mut result = StoreResult::empty(store_id.clone(), cluster_id.cloned());
            if let Some(approved) = by_store.remove(store_id) {
                summarize(&mut result, &approved);
            }
            results.push(result);
        }

        if let Some(orphan) = by_store.keys().next() {
            return Err(EngineError::InvariantViolation(format!(
                "approved opportunity for store `{orphan}` which is not in the cluster assignment"
            )));
        }

        let flagged = results.iter().filter(|result| result.rule_flag).count();
        info!(
            event_name = "engine.aggregate.completed",
            stores = results.len(),
            stores_with_opportunities = flagged,
            "store results aggregated"
        );

        Ok(results)
    }
}

fn summarize(result: &mut StoreResult, approved: &[&Opportunity]) {
    let count = approved.len();
    let mut sell_through_sum = 0.0;
    let mut improvement_sum = 0.0;

    for opportunity in approved {
        result.total_quantity += u64::from(opportunity.recommended_quantity);
        result.total_investment += opportunity.investment_required;
        result.total_retail_value += opportunity.retail_value;
        sell_through_sum += opportunity.predicted_sell_through.unwrap_or(0.0);
        improvement_sum += opportunity.sell_through_improvement.unwrap_or(0.0);
    }

    result.opportunity_count = count;
    result.approved_count = count;
    if count > 0 {
        result.average_predicted_sell_through = sell_through_sum / count as f64;
        result.average_sell_through_improvement = improvement_sum / count as f64;
        result.rule_flag = true;
    }
}
