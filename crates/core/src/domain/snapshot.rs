use serde::{Deserialize, Serialize};

use crate::domain::sales::{
    FeatureCategory, MarginRecord, QuantityRecord, SalesRecord, SellThroughSignal,
};
use crate::domain::store::ClusterAssignment;

/// The input tables for one reporting period. Loading them is the caller's
/// job; the engine only reads this value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    pub assignments: Vec<ClusterAssignment>,
    pub sales: Vec<SalesRecord>,
    pub quantities: Vec<QuantityRecord>,
    pub margins: Vec<MarginRecord>,
    pub categories: Vec<FeatureCategory>,
    pub signals: Vec<SellThroughSignal>,
}

impl AnalysisSnapshot {
    pub fn new(assignments: Vec<ClusterAssignment>, sales: Vec<SalesRecord>) -> Self {
        Self { assignments, sales, ..Self::default() }
    }

    pub fn with_quantities(mut self, quantities: Vec<QuantityRecord>) -> Self {
        self.quantities = quantities;
        self
    }

    pub fn with_margins(mut self, margins: Vec<MarginRecord>) -> Self {
        self.margins = margins;
        self
    }

    pub fn with_categories(mut self, categories: Vec<FeatureCategory>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_signals(mut self, signals: Vec<SellThroughSignal>) -> Self {
        self.signals = signals;
        self
    }
}
