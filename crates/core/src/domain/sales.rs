use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::store::StoreId;

/// A subcategory or SKU identifier, depending on the run's granularity.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureId(pub String);

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Subcategory,
    Sku,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subcategory => "subcategory",
            Self::Sku => "sku",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "subcategory" | "category" | "spu" => Ok(Self::Subcategory),
            "sku" => Ok(Self::Sku),
            other => Err(format!("unsupported granularity `{other}` (expected subcategory|sku)")),
        }
    }
}

/// One store x feature row of the (possibly period-blended) sales table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SalesRecord {
    pub store_id: StoreId,
    pub feature_id: FeatureId,
    pub sales_amount: f64,
    /// Units sold, when the source carries them.
    pub units: Option<f64>,
}

/// Quantity/price row. Rows without a feature are store-wide totals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantityRecord {
    pub store_id: StoreId,
    pub feature_id: Option<FeatureId>,
    pub total_quantity: f64,
    pub total_amount: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarginRecord {
    pub store_id: StoreId,
    pub feature_id: FeatureId,
    pub margin_rate: f64,
}

/// Maps a feature to its parent category for the margin fallback chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureCategory {
    pub feature_id: FeatureId,
    pub parent_category: FeatureId,
}

/// Optional richer sell-through signals for a (store, feature) pair.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SellThroughSignal {
    pub store_id: StoreId,
    pub feature_id: FeatureId,
    pub cluster_p50: Option<f64>,
    pub store_baseline: Option<f64>,
    pub seasonal_adjustment: Option<f64>,
}

/// Average unit price from an amount/quantity pair, if both are usable.
pub fn unit_price(total_amount: f64, total_quantity: f64) -> Option<f64> {
    if !total_amount.is_finite() || !total_quantity.is_finite() {
        return None;
    }
    if total_amount <= 0.0 || total_quantity <= 0.0 {
        return None;
    }
    Some(total_amount / total_quantity)
}
