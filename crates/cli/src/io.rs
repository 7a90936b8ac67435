//! CSV loading and writing for the `analyze` and `import` commands.
//!
//! Input directory layout:
//!   clusters.csv    store_id, cluster_id (aliases: Cluster, cluster)
//!   sales.csv       store_id, feature_id, sales_amount[, units]
//!   quantities.csv  store_id[, feature_id], total_quantity, total_amount
//!   margins.csv     store_id, feature_id, margin_rate          (optional)
//!   categories.csv  feature_id, parent_category                (optional)
//!   signals.csv     store_id, feature_id[, cluster_p50, store_baseline, seasonal_adjustment] (optional)

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use shelfgap_core::domain::opportunity::{Opportunity, StoreResult};
use shelfgap_core::domain::sales::{
    FeatureCategory, FeatureId, MarginRecord, QuantityRecord, SalesRecord, SellThroughSignal,
};
use shelfgap_core::domain::snapshot::AnalysisSnapshot;
use shelfgap_core::domain::store::{ClusterAssignment, ClusterId, StoreId};

pub const OPPORTUNITIES_FILE: &str = "opportunities.csv";
pub const STORE_RESULTS_FILE: &str = "store_results.csv";

/// Column order of `opportunities.csv`; matches `OpportunityRow`.
pub const OPPORTUNITY_COLUMNS: &[&str] = &[
    "store_id",
    "cluster_id",
    "feature_id",
    "adoption_rate",
    "stores_selling",
    "expected_sales",
    "unit_price",
    "price_source",
    "recommended_quantity",
    "retail_value",
    "investment_required",
    "predicted_sell_through",
    "sell_through_improvement",
    "approved",
    "validator_score",
    "margin_rate_used",
    "margin_source",
    "margin_uplift",
    "roi",
    "n_comparables",
];

/// Column order of `store_results.csv`; matches `StoreResultRow`.
pub const STORE_RESULT_COLUMNS: &[&str] = &[
    "store_id",
    "cluster_id",
    "opportunity_count",
    "total_quantity",
    "total_investment",
    "total_retail_value",
    "average_predicted_sell_through",
    "average_sell_through_improvement",
    "approved_count",
    "rule_flag",
];

#[derive(Debug, Deserialize)]
struct ClusterRow {
    store_id: String,
    #[serde(alias = "Cluster", alias = "cluster")]
    cluster_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SalesRow {
    store_id: String,
    feature_id: String,
    sales_amount: f64,
    #[serde(default)]
    units: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct QuantityRow {
    store_id: String,
    #[serde(default)]
    feature_id: Option<String>,
    total_quantity: f64,
    total_amount: f64,
}

#[derive(Debug, Deserialize)]
struct MarginRow {
    store_id: String,
    feature_id: String,
    margin_rate: f64,
}

#[derive(Debug, Deserialize)]
struct CategoryRow {
    feature_id: String,
    parent_category: String,
}

#[derive(Debug, Deserialize)]
struct SignalRow {
    store_id: String,
    feature_id: String,
    #[serde(default)]
    cluster_p50: Option<f64>,
    #[serde(default)]
    store_baseline: Option<f64>,
    #[serde(default)]
    seasonal_adjustment: Option<f64>,
}

#[derive(Debug, Serialize)]
struct OpportunityRow<'a> {
    store_id: &'a str,
    cluster_id: &'a str,
    feature_id: &'a str,
    adoption_rate: f64,
    stores_selling: usize,
    expected_sales: f64,
    unit_price: f64,
    price_source: &'static str,
    recommended_quantity: u32,
    retail_value: f64,
    investment_required: f64,
    predicted_sell_through: Option<f64>,
    sell_through_improvement: Option<f64>,
    approved: u8,
    validator_score: Option<f64>,
    margin_rate_used: Option<f64>,
    margin_source: Option<&'static str>,
    margin_uplift: Option<f64>,
    roi: Option<f64>,
    n_comparables: Option<usize>,
}

impl<'a> From<&'a Opportunity> for OpportunityRow<'a> {
    fn from(opportunity: &'a Opportunity) -> Self {
        let roi = opportunity.roi.as_ref();
        Self {
            store_id: &opportunity.store_id.0,
            cluster_id: &opportunity.cluster_id.0,
            feature_id: &opportunity.feature_id.0,
            adoption_rate: opportunity.adoption_rate,
            stores_selling: opportunity.stores_selling,
            expected_sales: opportunity.expected_sales,
            unit_price: opportunity.unit_price,
            price_source: opportunity.price_source.as_str(),
            recommended_quantity: opportunity.recommended_quantity,
            retail_value: opportunity.retail_value,
            investment_required: opportunity.investment_required,
            predicted_sell_through: opportunity.predicted_sell_through,
            sell_through_improvement: opportunity.sell_through_improvement,
            approved: u8::from(opportunity.approved),
            validator_score: opportunity.validator_score,
            margin_rate_used: roi.map(|metrics| metrics.margin_rate_used),
            margin_source: roi.map(|metrics| metrics.margin_source.as_str()),
            margin_uplift: roi.map(|metrics| metrics.margin_uplift),
            roi: roi.map(|metrics| metrics.roi),
            n_comparables: roi.map(|metrics| metrics.n_comparables),
        }
    }
}

#[derive(Debug, Serialize)]
struct StoreResultRow<'a> {
    store_id: &'a str,
    cluster_id: Option<&'a str>,
    opportunity_count: usize,
    total_quantity: u64,
    total_investment: f64,
    total_retail_value: f64,
    average_predicted_sell_through: f64,
    average_sell_through_improvement: f64,
    approved_count: usize,
    rule_flag: u8,
}

impl<'a> From<&'a StoreResult> for StoreResultRow<'a> {
    fn from(result: &'a StoreResult) -> Self {
        Self {
            store_id: &result.store_id.0,
            cluster_id: result.cluster_id.as_ref().map(|cluster| cluster.0.as_str()),
            opportunity_count: result.opportunity_count,
            total_quantity: result.total_quantity,
            total_investment: result.total_investment,
            total_retail_value: result.total_retail_value,
            average_predicted_sell_through: result.average_predicted_sell_through,
            average_sell_through_improvement: result.average_sell_through_improvement,
            approved_count: result.approved_count,
            rule_flag: u8::from(result.rule_flag),
        }
    }
}

/// Reads every CSV row of `reader` into `T`, reporting the 1-based file line
/// on failure.
fn read_rows<T: DeserializeOwned, R: Read>(reader: R) -> Result<Vec<T>> {
    let mut csv_reader =
        csv::ReaderBuilder::new().has_headers(true).trim(csv::Trim::All).from_reader(reader);

    let mut rows = Vec::new();
    for (line_num, result) in csv_reader.deserialize().enumerate() {
        let row: T = result.with_context(|| format!("CSV parse error at line {}", line_num + 2))?;
        rows.push(row);
    }
    Ok(rows)
}

fn read_file<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<Vec<T>> {
    let path = dir.join(name);
    let file = File::open(&path).with_context(|| format!("failed to open `{}`", path.display()))?;
    read_rows(file).with_context(|| format!("failed to read `{}`", path.display()))
}

fn read_optional_file<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<Vec<T>> {
    if dir.join(name).exists() {
        read_file(dir, name)
    } else {
        Ok(Vec::new())
    }
}

/// Loads the analysis snapshot from a directory of CSV tables.
pub fn load_snapshot_dir(dir: &Path) -> Result<AnalysisSnapshot> {
    let assignments = read_file::<ClusterRow>(dir, "clusters.csv")?
        .into_iter()
        .map(|row| ClusterAssignment {
            store_id: StoreId(row.store_id),
            cluster_id: row.cluster_id.filter(|value| !value.is_empty()).map(ClusterId),
        })
        .collect();

    let sales = read_file::<SalesRow>(dir, "sales.csv")?
        .into_iter()
        .map(|row| SalesRecord {
            store_id: StoreId(row.store_id),
            feature_id: FeatureId(row.feature_id),
            sales_amount: row.sales_amount,
            units: row.units,
        })
        .collect();

    let quantities = read_file::<QuantityRow>(dir, "quantities.csv")?
        .into_iter()
        .map(|row| QuantityRecord {
            store_id: StoreId(row.store_id),
            feature_id: row.feature_id.filter(|value| !value.is_empty()).map(FeatureId),
            total_quantity: row.total_quantity,
            total_amount: row.total_amount,
        })
        .collect();

    let margins = read_optional_file::<MarginRow>(dir, "margins.csv")?
        .into_iter()
        .map(|row| MarginRecord {
            store_id: StoreId(row.store_id),
            feature_id: FeatureId(row.feature_id),
            margin_rate: row.margin_rate,
        })
        .collect();

    let categories = read_optional_file::<CategoryRow>(dir, "categories.csv")?
        .into_iter()
        .map(|row| FeatureCategory {
            feature_id: FeatureId(row.feature_id),
            parent_category: FeatureId(row.parent_category),
        })
        .collect();

    let signals = read_optional_file::<SignalRow>(dir, "signals.csv")?
        .into_iter()
        .map(|row| SellThroughSignal {
            store_id: StoreId(row.store_id),
            feature_id: FeatureId(row.feature_id),
            cluster_p50: row.cluster_p50,
            store_baseline: row.store_baseline,
            seasonal_adjustment: row.seasonal_adjustment,
        })
        .collect();

    Ok(AnalysisSnapshot::new(assignments, sales)
        .with_quantities(quantities)
        .with_margins(margins)
        .with_categories(categories)
        .with_signals(signals))
}

/// Writes the opportunity and store tables into `dir`, creating it if needed.
/// Both files always carry their header row, even when empty.
pub fn write_outputs(
    dir: &Path,
    opportunities: &[Opportunity],
    store_results: &[StoreResult],
) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create `{}`", dir.display()))?;

    write_table(
        &dir.join(OPPORTUNITIES_FILE),
        OPPORTUNITY_COLUMNS,
        opportunities.iter().map(OpportunityRow::from),
    )?;
    write_table(
        &dir.join(STORE_RESULTS_FILE),
        STORE_RESULT_COLUMNS,
        store_results.iter().map(StoreResultRow::from),
    )
}

fn write_table<T: Serialize>(
    path: &Path,
    columns: &[&str],
    rows: impl Iterator<Item = T>,
) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("failed to create `{}`", path.display()))?;
    writer.write_record(columns)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().with_context(|| format!("failed to write `{}`", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use shelfgap_core::domain::opportunity::StoreResult;
    use shelfgap_core::domain::store::StoreId;
    use tempfile::TempDir;

    use super::{
        read_rows, write_outputs, ClusterRow, QuantityRow, SalesRow, OPPORTUNITIES_FILE,
        OPPORTUNITY_COLUMNS, STORE_RESULTS_FILE, STORE_RESULT_COLUMNS,
    };

    #[test]
    fn cluster_column_aliases_are_accepted() {
        let rows: Vec<ClusterRow> =
            read_rows("store_id,Cluster\nS1,C1\nS2,\n".as_bytes()).expect("clusters");

        assert_eq!(rows[0].cluster_id.as_deref(), Some("C1"));
        assert_eq!(rows[1].cluster_id, None);
    }

    #[test]
    fn optional_columns_may_be_missing() {
        let rows: Vec<SalesRow> = read_rows(
            "store_id , feature_id , sales_amount\n S1 , PASTA , 120.5\n".as_bytes(),
        )
        .expect("sales");

        assert_eq!(rows[0].store_id, "S1");
        assert_eq!(rows[0].units, None);
    }

    #[test]
    fn store_wide_quantity_rows_have_no_feature() {
        let rows: Vec<QuantityRow> = read_rows(
            "store_id,feature_id,total_quantity,total_amount\nS1,,10,45\n".as_bytes(),
        )
        .expect("quantities");

        assert_eq!(rows[0].feature_id, None);
        assert_eq!(rows[0].total_amount, 45.0);
    }

    #[test]
    fn parse_errors_report_the_file_line() {
        let error = read_rows::<SalesRow, _>(
            "store_id,feature_id,sales_amount\nS1,PASTA,12\nS2,PASTA,abc\n".as_bytes(),
        )
        .expect_err("bad amount");

        assert!(format!("{error:#}").contains("line 3"));
    }

    #[test]
    fn empty_tables_keep_their_header_and_flags_are_numeric() {
        let dir = TempDir::new().expect("output dir");
        let idle = StoreResult::empty(StoreId("S1".to_string()), None);

        write_outputs(dir.path(), &[], &[idle]).expect("write outputs");

        let opportunities =
            fs::read_to_string(dir.path().join(OPPORTUNITIES_FILE)).expect("opportunities");
        assert_eq!(opportunities, format!("{}\n", OPPORTUNITY_COLUMNS.join(",")));

        let stores = fs::read_to_string(dir.path().join(STORE_RESULTS_FILE)).expect("stores");
        let mut lines = stores.lines();
        assert_eq!(lines.next(), Some(STORE_RESULT_COLUMNS.join(",").as_str()));
        assert_eq!(lines.next(), Some("S1,,0,0,0.0,0.0,0.0,0.0,0,0"));
    }
}
