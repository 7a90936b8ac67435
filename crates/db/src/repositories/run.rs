use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use shelfgap_core::config::EngineConfig;
use shelfgap_core::domain::opportunity::{
    MarginSource, Opportunity, PriceSource, RoiMetrics, StoreResult,
};
use shelfgap_core::domain::sales::{FeatureId, Granularity};
use shelfgap_core::domain::store::{ClusterId, StoreId};
use shelfgap_core::{PipelineOutput, RunDiagnostics};

use super::{decode_error, RepositoryError, RunRepository};
use crate::DbPool;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Header row of a persisted engine run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub id: RunId,
    pub created_at: DateTime<Utc>,
    pub granularity: Granularity,
    pub strict_mode: bool,
    pub roi_enabled: bool,
    pub checksum: String,
    pub opportunity_count: usize,
    pub store_count: usize,
    pub diagnostics: RunDiagnostics,
}

impl AnalysisRun {
    pub fn from_output(config: &EngineConfig, output: &PipelineOutput) -> Self {
        Self {
            id: RunId::generate(),
            created_at: Utc::now(),
            granularity: config.granularity,
            strict_mode: config.strict_mode,
            roi_enabled: config.roi.enabled,
            checksum: output.checksum.clone(),
            opportunity_count: output.opportunities.len(),
            store_count: output.store_results.len(),
            diagnostics: output.diagnostics.clone(),
        }
    }
}

pub struct SqlRunRepository {
    pool: DbPool,
}

impl SqlRunRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn to_i64(value: usize, field: &str) -> Result<i64, RepositoryError> {
    i64::try_from(value).map_err(|_| RepositoryError::Decode(format!("{field} overflows i64")))
}

fn to_usize(row: &SqliteRow, field: &str) -> Result<usize, RepositoryError> {
    let value: i64 = row.try_get(field).map_err(decode_error)?;
    usize::try_from(value).map_err(|_| RepositoryError::Decode(format!("{field} is negative")))
}

fn parse_price_source(value: &str) -> Result<PriceSource, RepositoryError> {
    match value {
        "store_quantity" => Ok(PriceSource::StoreQuantity),
        "store_sales" => Ok(PriceSource::StoreSales),
        "cluster_median" => Ok(PriceSource::ClusterMedian),
        other => Err(RepositoryError::Decode(format!("unknown price source `{other}`"))),
    }
}

fn parse_margin_source(value: &str) -> Result<MarginSource, RepositoryError> {
    match value {
        "store_feature" => Ok(MarginSource::StoreFeature),
        "store_category" => Ok(MarginSource::StoreCategory),
        "store_average" => Ok(MarginSource::StoreAverage),
        "default" => Ok(MarginSource::Default),
        other => Err(RepositoryError::Decode(format!("unknown margin source `{other}`"))),
    }
}

fn row_to_run(row: &SqliteRow) -> Result<AnalysisRun, RepositoryError> {
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("created_at: {error}")))?;
    let granularity: String = row.try_get("granularity").map_err(decode_error)?;
    let diagnostics: String = row.try_get("diagnostics_json").map_err(decode_error)?;

    Ok(AnalysisRun {
        id: RunId(row.try_get("id").map_err(decode_error)?),
        created_at,
        granularity: granularity.parse().map_err(RepositoryError::Decode)?,
        strict_mode: row.try_get("strict_mode").map_err(decode_error)?,
        roi_enabled: row.try_get("roi_enabled").map_err(decode_error)?,
        checksum: row.try_get("checksum").map_err(decode_error)?,
        opportunity_count: to_usize(row, "opportunity_count")?,
        store_count: to_usize(row, "store_count")?,
        diagnostics: serde_json::from_str(&diagnostics)
            .map_err(|error| RepositoryError::Decode(format!("diagnostics_json: {error}")))?,
    })
}

fn row_to_store_result(row: &SqliteRow) -> Result<StoreResult, RepositoryError> {
    let total_quantity: i64 = row.try_get("total_quantity").map_err(decode_error)?;
    Ok(StoreResult {
        store_id: StoreId(row.try_get("store_id").map_err(decode_error)?),
        cluster_id: row
            .try_get::<Option<String>, _>("cluster_id")
            .map_err(decode_error)?
            .map(ClusterId),
        opportunity_count: to_usize(row, "opportunity_count")?,
        total_quantity: u64::try_from(total_quantity)
            .map_err(|_| RepositoryError::Decode("total_quantity is negative".to_string()))?,
        total_investment: row.try_get("total_investment").map_err(decode_error)?,
        total_retail_value: row.try_get("total_retail_value").map_err(decode_error)?,
        average_predicted_sell_through: row
            .try_get("average_predicted_sell_through")
            .map_err(decode_error)?,
        average_sell_through_improvement: row
            .try_get("average_sell_through_improvement")
            .map_err(decode_error)?,
        approved_count: to_usize(row, "approved_count")?,
        rule_flag: row.try_get("rule_flag").map_err(decode_error)?,
    })
}

fn row_to_opportunity(row: &SqliteRow) -> Result<Opportunity, RepositoryError> {
    let price_source: String = row.try_get("price_source").map_err(decode_error)?;
    let quantity: i64 = row.try_get("recommended_quantity").map_err(decode_error)?;
    let margin_source: Option<String> = row.try_get("margin_source").map_err(decode_error)?;

    let roi = match margin_source {
        Some(source) => Some(RoiMetrics {
            margin_rate_used: row.try_get("margin_rate_used").map_err(decode_error)?,
            margin_source: parse_margin_source(&source)?,
            unit_cost: row.try_get("unit_cost").map_err(decode_error)?,
            margin_per_unit: row.try_get("margin_per_unit").map_err(decode_error)?,
            investment_required: row.try_get("investment_required").map_err(decode_error)?,
            margin_uplift: row.try_get("margin_uplift").map_err(decode_error)?,
            roi: row.try_get("roi").map_err(decode_error)?,
            n_comparables: to_usize(row, "n_comparables")?,
        }),
        None => None,
    };

    Ok(Opportunity {
        store_id: StoreId(row.try_get("store_id").map_err(decode_error)?),
        cluster_id: ClusterId(row.try_get("cluster_id").map_err(decode_error)?),
        feature_id: FeatureId(row.try_get("feature_id").map_err(decode_error)?),
        adoption_rate: row.try_get("adoption_rate").map_err(decode_error)?,
        stores_selling: to_usize(row, "stores_selling")?,
        expected_sales: row.try_get("expected_sales").map_err(decode_error)?,
        unit_price: row.try_get("unit_price").map_err(decode_error)?,
        price_source: parse_price_source(&price_source)?,
        recommended_quantity: u32::try_from(quantity)
            .map_err(|_| RepositoryError::Decode("recommended_quantity out of range".to_string()))?,
        retail_value: row.try_get("retail_value").map_err(decode_error)?,
        investment_required: row.try_get("investment_required").map_err(decode_error)?,
        predicted_sell_through: row.try_get("predicted_sell_through").map_err(decode_error)?,
        sell_through_improvement: row.try_get("sell_through_improvement").map_err(decode_error)?,
        validator_score: row.try_get("validator_score").map_err(decode_error)?,
        approved: true,
        rejection: None,
        roi,
    })
}

#[async_trait::async_trait]
impl RunRepository for SqlRunRepository {
    /// Persists the run header and both output tables in one transaction.
    async fn save_run(
        &self,
        run: &AnalysisRun,
        output: &PipelineOutput,
    ) -> Result<(), RepositoryError> {
        let diagnostics = serde_json::to_string(&run.diagnostics)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO analysis_run
                (id, created_at, granularity, strict_mode, roi_enabled, checksum,
                 opportunity_count, store_count, diagnostics_json)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&run.id.0)
        .bind(run.created_at.to_rfc3339())
        .bind(run.granularity.as_str())
        .bind(run.strict_mode)
        .bind(run.roi_enabled)
        .bind(&run.checksum)
        .bind(to_i64(run.opportunity_count, "opportunity_count")?)
        .bind(to_i64(run.store_count, "store_count")?)
        .bind(diagnostics)
        .execute(&mut *tx)
        .await?;

        for opportunity in output.opportunities.iter().filter(|opportunity| opportunity.approved) {
            let roi = opportunity.roi.as_ref();
            sqlx::query(
                "INSERT INTO run_opportunity
                    (run_id, cluster_id, feature_id, store_id, adoption_rate, stores_selling,
                     expected_sales, unit_price, price_source, recommended_quantity,
                     retail_value, investment_required, predicted_sell_through,
                     sell_through_improvement, validator_score, margin_rate_used,
                     margin_source, unit_cost, margin_per_unit, margin_uplift, roi,
                     n_comparables)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&run.id.0)
            .bind(&opportunity.cluster_id.0)
            .bind(&opportunity.feature_id.0)
            .bind(&opportunity.store_id.0)
            .bind(opportunity.adoption_rate)
            .bind(to_i64(opportunity.stores_selling, "stores_selling")?)
            .bind(opportunity.expected_sales)
            .bind(opportunity.unit_price)
            .bind(opportunity.price_source.as_str())
            .bind(i64::from(opportunity.recommended_quantity))
            .bind(opportunity.retail_value)
            .bind(opportunity.investment_required)
            .bind(opportunity.predicted_sell_through)
            .bind(opportunity.sell_through_improvement)
            .bind(opportunity.validator_score)
            .bind(roi.map(|metrics| metrics.margin_rate_used))
            .bind(roi.map(|metrics| metrics.margin_source.as_str()))
            .bind(roi.map(|metrics| metrics.unit_cost))
            .bind(roi.map(|metrics| metrics.margin_per_unit))
            .bind(roi.map(|metrics| metrics.margin_uplift))
            .bind(roi.map(|metrics| metrics.roi))
            .bind(roi.map(|metrics| to_i64(metrics.n_comparables, "n_comparables")).transpose()?)
            .execute(&mut *tx)
            .await?;
        }

        for result in &output.store_results {
            let total_quantity = i64::try_from(result.total_quantity)
                .map_err(|_| RepositoryError::Decode("total_quantity overflows i64".to_string()))?;
            sqlx::query(
                "INSERT INTO run_store_result
                    (run_id, store_id, cluster_id, opportunity_count, total_quantity,
                     total_investment, total_retail_value, average_predicted_sell_through,
                     average_sell_through_improvement, approved_count, rule_flag)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&run.id.0)
            .bind(&result.store_id.0)
            .bind(result.cluster_id.as_ref().map(|cluster| cluster.0.as_str()))
            .bind(to_i64(result.opportunity_count, "opportunity_count")?)
            .bind(total_quantity)
            .bind(result.total_investment)
            .bind(result.total_retail_value)
            .bind(result.average_predicted_sell_through)
            .bind(result.average_sell_through_improvement)
            .bind(to_i64(result.approved_count, "approved_count")?)
            .bind(result.rule_flag)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            event_name = "db.run.saved",
            run_id = %run.id,
            opportunities = run.opportunity_count,
            stores = run.store_count,
            "analysis run persisted"
        );
        Ok(())
    }

    async fn find_run(&self, id: &RunId) -> Result<Option<AnalysisRun>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, created_at, granularity, strict_mode, roi_enabled, checksum,
                    opportunity_count, store_count, diagnostics_json
             FROM analysis_run
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_run).transpose()
    }

    async fn store_results(&self, id: &RunId) -> Result<Vec<StoreResult>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT store_id, cluster_id, opportunity_count, total_quantity, total_investment,
                    total_retail_value, average_predicted_sell_through,
                    average_sell_through_improvement, approved_count, rule_flag
             FROM run_store_result
             WHERE run_id = ?
             ORDER BY store_id",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_store_result).collect::<Result<Vec<_>, _>>()
    }

    async fn opportunities(&self, id: &RunId) -> Result<Vec<Opportunity>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM run_opportunity
             WHERE run_id = ?
             ORDER BY cluster_id, feature_id, store_id",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_opportunity).collect::<Result<Vec<_>, _>>()
    }
}
