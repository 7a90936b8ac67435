use sqlx::Row;
use tracing::info;

use shelfgap_core::domain::sales::{
    FeatureCategory, FeatureId, MarginRecord, QuantityRecord, SalesRecord, SellThroughSignal,
};
use shelfgap_core::domain::snapshot::AnalysisSnapshot;
use shelfgap_core::domain::store::{ClusterAssignment, ClusterId, ClusterMap, StoreId};

use super::{decode_error, RepositoryError, SnapshotRepository};
use crate::DbPool;

const INPUT_TABLES: &[&str] = &[
    "cluster_assignment",
    "store_sales",
    "store_quantity",
    "margin_rate",
    "feature_category",
    "sell_through_signal",
];

pub struct SqlSnapshotRepository {
    pool: DbPool,
}

impl SqlSnapshotRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SnapshotRepository for SqlSnapshotRepository {
    async fn save_snapshot(&self, snapshot: &AnalysisSnapshot) -> Result<(), RepositoryError> {
        let clusters = ClusterMap::from_assignments(&snapshot.assignments)
            .map_err(|error| RepositoryError::InvalidSnapshot(error.to_string()))?;

        let mut tx = self.pool.begin().await?;
        for table in INPUT_TABLES {
            sqlx::query(&format!("DELETE FROM {table}")).execute(&mut *tx).await?;
        }

        for (store_id, cluster_id) in clusters.stores() {
            sqlx::query("INSERT INTO cluster_assignment (store_id, cluster_id) VALUES (?, ?)")
                .bind(&store_id.0)
                .bind(cluster_id.map(|cluster| cluster.0.as_str()))
                .execute(&mut *tx)
                .await?;
        }

        for row in &snapshot.sales {
            sqlx::query(
                "INSERT INTO store_sales (store_id, feature_id, sales_amount, units)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&row.store_id.0)
            .bind(&row.feature_id.0)
            .bind(row.sales_amount)
            .bind(row.units)
            .execute(&mut *tx)
            .await?;
        }

        for row in &snapshot.quantities {
            sqlx::query(
                "INSERT INTO store_quantity (store_id, feature_id, total_quantity, total_amount)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&row.store_id.0)
            .bind(row.feature_id.as_ref().map(|feature| feature.0.as_str()))
            .bind(row.total_quantity)
            .bind(row.total_amount)
            .execute(&mut *tx)
            .await?;
        }

        for row in &snapshot.margins {
            sqlx::query(
                "INSERT INTO margin_rate (store_id, feature_id, margin_rate) VALUES (?, ?, ?)",
            )
            .bind(&row.store_id.0)
            .bind(&row.feature_id.0)
            .bind(row.margin_rate)
            .execute(&mut *tx)
            .await?;
        }

        for row in &snapshot.categories {
            sqlx::query(
                "INSERT INTO feature_category (feature_id, parent_category) VALUES (?, ?)
                 ON CONFLICT(feature_id) DO UPDATE SET parent_category = excluded.parent_category",
            )
            .bind(&row.feature_id.0)
            .bind(&row.parent_category.0)
            .execute(&mut *tx)
            .await?;
        }

        for row in &snapshot.signals {
            sqlx::query(
                "INSERT INTO sell_through_signal
                    (store_id, feature_id, cluster_p50, store_baseline, seasonal_adjustment)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(store_id, feature_id) DO UPDATE SET
                    cluster_p50 = excluded.cluster_p50,
                    store_baseline = excluded.store_baseline,
                    seasonal_adjustment = excluded.seasonal_adjustment",
            )
            .bind(&row.store_id.0)
            .bind(&row.feature_id.0)
            .bind(row.cluster_p50)
            .bind(row.store_baseline)
            .bind(row.seasonal_adjustment)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            event_name = "db.snapshot.saved",
            stores = clusters.store_count(),
            sales_rows = snapshot.sales.len(),
            quantity_rows = snapshot.quantities.len(),
            margin_rows = snapshot.margins.len(),
            "input snapshot replaced"
        );
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<AnalysisSnapshot, RepositoryError> {
        let assignments = sqlx::query(
            "SELECT store_id, cluster_id FROM cluster_assignment ORDER BY store_id",
        )
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| {
            Ok(ClusterAssignment {
                store_id: StoreId(row.try_get("store_id").map_err(decode_error)?),
                cluster_id: row
                    .try_get::<Option<String>, _>("cluster_id")
                    .map_err(decode_error)?
                    .map(ClusterId),
            })
        })
        .collect::<Result<Vec<_>, RepositoryError>>()?;

        let sales = sqlx::query(
            "SELECT store_id, feature_id, sales_amount, units FROM store_sales ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| {
            Ok(SalesRecord {
                store_id: StoreId(row.try_get("store_id").map_err(decode_error)?),
                feature_id: FeatureId(row.try_get("feature_id").map_err(decode_error)?),
                sales_amount: row.try_get("sales_amount").map_err(decode_error)?,
                units: row.try_get("units").map_err(decode_error)?,
            })
        })
        .collect::<Result<Vec<_>, RepositoryError>>()?;

        let quantities = sqlx::query(
            "SELECT store_id, feature_id, total_quantity, total_amount
             FROM store_quantity ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| {
            Ok(QuantityRecord {
                store_id: StoreId(row.try_get("store_id").map_err(decode_error)?),
                feature_id: row
                    .try_get::<Option<String>, _>("feature_id")
                    .map_err(decode_error)?
                    .map(FeatureId),
                total_quantity: row.try_get("total_quantity").map_err(decode_error)?,
                total_amount: row.try_get("total_amount").map_err(decode_error)?,
            })
        })
        .collect::<Result<Vec<_>, RepositoryError>>()?;

        let margins = sqlx::query(
            "SELECT store_id, feature_id, margin_rate FROM margin_rate ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| {
            Ok(MarginRecord {
                store_id: StoreId(row.try_get("store_id").map_err(decode_error)?),
                feature_id: FeatureId(row.try_get("feature_id").map_err(decode_error)?),
                margin_rate: row.try_get("margin_rate").map_err(decode_error)?,
            })
        })
        .collect::<Result<Vec<_>, RepositoryError>>()?;

        let categories = sqlx::query(
            "SELECT feature_id, parent_category FROM feature_category ORDER BY feature_id",
        )
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| {
            Ok(FeatureCategory {
                feature_id: FeatureId(row.try_get("feature_id").map_err(decode_error)?),
                parent_category: FeatureId(row.try_get("parent_category").map_err(decode_error)?),
            })
        })
        .collect::<Result<Vec<_>, RepositoryError>>()?;

        let signals = sqlx::query(
            "SELECT store_id, feature_id, cluster_p50, store_baseline, seasonal_adjustment
             FROM sell_through_signal ORDER BY store_id, feature_id",
        )
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| {
            Ok(SellThroughSignal {
                store_id: StoreId(row.try_get("store_id").map_err(decode_error)?),
                feature_id: FeatureId(row.try_get("feature_id").map_err(decode_error)?),
                cluster_p50: row.try_get("cluster_p50").map_err(decode_error)?,
                store_baseline: row.try_get("store_baseline").map_err(decode_error)?,
                seasonal_adjustment: row.try_get("seasonal_adjustment").map_err(decode_error)?,
            })
        })
        .collect::<Result<Vec<_>, RepositoryError>>()?;

        Ok(AnalysisSnapshot::new(assignments, sales)
            .with_quantities(quantities)
            .with_margins(margins)
            .with_categories(categories)
            .with_signals(signals))
    }
}

#[cfg(test)]
mod tests {
    use shelfgap_core::domain::sales::{FeatureId, QuantityRecord, SalesRecord, SellThroughSignal};
    use shelfgap_core::domain::snapshot::AnalysisSnapshot;
    use shelfgap_core::domain::store::{ClusterAssignment, ClusterId, StoreId};

    use super::SqlSnapshotRepository;
    use crate::repositories::{RepositoryError, SnapshotRepository};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn assignment(store: &str, cluster: Option<&str>) -> ClusterAssignment {
        ClusterAssignment {
            store_id: StoreId(store.to_string()),
            cluster_id: cluster.map(|value| ClusterId(value.to_string())),
        }
    }

    fn sample_snapshot() -> AnalysisSnapshot {
        AnalysisSnapshot::new(
            vec![assignment("S2", Some("C1")), assignment("S1", Some("C1")), assignment("S3", None)],
            vec![SalesRecord {
                store_id: StoreId("S1".to_string()),
                feature_id: FeatureId("PASTA".to_string()),
                sales_amount: 320.5,
                units: Some(64.0),
            }],
        )
        .with_quantities(vec![QuantityRecord {
            store_id: StoreId("S2".to_string()),
            feature_id: None,
            total_quantity: 10.0,
            total_amount: 45.0,
        }])
        .with_signals(vec![SellThroughSignal {
            store_id: StoreId("S2".to_string()),
            feature_id: FeatureId("PASTA".to_string()),
            cluster_p50: Some(0.55),
            store_baseline: None,
            seasonal_adjustment: None,
        }])
    }

    #[tokio::test]
    async fn save_then_load_returns_the_snapshot() {
        let repo = SqlSnapshotRepository::new(setup().await);

        repo.save_snapshot(&sample_snapshot()).await.expect("save snapshot");
        let loaded = repo.load_snapshot().await.expect("load snapshot");

        assert_eq!(loaded.assignments.len(), 3);
        assert_eq!(loaded.assignments[0].store_id, StoreId("S1".to_string()));
        assert_eq!(loaded.assignments[2].cluster_id, None);
        assert_eq!(loaded.sales, sample_snapshot().sales);
        assert_eq!(loaded.quantities[0].feature_id, None);
        assert_eq!(loaded.signals[0].cluster_p50, Some(0.55));
    }

    #[tokio::test]
    async fn saving_replaces_the_previous_snapshot() {
        let repo = SqlSnapshotRepository::new(setup().await);
        repo.save_snapshot(&sample_snapshot()).await.expect("first save");

        let smaller = AnalysisSnapshot::new(vec![assignment("S9", Some("C4"))], Vec::new());
        repo.save_snapshot(&smaller).await.expect("second save");

        let loaded = repo.load_snapshot().await.expect("load snapshot");
        assert_eq!(loaded.assignments.len(), 1);
        assert!(loaded.sales.is_empty());
        assert!(loaded.signals.is_empty());
    }

    #[tokio::test]
    async fn conflicting_cluster_assignment_is_rejected() {
        let repo = SqlSnapshotRepository::new(setup().await);
        let snapshot = AnalysisSnapshot::new(
            vec![assignment("S1", Some("C1")), assignment("S1", Some("C2"))],
            Vec::new(),
        );

        let error = repo.save_snapshot(&snapshot).await.expect_err("conflict rejected");
        assert!(matches!(error, RepositoryError::InvalidSnapshot(_)));
    }
}
