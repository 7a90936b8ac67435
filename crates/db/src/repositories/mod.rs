use async_trait::async_trait;
use thiserror::Error;

use shelfgap_core::domain::opportunity::{Opportunity, StoreResult};
use shelfgap_core::domain::snapshot::AnalysisSnapshot;
use shelfgap_core::PipelineOutput;

pub mod run;
pub mod snapshot;

pub use run::{AnalysisRun, RunId, SqlRunRepository};
pub use snapshot::SqlSnapshotRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Stores the input tables for the next engine run.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Replaces the current snapshot atomically.
    async fn save_snapshot(&self, snapshot: &AnalysisSnapshot) -> Result<(), RepositoryError>;

    async fn load_snapshot(&self) -> Result<AnalysisSnapshot, RepositoryError>;
}

#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn save_run(
        &self,
        run: &AnalysisRun,
        output: &PipelineOutput,
    ) -> Result<(), RepositoryError>;

    async fn find_run(&self, id: &RunId) -> Result<Option<AnalysisRun>, RepositoryError>;

    async fn store_results(&self, id: &RunId) -> Result<Vec<StoreResult>, RepositoryError>;

    async fn opportunities(&self, id: &RunId) -> Result<Vec<Opportunity>, RepositoryError>;
}

pub(crate) fn decode_error(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}
