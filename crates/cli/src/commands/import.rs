use std::path::Path;

use serde_json::json;
use shelfgap_core::config::{AppConfig, LoadOptions};
use shelfgap_core::ApplicationError;
use shelfgap_db::{connect_with_settings, migrations, SnapshotRepository, SqlSnapshotRepository};

use crate::commands::{runtime, CommandResult, StepFailure};
use crate::io;

const COMMAND: &str = "import";

pub fn run(input_dir: &Path) -> CommandResult {
    match execute(input_dir) {
        Ok(result) => result,
        Err(failure) => failure.into_result(COMMAND),
    }
}

fn execute(input_dir: &Path) -> Result<CommandResult, StepFailure> {
    let config = AppConfig::load(LoadOptions::default())
        .map_err(|error| StepFailure::from(ApplicationError::from(error)))?;
    let snapshot = io::load_snapshot_dir(input_dir)
        .map_err(|error| StepFailure::from(ApplicationError::Input(format!("{error:#}"))))?;

    let runtime = runtime()?;
    runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| StepFailure::new("db_connectivity", error.to_string(), 4))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| StepFailure::new("migration", error.to_string(), 5))?;

        let repository = SqlSnapshotRepository::new(pool.clone());
        let saved = repository.save_snapshot(&snapshot).await;
        pool.close().await;
        saved.map_err(|error| StepFailure::from(ApplicationError::Persistence(error.to_string())))
    })?;

    let details = json!({
        "assignments": snapshot.assignments.len(),
        "sales": snapshot.sales.len(),
        "quantities": snapshot.quantities.len(),
        "margins": snapshot.margins.len(),
        "categories": snapshot.categories.len(),
        "signals": snapshot.signals.len(),
    });
    Ok(CommandResult::success_with_details(
        COMMAND,
        format!("imported {} stores from {}", snapshot.assignments.len(), input_dir.display()),
        Some(details),
    ))
}
