use std::path::PathBuf;

use serde_json::json;
use shelfgap_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use shelfgap_core::{AnalysisSnapshot, ApplicationError, Granularity, OpportunityPipeline};
use shelfgap_db::{
    connect_with_settings, migrations, AnalysisRun, DbPool, RunRepository, SnapshotRepository,
    SqlRunRepository, SqlSnapshotRepository,
};
use tracing::info;

use crate::commands::{runtime, CommandResult, StepFailure};
use crate::io;

const COMMAND: &str = "analyze";

#[derive(Clone, Debug, Default)]
pub struct AnalyzeArgs {
    pub input_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub from_db: bool,
    pub persist: bool,
    pub granularity: Option<Granularity>,
    pub roi: bool,
}

pub fn run(args: AnalyzeArgs) -> CommandResult {
    match execute(args) {
        Ok(result) => result,
        Err(failure) => failure.into_result(COMMAND),
    }
}

fn execute(args: AnalyzeArgs) -> Result<CommandResult, StepFailure> {
    let overrides = ConfigOverrides {
        granularity: args.granularity,
        roi_enabled: args.roi.then_some(true),
        ..ConfigOverrides::default()
    };
    let config = AppConfig::load(LoadOptions { overrides, ..LoadOptions::default() })
        .map_err(|error| StepFailure::from(ApplicationError::from(error)))?;
    let engine_config = config.engine_config();

    if args.input_dir.is_none() && !args.from_db {
        return Err(StepFailure::new("input", "either --input-dir or --from-db is required", 4));
    }
    let needs_database = args.from_db || args.persist;
    let runtime = if needs_database { Some(runtime()?) } else { None };
    let pool = match &runtime {
        Some(runtime) => Some(runtime.block_on(open_pool(&config))?),
        None => None,
    };

    let snapshot = match (&runtime, &pool, &args.input_dir) {
        (Some(runtime), Some(pool), _) if args.from_db => {
            runtime.block_on(load_from_db(pool.clone()))?
        }
        (_, _, Some(input_dir)) => io::load_snapshot_dir(input_dir).map_err(|error| {
            StepFailure::from(ApplicationError::Input(format!("{error:#}")))
        })?,
        _ => return Err(StepFailure::new("input", "no input source available", 4)),
    };

    let pipeline = OpportunityPipeline::new(engine_config)
        .map_err(|error| StepFailure::from(ApplicationError::from(error)))?;
    let output = pipeline
        .run(&snapshot)
        .map_err(|error| StepFailure::from(ApplicationError::from(error)))?;

    let output_dir = args.output_dir.clone().or_else(|| args.input_dir.clone());
    if let Some(dir) = &output_dir {
        io::write_outputs(dir, &output.opportunities, &output.store_results).map_err(|error| {
            StepFailure::new("output", format!("failed to write results: {error:#}"), 5)
        })?;
    }

    let run_id = match (&runtime, &pool) {
        (Some(runtime), Some(pool)) if args.persist => {
            let run = AnalysisRun::from_output(&engine_config, &output);
            let repository = SqlRunRepository::new(pool.clone());
            runtime.block_on(repository.save_run(&run, &output)).map_err(|error| {
                StepFailure::from(ApplicationError::Persistence(error.to_string()))
            })?;
            Some(run.id.to_string())
        }
        _ => None,
    };

    if let (Some(runtime), Some(pool)) = (&runtime, pool) {
        runtime.block_on(pool.close());
    }

    info!(
        event_name = "cli.analyze.completed",
        opportunities = output.opportunities.len(),
        stores = output.store_results.len(),
        persisted = run_id.is_some(),
        "analysis finished"
    );

    let message = format!(
        "identified {} approved opportunities across {} stores",
        output.opportunities.len(),
        output.store_results.len()
    );
    let details = json!({
        "granularity": engine_config.granularity.as_str(),
        "roi_enabled": engine_config.roi.enabled,
        "checksum": output.checksum,
        "opportunities": output.opportunities.len(),
        "stores": output.store_results.len(),
        "diagnostics": output.diagnostics,
        "output_dir": output_dir.map(|dir| dir.display().to_string()),
        "run_id": run_id,
    });
    Ok(CommandResult::success_with_details(COMMAND, message, Some(details)))
}

async fn open_pool(config: &AppConfig) -> Result<DbPool, StepFailure> {
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
    Ok(pool)
}

async fn load_from_db(pool: DbPool) -> Result<AnalysisSnapshot, StepFailure> {
    SqlSnapshotRepository::new(pool)
        .load_snapshot()
        .await
        .map_err(|error| StepFailure::from(ApplicationError::Persistence(error.to_string())))
}
