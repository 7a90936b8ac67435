pub mod commands;
pub mod io;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use shelfgap_core::config::{AppConfig, LoadOptions};
use shelfgap_core::Granularity;

use commands::analyze::AnalyzeArgs;

#[derive(Debug, Parser)]
#[command(
    name = "shelfgap",
    about = "Shelfgap assortment opportunity CLI",
    long_about = "Find products that sell well across peer-store clusters but are missing from individual stores, validate them, and report per-store recommendations.",
    after_help = "Examples:\n  shelfgap analyze --input-dir data/ --output-dir out/\n  shelfgap import --input-dir data/\n  shelfgap analyze --from-db --persist --roi\n  shelfgap config"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run the opportunity pipeline and write the recommendation tables")]
    Analyze {
        #[arg(long, help = "Directory holding the input CSV tables")]
        input_dir: Option<PathBuf>,
        #[arg(long, help = "Directory for opportunities.csv and store_results.csv")]
        output_dir: Option<PathBuf>,
        #[arg(long, help = "Read inputs from the database snapshot instead of CSV")]
        from_db: bool,
        #[arg(long, help = "Store the run and its tables in the database")]
        persist: bool,
        #[arg(long, value_parser = parse_granularity, help = "subcategory or sku")]
        granularity: Option<Granularity>,
        #[arg(long, help = "Compute margin ROI and apply the ROI gates")]
        roi: bool,
    },
    #[command(about = "Load input CSV tables into the database snapshot")]
    Import {
        #[arg(long, help = "Directory holding the input CSV tables")]
        input_dir: PathBuf,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
}

fn parse_granularity(value: &str) -> Result<Granularity, String> {
    value.parse()
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        logging::init_logging(&config);
    }

    let result = match cli.command {
        Command::Analyze { input_dir, output_dir, from_db, persist, granularity, roi } => {
            commands::analyze::run(AnalyzeArgs {
                input_dir,
                output_dir,
                from_db,
                persist,
                granularity,
                roi,
            })
        }
        Command::Import { input_dir } => commands::import::run(&input_dir),
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
