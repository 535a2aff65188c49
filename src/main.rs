use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use logistics_etl::config::EtlConfig;
use logistics_etl::logging;
use logistics_etl::pipeline::storage::{FsWarehouse, SqliteStore};
use logistics_etl::pipeline::Pipeline;
use logistics_etl::verify;

#[derive(Parser)]
#[command(name = "logistics-etl")]
#[command(about = "Full-refresh ETL for product, warehouse, order, delivery and stock movement data")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./etl.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for rotated JSON log files
    #[arg(long, global = true, default_value = "logs")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the whole pipeline: read, normalize, stage, derive facts, publish
    Run,
    /// Load and validate configuration, then print it (secrets redacted)
    CheckConfig,
    /// Check that every published table exists and holds rows
    Verify,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env before anything reads the environment
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let _guard = logging::init_logging(&cli.log_dir);

    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = EtlConfig::load(cli.config.as_deref()).context("invalid configuration")?;

    match cli.command {
        Commands::Run => {
            println!("🚀 Running full-refresh pipeline...");
            let pipeline = Pipeline::from_config(config);
            match pipeline.run().await {
                Ok(report) => {
                    println!("\n📊 Run {} ({}):", report.run_id, report.load_date);
                    for load in &report.published {
                        println!("   {:<16} {} rows", load.table, load.rows);
                    }
                    println!("   Elapsed: {:.2}s", report.elapsed.as_secs_f64());
                    println!("✅ Pipeline completed successfully");
                    Ok(ExitCode::SUCCESS)
                }
                Err(failure) => {
                    println!("❌ Stage {} failed: {}", failure.stage, failure.source);
                    let implicated = failure.implicated();
                    if !implicated.is_empty() {
                        println!("   Implicated: {}", implicated.join(", "));
                    }
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::CheckConfig => {
            println!("{config:#?}");
            println!("✅ Configuration is valid");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Verify => {
            let store = SqliteStore::open_existing(&config.staging.database)
                .context("could not open staging store")?;
            let warehouse = FsWarehouse::new(config.warehouse.path.clone());

            let staging = verify::verify_staging(&store).await;
            let published = verify::verify_warehouse(&warehouse, &config.warehouse.target()).await;
            print!("{staging}{published}");

            if staging.passed() && published.passed() {
                info!("Verification passed");
                println!("✅ All tables contain data");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("❌ Verification failed");
                Ok(ExitCode::FAILURE)
            }
        }
    }
}
