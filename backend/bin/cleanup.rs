use anyhow::Result;
use clap::{Arg, Command};
use flick::db::{DatabaseConfig, PgStore};
use flick::services::run_cleanup;
use flick::{get_db_pool, utils, BroadcastBus, Core, CoreSettings};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    utils::init_logging();

    let matches = Command::new("cleanup")
        .about("Delete phone exchanges whose TTL has run out")
        .arg(
            Arg::new("database-url")
                .long("database-url")
                .help("Overrides DATABASE_URL")
                .value_name("URL"),
        )
        .get_matches();

    match run(matches.get_one::<String>("database-url").cloned()).await {
        Ok(report) => {
            println!("{}", report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Cleanup failed: {:#}", e);
            eprintln!(
                "{}",
                serde_json::json!({ "success": false, "error": format!("{:#}", e) })
            );
            ExitCode::FAILURE
        }
    }
}

async fn run(database_url: Option<String>) -> Result<String> {
    let db_config = match database_url {
        Some(database_url) => DatabaseConfig {
            database_url,
            max_connections: 2,
            acquire_timeout: Duration::from_secs(5),
        },
        None => DatabaseConfig::from_env()?,
    };
    let pool = get_db_pool(&db_config).await?;
    info!("Connected to database");

    let core = Core::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(BroadcastBus::new()),
        Arc::new(utils::SystemClock),
        CoreSettings::default(),
    );

    let report = run_cleanup(&core.vault).await?;
    info!("Deleted {} expired exchange(s)", report.deleted_exchanges);
    Ok(serde_json::to_string(&report)?)
}
