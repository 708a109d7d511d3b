use edudb_gateway::config::Config;
use edudb_gateway::db;
use edudb_gateway::health::HealthCheckService;
use edudb_gateway::http::{self, AppState};
use edudb_gateway::migrate;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse_args();
    init_tracing(&config);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Gateway exited with error");
            if let Some(suggestion) = e.suggestion() {
                error!(suggestion, "Suggested fix");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(config: Config) -> edudb_gateway::DbResult<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "Starting database gateway");

    let manager = db::init_global(config.clone()).await?;
    info!(backend = %manager.database_type().await, "Database backend active");

    if config.migrate {
        let handle = manager.db().await;
        let summary = migrate::run_provisioning(&handle).await?;
        info!(
            applied = summary.applied,
            skipped = summary.skipped,
            "Schema provisioning finished"
        );
        let report = migrate::verify_schema(&handle).await?;
        if !report.is_complete() {
            error!(missing = ?report.missing, "Schema incomplete after provisioning");
        }
    }

    let health = HealthCheckService::new(manager.clone(), &config).await;
    let state = Arc::new(AppState {
        manager: manager.clone(),
        health,
    });

    http::serve(&config, state).await?;

    manager.close().await;
    info!("Gateway stopped");
    Ok(())
}
