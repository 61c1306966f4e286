mod main_runtime;

use chrono::Utc;
use clap::Parser;
use main_runtime::{connect_store, init_logging, init_logging_simple};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use yieldscout::adapters::{LlamaYieldsClient, PoolDataSource, PostgresStore};
use yieldscout::cli::{
    print_item, print_items, Cli, Commands, CycleRow, LogRow, OutputMode, PositionRow,
    WatchlistRow,
};
use yieldscout::config::AppConfig;
use yieldscout::coordination::{install_signal_handlers, GracefulShutdown, ShutdownToken};
use yieldscout::error::{Result, ScoutError};
use yieldscout::persistence::{Page, Store};
use yieldscout::services::{CycleScheduler, DetectionEngine};
use yieldscout::strategy::PortfolioReport;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config_dir)?;
    let mode = OutputMode::from_json_flag(cli.json);

    if cli.command.is_long_running() {
        init_logging(&config.logging);
    } else {
        init_logging_simple();
    }

    match cli.command {
        Commands::Run { memory } => run_scheduler(config, memory).await?,
        Commands::Once { memory } => run_once(config, memory, mode).await?,
        Commands::Status => show_status(&config, mode).await?,
        Commands::History { page, per_page } => {
            let store = connect_store(&config.database, false).await?;
            let exited = store.exited_positions(Page::new(page, per_page)).await?;
            let rows: Vec<PositionRow> = exited.iter().map(PositionRow::from).collect();
            print_items(&rows, mode)?;
        }
        Commands::Watchlist => {
            let store = connect_store(&config.database, false).await?;
            let now = Utc::now();
            let rows: Vec<WatchlistRow> = store
                .watchlist()
                .await?
                .iter()
                .map(|e| WatchlistRow::new(e, now))
                .collect();
            print_items(&rows, mode)?;
        }
        Commands::Cycles { limit } => {
            let store = connect_store(&config.database, false).await?;
            let rows: Vec<CycleRow> = store
                .recent_cycles(limit)
                .await?
                .iter()
                .map(CycleRow::from)
                .collect();
            print_items(&rows, mode)?;
        }
        Commands::Logs { cycle } => {
            let store = connect_store(&config.database, false).await?;
            let rows: Vec<LogRow> = store
                .cycle_logs(cycle)
                .await?
                .iter()
                .map(LogRow::from)
                .collect();
            print_items(&rows, mode)?;
        }
        Commands::Exit { position_id } => exit_position(config, position_id, mode).await?,
        Commands::Migrate => {
            let store = PostgresStore::new(&config.database.url, config.database.max_connections)
                .await?;
            store.migrate().await?;
            println!("Migrations applied");
        }
        Commands::CheckConfig => {
            let mut shown = config.clone();
            shown.database.url = redact_url(&shown.database.url);
            print_item(&shown, mode)?;
        }
    }

    Ok(())
}

fn load_config(dir: &Path) -> Result<AppConfig> {
    let config = AppConfig::load_from(dir)?;
    config.validate().map_err(ScoutError::InvalidConfig)?;
    Ok(config)
}

async fn run_scheduler(config: AppConfig, memory: bool) -> Result<()> {
    let store = connect_store(&config.database, memory).await?;
    let source: Arc<dyn PoolDataSource> = Arc::new(LlamaYieldsClient::new(config.source.clone())?);
    let scheduler_config = config.scheduler.clone();

    let engine = DetectionEngine::new(config, source, store).await?;

    let shutdown = Arc::new(GracefulShutdown::new());
    install_signal_handlers(shutdown.clone());

    let (engine, stats) = CycleScheduler::new(engine, &scheduler_config)
        .run(shutdown.token())
        .await;

    let report = engine.report(Utc::now()).await?;
    info!(
        cycles = stats.cycles_run,
        degraded = stats.cycles_degraded,
        failed = stats.cycles_failed,
        active = report.active_count,
        realized_pnl = %report.realized_pnl,
        "Shutdown complete"
    );
    Ok(())
}

async fn run_once(config: AppConfig, memory: bool, mode: OutputMode) -> Result<()> {
    let store = connect_store(&config.database, memory).await?;
    let source: Arc<dyn PoolDataSource> = Arc::new(LlamaYieldsClient::new(config.source.clone())?);

    let mut engine = DetectionEngine::new(config, source, store).await?;
    let report = engine.run_cycle(&ShutdownToken::never()).await?;

    if report.cycle.is_degraded() {
        warn!(
            failure = report.cycle.failure.as_deref().unwrap_or_default(),
            "Cycle finished degraded"
        );
    }
    print_items(&[CycleRow::from(&report.cycle)], mode)?;

    let active: Vec<PositionRow> = engine
        .portfolio()
        .active_positions()
        .iter()
        .map(PositionRow::from)
        .collect();
    print_items(&active, mode)?;
    Ok(())
}

async fn show_status(config: &AppConfig, mode: OutputMode) -> Result<()> {
    let store = connect_store(&config.database, false).await?;
    let active = store.active_positions().await?;
    let exited = store.all_exited_positions().await?;

    let rows: Vec<PositionRow> = active.iter().map(PositionRow::from).collect();
    print_items(&rows, mode)?;

    // Valued at entry APY; the status command does not hit the data source
    let report = PortfolioReport::build(&active, &exited, &Default::default(), Utc::now());
    print_item(&report, mode)?;
    Ok(())
}

async fn exit_position(config: AppConfig, position_id: i64, mode: OutputMode) -> Result<()> {
    let store = connect_store(&config.database, false).await?;
    let position = store
        .get_position(position_id)
        .await?
        .ok_or(ScoutError::PositionNotFound(position_id))?;

    let client = LlamaYieldsClient::new(config.source.clone())?;
    let current_apy = match client.fetch_pools().await {
        Ok(pools) => pools
            .into_iter()
            .find(|p| p.pool_id == position.pool_id)
            .map(|p| p.apy),
        Err(e) => {
            warn!("Could not fetch current APY, using entry APY: {}", e);
            None
        }
    };

    let mut engine = DetectionEngine::new(config, Arc::new(client), store).await?;
    let closed = engine
        .manual_exit(position_id, current_apy, Utc::now())
        .await?;

    print_items(&[PositionRow::from(&closed)], mode)?;
    Ok(())
}

/// Hide credentials in a connection URL
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end + 3 => {
            format!("{}***{}", &url[..scheme_end + 3], &url[at..])
        }
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("postgres://scout:hunter2@db:5432/yieldscout"),
            "postgres://***@db:5432/yieldscout"
        );
        assert_eq!(
            redact_url("postgres://localhost/yieldscout"),
            "postgres://localhost/yieldscout"
        );
    }
}
