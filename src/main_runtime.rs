use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use yieldscout::adapters::PostgresStore;
use yieldscout::config::{DatabaseConfig, LoggingConfig};
use yieldscout::error::Result;
use yieldscout::persistence::{MemoryStore, Store};

/// Open the configured store. Postgres is migrated before use.
pub async fn connect_store(config: &DatabaseConfig, memory: bool) -> Result<Arc<dyn Store>> {
    if memory {
        info!("Using in-memory store; nothing will be persisted");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = PostgresStore::new(&config.url, config.max_connections).await?;
    store.migrate().await?;
    Ok(Arc::new(store))
}

pub fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::Layer;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},yieldscout=debug,sqlx=warn", config.level))
    });

    // File logging is opt-in through SCOUT_LOG_DIR
    let log_dir = std::env::var("SCOUT_LOG_DIR").ok();

    // `rolling::daily` panics if it can't create the initial file, so
    // writability is checked first.
    let file_layer = log_dir.as_deref().and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "Warning: Could not create log directory {} ({}), file logging disabled",
                dir, e
            );
            return None;
        }

        let test_path = std::path::Path::new(dir).join(".yieldscout_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);

                let file_appender = tracing_appender::rolling::daily(dir, "yieldscout.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                // The process logs until exit
                Box::leak(Box::new(guard));

                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    dir, e
                );
                None
            }
        }
    });

    let console_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    };

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let (true, Some(dir)) = (file_logging_enabled, log_dir) {
        eprintln!("Logging to: {}/yieldscout.log", dir);
    }
}

pub fn init_logging_simple() {
    // Read-only commands only surface problems
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
