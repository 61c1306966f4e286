use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod output;
pub mod rows;

pub use output::{print_item, print_items, OutputMode};
pub use rows::{CycleRow, LogRow, PositionRow, WatchlistRow};

#[derive(Parser, Debug)]
#[command(name = "yieldscout")]
#[command(version)]
#[command(about = "New yield pool detection, scoring and simulated portfolio tracking", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding default.toml and environment overlays
    #[arg(long, global = true, default_value = "config", env = "SCOUT_CONFIG_DIR")]
    pub config_dir: PathBuf,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run detection cycles on the configured interval until shutdown
    Run {
        /// Keep state in memory instead of PostgreSQL
        #[arg(long)]
        memory: bool,
    },
    /// Run a single detection cycle and exit
    Once {
        /// Keep state in memory instead of PostgreSQL
        #[arg(long)]
        memory: bool,
    },
    /// Active positions and portfolio summary
    Status,
    /// Exited positions, most recent first
    History {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        per_page: u32,
    },
    /// Pools on the maturation watchlist
    Watchlist,
    /// Recent detection cycles
    Cycles {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Structured log entries of one cycle
    Logs {
        #[arg(long)]
        cycle: i64,
    },
    /// Close an active position now
    Exit {
        /// Position ID
        position_id: i64,
    },
    /// Apply database migrations
    Migrate,
    /// Validate configuration and print the effective values
    CheckConfig,
}

impl Commands {
    /// Commands that drive cycles get full logging; the rest stay quiet
    pub fn is_long_running(&self) -> bool {
        matches!(self, Commands::Run { .. } | Commands::Once { .. })
    }
}
