pub mod adapters;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod services;
pub mod strategy;

pub use adapters::{LlamaYieldsClient, PoolDataSource, PostgresStore};
pub use config::AppConfig;
pub use coordination::{GracefulShutdown, ShutdownSignal, ShutdownToken};
pub use error::{Result, ScoutError};
pub use persistence::{MemoryStore, Page, Store};
pub use services::{CycleReport, CycleScheduler, DetectionEngine, SchedulerStats};
