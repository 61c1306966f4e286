pub mod llama;
pub mod postgres;

pub use llama::{parse_pools, LlamaYieldsClient};
pub use postgres::PostgresStore;

use crate::domain::PoolSnapshot;
use crate::error::Result;
use async_trait::async_trait;

/// Source of the full pool universe for one chain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PoolDataSource: Send + Sync {
    /// Fetch every pool currently reported for the configured chain
    async fn fetch_pools(&self) -> Result<Vec<PoolSnapshot>>;
}
