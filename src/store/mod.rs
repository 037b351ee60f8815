//! Persistence: the single-record token store and the Postgres ledger.
//!
//! Token store backends:
//! - [`FileTokenStore`] - `tokens.json` on local disk (default)
//! - [`PgTokenStore`] - one row in `hubspot_tokens`
//! - [`MemoryTokenStore`] - in-memory (tests)

pub mod db;
mod file;
mod memory;
mod postgres;

use async_trait::async_trait;

pub use db::{Database, Ledger};
pub use file::FileTokenStore;
pub use memory::MemoryTokenStore;
pub use postgres::PgTokenStore;

use crate::error::StoreError;
use crate::token::TokenRecord;

/// Storage for the installation's single [`TokenRecord`].
///
/// Implementations hold no lock between calls; each `load`/`save` is a scoped
/// read or write.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the record, `None` if nothing was ever stored.
    async fn load(&self) -> Result<Option<TokenRecord>, StoreError>;

    /// Replace the record.
    async fn save(&self, record: &TokenRecord) -> Result<(), StoreError>;

    /// Name of this storage backend.
    fn name(&self) -> &str {
        "unknown"
    }
}
