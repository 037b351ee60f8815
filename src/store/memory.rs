use async_trait::async_trait;
use tokio::sync::RwLock;

use super::TokenStore;
use crate::error::StoreError;
use crate::token::TokenRecord;

/// In-memory token store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    record: RwLock<Option<TokenRecord>>,
}

impl MemoryTokenStore {
    pub fn new(record: Option<TokenRecord>) -> Self {
        Self {
            record: RwLock::new(record),
        }
    }

    /// Current contents, for assertions.
    pub async fn snapshot(&self) -> Option<TokenRecord> {
        self.record.read().await.clone()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self.record.read().await.clone())
    }

    async fn save(&self, record: &TokenRecord) -> Result<(), StoreError> {
        *self.record.write().await = Some(record.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
