use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::TokenRepository;
use crate::errors::{StoreError, StoreResult};
use crate::models::token::Token;

/// In-process token store for single-instance deployments and tests.
///
/// Reads share the lock; writes are exclusive. Nothing survives a restart.
/// Expired tokens stay until deleted.
#[derive(Clone, Default)]
pub struct MemoryTokenStore(Arc<RwLock<HashMap<String, Token>>>);

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tokens, expired ones included.
    pub async fn len(&self) -> usize {
        self.0.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.0.read().await.is_empty()
    }
}

#[async_trait]
impl TokenRepository for MemoryTokenStore {
    async fn get(&self, id: &str) -> StoreResult<Option<Token>> {
        Ok(self.0.read().await.get(id).cloned())
    }

    async fn get_by_owner(&self, owner_id: &str) -> StoreResult<Vec<Token>> {
        let data = self.0.read().await;
        Ok(data
            .values()
            .filter(|t| t.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn insert(&self, mut token: Token) -> StoreResult<Token> {
        let mut data = self.0.write().await;
        if data.contains_key(&token.id) {
            return Err(StoreError::DuplicateKey(token.id));
        }
        token.issued_at = Utc::now();
        data.insert(token.id.clone(), token.clone());
        tracing::debug!(token_id = %token.id, owner_id = %token.owner_id, "token inserted");
        Ok(token)
    }

    async fn update(&self, token: &Token) -> StoreResult<()> {
        let mut data = self.0.write().await;
        match data.get_mut(&token.id) {
            Some(stored) => {
                *stored = token.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(token.id.clone())),
        }
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.0.write().await.remove(id);
        Ok(())
    }

    async fn delete_by_owner(&self, owner_id: &str) -> StoreResult<()> {
        let mut data = self.0.write().await;
        let before = data.len();
        data.retain(|_, t| t.owner_id != owner_id);
        tracing::debug!(owner_id, removed = before - data.len(), "tokens deleted for owner");
        Ok(())
    }
}
