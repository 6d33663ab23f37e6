pub mod memory;
pub mod mongo;
pub mod redis;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Backend, Config};
use crate::errors::{StoreError, StoreResult};
use crate::models::token::Token;

pub use self::memory::MemoryTokenStore;
pub use self::mongo::MongoTokenStore;
pub use self::redis::RedisTokenStore;

/// Persistence contract for session tokens.
/// Implementations: MemoryTokenStore (in-process), MongoTokenStore, RedisTokenStore.
///
/// Absence is never an error on the read path: `get` returns `None` and
/// `get_by_owner` an empty list. Neither filters out expired tokens.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn get(&self, id: &str) -> StoreResult<Option<Token>>;

    async fn get_by_owner(&self, owner_id: &str) -> StoreResult<Vec<Token>>;

    /// Stamp `issued_at` and store the token. Fails with `DuplicateKey` when
    /// the id is already taken. Returns the record as stored.
    async fn insert(&self, token: Token) -> StoreResult<Token>;

    /// Replace the record with the same id. Only the in-process store
    /// rejects a missing id; the remote stores create-or-replace.
    async fn update(&self, token: &Token) -> StoreResult<()>;

    /// Idempotent.
    async fn delete(&self, id: &str) -> StoreResult<()>;

    /// Remove every token of `owner_id`. Idempotent.
    async fn delete_by_owner(&self, owner_id: &str) -> StoreResult<()>;

    /// Align the store's native expiry with `token.expires_at`.
    /// Stores without native expiry have nothing to do.
    async fn sync_expiry(&self, _token: &Token) -> StoreResult<()> {
        Ok(())
    }
}

/// Build the configured backend. Called once at startup.
pub async fn connect(cfg: &Config) -> anyhow::Result<Arc<dyn TokenRepository>> {
    let repo: Arc<dyn TokenRepository> = match cfg.backend {
        Backend::Memory => {
            tracing::info!(backend = "memory", "using in-process token store");
            Arc::new(MemoryTokenStore::new())
        }
        Backend::Mongo => {
            tracing::info!(backend = "mongo", "connecting to MongoDB...");
            Arc::new(MongoTokenStore::connect(&cfg.mongo_url).await?)
        }
        Backend::Redis => {
            tracing::info!(backend = "redis", addr = %cfg.redis_addr, "connecting to Redis...");
            Arc::new(
                RedisTokenStore::connect(
                    &cfg.redis_addr,
                    cfg.redis_password.as_deref(),
                    cfg.redis_db,
                )
                .await?,
            )
        }
    };
    Ok(repo)
}

/// Run `delete` for every id, continuing past failures. The failures are
/// reported together once every id has been attempted.
pub(crate) async fn delete_all<F, Fut>(
    owner_id: &str,
    ids: Vec<String>,
    mut delete: F,
) -> StoreResult<()>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = StoreResult<()>>,
{
    let mut failures = Vec::new();
    for id in ids {
        if let Err(e) = delete(id.clone()).await {
            tracing::warn!(token_id = %id, owner_id, error = %e, "failed to delete token, continuing cascade");
            failures.push((id, e.to_string()));
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(StoreError::Cascade {
            owner_id: owner_id.to_string(),
            failures,
        })
    }
}
