//! Token lifecycle flows driven by the gateway's authentication layer.
//!
//! The service only sees `dyn TokenRepository`; which store is behind it is
//! decided once at startup.

use std::sync::Arc;

use chrono::Duration;

use crate::errors::StoreResult;
use crate::models::token::{Token, TokenCollection};
use crate::store::TokenRepository;

#[derive(Clone)]
pub struct TokenService {
    repo: Arc<dyn TokenRepository>,
    timeout: Duration,
}

impl TokenService {
    pub fn new(repo: Arc<dyn TokenRepository>, timeout: Duration) -> Self {
        Self { repo, timeout }
    }

    pub fn repository(&self) -> &Arc<dyn TokenRepository> {
        &self.repo
    }

    /// Issue a new token for an authenticated consumer.
    pub async fn issue(
        &self,
        owner_id: &str,
        source: &str,
        client_address: &str,
    ) -> StoreResult<Token> {
        let token = Token::issue(owner_id, source, client_address, self.timeout);
        let token = self.repo.insert(token).await?;
        tracing::info!(token_id = %token.id, owner_id, source, "token issued");
        Ok(token)
    }

    /// The token, if it exists and has not expired.
    pub async fn validate(&self, id: &str) -> StoreResult<Option<Token>> {
        match self.repo.get(id).await? {
            Some(token) if token.is_valid() => Ok(Some(token)),
            Some(_) => {
                tracing::debug!(token_id = id, "token expired");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Extend a live token by the configured timeout. Expired or unknown
    /// tokens are not resurrected.
    pub async fn renew(&self, id: &str) -> StoreResult<Option<Token>> {
        let Some(mut token) = self.validate(id).await? else {
            return Ok(None);
        };
        token.renew(self.timeout);
        self.repo.update(&token).await?;
        self.repo.sync_expiry(&token).await?;
        tracing::debug!(token_id = id, expires_at = %token.expires_at, "token renewed");
        Ok(Some(token))
    }

    /// Every stored token of the owner, expired ones included.
    pub async fn list(&self, owner_id: &str) -> StoreResult<TokenCollection> {
        let tokens = self.repo.get_by_owner(owner_id).await?;
        Ok(TokenCollection::new(tokens))
    }

    pub async fn revoke(&self, id: &str) -> StoreResult<()> {
        self.repo.delete(id).await?;
        tracing::info!(token_id = id, "token revoked");
        Ok(())
    }

    /// Logout-everywhere / consumer deactivation.
    pub async fn revoke_owner(&self, owner_id: &str) -> StoreResult<()> {
        self.repo.delete_by_owner(owner_id).await?;
        tracing::info!(owner_id, "all tokens revoked for owner");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTokenStore;
    use chrono::Utc;

    fn service() -> (TokenService, MemoryTokenStore) {
        let store = MemoryTokenStore::new();
        let svc = TokenService::new(Arc::new(store.clone()), Duration::minutes(60));
        (svc, store)
    }

    #[tokio::test]
    async fn test_issue_then_validate() {
        let (svc, _) = service();
        let token = svc.issue("C1", "password", "10.0.0.1").await.unwrap();
        let found = svc.validate(&token.id).await.unwrap().unwrap();
        assert_eq!(found.owner_id, "C1");
        assert_eq!(found.source, "password");
    }

    #[tokio::test]
    async fn test_validate_rejects_expired() {
        let (svc, store) = service();
        let mut token = Token::issue("C1", "", "", Duration::minutes(60));
        token.expires_at = Utc::now() - Duration::seconds(1);
        store.insert(token.clone()).await.unwrap();

        assert!(svc.validate(&token.id).await.unwrap().is_none());
        // still stored, only filtered
        assert!(store.get(&token.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_validate_unknown_is_none() {
        let (svc, _) = service();
        assert!(svc.validate("nonexistent-id").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_renew_persists_new_expiry() {
        let (svc, store) = service();
        let mut token = Token::issue("C1", "", "", Duration::minutes(60));
        token.expires_at = Utc::now() + Duration::minutes(1);
        let token = store.insert(token).await.unwrap();

        let renewed = svc.renew(&token.id).await.unwrap().unwrap();
        assert!(renewed.expires_at > token.expires_at);
        let stored = store.get(&token.id).await.unwrap().unwrap();
        assert_eq!(stored.expires_at, renewed.expires_at);
    }

    #[tokio::test]
    async fn test_renew_unknown_is_none() {
        let (svc, _) = service();
        assert!(svc.renew("nonexistent-id").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_and_revoke_owner() {
        let (svc, _) = service();
        let a = svc.issue("C1", "", "").await.unwrap();
        svc.issue("C1", "", "").await.unwrap();
        svc.issue("C2", "", "").await.unwrap();

        assert_eq!(svc.list("C1").await.unwrap().count, 2);

        svc.revoke_owner("C1").await.unwrap();
        assert_eq!(svc.list("C1").await.unwrap().count, 0);
        assert_eq!(svc.list("C2").await.unwrap().count, 1);
        assert!(svc.validate(&a.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_twice_is_ok() {
        let (svc, _) = service();
        let token = svc.issue("C1", "", "").await.unwrap();
        svc.revoke(&token.id).await.unwrap();
        svc.revoke(&token.id).await.unwrap();
        assert!(svc.validate(&token.id).await.unwrap().is_none());
    }
}
