use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{delete_all, TokenRepository};
use crate::errors::{StoreError, StoreResult};
use crate::models::token::Token;

const ID_KEY_PREFIX: &str = "token:id:";
const OWNER_KEY_PREFIX: &str = "token:consumer:";

fn id_key(id: &str) -> String {
    format!("{}{}", ID_KEY_PREFIX, id)
}

fn owner_key(owner_id: &str) -> String {
    format!("{}{}", OWNER_KEY_PREFIX, owner_id)
}

/// Remaining lifetime in milliseconds, floored at 1ms so an already-expired
/// token is still a legal `PX` argument and gets reclaimed immediately.
fn ttl_millis(token: &Token, now: DateTime<Utc>) -> i64 {
    (token.expires_at - now).num_milliseconds().max(1)
}

fn connection_url(addr: &str, password: Option<&str>, db: i64) -> String {
    match password {
        Some(pw) if !pw.is_empty() => {
            format!("redis://:{}@{}/{}", urlencoding::encode(pw), addr, db)
        }
        _ => format!("redis://{}/{}", addr, db),
    }
}

/// Delete every record, then drop the owner index whatever happened to the
/// records. An index failure is folded into the cascade error.
async fn cascade_owner<D, DFut, X, XFut>(
    owner_id: &str,
    ids: Vec<String>,
    delete_record: D,
    drop_index: X,
) -> StoreResult<()>
where
    D: FnMut(String) -> DFut,
    DFut: Future<Output = StoreResult<()>>,
    X: FnOnce() -> XFut,
    XFut: Future<Output = StoreResult<()>>,
{
    let records = delete_all(owner_id, ids, delete_record).await;
    let index = drop_index().await;
    match (records, index) {
        (Ok(()), index) => index,
        (Err(StoreError::Cascade { owner_id, mut failures }), Err(e)) => {
            failures.push((owner_key(&owner_id), e.to_string()));
            Err(StoreError::Cascade { owner_id, failures })
        }
        (Err(e), _) => Err(e),
    }
}

/// Redis-backed token store.
///
/// Layout:
///   token:id:<id>             JSON record, PX = remaining lifetime
///   token:consumer:<owner>    SET of token ids (hand-maintained index)
///
/// Redis reclaims expired records on its own, which leaves their ids behind
/// in the owner set. Readers treat an index entry without a record as absent.
#[derive(Clone)]
pub struct RedisTokenStore {
    redis: ConnectionManager,
}

impl RedisTokenStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    pub async fn connect(addr: &str, password: Option<&str>, db: i64) -> anyhow::Result<Self> {
        let client = redis::Client::open(connection_url(addr, password, db))?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn))
    }

    /// Raw members of the owner's index set, dangling entries included.
    pub async fn owner_index(&self, owner_id: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.redis.clone();
        let ids: Vec<String> = conn.smembers(owner_key(owner_id)).await?;
        Ok(ids)
    }
}

#[async_trait]
impl TokenRepository for RedisTokenStore {
    async fn get(&self, id: &str) -> StoreResult<Option<Token>> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.get(id_key(id)).await?;
        match raw {
            Some(v) => Ok(Some(serde_json::from_str(&v)?)),
            None => Ok(None),
        }
    }

    async fn get_by_owner(&self, owner_id: &str) -> StoreResult<Vec<Token>> {
        let ids = self.owner_index(owner_id).await?;
        let mut tokens = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get(&id).await? {
                Some(token) => tokens.push(token),
                None => {
                    tracing::warn!(token_id = %id, owner_id, "skipping index entry without a record");
                }
            }
        }
        Ok(tokens)
    }

    async fn insert(&self, mut token: Token) -> StoreResult<Token> {
        let now = Utc::now();
        token.issued_at = now;
        let value = serde_json::to_string(&token)?;
        let mut conn = self.redis.clone();

        // SET NX folds the existence check into the write.
        let created: Option<String> = redis::cmd("SET")
            .arg(id_key(&token.id))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(&token, now))
            .query_async(&mut conn)
            .await?;
        if created.is_none() {
            return Err(StoreError::DuplicateKey(token.id));
        }

        // Not atomic with the SET above. A failure here leaves a record the
        // owner listing cannot see until it expires.
        if let Err(e) = conn
            .sadd::<_, _, ()>(owner_key(&token.owner_id), &token.id)
            .await
        {
            tracing::warn!(
                token_id = %token.id,
                owner_id = %token.owner_id,
                error = %e,
                "token stored but owner index update failed"
            );
            return Err(e.into());
        }

        tracing::debug!(token_id = %token.id, owner_id = %token.owner_id, "token inserted");
        Ok(token)
    }

    async fn update(&self, token: &Token) -> StoreResult<()> {
        let key = id_key(&token.id);
        let value = serde_json::to_string(token)?;
        let mut conn = self.redis.clone();

        // XX + KEEPTTL: a live record keeps its expiry; sync_expiry moves it.
        let replaced: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&value)
            .arg("XX")
            .arg("KEEPTTL")
            .query_async(&mut conn)
            .await?;
        if replaced.is_none() {
            // Reclaimed or never written: recreate it with its own lifetime.
            redis::cmd("SET")
                .arg(&key)
                .arg(value)
                .arg("PX")
                .arg(ttl_millis(token, Utc::now()))
                .query_async::<_, ()>(&mut conn)
                .await?;
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(id_key(id)).await?;
        Ok(())
    }

    async fn delete_by_owner(&self, owner_id: &str) -> StoreResult<()> {
        let ids = self.owner_index(owner_id).await?;
        let count = ids.len();
        cascade_owner(
            owner_id,
            ids,
            |id| async move { self.delete(&id).await },
            || async move {
                let mut conn = self.redis.clone();
                conn.del::<_, ()>(owner_key(owner_id))
                    .await
                    .map_err(StoreError::from)
            },
        )
        .await?;
        tracing::debug!(owner_id, count, "tokens deleted for owner");
        Ok(())
    }

    async fn sync_expiry(&self, token: &Token) -> StoreResult<()> {
        let mut conn = self.redis.clone();
        let applied: bool = redis::cmd("PEXPIREAT")
            .arg(id_key(&token.id))
            .arg(token.expires_at.timestamp_millis())
            .query_async(&mut conn)
            .await?;
        if !applied {
            tracing::debug!(token_id = %token.id, "no record to refresh expiry on");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Mutex;

    #[test]
    fn test_key_layout() {
        assert_eq!(id_key("T1"), "token:id:T1");
        assert_eq!(owner_key("C1"), "token:consumer:C1");
    }

    #[test]
    fn test_ttl_millis() {
        let now = Utc::now();
        let mut token = Token::issue("C1", "", "", Duration::minutes(60));
        token.expires_at = now + Duration::seconds(90);
        assert_eq!(ttl_millis(&token, now), 90_000);

        token.expires_at = now - Duration::seconds(5);
        assert_eq!(ttl_millis(&token, now), 1);
    }

    fn io_error(msg: &'static str) -> StoreError {
        StoreError::from(redis::RedisError::from((redis::ErrorKind::IoError, msg)))
    }

    #[tokio::test]
    async fn test_cascade_drops_index_after_record_failure() {
        let calls = Mutex::new(Vec::new());
        let result = cascade_owner(
            "C1",
            vec!["T1".into(), "T2".into(), "T3".into()],
            |id| {
                calls.lock().unwrap().push(id.clone());
                async move {
                    if id == "T2" {
                        Err(io_error("broken pipe"))
                    } else {
                        Ok(())
                    }
                }
            },
            || {
                calls.lock().unwrap().push(owner_key("C1"));
                async { Ok::<(), StoreError>(()) }
            },
        )
        .await;

        assert_eq!(
            *calls.lock().unwrap(),
            vec!["T1", "T2", "T3", "token:consumer:C1"]
        );
        match result {
            Err(StoreError::Cascade { owner_id, failures }) => {
                assert_eq!(owner_id, "C1");
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, "T2");
            }
            other => panic!("expected cascade error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cascade_keeps_record_failures_when_index_fails() {
        let result = cascade_owner(
            "C1",
            vec!["T1".into()],
            |_| async { Err::<(), _>(io_error("timeout")) },
            || async { Err::<(), _>(io_error("connection reset")) },
        )
        .await;

        match result {
            Err(StoreError::Cascade { failures, .. }) => {
                let keys: Vec<&str> = failures.iter().map(|(k, _)| k.as_str()).collect();
                assert_eq!(keys, vec!["T1", "token:consumer:C1"]);
            }
            other => panic!("expected cascade error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cascade_reports_index_failure_alone() {
        let result = cascade_owner(
            "C1",
            vec!["T1".into()],
            |_| async { Ok::<(), StoreError>(()) },
            || async { Err::<(), _>(io_error("connection reset")) },
        )
        .await;
        assert!(matches!(result, Err(StoreError::Redis(_))));
    }

    #[tokio::test]
    async fn test_cascade_success() {
        let dropped = Mutex::new(false);
        let result = cascade_owner(
            "C1",
            vec!["T1".into(), "T2".into()],
            |_| async { Ok::<(), StoreError>(()) },
            || {
                *dropped.lock().unwrap() = true;
                async { Ok::<(), StoreError>(()) }
            },
        )
        .await;
        assert!(result.is_ok());
        assert!(*dropped.lock().unwrap());
    }

    #[test]
    fn test_connection_url() {
        assert_eq!(connection_url("127.0.0.1:6379", None, 0), "redis://127.0.0.1:6379/0");
        assert_eq!(connection_url("cache:6380", Some(""), 2), "redis://cache:6380/2");
        assert_eq!(
            connection_url("cache:6380", Some("p@ss word"), 3),
            "redis://:p%40ss%20word@cache:6380/3"
        );
    }
}
