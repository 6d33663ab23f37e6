use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::error::{ErrorKind as MongoErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, IndexOptions, ReplaceOptions};
use mongodb::{Client, Collection, IndexModel};
use serde::{Deserialize, Serialize};

use super::TokenRepository;
use crate::errors::{StoreError, StoreResult};
use crate::models::token::Token;

const DATABASE: &str = "bifrost";
const COLLECTION: &str = "tokens";
const OWNER_INDEX: &str = "token_consumer_idx";
const DUPLICATE_KEY_CODE: i32 = 11000;

/// Stored shape of a token: the id doubles as `_id` so MongoDB enforces
/// uniqueness, and timestamps are BSON dates.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenDocument {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    source: String,
    consumer_id: String,
    #[serde(default)]
    ip_address: String,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    expiration: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    created_at: DateTime<Utc>,
}

impl From<&Token> for TokenDocument {
    fn from(t: &Token) -> Self {
        Self {
            id: t.id.clone(),
            source: t.source.clone(),
            consumer_id: t.owner_id.clone(),
            ip_address: t.client_address.clone(),
            expiration: t.expires_at,
            created_at: t.issued_at,
        }
    }
}

impl From<TokenDocument> for Token {
    fn from(d: TokenDocument) -> Self {
        Self {
            id: d.id,
            source: d.source,
            owner_id: d.consumer_id,
            client_address: d.ip_address,
            expires_at: d.expiration,
            issued_at: d.created_at,
        }
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        MongoErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY_CODE
    )
}

/// MongoDB-backed token store.
///
/// Holds only the parsed client options. Every operation opens its own
/// client, runs one command and drops it; no pool outlives a call.
#[derive(Clone)]
pub struct MongoTokenStore {
    options: ClientOptions,
}

impl MongoTokenStore {
    /// Parse the connection string and declare the owner index.
    pub async fn connect(connection_string: &str) -> anyhow::Result<Self> {
        let options = ClientOptions::parse(connection_string).await?;
        let store = Self { options };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> StoreResult<()> {
        let index = IndexModel::builder()
            .keys(doc! { "consumer_id": 1 })
            .options(
                IndexOptions::builder()
                    .name(OWNER_INDEX.to_string())
                    .background(true)
                    .sparse(true)
                    .build(),
            )
            .build();
        self.collection()?.create_index(index, None).await?;
        tracing::info!(index = OWNER_INDEX, "ensured token owner index");
        Ok(())
    }

    fn collection(&self) -> StoreResult<Collection<TokenDocument>> {
        let client = Client::with_options(self.options.clone())?;
        Ok(client.database(DATABASE).collection(COLLECTION))
    }
}

#[async_trait]
impl TokenRepository for MongoTokenStore {
    async fn get(&self, id: &str) -> StoreResult<Option<Token>> {
        let found = self.collection()?.find_one(doc! { "_id": id }, None).await?;
        Ok(found.map(Token::from))
    }

    async fn get_by_owner(&self, owner_id: &str) -> StoreResult<Vec<Token>> {
        let cursor = self
            .collection()?
            .find(doc! { "consumer_id": owner_id }, None)
            .await?;
        let docs: Vec<TokenDocument> = cursor.try_collect().await?;
        Ok(docs.into_iter().map(Token::from).collect())
    }

    async fn insert(&self, mut token: Token) -> StoreResult<Token> {
        token.issued_at = Utc::now();
        match self
            .collection()?
            .insert_one(TokenDocument::from(&token), None)
            .await
        {
            Ok(_) => {
                tracing::debug!(token_id = %token.id, owner_id = %token.owner_id, "token inserted");
                Ok(token)
            }
            Err(e) if is_duplicate_key(&e) => Err(StoreError::DuplicateKey(token.id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, token: &Token) -> StoreResult<()> {
        // Create-or-replace; a missing id is not an error here.
        let options = ReplaceOptions::builder().upsert(true).build();
        self.collection()?
            .replace_one(
                doc! { "_id": token.id.as_str() },
                TokenDocument::from(token),
                options,
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.collection()?.delete_one(doc! { "_id": id }, None).await?;
        Ok(())
    }

    async fn delete_by_owner(&self, owner_id: &str) -> StoreResult<()> {
        let result = self
            .collection()?
            .delete_many(doc! { "consumer_id": owner_id }, None)
            .await?;
        tracing::debug!(owner_id, removed = result.deleted_count, "tokens deleted for owner");
        Ok(())
    }
}
