use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A session token: a time-bounded grant issued to one consumer.
///
/// The serialized field names match the records the gateway has always
/// written (`consumer_id`, `ip_address`, `expiration`, `created_at`), so a
/// Redis value or an API response stays readable by older consumers.
/// `expires_in` is derived and never part of the stored record; see
/// [`TokenView`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    #[serde(default)]
    pub source: String,
    #[serde(rename = "consumer_id")]
    pub owner_id: String,
    #[serde(rename = "ip_address", default)]
    pub client_address: String,
    #[serde(rename = "expiration")]
    pub expires_at: DateTime<Utc>,
    #[serde(rename = "created_at")]
    pub issued_at: DateTime<Utc>,
}

impl Token {
    /// Build a fresh token for `owner_id` that expires `timeout` from now.
    pub fn issue(
        owner_id: impl Into<String>,
        source: impl Into<String>,
        client_address: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            owner_id: owner_id.into(),
            client_address: client_address.into(),
            expires_at: now + timeout,
            issued_at: now,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Valid strictly before `expires_at`; a token expiring exactly at `now`
    /// is already invalid.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Push the expiration out to `now + timeout`. Only touches the value;
    /// callers persist it with `update`.
    pub fn renew(&mut self, timeout: Duration) {
        self.renew_at(Utc::now(), timeout);
    }

    pub fn renew_at(&mut self, now: DateTime<Utc>, timeout: Duration) {
        // never shortens a grant, even with a smaller timeout than at issue
        self.expires_at = self.expires_at.max(now + timeout);
    }

    pub fn remaining_seconds(&self) -> i64 {
        self.remaining_seconds_at(Utc::now())
    }

    /// Seconds left until expiry; negative once expired.
    pub fn remaining_seconds_at(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds()
    }
}

/// Read-path projection of a [`Token`] carrying the derived `expires_in`.
#[derive(Debug, Clone, Serialize)]
pub struct TokenView {
    #[serde(flatten)]
    pub token: Token,
    pub expires_in: i64,
}

impl From<Token> for TokenView {
    fn from(token: Token) -> Self {
        let expires_in = token.remaining_seconds();
        Self { token, expires_in }
    }
}

/// List response: `{ "count": n, "tokens": [...] }`.
#[derive(Debug, Clone, Serialize)]
pub struct TokenCollection {
    pub count: usize,
    pub tokens: Vec<TokenView>,
}

impl TokenCollection {
    pub fn new(tokens: Vec<Token>) -> Self {
        let tokens: Vec<TokenView> = tokens.into_iter().map(TokenView::from).collect();
        Self {
            count: tokens.len(),
            tokens,
        }
    }
}

impl Default for TokenCollection {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
