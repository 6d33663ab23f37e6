use thiserror::Error;

/// Failure kinds callers branch on. Concrete sources are folded into
/// `Storage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DuplicateKey,
    NotFound,
    Storage,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("token key '{0}' already exists")]
    DuplicateKey(String),

    #[error("token '{0}' not found")]
    NotFound(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("mongodb error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(
        "failed to delete {} of the tokens owned by '{owner_id}'",
        .failures.len()
    )]
    Cascade {
        owner_id: String,
        /// (token id, error message) for every record that could not be removed.
        failures: Vec<(String, String)>,
    },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::DuplicateKey(_) => ErrorKind::DuplicateKey,
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::Redis(_)
            | StoreError::Mongo(_)
            | StoreError::Serialization(_)
            | StoreError::Cascade { .. } => ErrorKind::Storage,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(StoreError::DuplicateKey("a".into()).kind(), ErrorKind::DuplicateKey);
        assert_eq!(StoreError::NotFound("a".into()).kind(), ErrorKind::NotFound);

        let redis_err = redis::RedisError::from((redis::ErrorKind::IoError, "connection refused"));
        assert_eq!(StoreError::from(redis_err).kind(), ErrorKind::Storage);

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(StoreError::from(json_err).kind(), ErrorKind::Storage);
    }

    #[test]
    fn test_cascade_message_counts_failures() {
        let err = StoreError::Cascade {
            owner_id: "C1".into(),
            failures: vec![
                ("T1".into(), "timeout".into()),
                ("T2".into(), "timeout".into()),
            ],
        };
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(
            err.to_string(),
            "failed to delete 2 of the tokens owned by 'C1'"
        );
    }
}
