use thiserror::Error;

pub type Result<T> = std::result::Result<T, FeedError>;

/// Errors surfaced by the feed engine.
#[derive(Debug, Error)]
pub enum FeedError {
    /// A required field was empty.
    #[error("validation failed: {field} must not be empty")]
    Validation { field: &'static str },
    /// No signed-in identity for an operation that needs one.
    #[error("not signed in: {0}")]
    Auth(&'static str),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Transport or storage failure underneath the feed store.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("feed store is closed")]
    Closed,
}

impl FeedError {
    /// Only backend failures that may succeed on a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FeedError::Backend(err) if !matches!(err, BackendError::Closed))
    }
}

impl From<rusqlite::Error> for FeedError {
    fn from(err: rusqlite::Error) -> Self {
        FeedError::Backend(BackendError::Sqlite(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_live_backend_errors_are_retryable() {
        assert!(!FeedError::Validation { field: "body" }.is_retryable());
        assert!(!FeedError::Auth("no identity").is_retryable());
        assert!(!FeedError::Backend(BackendError::Closed).is_retryable());
        assert!(FeedError::Backend(BackendError::Unavailable("down".into())).is_retryable());
    }

    #[test]
    fn validation_message_names_the_field() {
        let err = FeedError::Validation { field: "sender" };
        assert_eq!(err.to_string(), "validation failed: sender must not be empty");
    }
}
