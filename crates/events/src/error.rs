use std::error::Error as StdError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("event fabric is closed")]
    Closed,
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
    #[error("{context}: {source}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    /// The shared backend rejected an event; it reached local subscribers only.
    #[error("{event_type} delivered locally only: {reason}")]
    PublishDegraded { event_type: String, reason: String },
}

impl Error {
    #[must_use]
    pub fn backend<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::backend("sqlite", err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
