#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("review not found: {0}")]
    ReviewNotFound(String),

    #[error("revision not found: {0}")]
    RevisionNotFound(String),

    #[error("code file not found: {0}")]
    CodeFileNotFound(String),

    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("code file decode error: {0}")]
    CodeFileDecode(#[from] serde_json::Error),
}

impl Error {
    /// True for the lookup failures a caller would report as "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::ReviewNotFound(_) | Error::RevisionNotFound(_) | Error::CodeFileNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
