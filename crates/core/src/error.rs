use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("intent pattern error: {0}")]
    Pattern(#[from] regex::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("scoring model failed: {0}")]
    Scoring(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("job store error: {0}")]
    JobStore(#[from] rusqlite::Error),

    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("unknown job: {0}")]
    UnknownJob(uuid::Uuid),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("retrieval backend error: {0}")]
    Backend(#[from] RetrievalError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
