use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Remote cache error: {0}")]
    Remote(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
