use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("appliance not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
}
