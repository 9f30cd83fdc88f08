use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Malformed message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Unsupported resource payload: {0}")]
    Payload(String),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    #[error("Worker not found: {0}")]
    WorkerNotFound(uuid::Uuid),

    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;
