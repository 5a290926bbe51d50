/// Error types shared by the Quack crates.
///
/// These cover the persistence layer (Redis, the JSON state file, serialization).
/// Application-specific errors are defined in the binary crate and wrap
/// `CommonError` via `#[from]`.

#[derive(Debug, thiserror::Error)]
pub enum CommonError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("state file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
