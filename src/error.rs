use thiserror::Error;

/// Errors produced by the ingestion core.
///
/// Variants map directly onto the error kinds enumerated in the design
/// (`DecodeError`, `AuthError`, `BufferWriteError`, `FlushError`,
/// `CommitError`, `KVError`, `RevocationTimeout`), plus a handful of
/// ambient conversions from the crates the ingester leans on.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("message decode failed: {0}")]
    Decode(String),

    #[error("team resolution failed: {0}")]
    Auth(String),

    #[error("buffer write failed: {0}")]
    BufferWrite(String),

    #[error("buffer is not open (state: {0})")]
    BufferClosed(&'static str),

    #[error("flush failed: {0}")]
    Flush(String),

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("kv store operation failed: {0}")]
    Kv(String),

    #[error("revocation deadline exceeded for partition {0}")]
    RevocationTimeout(i32),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IngestError>;

impl From<toml::de::Error> for IngestError {
    fn from(e: toml::de::Error) -> Self {
        IngestError::Config(e.to_string())
    }
}

/// A deadlined suspension point (spec §5) that ran past its deadline has no
/// partition to blame by itself; callers map it onto `RevocationTimeout`
/// with the partition they were waiting on.
impl From<tokio::time::error::Elapsed> for IngestError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        IngestError::RevocationTimeout(-1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_displays_message() {
        let err = IngestError::Decode("bad json".to_string());
        assert_eq!(err.to_string(), "message decode failed: bad json");
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: IngestError = io_err.into();
        assert!(matches!(err, IngestError::Io(_)));
    }
}
