/// Errors surfaced by the client.
#[derive(Debug, thiserror::Error)]
pub enum CrateDbError {
    /// The server answered a request with a non-200 status and a structured
    /// error body.
    #[error("cratedb error {code}: {message}")]
    Server {
        message: String,
        code: i64,
        error_trace: Option<String>,
        status: u16,
    },
    /// The request never produced a usable response (connect failure, reset,
    /// gzip failure, payload serialization).
    #[error("request error: {message}")]
    Request {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    /// The response body could not be parsed or type-converted.
    #[error("deserialization error: {0}")]
    Deserialization(String),
    /// Invalid arguments detected before any I/O.
    #[error("invalid argument: {0}")]
    Validation(String),
    /// A cursor operation outside its valid lifecycle.
    #[error("{0}")]
    Cursor(String),
}

impl CrateDbError {
    pub(crate) fn request(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Request {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, CrateDbError>;
