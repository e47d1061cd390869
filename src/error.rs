use thiserror::Error;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No row satisfies the requested identifier and instants.
    #[error("not found: {0}")]
    NotFound(String),

    /// The targeted row has already been superseded in version time.
    #[error("not the latest version: {0}")]
    NotLatestVersion(String),

    /// The targeted row has already been superseded in correction time.
    #[error("not the latest correction: {0}")]
    NotLatestCorrection(String),

    #[error("invalid identifier '{id}': {reason}")]
    InvalidIdentifier { id: String, reason: String },

    #[error("parent not found: {0}")]
    ParentNotFound(String),

    /// Stored history is inconsistent. Never recovered from.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("traversal failed: {0}")]
    TraversalFailure(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("parse error: {0}")]
    Parse(String),
}

impl Error {
    pub(crate) fn invalid_id(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// True for optimistic-concurrency conflicts a caller may retry after re-reading.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::NotLatestVersion(_) | Self::NotLatestCorrection(_))
    }
}

impl From<diesel::result::Error> for Error {
    fn from(e: diesel::result::Error) -> Self {
        Self::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
