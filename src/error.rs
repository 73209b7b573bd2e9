use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("Catalog enumeration failed: {message}")]
    CatalogEnumeration { message: String },

    #[error("Failed to fetch schema for table {dataset}.{table}: {message}")]
    TableFetch {
        dataset: String,
        table: String,
        message: String,
    },

    #[error("Malformed snapshot {path}: {message}")]
    SnapshotParse { path: String, message: String },

    #[error("Missing prerequisite: {path} does not exist")]
    MissingPrerequisite { path: String },

    #[error("Model invocation failed: {message}")]
    ModelInvocation { message: String },

    #[error("Google API returned {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Authentication error: {message}")]
    AuthError { message: String },

    #[error("IO error: {message}")]
    IoError { message: String },

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },
}

impl From<std::io::Error> for AssistantError {
    fn from(err: std::io::Error) -> Self {
        AssistantError::IoError {
            message: err.to_string(),
        }
    }
}

impl From<walkdir::Error> for AssistantError {
    fn from(err: walkdir::Error) -> Self {
        AssistantError::IoError {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for AssistantError {
    fn from(err: url::ParseError) -> Self {
        AssistantError::ConfigError {
            message: format!("Invalid endpoint URL: {}", err),
        }
    }
}
