use thiserror::Error;

/// Errors raised while configuring or talking to the hosted model
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Configuration Error: {0}")]
    ConfigError(String),

    #[error("Authentication Error: {0}")]
    AuthError(String),

    #[error("Invalid Input: {0}")]
    InvalidInput(String),

    #[error("Request Error: {0}")]
    RequestError(String),

    #[error("Response Error: {0}")]
    ResponseError(String),

    #[error("Parsing Error: {0}")]
    ParsingError(String),

    #[error("HTTP Error: {status_code} - {message}")]
    HttpError { status_code: u16, message: String },

    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    JwtError(#[from] jsonwebtoken::errors::Error),
}

impl ChatError {
    /// True for errors that can only be fixed by changing configuration or credentials.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            ChatError::ConfigError(_) | ChatError::AuthError(_) | ChatError::JwtError(_)
        )
    }
}

/// Result type for chat operations
pub type ChatResult<T> = Result<T, ChatError>;
