use thiserror::Error;

pub type Result<T> = std::result::Result<T, ObjectClientError>;

#[derive(Debug, Error)]
pub enum ObjectClientError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl From<reqwest::Error> for ObjectClientError {
    fn from(err: reqwest::Error) -> Self {
        ObjectClientError::Network(err.to_string())
    }
}

impl From<url::ParseError> for ObjectClientError {
    fn from(err: url::ParseError) -> Self {
        ObjectClientError::InvalidEndpoint(err.to_string())
    }
}
