use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// A required field was empty or malformed.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Resource not found error.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The remote server could not be reached or the request failed in transit.
    #[error("Connection error: {0}")]
    Connectivity(String),

    /// The remote server answered with a non-success status.
    #[error("Remote server returned status {status} for {url}")]
    RemoteStatus {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// Encryption key could not be decoded.
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    /// Encryption key decoded to the wrong number of bytes.
    #[error("Invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    /// Ciphertext is shorter than the nonce.
    #[error("Encrypted payload too short")]
    PayloadTooShort,

    /// Ciphertext did not verify under the configured key.
    #[error("Secret authentication failed")]
    AuthenticationFailed,

    /// Task state machine violation.
    #[error("Invalid task transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Error reported by a task handler, kept verbatim.
    #[error("{0}")]
    Task(String),

    /// Missing or invalid credentials on an API request.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// XML parsing error.
    #[error("XML parsing error: {0}")]
    Xml(#[from] roxmltree::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        // Keep URLs (and any userinfo in them) out of error text.
        AppError::Connectivity(e.without_url().to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Connectivity(_) | AppError::RemoteStatus { .. } | AppError::Xml(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::error!(error = %self, "Request error");

        (status, self.to_string()).into_response()
    }
}

/// Result type alias for the application.
pub type Result<T> = std::result::Result<T, AppError>;
