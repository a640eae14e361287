//! Error handling

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;
use tracing::info;

/// Error definitions for the pixtale application.
#[derive(Debug)]
pub enum PixtaleError {
    /// The caller sent something we won't process
    BadRequest(String),
    /// A required setting (usually the model credential) is missing
    Configuration(String),
    /// When a requested file is not found
    NotFound(String),
    /// Decoding or encoding an image failed
    Processing {
        /// What we were doing
        context: String,
        /// What the image library said
        source: image::ImageError,
    },
    /// The story model or the speech service failed
    Provider(String),
    /// When an internal server error occurs
    Internal(String),
}

impl std::fmt::Display for PixtaleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(message) => write!(f, "Bad request: {message}"),
            Self::Configuration(message) => write!(f, "Configuration error: {message}"),
            Self::NotFound(what) => write!(f, "Not found: {what}"),
            Self::Processing { context, source } => {
                write!(f, "Image processing failed ({context}): {source}")
            }
            Self::Provider(message) => write!(f, "Provider error: {message}"),
            Self::Internal(message) => write!(f, "Internal error: {message}"),
        }
    }
}

impl std::error::Error for PixtaleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Processing { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl PixtaleError {
    /// Wraps an image library failure.
    pub fn processing(context: impl Into<String>, source: image::ImageError) -> Self {
        Self::Processing {
            context: context.into(),
            source,
        }
    }

    /// HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for PixtaleError {
    fn from(err: std::io::Error) -> Self {
        PixtaleError::Internal(err.to_string())
    }
}

impl From<url::ParseError> for PixtaleError {
    fn from(err: url::ParseError) -> Self {
        PixtaleError::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for PixtaleError {
    fn from(err: tokio::task::JoinError) -> Self {
        PixtaleError::Internal(err.to_string())
    }
}

/// JSON body of every failed API call.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Always false
    pub success: bool,
    /// What the caller gets told
    pub message: String,
    /// Extra detail, only where it is safe to share
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ErrorBody {
    /// A failure body with an optional detail string.
    pub fn new(message: impl Into<String>, error: Option<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error,
        }
    }
}

impl IntoResponse for PixtaleError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = match self {
            PixtaleError::BadRequest(message) => {
                info!("Bad request received: {message}");
                ErrorBody::new(message, None)
            }
            PixtaleError::NotFound(what) => {
                tracing::error!("404 {what}");
                ErrorBody::new("Not found", None)
            }
            other => {
                tracing::error!("Internal server error: {}", other);
                ErrorBody::new(
                    "Internal server error",
                    Some("An unexpected error occurred".to_string()),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
